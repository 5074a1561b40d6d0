//! Request/response correlation inside actor state.
//!
//! There is no blocking ask. An actor that needs a reply registers the
//! continuation data under a fresh `CorrelationId`, sends the id along with
//! its request, and resumes when a reply carrying the same id arrives.

use kestrel_core::CorrelationId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Pending<C> {
    context: C,
    deadline: Option<Instant>,
}

/// Outstanding requests of one actor, keyed by correlation id
#[derive(Debug, Clone)]
pub struct PendingRequests<C> {
    entries: HashMap<CorrelationId, Pending<C>>,
}

impl<C> Default for PendingRequests<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<C> PendingRequests<C> {
    /// No outstanding requests
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `context` until the reply arrives
    pub fn register(&mut self, context: C) -> CorrelationId {
        self.insert(context, None)
    }

    /// Remember `context`; `expire` gives it back once `timeout` has passed
    pub fn register_with_timeout(&mut self, context: C, timeout: Duration) -> CorrelationId {
        self.insert(context, Some(Instant::now() + timeout))
    }

    fn insert(&mut self, context: C, deadline: Option<Instant>) -> CorrelationId {
        let id = CorrelationId::new();
        self.entries.insert(id, Pending { context, deadline });
        id
    }

    /// Take the continuation for a reply; `None` for unknown or late replies
    pub fn complete(&mut self, id: CorrelationId) -> Option<C> {
        self.entries.remove(&id).map(|pending| pending.context)
    }

    /// Remove and return every request whose deadline is before `now`
    pub fn expire(&mut self, now: Instant) -> Vec<(CorrelationId, C)> {
        let expired: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, pending)| pending.deadline.map_or(false, |deadline| deadline <= now))
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.complete(id).map(|context| (id, context)))
            .collect()
    }

    /// Whether a request with `id` is outstanding
    pub fn contains(&self, id: CorrelationId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_returns_context_once() {
        let mut pending = PendingRequests::new();
        let id = pending.register("lookup user 7");

        assert!(pending.contains(id));
        assert_eq!(pending.complete(id), Some("lookup user 7"));
        assert_eq!(pending.complete(id), None);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_unknown_reply_is_ignored() {
        let mut pending: PendingRequests<u32> = PendingRequests::new();
        pending.register(1);
        assert_eq!(pending.complete(CorrelationId::new()), None);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_expire() {
        let mut pending = PendingRequests::new();
        let short = pending.register_with_timeout("short", Duration::from_millis(10));
        let open = pending.register("open");
        let later = Instant::now() + Duration::from_secs(1);

        let expired = pending.expire(later);
        assert_eq!(expired, vec![(short, "short")]);
        assert!(pending.contains(open));
    }
}

//! Recording probes for actor messages and system events.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use kestrel_concurrency::actor::{Message, SystemEvent};
use kestrel_concurrency::{ActorRef, ManualDispatcher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::TestKitError;

/// Upper bound on turns per drive, so a message loop cannot hang a test
pub(crate) const MAX_TURNS: usize = 100_000;

/// How often a deterministic kit re-drives while waiting for timers
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Drive `driver` (if any) and wait for the next item of `receiver`
fn next_within<T>(
    receiver: &Receiver<T>,
    driver: Option<&ManualDispatcher>,
    timeout: Duration,
) -> Result<T, RecvTimeoutError> {
    let deadline = Instant::now() + timeout;
    loop {
        let slice = match driver {
            Some(dispatcher) => {
                dispatcher.run_until_idle(MAX_TURNS);
                deadline
                    .saturating_duration_since(Instant::now())
                    .min(POLL_INTERVAL)
            }
            None => deadline.saturating_duration_since(Instant::now()),
        };
        match receiver.recv_timeout(slice) {
            Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => continue,
            other => return other,
        }
    }
}

/// A synthetic actor recording every message it receives
pub struct TestProbe<M: Message> {
    actor: ActorRef<M>,
    receiver: Receiver<M>,
    driver: Option<Arc<ManualDispatcher>>,
}

impl<M: Message> TestProbe<M> {
    pub(crate) fn new(
        actor: ActorRef<M>,
        receiver: Receiver<M>,
        driver: Option<Arc<ManualDispatcher>>,
    ) -> Self {
        Self {
            actor,
            receiver,
            driver,
        }
    }

    /// Reference to hand to the actors under test
    pub fn actor_ref(&self) -> ActorRef<M> {
        self.actor.clone()
    }

    fn next(&self, timeout: Duration, what: impl FnOnce() -> String) -> Result<M, TestKitError> {
        next_within(&self.receiver, self.driver.as_deref(), timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => TestKitError::Timeout {
                waited: timeout,
                what: what(),
            },
            RecvTimeoutError::Disconnected => {
                TestKitError::ProbeTerminated(self.actor.path().to_string())
            }
        })
    }

    /// Expect the next message to equal `expected`
    pub fn expect_message(&self, expected: M, timeout: Duration) -> Result<M, TestKitError>
    where
        M: PartialEq,
    {
        let message = self.next(timeout, || format!("{:?}", expected))?;
        if message == expected {
            Ok(message)
        } else {
            Err(TestKitError::Unexpected(format!(
                "{:?}, expected {:?}",
                message, expected
            )))
        }
    }

    /// Expect the next message to satisfy `predicate`
    pub fn expect_message_matching<P>(
        &self,
        predicate: P,
        timeout: Duration,
    ) -> Result<M, TestKitError>
    where
        P: FnOnce(&M) -> bool,
    {
        let message = self.next(timeout, || "a matching message".to_string())?;
        if predicate(&message) {
            Ok(message)
        } else {
            Err(TestKitError::Unexpected(format!("{:?}", message)))
        }
    }

    /// Receive exactly `count` messages
    pub fn receive_messages(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<M>, TestKitError> {
        let deadline = Instant::now() + timeout;
        let mut messages = Vec::with_capacity(count);
        while messages.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let received = messages.len();
            messages.push(self.next(remaining, || {
                format!("message {} of {}", received + 1, count)
            })?);
        }
        Ok(messages)
    }

    /// Assert that nothing arrives for `within`
    pub fn expect_no_message(&self, within: Duration) -> Result<(), TestKitError> {
        match next_within(&self.receiver, self.driver.as_deref(), within) {
            Ok(message) => Err(TestKitError::NoMessageExpected(format!("{:?}", message))),
            Err(_) => Ok(()),
        }
    }

    /// Everything received so far, after driving the loop
    pub fn receive_all(&self) -> Vec<M> {
        if let Some(dispatcher) = &self.driver {
            dispatcher.run_until_idle(MAX_TURNS);
        }
        self.receiver.try_iter().collect()
    }
}

impl<M: Message> std::fmt::Debug for TestProbe<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestProbe")
            .field("actor", &self.actor)
            .field("queued", &self.receiver.len())
            .finish()
    }
}

/// Subscription to the system event stream
pub struct EventProbe {
    receiver: Receiver<SystemEvent>,
    driver: Option<Arc<ManualDispatcher>>,
}

impl EventProbe {
    pub(crate) fn new(
        receiver: Receiver<SystemEvent>,
        driver: Option<Arc<ManualDispatcher>>,
    ) -> Self {
        Self { receiver, driver }
    }

    /// Skip events until one satisfies `predicate`
    pub fn fish_for<P>(
        &self,
        mut predicate: P,
        timeout: Duration,
    ) -> Result<SystemEvent, TestKitError>
    where
        P: FnMut(&SystemEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match next_within(&self.receiver, self.driver.as_deref(), remaining) {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) => continue,
                Err(_) => {
                    return Err(TestKitError::Timeout {
                        waited: timeout,
                        what: "a matching system event".to_string(),
                    })
                }
            }
        }
    }

    /// Every event published so far, after driving the loop
    pub fn drain(&self) -> Vec<SystemEvent> {
        if let Some(dispatcher) = &self.driver {
            dispatcher.run_until_idle(MAX_TURNS);
        }
        self.receiver.try_iter().collect()
    }
}

//! The per-invocation actor context.
//!
//! A `Context` is handed to `Behavior::init` and `Behavior::receive`. It
//! gives access to the actor's own reference and the actor system, and it
//! buffers outbound messages: `tell` and `tell_self` only take effect if the
//! invocation returns `Ok`, and are delivered at the end of the turn once the
//! cell has been unlocked.

use kestrel_core::{ActorId, SystemError};
use std::sync::Arc;
use std::time::Duration;

use super::actor_ref::ActorRef;
use super::behavior::Behavior;
use super::mailbox::Message;
use super::system::{ActorSystem, SpawnOptions, SystemShared};
use crate::scheduler::TimerHandle;

pub(crate) type Effect = Box<dyn FnOnce() + Send>;

/// Access to the runtime from inside a behavior
pub struct Context<'a, M: Message> {
    myself: &'a ActorRef<M>,
    system: &'a Arc<SystemShared>,
    outbox: Vec<Effect>,
}

impl<'a, M: Message> Context<'a, M> {
    pub(crate) fn new(myself: &'a ActorRef<M>, system: &'a Arc<SystemShared>) -> Self {
        Self {
            myself,
            system,
            outbox: Vec::new(),
        }
    }

    /// Id of the running actor
    pub fn id(&self) -> ActorId {
        self.myself.id()
    }

    /// Path of the running actor
    pub fn path(&self) -> &str {
        self.myself.path()
    }

    /// Reference to the running actor
    pub fn myself(&self) -> ActorRef<M> {
        self.myself.clone()
    }

    /// Handle to the actor system
    pub fn system(&self) -> ActorSystem {
        ActorSystem::from_shared(Arc::clone(self.system))
    }

    /// Send `message` to `target` once this invocation succeeds
    pub fn tell<T: Message>(&mut self, target: &ActorRef<T>, message: T) {
        let target = target.clone();
        self.outbox.push(Box::new(move || {
            // Full mailboxes are already reported as dead letters
            let _ = target.tell(message);
        }));
    }

    /// Send `message` to this actor once this invocation succeeds
    pub fn tell_self(&mut self, message: M) {
        let myself = self.myself.clone();
        self.tell(&myself, message);
    }

    /// Spawn a child supervised by this actor
    pub fn spawn<B: Behavior>(
        &mut self,
        behavior: B,
        options: SpawnOptions,
    ) -> Result<ActorRef<B::Message>, SystemError> {
        self.system.spawn_actor(behavior, options, Some(self.id()))
    }

    /// Stop one of this actor's children
    pub fn stop<T: Message>(&mut self, child: &ActorRef<T>) -> Result<(), SystemError> {
        if !self.system.is_child(self.id(), child.id()) {
            return Err(SystemError::NotAChild {
                parent: self.id(),
                child: child.id(),
            });
        }
        self.system.request_stop(child.id());
        Ok(())
    }

    /// Receive `notification` when `target` terminates.
    ///
    /// If `target` is already gone the notification is sent right away.
    pub fn watch<T: Message>(&mut self, target: &ActorRef<T>, notification: M) {
        let myself = self.myself.clone();
        let watcher = Box::new(move |_terminated: ActorId| {
            let _ = myself.tell(notification);
        });
        if let Err(watcher) = self.system.add_watcher(target.id(), watcher) {
            let id = target.id();
            self.outbox.push(Box::new(move || watcher(id)));
        }
    }

    /// Ids of this actor's live children
    pub fn children(&self) -> Vec<ActorId> {
        self.system.children_of(self.id())
    }

    /// Deliver `message` to this actor after `delay`
    pub fn schedule_once(
        &mut self,
        delay: Duration,
        message: M,
    ) -> Result<TimerHandle, SystemError> {
        let myself = self.myself.clone();
        self.system.timer()?.schedule(delay, move || {
            let _ = myself.tell(message);
        })
    }

    /// Number of buffered outbound effects
    pub fn pending_effects(&self) -> usize {
        self.outbox.len()
    }

    /// The buffered sends, in the order they were issued
    pub(crate) fn into_effects(self) -> Vec<Effect> {
        self.outbox
    }
}

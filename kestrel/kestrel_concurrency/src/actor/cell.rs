//! Actor cells: the runtime side of an actor.
//!
//! A cell owns the behavior, the current state and the mailbox of one actor.
//! It is the `Runnable` handed to the dispatcher; each turn first drains
//! system messages, then processes up to `throughput` user messages.
//!
//! Failures (errors and panics from the behavior) never leave the cell. They
//! are turned into a supervision `Decision` and carried out here: restart in
//! place, stop, or escalate to the parent as a `ChildEscalated` system
//! message.

use kestrel_core::{ActorId, BehaviorError, SupervisionError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::actor_ref::{ActorRef, Deliver};
use super::behavior::{Behavior, Directive, Transition};
use super::context::{Context, Effect};
use super::dead_letter::{DeadLetter, DeadLetterOffice, DeadLetterReason};
use super::event::SystemEvent;
use super::mailbox::{Mailbox, MailboxConfig, Rejected};
use super::supervisor::{Decision, RestartStatistics, SupervisionStrategy};
use super::system::{ActorStatus, SystemShared};
use crate::scheduler::{panic_message, RunState, Runnable};
use crate::sync::{AtomicCounter, HighWaterMark};

/// Runtime messages, processed before any user message
#[derive(Debug)]
pub(crate) enum SystemMessage {
    /// Run `init` for the first time
    Create,
    /// Run `init` again after a delayed restart
    Recreate,
    /// Terminate the actor
    Stop,
    /// A child gave up; fail with its error
    ChildEscalated {
        child: ActorId,
        error: SupervisionError,
    },
}

/// Per-actor counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorStats {
    /// User messages handed to the behavior
    pub messages_processed: u64,
    /// Failed invocations (errors, panics, child escalations)
    pub failures: u64,
    /// Restarts performed
    pub restarts: u64,
    /// Largest number of turns ever observed running at once (1 when healthy)
    pub max_concurrent_turns: usize,
    /// User messages currently queued
    pub mailbox_len: usize,
}

/// Type-erased view of a cell used by the registry
pub(crate) trait ErasedCell: Send + Sync {
    /// Queue a system message; `false` if the mailbox is closed
    fn send_system(&self, message: SystemMessage) -> bool;

    /// Queued user and system messages
    fn pending_messages(&self) -> usize;

    fn stats(&self) -> ActorStats;
}

struct CellInner<B: Behavior> {
    behavior: B,
    state: Option<B::State>,
    restarts: RestartStatistics,
    // Sends and watch notifications of this turn, run once the lock is released
    effects: Vec<Effect>,
}

pub(crate) struct ActorCell<B: Behavior> {
    id: ActorId,
    path: Arc<str>,
    parent: Option<ActorId>,
    strategy: SupervisionStrategy,
    mailbox: Mailbox<B::Message>,
    inner: Mutex<CellInner<B>>,
    // Set until `init` succeeds, and during a restart backoff
    suspended: AtomicBool,
    terminated: AtomicBool,
    system: Weak<SystemShared>,
    myself: Weak<ActorCell<B>>,
    self_ref: ActorRef<B::Message>,
    dead_letters: Arc<DeadLetterOffice>,
    active_turns: AtomicUsize,
    max_concurrent_turns: HighWaterMark,
    processed: AtomicCounter,
    failures: AtomicCounter,
    restarts: AtomicCounter,
}

pub(crate) struct CellSetup {
    pub(crate) id: ActorId,
    pub(crate) path: Arc<str>,
    pub(crate) parent: Option<ActorId>,
    pub(crate) strategy: SupervisionStrategy,
    pub(crate) mailbox: MailboxConfig,
    pub(crate) system: Weak<SystemShared>,
    pub(crate) dead_letters: Arc<DeadLetterOffice>,
}

fn flatten<T>(result: std::thread::Result<Result<T, BehaviorError>>) -> Result<T, BehaviorError> {
    match result {
        Ok(result) => result,
        Err(payload) => Err(BehaviorError::Panicked(panic_message(&*payload))),
    }
}

impl<B: Behavior> ActorCell<B> {
    pub(crate) fn new(setup: CellSetup, behavior: B) -> Arc<Self> {
        Arc::new_cyclic(|myself: &Weak<Self>| {
            let target: Weak<dyn Deliver<B::Message>> = myself.clone();
            let self_ref = ActorRef::new(
                setup.id,
                Arc::clone(&setup.path),
                target,
                Arc::clone(&setup.dead_letters),
            );
            Self {
                id: setup.id,
                mailbox: Mailbox::new(setup.id, setup.mailbox),
                path: setup.path,
                parent: setup.parent,
                strategy: setup.strategy,
                inner: Mutex::new(CellInner {
                    behavior,
                    state: None,
                    restarts: RestartStatistics::new(),
                    effects: Vec::new(),
                }),
                suspended: AtomicBool::new(true),
                terminated: AtomicBool::new(false),
                system: setup.system,
                myself: myself.clone(),
                self_ref,
                dead_letters: setup.dead_letters,
                active_turns: AtomicUsize::new(0),
                max_concurrent_turns: HighWaterMark::new(),
                processed: AtomicCounter::default(),
                failures: AtomicCounter::default(),
                restarts: AtomicCounter::default(),
            }
        })
    }

    pub(crate) fn actor_ref(&self) -> ActorRef<B::Message> {
        self.self_ref.clone()
    }

    fn schedule(&self) {
        let cell = match self.myself.upgrade() {
            Some(cell) => cell,
            None => return,
        };
        let system = match self.system.upgrade() {
            Some(system) => system,
            None => return,
        };
        if let Err(e) = system.dispatcher.dispatch(cell) {
            debug!("Could not schedule {}: {}", self.path, e);
        }
    }

    fn process(&self, inner: &mut CellInner<B>, system: &Arc<SystemShared>, throughput: usize) {
        let mut handled = 0;
        while !self.terminated.load(Ordering::SeqCst) {
            if let Some(message) = self.mailbox.dequeue_system() {
                self.handle_system(inner, system, message);
                continue;
            }
            if self.suspended.load(Ordering::SeqCst) || handled >= throughput {
                break;
            }
            match self.mailbox.dequeue() {
                Some(message) => {
                    handled += 1;
                    self.handle_message(inner, system, message);
                }
                None => break,
            }
        }
    }

    fn handle_system(
        &self,
        inner: &mut CellInner<B>,
        system: &Arc<SystemShared>,
        message: SystemMessage,
    ) {
        match message {
            SystemMessage::Create => self.start(inner, system),
            SystemMessage::Recreate => {
                if self.suspended.load(Ordering::SeqCst) {
                    self.start(inner, system);
                }
            }
            SystemMessage::Stop => self.terminate(inner, system, ActorStatus::Stopped),
            SystemMessage::ChildEscalated { child, error } => {
                warn!("Actor {} received escalation from {}", self.path, child);
                self.fail(inner, system, BehaviorError::Supervision(error));
            }
        }
    }

    fn start(&self, inner: &mut CellInner<B>, system: &Arc<SystemShared>) {
        let mut ctx = Context::new(&self.self_ref, system);
        let behavior = &inner.behavior;
        let result = flatten(catch_unwind(AssertUnwindSafe(|| behavior.init(&mut ctx))));

        match result {
            Ok(state) => {
                inner.state = Some(state);
                self.suspended.store(false, Ordering::SeqCst);
                inner.effects.extend(ctx.into_effects());
                system.set_status(self.id, ActorStatus::Running);
                system.events.publish(SystemEvent::Started {
                    actor: self.id,
                    path: self.path.to_string(),
                });
                debug!("Actor {} started", self.path);
            }
            Err(error) => {
                drop(ctx);
                self.fail(inner, system, error);
            }
        }
    }

    fn handle_message(
        &self,
        inner: &mut CellInner<B>,
        system: &Arc<SystemShared>,
        message: B::Message,
    ) {
        let state = match inner.state.take() {
            Some(state) => state,
            None => {
                self.dead_letters.publish(DeadLetter::new(
                    self.id,
                    &message,
                    DeadLetterReason::Dropped,
                ));
                return;
            }
        };

        let mut ctx = Context::new(&self.self_ref, system);
        let behavior = &inner.behavior;
        let result = flatten(catch_unwind(AssertUnwindSafe(|| {
            behavior.receive(state, message, &mut ctx)
        })));
        self.processed.increment();

        match result {
            Ok(Transition { state, directive }) => {
                inner.state = Some(state);
                inner.effects.extend(ctx.into_effects());
                match directive {
                    Directive::Continue => {}
                    Directive::Stop => self.terminate(inner, system, ActorStatus::Stopped),
                    Directive::Restart(reason) => {
                        let decision = self.strategy.decide_requested(&mut inner.restarts);
                        self.apply(inner, system, decision, BehaviorError::Failed(reason));
                    }
                    Directive::Escalate(error) => {
                        self.record_failure(system, &error);
                        self.escalate(inner, system, error);
                    }
                }
            }
            Err(error) => {
                // A failed invocation emits nothing
                drop(ctx);
                self.fail(inner, system, error);
            }
        }
    }

    fn fail(&self, inner: &mut CellInner<B>, system: &Arc<SystemShared>, error: BehaviorError) {
        self.record_failure(system, &error);
        let decision = self.strategy.decide(&mut inner.restarts);
        self.apply(inner, system, decision, error);
    }

    fn record_failure(&self, system: &Arc<SystemShared>, error: &BehaviorError) {
        self.failures.increment();
        error!("Actor {} failed: {}", self.path, error);
        system.set_status(self.id, ActorStatus::Failed);
        system.events.publish(SystemEvent::Failed {
            actor: self.id,
            error: error.to_string(),
        });
    }

    fn apply(
        &self,
        inner: &mut CellInner<B>,
        system: &Arc<SystemShared>,
        decision: Decision,
        error: BehaviorError,
    ) {
        match decision {
            Decision::Restart { attempt, delay } => {
                self.restart(inner, system, attempt, delay, &error)
            }
            Decision::Stop => {
                info!("Stopping actor {} after failure", self.path);
                self.terminate(inner, system, ActorStatus::Stopped);
            }
            Decision::Escalate => self.escalate(inner, system, error),
            Decision::Exhausted { retries } => {
                let cause = SupervisionError::Exhausted {
                    actor: self.id,
                    retries,
                    cause: error.to_string(),
                };
                self.escalate(inner, system, BehaviorError::Supervision(cause));
            }
        }
    }

    fn restart(
        &self,
        inner: &mut CellInner<B>,
        system: &Arc<SystemShared>,
        attempt: u32,
        delay: Duration,
        reason: &BehaviorError,
    ) {
        let previous = inner.state.take();
        let behavior = &inner.behavior;
        let hook = catch_unwind(AssertUnwindSafe(|| behavior.pre_restart(previous, reason)));
        if let Err(payload) = hook {
            warn!(
                "pre_restart of {} panicked: {}",
                self.path,
                panic_message(&*payload)
            );
        }

        self.restarts.increment();
        self.suspended.store(true, Ordering::SeqCst);
        system.stop_children(self.id);
        system.set_status(self.id, ActorStatus::Restarting);
        system.events.publish(SystemEvent::Restarted {
            actor: self.id,
            attempt,
        });
        info!(
            "Restarting actor {} (attempt {}, delay {:?})",
            self.path, attempt, delay
        );

        if delay.is_zero() {
            self.recreate();
            return;
        }

        let cell = Weak::clone(&self.myself);
        let scheduled = system.timer().and_then(|timer| {
            timer.schedule(delay, move || {
                if let Some(cell) = cell.upgrade() {
                    cell.send_system(SystemMessage::Recreate);
                }
            })
        });
        if let Err(e) = scheduled {
            warn!("Cannot delay restart of {}: {}", self.path, e);
            self.recreate();
        }
    }

    // `init` runs from the system queue, so retries never nest on the stack
    fn recreate(&self) {
        if self.mailbox.enqueue_system(SystemMessage::Recreate) {
            self.schedule();
        }
    }

    fn escalate(&self, inner: &mut CellInner<B>, system: &Arc<SystemShared>, error: BehaviorError) {
        let cause = match error {
            BehaviorError::Supervision(SupervisionError::Exhausted {
                actor,
                retries,
                cause,
            }) if actor == self.id => SupervisionError::Exhausted {
                actor,
                retries,
                cause,
            },
            other => SupervisionError::Escalated {
                child: self.id,
                cause: other.to_string(),
            },
        };

        error!("Actor {} escalates: {}", self.path, cause);
        system.events.publish(SystemEvent::Escalated {
            actor: self.id,
            parent: self.parent,
            error: cause.clone(),
        });
        self.terminate(inner, system, ActorStatus::Escalated);

        match self.parent {
            Some(parent) => {
                let message = SystemMessage::ChildEscalated {
                    child: self.id,
                    error: cause,
                };
                if !system.send_system(parent, message) {
                    warn!(
                        "Parent {} of {} is gone; escalation dropped",
                        parent, self.path
                    );
                }
            }
            None => system.record_root_failure(self.id, &self.path, cause),
        }
    }

    fn terminate(&self, inner: &mut CellInner<B>, system: &Arc<SystemShared>, status: ActorStatus) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        system.set_status(self.id, ActorStatus::Stopping);
        system.stop_children(self.id);

        let state = inner.state.take();
        let behavior = &inner.behavior;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| behavior.on_stop(state))) {
            warn!(
                "on_stop of {} panicked: {}",
                self.path,
                panic_message(&*payload)
            );
        }

        for message in self.mailbox.close() {
            self.dead_letters.publish(DeadLetter::new(
                self.id,
                &message,
                DeadLetterReason::Stopped,
            ));
        }

        let watchers = system.remove_actor(self.id, status);
        system.events.publish(SystemEvent::Terminated {
            actor: self.id,
            path: self.path.to_string(),
            status,
        });
        debug!("Actor {} terminated ({:?})", self.path, status);

        let id = self.id;
        for watcher in watchers {
            inner.effects.push(Box::new(move || watcher(id)));
        }
    }
}

impl<B: Behavior> Runnable for ActorCell<B> {
    fn run(&self, throughput: usize) -> RunState {
        let active = self.active_turns.fetch_add(1, Ordering::SeqCst) + 1;
        if self.max_concurrent_turns.record(active) && active > 1 {
            error!("Actor {} is running {} turns at once", self.path, active);
        }

        let system = self.system.upgrade();
        if let Some(system) = &system {
            let effects = {
                let mut inner = self.inner.lock();
                self.process(&mut inner, system, throughput);
                std::mem::take(&mut inner.effects)
            };
            // The mailbox is still claimed, so sends keep their order across turns
            for effect in effects {
                effect();
            }
        }
        self.active_turns.fetch_sub(1, Ordering::SeqCst);

        // Without a system the mailbox stays claimed and is never run again
        if system.is_none() {
            return RunState::Idle;
        }
        if self.mailbox.release(!self.suspended.load(Ordering::SeqCst)) {
            RunState::Pending
        } else {
            RunState::Idle
        }
    }

    fn describe(&self) -> String {
        self.path.to_string()
    }
}

impl<B: Behavior> ErasedCell for ActorCell<B> {
    fn send_system(&self, message: SystemMessage) -> bool {
        if self.mailbox.is_closed() {
            return false;
        }
        if self.mailbox.enqueue_system(message) {
            self.schedule();
        }
        true
    }

    fn pending_messages(&self) -> usize {
        self.mailbox.pending()
    }

    fn stats(&self) -> ActorStats {
        ActorStats {
            messages_processed: self.processed.get(),
            failures: self.failures.get(),
            restarts: self.restarts.get(),
            max_concurrent_turns: self.max_concurrent_turns.get(),
            mailbox_len: self.mailbox.len(),
        }
    }
}

impl<B: Behavior> Deliver<B::Message> for ActorCell<B> {
    fn deliver(&self, message: B::Message) -> Result<(), Rejected<B::Message>> {
        let enqueued = self.mailbox.enqueue(message)?;
        if let Some(displaced) = enqueued.displaced {
            self.dead_letters.publish(DeadLetter::new(
                self.id,
                &displaced,
                DeadLetterReason::Dropped,
            ));
        }
        if enqueued.schedule {
            self.schedule();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.mailbox.is_closed()
    }
}

//! Actor system for managing actor lifecycles and interactions.
//!
//! The `ActorSystem` owns the dispatcher, the timer, the dead-letter office
//! and the registry of live actors. The registry only stores tree metadata
//! (path, parent, children, status) and a type-erased handle to each cell;
//! actor state never leaves its cell.

use crossbeam_channel::{unbounded, Receiver};
use kestrel_core::{ActorId, MailboxError, SupervisionError, SystemError};
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::actor_ref::ActorRef;
use super::behavior::Behavior;
use super::cell::{ActorCell, ActorStats, CellSetup, ErasedCell, SystemMessage};
use super::dead_letter::{DeadLetter, DeadLetterOffice};
use super::event::{EventStream, RootFailure, SystemEvent};
use super::mailbox::{MailboxConfig, Message};
use super::supervisor::SupervisionStrategy;
use crate::config::RuntimeConfig;
use crate::scheduler::{Dispatcher, DispatcherStats, ThreadPoolDispatcher, Timer};

/// Status of an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorStatus {
    /// Spawned, `init` has not completed yet
    Starting,
    /// Actor is running normally
    Running,
    /// The last invocation failed; a decision is being applied
    Failed,
    /// Waiting for (or running) `init` after a failure
    Restarting,
    /// Actor is stopping
    Stopping,
    /// Actor has stopped
    Stopped,
    /// Actor terminated by escalating a failure to its parent
    Escalated,
}

impl ActorStatus {
    /// Whether the actor has terminated
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Escalated)
    }
}

/// Options for spawning an actor
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Name, unique among its siblings; generated when `None`
    pub name: Option<String>,
    /// Mailbox settings; the system default when `None`
    pub mailbox: Option<MailboxConfig>,
    /// How the parent handles this actor's failures; the system default when `None`
    pub strategy: Option<SupervisionStrategy>,
}

impl SpawnOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with just a name
    pub fn named(name: impl Into<String>) -> Self {
        Self::new().with_name(name)
    }

    /// Set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the mailbox configuration
    pub fn with_mailbox(mut self, mailbox: MailboxConfig) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    /// Set the supervision strategy
    pub fn with_strategy(mut self, strategy: SupervisionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Metadata about a live actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorInfo {
    /// The actor
    pub id: ActorId,
    /// Its path
    pub path: String,
    /// Its supervisor, `None` for top-level actors
    pub parent: Option<ActorId>,
    /// Its live children
    pub children: Vec<ActorId>,
    /// Current status
    pub status: ActorStatus,
    /// Type name of the behavior
    pub actor_type: &'static str,
}

pub(crate) type Watcher = Box<dyn FnOnce(ActorId) + Send>;

struct Node {
    path: String,
    parent: Option<ActorId>,
    children: Vec<ActorId>,
    status: ActorStatus,
    actor_type: &'static str,
    cell: Arc<dyn ErasedCell>,
    watchers: Vec<Watcher>,
}

#[derive(Default)]
struct Registry {
    nodes: HashMap<ActorId, Node>,
    paths: HashMap<String, ActorId>,
    // Final status of the most recently terminated actors
    finished: HashMap<ActorId, ActorStatus>,
    finished_order: VecDeque<ActorId>,
}

impl Registry {
    fn record_finished(&mut self, id: ActorId, status: ActorStatus, limit: usize) {
        if self.finished.insert(id, status).is_none() {
            self.finished_order.push_back(id);
        }
        while self.finished_order.len() > limit {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }
}

/// State shared by every handle to one actor system
pub(crate) struct SystemShared {
    name: String,
    config: RuntimeConfig,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    timer: OnceCell<Timer>,
    registry: Mutex<Registry>,
    // Signalled whenever an actor is removed
    drained: Condvar,
    pub(crate) dead_letters: Arc<DeadLetterOffice>,
    pub(crate) events: Arc<EventStream>,
    root_failures: Mutex<Vec<RootFailure>>,
    shutting_down: AtomicBool,
    next_name: AtomicU64,
}

impl SystemShared {
    pub(crate) fn spawn_actor<B: Behavior>(
        self: &Arc<Self>,
        behavior: B,
        options: SpawnOptions,
        parent: Option<ActorId>,
    ) -> Result<ActorRef<B::Message>, SystemError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SystemError::ShuttingDown);
        }

        let mailbox = options
            .mailbox
            .unwrap_or_else(|| self.config.mailbox.clone());
        if mailbox.capacity == Some(0) {
            return Err(SystemError::InvalidArgument(
                "mailbox capacity cannot be zero".to_string(),
            ));
        }

        let id = ActorId::new();
        let name = match options.name {
            Some(name) => name,
            None => format!("${}", self.next_name.fetch_add(1, Ordering::Relaxed)),
        };

        let mut registry = self.registry.lock();
        let parent_path = match parent {
            Some(parent) => match registry.nodes.get(&parent) {
                Some(node) => node.path.clone(),
                None => return Err(SystemError::ActorNotFound(parent)),
            },
            None => "/user".to_string(),
        };
        let path = format!("{}/{}", parent_path, name);
        if registry.paths.contains_key(&path) {
            return Err(SystemError::NameTaken(path));
        }

        let cell = ActorCell::new(
            CellSetup {
                id,
                path: Arc::from(path.as_str()),
                parent,
                strategy: options
                    .strategy
                    .unwrap_or_else(|| self.config.supervision.clone()),
                mailbox,
                system: Arc::downgrade(self),
                dead_letters: Arc::clone(&self.dead_letters),
            },
            behavior,
        );
        let actor_ref = cell.actor_ref();

        registry.nodes.insert(
            id,
            Node {
                path: path.clone(),
                parent,
                children: Vec::new(),
                status: ActorStatus::Starting,
                actor_type: std::any::type_name::<B>(),
                cell: cell.clone(),
                watchers: Vec::new(),
            },
        );
        registry.paths.insert(path.clone(), id);
        if let Some(parent) = parent {
            if let Some(node) = registry.nodes.get_mut(&parent) {
                node.children.push(id);
            }
        }
        drop(registry);

        debug!("Spawned actor {} ({})", path, id);
        cell.send_system(SystemMessage::Create);
        Ok(actor_ref)
    }

    /// Ask an actor to stop; its name is released immediately
    pub(crate) fn request_stop(&self, id: ActorId) -> bool {
        let cell = {
            let mut registry = self.registry.lock();
            let (path, cell) = match registry.nodes.get_mut(&id) {
                Some(node) => {
                    node.status = ActorStatus::Stopping;
                    (node.path.clone(), Arc::clone(&node.cell))
                }
                None => return false,
            };
            if registry.paths.get(&path) == Some(&id) {
                registry.paths.remove(&path);
            }
            cell
        };
        cell.send_system(SystemMessage::Stop);
        true
    }

    pub(crate) fn stop_children(&self, id: ActorId) {
        for child in self.children_of(id) {
            self.request_stop(child);
        }
    }

    pub(crate) fn children_of(&self, id: ActorId) -> Vec<ActorId> {
        self.registry
            .lock()
            .nodes
            .get(&id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    pub(crate) fn is_child(&self, parent: ActorId, child: ActorId) -> bool {
        self.registry
            .lock()
            .nodes
            .get(&child)
            .map(|node| node.parent == Some(parent))
            .unwrap_or(false)
    }

    /// Register a termination callback; handed back if `target` is gone
    pub(crate) fn add_watcher(&self, target: ActorId, watcher: Watcher) -> Result<(), Watcher> {
        match self.registry.lock().nodes.get_mut(&target) {
            Some(node) => {
                node.watchers.push(watcher);
                Ok(())
            }
            None => Err(watcher),
        }
    }

    pub(crate) fn send_system(&self, id: ActorId, message: SystemMessage) -> bool {
        let cell = match self.registry.lock().nodes.get(&id) {
            Some(node) => Arc::clone(&node.cell),
            None => return false,
        };
        cell.send_system(message)
    }

    /// Update a live actor's status. A stop request is never overridden.
    pub(crate) fn set_status(&self, id: ActorId, status: ActorStatus) {
        if let Some(node) = self.registry.lock().nodes.get_mut(&id) {
            if node.status != ActorStatus::Stopping {
                node.status = status;
            }
        }
    }

    /// Remove a terminated actor, returning its watchers
    pub(crate) fn remove_actor(&self, id: ActorId, status: ActorStatus) -> Vec<Watcher> {
        let mut registry = self.registry.lock();
        let node = match registry.nodes.remove(&id) {
            Some(node) => node,
            None => return Vec::new(),
        };
        if registry.paths.get(&node.path) == Some(&id) {
            registry.paths.remove(&node.path);
        }
        if let Some(parent) = node.parent {
            if let Some(parent) = registry.nodes.get_mut(&parent) {
                parent.children.retain(|child| *child != id);
            }
        }
        registry.record_finished(id, status, self.config.terminated_history.max(1));
        drop(registry);

        self.drained.notify_all();
        node.watchers
    }

    pub(crate) fn record_root_failure(&self, actor: ActorId, path: &str, error: SupervisionError) {
        error!("Root failure in {}: {}", path, error);
        let failure = RootFailure {
            actor,
            path: path.to_string(),
            error,
            timestamp: chrono::Utc::now(),
        };
        self.root_failures.lock().push(failure.clone());
        self.events.publish(SystemEvent::RootFailure(failure));
    }

    pub(crate) fn timer(&self) -> Result<&Timer, SystemError> {
        self.timer.get_or_try_init(|| Timer::new(&self.name))
    }
}

/// The central actor system that manages actors
#[derive(Clone)]
pub struct ActorSystem {
    shared: Arc<SystemShared>,
}

impl ActorSystem {
    /// Create a system with the default configuration
    pub fn new(name: &str) -> Result<Self, SystemError> {
        Self::with_config(name, RuntimeConfig::default())
    }

    /// Create a system running on a worker pool built from `config`
    pub fn with_config(name: &str, config: RuntimeConfig) -> Result<Self, SystemError> {
        let dispatcher = ThreadPoolDispatcher::with_config(config.dispatcher.clone())?;
        Ok(Self::with_dispatcher(name, config, Arc::new(dispatcher)))
    }

    /// Create a system on an existing dispatcher
    pub fn with_dispatcher(
        name: &str,
        config: RuntimeConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        info!("Creating actor system {}", name);
        let events = Arc::new(EventStream::new());
        let dead_letters = Arc::new(DeadLetterOffice::new(
            config.dead_letter_capacity,
            Arc::clone(&events),
        ));
        Self {
            shared: Arc::new(SystemShared {
                name: name.to_string(),
                config,
                dispatcher,
                timer: OnceCell::new(),
                registry: Mutex::new(Registry::default()),
                drained: Condvar::new(),
                dead_letters,
                events,
                root_failures: Mutex::new(Vec::new()),
                shutting_down: AtomicBool::new(false),
                next_name: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<SystemShared>) -> Self {
        Self { shared }
    }

    /// Name of the system
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Configuration the system was built with
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Spawn a top-level actor with default options
    pub fn spawn<B: Behavior>(&self, behavior: B) -> Result<ActorRef<B::Message>, SystemError> {
        self.spawn_with(behavior, SpawnOptions::default())
    }

    /// Spawn a top-level actor
    pub fn spawn_with<B: Behavior>(
        &self,
        behavior: B,
        options: SpawnOptions,
    ) -> Result<ActorRef<B::Message>, SystemError> {
        self.shared.spawn_actor(behavior, options, None)
    }

    /// Send a message to an actor
    pub fn tell<M: Message>(&self, target: &ActorRef<M>, message: M) -> Result<(), MailboxError> {
        target.tell(message)
    }

    /// Stop an actor and, with it, all of its descendants
    pub fn stop<M: Message>(&self, target: &ActorRef<M>) -> Result<(), SystemError> {
        if self.shared.request_stop(target.id()) {
            Ok(())
        } else {
            Err(SystemError::ActorNotFound(target.id()))
        }
    }

    /// Current status of an actor.
    ///
    /// Terminated actors keep reporting their final status until
    /// `terminated_history` newer terminations have pushed them out.
    pub fn status(&self, id: ActorId) -> Option<ActorStatus> {
        let registry = self.shared.registry.lock();
        match registry.nodes.get(&id) {
            Some(node) => Some(node.status),
            None => registry.finished.get(&id).copied(),
        }
    }

    /// Metadata about a live actor
    pub fn actor_info(&self, id: ActorId) -> Option<ActorInfo> {
        self.shared
            .registry
            .lock()
            .nodes
            .get(&id)
            .map(|node| ActorInfo {
                id,
                path: node.path.clone(),
                parent: node.parent,
                children: node.children.clone(),
                status: node.status,
                actor_type: node.actor_type,
            })
    }

    /// Counters of a live actor
    pub fn actor_stats(&self, id: ActorId) -> Option<ActorStats> {
        let cell = self
            .shared
            .registry
            .lock()
            .nodes
            .get(&id)
            .map(|node| Arc::clone(&node.cell))?;
        Some(cell.stats())
    }

    /// Live children of an actor
    pub fn children(&self, id: ActorId) -> Vec<ActorId> {
        self.shared.children_of(id)
    }

    /// Id of the live actor at `path`
    pub fn lookup(&self, path: &str) -> Option<ActorId> {
        self.shared.registry.lock().paths.get(path).copied()
    }

    /// Number of live actors
    pub fn actor_count(&self) -> usize {
        self.shared.registry.lock().nodes.len()
    }

    /// Recent dead letters, oldest first
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.snapshot()
    }

    /// Number of dead letters ever recorded
    pub fn dead_letter_count(&self) -> u64 {
        self.shared.dead_letters.total()
    }

    /// Receive every system event published from now on
    pub fn subscribe(&self) -> Receiver<SystemEvent> {
        self.shared.events.subscribe()
    }

    /// Escalations that reached the top of the tree
    pub fn root_failures(&self) -> Vec<RootFailure> {
        self.shared.root_failures.lock().clone()
    }

    /// Receive the id of `target` once it terminates
    pub fn watch_termination<M: Message>(&self, target: &ActorRef<M>) -> Receiver<ActorId> {
        let (sender, receiver) = unbounded();
        let watcher: Watcher = Box::new(move |id| {
            let _ = sender.send(id);
        });
        if let Err(watcher) = self.shared.add_watcher(target.id(), watcher) {
            watcher(target.id());
        }
        receiver
    }

    /// `true` when every mailbox is empty and no turn is queued or running.
    ///
    /// Pending timers are not taken into account.
    pub fn is_idle(&self) -> bool {
        if !self.shared.dispatcher.is_idle() {
            return false;
        }
        let cells: Vec<_> = self
            .shared
            .registry
            .lock()
            .nodes
            .values()
            .map(|node| Arc::clone(&node.cell))
            .collect();
        cells.iter().all(|cell| cell.pending_messages() == 0) && self.shared.dispatcher.is_idle()
    }

    /// Block until `is_idle` holds
    pub fn await_idle(&self, timeout: Duration) -> Result<(), SystemError> {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return Err(SystemError::Timeout(timeout));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    /// Stop accepting new actors and stop every top-level actor
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down actor system {}", self.shared.name);

        let top_level: Vec<ActorId> = self
            .shared
            .registry
            .lock()
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(id, _)| *id)
            .collect();
        for id in top_level {
            self.shared.request_stop(id);
        }
    }

    /// Whether `shutdown` was called
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    /// Wait until every actor has terminated, then release the dispatcher
    /// and timer threads. Calls `shutdown` first if needed.
    ///
    /// The threads are released even when the wait times out.
    pub fn await_termination(&self, timeout: Duration) -> Result<(), SystemError> {
        self.shutdown();

        let deadline = Instant::now() + timeout;
        let mut result = Ok(());
        {
            let mut registry = self.shared.registry.lock();
            while !registry.nodes.is_empty() {
                if self
                    .shared
                    .drained
                    .wait_until(&mut registry, deadline)
                    .timed_out()
                {
                    if !registry.nodes.is_empty() {
                        warn!(
                            "{} actors still alive after {:?}",
                            registry.nodes.len(),
                            timeout
                        );
                        result = Err(SystemError::Timeout(timeout));
                    }
                    break;
                }
            }
        }

        self.shared.dispatcher.shutdown();
        if let Some(timer) = self.shared.timer.get() {
            timer.shutdown();
        }
        info!("Actor system {} terminated", self.shared.name);
        result
    }

    /// Turn statistics of the dispatcher
    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.shared.dispatcher.stats()
    }
}

impl std::fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorSystem")
            .field("name", &self.shared.name)
            .field("actors", &self.actor_count())
            .finish()
    }
}

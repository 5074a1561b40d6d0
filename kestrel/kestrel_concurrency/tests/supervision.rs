use kestrel_concurrency::actor::{
    from_fn, Backoff, DeadLetterReason, MailboxConfig, OverflowPolicy, SystemEvent, Transition,
};
use kestrel_concurrency::{
    ActorRef, ActorStatus, ActorSystem, Behavior, Context, ManualDispatcher, RuntimeConfig,
    SpawnOptions, SupervisionStrategy,
};
use kestrel_core::{BehaviorError, MailboxError, SupervisionError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
enum Work {
    Add(u32),
    Fail,
    Panic,
    Report(crossbeam_channel::Sender<u32>),
}

fn manual_system() -> (ActorSystem, Arc<ManualDispatcher>) {
    let dispatcher = Arc::new(ManualDispatcher::new(10));
    let system =
        ActorSystem::with_dispatcher("supervision", RuntimeConfig::default(), dispatcher.clone());
    (system, dispatcher)
}

fn worker() -> impl Behavior<Message = Work, State = u32> {
    from_fn(0u32, |total, msg: Work, _ctx| match msg {
        Work::Add(n) => Ok(Transition::next(total + n)),
        Work::Fail => Err(BehaviorError::failed("requested failure")),
        Work::Panic => panic!("worker panicked"),
        Work::Report(reply) => {
            let _ = reply.send(total);
            Ok(Transition::next(total))
        }
    })
}

fn report(dispatcher: &ManualDispatcher, actor: &ActorRef<Work>) -> u32 {
    let (tx, rx) = crossbeam_channel::unbounded();
    actor.tell(Work::Report(tx)).unwrap();
    dispatcher.run_until_idle(1000);
    rx.try_recv().unwrap()
}

#[test]
fn restart_resets_state() {
    let (system, dispatcher) = manual_system();
    let actor = system
        .spawn_with(
            worker(),
            SpawnOptions::named("w").with_strategy(SupervisionStrategy::restart(3)),
        )
        .unwrap();

    actor.tell(Work::Add(5)).unwrap();
    actor.tell(Work::Fail).unwrap();
    actor.tell(Work::Add(2)).unwrap();
    dispatcher.run_until_idle(1000);

    assert_eq!(report(&dispatcher, &actor), 2);
    let stats = system.actor_stats(actor.id()).unwrap();
    assert_eq!(stats.restarts, 1);
    assert_eq!(stats.failures, 1);
    assert_eq!(system.status(actor.id()), Some(ActorStatus::Running));
}

#[test]
fn panic_is_contained_and_restarts() {
    let (system, dispatcher) = manual_system();
    let events = system.subscribe();
    let actor = system.spawn(worker()).unwrap();

    actor.tell(Work::Add(1)).unwrap();
    actor.tell(Work::Panic).unwrap();
    dispatcher.run_until_idle(1000);

    assert_eq!(report(&dispatcher, &actor), 0);
    let failed = events.try_iter().find_map(|event| match event {
        SystemEvent::Failed { error, .. } => Some(error),
        _ => None,
    });
    assert_eq!(failed.as_deref(), Some("behavior panicked: worker panicked"));
}

#[test]
fn stop_strategy_stops_the_actor() {
    let (system, dispatcher) = manual_system();
    let actor = system
        .spawn_with(worker(), SpawnOptions::new().with_strategy(SupervisionStrategy::Stop))
        .unwrap();

    actor.tell(Work::Fail).unwrap();
    actor.tell(Work::Add(1)).unwrap();
    dispatcher.run_until_idle(1000);

    assert_eq!(system.status(actor.id()), Some(ActorStatus::Stopped));
    let letters = system.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].message, "Add(1)");
    assert_eq!(letters[0].reason, DeadLetterReason::Stopped);
}

#[test]
fn exhausted_child_escalates_to_parent() {
    let (system, dispatcher) = manual_system();
    let (child_tx, child_rx) = crossbeam_channel::unbounded();

    #[derive(Debug)]
    enum ParentMsg {
        Spawn,
    }

    let parent = system
        .spawn_with(
            from_fn((), move |state, msg: ParentMsg, ctx| match msg {
                ParentMsg::Spawn => {
                    let child = ctx
                        .spawn(
                            worker(),
                            SpawnOptions::named("child")
                                .with_strategy(SupervisionStrategy::restart(2)),
                        )
                        .map_err(BehaviorError::failed)?;
                    let _ = child_tx.send(child);
                    Ok(Transition::next(state))
                }
            }),
            SpawnOptions::named("parent").with_strategy(SupervisionStrategy::Stop),
        )
        .unwrap();

    parent.tell(ParentMsg::Spawn).unwrap();
    dispatcher.run_until_idle(1000);
    let child = child_rx.try_recv().unwrap();
    assert_eq!(child.path(), "/user/parent/child");
    assert_eq!(system.children(parent.id()), vec![child.id()]);

    let events = system.subscribe();
    for _ in 0..3 {
        child.tell(Work::Fail).unwrap();
    }
    dispatcher.run_until_idle(1000);

    let restarts = events
        .try_iter()
        .filter(|event| {
            matches!(event, SystemEvent::Restarted { actor, .. } if *actor == child.id())
        })
        .count();
    assert_eq!(restarts, 2);
    assert_eq!(system.status(child.id()), Some(ActorStatus::Escalated));
    // The parent's Stop strategy handled the escalation
    assert_eq!(system.status(parent.id()), Some(ActorStatus::Stopped));
    assert!(system.root_failures().is_empty());
}

#[test]
fn escalation_without_parent_is_a_root_failure() {
    let (system, dispatcher) = manual_system();
    let actor = system
        .spawn_with(
            worker(),
            SpawnOptions::named("top").with_strategy(SupervisionStrategy::Escalate),
        )
        .unwrap();

    actor.tell(Work::Fail).unwrap();
    dispatcher.run_until_idle(1000);

    let failures = system.root_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].actor, actor.id());
    assert_eq!(failures[0].path, "/user/top");
    assert!(matches!(
        failures[0].error,
        SupervisionError::Escalated { child, .. } if child == actor.id()
    ));
    assert_eq!(system.status(actor.id()), Some(ActorStatus::Escalated));
}

#[test]
fn stopping_parent_stops_children() {
    let (system, dispatcher) = manual_system();

    let parent = system
        .spawn_with(
            from_fn(0u8, |state, _msg: (), ctx| {
                for name in ["a", "b"] {
                    ctx.spawn(worker(), SpawnOptions::named(name))
                        .map_err(BehaviorError::failed)?;
                }
                Ok(Transition::next(state))
            }),
            SpawnOptions::named("p"),
        )
        .unwrap();
    parent.tell(()).unwrap();
    dispatcher.run_until_idle(1000);
    assert_eq!(system.actor_count(), 3);

    system.stop(&parent).unwrap();
    dispatcher.run_until_idle(1000);

    assert_eq!(system.actor_count(), 0);
    assert!(system.lookup("/user/p/a").is_none());
}

#[test]
fn reject_policy_reports_full_to_sender() {
    let (system, dispatcher) = manual_system();
    let actor = system
        .spawn_with(
            worker(),
            SpawnOptions::new().with_mailbox(MailboxConfig::bounded(2, OverflowPolicy::Reject)),
        )
        .unwrap();
    dispatcher.run_until_idle(1000);

    assert!(actor.tell(Work::Add(1)).is_ok());
    assert!(actor.tell(Work::Add(2)).is_ok());
    assert!(matches!(
        actor.tell(Work::Add(3)),
        Err(MailboxError::Full { capacity: 2, .. })
    ));
    assert_eq!(system.dead_letters()[0].reason, DeadLetterReason::MailboxFull);

    dispatcher.run_until_idle(1000);
    assert_eq!(report(&dispatcher, &actor), 3);
}

#[test]
fn drop_oldest_dead_letters_displaced_message() {
    let (system, dispatcher) = manual_system();
    let actor = system
        .spawn_with(
            worker(),
            SpawnOptions::new().with_mailbox(MailboxConfig::bounded(2, OverflowPolicy::DropOldest)),
        )
        .unwrap();
    dispatcher.run_until_idle(1000);

    for n in [1, 2, 4] {
        actor.tell(Work::Add(n)).unwrap();
    }
    let letters = system.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].message, "Add(1)");
    assert_eq!(letters[0].reason, DeadLetterReason::Dropped);

    dispatcher.run_until_idle(1000);
    assert_eq!(report(&dispatcher, &actor), 6);
}

#[test]
fn backoff_delays_the_restart() {
    let (system, dispatcher) = manual_system();
    let actor = system
        .spawn_with(
            worker(),
            SpawnOptions::new().with_strategy(SupervisionStrategy::restart_with_backoff(
                3,
                Backoff::exponential(50, 500),
            )),
        )
        .unwrap();

    actor.tell(Work::Fail).unwrap();
    actor.tell(Work::Add(7)).unwrap();
    let failed_at = Instant::now();
    dispatcher.run_until_idle(1000);

    // Suspended: the queued message waits for the timer
    assert_eq!(system.status(actor.id()), Some(ActorStatus::Restarting));
    assert_eq!(system.actor_stats(actor.id()).unwrap().mailbox_len, 1);

    let deadline = Instant::now() + Duration::from_secs(5);
    while system.status(actor.id()) != Some(ActorStatus::Running) && Instant::now() < deadline {
        dispatcher.run_until_idle(1000);
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(failed_at.elapsed() >= Duration::from_millis(50));
    assert_eq!(report(&dispatcher, &actor), 7);
}

#[test]
fn restart_directive_reinitialises_state() {
    let (system, dispatcher) = manual_system();
    let (tx, rx) = crossbeam_channel::unbounded();
    let actor = system
        .spawn(from_fn(10u32, move |state, msg: u32, _ctx| {
            let _ = tx.send(state);
            if msg == 0 {
                Ok(Transition::restart(state + 1, "reset"))
            } else {
                Ok(Transition::next(state + msg))
            }
        }))
        .unwrap();

    for msg in [5, 0, 1] {
        actor.tell(msg).unwrap();
    }
    dispatcher.run_until_idle(1000);

    let seen: Vec<u32> = rx.try_iter().collect();
    assert_eq!(seen, vec![10, 15, 10]);
    assert_eq!(system.actor_stats(actor.id()).unwrap().failures, 0);
}

#[test]
fn failed_invocation_emits_nothing() {
    let (system, dispatcher) = manual_system();
    let (tx, rx) = crossbeam_channel::unbounded();
    let sink = system
        .spawn(from_fn((), move |state, msg: &'static str, _ctx| {
            let _ = tx.send(msg);
            Ok(Transition::next(state))
        }))
        .unwrap();

    let sender = system
        .spawn(from_fn((), move |state, fail: bool, ctx| {
            ctx.tell(&sink, if fail { "from failed" } else { "from ok" });
            if fail {
                Err(BehaviorError::failed("after tell"))
            } else {
                Ok(Transition::next(state))
            }
        }))
        .unwrap();

    sender.tell(true).unwrap();
    sender.tell(false).unwrap();
    dispatcher.run_until_idle(1000);

    let received: Vec<_> = rx.try_iter().collect();
    assert_eq!(received, vec!["from ok"]);
}

/// A worker whose `init` never succeeds
struct BrokenInit {
    attempts: Arc<AtomicU32>,
    panics: bool,
}

impl BrokenInit {
    fn new(panics: bool) -> (Self, Arc<AtomicU32>) {
        let attempts = Arc::new(AtomicU32::new(0));
        let behavior = Self {
            attempts: Arc::clone(&attempts),
            panics,
        };
        (behavior, attempts)
    }
}

impl Behavior for BrokenInit {
    type Message = Work;
    type State = u32;

    fn init(&self, _ctx: &mut Context<'_, Work>) -> Result<u32, BehaviorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("init panicked");
        }
        Err(BehaviorError::failed("init refused"))
    }

    fn receive(
        &self,
        total: u32,
        _message: Work,
        _ctx: &mut Context<'_, Work>,
    ) -> Result<Transition<u32>, BehaviorError> {
        Ok(Transition::next(total))
    }
}

#[test]
fn failing_init_retries_until_exhausted_then_escalates() {
    let (system, dispatcher) = manual_system();
    let events = system.subscribe();
    let (behavior, attempts) = BrokenInit::new(false);
    let actor = system
        .spawn_with(
            behavior,
            SpawnOptions::named("broken").with_strategy(SupervisionStrategy::restart(3)),
        )
        .unwrap();
    dispatcher.run_until_idle(1000);

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    let events: Vec<_> = events.try_iter().collect();
    let restarts = events
        .iter()
        .filter(|event| matches!(event, SystemEvent::Restarted { .. }))
        .count();
    let failures = events
        .iter()
        .filter(|event| matches!(event, SystemEvent::Failed { .. }))
        .count();
    assert_eq!(restarts, 3);
    assert_eq!(failures, 4);
    assert!(!events
        .iter()
        .any(|event| matches!(event, SystemEvent::Started { .. })));

    assert_eq!(system.status(actor.id()), Some(ActorStatus::Escalated));
    let root = system.root_failures();
    assert_eq!(root.len(), 1);
    assert!(matches!(
        &root[0].error,
        SupervisionError::Exhausted { actor: id, retries: 3, cause }
            if *id == actor.id() && cause == "behavior failed: init refused"
    ));
}

#[test]
fn failing_init_with_a_large_restart_budget_does_not_nest() {
    let (system, dispatcher) = manual_system();
    let (behavior, attempts) = BrokenInit::new(false);
    let actor = system
        .spawn_with(
            behavior,
            SpawnOptions::named("b").with_strategy(SupervisionStrategy::restart(100_000)),
        )
        .unwrap();
    dispatcher.run_until_idle(10);

    assert_eq!(attempts.load(Ordering::SeqCst), 100_001);
    assert_eq!(system.status(actor.id()), Some(ActorStatus::Escalated));
    assert!(matches!(
        system.root_failures()[0].error,
        SupervisionError::Exhausted {
            retries: 100_000,
            ..
        }
    ));
}

#[test]
fn failing_init_under_stop_strategy_stops_the_actor() {
    let (system, dispatcher) = manual_system();
    let (behavior, attempts) = BrokenInit::new(false);
    let actor = system
        .spawn_with(
            behavior,
            SpawnOptions::new().with_strategy(SupervisionStrategy::Stop),
        )
        .unwrap();
    actor.tell(Work::Add(1)).unwrap();
    dispatcher.run_until_idle(1000);

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(system.status(actor.id()), Some(ActorStatus::Stopped));
    assert!(system.root_failures().is_empty());
    let letters = system.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].message, "Add(1)");
    assert_eq!(letters[0].reason, DeadLetterReason::Stopped);
}

#[test]
fn panic_in_init_is_contained() {
    let (system, dispatcher) = manual_system();
    let events = system.subscribe();
    let (behavior, attempts) = BrokenInit::new(true);
    let actor = system
        .spawn_with(
            behavior,
            SpawnOptions::new().with_strategy(SupervisionStrategy::restart(1)),
        )
        .unwrap();
    dispatcher.run_until_idle(1000);

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let failed: Vec<_> = events
        .try_iter()
        .filter_map(|event| match event {
            SystemEvent::Failed { error, .. } => Some(error),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 2);
    assert!(failed
        .iter()
        .all(|error| error == "behavior panicked: init panicked"));
    assert_eq!(system.status(actor.id()), Some(ActorStatus::Escalated));
}

fn lifecycle(events: &crossbeam_channel::Receiver<SystemEvent>) -> Vec<&'static str> {
    events
        .try_iter()
        .filter_map(|event| match event {
            SystemEvent::Failed { .. } => Some("failed"),
            SystemEvent::Escalated { .. } => Some("escalated"),
            SystemEvent::Terminated { .. } => Some("terminated"),
            _ => None,
        })
        .collect()
}

#[test]
fn escalate_directive_reports_the_failure_like_an_error() {
    let (system, dispatcher) = manual_system();

    let by_directive = system
        .spawn(from_fn((), |state, _msg: (), _ctx| {
            Ok(Transition::escalate(state, BehaviorError::failed("give up")))
        }))
        .unwrap();
    dispatcher.run_until_idle(1000);
    let events = system.subscribe();
    by_directive.tell(()).unwrap();
    dispatcher.run_until_idle(1000);
    let directive_events = lifecycle(&events);

    let by_error = system
        .spawn_with(
            from_fn((), |_state, _msg: (), _ctx| {
                Err::<Transition<()>, _>(BehaviorError::failed("give up"))
            }),
            SpawnOptions::new().with_strategy(SupervisionStrategy::Escalate),
        )
        .unwrap();
    dispatcher.run_until_idle(1000);
    let _ = lifecycle(&events);
    by_error.tell(()).unwrap();
    dispatcher.run_until_idle(1000);
    let error_events = lifecycle(&events);

    assert_eq!(directive_events, vec!["failed", "escalated", "terminated"]);
    assert_eq!(directive_events, error_events);
    assert_eq!(system.root_failures().len(), 2);
}

#[derive(Debug)]
enum SinkMsg {
    Watch(ActorRef<()>),
    Note(&'static str),
}

#[test]
fn sends_arrive_before_the_termination_notice() {
    let (system, dispatcher) = manual_system();
    let (tx, rx) = crossbeam_channel::unbounded();
    let sink = system
        .spawn(from_fn((), move |state, msg: SinkMsg, ctx| {
            match msg {
                SinkMsg::Watch(target) => ctx.watch(&target, SinkMsg::Note("terminated")),
                SinkMsg::Note(note) => {
                    let _ = tx.send(note);
                }
            }
            Ok(Transition::next(state))
        }))
        .unwrap();

    let target = sink.clone();
    let leaving = system
        .spawn(from_fn((), move |state, _msg: (), ctx| {
            ctx.tell(&target, SinkMsg::Note("goodbye"));
            Ok(Transition::stop(state))
        }))
        .unwrap();
    sink.tell(SinkMsg::Watch(leaving.clone())).unwrap();
    dispatcher.run_until_idle(1000);

    leaving.tell(()).unwrap();
    dispatcher.run_until_idle(1000);

    let notes: Vec<_> = rx.try_iter().collect();
    assert_eq!(notes, vec!["goodbye", "terminated"]);
    assert_eq!(system.status(leaving.id()), Some(ActorStatus::Stopped));
}

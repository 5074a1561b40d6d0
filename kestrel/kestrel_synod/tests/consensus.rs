use kestrel_concurrency::scheduler::DispatcherConfig;
use kestrel_concurrency::{RuntimeConfig, SpawnOptions, SupervisionStrategy};
use kestrel_synod::{run, sweep, Coordinator, RunReport, SynodError, SynodParams, Trial};
use kestrel_testkit::TestKit;
use std::time::{Duration, Instant};

const RUN_TIMEOUT: Duration = Duration::from_secs(60);

fn config(workers: usize) -> RuntimeConfig {
    RuntimeConfig {
        dispatcher: DispatcherConfig {
            worker_threads: workers,
            throughput: 5,
            thread_name_prefix: "synod-worker".to_string(),
            collect_stats: false,
        },
        ..Default::default()
    }
}

fn assert_consistent(report: &RunReport) {
    let params = &report.params;
    assert!(report.agreed(), "no agreement: {:?}", report);
    let value = report.decided().unwrap();
    assert!(value <= 1);
    assert_eq!(report.deliveries().len(), params.expected_deliveries());
    assert!(report.deliveries().iter().all(|d| d.value == value));
    assert!((1..=params.n).contains(&report.leader));
    assert_eq!(report.faulty.len(), params.f);
    assert!(!report.faulty.contains(&report.leader));
}

#[test]
fn three_processes_agree() {
    let params = SynodParams::new(3, 0.0, 100).with_seed(1);
    let report = run(&params, &config(2), RUN_TIMEOUT).unwrap();
    assert_consistent(&report);
    assert_eq!(report.seed, 1);
}

#[test]
fn crashing_minority_does_not_break_agreement() {
    for seed in 1..=5 {
        let params = SynodParams::new(7, 0.1, 50).with_seed(seed);
        let report = run(&params, &config(4), RUN_TIMEOUT).unwrap();
        assert_consistent(&report);
    }
}

#[test]
fn certain_crashes_still_terminate() {
    let params = SynodParams::new(5, 1.0, 50).with_seed(9);
    let report = run(&params, &config(4), RUN_TIMEOUT).unwrap();
    assert_consistent(&report);
    // Every faulty process crashed, so only correct processes delivered
    assert!(report
        .deliveries()
        .iter()
        .all(|delivery| !report.faulty.contains(&delivery.from)));
}

#[test]
fn invalid_parameters_are_rejected() {
    let params = SynodParams::new(0, 0.0, 50);
    assert!(matches!(
        run(&params, &config(1), RUN_TIMEOUT),
        Err(SynodError::InvalidParams(_))
    ));
}

#[test]
fn sweep_runs_every_trial() {
    let trials = vec![
        Trial {
            params: SynodParams::new(3, 0.0, 50).with_seed(3),
            iteration: 0,
        },
        Trial {
            params: SynodParams::new(4, 0.5, 50).with_seed(4),
            iteration: 1,
        },
    ];
    let results = sweep(&trials, &config(2), RUN_TIMEOUT);
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].trial.label(), "4-1-50-50-1");
    for result in &results {
        assert_consistent(result.result.as_ref().unwrap());
    }
}

fn deterministic_run(seed: u64) -> RunReport {
    let kit = TestKit::new();
    let params = SynodParams::new(5, 0.1, 20).with_seed(seed);
    let (sender, receiver) = crossbeam_channel::bounded(1);
    kit.spawn_with(
        Coordinator::new(params, seed, sender),
        SpawnOptions::named("coordinator").with_strategy(SupervisionStrategy::Stop),
    )
    .unwrap();

    let deadline = Instant::now() + RUN_TIMEOUT;
    let report = loop {
        kit.settle(RUN_TIMEOUT).unwrap();
        if let Ok(report) = receiver.try_recv() {
            break report;
        }
        assert!(Instant::now() < deadline, "no report");
        std::thread::sleep(Duration::from_millis(1));
    };

    // The coordinator stops its remaining children once it has reported
    kit.settle(RUN_TIMEOUT).unwrap();
    assert_eq!(kit.system().actor_count(), 0);
    report
}

#[test]
fn manual_dispatch_reaches_agreement() {
    let first = deterministic_run(11);
    let second = deterministic_run(11);
    assert_consistent(&first);
    assert_consistent(&second);
    assert_eq!(first.leader, second.leader);
    assert_eq!(first.faulty, second.faulty);
}

//! Runs the consensus parameter sweep and prints one JSON report per line.
//!
//! ```text
//! cargo run --example synod_sweep -- [iterations] [runtime.toml]
//! ```

use anyhow::Context;
use kestrel_concurrency::RuntimeConfig;
use kestrel_core::init_logging;
use kestrel_synod::{sweep, SynodParams};
use std::path::PathBuf;
use std::time::Duration;

const RUN_TIMEOUT: Duration = Duration::from_secs(600);

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let iterations: usize = match args.next() {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("invalid iteration count {:?}", arg))?,
        None => 1,
    };
    let config_path = args.next().map(PathBuf::from);

    let config =
        RuntimeConfig::load(config_path.as_deref()).context("failed to load runtime config")?;
    init_logging(&config.logging).context("failed to initialise logging")?;

    let trials = SynodParams::grid(iterations);
    let mut failed = 0;
    for result in sweep(&trials, &config, RUN_TIMEOUT) {
        match result.result {
            Ok(report) => println!("{}", serde_json::to_string(&report)?),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {}", result.trial.label(), e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} runs failed", failed, trials.len());
    }
    Ok(())
}

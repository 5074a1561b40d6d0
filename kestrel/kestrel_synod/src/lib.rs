#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Kestrel Synod
//!
//! The Synod obstruction-free consensus algorithm as a Kestrel actor
//! application, plus the experiment harness that measures it.
//!
//! A run spawns `n` [`Process`] actors, a [`Gatherer`] and a [`Coordinator`].
//! Every process proposes a random bit; `f` of them are fault-prone and crash
//! with probability `a` after each message. After the leader timeout every
//! process except one stops retrying, which lets the remaining leader finish.
//!
//! ```no_run
//! use kestrel_concurrency::RuntimeConfig;
//! use kestrel_synod::{run, SynodParams};
//! use std::time::Duration;
//!
//! let params = SynodParams::new(5, 0.1, 500).with_seed(42);
//! let report = run(&params, &RuntimeConfig::default(), Duration::from_secs(30)).unwrap();
//! assert!(report.agreed());
//! ```

pub mod coordinator;
pub mod error;
pub mod gatherer;
pub mod params;
pub mod process;
pub mod run;

pub use coordinator::{Coordinator, CoordinatorMessage};
pub use error::SynodError;
pub use gatherer::{Delivery, GatherOutcome, Gatherer};
pub use params::{SynodParams, Trial};
pub use process::{Ballot, Process, ProcessMessage, Value};
pub use run::{run, run_trial, sweep, RunReport, TrialResult};

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Kestrel Testkit
//!
//! Harness for driving actor scenarios in tests.
//!
//! A [`TestKit`] owns an [`ActorSystem`](kestrel_concurrency::ActorSystem).
//! By default it runs on a [`ManualDispatcher`](kestrel_concurrency::ManualDispatcher)
//! so every interleaving is reproducible; [`TestKit::threaded`] runs the same
//! scenario on a real worker pool. Probes are recording actors whose inbox can
//! be asserted on.
//!
//! ```no_run
//! use kestrel_concurrency::actor::{from_fn, Transition};
//! use kestrel_testkit::TestKit;
//! use std::time::Duration;
//!
//! let kit = TestKit::new();
//! let probe = kit.probe::<u32>().unwrap();
//! let reply_to = probe.actor_ref();
//! let doubler = kit
//!     .spawn(from_fn((), move |state, n: u32, ctx| {
//!         ctx.tell(&reply_to, n * 2);
//!         Ok(Transition::next(state))
//!     }))
//!     .unwrap();
//!
//! kit.tell(&doubler, 21).unwrap();
//! assert_eq!(probe.expect_message(42, Duration::from_secs(1)).unwrap(), 42);
//! ```

mod error;
mod kit;
mod probe;

pub use error::TestKitError;
pub use kit::{TestKit, DEFAULT_TIMEOUT};
pub use probe::{EventProbe, TestProbe};

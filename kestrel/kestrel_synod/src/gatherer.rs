//! Collects decisions and checks agreement.

use kestrel_concurrency::{ActorRef, Behavior, Context, Transition};
use kestrel_core::BehaviorError;
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorMessage;
use crate::process::Value;

/// A process delivering its decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Deciding process
    pub from: usize,
    /// Decided value
    pub value: Value,
}

/// What the gatherer saw before stopping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatherOutcome {
    /// Deliveries in arrival order
    pub deliveries: Vec<Delivery>,
    /// Whether every delivered value was the same
    pub agreed: bool,
}

impl GatherOutcome {
    /// The value of the first delivery
    pub fn value(&self) -> Option<Value> {
        self.deliveries.first().map(|delivery| delivery.value)
    }
}

/// Stops after `expected` deliveries and reports to the coordinator
pub struct Gatherer {
    expected: usize,
    report_to: ActorRef<CoordinatorMessage>,
}

impl Gatherer {
    /// Gatherer waiting for `expected` decisions
    pub fn new(expected: usize, report_to: ActorRef<CoordinatorMessage>) -> Self {
        Self {
            expected,
            report_to,
        }
    }
}

impl Behavior for Gatherer {
    type Message = Delivery;
    type State = GatherOutcome;

    fn init(&self, _ctx: &mut Context<'_, Delivery>) -> Result<GatherOutcome, BehaviorError> {
        Ok(GatherOutcome {
            deliveries: Vec::with_capacity(self.expected),
            agreed: true,
        })
    }

    fn receive(
        &self,
        mut outcome: GatherOutcome,
        delivery: Delivery,
        ctx: &mut Context<'_, Delivery>,
    ) -> Result<Transition<GatherOutcome>, BehaviorError> {
        if let Some(first) = outcome.value() {
            if first != delivery.value {
                error!(
                    "Process {} delivered {} but {} was delivered before",
                    delivery.from, delivery.value, first
                );
                outcome.agreed = false;
            }
        }
        outcome.deliveries.push(delivery);

        if outcome.deliveries.len() < self.expected {
            return Ok(Transition::next(outcome));
        }
        info!(
            "Gathered {} deliveries (agreed: {})",
            outcome.deliveries.len(),
            outcome.agreed
        );
        ctx.tell(&self.report_to, CoordinatorMessage::Gathered(outcome.clone()));
        Ok(Transition::stop(outcome))
    }
}

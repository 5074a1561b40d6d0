//! The behavior trait: what an actor does with a message.
//!
//! A behavior is a pure transition function over an owned state. The cell
//! passes the current state in by value and stores whatever state comes
//! back. Side effects go through the `Context`; messages told through it
//! are only sent when the transition succeeds.

use kestrel_core::BehaviorError;
use std::marker::PhantomData;

use super::context::Context;
use super::mailbox::Message;

/// Instruction returned alongside the next state
#[derive(Debug)]
pub enum Directive {
    /// Keep processing messages
    Continue,
    /// Stop this actor after the current message
    Stop,
    /// Restart with fresh state from `init`
    Restart(String),
    /// Hand the failure to the parent
    Escalate(BehaviorError),
}

/// Result of handling one message
#[derive(Debug)]
pub struct Transition<S> {
    /// The actor's next state
    pub state: S,
    /// What the runtime should do next
    pub directive: Directive,
}

impl<S> Transition<S> {
    /// Continue with `state`
    pub fn next(state: S) -> Self {
        Self {
            state,
            directive: Directive::Continue,
        }
    }

    /// Stop after this message
    pub fn stop(state: S) -> Self {
        Self {
            state,
            directive: Directive::Stop,
        }
    }

    /// Restart the actor
    pub fn restart(state: S, reason: impl Into<String>) -> Self {
        Self {
            state,
            directive: Directive::Restart(reason.into()),
        }
    }

    /// Escalate `error` to the parent
    pub fn escalate(state: S, error: BehaviorError) -> Self {
        Self {
            state,
            directive: Directive::Escalate(error),
        }
    }
}

/// Defines how an actor reacts to its messages.
///
/// `init` builds the state when the actor starts and again after every
/// restart. Returning `Err` from `init` or `receive`, or panicking in them,
/// is reported to the actor's supervision strategy.
pub trait Behavior: Send + 'static {
    /// The closed protocol this actor accepts
    type Message: Message;

    /// State owned by the actor between messages
    type State: Send + 'static;

    /// Build the initial state
    fn init(&self, ctx: &mut Context<'_, Self::Message>) -> Result<Self::State, BehaviorError>;

    /// Handle one message
    fn receive(
        &self,
        state: Self::State,
        message: Self::Message,
        ctx: &mut Context<'_, Self::Message>,
    ) -> Result<Transition<Self::State>, BehaviorError>;

    /// Called before a restart with the last state, if it survived the failure
    fn pre_restart(&self, _state: Option<Self::State>, _reason: &BehaviorError) {}

    /// Called once when the actor stops
    fn on_stop(&self, _state: Option<Self::State>) {}
}

/// A behavior built from a closure and an initial state
pub struct FnBehavior<S, M, F> {
    initial: S,
    handler: F,
    _message: PhantomData<fn(M)>,
}

/// Build a behavior from `initial` state and a message handler.
///
/// Every start and restart begins from a clone of `initial`.
pub fn from_fn<S, M, F>(initial: S, handler: F) -> FnBehavior<S, M, F>
where
    S: Clone + Send + 'static,
    M: Message,
    F: Fn(S, M, &mut Context<'_, M>) -> Result<Transition<S>, BehaviorError> + Send + 'static,
{
    FnBehavior {
        initial,
        handler,
        _message: PhantomData,
    }
}

impl<S, M, F> Behavior for FnBehavior<S, M, F>
where
    S: Clone + Send + 'static,
    M: Message,
    F: Fn(S, M, &mut Context<'_, M>) -> Result<Transition<S>, BehaviorError> + Send + 'static,
{
    type Message = M;
    type State = S;

    fn init(&self, _ctx: &mut Context<'_, M>) -> Result<S, BehaviorError> {
        Ok(self.initial.clone())
    }

    fn receive(
        &self,
        state: S,
        message: M,
        ctx: &mut Context<'_, M>,
    ) -> Result<Transition<S>, BehaviorError> {
        (self.handler)(state, message, ctx)
    }
}

//! # Table-Driven State Machine Engine
//!
//! `fsm` provides a small, generic finite-state-machine runtime plus the
//! shared timer [`Scheduler`] it runs on. A machine is declared as data with
//! [`FsmBuilder`] (transition table, per-state entry/exit actions, optional
//! transition listener) and validated as a whole before anything runs.
//!
//! ## Guarantees
//!
//! - Event handling for one machine is strictly serial; actions request
//!   follow-up events and timeouts through a [`Dispatch`] surface instead of
//!   re-entering the machine.
//! - A timeout armed during a transition belongs to the state being entered;
//!   leaving that state cancels it, and an in-flight delivery that loses the
//!   race is discarded by an epoch check on arrival.
//! - Panics in user actions are contained and logged; the machine stays in
//!   its post-transition state.
//! - An invalid machine description (duplicate transitions, unreachable
//!   states, an inert initial state) is a constructor error listing every
//!   problem, never a process abort.

mod builder;
mod machine;
pub mod scheduler;

pub use builder::{DefinitionErrors, FsmBuilder, FsmEvent, FsmState};
pub use machine::{Dispatch, Fsm};
pub use scheduler::{Scheduler, TimerHandle};

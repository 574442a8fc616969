//! Declarative construction of a state machine.
//!
//! A machine is described as data: an initial state, a transition table keyed
//! by `(state, event)`, optional per-state entry/exit actions, and an optional
//! transition listener. [`FsmBuilder::build`] validates the whole description
//! and returns every problem found, so a bad table is a startup error rather
//! than a latent runtime surprise.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;

use crate::machine::{Action, Dispatch, Fsm};
use crate::scheduler::Scheduler;

/// Marker bounds for state enumerations.
pub trait FsmState: Copy + Eq + Hash + Debug + Send + 'static {}
impl<T: Copy + Eq + Hash + Debug + Send + 'static> FsmState for T {}

/// Marker bounds for event enumerations.
pub trait FsmEvent: Clone + Eq + Hash + Debug + Send + 'static {}
impl<T: Clone + Eq + Hash + Debug + Send + 'static> FsmEvent for T {}

pub(crate) struct Transition<S, C, E> {
    pub(crate) to: S,
    pub(crate) action: Option<Action<C, E>>,
}

/// All the problems found while validating a machine description.
#[derive(Debug, thiserror::Error)]
#[error("invalid state machine definition for '{name}': {}", .problems.join("; "))]
pub struct DefinitionErrors {
    pub name: &'static str,
    pub problems: Vec<String>,
}

/// Builder for an [`Fsm`].
///
/// `S` is the state enum, `E` the event enum, and `C` the context handed by
/// the machine's owner to every action.
pub struct FsmBuilder<S, E, C> {
    name: &'static str,
    initial: S,
    seed: Option<E>,
    transitions: HashMap<(S, E), Transition<S, C, E>>,
    duplicates: Vec<String>,
    on_entry: HashMap<S, Action<C, E>>,
    on_exit: HashMap<S, Action<C, E>>,
    on_change: Option<Box<dyn FnMut(S, &E, S) + Send>>,
    on_any_event: Option<Box<dyn FnMut(&E) + Send>>,
}

impl<S: FsmState, E: FsmEvent, C> FsmBuilder<S, E, C> {
    /// Starts a description for a machine that begins in `initial`.
    ///
    /// `name` appears in logs and validation errors.
    pub fn new(name: &'static str, initial: S) -> Self {
        Self {
            name,
            initial,
            seed: None,
            transitions: HashMap::new(),
            duplicates: Vec::new(),
            on_entry: HashMap::new(),
            on_exit: HashMap::new(),
            on_change: None,
            on_any_event: None,
        }
    }

    /// Delivers `event` once, right after the machine starts.
    pub fn seed(mut self, event: E) -> Self {
        self.seed = Some(event);
        self
    }

    /// Adds a transition with no action.
    pub fn transition(self, from: S, on: E, to: S) -> Self {
        self.add(from, on, to, None)
    }

    /// Adds a transition whose action runs between the exit and entry hooks.
    pub fn transition_with<F>(self, from: S, on: E, to: S, action: F) -> Self
    where
        F: FnMut(&mut C, &mut Dispatch<E>) + Send + 'static,
    {
        self.add(from, on, to, Some(Box::new(action)))
    }

    fn add(mut self, from: S, on: E, to: S, action: Option<Action<C, E>>) -> Self {
        let key = (from, on.clone());
        if self.transitions.contains_key(&key) {
            self.duplicates
                .push(format!("duplicate transition from {from:?} on {on:?}"));
        } else {
            self.transitions.insert(key, Transition { to, action });
        }
        self
    }

    /// Registers an action to run every time `state` is entered.
    pub fn on_entry<F>(mut self, state: S, action: F) -> Self
    where
        F: FnMut(&mut C, &mut Dispatch<E>) + Send + 'static,
    {
        self.on_entry.insert(state, Box::new(action));
        self
    }

    /// Registers an action to run every time `state` is left.
    pub fn on_exit<F>(mut self, state: S, action: F) -> Self
    where
        F: FnMut(&mut C, &mut Dispatch<E>) + Send + 'static,
    {
        self.on_exit.insert(state, Box::new(action));
        self
    }

    /// Observes every transition; called with `(from, event, to)` after the
    /// new state's entry action has run.
    pub fn on_change<F>(mut self, listener: F) -> Self
    where
        F: FnMut(S, &E, S) + Send + 'static,
    {
        self.on_change = Some(Box::new(listener));
        self
    }

    /// Observes every externally-delivered event, before it is handled.
    /// Events posted internally by actions are not reported.
    pub fn observe_events<F>(mut self, listener: F) -> Self
    where
        F: FnMut(&E) + Send + 'static,
    {
        self.on_any_event = Some(Box::new(listener));
        self
    }

    /// Validates the description and produces a runnable machine.
    ///
    /// Rejects duplicate transitions, states that cannot be reached from the
    /// initial state, and an initial state with no way out. All problems are
    /// reported together.
    pub fn build(self, scheduler: Scheduler) -> Result<Fsm<S, E, C>, DefinitionErrors> {
        let mut problems = self.duplicates.clone();

        // Every state the description mentions.
        let mut known: HashSet<S> = HashSet::new();
        known.insert(self.initial);
        for ((from, _), tr) in &self.transitions {
            known.insert(*from);
            known.insert(tr.to);
        }
        known.extend(self.on_entry.keys().copied());
        known.extend(self.on_exit.keys().copied());

        // States reachable from the initial one, following the table.
        let mut reachable: HashSet<S> = HashSet::new();
        reachable.insert(self.initial);
        let mut frontier = VecDeque::from([self.initial]);
        while let Some(state) = frontier.pop_front() {
            for ((from, _), tr) in &self.transitions {
                if *from == state && reachable.insert(tr.to) {
                    frontier.push_back(tr.to);
                }
            }
        }

        for state in &known {
            if !reachable.contains(state) {
                problems.push(format!("state {state:?} is unreachable from {:?}", self.initial));
            }
        }

        if !self.transitions.keys().any(|(from, _)| *from == self.initial) {
            problems.push(format!(
                "initial state {:?} has no outgoing transitions",
                self.initial
            ));
        }

        if !problems.is_empty() {
            return Err(DefinitionErrors {
                name: self.name,
                problems,
            });
        }

        Ok(Fsm::from_parts(
            self.name,
            self.initial,
            self.seed,
            self.transitions,
            self.on_entry,
            self.on_exit,
            self.on_change,
            self.on_any_event,
            scheduler,
        ))
    }
}

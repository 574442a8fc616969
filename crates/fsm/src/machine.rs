//! The state machine runtime.
//!
//! One `Fsm` holds the current state, an internal event queue, and the timers
//! owned by the current state. Event handling is synchronous and re-entrant
//! in the only way that is safe: actions never call back into the machine
//! directly, they hand follow-up events and timeout requests to a [`Dispatch`]
//! surface, and the machine drains those once the in-flight transition has
//! committed.
//!
//! Scheduled events are double-guarded. Leaving a state drops the timer
//! handles that state armed (cancelling the pending delivery), and every
//! delivery also carries the state epoch it was armed under, which is checked
//! again at the door. A scheduled event therefore never reaches a state it
//! was not scheduled for, even if it was already in flight when the state
//! changed.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::builder::{FsmEvent, FsmState, Transition};
use crate::scheduler::{Scheduler, TimerHandle};

/// A boxed per-state or per-transition action.
pub type Action<C, E> = Box<dyn FnMut(&mut C, &mut Dispatch<E>) + Send>;

/// Sink that carries a timed event delivery back into the machine's owner.
/// Receives the event and the epoch it was armed under.
type EventSink<E> = Arc<dyn Fn(E, u64) + Send + Sync>;

/// Control surface handed to actions.
pub struct Dispatch<'a, E> {
    posted: &'a mut VecDeque<E>,
    timeouts: &'a mut Vec<(E, Duration)>,
}

impl<E> Dispatch<'_, E> {
    /// Queues `event` for delivery right after the current transition
    /// commits.
    pub fn post(&mut self, event: E) {
        self.posted.push_back(event);
    }

    /// Delivers `event` after `delay`, unless the state the transition is
    /// entering is left first.
    pub fn set_timeout(&mut self, event: E, delay: Duration) {
        self.timeouts.push((event, delay));
    }
}

/// A running state machine. See the module docs for the delivery rules.
pub struct Fsm<S, E, C> {
    name: &'static str,
    state: S,
    epoch: u64,
    started: bool,
    seed: Option<E>,
    transitions: HashMap<(S, E), Transition<S, C, E>>,
    on_entry: HashMap<S, Action<C, E>>,
    on_exit: HashMap<S, Action<C, E>>,
    on_change: Option<Box<dyn FnMut(S, &E, S) + Send>>,
    on_any_event: Option<Box<dyn FnMut(&E) + Send>>,
    queue: VecDeque<E>,
    dispatching: bool,
    staged_timeouts: Vec<(E, Duration)>,
    armed: Vec<TimerHandle>,
    scheduler: Scheduler,
    sink: Option<EventSink<E>>,
}

impl<S: FsmState, E: FsmEvent, C> Fsm<S, E, C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        name: &'static str,
        initial: S,
        seed: Option<E>,
        transitions: HashMap<(S, E), Transition<S, C, E>>,
        on_entry: HashMap<S, Action<C, E>>,
        on_exit: HashMap<S, Action<C, E>>,
        on_change: Option<Box<dyn FnMut(S, &E, S) + Send>>,
        on_any_event: Option<Box<dyn FnMut(&E) + Send>>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            name,
            state: initial,
            epoch: 0,
            started: false,
            seed,
            transitions,
            on_entry,
            on_exit,
            on_change,
            on_any_event,
            queue: VecDeque::new(),
            dispatching: false,
            staged_timeouts: Vec::new(),
            armed: Vec::new(),
            scheduler,
            sink: None,
        }
    }

    /// The current state.
    pub fn state(&self) -> S {
        self.state
    }

    /// Installs the sink used to deliver scheduled events back into the
    /// machine. The owner typically captures a weak reference to itself here
    /// and routes the delivery through [`Fsm::on_scheduled`].
    pub fn set_sink<F>(&mut self, sink: F)
    where
        F: Fn(E, u64) + Send + Sync + 'static,
    {
        self.sink = Some(Arc::new(sink));
    }

    /// Runs the initial state's entry action, then delivers the seed event
    /// (if one was configured). Subsequent calls are no-ops.
    pub fn start(&mut self, ctx: &mut C) {
        if self.started {
            return;
        }
        self.started = true;
        debug!(machine = self.name, state = ?self.state, "state machine started");
        self.run_hook(true, self.state, ctx);
        self.arm_staged();
        if let Some(seed) = self.seed.take() {
            self.on_event(ctx, seed);
        }
    }

    /// Delivers `event`. Events posted by actions while this call is running
    /// are processed before it returns, in posting order. An event with no
    /// transition from the current state is discarded.
    pub fn on_event(&mut self, ctx: &mut C, event: E) {
        if let Some(listener) = self.on_any_event.as_mut() {
            listener(&event);
        }
        self.queue.push_back(event);
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        while let Some(next) = self.queue.pop_front() {
            self.dispatch(ctx, next);
        }
        self.dispatching = false;
    }

    /// Entry point for timed deliveries. Discards the event if the machine
    /// has changed state since the timer was armed.
    pub fn on_scheduled(&mut self, ctx: &mut C, event: E, epoch: u64) {
        if epoch != self.epoch {
            trace!(machine = self.name, event = ?event, "stale scheduled event discarded");
            return;
        }
        self.on_event(ctx, event);
    }

    /// Delivers `event` after `delay` unless the current state is left first.
    pub fn schedule_event(&mut self, event: E, delay: Duration) {
        self.arm(event, delay);
    }

    fn dispatch(&mut self, ctx: &mut C, event: E) {
        let from = self.state;
        let key = (from, event.clone());
        let Some(mut tr) = self.transitions.remove(&key) else {
            trace!(machine = self.name, state = ?from, event = ?event, "event discarded; no transition");
            return;
        };
        let to = tr.to;

        self.run_hook(false, from, ctx);
        if let Some(action) = tr.action.as_mut() {
            self.invoke(action, ctx, "transition");
        }
        self.transitions.insert(key, tr);

        self.state = to;
        self.epoch = self.epoch.wrapping_add(1);
        // Dropping the handles cancels whatever the previous state had armed.
        self.armed.clear();
        debug!(machine = self.name, from = ?from, event = ?event, to = ?to, "transition");

        self.run_hook(true, to, ctx);
        self.arm_staged();

        if let Some(listener) = self.on_change.as_mut() {
            listener(from, &event, to);
        }
    }

    fn run_hook(&mut self, entering: bool, state: S, ctx: &mut C) {
        let action = if entering {
            self.on_entry.remove(&state)
        } else {
            self.on_exit.remove(&state)
        };
        if let Some(mut action) = action {
            self.invoke(&mut action, ctx, if entering { "entry" } else { "exit" });
            if entering {
                self.on_entry.insert(state, action);
            } else {
                self.on_exit.insert(state, action);
            }
        }
    }

    /// Runs one user action, containing panics so a bad action cannot take
    /// the machine down with it.
    fn invoke(&mut self, action: &mut Action<C, E>, ctx: &mut C, what: &str) {
        let mut dispatch = Dispatch {
            posted: &mut self.queue,
            timeouts: &mut self.staged_timeouts,
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| action(ctx, &mut dispatch)));
        if outcome.is_err() {
            error!(
                machine = self.name,
                state = ?self.state,
                action = what,
                "user action panicked; machine continues in its post-transition state"
            );
        }
    }

    fn arm_staged(&mut self) {
        let staged: Vec<(E, Duration)> = self.staged_timeouts.drain(..).collect();
        for (event, delay) in staged {
            self.arm(event, delay);
        }
    }

    fn arm(&mut self, event: E, delay: Duration) {
        let Some(sink) = self.sink.clone() else {
            warn!(machine = self.name, event = ?event, "no event sink installed; timeout dropped");
            return;
        };
        let epoch = self.epoch;
        trace!(machine = self.name, event = ?event, ?delay, "timeout armed");
        let handle = self
            .scheduler
            .schedule_once(delay, move || sink(event, epoch));
        self.armed.push(handle);
    }
}

//! Behavioral tests for the state machine engine.
//!
//! Timed behavior runs under tokio's paused clock, so every test is
//! deterministic regardless of host load.

use std::sync::Arc;
use std::time::Duration;

use fsm::{Fsm, FsmBuilder, Scheduler};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum St {
    Idle,
    Running,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Ev {
    Go,
    Finish,
    Tick,
}

type Log = Vec<String>;

struct Cell {
    fsm: Fsm<St, Ev, Log>,
    log: Log,
}

/// Builds the machine, wires the scheduled-event sink back into it, and
/// starts it.
fn start(builder: FsmBuilder<St, Ev, Log>) -> Arc<Mutex<Cell>> {
    let fsm = builder.build(Scheduler::new()).expect("definition is valid");
    let cell = Arc::new(Mutex::new(Cell {
        fsm,
        log: Vec::new(),
    }));
    let weak = Arc::downgrade(&cell);
    {
        let mut guard = cell.lock();
        guard.fsm.set_sink(move |event, epoch| {
            if let Some(cell) = weak.upgrade() {
                let mut guard = cell.lock();
                let Cell { fsm, log } = &mut *guard;
                fsm.on_scheduled(log, event, epoch);
            }
        });
        let Cell { fsm, log } = &mut *guard;
        fsm.start(log);
    }
    cell
}

fn deliver(cell: &Mutex<Cell>, event: Ev) {
    let mut guard = cell.lock();
    let Cell { fsm, log } = &mut *guard;
    fsm.on_event(log, event);
}

fn state(cell: &Mutex<Cell>) -> St {
    cell.lock().fsm.state()
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

fn mark(label: &'static str) -> impl FnMut(&mut Log, &mut fsm::Dispatch<Ev>) + Send + 'static {
    move |log, _| log.push(label.to_string())
}

#[tokio::test]
async fn validation_reports_every_problem_at_once() {
    // Duplicate transition plus a state only mentioned as an entry hook.
    let result = FsmBuilder::<St, Ev, Log>::new("bad", St::Idle)
        .transition(St::Idle, Ev::Go, St::Running)
        .transition(St::Idle, Ev::Go, St::Done)
        .on_entry(St::Done, mark("enter done"))
        .build(Scheduler::new());

    let err = result.err().expect("definition must be rejected");
    assert_eq!(err.problems.len(), 2, "got: {:?}", err.problems);
    assert!(err.problems.iter().any(|p| p.contains("duplicate")));
    assert!(err.problems.iter().any(|p| p.contains("unreachable")));
}

#[tokio::test]
async fn inert_initial_state_is_rejected() {
    let result = FsmBuilder::<St, Ev, Log>::new("inert", St::Idle).build(Scheduler::new());
    let err = result.err().expect("definition must be rejected");
    assert!(err.problems[0].contains("no outgoing transitions"));
}

#[tokio::test]
async fn hooks_run_in_exit_action_entry_order() {
    let cell = start(
        FsmBuilder::new("order", St::Idle)
            .on_entry(St::Idle, mark("enter:Idle"))
            .on_exit(St::Idle, mark("exit:Idle"))
            .on_entry(St::Running, mark("enter:Running"))
            .transition_with(St::Idle, Ev::Go, St::Running, mark("act:Go")),
    );
    deliver(&cell, Ev::Go);

    assert_eq!(state(&cell), St::Running);
    assert_eq!(
        cell.lock().log,
        vec!["enter:Idle", "exit:Idle", "act:Go", "enter:Running"]
    );
}

#[tokio::test]
async fn unknown_event_is_discarded_silently() {
    let cell = start(
        FsmBuilder::new("discard", St::Idle)
            .transition(St::Idle, Ev::Go, St::Running)
            .transition(St::Running, Ev::Finish, St::Done),
    );
    deliver(&cell, Ev::Finish);
    assert_eq!(state(&cell), St::Idle);

    // Repeated storms of the same inapplicable event change nothing.
    for _ in 0..10 {
        deliver(&cell, Ev::Finish);
    }
    assert_eq!(state(&cell), St::Idle);
}

#[tokio::test]
async fn posted_events_run_after_the_current_transition_commits() {
    let cell = start(
        FsmBuilder::new("chained", St::Idle)
            .transition_with(St::Idle, Ev::Go, St::Running, |log: &mut Log, dsp| {
                log.push("act:Go".into());
                dsp.post(Ev::Finish);
            })
            .on_entry(St::Running, mark("enter:Running"))
            .transition_with(St::Running, Ev::Finish, St::Done, mark("act:Finish")),
    );
    deliver(&cell, Ev::Go);

    assert_eq!(state(&cell), St::Done);
    // The posted Finish ran only after Running was fully entered.
    assert_eq!(cell.lock().log, vec!["act:Go", "enter:Running", "act:Finish"]);
}

#[tokio::test]
async fn seed_event_is_delivered_once_at_start() {
    let cell = start(
        FsmBuilder::new("seeded", St::Idle)
            .seed(Ev::Go)
            .transition(St::Idle, Ev::Go, St::Running)
            .transition(St::Running, Ev::Finish, St::Done),
    );
    assert_eq!(state(&cell), St::Running);
}

#[tokio::test(start_paused = true)]
async fn timeout_fires_in_the_state_that_armed_it() {
    let cell = start(
        FsmBuilder::new("timed", St::Idle)
            .transition(St::Idle, Ev::Go, St::Running)
            .on_entry(St::Running, |_: &mut Log, dsp| {
                dsp.set_timeout(Ev::Finish, Duration::from_secs(5));
            })
            .transition(St::Running, Ev::Finish, St::Done),
    );
    deliver(&cell, Ev::Go);
    assert_eq!(state(&cell), St::Running);

    advance(Duration::from_secs(4)).await;
    assert_eq!(state(&cell), St::Running);

    advance(Duration::from_secs(1)).await;
    assert_eq!(state(&cell), St::Done);
}

#[tokio::test(start_paused = true)]
async fn leaving_a_state_cancels_its_pending_timeout() {
    // If the Tick armed in Running survived the transition to Done, it
    // would drive the machine back to Idle below.
    let cell = start(
        FsmBuilder::new("cancelled", St::Idle)
            .transition(St::Idle, Ev::Go, St::Running)
            .on_entry(St::Running, |_: &mut Log, dsp| {
                dsp.set_timeout(Ev::Tick, Duration::from_secs(5));
            })
            .transition(St::Running, Ev::Tick, St::Idle)
            .transition(St::Running, Ev::Finish, St::Done)
            .transition(St::Done, Ev::Tick, St::Idle),
    );
    deliver(&cell, Ev::Go);
    advance(Duration::from_secs(2)).await;
    deliver(&cell, Ev::Finish);
    assert_eq!(state(&cell), St::Done);

    advance(Duration::from_secs(10)).await;
    assert_eq!(state(&cell), St::Done);
}

#[tokio::test(start_paused = true)]
async fn schedule_event_is_bound_to_the_current_state() {
    let cell = start(
        FsmBuilder::new("external", St::Idle)
            .transition(St::Idle, Ev::Go, St::Running)
            .transition(St::Running, Ev::Tick, St::Done)
            .transition(St::Idle, Ev::Tick, St::Running),
    );
    {
        let mut guard = cell.lock();
        guard.fsm.schedule_event(Ev::Tick, Duration::from_secs(3));
    }
    // The Tick was armed while Idle; after moving to Running it must not
    // deliver, even though Running also has a Tick transition.
    deliver(&cell, Ev::Go);
    advance(Duration::from_secs(5)).await;
    assert_eq!(state(&cell), St::Running);
}

#[tokio::test]
async fn event_listener_sees_external_events_only() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let cell = start(
        FsmBuilder::new("observed", St::Idle)
            .observe_events(move |event: &Ev| sink.lock().push(*event))
            .transition_with(St::Idle, Ev::Go, St::Running, |_: &mut Log, dsp| {
                dsp.post(Ev::Finish);
            })
            .transition(St::Running, Ev::Finish, St::Done),
    );
    deliver(&cell, Ev::Go);

    // The internally-posted Finish still drove the machine to Done, but
    // only the external Go was reported.
    assert_eq!(state(&cell), St::Done);
    assert_eq!(*observed.lock(), vec![Ev::Go]);
}

#[tokio::test]
async fn panicking_action_leaves_machine_in_post_transition_state() {
    let cell = start(
        FsmBuilder::new("panicky", St::Idle)
            .transition_with(St::Idle, Ev::Go, St::Running, |_: &mut Log, _| {
                panic!("action blew up");
            })
            .transition(St::Running, Ev::Finish, St::Done),
    );
    deliver(&cell, Ev::Go);
    assert_eq!(state(&cell), St::Running);

    // The machine still works afterwards.
    deliver(&cell, Ev::Finish);
    assert_eq!(state(&cell), St::Done);
}

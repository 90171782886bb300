mod support;

use std::collections::VecDeque;

use node_core::engine::{DispatchOutcome, MAX_CASCADE_DEPTH, RestartReason, RetryCounter, State};
use node_core::events::{Event, HallLevel, TxResult};
use node_core::telemetry::TelemetryEventKind;
use support::{Harness, MockInstant, Recorder, TestEngine};

/// Stimuli applied while exploring the reachable state space.
#[derive(Copy, Clone, Debug)]
enum Stimulus {
    Timer,
    Button,
    Hall(HallLevel),
    Radio(TxResult),
}

const STIMULI: [Stimulus; 9] = [
    Stimulus::Timer,
    Stimulus::Button,
    Stimulus::Hall(HallLevel::Low),
    Stimulus::Hall(HallLevel::High),
    Stimulus::Radio(TxResult::Sent),
    Stimulus::Radio(TxResult::SentAndAcknowledged),
    Stimulus::Radio(TxResult::Timeout),
    Stimulus::Radio(TxResult::ErrorRetryable),
    Stimulus::Radio(TxResult::ErrorFatal),
];

fn apply(engine: &mut TestEngine, stimulus: Stimulus) -> Option<DispatchOutcome> {
    let mut telemetry = Recorder::new();
    match stimulus {
        Stimulus::Timer => {
            let deadline = engine.next_deadline()?;
            engine.poll_timer(deadline, &mut telemetry)
        }
        Stimulus::Button => Some(engine.dispatch(
            &Event::SensorEdgeButton,
            MockInstant::micros(0),
            &mut telemetry,
        )),
        Stimulus::Hall(level) => {
            engine.hardware_mut().hall = level;
            Some(engine.dispatch(&Event::SensorEdgeHall, MockInstant::micros(0), &mut telemetry))
        }
        Stimulus::Radio(result) => Some(engine.dispatch(
            &Event::RadioTxStatus(result),
            MockInstant::micros(0),
            &mut telemetry,
        )),
    }
}

type Key = (State, u8, u8, Option<HallLevel>);

fn key(engine: &TestEngine) -> Key {
    let cx = engine.context();
    (
        engine.state(),
        cx.counter(RetryCounter::Timeouts),
        cx.counter(RetryCounter::Errors),
        cx.recorded_closure(),
    )
}

/// Every distinct (state, counters, recorded closure) reachable from boot,
/// found breadth-first.
fn reachable_engines() -> Vec<TestEngine> {
    let mut found: Vec<TestEngine> = vec![Harness::booted().engine];
    let mut queue: VecDeque<TestEngine> = found.iter().cloned().collect();

    while let Some(engine) = queue.pop_front() {
        for stimulus in STIMULI {
            let mut next = engine.clone();
            if apply(&mut next, stimulus).is_none() || next.is_halted() {
                continue;
            }
            let next_key = key(&next);
            if found.iter().all(|seen| key(seen) != next_key) {
                found.push(next.clone());
                queue.push_back(next);
            }
        }
    }
    found
}

#[test]
fn every_state_but_the_terminal_ones_is_reachable() {
    let states: Vec<State> = reachable_engines().iter().map(TestEngine::state).collect();

    for state in State::ALL {
        let expected = !matches!(
            state,
            State::NotInit | State::Starting | State::OpSignalOk | State::FatalError
        );
        assert_eq!(
            states.contains(&state),
            expected,
            "{state} reachability as a resting state"
        );
    }
}

#[test]
fn enter_settles_within_the_cascade_bound_for_every_state() {
    for engine in reachable_engines() {
        let mut scratch = engine.clone();
        let mut telemetry = Recorder::new();

        let outcome = scratch.dispatch(&Event::Enter, MockInstant::micros(0), &mut telemetry);

        let hops = telemetry
            .oldest_first()
            .filter(|record| matches!(record.event, TelemetryEventKind::Transition { .. }))
            .count();
        assert!(hops <= MAX_CASCADE_DEPTH, "{} cascaded {hops} times", engine.state());
        assert_ne!(
            outcome,
            DispatchOutcome::RestartRequested(RestartReason::CascadeLimit),
            "{} hit the cascade guard",
            engine.state()
        );
    }
}

#[test]
fn enter_into_a_fresh_engine_is_ignored() {
    let mut engine = Harness::booted().engine;
    let mut fresh = TestEngine::new(
        engine.hardware().clone(),
        engine.radio().clone(),
        support::DEVICE_ID,
        MockInstant::micros(0),
    );
    let mut telemetry = Recorder::new();

    let outcome = fresh.dispatch(&Event::Enter, MockInstant::micros(0), &mut telemetry);

    assert_eq!(outcome, DispatchOutcome::Settled(State::NotInit));
    assert!(telemetry.is_empty());

    let outcome = engine.dispatch(&Event::Exit, MockInstant::micros(0), &mut telemetry);
    assert_eq!(outcome, DispatchOutcome::Settled(State::Joining));
}

#[test]
fn transient_states_pass_straight_through() {
    let mut harness = Harness::joined();
    let transitions = harness.transitions();
    assert!(transitions.contains(&(State::Starting, State::OpWaiting)));

    harness.fire_timer();
    harness.dispatch(Event::RadioTxStatus(TxResult::SentAndAcknowledged));
    assert_eq!(harness.engine.state(), State::OpWaiting);
    assert!(
        harness
            .transitions()
            .ends_with(&[(State::OpTxAndWait, State::OpSignalOk), (State::OpSignalOk, State::OpWaiting)])
    );
}

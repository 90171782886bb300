mod support;

use core::time::Duration;

use node_core::engine::{DispatchOutcome, State};
use node_core::events::{DownlinkNotice, Event, EventKind, HallLevel, TxResult};
use node_core::ports::{Led, LedPattern};
use node_core::telemetry::TelemetryEventKind;
use support::Harness;

/// Joined node whose last report was an open closure.
fn reported_open() -> Harness {
    let mut harness = Harness::joined();
    harness.set_hall(HallLevel::High);
    harness.dispatch(Event::SensorEdgeHall);
    harness.dispatch(Event::RadioTxStatus(TxResult::SentAndAcknowledged));
    assert_eq!(harness.engine.state(), State::OpWaiting);
    assert_eq!(
        harness.engine.context().recorded_closure(),
        Some(HallLevel::High)
    );
    harness
}

#[test]
fn closing_edge_reports_flag_zero() {
    let mut harness = reported_open();
    let frames_before = harness.frames().len();

    harness.set_hall(HallLevel::Low);
    let outcome = harness.dispatch(Event::SensorEdgeHall);

    assert_eq!(outcome, DispatchOutcome::Settled(State::OpTxAndWait));
    assert_eq!(harness.engine.context().payload().closure_flag(), 0);
    assert_eq!(
        harness.engine.context().recorded_closure(),
        Some(HallLevel::Low)
    );

    let frames = harness.frames();
    assert_eq!(frames.len(), frames_before + 1);
    let (payload, timeout) = frames[frames.len() - 1];
    assert_eq!(payload.status(), 0x0000);
    assert_eq!(timeout, Duration::from_secs(10));
    assert_eq!(harness.armed_for(), Some(Duration::from_secs(20)));
}

#[test]
fn opening_edge_lights_red_and_reports() {
    let mut harness = Harness::joined();
    harness.set_hall(HallLevel::High);

    harness.dispatch(Event::SensorEdgeHall);

    assert_eq!(harness.engine.state(), State::OpTxAndWait);
    let (payload, _) = harness.frames()[harness.frames().len() - 1];
    assert_eq!(payload.status(), 0x0001);
    let alert = harness
        .hardware()
        .indications
        .iter()
        .rev()
        .find(|request| request.led == Led::Red)
        .copied()
        .unwrap();
    assert_eq!(alert.pattern, LedPattern::Solid);
    assert_eq!(alert.duration, Duration::from_secs(30));
    assert!(
        harness
            .events()
            .contains(&TelemetryEventKind::ClosureChanged(HallLevel::High))
    );
}

#[test]
fn repeated_level_does_not_transmit() {
    let mut harness = reported_open();
    let frames_before = harness.frames().len();

    let outcome = harness.dispatch(Event::SensorEdgeHall);

    assert_eq!(outcome, DispatchOutcome::Settled(State::OpWaiting));
    assert_eq!(harness.frames().len(), frames_before);
}

#[test]
fn idle_timer_sends_periodic_report() {
    let mut harness = Harness::joined();

    harness.fire_timer();

    assert_eq!(harness.engine.state(), State::OpTxAndWait);
    assert_eq!(harness.frames().len(), 2);
}

#[test]
fn acknowledged_report_flashes_ok_and_returns_to_idle() {
    let mut harness = Harness::joined();
    harness.fire_timer();

    let outcome = harness.dispatch(Event::RadioTxStatus(TxResult::SentAndAcknowledged));

    assert_eq!(outcome, DispatchOutcome::Settled(State::OpWaiting));
    let ok = harness.hardware().indications.last().copied().unwrap();
    assert_eq!(
        (ok.led, ok.pattern, ok.duration),
        (Led::Orange, LedPattern::Solid, Duration::from_secs(10))
    );
    assert_eq!(harness.armed_for(), Some(Duration::from_mins(5)));
}

#[test]
fn failure_after_closed_report_returns_to_idle() {
    let mut harness = Harness::joined();
    harness.set_hall(HallLevel::Low);
    harness.dispatch(Event::SensorEdgeHall);

    harness.dispatch(Event::RadioTxStatus(TxResult::Timeout));

    assert_eq!(harness.engine.state(), State::OpWaiting);
    let transitions = harness.transitions();
    assert!(transitions.contains(&(State::OpTxAndWait, State::OpSignalTimeout)));
    assert!(transitions.contains(&(State::OpSignalTimeout, State::OpWaiting)));
}

#[test]
fn failure_after_open_report_retries_every_ten_seconds() {
    let mut harness = Harness::joined();
    harness.set_hall(HallLevel::High);
    harness.dispatch(Event::SensorEdgeHall);
    let frames_before = harness.frames().len();

    harness.dispatch(Event::RadioTxStatus(TxResult::ErrorRetryable));
    assert_eq!(harness.engine.state(), State::OpSignalError);
    assert_eq!(harness.armed_for(), Some(Duration::from_secs(10)));

    harness.fire_timer();
    assert_eq!(harness.engine.state(), State::OpTxAndWait);
    assert_eq!(harness.frames().len(), frames_before + 1);
}

#[test]
fn rejected_send_goes_to_error_signal() {
    let mut harness = Harness::joined();
    harness
        .engine
        .radio_mut()
        .scripted
        .push_back(TxResult::ErrorRetryable);
    harness.set_hall(HallLevel::High);

    harness.dispatch(Event::SensorEdgeHall);

    assert_eq!(harness.engine.state(), State::OpSignalError);
    assert_eq!(harness.armed_for(), Some(Duration::from_secs(10)));
}

#[test]
fn missing_completion_times_out() {
    let mut harness = Harness::joined();
    harness.set_hall(HallLevel::High);
    harness.dispatch(Event::SensorEdgeHall);

    harness.fire_timer();

    assert_eq!(harness.engine.state(), State::OpSignalTimeout);
}

#[test]
fn unacknowledged_completion_counts_as_error() {
    let mut harness = Harness::joined();
    harness.set_hall(HallLevel::High);
    harness.dispatch(Event::SensorEdgeHall);

    harness.dispatch(Event::RadioTxStatus(TxResult::Sent));

    assert_eq!(harness.engine.state(), State::OpSignalError);
}

#[test]
fn downlinks_are_recorded_as_unhandled() {
    let mut harness = Harness::joined();

    let outcome = harness.dispatch(Event::RadioRxData(DownlinkNotice { port: 3, len: 2 }));

    assert_eq!(outcome, DispatchOutcome::Settled(State::OpWaiting));
    assert!(harness.events().contains(&TelemetryEventKind::Unhandled {
        state: State::OpWaiting,
        event: EventKind::RadioRxData,
    }));
}

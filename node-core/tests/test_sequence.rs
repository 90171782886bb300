mod support;

use core::time::Duration;

use node_core::engine::{DispatchOutcome, RETRY_THRESHOLD, RestartReason, RetryCounter, State};
use node_core::events::{Event, HallLevel, TxResult};
use node_core::ports::{Led, LedPattern};
use support::Harness;

fn counter(harness: &Harness, counter: RetryCounter) -> u8 {
    harness.engine.context().counter(counter)
}

#[test]
fn button_opens_the_test_window() {
    let mut harness = Harness::joined();

    harness.dispatch(Event::SensorEdgeButton);

    assert_eq!(harness.engine.state(), State::TestDoor);
    assert_eq!(harness.armed_for(), Some(Duration::from_secs(30)));
    let window = harness.hardware().indications.last().copied().unwrap();
    assert_eq!(
        (window.led, window.pattern),
        (Led::Orange, LedPattern::Flash4Hz)
    );
}

#[test]
fn test_frame_sets_companion_bit() {
    let harness = Harness::in_test_tx();

    let (payload, timeout) = harness.frames()[harness.frames().len() - 1];
    assert_eq!(payload.status(), 0x0002);
    assert_eq!(timeout, Duration::from_secs(10));
    assert_eq!(harness.armed_for(), Some(Duration::from_secs(20)));
}

#[test]
fn sixth_consecutive_timeout_exhausts_retries() {
    let mut harness = Harness::in_test_tx();

    for round in 1..=u32::from(RETRY_THRESHOLD) + 1 {
        harness.dispatch(Event::RadioTxStatus(TxResult::Timeout));
        assert_eq!(harness.engine.state(), State::TestSignalTimeout);
        assert_eq!(harness.armed_for(), Some(Duration::from_secs(5)));

        harness.fire_timer();
        if round <= u32::from(RETRY_THRESHOLD) {
            assert_eq!(
                harness.engine.state(),
                State::TestTxAndWait,
                "round {round} should retry"
            );
        }
    }

    assert_eq!(harness.engine.state(), State::TestRetryExhausted);
    assert_eq!(counter(&harness, RetryCounter::Timeouts), 6);

    let outcome = harness.fire_timer();
    assert_eq!(
        outcome,
        DispatchOutcome::RestartRequested(RestartReason::RetryExhausted)
    );
    assert_eq!(harness.restarts, 1);
}

#[test]
fn sixth_consecutive_error_reaches_fatal_restart_once() {
    let mut harness = Harness::in_test_tx();

    for _ in 0..=RETRY_THRESHOLD {
        harness.dispatch(Event::RadioTxStatus(TxResult::ErrorRetryable));
        assert_eq!(harness.engine.state(), State::TestSignalError);
        harness.fire_timer();
    }

    assert_eq!(harness.engine.state(), State::TestTriesExhausted);
    assert_eq!(counter(&harness, RetryCounter::Errors), 6);
    assert_eq!(harness.armed_for(), Some(Duration::from_secs(30)));

    let outcome = harness.fire_timer();
    assert_eq!(
        outcome,
        DispatchOutcome::RestartRequested(RestartReason::Fatal)
    );
    assert_eq!(harness.engine.state(), State::FatalError);
    assert_eq!(harness.engine.next_deadline(), None);

    assert_eq!(
        harness.dispatch(Event::RadioTxStatus(TxResult::ErrorRetryable)),
        DispatchOutcome::Halted
    );
    let now = harness.now;
    assert_eq!(harness.engine.poll_timer(now, &mut harness.telemetry), None);
    assert_eq!(harness.restarts, 1);
}

#[test]
fn counters_are_independent() {
    let mut harness = Harness::in_test_tx();

    for _ in 0..RETRY_THRESHOLD {
        harness.dispatch(Event::RadioTxStatus(TxResult::Timeout));
        harness.fire_timer();
        harness.dispatch(Event::RadioTxStatus(TxResult::ErrorFatal));
        harness.fire_timer();
    }

    assert_eq!(harness.engine.state(), State::TestTxAndWait);
    assert_eq!(counter(&harness, RetryCounter::Timeouts), RETRY_THRESHOLD);
    assert_eq!(counter(&harness, RetryCounter::Errors), RETRY_THRESHOLD);
}

#[test]
fn acknowledged_test_returns_to_idle() {
    let mut harness = Harness::in_test_tx();

    harness.dispatch(Event::RadioTxStatus(TxResult::SentAndAcknowledged));
    assert_eq!(harness.engine.state(), State::TestSignalOk);
    assert_eq!(harness.armed_for(), Some(Duration::from_secs(10)));

    harness.fire_timer();
    assert_eq!(harness.engine.state(), State::OpWaiting);
    assert_eq!(harness.armed_for(), Some(Duration::from_mins(5)));
}

#[test]
fn reentering_test_door_resets_counters() {
    let mut harness = Harness::in_test_tx();
    harness.dispatch(Event::RadioTxStatus(TxResult::Timeout));
    harness.fire_timer();
    harness.dispatch(Event::RadioTxStatus(TxResult::ErrorRetryable));
    harness.fire_timer();
    assert_eq!(counter(&harness, RetryCounter::Timeouts), 1);
    assert_eq!(counter(&harness, RetryCounter::Errors), 1);

    harness.dispatch(Event::RadioTxStatus(TxResult::SentAndAcknowledged));
    harness.fire_timer();
    harness.dispatch(Event::SensorEdgeButton);

    assert_eq!(harness.engine.state(), State::TestDoor);
    assert_eq!(counter(&harness, RetryCounter::Timeouts), 0);
    assert_eq!(counter(&harness, RetryCounter::Errors), 0);
}

#[test]
fn hall_edges_in_test_window_only_drive_leds() {
    let mut harness = Harness::joined();
    harness.dispatch(Event::SensorEdgeButton);
    let frames_before = harness.frames().len();

    harness.set_hall(HallLevel::High);
    harness.dispatch(Event::SensorEdgeHall);
    let alert = harness.hardware().indications.last().copied().unwrap();
    assert_eq!((alert.led, alert.pattern), (Led::Red, LedPattern::Solid));

    harness.set_hall(HallLevel::Low);
    harness.dispatch(Event::SensorEdgeHall);
    assert_eq!(harness.hardware().cancelled.last(), Some(&Led::Red));

    assert_eq!(harness.engine.state(), State::TestDoor);
    assert_eq!(harness.frames().len(), frames_before);
    assert_eq!(harness.engine.context().recorded_closure(), None);
}

#[test]
fn rejected_test_send_counts_as_error() {
    let mut harness = Harness::joined();
    harness.dispatch(Event::SensorEdgeButton);
    harness
        .engine
        .radio_mut()
        .scripted
        .push_back(TxResult::ErrorRetryable);

    harness.fire_timer();

    assert_eq!(harness.engine.state(), State::TestSignalError);
    assert_eq!(harness.armed_for(), Some(Duration::from_secs(10)));
}

//! Per-state event handlers.
//!
//! Every handler receives the shared context, the event and a telemetry sink,
//! and answers with a [`Transition`]. `Enter`/`Exit` that a state does not
//! care about are silently ignored; any other unhandled event is recorded.

use super::timing::{
    CLOSURE_ALERT, IDLE_REPORT, JOIN_BACKOFF, JOIN_RADIO_TIMEOUT, JOIN_RETRY, OK_SIGNAL, OP_RETRY,
    RADIO_TIMEOUT, STARTUP_INDICATOR, TEST_ERROR_SIGNAL, TEST_RETRY_EXHAUSTED,
    TEST_TIMEOUT_SIGNAL, TEST_TRIES_EXHAUSTED, TEST_WINDOW, TX_WAIT, UNTIL_CANCELLED,
};
use super::{EngineInstant, NodeContext, RestartReason, RetryCounter, State, Transition};
use crate::events::{Event, HallLevel, TxResult};
use crate::payload::MessageKind;
use crate::ports::{Led, LedPattern, NodeHardware, RadioLink};
use crate::telemetry::{TelemetryEventKind, TelemetrySink};

pub(super) type StateHandler<H, R, I> =
    fn(&mut NodeContext<H, R, I>, &Event, &mut dyn TelemetrySink<I>) -> Transition;

/// Looks up the handler owning `state`.
pub(super) fn handler_for<H, R, I>(state: State) -> StateHandler<H, R, I>
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match state {
        State::NotInit => not_init,
        State::Joining => joining,
        State::Starting => starting,
        State::OpWaiting => op_waiting,
        State::OpTxAndWait => op_tx_and_wait,
        State::OpSignalOk => op_signal_ok,
        State::OpSignalTimeout => op_signal_timeout,
        State::OpSignalError => op_signal_error,
        State::TestDoor => test_door,
        State::TestTxAndWait => test_tx_and_wait,
        State::TestSignalTimeout => test_signal_timeout,
        State::TestRetryExhausted => test_retry_exhausted,
        State::TestSignalOk => test_signal_ok,
        State::TestSignalError => test_signal_error,
        State::TestTriesExhausted => test_tries_exhausted,
        State::FatalError => fatal_error,
    }
}

fn unhandled<H, R, I>(
    cx: &NodeContext<H, R, I>,
    state: State,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    I: EngineInstant,
{
    if !event.is_internal() {
        telemetry.record(
            TelemetryEventKind::Unhandled {
                state,
                event: event.kind(),
            },
            cx.now,
        );
    }
    Transition::Stay
}

fn tx_completed<H, R, I>(
    cx: &NodeContext<H, R, I>,
    state: State,
    result: TxResult,
    telemetry: &mut dyn TelemetrySink<I>,
) where
    I: EngineInstant,
{
    telemetry.record(TelemetryEventKind::TxCompleted { state, result }, cx.now);
}

fn not_init<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    unhandled(cx, State::NotInit, event, telemetry)
}

fn joining<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.send_uplink(MessageKind::Join, None, JOIN_RADIO_TIMEOUT, telemetry);
            cx.arm(JOIN_RETRY);
            cx.indicate(Led::Red, LedPattern::Flash4Hz, UNTIL_CANCELLED);
            Transition::Stay
        }
        Event::Exit => {
            cx.hardware.cancel_indicator(Led::Red);
            Transition::Stay
        }
        Event::Timeout => {
            cx.send_uplink(MessageKind::Join, None, JOIN_RADIO_TIMEOUT, telemetry);
            cx.arm(JOIN_BACKOFF);
            Transition::Stay
        }
        Event::RadioTxStatus(result) => {
            tx_completed(cx, State::Joining, *result, telemetry);
            match result {
                TxResult::SentAndAcknowledged => Transition::To(State::Starting),
                TxResult::ErrorFatal => Transition::To(State::FatalError),
                _ => Transition::Stay,
            }
        }
        other => unhandled(cx, State::Joining, other, telemetry),
    }
}

fn starting<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.hardware.enable_sensor_interrupts();
            cx.indicate(Led::Orange, LedPattern::Solid, STARTUP_INDICATOR);
            cx.indicate(Led::Red, LedPattern::Solid, STARTUP_INDICATOR);
            Transition::To(State::OpWaiting)
        }
        other => unhandled(cx, State::Starting, other, telemetry),
    }
}

fn op_waiting<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.arm(IDLE_REPORT);
            Transition::Stay
        }
        Event::Timeout => Transition::To(State::OpTxAndWait),
        Event::SensorEdgeButton => Transition::To(State::TestDoor),
        Event::SensorEdgeHall => {
            let level = cx.hardware.hall_level();
            match level {
                HallLevel::Low => cx.cancel_indicators(),
                HallLevel::High => {
                    cx.hardware.cancel_indicator(Led::Orange);
                    cx.indicate(Led::Red, LedPattern::Solid, CLOSURE_ALERT);
                }
            }

            if cx.recorded_closure == Some(level) {
                return Transition::Stay;
            }
            cx.recorded_closure = Some(level);
            cx.payload.set_status(MessageKind::Door, Some(level));
            telemetry.record(TelemetryEventKind::ClosureChanged(level), cx.now);
            Transition::To(State::OpTxAndWait)
        }
        other => unhandled(cx, State::OpWaiting, other, telemetry),
    }
}

fn op_tx_and_wait<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            let level = cx.hardware.hall_level();
            match cx.send_uplink(MessageKind::Door, Some(level), RADIO_TIMEOUT, telemetry) {
                TxResult::Sent => {
                    cx.arm(TX_WAIT);
                    Transition::Stay
                }
                _ => Transition::To(State::OpSignalError),
            }
        }
        Event::Timeout => Transition::To(State::OpSignalTimeout),
        Event::RadioTxStatus(result) => {
            tx_completed(cx, State::OpTxAndWait, *result, telemetry);
            Transition::To(match result {
                TxResult::SentAndAcknowledged => State::OpSignalOk,
                TxResult::Timeout => State::OpSignalTimeout,
                _ => State::OpSignalError,
            })
        }
        other => unhandled(cx, State::OpTxAndWait, other, telemetry),
    }
}

fn op_signal_ok<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.indicate(Led::Orange, LedPattern::Solid, OK_SIGNAL);
            Transition::To(State::OpWaiting)
        }
        other => unhandled(cx, State::OpSignalOk, other, telemetry),
    }
}

/// Shared body of the two operational failure states.
///
/// A node whose last report was the baseline (closed) goes straight back to
/// idle; otherwise the open report is retried until it gets through.
fn op_signal_failure<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    state: State,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.indicate(Led::Orange, LedPattern::Flash4Hz, OK_SIGNAL);
            if cx.recorded_closure == Some(HallLevel::Low) {
                Transition::To(State::OpWaiting)
            } else {
                cx.arm(OP_RETRY);
                Transition::Stay
            }
        }
        Event::Exit => {
            cx.cancel_indicators();
            Transition::Stay
        }
        Event::Timeout => Transition::To(State::OpTxAndWait),
        other => unhandled(cx, state, other, telemetry),
    }
}

fn op_signal_timeout<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    op_signal_failure(cx, State::OpSignalTimeout, event, telemetry)
}

fn op_signal_error<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    op_signal_failure(cx, State::OpSignalError, event, telemetry)
}

fn test_door<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.reset_counters();
            cx.indicate(Led::Orange, LedPattern::Flash4Hz, TEST_WINDOW);
            cx.arm(TEST_WINDOW);
            Transition::Stay
        }
        Event::Exit => {
            cx.cancel_indicators();
            Transition::Stay
        }
        Event::Timeout => Transition::To(State::TestTxAndWait),
        Event::SensorEdgeHall => {
            match cx.hardware.hall_level() {
                HallLevel::Low => cx.hardware.cancel_indicator(Led::Red),
                HallLevel::High => cx.indicate(Led::Red, LedPattern::Solid, CLOSURE_ALERT),
            }
            Transition::Stay
        }
        other => unhandled(cx, State::TestDoor, other, telemetry),
    }
}

fn test_tx_and_wait<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.cancel_indicators();
            let level = cx.hardware.hall_level();
            match cx.send_uplink(MessageKind::Test, Some(level), RADIO_TIMEOUT, telemetry) {
                TxResult::Sent => {
                    cx.arm(TX_WAIT);
                    Transition::Stay
                }
                _ => Transition::To(State::TestSignalError),
            }
        }
        Event::Timeout => Transition::To(State::TestSignalTimeout),
        Event::RadioTxStatus(result) => {
            tx_completed(cx, State::TestTxAndWait, *result, telemetry);
            Transition::To(match result {
                TxResult::SentAndAcknowledged => State::TestSignalOk,
                TxResult::Timeout => State::TestSignalTimeout,
                _ => State::TestSignalError,
            })
        }
        other => unhandled(cx, State::TestTxAndWait, other, telemetry),
    }
}

fn test_signal_timeout<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.indicate(Led::Orange, LedPattern::Flash1Hz, TEST_TIMEOUT_SIGNAL);
            cx.arm(TEST_TIMEOUT_SIGNAL);
            Transition::Stay
        }
        Event::Exit => {
            cx.cancel_indicators();
            Transition::Stay
        }
        Event::Timeout => {
            if cx.bump(RetryCounter::Timeouts, telemetry) {
                Transition::To(State::TestRetryExhausted)
            } else {
                Transition::To(State::TestTxAndWait)
            }
        }
        other => unhandled(cx, State::TestSignalTimeout, other, telemetry),
    }
}

fn test_retry_exhausted<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.hardware.cancel_indicator(Led::Orange);
            cx.indicate(Led::Red, LedPattern::Flash4Hz, TEST_RETRY_EXHAUSTED);
            cx.arm(TEST_RETRY_EXHAUSTED);
            Transition::Stay
        }
        Event::Exit => {
            cx.cancel_indicators();
            Transition::Stay
        }
        Event::Timeout => {
            cx.request_restart(RestartReason::RetryExhausted);
            Transition::Stay
        }
        other => unhandled(cx, State::TestRetryExhausted, other, telemetry),
    }
}

fn test_signal_ok<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.indicate(Led::Orange, LedPattern::Solid, OK_SIGNAL);
            cx.arm(OK_SIGNAL);
            Transition::Stay
        }
        Event::Exit => {
            cx.cancel_indicators();
            Transition::Stay
        }
        Event::Timeout => Transition::To(State::OpWaiting),
        other => unhandled(cx, State::TestSignalOk, other, telemetry),
    }
}

fn test_signal_error<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.indicate(Led::Red, LedPattern::FlashHalfHz, TEST_ERROR_SIGNAL);
            cx.arm(TEST_ERROR_SIGNAL);
            Transition::Stay
        }
        Event::Exit => {
            cx.cancel_indicators();
            Transition::Stay
        }
        Event::Timeout => {
            if cx.bump(RetryCounter::Errors, telemetry) {
                Transition::To(State::TestTriesExhausted)
            } else {
                Transition::To(State::TestTxAndWait)
            }
        }
        other => unhandled(cx, State::TestSignalError, other, telemetry),
    }
}

fn test_tries_exhausted<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.indicate(Led::Red, LedPattern::Solid, TEST_TRIES_EXHAUSTED);
            cx.arm(TEST_TRIES_EXHAUSTED);
            Transition::Stay
        }
        Event::Exit => {
            cx.cancel_indicators();
            Transition::Stay
        }
        Event::Timeout => Transition::To(State::FatalError),
        other => unhandled(cx, State::TestTriesExhausted, other, telemetry),
    }
}

fn fatal_error<H, R, I>(
    cx: &mut NodeContext<H, R, I>,
    event: &Event,
    telemetry: &mut dyn TelemetrySink<I>,
) -> Transition
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    match event {
        Event::Enter => {
            cx.request_restart(RestartReason::Fatal);
            Transition::Stay
        }
        other => unhandled(cx, State::FatalError, other, telemetry),
    }
}

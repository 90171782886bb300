//! Finite-state control engine for the hatch sensor node.
//!
//! [`NodeEngine`] owns the current [`State`], the single [`StateTimer`] and
//! everything the handlers mutate (payload, recorded closure, retry counters).
//! Each dispatch runs the current state's handler and then applies the
//! returned [`Transition`]: disarm the timer, run `Exit`, switch state, run
//! `Enter`, and repeat while `Enter` keeps asking to move on. The cascade is
//! bounded by [`MAX_CASCADE_DEPTH`]; overrunning it is treated as a logic
//! error and escalates to a restart.
//!
//! A restart is reported once as [`DispatchOutcome::RestartRequested`]. From
//! then on the engine is halted and ignores every event until the board
//! resets.

mod handlers;
pub mod timer;
pub mod timing;

use core::fmt;
use core::ops::Add;
use core::time::Duration;

use crate::events::{Event, HallLevel, TxResult};
use crate::payload::{MessageKind, UplinkPayload};
use crate::ports::{IndicatorRequest, Led, LedPattern, NodeHardware, RadioLink};
use crate::telemetry::{TelemetryEventKind, TelemetryInstant, TelemetrySink};

pub use timer::StateTimer;

/// Counter value that must be exceeded before the test sequence gives up.
pub const RETRY_THRESHOLD: u8 = 5;

/// Maximum transitions applied for a single dispatched event.
pub const MAX_CASCADE_DEPTH: usize = 8;

/// Instant types the engine can schedule against.
pub trait EngineInstant: TelemetryInstant + Ord + Add<Duration, Output = Self> {}

impl<T> EngineInstant for T where T: TelemetryInstant + Ord + Add<Duration, Output = T> {}

/// Lifecycle phases of the node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    NotInit,
    Joining,
    Starting,
    OpWaiting,
    OpTxAndWait,
    OpSignalOk,
    OpSignalTimeout,
    OpSignalError,
    TestDoor,
    TestTxAndWait,
    TestSignalTimeout,
    TestRetryExhausted,
    TestSignalOk,
    TestSignalError,
    TestTriesExhausted,
    FatalError,
}

impl State {
    pub const ALL: [State; 16] = [
        State::NotInit,
        State::Joining,
        State::Starting,
        State::OpWaiting,
        State::OpTxAndWait,
        State::OpSignalOk,
        State::OpSignalTimeout,
        State::OpSignalError,
        State::TestDoor,
        State::TestTxAndWait,
        State::TestSignalTimeout,
        State::TestRetryExhausted,
        State::TestSignalOk,
        State::TestSignalError,
        State::TestTriesExhausted,
        State::FatalError,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            State::NotInit => "not-init",
            State::Joining => "joining",
            State::Starting => "starting",
            State::OpWaiting => "op-waiting",
            State::OpTxAndWait => "op-tx-wait",
            State::OpSignalOk => "op-signal-ok",
            State::OpSignalTimeout => "op-signal-timeout",
            State::OpSignalError => "op-signal-error",
            State::TestDoor => "test-door",
            State::TestTxAndWait => "test-tx-wait",
            State::TestSignalTimeout => "test-signal-timeout",
            State::TestRetryExhausted => "test-retry-exhausted",
            State::TestSignalOk => "test-signal-ok",
            State::TestSignalError => "test-signal-error",
            State::TestTriesExhausted => "test-tries-exhausted",
            State::FatalError => "fatal-error",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a handler wants to happen next.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transition {
    Stay,
    To(State),
}

/// Why the engine asked for a device reset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RestartReason {
    /// Test sequence saw too many consecutive radio timeouts.
    RetryExhausted,
    /// `FatalError` was entered.
    Fatal,
    /// Enter handlers did not settle within [`MAX_CASCADE_DEPTH`].
    CascadeLimit,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RestartReason::RetryExhausted => "retry-exhausted",
            RestartReason::Fatal => "fatal-error",
            RestartReason::CascadeLimit => "cascade-limit",
        })
    }
}

/// The two escalation counters of the test sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RetryCounter {
    Timeouts,
    Errors,
}

impl fmt::Display for RetryCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetryCounter::Timeouts => "timeouts",
            RetryCounter::Errors => "errors",
        })
    }
}

/// Result of feeding one event into the engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DispatchOutcome {
    /// All transitions applied; the engine rests in this state.
    Settled(State),
    /// The board must reset now. Reported exactly once.
    RestartRequested(RestartReason),
    /// A restart was already requested; the event was ignored.
    Halted,
}

/// Mutable data shared by every state handler.
#[derive(Clone)]
pub struct NodeContext<H, R, I> {
    hardware: H,
    radio: R,
    timer: StateTimer<I>,
    payload: UplinkPayload,
    recorded_closure: Option<HallLevel>,
    timeouts: u8,
    errors: u8,
    now: I,
    restart: Option<RestartReason>,
}

impl<H, R, I> NodeContext<H, R, I>
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    #[must_use]
    pub fn payload(&self) -> &UplinkPayload {
        &self.payload
    }

    /// Closure level last reported, `None` until the first hall change.
    #[must_use]
    pub fn recorded_closure(&self) -> Option<HallLevel> {
        self.recorded_closure
    }

    #[must_use]
    pub fn timer(&self) -> &StateTimer<I> {
        &self.timer
    }

    #[must_use]
    pub fn counter(&self, counter: RetryCounter) -> u8 {
        match counter {
            RetryCounter::Timeouts => self.timeouts,
            RetryCounter::Errors => self.errors,
        }
    }

    fn arm(&mut self, duration: Duration) {
        self.timer.arm(self.now, duration);
    }

    fn indicate(&mut self, led: Led, pattern: LedPattern, duration: Duration) {
        self.hardware
            .indicate(IndicatorRequest::new(led, pattern, duration));
    }

    fn cancel_indicators(&mut self) {
        for led in Led::ALL {
            self.hardware.cancel_indicator(led);
        }
    }

    fn reset_counters(&mut self) {
        self.timeouts = 0;
        self.errors = 0;
    }

    /// Advances `counter` and reports whether it crossed [`RETRY_THRESHOLD`].
    fn bump(&mut self, counter: RetryCounter, telemetry: &mut dyn TelemetrySink<I>) -> bool {
        let slot = match counter {
            RetryCounter::Timeouts => &mut self.timeouts,
            RetryCounter::Errors => &mut self.errors,
        };
        *slot = slot.saturating_add(1);
        let value = *slot;
        telemetry.record(
            TelemetryEventKind::CounterIncremented { counter, value },
            self.now,
        );
        value > RETRY_THRESHOLD
    }

    /// Fills in the payload for `kind`, samples the battery and hands the
    /// frame to the radio.
    fn send_uplink(
        &mut self,
        kind: MessageKind,
        level: Option<HallLevel>,
        timeout: Duration,
        telemetry: &mut dyn TelemetrySink<I>,
    ) -> TxResult {
        self.payload.set_status(kind, level);
        let battery_mv = self.hardware.battery_millivolts();
        self.payload.set_battery_millivolts(battery_mv);

        let result = self.radio.request_transmit(&self.payload, timeout);
        telemetry.record(
            TelemetryEventKind::UplinkRequested {
                kind,
                battery_mv,
                closure: self.payload.closure_flag(),
                result,
            },
            self.now,
        );
        result
    }

    fn request_restart(&mut self, reason: RestartReason) {
        self.restart.get_or_insert(reason);
    }
}

/// The node's state engine.
#[derive(Clone)]
pub struct NodeEngine<H, R, I> {
    state: State,
    cx: NodeContext<H, R, I>,
    halted: bool,
    lookup: fn(State) -> handlers::StateHandler<H, R, I>,
}

impl<H, R, I> NodeEngine<H, R, I>
where
    H: NodeHardware,
    R: RadioLink,
    I: EngineInstant,
{
    /// Builds an engine in [`State::NotInit`].
    pub fn new(hardware: H, radio: R, device_id: u16, now: I) -> Self {
        Self {
            state: State::NotInit,
            cx: NodeContext {
                hardware,
                radio,
                timer: StateTimer::new(),
                payload: UplinkPayload::new(device_id),
                recorded_closure: None,
                timeouts: 0,
                errors: 0,
                now,
                restart: None,
            },
            halted: false,
            lookup: handlers::handler_for::<H, R, I>,
        }
    }

    /// Replaces the handler table.
    #[cfg(test)]
    fn with_handlers(mut self, lookup: fn(State) -> handlers::StateHandler<H, R, I>) -> Self {
        self.lookup = lookup;
        self
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn context(&self) -> &NodeContext<H, R, I> {
        &self.cx
    }

    #[must_use]
    pub fn hardware(&self) -> &H {
        &self.cx.hardware
    }

    #[must_use]
    pub fn radio(&self) -> &R {
        &self.cx.radio
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.cx.hardware
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.cx.radio
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Deadline of the pending state timer, if armed.
    #[must_use]
    pub fn next_deadline(&self) -> Option<I> {
        self.cx.timer.deadline()
    }

    /// Leaves [`State::NotInit`] for [`State::Joining`] and runs its `Enter`.
    ///
    /// Has no effect once the engine has started.
    pub fn start(&mut self, now: I, telemetry: &mut dyn TelemetrySink<I>) -> DispatchOutcome {
        if self.halted {
            return DispatchOutcome::Halted;
        }
        if self.state != State::NotInit {
            return DispatchOutcome::Settled(self.state);
        }
        self.cx.now = now;
        self.apply(Transition::To(State::Joining), telemetry)
    }

    /// Runs the current state's handler for `event` and applies the result.
    pub fn dispatch(
        &mut self,
        event: &Event,
        now: I,
        telemetry: &mut dyn TelemetrySink<I>,
    ) -> DispatchOutcome {
        if self.halted {
            return DispatchOutcome::Halted;
        }
        self.cx.now = now;
        let next = self.invoke(event, telemetry);
        self.apply(next, telemetry)
    }

    /// Dispatches [`Event::Timeout`] if the state timer has expired.
    pub fn poll_timer(
        &mut self,
        now: I,
        telemetry: &mut dyn TelemetrySink<I>,
    ) -> Option<DispatchOutcome> {
        if self.halted || !self.cx.timer.expire(now) {
            return None;
        }
        Some(self.dispatch(&Event::Timeout, now, telemetry))
    }

    fn invoke(&mut self, event: &Event, telemetry: &mut dyn TelemetrySink<I>) -> Transition {
        let handler = (self.lookup)(self.state);
        handler(&mut self.cx, event, telemetry)
    }

    fn apply(
        &mut self,
        mut next: Transition,
        telemetry: &mut dyn TelemetrySink<I>,
    ) -> DispatchOutcome {
        let mut depth = 0;
        loop {
            if let Some(reason) = self.cx.restart.take() {
                return self.halt(reason, telemetry);
            }

            let Transition::To(target) = next else {
                return DispatchOutcome::Settled(self.state);
            };

            if depth == MAX_CASCADE_DEPTH {
                telemetry.record(
                    TelemetryEventKind::CascadeLimit { state: self.state },
                    self.cx.now,
                );
                return self.halt(RestartReason::CascadeLimit, telemetry);
            }
            depth += 1;

            self.cx.timer.disarm();
            // Exit handlers only clean up; their transition is ignored.
            let _ = self.invoke(&Event::Exit, telemetry);
            telemetry.record_transition(self.state, target, self.cx.now);
            self.state = target;
            next = self.invoke(&Event::Enter, telemetry);
        }
    }

    fn halt(
        &mut self,
        reason: RestartReason,
        telemetry: &mut dyn TelemetrySink<I>,
    ) -> DispatchOutcome {
        self.halted = true;
        self.cx.timer.disarm();
        telemetry.record(TelemetryEventKind::RestartRequested(reason), self.cx.now);
        DispatchOutcome::RestartRequested(reason)
    }
}

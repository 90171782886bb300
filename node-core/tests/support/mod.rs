#![allow(dead_code)]

use core::ops::Add;
use core::time::Duration;
use std::collections::VecDeque;

use node_core::engine::{DispatchOutcome, NodeEngine, State};
use node_core::events::{Event, HallLevel, TxResult};
use node_core::payload::UplinkPayload;
use node_core::ports::{IndicatorRequest, Led, NodeHardware, RadioLink};
use node_core::telemetry::{TelemetryEventKind, TelemetryInstant, TelemetryRecorder};

pub const DEVICE_ID: u16 = 0x00aa;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MockInstant(u64);

impl MockInstant {
    pub fn micros(value: u64) -> Self {
        Self(value)
    }

    pub fn secs(value: u64) -> Self {
        Self(value * 1_000_000)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs.as_micros() as u64)
    }
}

impl TelemetryInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

#[derive(Clone, Debug)]
pub struct MockHardware {
    pub battery_mv: u16,
    pub hall: HallLevel,
    pub interrupts_enabled: u32,
    pub indications: Vec<IndicatorRequest>,
    pub cancelled: Vec<Led>,
}

impl MockHardware {
    pub fn new() -> Self {
        Self {
            battery_mv: 3_100,
            hall: HallLevel::Low,
            interrupts_enabled: 0,
            indications: Vec::new(),
            cancelled: Vec::new(),
        }
    }
}

impl NodeHardware for MockHardware {
    fn battery_millivolts(&mut self) -> u16 {
        self.battery_mv
    }

    fn hall_level(&mut self) -> HallLevel {
        self.hall
    }

    fn enable_sensor_interrupts(&mut self) {
        self.interrupts_enabled += 1;
    }

    fn indicate(&mut self, request: IndicatorRequest) {
        self.indications.push(request);
    }

    fn cancel_indicator(&mut self, led: Led) {
        self.cancelled.push(led);
    }
}

/// Radio link that records frames and answers from a script, defaulting to
/// [`TxResult::Sent`].
#[derive(Clone, Debug, Default)]
pub struct MockRadio {
    pub scripted: VecDeque<TxResult>,
    pub frames: Vec<(UplinkPayload, Duration)>,
}

impl RadioLink for MockRadio {
    fn request_transmit(&mut self, payload: &UplinkPayload, timeout: Duration) -> TxResult {
        self.frames.push((*payload, timeout));
        self.scripted.pop_front().unwrap_or(TxResult::Sent)
    }
}

pub type TestEngine = NodeEngine<MockHardware, MockRadio, MockInstant>;
pub type Recorder = TelemetryRecorder<MockInstant, 512>;

pub struct Harness {
    pub engine: TestEngine,
    pub telemetry: Recorder,
    pub now: MockInstant,
    pub restarts: u32,
}

impl Harness {
    /// Engine after `start`, sitting in `Joining`.
    pub fn booted() -> Self {
        let mut harness = Self {
            engine: NodeEngine::new(
                MockHardware::new(),
                MockRadio::default(),
                DEVICE_ID,
                MockInstant::micros(0),
            ),
            telemetry: Recorder::new(),
            now: MockInstant::micros(0),
            restarts: 0,
        };
        let outcome = harness
            .engine
            .start(harness.now, &mut harness.telemetry);
        harness.observe(outcome);
        harness
    }

    /// Engine after a successful join, idle in `OpWaiting`.
    pub fn joined() -> Self {
        let mut harness = Self::booted();
        harness.dispatch(Event::RadioTxStatus(TxResult::SentAndAcknowledged));
        assert_eq!(harness.engine.state(), State::OpWaiting);
        harness
    }

    /// Engine inside the test sequence, waiting on its first frame.
    pub fn in_test_tx() -> Self {
        let mut harness = Self::joined();
        harness.dispatch(Event::SensorEdgeButton);
        assert_eq!(harness.engine.state(), State::TestDoor);
        harness.fire_timer();
        assert_eq!(harness.engine.state(), State::TestTxAndWait);
        harness
    }

    pub fn dispatch(&mut self, event: Event) -> DispatchOutcome {
        let outcome = self
            .engine
            .dispatch(&event, self.now, &mut self.telemetry);
        self.observe(outcome)
    }

    /// Moves the clock to the pending deadline and delivers the timeout.
    pub fn fire_timer(&mut self) -> DispatchOutcome {
        let deadline = self.engine.next_deadline().expect("timer should be armed");
        self.now = deadline;
        let outcome = self
            .engine
            .poll_timer(self.now, &mut self.telemetry)
            .expect("deadline reached");
        self.observe(outcome)
    }

    pub fn set_hall(&mut self, level: HallLevel) {
        self.engine.hardware_mut().hall = level;
    }

    pub fn armed_for(&self) -> Option<Duration> {
        self.engine.context().timer().armed_for()
    }

    pub fn frames(&self) -> &[(UplinkPayload, Duration)] {
        &self.engine.radio().frames
    }

    pub fn hardware(&self) -> &MockHardware {
        self.engine.hardware()
    }

    pub fn transitions(&self) -> Vec<(State, State)> {
        self.telemetry
            .oldest_first()
            .filter_map(|record| match record.event {
                TelemetryEventKind::Transition { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<TelemetryEventKind> {
        self.telemetry
            .oldest_first()
            .map(|record| record.event)
            .collect()
    }

    fn observe(&mut self, outcome: DispatchOutcome) -> DispatchOutcome {
        if matches!(outcome, DispatchOutcome::RestartRequested(_)) {
            self.restarts += 1;
        }
        outcome
    }
}

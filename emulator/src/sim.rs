//! Simulated clock, board and LoRaWAN stack for the emulator.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::ops::Add;
use std::time::Duration;

use embassy_futures::yield_now;
use embedded_hal_async::delay::DelayNs;
use node_core::bridge::{Endpoint, RadioStack, Received, SendStatus, StackError, StackEvent};
use node_core::events::HallLevel;
use node_core::ports::{IndicatorRequest, Led, NodeHardware};
use node_core::telemetry::TelemetryInstant;

use crate::commands::RadioOutcome;

/// Stack code reported for a send scripted with `radio fatal`.
pub const FATAL_SEND_CODE: i16 = -1;

/// Battery reading of the simulated board.
pub const SIM_BATTERY_MV: u16 = 3_050;

/// Virtual time in microseconds since the session started.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(u64);

impl SimInstant {
    pub const ZERO: SimInstant = SimInstant(0);

    pub fn since_start(self) -> Duration {
        Duration::from_micros(self.0)
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(micros))
    }
}

impl TelemetryInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for SimInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0 / 1_000;
        write!(f, "t+{}.{:03}s", millis / 1_000, millis % 1_000)
    }
}

/// Board with a fixed battery, a settable hall sensor and two LEDs.
#[derive(Debug)]
pub struct SimHardware {
    pub hall: HallLevel,
    pub armed: bool,
    /// Clock used to expire LED patterns, kept in step by the session.
    pub now: SimInstant,
    leds: [Option<(IndicatorRequest, SimInstant)>; 2],
    notes: Vec<String>,
}

impl SimHardware {
    pub fn new(hall: HallLevel) -> Self {
        Self {
            hall,
            armed: false,
            now: SimInstant::ZERO,
            leds: [None; 2],
            notes: Vec::new(),
        }
    }

    /// Pattern still running on `led` at the current clock.
    pub fn active_pattern(&self, led: Led) -> Option<IndicatorRequest> {
        let (request, started) = self.leds[led.as_index()]?;
        if request.is_indefinite() || self.now < started + request.duration {
            Some(request)
        } else {
            None
        }
    }

    /// Indicator activity since the last call.
    pub fn take_notes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notes)
    }
}

impl NodeHardware for SimHardware {
    fn battery_millivolts(&mut self) -> u16 {
        SIM_BATTERY_MV
    }

    fn hall_level(&mut self) -> HallLevel {
        self.hall
    }

    fn enable_sensor_interrupts(&mut self) {
        self.armed = true;
        self.notes.push("sensors armed".to_string());
    }

    fn indicate(&mut self, request: IndicatorRequest) {
        if let Some(running) = self.active_pattern(request.led)
            && running.priority > request.priority
        {
            return;
        }
        self.leds[request.led.as_index()] = Some((request, self.now));
        self.notes.push(describe_indication(&request));
    }

    fn cancel_indicator(&mut self, led: Led) {
        if self.leds[led.as_index()].take().is_some() {
            self.notes.push(format!("led {} off", led.label()));
        }
    }
}

pub fn describe_indication(request: &IndicatorRequest) -> String {
    if request.is_indefinite() {
        format!(
            "led {} {} until cancelled",
            request.led.label(),
            request.pattern.label()
        )
    } else {
        format!(
            "led {} {} for {}ms",
            request.led.label(),
            request.pattern.label(),
            request.duration.as_millis()
        )
    }
}

/// Stack whose completions come from a script instead of the air.
///
/// An accepted frame without a scripted outcome is acknowledged.
#[derive(Debug, Default)]
pub struct SimStack {
    outcomes: RefCell<VecDeque<RadioOutcome>>,
    busy: Cell<bool>,
    downlinks: RefCell<VecDeque<(u8, Vec<u8>)>>,
    frames: RefCell<Vec<(u8, Vec<u8>)>>,
}

impl SimStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, outcome: RadioOutcome) {
        self.outcomes.borrow_mut().push_back(outcome);
    }

    pub fn reject_next_send(&self) {
        self.busy.set(true);
    }

    pub fn queue_downlink(&self, port: u8, data: Vec<u8>) {
        self.downlinks.borrow_mut().push_back((port, data));
    }

    pub fn scripted(&self) -> Vec<RadioOutcome> {
        self.outcomes.borrow().iter().copied().collect()
    }

    pub fn busy_pending(&self) -> bool {
        self.busy.get()
    }

    pub fn pending_downlinks(&self) -> usize {
        self.downlinks.borrow().len()
    }

    /// Frames accepted so far, with their port.
    pub fn frames(&self) -> Vec<(u8, Vec<u8>)> {
        self.frames.borrow().clone()
    }
}

impl RadioStack for SimStack {
    fn open(&self, endpoint: Endpoint) -> Result<(), StackError> {
        match endpoint {
            Endpoint::Transmit { port } | Endpoint::Receive { port }
                if port == 0 || port > 223 =>
            {
                Err(StackError::InvalidPort(port))
            }
            _ => Ok(()),
        }
    }

    fn send(&self, port: u8, frame: &[u8]) -> SendStatus {
        if self.busy.replace(false) {
            return SendStatus::PortBusy;
        }
        let mut outcomes = self.outcomes.borrow_mut();
        if outcomes.front() == Some(&RadioOutcome::Fatal) {
            outcomes.pop_front();
            return SendStatus::Failed(FATAL_SEND_CODE);
        }
        self.frames.borrow_mut().push((port, frame.to_vec()));
        SendStatus::Queued
    }

    async fn wait_tx_event(&self, _timeout: Duration) -> StackEvent {
        match self.outcomes.borrow_mut().pop_front() {
            Some(RadioOutcome::Sent) => StackEvent::Sent,
            Some(RadioOutcome::Timeout) => StackEvent::None,
            Some(RadioOutcome::Error | RadioOutcome::Fatal) => StackEvent::Error,
            Some(RadioOutcome::Ack) | None => StackEvent::Acknowledged,
        }
    }

    async fn receive(&self, buffer: &mut [u8], _timeout: Duration) -> Option<Received> {
        // The receive window opens after the completion was posted; give the
        // control side a turn to consume it first.
        yield_now().await;
        let (port, data) = self.downlinks.borrow_mut().pop_front()?;
        let len = data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&data[..len]);
        Some(Received { port, len })
    }
}

/// The bridge only delays when both endpoints are disabled, which the
/// emulator never configures.
pub struct NoDelay;

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

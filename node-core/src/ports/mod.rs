//! Board-facing seams of the state engine.
//!
//! [`NodeHardware`] covers the sensors, the battery ADC and the indicator
//! LEDs; [`RadioLink`] is the engine's view of the transport bridge. Both
//! are synchronous and must not block: anything slow happens on another task
//! and reports back through the mailbox.

use core::time::Duration;

use crate::events::{HallLevel, TxResult};
use crate::payload::UplinkPayload;

/// Indicator LEDs fitted to the node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Led {
    Orange,
    Red,
}

impl Led {
    pub const ALL: [Led; 2] = [Led::Orange, Led::Red];

    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            Led::Orange => 0,
            Led::Red => 1,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Led::Orange => "orange",
            Led::Red => "red",
        }
    }
}

/// Blink patterns understood by the indicator service.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LedPattern {
    Solid,
    Flash4Hz,
    Flash1Hz,
    FlashHalfHz,
}

impl LedPattern {
    /// Half of the blink period, or `None` for a steady light.
    #[must_use]
    pub const fn half_period(self) -> Option<Duration> {
        match self {
            LedPattern::Solid => None,
            LedPattern::Flash4Hz => Some(Duration::from_millis(125)),
            LedPattern::Flash1Hz => Some(Duration::from_millis(500)),
            LedPattern::FlashHalfHz => Some(Duration::from_secs(1)),
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            LedPattern::Solid => "solid",
            LedPattern::Flash4Hz => "4Hz",
            LedPattern::Flash1Hz => "1Hz",
            LedPattern::FlashHalfHz => "0.5Hz",
        }
    }
}

/// Whether a request may replace a pattern already running on the LED.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum LedPriority {
    Background,
    Interrupt,
}

/// A single indicator request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IndicatorRequest {
    pub led: Led,
    pub pattern: LedPattern,
    /// How long to show the pattern; zero means until cancelled.
    pub duration: Duration,
    pub priority: LedPriority,
}

impl IndicatorRequest {
    /// Builds an interrupting request, the priority every engine request uses.
    #[must_use]
    pub const fn new(led: Led, pattern: LedPattern, duration: Duration) -> Self {
        Self {
            led,
            pattern,
            duration,
            priority: LedPriority::Interrupt,
        }
    }

    /// `true` when the pattern runs until cancelled.
    #[must_use]
    pub const fn is_indefinite(&self) -> bool {
        self.duration.is_zero()
    }
}

/// Sensors, battery and indicators as seen by the state engine.
pub trait NodeHardware {
    /// Current battery voltage in millivolts.
    fn battery_millivolts(&mut self) -> u16;

    /// Current level of the closure sensor.
    fn hall_level(&mut self) -> HallLevel;

    /// Arms the button and hall interrupts. Called once after the join.
    fn enable_sensor_interrupts(&mut self);

    /// Starts an indicator pattern.
    fn indicate(&mut self, request: IndicatorRequest);

    /// Stops whatever pattern is running on `led`.
    fn cancel_indicator(&mut self, led: Led);
}

/// Transmit side of the radio transport, as seen by the state engine.
pub trait RadioLink {
    /// Hands `payload` to the radio and returns the immediate classification.
    ///
    /// The final outcome arrives later as a
    /// [`RadioTxStatus`](crate::events::Event::RadioTxStatus) event.
    fn request_transmit(&mut self, payload: &UplinkPayload, timeout: Duration) -> TxResult;
}

//! Events consumed by the node state engine.
//!
//! `Enter` and `Exit` are produced by the engine itself while it brackets a
//! transition. Everything else arrives through the [`Mailbox`](crate::mailbox::Mailbox)
//! from interrupt handlers, the state timer, or the radio transport bridge.

use core::fmt;

use heapless::Vec;

/// Largest application payload a LoRaWAN downlink can carry.
pub const MAX_DOWNLINK_LEN: usize = 242;

/// Outcome of a radio transmission, as classified by the transport bridge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TxResult {
    /// Frame left the radio; no acknowledgement was requested or observed.
    Sent,
    /// Frame left the radio and the network acknowledged it.
    SentAndAcknowledged,
    /// No completion was reported before the request timeout.
    Timeout,
    /// Transient failure; the request may be retried.
    ErrorRetryable,
    /// The stack rejected the request in a way retries will not fix.
    ErrorFatal,
}

impl TxResult {
    /// Short label used in logs and console output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            TxResult::Sent => "sent",
            TxResult::SentAndAcknowledged => "acked",
            TxResult::Timeout => "timeout",
            TxResult::ErrorRetryable => "error-retry",
            TxResult::ErrorFatal => "error-fatal",
        }
    }
}

impl fmt::Display for TxResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sampled level of the magnetic closure sensor.
///
/// `Low` is the baseline reading (closure shut).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HallLevel {
    Low,
    High,
}

impl HallLevel {
    /// Maps a raw pin reading (0 or non-zero) to a level.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        if raw == 0 { HallLevel::Low } else { HallLevel::High }
    }

    /// Returns the raw pin value (0 or 1).
    #[must_use]
    pub const fn as_raw(self) -> u8 {
        match self {
            HallLevel::Low => 0,
            HallLevel::High => 1,
        }
    }
}

impl fmt::Display for HallLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

/// Application data received in a downlink window.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Downlink {
    pub port: u8,
    pub data: Vec<u8, MAX_DOWNLINK_LEN>,
}

impl Downlink {
    /// Copies `bytes` into an owned downlink, truncating anything beyond
    /// [`MAX_DOWNLINK_LEN`].
    #[must_use]
    pub fn from_slice(port: u8, bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_DOWNLINK_LEN);
        let mut data = Vec::new();
        // Cannot fail: `len` is bounded by the capacity.
        let _ = data.extend_from_slice(&bytes[..len]);
        Self { port, data }
    }
}

/// Port and length of a downlink held by the transport bridge.
///
/// The bytes stay with the bridge until the control task asks for them
/// through [`TransportBridge::take_downlink`](crate::bridge::TransportBridge::take_downlink).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DownlinkNotice {
    pub port: u8,
    pub len: u8,
}

impl DownlinkNotice {
    #[must_use]
    pub fn of(downlink: &Downlink) -> Self {
        Self {
            port: downlink.port,
            len: u8::try_from(downlink.data.len()).unwrap_or(u8::MAX),
        }
    }
}

/// Events dispatched into the node state engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Enter,
    Exit,
    Timeout,
    RadioTxStatus(TxResult),
    RadioRxData(DownlinkNotice),
    SensorEdgeHall,
    SensorEdgeButton,
}

impl Event {
    /// Returns the payload-free discriminant of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Event::Enter => EventKind::Enter,
            Event::Exit => EventKind::Exit,
            Event::Timeout => EventKind::Timeout,
            Event::RadioTxStatus(_) => EventKind::RadioTxStatus,
            Event::RadioRxData(_) => EventKind::RadioRxData,
            Event::SensorEdgeHall => EventKind::SensorEdgeHall,
            Event::SensorEdgeButton => EventKind::SensorEdgeButton,
        }
    }

    /// `true` for events only the engine itself may generate.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        self.kind().is_internal()
    }
}

/// Payload-free event tag, cheap to copy into telemetry and error values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventKind {
    Enter,
    Exit,
    Timeout,
    RadioTxStatus,
    RadioRxData,
    SensorEdgeHall,
    SensorEdgeButton,
}

impl EventKind {
    #[must_use]
    pub const fn is_internal(self) -> bool {
        matches!(self, EventKind::Enter | EventKind::Exit)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            EventKind::Enter => "enter",
            EventKind::Exit => "exit",
            EventKind::Timeout => "timeout",
            EventKind::RadioTxStatus => "radio-tx-status",
            EventKind::RadioRxData => "radio-rx-data",
            EventKind::SensorEdgeHall => "hall-edge",
            EventKind::SensorEdgeButton => "button-edge",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

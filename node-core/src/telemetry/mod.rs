//! Structured record of what the state engine did.
//!
//! The engine never logs directly. It writes [`TelemetryRecord`]s into a
//! fixed-capacity ring and the firmware (or emulator) mirrors fresh records to
//! its own log sink.

use core::fmt;
use core::time::Duration;

use heapless::{HistoryBuf, OldestOrdered};

use crate::engine::{RestartReason, RetryCounter, State};
use crate::events::{EventKind, HallLevel, TxResult};
use crate::payload::MessageKind;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Everything the engine reports.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    /// Current state changed. `dwell` is the time spent in `from`.
    Transition {
        from: State,
        to: State,
        dwell: Option<Duration>,
    },
    /// The current state has no handler for this event.
    Unhandled { state: State, event: EventKind },
    /// A frame was handed to the radio link.
    UplinkRequested {
        kind: MessageKind,
        battery_mv: u16,
        closure: u8,
        result: TxResult,
    },
    /// A radio completion arrived while the engine was in `state`.
    TxCompleted { state: State, result: TxResult },
    /// A hall edge moved the recorded closure level.
    ClosureChanged(HallLevel),
    /// One of the test-sequence retry counters advanced.
    CounterIncremented { counter: RetryCounter, value: u8 },
    /// Enter handlers kept cascading past the allowed depth.
    CascadeLimit { state: State },
    /// The engine asked for a device reset and halted.
    RestartRequested(RestartReason),
    /// Producers hit an occupied mailbox; `total` is the running drop count.
    MailboxOverflow { total: u32 },
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::Transition { from, to, dwell } => {
                write!(f, "transition {from} -> {to}")?;
                if let Some(dwell) = dwell {
                    write!(f, " after {}ms", dwell.as_millis())?;
                }
                Ok(())
            }
            TelemetryEventKind::Unhandled { state, event } => {
                write!(f, "unhandled {event} in {state}")
            }
            TelemetryEventKind::UplinkRequested {
                kind,
                battery_mv,
                closure,
                result,
            } => write!(
                f,
                "uplink {} closure={closure} vbat={battery_mv}mV -> {result}",
                kind.label()
            ),
            TelemetryEventKind::TxCompleted { state, result } => {
                write!(f, "tx-complete {result} in {state}")
            }
            TelemetryEventKind::ClosureChanged(level) => write!(f, "closure-changed {level}"),
            TelemetryEventKind::CounterIncremented { counter, value } => {
                write!(f, "{counter} count={value}")
            }
            TelemetryEventKind::CascadeLimit { state } => write!(f, "cascade-limit at {state}"),
            TelemetryEventKind::RestartRequested(reason) => write!(f, "restart {reason}"),
            TelemetryEventKind::MailboxOverflow { total } => {
                write!(f, "mailbox-overflow total={total}")
            }
        }
    }
}

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Destination for engine telemetry.
pub trait TelemetrySink<TInstant> {
    /// Records a state change.
    fn record_transition(&mut self, from: State, to: State, timestamp: TInstant) -> EventId;

    /// Records any other event.
    fn record(&mut self, event: TelemetryEventKind, timestamp: TInstant) -> EventId;
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_transition_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_transition_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Records with an id at or after `mark`, oldest first.
    ///
    /// Pass the value of [`next_id`](Self::next_id) taken before a dispatch to
    /// see only what that dispatch produced.
    pub fn since(&self, mark: EventId) -> impl Iterator<Item = &TelemetryRecord<TInstant>> {
        self.ring
            .oldest_ordered()
            .filter(move |record| record.id.wrapping_sub(mark) < EventId::MAX / 2)
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    /// Identifier the next record will receive.
    #[must_use]
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records a state change and the dwell time since the previous one.
    pub fn record_transition(&mut self, from: State, to: State, timestamp: TInstant) -> EventId {
        let dwell = self
            .last_transition_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_transition_at = Some(timestamp);
        self.record(TelemetryEventKind::Transition { from, to, dwell }, timestamp)
    }

    /// Records an arbitrary telemetry event.
    pub fn record(&mut self, event: TelemetryEventKind, timestamp: TInstant) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> TelemetrySink<TInstant>
    for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn record_transition(&mut self, from: State, to: State, timestamp: TInstant) -> EventId {
        TelemetryRecorder::record_transition(self, from, to, timestamp)
    }

    fn record(&mut self, event: TelemetryEventKind, timestamp: TInstant) -> EventId {
        TelemetryRecorder::record(self, event, timestamp)
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct TestInstant(u64);

    impl TelemetryInstant for TestInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    #[test]
    fn transitions_track_dwell_time() {
        let mut recorder = TelemetryRecorder::<TestInstant, 8>::new();
        recorder.record_transition(State::NotInit, State::Joining, TestInstant(10));
        recorder.record_transition(State::Joining, State::Starting, TestInstant(2_010));

        let records: heapless::Vec<_, 8> = recorder.oldest_first().copied().collect();
        assert_eq!(
            records[0].event,
            TelemetryEventKind::Transition {
                from: State::NotInit,
                to: State::Joining,
                dwell: None,
            }
        );
        assert_eq!(
            records[1].event,
            TelemetryEventKind::Transition {
                from: State::Joining,
                to: State::Starting,
                dwell: Some(Duration::from_micros(2_000)),
            }
        );
    }

    #[test]
    fn since_filters_older_records() {
        let mut recorder = TelemetryRecorder::<TestInstant, 8>::new();
        recorder.record(
            TelemetryEventKind::ClosureChanged(HallLevel::High),
            TestInstant(1),
        );
        let mark = recorder.next_id();
        recorder.record(
            TelemetryEventKind::ClosureChanged(HallLevel::Low),
            TestInstant(2),
        );

        let fresh: heapless::Vec<_, 8> = recorder.since(mark).map(|record| record.event).collect();
        assert_eq!(
            fresh.as_slice(),
            &[TelemetryEventKind::ClosureChanged(HallLevel::Low)]
        );
    }

    #[test]
    fn ring_keeps_only_the_newest_entries() {
        let mut recorder = TelemetryRecorder::<TestInstant, 2>::new();
        for total in 0..5 {
            recorder.record(TelemetryEventKind::MailboxOverflow { total }, TestInstant(0));
        }
        assert_eq!(recorder.len(), 2);
        assert_eq!(
            recorder.latest().map(|record| record.event),
            Some(TelemetryEventKind::MailboxOverflow { total: 4 })
        );
    }
}

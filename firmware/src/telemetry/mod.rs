//! Telemetry ring and log mirror for the control task.
//!
//! The engine records into a [`TelemetryRecorder`]; after each dispatch the
//! control task calls [`TelemetryLog::mirror`] so every new record shows up on
//! defmt (or stdout when built for the host).

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use node_core::bridge::ServiceReport;
use node_core::engine::State;
use node_core::telemetry::{
    EventId, TelemetryEventKind, TelemetryRecord, TelemetryRecorder, TelemetrySink,
};

use crate::instant::FirmwareInstant;

/// Ring owned by the control task plus the id of the next record to log.
pub struct TelemetryLog {
    recorder: TelemetryRecorder<FirmwareInstant>,
    mirrored: EventId,
}

impl TelemetryLog {
    pub const fn new() -> Self {
        Self {
            recorder: TelemetryRecorder::new(),
            mirrored: 0,
        }
    }

    pub fn recorder(&self) -> &TelemetryRecorder<FirmwareInstant> {
        &self.recorder
    }

    /// Logs every record added since the previous call and returns how many.
    pub fn mirror(&mut self) -> usize {
        let mut count = 0;
        for record in self.recorder.since(self.mirrored) {
            log_record(record);
            count += 1;
        }
        self.mirrored = self.recorder.next_id();
        count
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink<FirmwareInstant> for TelemetryLog {
    fn record_transition(&mut self, from: State, to: State, timestamp: FirmwareInstant) -> EventId {
        self.recorder.record_transition(from, to, timestamp)
    }

    fn record(&mut self, event: TelemetryEventKind, timestamp: FirmwareInstant) -> EventId {
        self.recorder.record(event, timestamp)
    }
}

const fn is_warning(event: &TelemetryEventKind) -> bool {
    matches!(
        event,
        TelemetryEventKind::CascadeLimit { .. }
            | TelemetryEventKind::RestartRequested(_)
            | TelemetryEventKind::MailboxOverflow { .. }
    )
}

#[cfg(target_os = "none")]
fn log_record(record: &TelemetryRecord<FirmwareInstant>) {
    if is_warning(&record.event) {
        defmt::warn!(
            "telemetry #{} t={}us {}",
            record.id,
            record.timestamp.as_micros(),
            defmt::Display2Format(&record.event)
        );
    } else {
        defmt::info!(
            "telemetry #{} t={}us {}",
            record.id,
            record.timestamp.as_micros(),
            defmt::Display2Format(&record.event)
        );
    }
}

#[cfg(not(target_os = "none"))]
fn log_record(record: &TelemetryRecord<FirmwareInstant>) {
    let level = if is_warning(&record.event) { "WARN" } else { "INFO" };
    println!(
        "{level} telemetry #{} t={}us {}",
        record.id,
        record.timestamp.as_micros(),
        record.event
    );
}

/// Logs what one bridge iteration delivered.
#[cfg(target_os = "none")]
pub fn log_service_report(report: &ServiceReport) {
    if let Some(completion) = &report.completion {
        match completion.delivery {
            Ok(()) => defmt::info!("bridge: completion {}", completion.result.label()),
            Err(error) => defmt::warn!(
                "bridge: completion {} not delivered: {}",
                completion.result.label(),
                defmt::Display2Format(&error)
            ),
        }
    }
    if let Some(downlink) = &report.downlink {
        match downlink.delivery {
            Ok(()) => defmt::info!("bridge: downlink port={} len={}", downlink.port, downlink.len),
            Err(error) => defmt::warn!(
                "bridge: downlink port={} dropped: {}",
                downlink.port,
                defmt::Display2Format(&error)
            ),
        }
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_service_report(report: &ServiceReport) {
    if let Some(completion) = &report.completion {
        match completion.delivery {
            Ok(()) => println!("bridge: completion {}", completion.result),
            Err(error) => println!(
                "bridge: completion {} not delivered: {error}",
                completion.result
            ),
        }
    }
    if let Some(downlink) = &report.downlink {
        match downlink.delivery {
            Ok(()) => println!("bridge: downlink port={} len={}", downlink.port, downlink.len),
            Err(error) => println!("bridge: downlink port={} dropped: {error}", downlink.port),
        }
    }
}

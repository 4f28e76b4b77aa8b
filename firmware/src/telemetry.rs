//! Mirrors passthrough telemetry to defmt on target and stdout on the host.

use auth_core::telemetry::{EventId, TelemetryEventKind, TelemetryRecord, TelemetryRecorder};

use crate::time::FirmwareInstant;

/// Log level a telemetry event is mirrored at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Severity {
    Info,
    Warn,
}

impl Severity {
    /// Failures and rejected devices are warnings; lifecycle events are info.
    #[must_use]
    pub const fn of(event: TelemetryEventKind) -> Self {
        match event {
            TelemetryEventKind::SetupFailed(_)
            | TelemetryEventKind::DeviceRejected
            | TelemetryEventKind::EnumerationFailed
            | TelemetryEventKind::HostModeRearmFailed
            | TelemetryEventKind::ChallengeAborted
            | TelemetryEventKind::SignatureAborted => Severity::Warn,
            _ => Severity::Info,
        }
    }

    #[cfg_attr(target_os = "none", allow(dead_code))]
    const fn label(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
        }
    }
}

/// Tracks which records of a [`TelemetryRecorder`] were already logged.
#[derive(Debug, Default)]
pub struct TelemetryMirror {
    next: EventId,
    dropped: u32,
}

impl TelemetryMirror {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: 0,
            dropped: 0,
        }
    }

    /// Logs every record added since the previous call.
    pub fn drain(&mut self, recorder: &TelemetryRecorder<FirmwareInstant>) -> usize {
        self.drain_with(recorder, emit)
    }

    /// Records that were overwritten in the ring before they could be logged.
    #[must_use]
    pub const fn dropped(&self) -> u32 {
        self.dropped
    }

    fn drain_with<F>(&mut self, recorder: &TelemetryRecorder<FirmwareInstant>, mut sink: F) -> usize
    where
        F: FnMut(Severity, &TelemetryRecord<FirmwareInstant>),
    {
        let mut emitted = 0;
        for record in recorder.since(self.next) {
            if emitted == 0 && record.id != self.next {
                let skipped = record.id.wrapping_sub(self.next);
                self.dropped = self.dropped.saturating_add(skipped);
                emit_dropped(skipped);
            }
            sink(Severity::of(record.event), record);
            emitted += 1;
        }
        self.next = recorder.next_event_id();
        emitted
    }
}

#[cfg(target_os = "none")]
fn emit(severity: Severity, record: &TelemetryRecord<FirmwareInstant>) {
    let timestamp_us = record.timestamp.as_micros();
    match severity {
        Severity::Info => defmt::info!(
            "telemetry:passthrough t={}us {}",
            timestamp_us,
            defmt::Display2Format(record)
        ),
        Severity::Warn => defmt::warn!(
            "telemetry:passthrough t={}us {}",
            timestamp_us,
            defmt::Display2Format(record)
        ),
    }
}

#[cfg(not(target_os = "none"))]
fn emit(severity: Severity, record: &TelemetryRecord<FirmwareInstant>) {
    println!(
        "telemetry:passthrough [{}] t={}us {}",
        severity.label(),
        record.timestamp.as_micros(),
        record
    );
}

#[cfg(target_os = "none")]
fn emit_dropped(count: u32) {
    defmt::warn!("telemetry:passthrough {} records overwritten", count);
}

#[cfg(not(target_os = "none"))]
fn emit_dropped(count: u32) {
    println!("telemetry:passthrough [warn] {count} records overwritten");
}

//! Telemetry event catalog and ring buffer for the auth passthrough.
//!
//! The engine records lifecycle transitions (setup, attach/detach, challenge
//! and signature progress) here instead of logging directly, so firmware can
//! mirror them to defmt and host tooling can print them. Event kinds encode to
//! compact numeric codes for transport over diagnostics channels.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::bridge::{ConnectionStatus, DeviceIdentity};

/// Identifier assigned to each telemetry record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Setup step that failed and latched the engine inert.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SetupStage {
    Reset,
    ExistenceProbe,
    BaudRate,
    HostMode,
}

impl SetupStage {
    const fn index(self) -> u16 {
        match self {
            SetupStage::Reset => 0,
            SetupStage::ExistenceProbe => 1,
            SetupStage::BaudRate => 2,
            SetupStage::HostMode => 3,
        }
    }

    const fn from_index(index: u16) -> Option<Self> {
        match index {
            0 => Some(SetupStage::Reset),
            1 => Some(SetupStage::ExistenceProbe),
            2 => Some(SetupStage::BaudRate),
            3 => Some(SetupStage::HostMode),
            _ => None,
        }
    }
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStage::Reset => f.write_str("reset"),
            SetupStage::ExistenceProbe => f.write_str("existence-probe"),
            SetupStage::BaudRate => f.write_str("baud-rate"),
            SetupStage::HostMode => f.write_str("host-mode"),
        }
    }
}

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    SetupComplete,
    SetupFailed(SetupStage),
    /// The bridge reported a new line status.
    LinkStatusChanged,
    /// Host mode could not be restored after a disconnect.
    HostModeRearmFailed,
    DeviceAttached,
    DeviceRejected,
    EnumerationFailed,
    DeviceDetached,
    ChallengeSent,
    ChallengeAborted,
    SignaturePending,
    SignatureReady,
    SignatureAborted,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::SetupComplete => f.write_str("setup-complete"),
            TelemetryEventKind::SetupFailed(stage) => write!(f, "setup-failed {stage}"),
            TelemetryEventKind::LinkStatusChanged => f.write_str("link-status"),
            TelemetryEventKind::HostModeRearmFailed => f.write_str("host-mode-rearm-failed"),
            TelemetryEventKind::DeviceAttached => f.write_str("device-attached"),
            TelemetryEventKind::DeviceRejected => f.write_str("device-rejected"),
            TelemetryEventKind::EnumerationFailed => f.write_str("enumeration-failed"),
            TelemetryEventKind::DeviceDetached => f.write_str("device-detached"),
            TelemetryEventKind::ChallengeSent => f.write_str("challenge-sent"),
            TelemetryEventKind::ChallengeAborted => f.write_str("challenge-aborted"),
            TelemetryEventKind::SignaturePending => f.write_str("signature-pending"),
            TelemetryEventKind::SignatureReady => f.write_str("signature-ready"),
            TelemetryEventKind::SignatureAborted => f.write_str("signature-aborted"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const SETUP_COMPLETE_CODE: u16 = 0x0000;
    const SETUP_FAILED_BASE: u16 = 0x0001;
    const LINK_STATUS_CODE: u16 = 0x0008;
    const HOST_MODE_REARM_FAILED_CODE: u16 = 0x0009;
    const DEVICE_ATTACHED_CODE: u16 = 0x0010;
    const DEVICE_REJECTED_CODE: u16 = 0x0011;
    const ENUMERATION_FAILED_CODE: u16 = 0x0012;
    const DEVICE_DETACHED_CODE: u16 = 0x0013;
    const CHALLENGE_SENT_CODE: u16 = 0x0020;
    const CHALLENGE_ABORTED_CODE: u16 = 0x0021;
    const SIGNATURE_PENDING_CODE: u16 = 0x0022;
    const SIGNATURE_READY_CODE: u16 = 0x0023;
    const SIGNATURE_ABORTED_CODE: u16 = 0x0024;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::SetupComplete => Self::SETUP_COMPLETE_CODE,
            TelemetryEventKind::SetupFailed(stage) => Self::SETUP_FAILED_BASE + stage.index(),
            TelemetryEventKind::LinkStatusChanged => Self::LINK_STATUS_CODE,
            TelemetryEventKind::HostModeRearmFailed => Self::HOST_MODE_REARM_FAILED_CODE,
            TelemetryEventKind::DeviceAttached => Self::DEVICE_ATTACHED_CODE,
            TelemetryEventKind::DeviceRejected => Self::DEVICE_REJECTED_CODE,
            TelemetryEventKind::EnumerationFailed => Self::ENUMERATION_FAILED_CODE,
            TelemetryEventKind::DeviceDetached => Self::DEVICE_DETACHED_CODE,
            TelemetryEventKind::ChallengeSent => Self::CHALLENGE_SENT_CODE,
            TelemetryEventKind::ChallengeAborted => Self::CHALLENGE_ABORTED_CODE,
            TelemetryEventKind::SignaturePending => Self::SIGNATURE_PENDING_CODE,
            TelemetryEventKind::SignatureReady => Self::SIGNATURE_READY_CODE,
            TelemetryEventKind::SignatureAborted => Self::SIGNATURE_ABORTED_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::SETUP_COMPLETE_CODE => TelemetryEventKind::SetupComplete,
            Self::LINK_STATUS_CODE => TelemetryEventKind::LinkStatusChanged,
            Self::HOST_MODE_REARM_FAILED_CODE => TelemetryEventKind::HostModeRearmFailed,
            Self::DEVICE_ATTACHED_CODE => TelemetryEventKind::DeviceAttached,
            Self::DEVICE_REJECTED_CODE => TelemetryEventKind::DeviceRejected,
            Self::ENUMERATION_FAILED_CODE => TelemetryEventKind::EnumerationFailed,
            Self::DEVICE_DETACHED_CODE => TelemetryEventKind::DeviceDetached,
            Self::CHALLENGE_SENT_CODE => TelemetryEventKind::ChallengeSent,
            Self::CHALLENGE_ABORTED_CODE => TelemetryEventKind::ChallengeAborted,
            Self::SIGNATURE_PENDING_CODE => TelemetryEventKind::SignaturePending,
            Self::SIGNATURE_READY_CODE => TelemetryEventKind::SignatureReady,
            Self::SIGNATURE_ABORTED_CODE => TelemetryEventKind::SignatureAborted,
            value if (Self::SETUP_FAILED_BASE..Self::LINK_STATUS_CODE).contains(&value) => {
                SetupStage::from_index(value - Self::SETUP_FAILED_BASE)
                    .map_or(TelemetryEventKind::Custom(value), TelemetryEventKind::SetupFailed)
            }
            other => TelemetryEventKind::Custom(other),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    /// Line status observed by the connectivity poll.
    Link(ConnectionStatus),
    /// Identity read from the attached device.
    Device(DeviceIdentity),
    /// Progress of a challenge/signature round.
    Round(RoundTelemetry),
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Round progress payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RoundTelemetry {
    pub sequence: u8,
    /// Chunk index where the round stopped, for aborted rounds.
    pub chunk: Option<u8>,
    /// Time since the challenge was sent, once known.
    pub elapsed: Option<Duration>,
}

impl RoundTelemetry {
    #[must_use]
    pub const fn new(sequence: u8, chunk: Option<u8>, elapsed: Option<Duration>) -> Self {
        Self {
            sequence,
            chunk,
            elapsed,
        }
    }
}

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
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
    pub details: TelemetryPayload,
}

impl<TInstant> fmt::Display for TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.event)?;
        match self.details {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Link(status) => write!(f, " status={status}"),
            TelemetryPayload::Device(identity) => write!(f, " device={identity}"),
            TelemetryPayload::Round(round) => {
                write!(f, " seq={}", round.sequence)?;
                if let Some(chunk) = round.chunk {
                    write!(f, " chunk={chunk}")?;
                }
                if let Some(elapsed) = round.elapsed {
                    write!(f, " elapsed={}ms", elapsed.as_millis())?;
                }
                Ok(())
            }
        }
    }
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
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Identifier the next record will receive.
    pub const fn next_event_id(&self) -> EventId {
        self.next_event_id
    }

    /// Iterates over records whose id is at least `first`, oldest first.
    pub fn since(&self, first: EventId) -> impl Iterator<Item = &TelemetryRecord<TInstant>> {
        self.ring
            .oldest_ordered()
            .filter(move |record| record.id.wrapping_sub(first) < EventId::MAX / 2)
    }

    /// Returns `true` when any retained record has the given kind.
    pub fn contains(&self, event: TelemetryEventKind) -> bool {
        self.ring.oldest_ordered().any(|record| record.event == event)
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }

    /// Records a round-progress event.
    pub fn record_round(
        &mut self,
        event: TelemetryEventKind,
        round: RoundTelemetry,
        timestamp: TInstant,
    ) -> EventId {
        self.record(event, TelemetryPayload::Round(round), timestamp)
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

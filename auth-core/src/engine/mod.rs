//! Polling state machine that relays console challenges to the attached
//! authentication device.
//!
//! The engine owns the bridge session. Each [`PassthroughEngine::tick`]
//! polls the USB line when the check interval has elapsed, enumerates or
//! drops the device on a status change, and then advances the current round
//! by at most one step: transmit the five challenge chunks, or poll the sign
//! state and fetch the nineteen signature chunks once the device is ready.
//!
//! Failures never escape a tick. A failed step leaves the round where it was
//! so the next tick retries it; only setup failures are permanent.

mod probe;

pub use probe::ProbeGenerator;

use core::fmt;

use crate::bridge::{
    BUS_RESET_HOLD, BridgeDelay, BridgeDriver, BridgeError, ConnectionStatus, DEFAULT_BAUD_RATE,
    DeviceDescriptor, DeviceIdentity, RESET_SETTLE, UsbMode,
};
use crate::config::PassthroughConfig;
use crate::control::ControlRequest;
use crate::exchange::{AuthExchange, AuthReadiness};
use crate::link::SerialLink;
use crate::report::{
    AUTH_TIMESTAMP_REPORT_ID, AUTH_TIMESTAMP_REPORT_LEN, CHALLENGE_REPORT_ID, CHUNK_REPORT_LEN,
    NONCE_LEN, SIGN_STATE_REPORT_ID, SIGN_STATE_REPORT_LEN, SIGNATURE_CHUNK_COUNT,
    SIGNATURE_REPORT_ID, SignState, SignatureAssembler, SignatureChunk, challenge_chunks,
};
use crate::telemetry::{
    RoundTelemetry, SetupStage, TelemetryEventKind, TelemetryInstant, TelemetryPayload,
    TelemetryRecorder,
};

/// `wIndex` addressed by challenge, signature and timestamp reports.
pub const AUTH_REPORT_INDEX: u16 = 0x03;

/// `wIndex` addressed by sign-state polls.
pub const SIGN_STATE_REPORT_INDEX: u16 = 0x00;

#[allow(clippy::cast_possible_truncation)]
const fn wlength(len: usize) -> u16 {
    len as u16
}

const CHALLENGE_REQUEST: ControlRequest = ControlRequest::set_feature_report(
    CHALLENGE_REPORT_ID,
    AUTH_REPORT_INDEX,
    wlength(CHUNK_REPORT_LEN),
);

const SIGN_STATE_REQUEST: ControlRequest = ControlRequest::get_feature_report(
    SIGN_STATE_REPORT_ID,
    SIGN_STATE_REPORT_INDEX,
    wlength(SIGN_STATE_REPORT_LEN),
);

const SIGNATURE_REQUEST: ControlRequest = ControlRequest::get_feature_report(
    SIGNATURE_REPORT_ID,
    AUTH_REPORT_INDEX,
    wlength(CHUNK_REPORT_LEN),
);

const AUTH_TIMESTAMP_REQUEST: ControlRequest = ControlRequest::get_feature_report(
    AUTH_TIMESTAMP_REPORT_ID,
    AUTH_REPORT_INDEX,
    wlength(AUTH_TIMESTAMP_REPORT_LEN),
);

/// Engine lifecycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PassthroughState {
    Uninitialized,
    /// Setup failed; every later tick is a no-op.
    SetupFailed,
    Disconnected,
    /// Enumerating a newly connected device.
    Connecting,
    /// Connected, no round in flight.
    ReadyIdle,
    /// Challenge chunks are being transmitted.
    ChallengeSent,
    /// Challenge delivered, waiting for and fetching the signature.
    AwaitingSignature,
}

impl PassthroughState {
    /// Returns `true` once setup succeeded.
    #[must_use]
    pub const fn is_operational(self) -> bool {
        !matches!(
            self,
            PassthroughState::Uninitialized | PassthroughState::SetupFailed
        )
    }

    /// Returns `true` while a challenge/signature round is outstanding.
    #[must_use]
    pub const fn round_in_flight(self) -> bool {
        matches!(
            self,
            PassthroughState::ChallengeSent | PassthroughState::AwaitingSignature
        )
    }
}

impl fmt::Display for PassthroughState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PassthroughState::Uninitialized => "uninitialized",
            PassthroughState::SetupFailed => "setup-failed",
            PassthroughState::Disconnected => "disconnected",
            PassthroughState::Connecting => "connecting",
            PassthroughState::ReadyIdle => "ready-idle",
            PassthroughState::ChallengeSent => "challenge-sent",
            PassthroughState::AwaitingSignature => "awaiting-signature",
        };
        f.write_str(label)
    }
}

/// Link-level bookkeeping owned by the engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BridgeSession<TInstant> {
    /// Last status returned by the connectivity poll.
    pub status: ConnectionStatus,
    pub last_checked: Option<TInstant>,
    pub setup_complete: bool,
}

impl<TInstant> BridgeSession<TInstant> {
    const fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnect,
            last_checked: None,
            setup_complete: false,
        }
    }
}

/// Point-in-time summary for diagnostics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PassthroughStatus<TInstant> {
    pub state: PassthroughState,
    pub device: Option<DeviceIdentity>,
    pub sequence: u8,
    pub link: ConnectionStatus,
    pub last_checked: Option<TInstant>,
    pub setup_complete: bool,
}

/// Failure of an on-demand device query.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QueryError<E> {
    /// No accepted device is attached.
    NoDevice,
    Bridge(BridgeError<E>),
}

impl<E> From<BridgeError<E>> for QueryError<E> {
    fn from(err: BridgeError<E>) -> Self {
        QueryError::Bridge(err)
    }
}

impl<E> fmt::Display for QueryError<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::NoDevice => f.write_str("no authentication device attached"),
            QueryError::Bridge(err) => write!(f, "{err}"),
        }
    }
}

/// Auth passthrough over a bridge chip.
pub struct PassthroughEngine<S, D, X, TInstant>
where
    TInstant: TelemetryInstant,
{
    config: PassthroughConfig,
    bridge: BridgeDriver<S, D>,
    exchange: X,
    telemetry: TelemetryRecorder<TInstant>,
    probe: ProbeGenerator,
    state: PassthroughState,
    session: BridgeSession<TInstant>,
    device: Option<DeviceDescriptor>,
    sequence: u8,
    challenge_sent_at: Option<TInstant>,
    /// Nonce carried by the outstanding challenge.
    round_nonce: [u8; NONCE_LEN],
    pending_reported: bool,
    assembler: SignatureAssembler,
}

impl<S, D, X, TInstant> PassthroughEngine<S, D, X, TInstant>
where
    S: SerialLink,
    D: BridgeDelay,
    X: AuthExchange,
    TInstant: TelemetryInstant,
{
    /// Creates an engine that has not yet touched the link.
    pub fn new(config: PassthroughConfig, serial: S, delay: D, exchange: X) -> Self {
        Self {
            probe: ProbeGenerator::new(config.probe_seed),
            config,
            bridge: BridgeDriver::new(serial, delay),
            exchange,
            telemetry: TelemetryRecorder::new(),
            state: PassthroughState::Uninitialized,
            session: BridgeSession::new(),
            device: None,
            sequence: 1,
            challenge_sent_at: None,
            round_nonce: [0; NONCE_LEN],
            pending_reported: false,
            assembler: SignatureAssembler::new(),
        }
    }

    pub fn config(&self) -> &PassthroughConfig {
        &self.config
    }

    pub fn state(&self) -> PassthroughState {
        self.state
    }

    /// Round sequence number carried by the next challenge.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Descriptor of the accepted device, if one is attached.
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.device.as_ref()
    }

    pub fn session(&self) -> &BridgeSession<TInstant> {
        &self.session
    }

    pub fn telemetry(&self) -> &TelemetryRecorder<TInstant> {
        &self.telemetry
    }

    pub fn exchange(&self) -> &X {
        &self.exchange
    }

    pub fn exchange_mut(&mut self) -> &mut X {
        &mut self.exchange
    }

    pub fn serial(&self) -> &S {
        self.bridge.link().serial()
    }

    pub fn serial_mut(&mut self) -> &mut S {
        self.bridge.link_mut().serial_mut()
    }

    /// Snapshot of the engine and session state.
    pub fn status(&self) -> PassthroughStatus<TInstant> {
        PassthroughStatus {
            state: self.state,
            device: self.device.map(|descriptor| descriptor.identity()),
            sequence: self.sequence,
            link: self.session.status,
            last_checked: self.session.last_checked,
            setup_complete: self.session.setup_complete,
        }
    }

    /// Returns `true` when the board configuration allows the engine to run.
    pub fn available(&self) -> bool {
        self.config.available()
    }

    /// Brings up the bridge. Runs once; later calls are ignored.
    pub fn setup(&mut self, now: TInstant) {
        if self.state != PassthroughState::Uninitialized {
            return;
        }

        match self.bring_up() {
            Ok(()) => {
                self.session = BridgeSession {
                    status: ConnectionStatus::Disconnect,
                    last_checked: None,
                    setup_complete: true,
                };
                self.sequence = 1;
                self.state = PassthroughState::Disconnected;
                self.telemetry.record(
                    TelemetryEventKind::SetupComplete,
                    TelemetryPayload::none(),
                    now,
                );
            }
            Err(stage) => {
                self.state = PassthroughState::SetupFailed;
                self.telemetry.record(
                    TelemetryEventKind::SetupFailed(stage),
                    TelemetryPayload::none(),
                    now,
                );
            }
        }
    }

    /// Advances the engine by one polling step.
    pub fn tick(&mut self, now: TInstant) {
        if !self.state.is_operational() {
            return;
        }

        if self.connection_check_due(now) {
            self.session.last_checked = Some(now);
            self.poll_connection(now);
        }

        if self.device.is_none() || self.exchange.readiness() != AuthReadiness::NonceReady {
            return;
        }

        match self.state {
            PassthroughState::ReadyIdle => self.send_challenge(now),
            PassthroughState::AwaitingSignature if self.nonce_replaced() => {
                self.abandon_round(now);
                self.send_challenge(now);
            }
            PassthroughState::AwaitingSignature => self.collect_signature(now),
            _ => {}
        }
    }

    /// Reads the device's standard GET_STATUS word.
    pub fn device_status(&mut self) -> Result<[u8; 2], QueryError<S::Error>> {
        self.require_device()?;
        let mut status = [0u8; 2];
        self.bridge
            .control_in(&ControlRequest::get_device_status(), &mut status)?;
        Ok(status)
    }

    /// Reads the device's auth timestamp report.
    pub fn auth_timestamp(
        &mut self,
    ) -> Result<[u8; AUTH_TIMESTAMP_REPORT_LEN], QueryError<S::Error>> {
        self.require_device()?;
        let mut report = [0u8; AUTH_TIMESTAMP_REPORT_LEN];
        self.bridge.control_in(&AUTH_TIMESTAMP_REQUEST, &mut report)?;
        Ok(report)
    }

    fn require_device(&self) -> Result<(), QueryError<S::Error>> {
        if self.device.is_some() && self.state.is_operational() {
            Ok(())
        } else {
            Err(QueryError::NoDevice)
        }
    }

    fn bring_up(&mut self) -> Result<(), SetupStage> {
        self.bridge
            .link_mut()
            .switch_baud_rate(DEFAULT_BAUD_RATE)
            .map_err(|_| SetupStage::Reset)?;
        self.bridge.reset().map_err(|_| SetupStage::Reset)?;
        self.bridge.wait(RESET_SETTLE);

        let probe = self.probe.next_byte();
        self.bridge
            .existence_probe(probe)
            .map_err(|_| SetupStage::ExistenceProbe)?;

        if self.config.baud_rate != DEFAULT_BAUD_RATE {
            self.bridge
                .set_baud_rate(self.config.baud_rate)
                .map_err(|_| SetupStage::BaudRate)?;
            let probe = self.probe.next_byte();
            self.bridge
                .existence_probe(probe)
                .map_err(|_| SetupStage::BaudRate)?;
        }

        self.bridge
            .set_usb_mode(UsbMode::HostEnabled)
            .map_err(|_| SetupStage::HostMode)
    }

    fn connection_check_due(&self, now: TInstant) -> bool {
        self.session.last_checked.is_none_or(|last| {
            now.saturating_duration_since(last) > self.config.connection_check_interval
        })
    }

    fn poll_connection(&mut self, now: TInstant) {
        let Ok(status) = self.bridge.test_connect() else {
            return;
        };
        if status == self.session.status {
            return;
        }

        if status == ConnectionStatus::Disconnect {
            self.disconnect(now);
            // Host mode without SOF so the bridge keeps watching for the next attach.
            if self.bridge.set_usb_mode(UsbMode::HostEnabled).is_err() {
                // Left uncommitted so the next poll retries the re-arm.
                self.telemetry.record(
                    TelemetryEventKind::HostModeRearmFailed,
                    TelemetryPayload::none(),
                    now,
                );
                return;
            }
        }

        self.session.status = status;
        self.telemetry.record(
            TelemetryEventKind::LinkStatusChanged,
            TelemetryPayload::Link(status),
            now,
        );

        if status == ConnectionStatus::Connect {
            self.enumerate(now);
        }
    }

    fn enumerate(&mut self, now: TInstant) {
        self.state = PassthroughState::Connecting;
        self.device = None;
        self.clear_round();

        match self.read_descriptor() {
            Ok(descriptor) if self.config.accepts(descriptor.identity()) => {
                let identity = TelemetryPayload::Device(descriptor.identity());
                if self.bridge.auto_setup().is_ok() {
                    self.device = Some(descriptor);
                    self.telemetry
                        .record(TelemetryEventKind::DeviceAttached, identity, now);
                } else {
                    self.telemetry
                        .record(TelemetryEventKind::EnumerationFailed, identity, now);
                }
            }
            Ok(descriptor) => {
                self.telemetry.record(
                    TelemetryEventKind::DeviceRejected,
                    TelemetryPayload::Device(descriptor.identity()),
                    now,
                );
            }
            Err(_) => {
                self.telemetry.record(
                    TelemetryEventKind::EnumerationFailed,
                    TelemetryPayload::none(),
                    now,
                );
            }
        }

        self.state = PassthroughState::ReadyIdle;
    }

    fn read_descriptor(&mut self) -> Result<DeviceDescriptor, BridgeError<S::Error>> {
        self.bridge.set_usb_mode(UsbMode::HostEnabledReset)?;
        self.bridge.wait(BUS_RESET_HOLD);
        self.bridge.set_usb_mode(UsbMode::HostEnabledSof)?;
        self.bridge.fetch_device_descriptor()
    }

    fn disconnect(&mut self, now: TInstant) {
        if self.state.round_in_flight() {
            self.telemetry.record_round(
                TelemetryEventKind::SignatureAborted,
                RoundTelemetry::new(self.sequence, None, self.round_elapsed(now)),
                now,
            );
        }
        if let Some(descriptor) = self.device.take() {
            self.telemetry.record(
                TelemetryEventKind::DeviceDetached,
                TelemetryPayload::Device(descriptor.identity()),
                now,
            );
        }

        self.clear_round();
        self.state = PassthroughState::Disconnected;
    }

    fn send_challenge(&mut self, now: TInstant) {
        let mut nonce = [0u8; NONCE_LEN];
        self.exchange.read_nonce(&mut nonce);

        self.state = PassthroughState::ChallengeSent;
        for chunk in challenge_chunks(&nonce, self.sequence) {
            if self
                .bridge
                .control_out(&CHALLENGE_REQUEST, &chunk.to_report())
                .is_err()
            {
                self.state = PassthroughState::ReadyIdle;
                self.telemetry.record_round(
                    TelemetryEventKind::ChallengeAborted,
                    RoundTelemetry::new(self.sequence, Some(chunk.index), None),
                    now,
                );
                return;
            }
        }

        self.state = PassthroughState::AwaitingSignature;
        self.challenge_sent_at = Some(now);
        self.round_nonce = nonce;
        self.pending_reported = false;
        self.telemetry.record_round(
            TelemetryEventKind::ChallengeSent,
            RoundTelemetry::new(self.sequence, None, None),
            now,
        );
    }

    fn collect_signature(&mut self, now: TInstant) {
        if !self.signature_ready() {
            if !self.pending_reported {
                self.pending_reported = true;
                self.telemetry.record_round(
                    TelemetryEventKind::SignaturePending,
                    RoundTelemetry::new(self.sequence, None, self.round_elapsed(now)),
                    now,
                );
            }
            return;
        }

        self.assembler.clear();
        for attempt in (0u8..).take(SIGNATURE_CHUNK_COUNT) {
            let Some(chunk) = self.read_signature_chunk() else {
                self.telemetry.record_round(
                    TelemetryEventKind::SignatureAborted,
                    RoundTelemetry::new(self.sequence, Some(attempt), self.round_elapsed(now)),
                    now,
                );
                return;
            };
            self.assembler.insert(&chunk);
        }

        if !self.assembler.is_complete() {
            self.telemetry.record_round(
                TelemetryEventKind::SignatureAborted,
                RoundTelemetry::new(self.sequence, None, self.round_elapsed(now)),
                now,
            );
            return;
        }

        self.exchange.publish_signature(self.assembler.as_bytes());
        self.telemetry.record_round(
            TelemetryEventKind::SignatureReady,
            RoundTelemetry::new(self.sequence, None, self.round_elapsed(now)),
            now,
        );

        self.sequence = self.sequence.wrapping_add(1);
        self.clear_round();
        self.state = PassthroughState::ReadyIdle;
    }

    /// A different nonce was posted after the outstanding challenge went out.
    fn nonce_replaced(&self) -> bool {
        let mut nonce = [0u8; NONCE_LEN];
        self.exchange.read_nonce(&mut nonce);
        nonce != self.round_nonce
    }

    fn abandon_round(&mut self, now: TInstant) {
        self.telemetry.record_round(
            TelemetryEventKind::SignatureAborted,
            RoundTelemetry::new(self.sequence, None, self.round_elapsed(now)),
            now,
        );
        self.clear_round();
        self.state = PassthroughState::ReadyIdle;
    }

    fn signature_ready(&mut self) -> bool {
        let mut report = [0u8; SIGN_STATE_REPORT_LEN];
        self.bridge
            .control_in(&SIGN_STATE_REQUEST, &mut report)
            .is_ok()
            && SignState::parse(&report).is_ok_and(|state| state.is_ready())
    }

    fn read_signature_chunk(&mut self) -> Option<SignatureChunk> {
        let mut report = [0u8; CHUNK_REPORT_LEN];
        self.bridge
            .control_in(&SIGNATURE_REQUEST, &mut report)
            .ok()?;
        SignatureChunk::parse(&report).ok()
    }

    fn round_elapsed(&self, now: TInstant) -> Option<core::time::Duration> {
        self.challenge_sent_at
            .map(|sent| now.saturating_duration_since(sent))
    }

    fn clear_round(&mut self) {
        self.challenge_sent_at = None;
        self.pending_reported = false;
        self.assembler.clear();
    }
}

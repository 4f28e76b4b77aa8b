use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use auth_core::config::{DEFAULT_AUTH_DEVICE, PassthroughConfig, PinId};
use auth_core::engine::PassthroughEngine;
use auth_core::exchange::{AuthExchange, AuthReadiness, LocalExchange};
use auth_core::report::NONCE_LEN;
use auth_core::sim::{
    BridgeFaults, DeviceFaults, SimDelay, SimInstant, SimulatedAuthDevice, SimulatedBridge,
};
use auth_core::telemetry::EventId;

use crate::command::{self, Command, FaultCommand};

/// Virtual time advanced per scheduler tick.
pub const TICK: Duration = Duration::from_millis(25);

/// Ticks a `round` command may spend before giving up.
const ROUND_BUDGET: u32 = 200;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("attach", "attach [vid:pid]              - plug in a simulated auth device"),
    ("detach", "detach                        - unplug the device"),
    ("nonce", "nonce [seed]                  - post a console nonce"),
    ("ack", "ack                           - console consumed the signature"),
    ("round", "round [seed]                  - post a nonce and run until signed"),
    ("tick", "tick [count]                  - run scheduler ticks (25ms each)"),
    ("advance", "advance <duration>            - run ticks for 250ms, 2s, ..."),
    ("status", "status                        - show passthrough state"),
    ("telemetry", "telemetry                     - dump retained telemetry"),
    (
        "fault",
        "fault <probe|mode|descriptor> <on|off> | fault <challenge|signature> <n> | fault clear",
    ),
    ("diag", "diag                          - query device status and auth timestamp"),
    ("help", "help [topic]                  - show help for a command"),
];

type Engine = PassthroughEngine<SimulatedBridge, SimDelay, LocalExchange, SimInstant>;

pub struct Session {
    engine: Engine,
    now: SimInstant,
    next_event: EventId,
    nonce_seed: u8,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    /// Boots the passthrough against a bridge with nothing plugged in.
    pub fn new(config: PassthroughConfig) -> Self {
        let mut engine = PassthroughEngine::new(
            config,
            SimulatedBridge::new(),
            SimDelay::default(),
            LocalExchange::new(),
        );
        engine.setup(SimInstant::ZERO);
        Self {
            engine,
            now: SimInstant::ZERO,
            next_event: 0,
            nonce_seed: 0,
            transcript: None,
        }
    }

    /// Default board configuration.
    pub fn with_defaults() -> Self {
        Self::new(PassthroughConfig::new(PinId(0), PinId(1)))
    }

    /// Mirrors every command and response to `path`.
    pub fn with_transcript(mut self, path: &Path) -> io::Result<Self> {
        self.transcript = Some(TranscriptLogger::new(path)?);
        Ok(self)
    }

    #[cfg(test)]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn now(&self) -> SimInstant {
        self.now
    }

    /// Executes one shell line and returns the response plus any new telemetry.
    pub fn handle_line(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        self.log(TranscriptRole::Host, trimmed)?;

        let mut lines = match command::parse(trimmed) {
            Ok(command) => self.execute(command),
            Err(err) => err.lines().map(|line| format!("ERR syntax {line}")).collect(),
        };
        self.drain_telemetry(&mut lines);

        for line in &lines {
            self.log(TranscriptRole::Emulator, line)?;
        }
        Ok(lines)
    }

    fn execute(&mut self, command: Command) -> Vec<String> {
        match command {
            Command::Attach(identity) => {
                let identity = identity.unwrap_or(DEFAULT_AUTH_DEVICE);
                self.engine
                    .serial_mut()
                    .attach(SimulatedAuthDevice::new(identity));
                vec![format!("OK attached {identity}")]
            }
            Command::Detach => match self.engine.serial_mut().detach() {
                Some(device) => vec![format!("OK detached {}", device.identity())],
                None => vec!["ERR nothing attached".to_string()],
            },
            Command::Nonce(seed) => {
                let seed = self.post_nonce(seed);
                vec![format!("OK nonce posted seed={seed}")]
            }
            Command::Ack => {
                self.engine.exchange_mut().acknowledge();
                vec!["OK acknowledged".to_string()]
            }
            Command::Round(seed) => self.round(seed),
            Command::Tick(count) => {
                for _ in 0..count {
                    self.tick();
                }
                vec![self.clock_line()]
            }
            Command::Advance(duration) => {
                let end = self.now + duration;
                while self.now < end {
                    self.tick();
                }
                vec![self.clock_line()]
            }
            Command::Status => self.status_lines(),
            Command::Telemetry => {
                let mut lines: Vec<String> = self
                    .engine
                    .telemetry()
                    .oldest_first()
                    .map(|record| format!("  {record}"))
                    .collect();
                if lines.is_empty() {
                    lines.push("telemetry empty".to_string());
                }
                self.next_event = self.engine.telemetry().next_event_id();
                lines
            }
            Command::Fault(fault) => self.inject(fault),
            Command::Diag => self.diagnostics(),
            Command::Help(topic) => help(topic.as_deref()),
        }
    }

    fn tick(&mut self) {
        self.now = self.now + TICK;
        self.engine.tick(self.now);
    }

    fn post_nonce(&mut self, seed: Option<u8>) -> u8 {
        let seed = seed.unwrap_or_else(|| {
            self.nonce_seed = self.nonce_seed.wrapping_add(1);
            self.nonce_seed
        });
        self.engine.exchange_mut().post_nonce(&nonce_from_seed(seed));
        seed
    }

    fn round(&mut self, seed: Option<u8>) -> Vec<String> {
        let seed = self.post_nonce(seed);
        let started = self.now;
        let sequence = self.engine.sequence();
        for _ in 0..ROUND_BUDGET {
            self.tick();
            if self.engine.exchange().readiness() == AuthReadiness::SignedNonceReady {
                let elapsed = self.now.since_start() - started.since_start();
                let signature = self.engine.exchange().signature();
                return vec![
                    format!(
                        "OK round seq={sequence} seed={seed} elapsed={}ms",
                        elapsed.as_millis()
                    ),
                    format!("signature {}..", hex_prefix(signature, 16)),
                ];
            }
        }
        vec![format!(
            "ERR round unsigned after {} ticks state={}",
            ROUND_BUDGET,
            self.engine.state()
        )]
    }

    fn status_lines(&self) -> Vec<String> {
        let status = self.engine.status();
        let device = status
            .device
            .map_or_else(|| "none".to_string(), |identity| identity.to_string());
        let attached = self
            .engine
            .serial()
            .device()
            .map_or_else(|| "none".to_string(), |device| device.identity().to_string());
        vec![
            format!(
                "state={} setup={} link={} seq={}",
                status.state, status.setup_complete, status.link, status.sequence
            ),
            format!("device={device} attached={attached}"),
            format!(
                "exchange={} published={}",
                readiness_label(self.engine.exchange().readiness()),
                self.engine.exchange().published()
            ),
            self.clock_line(),
        ]
    }

    fn inject(&mut self, fault: FaultCommand) -> Vec<String> {
        let bridge = self.engine.serial_mut();
        match fault {
            FaultCommand::CorruptProbe(on) => bridge.faults_mut().corrupt_probe = on,
            FaultCommand::RejectMode(on) => bridge.faults_mut().reject_usb_mode = on,
            FaultCommand::FailDescriptor(on) => bridge.faults_mut().fail_descriptor = on,
            FaultCommand::StallChallenge(index) | FaultCommand::StallSignature(index) => {
                let Some(device) = bridge.device_mut() else {
                    return vec!["ERR nothing attached".to_string()];
                };
                if matches!(fault, FaultCommand::StallChallenge(_)) {
                    device.faults_mut().stall_challenge_chunk = Some(index);
                } else {
                    device.faults_mut().stall_signature_read = Some(index);
                }
            }
            FaultCommand::Clear => {
                *bridge.faults_mut() = BridgeFaults::default();
                if let Some(device) = bridge.device_mut() {
                    *device.faults_mut() = DeviceFaults::default();
                }
            }
        }
        vec![format!("OK fault {fault:?}")]
    }

    fn diagnostics(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        match self.engine.device_status() {
            Ok(status) => lines.push(format!("device-status {}", hex_prefix(&status, 2))),
            Err(err) => lines.push(format!("ERR device-status {err}")),
        }
        match self.engine.auth_timestamp() {
            Ok(report) => lines.push(format!("auth-timestamp {}", hex_prefix(&report, 16))),
            Err(err) => lines.push(format!("ERR auth-timestamp {err}")),
        }
        lines
    }

    fn drain_telemetry(&mut self, lines: &mut Vec<String>) {
        let telemetry = self.engine.telemetry();
        lines.extend(
            telemetry
                .since(self.next_event)
                .map(|record| format!("  telemetry {record}")),
        );
        self.next_event = telemetry.next_event_id();
    }

    fn clock_line(&self) -> String {
        format!(
            "t=+{}ms state={}",
            self.now.since_start().as_millis(),
            self.engine.state()
        )
    }

    fn log(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        let elapsed = self.now.since_start();
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(elapsed, role, line),
            None => Ok(()),
        }
    }
}

/// Deterministic nonce used by the shell.
pub fn nonce_from_seed(seed: u8) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    let mut value = seed;
    for byte in &mut nonce {
        value = value.wrapping_mul(29).wrapping_add(17);
        *byte = value;
    }
    nonce
}

fn help(topic: Option<&str>) -> Vec<String> {
    match topic {
        Some(target) => match HELP_TOPICS.iter().find(|(name, _)| *name == target) {
            Some((_, detail)) => vec![(*detail).to_string()],
            None => vec![
                format!("No help available for `{target}`."),
                format!(
                    "Available topics: {}",
                    HELP_TOPICS
                        .iter()
                        .map(|(name, _)| *name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ],
        },
        None => {
            let mut lines = vec!["Available commands:".to_string()];
            lines.extend(HELP_TOPICS.iter().map(|(_, detail)| format!("  {detail}")));
            lines.push("Type `help <topic>` for a specific command.".to_string());
            lines
        }
    }
}

fn readiness_label(readiness: AuthReadiness) -> &'static str {
    match readiness {
        AuthReadiness::Idle => "idle",
        AuthReadiness::NonceReady => "nonce-ready",
        AuthReadiness::SignedNonceReady => "signed-nonce-ready",
    }
}

fn hex_prefix(bytes: &[u8], limit: usize) -> String {
    bytes.iter().take(limit).fold(String::new(), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writeln!(writer, "# PS4 auth passthrough emulator transcript")?;
        writeln!(writer, "# Timestamps are virtual milliseconds since boot")?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Copy, Clone)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

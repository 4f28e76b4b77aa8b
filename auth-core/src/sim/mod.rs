//! Software model of the bridge chip and an attached authentication device.
//!
//! [`SimulatedBridge`] implements [`SerialLink`] and decodes the byte stream
//! the way the chip does: the parity bit of every byte decides whether it
//! opens a new command or feeds the current one. A byte framed with the wrong
//! parity is therefore misread here exactly as it would be on hardware.
//! Reads never block; an empty response queue surfaces as
//! [`SimError::NoResponse`].

mod device;

pub use device::{DeviceFaults, SimulatedAuthDevice, Stall, expected_signature};

use core::{ops::Add, time::Duration};

use heapless::{Deque, Vec};

use crate::bridge::{
    BridgeDelay, CMD_RET_ABORT, CMD_RET_SUCCESS, Command, ConnectionStatus, DEFAULT_BAUD_RATE,
    DESCRIPTOR_TYPE_DEVICE, DataToggle, MAX_BUFFER_LEN, SUPPORTED_BAUD_RATES, TokenPid, UsbMode,
    baud_rate_divisor,
};
use crate::link::{FrameKind, Parity, SerialLink, frame_kind_of};
use crate::telemetry::TelemetryInstant;

/// Interrupt status reported when the device answers a token with STALL.
pub const INT_STALL: u8 = 0x2e;

const RESPONSE_QUEUE_LEN: usize = 128;

/// Errors raised by the simulated serial link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SimError {
    /// Read attempted with no response pending.
    NoResponse,
    /// Host and bridge are clocked at different baud rates.
    BaudMismatch,
}

/// Faults injected at the bridge level.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BridgeFaults {
    /// Echo existence probes unmodified.
    pub corrupt_probe: bool,
    /// Abort every mode change.
    pub reject_usb_mode: bool,
    /// Fail the next descriptor fetch.
    pub fail_descriptor: bool,
}

#[derive(Clone, Debug)]
struct PendingCommand {
    command: Command,
    args: Vec<u8, { MAX_BUFFER_LEN + 1 }>,
}

impl PendingCommand {
    fn is_complete(&self) -> bool {
        let expected = match self.command {
            Command::SetBaudRate => 2,
            Command::CheckExists
            | Command::SetUsbMode
            | Command::SetEndpoint6
            | Command::SetEndpoint7
            | Command::GetDescriptor
            | Command::IssueToken => 1,
            Command::WriteUsbData => 1 + self.args.first().map_or(0, |len| usize::from(*len)),
            Command::ResetAll
            | Command::TestConnect
            | Command::GetStatus
            | Command::ReadUsbData0
            | Command::ReadUsbData
            | Command::AutoSetup => 0,
        };
        self.args.len() >= expected
    }
}

/// Simulated bridge chip with an optional device on its USB port.
pub struct SimulatedBridge {
    parity: Parity,
    host_baud_rate: u32,
    chip_baud_rate: u32,
    mode: u8,
    interrupt: u8,
    pending: Option<PendingCommand>,
    responses: Deque<u8, RESPONSE_QUEUE_LEN>,
    tx_buffer: Vec<u8, MAX_BUFFER_LEN>,
    rx_buffer: Vec<u8, MAX_BUFFER_LEN>,
    tx_toggle: u8,
    rx_toggle: u8,
    device: Option<SimulatedAuthDevice>,
    faults: BridgeFaults,
    commands_seen: u32,
    stray_bytes: u32,
}

impl SimulatedBridge {
    /// Creates a powered-up bridge with nothing attached.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            parity: Parity::Even,
            host_baud_rate: DEFAULT_BAUD_RATE,
            chip_baud_rate: DEFAULT_BAUD_RATE,
            mode: UsbMode::DeviceDisabled as u8,
            interrupt: 0,
            pending: None,
            responses: Deque::new(),
            tx_buffer: Vec::new(),
            rx_buffer: Vec::new(),
            tx_toggle: DataToggle::Data0 as u8,
            rx_toggle: DataToggle::Data0 as u8,
            device: None,
            faults: BridgeFaults {
                corrupt_probe: false,
                reject_usb_mode: false,
                fail_descriptor: false,
            },
            commands_seen: 0,
            stray_bytes: 0,
        }
    }

    /// Plugs `device` into the USB port, replacing any previous one.
    pub fn attach(&mut self, device: SimulatedAuthDevice) {
        self.device = Some(device);
    }

    /// Unplugs the current device.
    pub fn detach(&mut self) -> Option<SimulatedAuthDevice> {
        self.device.take()
    }

    #[must_use]
    pub fn device(&self) -> Option<&SimulatedAuthDevice> {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> Option<&mut SimulatedAuthDevice> {
        self.device.as_mut()
    }

    pub fn faults_mut(&mut self) -> &mut BridgeFaults {
        &mut self.faults
    }

    /// Raw operating mode last accepted by the chip.
    #[must_use]
    pub const fn mode(&self) -> u8 {
        self.mode
    }

    #[must_use]
    pub const fn chip_baud_rate(&self) -> u32 {
        self.chip_baud_rate
    }

    /// Number of recognised command bytes received.
    #[must_use]
    pub const fn commands_seen(&self) -> u32 {
        self.commands_seen
    }

    /// Bytes the chip discarded: unknown opcodes, data outside a command, or
    /// anything sent at the wrong baud rate.
    #[must_use]
    pub const fn stray_bytes(&self) -> u32 {
        self.stray_bytes
    }

    fn host_mode(&self) -> bool {
        self.mode == UsbMode::HostEnabled as u8
            || self.mode == UsbMode::HostEnabledSof as u8
            || self.mode == UsbMode::HostEnabledReset as u8
    }

    fn bus_active(&self) -> bool {
        self.mode == UsbMode::HostEnabledSof as u8 && self.device.is_some()
    }

    fn line_status(&self) -> ConnectionStatus {
        if self.host_mode() && self.device.is_some() {
            ConnectionStatus::Connect
        } else {
            ConnectionStatus::Disconnect
        }
    }

    fn respond(&mut self, byte: u8) {
        if self.responses.push_back(byte).is_err() {
            self.stray_bytes = self.stray_bytes.wrapping_add(1);
        }
    }

    fn receive(&mut self, byte: u8) {
        match frame_kind_of(byte, self.parity) {
            FrameKind::Command => {
                self.pending = Command::from_opcode(byte).map(|command| PendingCommand {
                    command,
                    args: Vec::new(),
                });
                if self.pending.is_some() {
                    self.commands_seen = self.commands_seen.wrapping_add(1);
                } else {
                    self.stray_bytes = self.stray_bytes.wrapping_add(1);
                }
            }
            FrameKind::Data => {
                let accepted = self
                    .pending
                    .as_mut()
                    .is_some_and(|pending| pending.args.push(byte).is_ok());
                if !accepted {
                    self.stray_bytes = self.stray_bytes.wrapping_add(1);
                    return;
                }
            }
        }

        if self.pending.as_ref().is_some_and(PendingCommand::is_complete)
            && let Some(pending) = self.pending.take()
        {
            self.execute(pending.command, &pending.args);
        }
    }

    fn execute(&mut self, command: Command, args: &[u8]) {
        match command {
            Command::ResetAll => self.reset(),
            Command::CheckExists => {
                let probe = args[0];
                let echo = if self.faults.corrupt_probe { probe } else { !probe };
                self.respond(echo);
            }
            Command::SetBaudRate => {
                let divisor = Some((args[0], args[1]));
                match SUPPORTED_BAUD_RATES
                    .into_iter()
                    .find(|rate| baud_rate_divisor(*rate) == divisor)
                {
                    // The chip acks at the new rate. `read_byte` refuses while
                    // the rates differ, so the host must switch before reading.
                    Some(rate) => {
                        self.chip_baud_rate = rate;
                        self.respond(CMD_RET_SUCCESS);
                    }
                    None => self.respond(CMD_RET_ABORT),
                }
            }
            Command::SetUsbMode => self.set_mode(args[0]),
            Command::TestConnect => {
                let status = self.line_status().to_raw();
                self.respond(status);
            }
            Command::GetStatus => self.respond(self.interrupt),
            Command::SetEndpoint6 => self.rx_toggle = args[0],
            Command::SetEndpoint7 => self.tx_toggle = args[0],
            Command::ReadUsbData0 | Command::ReadUsbData => {
                let block = core::mem::take(&mut self.rx_buffer);
                self.respond(u8::try_from(block.len()).unwrap_or(u8::MAX));
                for byte in block {
                    self.respond(byte);
                }
            }
            Command::WriteUsbData => {
                self.tx_buffer.clear();
                if self.tx_buffer.extend_from_slice(&args[1..]).is_err() {
                    self.stray_bytes = self.stray_bytes.wrapping_add(1);
                }
            }
            Command::GetDescriptor => self.fetch_descriptor(args[0]),
            Command::AutoSetup => {
                self.interrupt = match self.device.as_mut() {
                    Some(device) if self.mode == UsbMode::HostEnabledSof as u8 => {
                        device.configure();
                        ConnectionStatus::Success.to_raw()
                    }
                    _ => ConnectionStatus::Disconnect.to_raw(),
                };
            }
            Command::IssueToken => self.interrupt = self.transact(args[0]),
        }
    }

    fn reset(&mut self) {
        self.chip_baud_rate = DEFAULT_BAUD_RATE;
        self.mode = UsbMode::DeviceDisabled as u8;
        self.interrupt = 0;
        self.responses.clear();
        self.tx_buffer.clear();
        self.rx_buffer.clear();
        if let Some(device) = self.device.as_mut() {
            device.bus_reset();
        }
    }

    fn set_mode(&mut self, mode: u8) {
        let valid = matches!(mode, 0x00..=0x02 | 0x04..=0x07);
        if self.faults.reject_usb_mode || !valid {
            self.respond(CMD_RET_ABORT);
            return;
        }

        self.mode = mode;
        if mode == UsbMode::HostEnabledReset as u8
            && let Some(device) = self.device.as_mut()
        {
            device.bus_reset();
        }
        self.respond(CMD_RET_SUCCESS);
    }

    fn fetch_descriptor(&mut self, descriptor_type: u8) {
        self.rx_buffer.clear();
        if core::mem::take(&mut self.faults.fail_descriptor) {
            self.interrupt = INT_STALL;
            return;
        }
        if !self.bus_active() {
            self.interrupt = ConnectionStatus::Disconnect.to_raw();
            return;
        }
        let Some(device) = self.device.as_ref() else {
            return;
        };
        if descriptor_type != DESCRIPTOR_TYPE_DEVICE {
            self.interrupt = INT_STALL;
            return;
        }

        let descriptor = device.descriptor();
        self.interrupt = if self.rx_buffer.extend_from_slice(&descriptor).is_ok() {
            ConnectionStatus::Success.to_raw()
        } else {
            INT_STALL
        };
    }

    fn transact(&mut self, argument: u8) -> u8 {
        if !self.bus_active() {
            return ConnectionStatus::Disconnect.to_raw();
        }
        let Some(device) = self.device.as_mut() else {
            return ConnectionStatus::Disconnect.to_raw();
        };

        let endpoint = argument >> 4;
        let pid = argument & 0x0f;
        let data1 = DataToggle::Data1 as u8;
        let result = match pid {
            _ if endpoint != 0 => Err(Stall),
            p if p == TokenPid::Setup as u8 && self.tx_toggle == DataToggle::Data0 as u8 => {
                device.setup(&self.tx_buffer)
            }
            p if p == TokenPid::Out as u8 && self.tx_toggle == data1 => {
                device.data_out(&self.tx_buffer)
            }
            p if p == TokenPid::In as u8 && self.rx_toggle == data1 => {
                device.data_in(&mut self.rx_buffer)
            }
            _ => Err(Stall),
        };

        match result {
            Ok(()) => ConnectionStatus::Success.to_raw(),
            Err(Stall) => INT_STALL,
        }
    }
}

impl Default for SimulatedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink for SimulatedBridge {
    type Error = SimError;

    fn set_parity(&mut self, parity: Parity) -> Result<(), Self::Error> {
        self.parity = parity;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error> {
        self.host_baud_rate = baud_rate;
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        if self.host_baud_rate == self.chip_baud_rate {
            self.receive(byte);
        } else {
            self.stray_bytes = self.stray_bytes.wrapping_add(1);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, Self::Error> {
        if self.host_baud_rate != self.chip_baud_rate {
            return Err(SimError::BaudMismatch);
        }
        self.responses.pop_front().ok_or(SimError::NoResponse)
    }
}

/// Delay provider that accumulates requested time instead of sleeping.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SimDelay {
    pub total: Duration,
    pub calls: u32,
}

impl BridgeDelay for SimDelay {
    fn delay(&mut self, duration: Duration) {
        self.total += duration;
        self.calls = self.calls.wrapping_add(1);
    }
}

/// Virtual monotonic time for simulated runs.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct SimInstant(Duration);

impl SimInstant {
    pub const ZERO: Self = Self(Duration::ZERO);

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Time elapsed since [`SimInstant::ZERO`].
    #[must_use]
    pub const fn since_start(self) -> Duration {
        self.0
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl TelemetryInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeDriver, BridgeError, DeviceIdentity};
    use crate::control::ControlRequest;
    use crate::link::parity_for;

    fn driver() -> BridgeDriver<SimulatedBridge, SimDelay> {
        BridgeDriver::new(SimulatedBridge::new(), SimDelay::default())
    }

    fn auth_device() -> SimulatedAuthDevice {
        SimulatedAuthDevice::new(DeviceIdentity::new(0x054c, 0x05c4))
    }

    #[test]
    fn probe_is_inverted() {
        let mut bridge = driver();
        assert_eq!(bridge.existence_probe(0x5a), Ok(()));

        bridge.link_mut().serial_mut().faults_mut().corrupt_probe = true;
        assert_eq!(
            bridge.existence_probe(0x5a),
            Err(BridgeError::ProbeMismatch {
                sent: 0x5a,
                received: 0x5a
            })
        );
    }

    #[test]
    fn misframed_command_is_ignored() {
        let mut sim = SimulatedBridge::new();
        let opcode = Command::TestConnect.opcode();
        sim.set_parity(parity_for(opcode, FrameKind::Data)).unwrap();
        sim.write_byte(opcode).unwrap();
        assert_eq!(sim.commands_seen(), 0);
        assert_eq!(sim.read_byte(), Err(SimError::NoResponse));
    }

    #[test]
    fn baud_ack_is_only_readable_at_the_new_rate() {
        let mut sim = SimulatedBridge::new();
        let (coefficient, constant) = baud_rate_divisor(115_200).unwrap();
        for (byte, kind) in [
            (Command::SetBaudRate.opcode(), FrameKind::Command),
            (coefficient, FrameKind::Data),
            (constant, FrameKind::Data),
        ] {
            sim.set_parity(parity_for(byte, kind)).unwrap();
            sim.write_byte(byte).unwrap();
        }

        assert_eq!(sim.read_byte(), Err(SimError::BaudMismatch));
        sim.set_baud_rate(115_200).unwrap();
        assert_eq!(sim.read_byte(), Ok(CMD_RET_SUCCESS));
    }

    #[test]
    fn baud_change_keeps_link_in_step() {
        let mut bridge = driver();
        assert_eq!(bridge.set_baud_rate(115_200), Ok(()));
        assert_eq!(bridge.link().serial().chip_baud_rate(), 115_200);
        assert_eq!(bridge.existence_probe(0x01), Ok(()));

        bridge.link_mut().switch_baud_rate(9_600).unwrap();
        assert_eq!(
            bridge.existence_probe(0x01),
            Err(BridgeError::Link(SimError::BaudMismatch))
        );
    }

    #[test]
    fn connection_follows_mode_and_attachment() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().attach(auth_device());
        assert_eq!(bridge.test_connect(), Ok(ConnectionStatus::Disconnect));

        bridge.set_usb_mode(UsbMode::HostEnabled).unwrap();
        assert_eq!(bridge.test_connect(), Ok(ConnectionStatus::Connect));

        bridge.link_mut().serial_mut().detach();
        assert_eq!(bridge.test_connect(), Ok(ConnectionStatus::Disconnect));
    }

    #[test]
    fn tokens_require_start_of_frame() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().attach(auth_device());
        bridge.set_usb_mode(UsbMode::HostEnabled).unwrap();
        assert!(bridge.fetch_device_descriptor().is_err());

        bridge.set_usb_mode(UsbMode::HostEnabledSof).unwrap();
        let descriptor = bridge.fetch_device_descriptor().unwrap();
        assert_eq!(descriptor.identity(), DeviceIdentity::new(0x054c, 0x05c4));
        assert_eq!(bridge.auto_setup(), Ok(()));
        assert!(bridge.link().serial().device().unwrap().is_configured());
    }

    #[test]
    fn control_transfers_reach_the_device() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().attach(auth_device());
        bridge.set_usb_mode(UsbMode::HostEnabledSof).unwrap();

        let mut status = [0xffu8; 2];
        assert_eq!(
            bridge.control_in(&ControlRequest::get_device_status(), &mut status),
            Ok(2)
        );
        assert_eq!(status, [0, 0]);
        assert!(bridge.link().serial().stray_bytes() == 0);
    }

    #[test]
    fn rejected_mode_change_reports_abort() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().faults_mut().reject_usb_mode = true;
        assert_eq!(
            bridge.set_usb_mode(UsbMode::HostEnabled),
            Err(BridgeError::Rejected {
                command: Command::SetUsbMode,
                response: CMD_RET_ABORT
            })
        );
    }

    #[test]
    fn settle_delays_accumulate() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().attach(auth_device());
        bridge.set_usb_mode(UsbMode::HostEnabledSof).unwrap();
        bridge.fetch_device_descriptor().unwrap();
        let (_, delay) = bridge.into_parts();
        assert_eq!(delay.calls, 1);
        assert_eq!(delay.total, crate::bridge::DESCRIPTOR_SETTLE);
    }
}

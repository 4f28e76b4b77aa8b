//! Command driver for the serial USB-host bridge chip.
//!
//! Each operation emits one opcode followed by its argument bytes through the
//! [`LinkFramer`] and interprets the bridge's single-byte reply. The bridge has
//! no notion of USB transfers; the control-transfer layer composes these
//! primitives into SETUP/DATA/STATUS stages.

use core::fmt;
use core::time::Duration;

use crate::link::{LinkFramer, SerialLink};

pub mod descriptor;

pub use descriptor::{DEVICE_DESCRIPTOR_LEN, DeviceDescriptor, DeviceIdentity};

/// Baud rate the bridge powers up with.
pub const DEFAULT_BAUD_RATE: u32 = 9_600;

/// Acknowledgement returned by mode and baud-rate commands.
pub const CMD_RET_SUCCESS: u8 = 0x51;

/// Acknowledgement returned when the bridge rejects a command.
pub const CMD_RET_ABORT: u8 = 0x5f;

/// Descriptor type argument for [`Command::GetDescriptor`].
pub const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;

/// Largest block the bridge's transfer buffer accepts.
pub const MAX_BUFFER_LEN: usize = 64;

/// Settle time after [`BridgeDriver::reset`].
pub const RESET_SETTLE: Duration = Duration::from_millis(80);

/// Bus transaction time after issuing a token.
pub const TOKEN_SETTLE: Duration = Duration::from_micros(5);

/// Settle time after changing an endpoint data toggle.
pub const TOGGLE_SETTLE: Duration = Duration::from_micros(6);

/// Time the bus is held in reset before start-of-frame generation resumes.
pub const BUS_RESET_HOLD: Duration = Duration::from_millis(10);

/// Time the bridge needs to fetch a descriptor.
pub const DESCRIPTOR_SETTLE: Duration = Duration::from_micros(10);

/// Time the bridge needs to finish automatic configuration.
pub const AUTO_SETUP_SETTLE: Duration = Duration::from_micros(5);

/// Opcodes understood by the bridge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Command {
    SetBaudRate = 0x02,
    ResetAll = 0x05,
    CheckExists = 0x06,
    SetUsbMode = 0x15,
    TestConnect = 0x16,
    /// Sets the receive (IN) data toggle.
    SetEndpoint6 = 0x1c,
    /// Sets the transmit (SETUP/OUT) data toggle.
    SetEndpoint7 = 0x1d,
    GetStatus = 0x22,
    ReadUsbData0 = 0x27,
    ReadUsbData = 0x28,
    WriteUsbData = 0x2b,
    GetDescriptor = 0x46,
    AutoSetup = 0x4d,
    IssueToken = 0x4f,
}

impl Command {
    /// Raw opcode byte.
    #[must_use]
    pub const fn opcode(self) -> u8 {
        self as u8
    }

    /// Decodes an opcode byte.
    #[must_use]
    pub const fn from_opcode(opcode: u8) -> Option<Self> {
        Some(match opcode {
            0x02 => Command::SetBaudRate,
            0x05 => Command::ResetAll,
            0x06 => Command::CheckExists,
            0x15 => Command::SetUsbMode,
            0x16 => Command::TestConnect,
            0x1c => Command::SetEndpoint6,
            0x1d => Command::SetEndpoint7,
            0x22 => Command::GetStatus,
            0x27 => Command::ReadUsbData0,
            0x28 => Command::ReadUsbData,
            0x2b => Command::WriteUsbData,
            0x46 => Command::GetDescriptor,
            0x4d => Command::AutoSetup,
            0x4f => Command::IssueToken,
            _ => return None,
        })
    }
}

/// Operating modes accepted by [`Command::SetUsbMode`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum UsbMode {
    DeviceDisabled = 0x00,
    DeviceExternalFirmware = 0x01,
    DeviceInternalFirmware = 0x02,
    HostDisabled = 0x04,
    /// Host mode without start-of-frame generation.
    HostEnabled = 0x05,
    /// Host mode generating start-of-frame packets.
    HostEnabledSof = 0x06,
    /// Host mode holding the bus in reset.
    HostEnabledReset = 0x07,
}

/// Token packet identifiers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum TokenPid {
    Out = 0x01,
    In = 0x09,
    Setup = 0x0d,
}

/// Data toggle values written with the endpoint 6/7 commands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum DataToggle {
    Data0 = 0x80,
    Data1 = 0xc0,
}

impl DataToggle {
    /// Returns the opposite toggle.
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            DataToggle::Data0 => DataToggle::Data1,
            DataToggle::Data1 => DataToggle::Data0,
        }
    }
}

/// Interrupt status codes reported by [`Command::GetStatus`] and
/// [`Command::TestConnect`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectionStatus {
    Success,
    Connect,
    Disconnect,
    BufferOverrun,
    UsbReady,
    /// Any code outside the documented set (PID errors, stalls, timeouts).
    Other(u8),
}

impl ConnectionStatus {
    const SUCCESS: u8 = 0x14;
    const CONNECT: u8 = 0x15;
    const DISCONNECT: u8 = 0x16;
    const BUFFER_OVERRUN: u8 = 0x17;
    const USB_READY: u8 = 0x18;

    /// Decodes a raw status byte.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            Self::SUCCESS => ConnectionStatus::Success,
            Self::CONNECT => ConnectionStatus::Connect,
            Self::DISCONNECT => ConnectionStatus::Disconnect,
            Self::BUFFER_OVERRUN => ConnectionStatus::BufferOverrun,
            Self::USB_READY => ConnectionStatus::UsbReady,
            other => ConnectionStatus::Other(other),
        }
    }

    /// Encodes the status back into its raw byte.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            ConnectionStatus::Success => Self::SUCCESS,
            ConnectionStatus::Connect => Self::CONNECT,
            ConnectionStatus::Disconnect => Self::DISCONNECT,
            ConnectionStatus::BufferOverrun => Self::BUFFER_OVERRUN,
            ConnectionStatus::UsbReady => Self::USB_READY,
            ConnectionStatus::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Success => f.write_str("success"),
            ConnectionStatus::Connect => f.write_str("connect"),
            ConnectionStatus::Disconnect => f.write_str("disconnect"),
            ConnectionStatus::BufferOverrun => f.write_str("buffer-overrun"),
            ConnectionStatus::UsbReady => f.write_str("usb-ready"),
            ConnectionStatus::Other(raw) => write!(f, "status({raw:#04x})"),
        }
    }
}

/// Blocking delays required by the bridge protocol.
///
/// Firmware busy-waits on the hardware timer; tests substitute a no-op.
pub trait BridgeDelay {
    /// Blocks for at least `duration`.
    fn delay(&mut self, duration: Duration);
}

/// Delay that returns immediately.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopDelay;

impl BridgeDelay for NoopDelay {
    fn delay(&mut self, _: Duration) {}
}

/// Failure reported by a bridge command or transfer stage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BridgeError<E = ()> {
    /// Serial transport failure.
    Link(E),
    /// Command acknowledged with something other than [`CMD_RET_SUCCESS`].
    Rejected { command: Command, response: u8 },
    /// Interrupt status did not report success.
    Status {
        expected: ConnectionStatus,
        actual: ConnectionStatus,
    },
    /// Returned block length differs from the expected length.
    LengthMismatch { expected: usize, actual: usize },
    /// Existence probe echoed the wrong value.
    ProbeMismatch { sent: u8, received: u8 },
    /// Baud rate outside the bridge's coefficient table.
    UnsupportedBaudRate(u32),
    /// Payload does not fit the bridge's transfer buffer.
    PayloadTooLarge(usize),
    /// Caller buffer is too small for the requested transfer.
    BufferTooSmall { required: usize, available: usize },
}

impl<E> BridgeError<E> {
    /// Maps the inner link error type.
    pub fn map_link<F, M>(self, mapper: M) -> BridgeError<F>
    where
        M: FnOnce(E) -> F,
    {
        match self {
            BridgeError::Link(err) => BridgeError::Link(mapper(err)),
            BridgeError::Rejected { command, response } => {
                BridgeError::Rejected { command, response }
            }
            BridgeError::Status { expected, actual } => BridgeError::Status { expected, actual },
            BridgeError::LengthMismatch { expected, actual } => {
                BridgeError::LengthMismatch { expected, actual }
            }
            BridgeError::ProbeMismatch { sent, received } => {
                BridgeError::ProbeMismatch { sent, received }
            }
            BridgeError::UnsupportedBaudRate(rate) => BridgeError::UnsupportedBaudRate(rate),
            BridgeError::PayloadTooLarge(len) => BridgeError::PayloadTooLarge(len),
            BridgeError::BufferTooSmall {
                required,
                available,
            } => BridgeError::BufferTooSmall {
                required,
                available,
            },
        }
    }
}

impl<E> From<E> for BridgeError<E> {
    fn from(err: E) -> Self {
        BridgeError::Link(err)
    }
}

impl<E> fmt::Display for BridgeError<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Link(err) => write!(f, "link error: {err:?}"),
            BridgeError::Rejected { command, response } => {
                write!(f, "{command:?} rejected with {response:#04x}")
            }
            BridgeError::Status { expected, actual } => {
                write!(f, "expected status {expected}, got {actual}")
            }
            BridgeError::LengthMismatch { expected, actual } => {
                write!(f, "expected {expected} bytes, bridge returned {actual}")
            }
            BridgeError::ProbeMismatch { sent, received } => {
                write!(f, "probe {sent:#04x} echoed as {received:#04x}")
            }
            BridgeError::UnsupportedBaudRate(rate) => write!(f, "unsupported baud rate {rate}"),
            BridgeError::PayloadTooLarge(len) => write!(f, "payload of {len} bytes too large"),
            BridgeError::BufferTooSmall {
                required,
                available,
            } => write!(f, "need {required} bytes, buffer holds {available}"),
        }
    }
}

/// Rates with a known divisor, slowest first.
pub const SUPPORTED_BAUD_RATES: [u32; 4] = [9_600, 19_200, 57_600, 115_200];

/// Looks up the divisor coefficient and constant for a baud rate.
#[must_use]
pub const fn baud_rate_divisor(baud_rate: u32) -> Option<(u8, u8)> {
    match baud_rate {
        9_600 => Some((0x02, 0xb2)),
        19_200 => Some((0x02, 0xd9)),
        57_600 => Some((0x03, 0x98)),
        115_200 => Some((0x03, 0xcc)),
        _ => None,
    }
}

/// Token argument byte: endpoint number in the high nibble, PID in the low.
#[must_use]
pub const fn token_argument(endpoint: u8, pid: TokenPid) -> u8 {
    (endpoint << 4) | pid as u8
}

/// Drives the bridge's command set over a framed serial link.
pub struct BridgeDriver<S, D> {
    link: LinkFramer<S>,
    delay: D,
}

impl<S, D> BridgeDriver<S, D>
where
    S: SerialLink,
    D: BridgeDelay,
{
    /// Creates a driver from a serial link and a delay provider.
    pub const fn new(serial: S, delay: D) -> Self {
        Self {
            link: LinkFramer::new(serial),
            delay,
        }
    }

    /// Borrows the framed link.
    pub fn link(&self) -> &LinkFramer<S> {
        &self.link
    }

    /// Mutably borrows the framed link.
    pub fn link_mut(&mut self) -> &mut LinkFramer<S> {
        &mut self.link
    }

    /// Consumes the driver, returning the serial link and delay provider.
    pub fn into_parts(self) -> (S, D) {
        (self.link.into_inner(), self.delay)
    }

    /// Blocks for `duration` using the injected delay provider.
    pub fn wait(&mut self, duration: Duration) {
        self.delay.delay(duration);
    }

    /// Resets the bridge. Callers wait [`RESET_SETTLE`] before the next command.
    pub fn reset(&mut self) -> Result<(), BridgeError<S::Error>> {
        self.link.send_command(Command::ResetAll.opcode())?;
        self.link.flush()?;
        Ok(())
    }

    /// Confirms the bridge is present by asking it to invert `probe`.
    pub fn existence_probe(&mut self, probe: u8) -> Result<(), BridgeError<S::Error>> {
        self.link.send_command(Command::CheckExists.opcode())?;
        self.link.send_data(probe)?;
        self.link.flush()?;

        let received = self.link.read_byte()?;
        if received == !probe {
            Ok(())
        } else {
            Err(BridgeError::ProbeMismatch {
                sent: probe,
                received,
            })
        }
    }

    /// Switches both the bridge and the local link to `baud_rate`.
    ///
    /// Unsupported rates fail before anything is written.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), BridgeError<S::Error>> {
        let Some((coefficient, constant)) = baud_rate_divisor(baud_rate) else {
            return Err(BridgeError::UnsupportedBaudRate(baud_rate));
        };

        self.link.send_command(Command::SetBaudRate.opcode())?;
        self.link.send_data(coefficient)?;
        self.link.send_data(constant)?;
        // The ack arrives at the new rate.
        self.link.switch_baud_rate(baud_rate)?;

        self.expect_ack(Command::SetBaudRate)
    }

    /// Selects the bridge operating mode.
    pub fn set_usb_mode(&mut self, mode: UsbMode) -> Result<(), BridgeError<S::Error>> {
        self.link.send_command(Command::SetUsbMode.opcode())?;
        self.link.send_data(mode as u8)?;
        self.expect_ack(Command::SetUsbMode)
    }

    /// Reports the current USB line state.
    pub fn test_connect(&mut self) -> Result<ConnectionStatus, BridgeError<S::Error>> {
        self.link.send_command(Command::TestConnect.opcode())?;
        Ok(ConnectionStatus::from_raw(self.link.read_byte()?))
    }

    /// Reads the last interrupt status.
    pub fn get_status(&mut self) -> Result<ConnectionStatus, BridgeError<S::Error>> {
        self.link.send_command(Command::GetStatus.opcode())?;
        Ok(ConnectionStatus::from_raw(self.link.read_byte()?))
    }

    /// Issues a token to `endpoint` and checks the resulting status.
    pub fn issue_token(&mut self, endpoint: u8, pid: TokenPid) -> Result<(), BridgeError<S::Error>> {
        self.link.send_command(Command::IssueToken.opcode())?;
        self.link.send_data(token_argument(endpoint, pid))?;
        self.delay.delay(TOKEN_SETTLE);

        self.expect_status_success()
    }

    /// Sets the toggle used for the next IN data packet.
    pub fn set_receive_toggle(&mut self, toggle: DataToggle) -> Result<(), BridgeError<S::Error>> {
        self.set_toggle(Command::SetEndpoint6, toggle)
    }

    /// Sets the toggle used for the next SETUP/OUT data packet.
    pub fn set_transmit_toggle(&mut self, toggle: DataToggle) -> Result<(), BridgeError<S::Error>> {
        self.set_toggle(Command::SetEndpoint7, toggle)
    }

    /// Stages `bytes` in the bridge's transmit buffer.
    pub fn write_buffer(&mut self, bytes: &[u8]) -> Result<(), BridgeError<S::Error>> {
        let len = u8::try_from(bytes.len())
            .ok()
            .filter(|len| usize::from(*len) <= MAX_BUFFER_LEN)
            .ok_or(BridgeError::PayloadTooLarge(bytes.len()))?;

        self.link.send_command(Command::WriteUsbData.opcode())?;
        self.link.send_data(len)?;
        self.link.send_data_slice(bytes)?;
        Ok(())
    }

    /// Reads the bridge's receive buffer into `buf`, returning the block length.
    ///
    /// A block that does not fit is drained from the link before failing.
    pub fn read_buffer(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError<S::Error>> {
        self.link.send_command(Command::ReadUsbData0.opcode())?;
        let len = usize::from(self.link.read_byte()?);
        if len > buf.len() {
            self.link.discard(len)?;
            return Err(BridgeError::BufferTooSmall {
                required: len,
                available: buf.len(),
            });
        }

        self.link.read_bytes(&mut buf[..len])?;
        Ok(len)
    }

    /// Reads a receive-buffer block that must be exactly `buf.len()` bytes long.
    pub fn read_buffer_exact(&mut self, buf: &mut [u8]) -> Result<(), BridgeError<S::Error>> {
        self.link.send_command(Command::ReadUsbData0.opcode())?;
        let len = usize::from(self.link.read_byte()?);
        if len != buf.len() {
            self.link.discard(len)?;
            return Err(BridgeError::LengthMismatch {
                expected: buf.len(),
                actual: len,
            });
        }

        self.link.read_bytes(buf)?;
        Ok(())
    }

    /// Asks the bridge to fetch the attached device's descriptor.
    pub fn fetch_device_descriptor(
        &mut self,
    ) -> Result<DeviceDescriptor, BridgeError<S::Error>> {
        self.link.send_command(Command::GetDescriptor.opcode())?;
        self.link.send_data(DESCRIPTOR_TYPE_DEVICE)?;
        self.delay.delay(DESCRIPTOR_SETTLE);
        self.expect_status_success()?;

        let mut raw = [0u8; DEVICE_DESCRIPTOR_LEN];
        self.read_buffer_exact(&mut raw)?;
        Ok(DeviceDescriptor::parse(&raw))
    }

    /// Lets the bridge finish addressing and configuring the device.
    pub fn auto_setup(&mut self) -> Result<(), BridgeError<S::Error>> {
        self.link.send_command(Command::AutoSetup.opcode())?;
        self.delay.delay(AUTO_SETUP_SETTLE);
        self.expect_status_success()
    }

    fn set_toggle(
        &mut self,
        command: Command,
        toggle: DataToggle,
    ) -> Result<(), BridgeError<S::Error>> {
        self.link.send_command(command.opcode())?;
        self.link.send_data(toggle as u8)?;
        self.delay.delay(TOGGLE_SETTLE);
        Ok(())
    }

    fn expect_ack(&mut self, command: Command) -> Result<(), BridgeError<S::Error>> {
        let response = self.link.read_byte()?;
        if response == CMD_RET_SUCCESS {
            Ok(())
        } else {
            Err(BridgeError::Rejected { command, response })
        }
    }

    fn expect_status_success(&mut self) -> Result<(), BridgeError<S::Error>> {
        let actual = self.get_status()?;
        if actual == ConnectionStatus::Success {
            Ok(())
        } else {
            Err(BridgeError::Status {
                expected: ConnectionStatus::Success,
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::FrameKind;
    use crate::link::testing::{Exhausted, ScriptedLink};

    fn driver() -> BridgeDriver<ScriptedLink, NoopDelay> {
        BridgeDriver::new(ScriptedLink::new(), NoopDelay)
    }

    #[test]
    fn existence_probe_expects_complement() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().respond(&[!0x5a]);
        assert_eq!(bridge.existence_probe(0x5a), Ok(()));

        let bytes: heapless::Vec<_, 4> = bridge.link().serial().bytes().collect();
        assert_eq!(
            bytes.as_slice(),
            &[(FrameKind::Command, 0x06), (FrameKind::Data, 0x5a)]
        );
    }

    #[test]
    fn existence_probe_reports_wrong_echo() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().respond(&[0x5a]);
        assert_eq!(
            bridge.existence_probe(0x5a),
            Err(BridgeError::ProbeMismatch {
                sent: 0x5a,
                received: 0x5a
            })
        );
    }

    #[test]
    fn unsupported_baud_rate_leaves_link_untouched() {
        let mut bridge = driver();
        assert_eq!(
            bridge.set_baud_rate(38_400),
            Err(BridgeError::UnsupportedBaudRate(38_400))
        );
        assert!(bridge.link().serial().written.is_empty());
        assert_eq!(bridge.link().serial().baud_rate, 9_600);
    }

    #[test]
    fn baud_rate_change_sends_divisor_and_switches_link() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().respond(&[CMD_RET_SUCCESS]);
        assert_eq!(bridge.set_baud_rate(115_200), Ok(()));

        let bytes: heapless::Vec<_, 4> = bridge.link().serial().bytes().collect();
        assert_eq!(
            bytes.as_slice(),
            &[
                (FrameKind::Command, 0x02),
                (FrameKind::Data, 0x03),
                (FrameKind::Data, 0xcc)
            ]
        );
        assert_eq!(bridge.link().serial().baud_rate, 115_200);
    }

    #[test]
    fn usb_mode_requires_success_ack() {
        let mut bridge = driver();
        bridge
            .link_mut()
            .serial_mut()
            .respond(&[CMD_RET_SUCCESS, CMD_RET_ABORT]);

        assert_eq!(bridge.set_usb_mode(UsbMode::HostEnabled), Ok(()));
        assert_eq!(
            bridge.set_usb_mode(UsbMode::HostEnabledReset),
            Err(BridgeError::Rejected {
                command: Command::SetUsbMode,
                response: CMD_RET_ABORT
            })
        );
    }

    #[test]
    fn issue_token_encodes_endpoint_and_polls_status() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().respond(&[0x14, 0x2e]);

        assert_eq!(bridge.issue_token(0, TokenPid::Setup), Ok(()));
        assert_eq!(
            bridge.issue_token(3, TokenPid::Out),
            Err(BridgeError::Status {
                expected: ConnectionStatus::Success,
                actual: ConnectionStatus::Other(0x2e)
            })
        );

        let bytes: heapless::Vec<_, 8> = bridge.link().serial().bytes().collect();
        assert_eq!(
            bytes.as_slice(),
            &[
                (FrameKind::Command, 0x4f),
                (FrameKind::Data, 0x0d),
                (FrameKind::Command, 0x22),
                (FrameKind::Command, 0x4f),
                (FrameKind::Data, 0x31),
                (FrameKind::Command, 0x22),
            ]
        );
    }

    #[test]
    fn write_buffer_prefixes_length() {
        let mut bridge = driver();
        bridge.write_buffer(&[0xaa, 0xbb]).unwrap();

        let bytes: heapless::Vec<_, 4> = bridge.link().serial().bytes().collect();
        assert_eq!(
            bytes.as_slice(),
            &[
                (FrameKind::Command, 0x2b),
                (FrameKind::Data, 2),
                (FrameKind::Data, 0xaa),
                (FrameKind::Data, 0xbb)
            ]
        );
    }

    #[test]
    fn write_buffer_rejects_oversized_payload() {
        let mut bridge = driver();
        let payload = [0u8; MAX_BUFFER_LEN + 1];
        assert_eq!(
            bridge.write_buffer(&payload),
            Err(BridgeError::PayloadTooLarge(MAX_BUFFER_LEN + 1))
        );
        assert!(bridge.link().serial().written.is_empty());
    }

    #[test]
    fn read_buffer_returns_block_length() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().respond(&[3, 7, 8, 9]);

        let mut buf = [0u8; 8];
        assert_eq!(bridge.read_buffer(&mut buf), Ok(3));
        assert_eq!(&buf[..3], &[7, 8, 9]);
    }

    #[test]
    fn read_buffer_rejects_blocks_larger_than_buffer() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().respond(&[4, 1, 2, 3, 4, 0x15]);

        let mut buf = [0u8; 2];
        assert_eq!(
            bridge.read_buffer(&mut buf),
            Err(BridgeError::BufferTooSmall {
                required: 4,
                available: 2
            })
        );
        assert_eq!(bridge.test_connect(), Ok(ConnectionStatus::Connect));
    }

    #[test]
    fn descriptor_fetch_checks_length() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().respond(&[0x14, 9]);
        bridge.link_mut().serial_mut().respond(&[0; 9]);

        assert_eq!(
            bridge.fetch_device_descriptor(),
            Err(BridgeError::LengthMismatch {
                expected: DEVICE_DESCRIPTOR_LEN,
                actual: 9
            })
        );
        assert!(bridge.link().serial().responses.is_empty());
    }

    #[test]
    fn descriptor_fetch_parses_identity() {
        let mut bridge = driver();
        let raw = [
            18, 1, 0x00, 0x02, 0, 0, 0, 64, 0x4c, 0x05, 0xc4, 0x05, 0x00, 0x01, 1, 2, 0, 1,
        ];
        bridge.link_mut().serial_mut().respond(&[0x14, 18]);
        bridge.link_mut().serial_mut().respond(&raw);

        let descriptor = bridge.fetch_device_descriptor().unwrap();
        assert_eq!(descriptor.identity(), DeviceIdentity::new(0x054c, 0x05c4));
        assert_eq!(descriptor.max_packet_size0, 64);
    }

    #[test]
    fn link_errors_propagate() {
        let mut bridge = driver();
        assert_eq!(bridge.test_connect(), Err(BridgeError::Link(Exhausted)));
    }

    #[test]
    fn connection_status_round_trips_raw_codes() {
        for raw in 0..=u8::MAX {
            assert_eq!(ConnectionStatus::from_raw(raw).to_raw(), raw);
        }
        assert_eq!(ConnectionStatus::from_raw(0x16), ConnectionStatus::Disconnect);
    }

    #[test]
    fn opcodes_decode_to_their_commands() {
        for raw in 0..=u8::MAX {
            if let Some(command) = Command::from_opcode(raw) {
                assert_eq!(command.opcode(), raw);
            }
        }
        assert_eq!(Command::from_opcode(0x4f), Some(Command::IssueToken));
        assert_eq!(Command::from_opcode(0x00), None);
    }

    #[test]
    fn every_supported_rate_has_a_divisor() {
        for rate in SUPPORTED_BAUD_RATES {
            assert!(baud_rate_divisor(rate).is_some(), "{rate}");
        }
        assert_eq!(baud_rate_divisor(38_400), None);
    }

    #[test]
    fn map_link_only_touches_transport_errors() {
        let link: BridgeError<u8> = BridgeError::Link(3);
        assert_eq!(link.map_link(u16::from), BridgeError::Link(3u16));
        let probe: BridgeError<u8> = BridgeError::ProbeMismatch {
            sent: 0x5a,
            received: 0x5a,
        };
        assert_eq!(
            probe.map_link(u16::from),
            BridgeError::ProbeMismatch {
                sent: 0x5a,
                received: 0x5a
            }
        );
    }
}

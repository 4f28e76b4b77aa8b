//! USB control transfers assembled from bridge commands.
//!
//! The bridge only knows how to stage buffers and issue tokens, so each
//! transfer is spelled out stage by stage: the SETUP packet always travels as
//! DATA0, the data stage uses DATA1, and the status stage runs in the opposite
//! direction of the data stage with DATA1.

use crate::bridge::{BridgeDelay, BridgeDriver, BridgeError, DataToggle, TokenPid};
use crate::link::SerialLink;

/// Endpoint number used for control transfers.
pub const CONTROL_ENDPOINT: u8 = 0x00;

/// Size of a SETUP packet.
pub const SETUP_PACKET_LEN: usize = 8;

/// HID class request codes (HID 1.11 §7.2).
pub const HID_REQ_GET_REPORT: u8 = 0x01;
pub const HID_REQ_SET_REPORT: u8 = 0x09;

/// Standard GET_STATUS request code.
pub const REQ_GET_STATUS: u8 = 0x00;

/// HID report type carried in the high byte of `wValue`.
pub const HID_REPORT_TYPE_FEATURE: u8 = 0x03;

/// Data stage direction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
}

/// Request category.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
}

/// Request recipient.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// `bmRequestType` bitmap.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RequestType {
    pub direction: Direction,
    pub kind: RequestKind,
    pub recipient: Recipient,
}

impl RequestType {
    #[must_use]
    pub const fn new(direction: Direction, kind: RequestKind, recipient: Recipient) -> Self {
        Self {
            direction,
            kind,
            recipient,
        }
    }

    /// Packs the fields into the wire byte.
    #[must_use]
    pub const fn bits(self) -> u8 {
        let direction = match self.direction {
            Direction::HostToDevice => 0,
            Direction::DeviceToHost => 0x80,
        };
        let kind = match self.kind {
            RequestKind::Standard => 0x00,
            RequestKind::Class => 0x20,
            RequestKind::Vendor => 0x40,
        };
        let recipient = match self.recipient {
            Recipient::Device => 0x00,
            Recipient::Interface => 0x01,
            Recipient::Endpoint => 0x02,
            Recipient::Other => 0x03,
        };
        direction | kind | recipient
    }
}

/// Eight-byte SETUP packet describing one control transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControlRequest {
    pub request_type: RequestType,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl ControlRequest {
    #[must_use]
    pub const fn new(
        request_type: RequestType,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Self {
        Self {
            request_type,
            request,
            value,
            index,
            length,
        }
    }

    /// HID GET_REPORT for a feature report addressed to interface `index`.
    #[must_use]
    pub const fn get_feature_report(report_id: u8, index: u16, length: u16) -> Self {
        Self::new(
            RequestType::new(
                Direction::DeviceToHost,
                RequestKind::Class,
                Recipient::Interface,
            ),
            HID_REQ_GET_REPORT,
            feature_report_value(report_id),
            index,
            length,
        )
    }

    /// HID SET_REPORT for a feature report addressed to interface `index`.
    #[must_use]
    pub const fn set_feature_report(report_id: u8, index: u16, length: u16) -> Self {
        Self::new(
            RequestType::new(
                Direction::HostToDevice,
                RequestKind::Class,
                Recipient::Interface,
            ),
            HID_REQ_SET_REPORT,
            feature_report_value(report_id),
            index,
            length,
        )
    }

    /// Standard device GET_STATUS.
    #[must_use]
    pub const fn get_device_status() -> Self {
        Self::new(
            RequestType::new(
                Direction::DeviceToHost,
                RequestKind::Standard,
                Recipient::Device,
            ),
            REQ_GET_STATUS,
            0,
            0,
            2,
        )
    }

    /// Serialises the SETUP packet.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; SETUP_PACKET_LEN] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type.bits(),
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    /// Expected data stage length in bytes.
    #[must_use]
    pub const fn data_len(&self) -> usize {
        self.length as usize
    }
}

const fn feature_report_value(report_id: u8) -> u16 {
    ((HID_REPORT_TYPE_FEATURE as u16) << 8) | report_id as u16
}

impl<S, D> BridgeDriver<S, D>
where
    S: SerialLink,
    D: BridgeDelay,
{
    /// Runs a device-to-host control transfer, filling `buf[..request.length]`.
    ///
    /// Any failing stage aborts the transfer; `buf` must not be trusted on error.
    pub fn control_in(
        &mut self,
        request: &ControlRequest,
        buf: &mut [u8],
    ) -> Result<usize, BridgeError<S::Error>> {
        let len = request.data_len();
        if buf.len() < len {
            return Err(BridgeError::BufferTooSmall {
                required: len,
                available: buf.len(),
            });
        }

        self.setup_stage(request)?;

        self.set_receive_toggle(DataToggle::Data1)?;
        self.issue_token(CONTROL_ENDPOINT, TokenPid::In)?;
        self.read_buffer_exact(&mut buf[..len])?;

        self.write_buffer(&[])?;
        self.set_transmit_toggle(DataToggle::Data1)?;
        self.issue_token(CONTROL_ENDPOINT, TokenPid::Out)?;

        Ok(len)
    }

    /// Runs a host-to-device control transfer carrying `payload`.
    pub fn control_out(
        &mut self,
        request: &ControlRequest,
        payload: &[u8],
    ) -> Result<(), BridgeError<S::Error>> {
        self.setup_stage(request)?;

        self.write_buffer(payload)?;
        self.set_transmit_toggle(DataToggle::Data0.flipped())?;
        self.issue_token(CONTROL_ENDPOINT, TokenPid::Out)?;

        self.set_receive_toggle(DataToggle::Data1)?;
        self.issue_token(CONTROL_ENDPOINT, TokenPid::In)?;

        Ok(())
    }

    fn setup_stage(&mut self, request: &ControlRequest) -> Result<(), BridgeError<S::Error>> {
        self.write_buffer(&request.to_bytes())?;
        self.set_transmit_toggle(DataToggle::Data0)?;
        self.issue_token(CONTROL_ENDPOINT, TokenPid::Setup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ConnectionStatus, NoopDelay};
    use crate::link::FrameKind;
    use crate::link::testing::ScriptedLink;

    const OK: u8 = 0x14;

    fn driver() -> BridgeDriver<ScriptedLink, NoopDelay> {
        BridgeDriver::new(ScriptedLink::new(), NoopDelay)
    }

    #[test]
    fn feature_requests_match_hid_layout() {
        let get = ControlRequest::get_feature_report(0xf2, 0, 16);
        assert_eq!(get.to_bytes(), [0xa1, 0x01, 0xf2, 0x03, 0x00, 0x00, 0x10, 0x00]);

        let set = ControlRequest::set_feature_report(0xf0, 3, 64);
        assert_eq!(set.to_bytes(), [0x21, 0x09, 0xf0, 0x03, 0x03, 0x00, 0x40, 0x00]);

        let status = ControlRequest::get_device_status();
        assert_eq!(status.to_bytes(), [0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00]);
    }

    #[test]
    fn control_in_runs_setup_data_and_status_stages() {
        let mut bridge = driver();
        bridge
            .link_mut()
            .serial_mut()
            .respond(&[OK, OK, 2, 0xde, 0xad, OK]);

        let request = ControlRequest::get_device_status();
        let mut buf = [0u8; 4];
        assert_eq!(bridge.control_in(&request, &mut buf), Ok(2));
        assert_eq!(&buf[..2], &[0xde, 0xad]);

        let commands: heapless::Vec<u8, 16> = bridge.link().serial().commands().collect();
        assert_eq!(
            commands.as_slice(),
            &[
                0x2b, 0x1d, 0x4f, 0x22, // SETUP
                0x1c, 0x4f, 0x22, 0x27, // IN data
                0x2b, 0x1d, 0x4f, 0x22, // zero-length OUT status
            ]
        );

        let bytes: heapless::Vec<(FrameKind, u8), 64> = bridge.link().serial().bytes().collect();
        assert!(bytes.contains(&(FrameKind::Data, 0x80)), "SETUP uses DATA0");
        assert_eq!(
            bytes
                .iter()
                .filter(|entry| **entry == (FrameKind::Data, 0xc0))
                .count(),
            2,
            "data and status stages use DATA1"
        );
    }

    #[test]
    fn control_in_rejects_length_mismatch() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().respond(&[OK, OK, 1, 0x5a]);

        let request = ControlRequest::get_device_status();
        let mut buf = [0u8; 2];
        assert_eq!(
            bridge.control_in(&request, &mut buf),
            Err(BridgeError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn oversized_data_stage_is_drained_before_the_next_command() {
        let mut bridge = driver();
        bridge
            .link_mut()
            .serial_mut()
            .respond(&[OK, OK, 3, 0xaa, 0xbb, 0xcc, 0x15]);

        let request = ControlRequest::get_device_status();
        let mut buf = [0u8; 2];
        assert_eq!(
            bridge.control_in(&request, &mut buf),
            Err(BridgeError::LengthMismatch {
                expected: 2,
                actual: 3
            })
        );
        assert_eq!(bridge.test_connect(), Ok(ConnectionStatus::Connect));
    }

    #[test]
    fn control_in_aborts_on_setup_stall() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().respond(&[0x2e]);

        let request = ControlRequest::get_device_status();
        let mut buf = [0u8; 2];
        assert_eq!(
            bridge.control_in(&request, &mut buf),
            Err(BridgeError::Status {
                expected: ConnectionStatus::Success,
                actual: ConnectionStatus::Other(0x2e)
            })
        );
        let commands: heapless::Vec<u8, 16> = bridge.link().serial().commands().collect();
        assert_eq!(commands.last(), Some(&0x22));
    }

    #[test]
    fn control_in_requires_room_for_data_stage() {
        let mut bridge = driver();
        let request = ControlRequest::get_feature_report(0xf1, 0, 64);
        let mut buf = [0u8; 8];
        assert!(matches!(
            bridge.control_in(&request, &mut buf),
            Err(BridgeError::BufferTooSmall { required: 64, .. })
        ));
        assert!(bridge.link().serial().written.is_empty());
    }

    #[test]
    fn control_out_writes_payload_then_closes_with_in() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().respond(&[OK, OK, OK]);

        let request = ControlRequest::set_feature_report(0xf0, 3, 2);
        assert_eq!(bridge.control_out(&request, &[0x11, 0x22]), Ok(()));

        let commands: heapless::Vec<u8, 16> = bridge.link().serial().commands().collect();
        assert_eq!(
            commands.as_slice(),
            &[
                0x2b, 0x1d, 0x4f, 0x22, // SETUP
                0x2b, 0x1d, 0x4f, 0x22, // OUT data
                0x1c, 0x4f, 0x22, // IN status
            ]
        );
    }

    #[test]
    fn control_out_stops_after_failed_data_stage() {
        let mut bridge = driver();
        bridge.link_mut().serial_mut().respond(&[OK, 0x2e]);

        let request = ControlRequest::set_feature_report(0xf0, 3, 1);
        assert!(bridge.control_out(&request, &[0x11]).is_err());

        let commands: heapless::Vec<u8, 16> = bridge.link().serial().commands().collect();
        assert_eq!(commands.len(), 8, "status stage must not run");
    }
}

//! Authentication device model reachable through the simulated bridge.
//!
//! Only endpoint 0 is modelled. The device accepts challenge chunks through
//! SET_REPORT, signs once the fifth chunk lands, and hands out signature
//! chunks through GET_REPORT in its own index order.

use heapless::Vec;

use crate::bridge::{DEVICE_DESCRIPTOR_LEN, DeviceDescriptor, DeviceIdentity, MAX_BUFFER_LEN};
use crate::control::{HID_REQ_GET_REPORT, HID_REQ_SET_REPORT, REQ_GET_STATUS, SETUP_PACKET_LEN};
use crate::report::{
    AUTH_TIMESTAMP_REPORT_ID, AUTH_TIMESTAMP_REPORT_LEN, CHALLENGE_CHUNK_COUNT,
    CHALLENGE_REPORT_ID, CHUNK_PAYLOAD_LEN, CHUNK_REPORT_LEN, NONCE_LEN, SIGN_STATE_REPORT_ID,
    SIGNATURE_CHUNK_COUNT, SIGNATURE_LEN, SIGNATURE_REPORT_ID, SignState, SignatureChunk,
    report_checksum,
};

/// Handshake the device answers a token with when it refuses the transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stall;

const SIGN_STATE_BUSY: u8 = 0x10;
const SIGN_STATE_NO_REQUEST: u8 = 0x01;

/// Derives the signature the device returns for `nonce` in round `sequence`.
#[must_use]
pub fn expected_signature(nonce: &[u8; NONCE_LEN], sequence: u8) -> [u8; SIGNATURE_LEN] {
    let mut signature = [0u8; SIGNATURE_LEN];
    for (word, bytes) in (0u32..).zip(signature.chunks_mut(4)) {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[sequence]);
        hasher.update(&word.to_le_bytes());
        hasher.update(nonce);
        let value = hasher.finalize().to_le_bytes();
        bytes.copy_from_slice(&value[..bytes.len()]);
    }
    signature
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct SetupPacket {
    request_type: u8,
    request: u8,
    value: u16,
    length: u16,
}

impl SetupPacket {
    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SETUP_PACKET_LEN {
            return None;
        }
        Some(Self {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }

    const fn report_id(self) -> u8 {
        self.value.to_le_bytes()[0]
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ControlStage {
    Idle,
    DataOut(SetupPacket),
    DataIn(SetupPacket),
    /// Host-to-device data done, zero-length IN pending.
    StatusIn,
    /// Device-to-host data done, zero-length OUT pending.
    StatusOut,
}

/// One-shot failures armed by tests and the emulator shell.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceFaults {
    /// Stall the next write of this challenge chunk index.
    pub stall_challenge_chunk: Option<u8>,
    /// Stall the signature read after this many successful reads.
    pub stall_signature_read: Option<u8>,
}

/// Simulated authentication dongle.
#[derive(Clone, Debug)]
pub struct SimulatedAuthDevice {
    identity: DeviceIdentity,
    configured: bool,
    stage: ControlStage,
    challenge: [u8; NONCE_LEN],
    challenge_mask: u8,
    sequence: u8,
    signing: Option<u8>,
    signing_latency: u8,
    signature: [u8; SIGNATURE_LEN],
    next_chunk: u8,
    rounds: u32,
    challenge_writes: u32,
    faults: DeviceFaults,
}

impl SimulatedAuthDevice {
    /// Sign-state polls answered with "busy" before a signature is ready.
    pub const DEFAULT_SIGNING_LATENCY: u8 = 2;

    #[must_use]
    pub const fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            configured: false,
            stage: ControlStage::Idle,
            challenge: [0; NONCE_LEN],
            challenge_mask: 0,
            sequence: 0,
            signing: None,
            signing_latency: Self::DEFAULT_SIGNING_LATENCY,
            signature: [0; SIGNATURE_LEN],
            next_chunk: 0,
            rounds: 0,
            challenge_writes: 0,
            faults: DeviceFaults {
                stall_challenge_chunk: None,
                stall_signature_read: None,
            },
        }
    }

    /// Overrides how many sign-state polls report busy.
    #[must_use]
    pub const fn with_signing_latency(mut self, polls: u8) -> Self {
        self.signing_latency = polls;
        self
    }

    #[must_use]
    pub const fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// Device descriptor as returned to the bridge's descriptor fetch.
    #[must_use]
    pub const fn descriptor(&self) -> [u8; DEVICE_DESCRIPTOR_LEN] {
        DeviceDescriptor {
            length: DEVICE_DESCRIPTOR_LEN as u8,
            descriptor_type: 0x01,
            usb_release: 0x0200,
            device_class: 0x00,
            device_subclass: 0x00,
            device_protocol: 0x00,
            max_packet_size0: MAX_BUFFER_LEN as u8,
            vendor_id: self.identity.vendor_id,
            product_id: self.identity.product_id,
            device_release: 0x0100,
            manufacturer_index: 1,
            product_index: 2,
            serial_number_index: 0,
            configuration_count: 1,
        }
        .to_bytes()
    }

    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.configured
    }

    /// Number of rounds for which a complete challenge arrived.
    #[must_use]
    pub const fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Number of challenge chunks accepted, across every round.
    #[must_use]
    pub const fn challenge_writes(&self) -> u32 {
        self.challenge_writes
    }

    /// Sequence number carried by the last challenge.
    #[must_use]
    pub const fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Last complete challenge.
    #[must_use]
    pub const fn challenge(&self) -> &[u8; NONCE_LEN] {
        &self.challenge
    }

    pub fn faults_mut(&mut self) -> &mut DeviceFaults {
        &mut self.faults
    }

    pub(crate) fn configure(&mut self) {
        self.configured = true;
    }

    /// Returns the device to its power-on control state after a bus reset.
    pub(crate) fn bus_reset(&mut self) {
        self.configured = false;
        self.stage = ControlStage::Idle;
    }

    pub(crate) fn setup(&mut self, bytes: &[u8]) -> Result<(), Stall> {
        let packet = SetupPacket::parse(bytes).ok_or(Stall)?;
        self.stage = match (packet.request_type, packet.request, packet.report_id()) {
            (0x21, HID_REQ_SET_REPORT, CHALLENGE_REPORT_ID) => ControlStage::DataOut(packet),
            (
                0xa1,
                HID_REQ_GET_REPORT,
                SIGNATURE_REPORT_ID | SIGN_STATE_REPORT_ID | AUTH_TIMESTAMP_REPORT_ID,
            )
            | (0x80, REQ_GET_STATUS, _) => ControlStage::DataIn(packet),
            _ => {
                self.stage = ControlStage::Idle;
                return Err(Stall);
            }
        };
        Ok(())
    }

    pub(crate) fn data_out(&mut self, data: &[u8]) -> Result<(), Stall> {
        match self.stage {
            ControlStage::DataOut(packet) if data.len() == usize::from(packet.length) => {
                self.accept_challenge(data)?;
                self.stage = ControlStage::StatusIn;
                Ok(())
            }
            ControlStage::StatusOut if data.is_empty() => {
                self.stage = ControlStage::Idle;
                Ok(())
            }
            _ => {
                self.stage = ControlStage::Idle;
                Err(Stall)
            }
        }
    }

    pub(crate) fn data_in(&mut self, out: &mut Vec<u8, MAX_BUFFER_LEN>) -> Result<(), Stall> {
        out.clear();
        match self.stage {
            ControlStage::DataIn(packet) => {
                let mut report = [0u8; MAX_BUFFER_LEN];
                let len = self.answer(packet, &mut report)?;
                let len = len.min(usize::from(packet.length));
                out.extend_from_slice(&report[..len]).map_err(|_| Stall)?;
                self.stage = ControlStage::StatusOut;
                Ok(())
            }
            ControlStage::StatusIn => {
                self.stage = ControlStage::Idle;
                Ok(())
            }
            _ => {
                self.stage = ControlStage::Idle;
                Err(Stall)
            }
        }
    }

    fn answer(&mut self, packet: SetupPacket, report: &mut [u8; MAX_BUFFER_LEN]) -> Result<usize, Stall> {
        if packet.request == REQ_GET_STATUS && packet.request_type == 0x80 {
            report[..2].copy_from_slice(&[0x00, 0x00]);
            return Ok(2);
        }

        match packet.report_id() {
            SIGN_STATE_REPORT_ID => {
                let state = match self.signing {
                    Some(0) => 0x00,
                    Some(polls) => {
                        self.signing = Some(polls - 1);
                        SIGN_STATE_BUSY
                    }
                    None => SIGN_STATE_NO_REQUEST,
                };
                let sign_state = SignState {
                    sequence: self.sequence,
                    state,
                    checksum: 0,
                }
                .to_report();
                report[..sign_state.len()].copy_from_slice(&sign_state);
                Ok(sign_state.len())
            }
            SIGNATURE_REPORT_ID => {
                if self.signing != Some(0) {
                    return Err(Stall);
                }
                if let Some(remaining) = self.faults.stall_signature_read {
                    if remaining == 0 {
                        self.faults.stall_signature_read = None;
                        return Err(Stall);
                    }
                    self.faults.stall_signature_read = Some(remaining - 1);
                }

                let index = self.next_chunk;
                self.next_chunk = (self.next_chunk + 1) % SIGNATURE_CHUNK_COUNT as u8;
                let offset = usize::from(index) * CHUNK_PAYLOAD_LEN;
                let mut payload = [0u8; CHUNK_PAYLOAD_LEN];
                payload.copy_from_slice(&self.signature[offset..offset + CHUNK_PAYLOAD_LEN]);
                let chunk = SignatureChunk {
                    sequence: self.sequence,
                    index,
                    payload,
                    checksum: 0,
                }
                .to_report();
                report[..CHUNK_REPORT_LEN].copy_from_slice(&chunk);
                Ok(CHUNK_REPORT_LEN)
            }
            AUTH_TIMESTAMP_REPORT_ID => {
                report[0] = AUTH_TIMESTAMP_REPORT_ID;
                report[1] = self.sequence;
                report[2..6].copy_from_slice(&self.rounds.to_le_bytes());
                Ok(AUTH_TIMESTAMP_REPORT_LEN)
            }
            _ => Err(Stall),
        }
    }

    fn accept_challenge(&mut self, data: &[u8]) -> Result<(), Stall> {
        if data.len() != CHUNK_REPORT_LEN || data[0] != CHALLENGE_REPORT_ID {
            return Err(Stall);
        }
        let (body, checksum) = data.split_at(CHUNK_REPORT_LEN - 4);
        if report_checksum(body).to_le_bytes() != checksum {
            return Err(Stall);
        }

        let index = data[2];
        if usize::from(index) >= CHALLENGE_CHUNK_COUNT {
            return Err(Stall);
        }
        if self.faults.stall_challenge_chunk == Some(index) {
            self.faults.stall_challenge_chunk = None;
            return Err(Stall);
        }

        if index == 0 {
            self.challenge_mask = 0;
            self.signing = None;
            self.sequence = data[1];
        }
        let start = usize::from(index) * CHUNK_PAYLOAD_LEN;
        let end = (start + CHUNK_PAYLOAD_LEN).min(NONCE_LEN);
        self.challenge[start..end].copy_from_slice(&data[4..4 + end - start]);
        self.challenge_mask |= 1 << index;
        self.challenge_writes += 1;

        if self.challenge_mask == (1 << CHALLENGE_CHUNK_COUNT) - 1 {
            self.signature = expected_signature(&self.challenge, self.sequence);
            self.signing = Some(self.signing_latency);
            self.next_chunk = 0;
            self.rounds += 1;
        }
        Ok(())
    }
}

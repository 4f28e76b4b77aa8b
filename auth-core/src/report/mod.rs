//! Feature report layouts exchanged with the authentication device.
//!
//! Challenges and signatures travel in 64-byte feature reports: a report id,
//! the round sequence number, the chunk index, a reserved zero, 56 payload
//! bytes, and a little-endian CRC32 over everything before it.

use core::fmt;

/// Payload bytes carried by one challenge or signature chunk.
pub const CHUNK_PAYLOAD_LEN: usize = 56;

/// Total length of a challenge or signature report.
pub const CHUNK_REPORT_LEN: usize = 4 + CHUNK_PAYLOAD_LEN + 4;

/// Number of challenge chunks per round.
pub const CHALLENGE_CHUNK_COUNT: usize = 5;

/// Meaningful payload bytes in the final challenge chunk.
pub const FINAL_CHALLENGE_PAYLOAD_LEN: usize = 32;

/// Nonce length consumed by one round.
pub const NONCE_LEN: usize = CHALLENGE_CHUNK_COUNT * CHUNK_PAYLOAD_LEN - 24;

/// Number of signature chunks per round.
pub const SIGNATURE_CHUNK_COUNT: usize = 19;

/// Reassembled signature length.
pub const SIGNATURE_LEN: usize = SIGNATURE_CHUNK_COUNT * CHUNK_PAYLOAD_LEN;

/// Length of the sign-state report.
pub const SIGN_STATE_REPORT_LEN: usize = 16;

/// Length of the auth timestamp report.
pub const AUTH_TIMESTAMP_REPORT_LEN: usize = 49;

/// Report carrying challenge chunks (SET_REPORT).
pub const CHALLENGE_REPORT_ID: u8 = 0xf0;

/// Report carrying signature chunks (GET_REPORT).
pub const SIGNATURE_REPORT_ID: u8 = 0xf1;

/// Report carrying signing progress (GET_REPORT).
pub const SIGN_STATE_REPORT_ID: u8 = 0xf2;

/// Report carrying the device's auth timestamp (GET_REPORT).
pub const AUTH_TIMESTAMP_REPORT_ID: u8 = 0xa3;

/// CRC32 over `bytes`.
#[must_use]
pub fn report_checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Errors raised when decoding a received report.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReportError {
    WrongReportId { expected: u8, actual: u8 },
    ChunkOutOfRange(u8),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::WrongReportId { expected, actual } => {
                write!(f, "expected report {expected:#04x}, got {actual:#04x}")
            }
            ReportError::ChunkOutOfRange(index) => write!(f, "chunk index {index} out of range"),
        }
    }
}

/// One outgoing slice of the nonce.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChallengeChunk {
    pub sequence: u8,
    pub index: u8,
    pub payload: [u8; CHUNK_PAYLOAD_LEN],
}

impl ChallengeChunk {
    /// Slices chunk `index` out of `nonce`, zero-padding the final chunk.
    #[must_use]
    pub fn from_nonce(nonce: &[u8; NONCE_LEN], sequence: u8, index: u8) -> Self {
        let start = usize::from(index) * CHUNK_PAYLOAD_LEN;
        let end = (start + CHUNK_PAYLOAD_LEN).min(NONCE_LEN);
        let mut payload = [0u8; CHUNK_PAYLOAD_LEN];
        if start < end {
            payload[..end - start].copy_from_slice(&nonce[start..end]);
        }

        Self {
            sequence,
            index,
            payload,
        }
    }

    /// Serialises the report, appending the checksum of the finalised bytes.
    #[must_use]
    pub fn to_report(&self) -> [u8; CHUNK_REPORT_LEN] {
        encode_chunk(CHALLENGE_REPORT_ID, self.sequence, self.index, &self.payload)
    }
}

/// Splits a nonce into the five challenge chunks of a round.
pub fn challenge_chunks(
    nonce: &[u8; NONCE_LEN],
    sequence: u8,
) -> impl Iterator<Item = ChallengeChunk> + '_ {
    (0u8..)
        .take(CHALLENGE_CHUNK_COUNT)
        .map(move |index| ChallengeChunk::from_nonce(nonce, sequence, index))
}

/// One received slice of the signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureChunk {
    pub sequence: u8,
    pub index: u8,
    pub payload: [u8; CHUNK_PAYLOAD_LEN],
    pub checksum: u32,
}

impl SignatureChunk {
    /// Decodes a GET_REPORT response.
    pub fn parse(report: &[u8; CHUNK_REPORT_LEN]) -> Result<Self, ReportError> {
        if report[0] != SIGNATURE_REPORT_ID {
            return Err(ReportError::WrongReportId {
                expected: SIGNATURE_REPORT_ID,
                actual: report[0],
            });
        }

        let index = report[2];
        if usize::from(index) >= SIGNATURE_CHUNK_COUNT {
            return Err(ReportError::ChunkOutOfRange(index));
        }

        let mut payload = [0u8; CHUNK_PAYLOAD_LEN];
        payload.copy_from_slice(&report[4..4 + CHUNK_PAYLOAD_LEN]);

        Ok(Self {
            sequence: report[1],
            index,
            payload,
            checksum: read_checksum(report),
        })
    }

    /// Serialises the chunk as the device would send it.
    #[must_use]
    pub fn to_report(&self) -> [u8; CHUNK_REPORT_LEN] {
        encode_chunk(SIGNATURE_REPORT_ID, self.sequence, self.index, &self.payload)
    }

    /// Returns `true` when the carried checksum matches the chunk contents.
    #[must_use]
    pub fn checksum_matches(&self) -> bool {
        let report = self.to_report();
        read_checksum(&report) == self.checksum
    }

    /// Offset of this chunk inside the reassembled signature.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.index as usize * CHUNK_PAYLOAD_LEN
    }
}

/// Signing progress reported by the device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SignState {
    pub sequence: u8,
    pub state: u8,
    pub checksum: u32,
}

impl SignState {
    const READY: u8 = 0x00;

    /// Decodes a GET_REPORT response.
    pub fn parse(report: &[u8; SIGN_STATE_REPORT_LEN]) -> Result<Self, ReportError> {
        if report[0] != SIGN_STATE_REPORT_ID {
            return Err(ReportError::WrongReportId {
                expected: SIGN_STATE_REPORT_ID,
                actual: report[0],
            });
        }

        Ok(Self {
            sequence: report[1],
            state: report[2],
            checksum: u32::from_le_bytes([report[12], report[13], report[14], report[15]]),
        })
    }

    /// Serialises the report as the device would send it.
    #[must_use]
    pub fn to_report(&self) -> [u8; SIGN_STATE_REPORT_LEN] {
        let mut report = [0u8; SIGN_STATE_REPORT_LEN];
        report[0] = SIGN_STATE_REPORT_ID;
        report[1] = self.sequence;
        report[2] = self.state;
        let checksum = report_checksum(&report[..SIGN_STATE_REPORT_LEN - 4]);
        report[SIGN_STATE_REPORT_LEN - 4..].copy_from_slice(&checksum.to_le_bytes());
        report
    }

    /// Returns `true` once the signature can be read back.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.state == Self::READY
    }
}

/// Collects signature chunks into a contiguous buffer.
///
/// Each retrieval attempt starts from [`SignatureAssembler::clear`]; chunks
/// from an earlier, aborted attempt are never reused.
pub struct SignatureAssembler {
    buffer: [u8; SIGNATURE_LEN],
    received: u32,
}

impl SignatureAssembler {
    const COMPLETE: u32 = (1 << SIGNATURE_CHUNK_COUNT) - 1;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [0; SIGNATURE_LEN],
            received: 0,
        }
    }

    /// Forgets every chunk received so far.
    pub fn clear(&mut self) {
        self.buffer = [0; SIGNATURE_LEN];
        self.received = 0;
    }

    /// Copies `chunk` into place at `index × 56`.
    pub fn insert(&mut self, chunk: &SignatureChunk) {
        let offset = chunk.offset();
        self.buffer[offset..offset + CHUNK_PAYLOAD_LEN].copy_from_slice(&chunk.payload);
        self.received |= 1 << chunk.index;
    }

    /// Number of distinct chunk indices received.
    #[must_use]
    pub const fn received(&self) -> u32 {
        self.received.count_ones()
    }

    /// Returns `true` once every chunk index has been received.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.received == Self::COMPLETE
    }

    /// Reassembled signature bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.buffer
    }
}

impl Default for SignatureAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_chunk(
    report_id: u8,
    sequence: u8,
    index: u8,
    payload: &[u8; CHUNK_PAYLOAD_LEN],
) -> [u8; CHUNK_REPORT_LEN] {
    let mut report = [0u8; CHUNK_REPORT_LEN];
    report[0] = report_id;
    report[1] = sequence;
    report[2] = index;
    report[4..4 + CHUNK_PAYLOAD_LEN].copy_from_slice(payload);

    let checksum = report_checksum(&report[..CHUNK_REPORT_LEN - 4]);
    report[CHUNK_REPORT_LEN - 4..].copy_from_slice(&checksum.to_le_bytes());
    report
}

fn read_checksum(report: &[u8; CHUNK_REPORT_LEN]) -> u32 {
    u32::from_le_bytes([
        report[CHUNK_REPORT_LEN - 4],
        report[CHUNK_REPORT_LEN - 3],
        report[CHUNK_REPORT_LEN - 2],
        report[CHUNK_REPORT_LEN - 1],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn counting_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        for (index, byte) in nonce.iter_mut().enumerate() {
            *byte = (index as u8).wrapping_add(1);
        }
        nonce
    }

    #[test]
    fn layout_constants_line_up() {
        assert_eq!(CHUNK_REPORT_LEN, 64);
        assert_eq!(NONCE_LEN, 256);
        assert_eq!(SIGNATURE_LEN, 1064);
        assert_eq!(
            (CHALLENGE_CHUNK_COUNT - 1) * CHUNK_PAYLOAD_LEN + FINAL_CHALLENGE_PAYLOAD_LEN,
            NONCE_LEN
        );
    }

    #[test]
    fn nonce_splits_into_five_chunks_with_padded_tail() {
        let nonce = counting_nonce();
        let chunks: heapless::Vec<ChallengeChunk, 8> = challenge_chunks(&nonce, 7).collect();

        assert_eq!(chunks.len(), CHALLENGE_CHUNK_COUNT);
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(usize::from(chunk.index), position);
            assert_eq!(chunk.sequence, 7);
        }
        for chunk in &chunks[..4] {
            let start = usize::from(chunk.index) * CHUNK_PAYLOAD_LEN;
            assert_eq!(&chunk.payload[..], &nonce[start..start + CHUNK_PAYLOAD_LEN]);
        }

        let tail = &chunks[4];
        assert_eq!(
            &tail.payload[..FINAL_CHALLENGE_PAYLOAD_LEN],
            &nonce[4 * CHUNK_PAYLOAD_LEN..]
        );
        assert!(tail.payload[FINAL_CHALLENGE_PAYLOAD_LEN..].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn challenge_report_header_and_checksum() {
        let nonce = counting_nonce();
        let report = ChallengeChunk::from_nonce(&nonce, 3, 2).to_report();

        assert_eq!(&report[..4], &[CHALLENGE_REPORT_ID, 3, 2, 0]);
        let expected = report_checksum(&report[..60]);
        assert_eq!(u32::from_le_bytes([report[60], report[61], report[62], report[63]]), expected);
    }

    #[test]
    fn signature_parse_rejects_foreign_reports() {
        let mut report = [0u8; CHUNK_REPORT_LEN];
        report[0] = CHALLENGE_REPORT_ID;
        assert_eq!(
            SignatureChunk::parse(&report),
            Err(ReportError::WrongReportId {
                expected: SIGNATURE_REPORT_ID,
                actual: CHALLENGE_REPORT_ID
            })
        );

        report[0] = SIGNATURE_REPORT_ID;
        report[2] = 19;
        assert_eq!(
            SignatureChunk::parse(&report),
            Err(ReportError::ChunkOutOfRange(19))
        );
    }

    #[test]
    fn sign_state_ready_when_zero() {
        let busy = SignState {
            sequence: 1,
            state: 0x10,
            checksum: 0,
        };
        let parsed = SignState::parse(&busy.to_report()).unwrap();
        assert!(!parsed.is_ready());
        assert_eq!(parsed.sequence, 1);

        let ready = SignState {
            sequence: 1,
            state: 0,
            checksum: 0,
        };
        assert!(SignState::parse(&ready.to_report()).unwrap().is_ready());
    }

    #[test]
    fn assembler_places_chunks_by_index() {
        let mut assembler = SignatureAssembler::new();
        for index in 0..SIGNATURE_CHUNK_COUNT as u8 {
            let mut payload = [0u8; CHUNK_PAYLOAD_LEN];
            for (offset, byte) in payload.iter_mut().enumerate() {
                *byte = index ^ offset as u8;
            }
            assembler.insert(&SignatureChunk {
                sequence: 1,
                index,
                payload,
                checksum: 0,
            });
        }

        assert!(assembler.is_complete());
        let signature = assembler.as_bytes();
        for index in 0..SIGNATURE_CHUNK_COUNT {
            for offset in 0..CHUNK_PAYLOAD_LEN {
                assert_eq!(
                    signature[index * CHUNK_PAYLOAD_LEN + offset],
                    index as u8 ^ offset as u8
                );
            }
        }
    }

    #[test]
    fn assembler_tracks_missing_indices() {
        let mut assembler = SignatureAssembler::new();
        let chunk = SignatureChunk {
            sequence: 1,
            index: 3,
            payload: [0xaa; CHUNK_PAYLOAD_LEN],
            checksum: 0,
        };
        assembler.insert(&chunk);
        assembler.insert(&chunk);
        assert_eq!(assembler.received(), 1);
        assert!(!assembler.is_complete());

        assembler.clear();
        assert_eq!(assembler.received(), 0);
        assert!(assembler.as_bytes().iter().all(|byte| *byte == 0));
    }

    proptest! {
        #[test]
        fn challenge_checksum_recomputes(nonce in prop::array::uniform32(any::<u8>()), sequence in any::<u8>(), index in 0u8..5) {
            let mut full = [0u8; NONCE_LEN];
            for (position, byte) in full.iter_mut().enumerate() {
                *byte = nonce[position % nonce.len()].wrapping_add(position as u8);
            }
            let report = ChallengeChunk::from_nonce(&full, sequence, index).to_report();
            let carried = u32::from_le_bytes([report[60], report[61], report[62], report[63]]);
            prop_assert_eq!(carried, report_checksum(&report[..60]));
        }

        #[test]
        fn signature_chunk_survives_report_encoding(seed in any::<u8>(), sequence in any::<u8>(), index in 0u8..19) {
            let mut payload = [0u8; CHUNK_PAYLOAD_LEN];
            for (offset, byte) in payload.iter_mut().enumerate() {
                *byte = seed.wrapping_mul(offset as u8).wrapping_add(index);
            }
            let chunk = SignatureChunk { sequence, index, payload, checksum: 0 };
            let parsed = SignatureChunk::parse(&chunk.to_report()).unwrap();
            prop_assert!(parsed.checksum_matches());
            prop_assert_eq!(parsed.index, index);
            prop_assert_eq!(parsed.payload, payload);
        }
    }
}

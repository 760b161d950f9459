//! Commit log framing.
//!
//! A database file is a sequence of frames:
//!
//! ```text
//! | magic "DRFT" (4) | version (2) | len (4) | CBOR payload (len) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The checksum covers the payload only.
//! A frame cut short by a crash ends the log; anything else that fails to
//! parse is corruption.

use crate::changeset::{Baseline, Changeset};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Magic bytes at the start of every frame.
pub(crate) const FRAME_MAGIC: [u8; 4] = *b"DRFT";

/// Current frame format version.
pub(crate) const FRAME_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
const HEADER_SIZE: usize = 10;

const CRC_SIZE: usize = 4;

/// One entry of the commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum LogEntry {
    /// A committed changeset, local or integrated from the server.
    Commit(Changeset),
    /// Local changesets up to this version were acknowledged by the server.
    Uploaded {
        /// Highest acknowledged local version.
        up_to: u64,
    },
    /// The state was replaced by a server baseline, with local changesets
    /// replayed on top. One frame, so a torn rebase is dropped whole.
    Baseline {
        /// The server snapshot.
        baseline: Baseline,
        /// Local version counter at the time of the rebase.
        local_version: u64,
        /// Changesets replayed after the baseline, numbered from
        /// `local_version + 1`.
        replay: Vec<Changeset>,
    },
}

/// Encodes an entry into a complete frame.
pub(crate) fn encode_frame(entry: &LogEntry) -> CoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(entry, &mut payload).map_err(|e| CoreError::Encode(e.to_string()))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::Encode(format!("frame too large: {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
    Ok(frame)
}

/// Decodes every complete frame in `bytes`.
///
/// Returns the entries and the number of bytes they occupy; a torn tail is
/// left out of that count so the caller can cut it off.
pub(crate) fn decode_frames(bytes: &[u8]) -> CoreResult<(Vec<LogEntry>, usize)> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let remaining = &bytes[pos..];
        if remaining.len() < HEADER_SIZE {
            tracing::warn!(offset = pos, "ignoring torn frame header at end of log");
            break;
        }

        if remaining[0..4] != FRAME_MAGIC {
            return Err(CoreError::corrupted(pos as u64, "bad frame magic"));
        }
        let version = u16::from_le_bytes([remaining[4], remaining[5]]);
        if version != FRAME_VERSION {
            return Err(CoreError::corrupted(
                pos as u64,
                format!("unsupported frame version {version}"),
            ));
        }
        let len =
            u32::from_le_bytes([remaining[6], remaining[7], remaining[8], remaining[9]]) as usize;

        let frame_size = HEADER_SIZE + len + CRC_SIZE;
        if remaining.len() < frame_size {
            tracing::warn!(offset = pos, "ignoring torn frame at end of log");
            break;
        }

        let payload = &remaining[HEADER_SIZE..HEADER_SIZE + len];
        let crc_bytes = &remaining[HEADER_SIZE + len..frame_size];
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = compute_crc32(payload);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch {
                offset: pos as u64,
                expected,
                actual,
            });
        }

        let entry: LogEntry =
            ciborium::from_reader(payload).map_err(|e| CoreError::Decode(e.to_string()))?;
        entries.push(entry);
        pos += frame_size;
    }

    Ok((entries, pos))
}

/// Computes the IEEE CRC32 of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{Operation, Origin};
    use crate::object::ObjectId;

    fn commit(version: u64) -> LogEntry {
        LogEntry::Commit(Changeset {
            version,
            origin: Origin::Local,
            operations: vec![Operation::Put {
                class: "Dog".into(),
                id: ObjectId::from_bytes([version as u8; 16]),
                payload: vec![1, 2, 3],
            }],
        })
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn frames_decode_in_order() {
        let mut bytes = encode_frame(&commit(1)).unwrap();
        bytes.extend(encode_frame(&LogEntry::Uploaded { up_to: 1 }).unwrap());

        let (entries, consumed) = decode_frames(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(entries, vec![commit(1), LogEntry::Uploaded { up_to: 1 }]);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let first = encode_frame(&commit(1)).unwrap();
        let second = encode_frame(&commit(2)).unwrap();
        let mut bytes = first.clone();
        bytes.extend_from_slice(&second[..second.len() - 3]);

        let (entries, consumed) = decode_frames(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(consumed, first.len());
    }

    #[test]
    fn flipped_payload_byte_is_detected() {
        let mut bytes = encode_frame(&commit(1)).unwrap();
        bytes[HEADER_SIZE + 1] ^= 0xFF;

        let result = decode_frames(&bytes);
        assert!(matches!(result, Err(CoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = encode_frame(&commit(1)).unwrap();
        bytes[0] = b'X';

        let result = decode_frames(&bytes);
        assert!(matches!(result, Err(CoreError::Corrupted { offset: 0, .. })));
    }
}

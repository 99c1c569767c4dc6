//! Record framing inside journal files.
//!
//! ```text
//! | kind (1) | record_len (4) | file_id (4) | id (8) | record_type (1) |
//! | tx_flag (1) | tx_id (8, if flag) | body_len (4) | body (N) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. `record_len` covers the whole frame and
//! the CRC covers every byte before it. A zero kind byte marks the end of
//! data, so zero padding after the last record reads as a clean end. A
//! final frame that fails its checksum with nothing but zeros after it was
//! torn by a crash and reads as truncated.
//! `file_id` is the low 32 bits of the owning file's ordering id; a record
//! carrying another file id was left by an earlier use of the file and also
//! ends it.

use crate::error::{JournalError, JournalResult};
use crate::types::{Record, RecordInfo, RecordKind};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of a frame without transaction id and body.
pub const RECORD_OVERHEAD: usize = 1 + 4 + 4 + 8 + 1 + 1 + 4 + 4;

/// Size of the optional transaction id.
const TX_ID_SIZE: usize = 8;

/// Size of the trailing checksum.
const CRC_SIZE: usize = 4;

/// Returns the encoded size of a record.
#[must_use]
pub fn encoded_len(record: &Record) -> usize {
    let tx = if record.tx_id.is_some() { TX_ID_SIZE } else { 0 };
    RECORD_OVERHEAD + tx + record.body.len()
}

/// Returns the file id stored in records of a file with this ordering id.
#[must_use]
pub fn record_file_id(ordering_id: i64) -> u32 {
    ordering_id as u32
}

/// Appends one framed record to `buf`.
///
/// # Errors
///
/// Returns [`JournalError::RecordTooLarge`] if the frame length does not fit
/// the 4-byte length field.
pub fn encode_record(
    buf: &mut BytesMut,
    kind: RecordKind,
    ordering_id: i64,
    record: &Record,
) -> JournalResult<()> {
    let len = encoded_len(record);
    let frame_len = u32::try_from(len).map_err(|_| JournalError::RecordTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;

    let start = buf.len();
    buf.reserve(len);
    buf.put_u8(kind.as_byte());
    buf.put_u32_le(frame_len);
    buf.put_u32_le(record_file_id(ordering_id));
    buf.put_i64_le(record.id);
    buf.put_u8(record.record_type);
    match record.tx_id {
        Some(tx_id) => {
            buf.put_u8(1);
            buf.put_i64_le(tx_id);
        }
        None => buf.put_u8(0),
    }
    // Fits: body_len < frame_len
    buf.put_u32_le(record.body.len() as u32);
    buf.put_slice(&record.body);

    let crc = compute_crc32(&buf[start..]);
    buf.put_u32_le(crc);
    Ok(())
}

/// Outcome of decoding at one offset.
#[derive(Debug)]
pub enum Decoded {
    /// A complete, valid record.
    Record {
        /// The decoded record.
        info: RecordInfo,
        /// Bytes consumed.
        len: usize,
    },
    /// Zero padding or no more bytes.
    End,
    /// The frame extends beyond the data; a torn trailing write.
    Truncated,
    /// The frame belongs to an earlier use of the file.
    Stale,
}

/// Decodes the record at `offset` of `data`.
///
/// `data` is the whole file; record bodies are sliced from it without
/// copying.
///
/// # Errors
///
/// Returns [`JournalError::Corruption`] for an unknown kind or inconsistent
/// lengths, and [`JournalError::ChecksumMismatch`] if the CRC does not
/// match and more data follows the frame.
pub fn decode_record(data: &Bytes, offset: usize, ordering_id: i64) -> JournalResult<Decoded> {
    let rest = data.get(offset..).unwrap_or_default();

    if rest.first().map_or(true, |&kind| kind == 0) {
        return Ok(Decoded::End);
    }
    if rest.len() < 1 + 4 + 4 {
        return Ok(Decoded::Truncated);
    }

    let kind = RecordKind::from_byte(rest[0]).ok_or_else(|| {
        JournalError::corruption(format!("unknown record kind {} at offset {offset}", rest[0]))
    })?;

    let frame_len = read_u32(rest, 1) as usize;
    if frame_len < RECORD_OVERHEAD {
        return Err(JournalError::corruption(format!(
            "record length {frame_len} below minimum at offset {offset}"
        )));
    }
    if rest.len() < frame_len {
        return Ok(Decoded::Truncated);
    }

    if read_u32(rest, 5) != record_file_id(ordering_id) {
        return Ok(Decoded::Stale);
    }

    let frame = &rest[..frame_len];
    let expected = read_u32(frame, frame_len - CRC_SIZE);
    let actual = compute_crc32(&frame[..frame_len - CRC_SIZE]);
    if expected != actual {
        if rest[frame_len..].iter().all(|&b| b == 0) {
            return Ok(Decoded::Truncated);
        }
        return Err(JournalError::ChecksumMismatch {
            offset: offset as u64,
            expected,
            actual,
        });
    }

    let id = read_u64(frame, 9) as i64;
    let record_type = frame[17];
    let (tx_id, mut cursor) = match frame[18] {
        0 => (None, 19),
        1 => (Some(read_u64(frame, 19) as i64), 27),
        flag => {
            return Err(JournalError::corruption(format!(
                "invalid transaction flag {flag} at offset {offset}"
            )))
        }
    };

    if cursor + 4 + CRC_SIZE > frame_len {
        return Err(JournalError::corruption(format!(
            "record length {frame_len} too short for its header at offset {offset}"
        )));
    }
    let body_len = read_u32(frame, cursor) as usize;
    cursor += 4;
    if cursor + body_len + CRC_SIZE != frame_len {
        return Err(JournalError::corruption(format!(
            "body length {body_len} does not match record length {frame_len} at offset {offset}"
        )));
    }

    let body_start = offset + cursor;
    let body = data.slice(body_start..body_start + body_len);

    Ok(Decoded::Record {
        info: RecordInfo {
            kind,
            record: Record {
                id,
                record_type,
                body,
                tx_id,
            },
            file_ordering_id: ordering_id,
            offset: offset as u64,
        },
        len: frame_len,
    })
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

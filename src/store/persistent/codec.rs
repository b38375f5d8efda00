//! Framing for replica log entries.
//!
//! ```text
//! file:  [MAGIC: 4 bytes][VERSION: 1 byte][FRAME]*
//! frame: [len: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

pub const FORMAT_VERSION: u8 = 1;

/// Identifies replica log files.
pub const MAGIC: [u8; 4] = *b"WMRL";

/// Length of the file header.
pub const HEADER_LEN: usize = MAGIC.len() + 1;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

/// Serializes one frame.
pub fn encode_frame<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data =
        serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    let len = u32::try_from(data.len())
        .map_err(|_| invalid(format!("frame of {} bytes is too large", data.len())))?;

    let mut hasher = Hasher::new();
    hasher.update(&data);

    let mut out = Vec::with_capacity(data.len() + 8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&hasher.finalize().to_le_bytes());
    Ok(out)
}

/// Reads one frame, verifying its checksum.
///
/// Returns `UnexpectedEof` if the reader ends inside the frame.
pub fn decode_frame<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(invalid(format!(
            "frame size {len} exceeds maximum {MAX_FRAME_SIZE}"
        )));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    serde_json::from_slice(&data).map_err(|e| invalid(format!("deserialization failed: {e}")))
}

/// The header every log file starts with.
#[must_use]
pub fn header() -> [u8; HEADER_LEN] {
    let mut header = [FORMAT_VERSION; HEADER_LEN];
    header[..MAGIC.len()].copy_from_slice(&MAGIC);
    header
}

pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&header())
}

/// Reads and validates the file header.
pub fn read_header(reader: &mut impl Read) -> IoResult<()> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(invalid(format!("invalid magic bytes: {:?}", &header[..4])));
    }
    if header[4] != FORMAT_VERSION {
        return Err(invalid(format!(
            "unsupported log version {} (expected {FORMAT_VERSION})",
            header[4]
        )));
    }
    Ok(())
}

//! Append-only record log of one replica.
//!
//! Every accepted `set` is appended before it is applied in memory. On open,
//! the log is replayed in full. A torn tail left by a crash (a frame cut
//! short, or a header never completed) is truncated away; a frame that is
//! complete but fails its checksum or does not decode is reported as
//! corruption and the file is left untouched.

use std::fs::{File, OpenOptions};
use std::io::{
    BufReader, BufWriter, Error as IoError, ErrorKind, Read, Result as IoResult, Seek, SeekFrom,
    Write,
};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::abi::Digest;
use crate::store::record::Record;

use super::codec;

/// One logged write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, from 1.
    pub sequence: u64,
    /// Wall-clock time of the append.
    pub timestamp: DateTime<Utc>,
    /// Table written.
    pub table: String,
    /// Content digest key.
    pub key: Digest,
    /// Record written.
    pub record: Record,
    /// Identity the write was authored by.
    pub author: String,
}

struct Writer {
    out: BufWriter<File>,
    sequence: u64,
}

/// Append-only log file.
pub struct RecordLog {
    path: PathBuf,
    writer: Mutex<Writer>,
    sync_on_write: bool,
}

/// Exclusive access to a [`RecordLog`].
///
/// Appends made through one guard are ordered before any other writer's.
pub struct LogGuard<'a> {
    writer: MutexGuard<'a, Writer>,
    sync_on_write: bool,
}

impl LogGuard<'_> {
    /// Appends a write, returning its sequence number.
    pub fn append(&mut self, table: &str, key: Digest, record: &Record, author: &str) -> IoResult<u64> {
        let entry = LogEntry {
            sequence: self.writer.sequence + 1,
            timestamp: Utc::now(),
            table: table.to_string(),
            key,
            record: record.clone(),
            author: author.to_string(),
        };
        let frame = codec::encode_frame(&entry)?;

        self.writer.out.write_all(&frame)?;
        self.writer.out.flush()?;
        if self.sync_on_write {
            self.writer.out.get_ref().sync_data()?;
        }
        self.writer.sequence = entry.sequence;
        Ok(entry.sequence)
    }
}

impl RecordLog {
    /// Opens or creates the log, returning it with every entry.
    ///
    /// Fails with `InvalidData` if a complete frame is corrupt.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Vec<LogEntry>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let entries = if Self::has_header(&mut file, path)? {
            let (entries, valid_len) = Self::replay(&mut file)?;
            if valid_len < file.metadata()?.len() {
                warn!(path = %path.display(), valid_len, "truncating torn log tail");
                file.set_len(valid_len)?;
            }
            entries
        } else {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            Vec::new()
        };

        file.seek(SeekFrom::End(0))?;
        let sequence = entries.last().map_or(0, |e| e.sequence);
        let log = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Writer {
                out: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        };
        Ok((log, entries))
    }

    /// Returns false for an empty file or one cut off inside its header.
    fn has_header(file: &mut File, path: &Path) -> IoResult<bool> {
        let len = file.metadata()?.len();
        if len >= codec::HEADER_LEN as u64 {
            return Ok(true);
        }
        let mut partial = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut partial)?;
        if !codec::header().starts_with(&partial) {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("{} is not a record log", path.display()),
            ));
        }
        if len > 0 {
            warn!(path = %path.display(), len, "rewriting incomplete log header");
        }
        Ok(false)
    }

    /// Reads every frame. Returns the entries and the length of the intact
    /// prefix, which is shorter than the file only if the last frame is torn.
    fn replay(file: &mut File) -> IoResult<(Vec<LogEntry>, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&*file);
        codec::read_header(&mut reader)?;

        let mut entries = Vec::new();
        let mut valid_len = reader.stream_position()?;
        loop {
            match codec::decode_frame::<LogEntry>(&mut reader) {
                Ok(entry) => {
                    entries.push(entry);
                    valid_len = reader.stream_position()?;
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(IoError::new(
                        ErrorKind::InvalidData,
                        format!("frame {} at offset {valid_len}: {e}", entries.len() + 1),
                    ));
                }
            }
        }
        Ok((entries, valid_len))
    }

    /// Locks the log for appending.
    #[must_use]
    pub fn lock(&self) -> LogGuard<'_> {
        LogGuard {
            writer: self.writer.lock().unwrap_or_else(PoisonError::into_inner),
            sync_on_write: self.sync_on_write,
        }
    }

    /// Appends a write, returning its sequence number.
    pub fn append(&self, table: &str, key: Digest, record: &Record, author: &str) -> IoResult<u64> {
        self.lock().append(table, key, record, author)
    }

    /// Sequence of the last append.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner).sequence
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::content_digest;
    use tempfile::tempdir;

    #[test]
    fn test_log_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");
        let record = Record::new().with("message", "hi");

        {
            let (log, entries) = RecordLog::open(&path, false).unwrap();
            assert!(entries.is_empty());
            log.append("Messages", content_digest(b"a"), &record, "me").unwrap();
            log.append("Messages", content_digest(b"b"), &record, "me").unwrap();
            assert_eq!(log.sequence(), 2);
        }

        let (log, entries) = RecordLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sequence, 2);
        assert_eq!(entries[0].record, record);
        assert_eq!(log.sequence(), 2);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");
        let record = Record::new().with("message", "hi");
        {
            let (log, _) = RecordLog::open(&path, false).unwrap();
            log.append("Messages", content_digest(b"a"), &record, "me").unwrap();
        }
        let intact = std::fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[9, 0, 0, 0, b'{']).unwrap();
        }

        let (log, entries) = RecordLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);
        log.append("Messages", content_digest(b"b"), &record, "me").unwrap();
        drop(log);

        let (_, entries) = RecordLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_corrupt_middle_frame_keeps_later_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");
        let record = Record::new().with("message", "hi");
        {
            let (log, _) = RecordLog::open(&path, false).unwrap();
            for key in [b"a", b"b", b"c"] {
                log.append("Messages", content_digest(key), &record, "me").unwrap();
            }
        }

        let mut bytes = std::fs::read(&path).unwrap();
        let first_len = u32::from_le_bytes(bytes[5..9].try_into().unwrap()) as usize;
        let second = codec::HEADER_LEN + 4 + first_len + 4;
        bytes[second + 6] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = RecordLog::open(&path, false).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("frame 2"), "{err}");
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_incomplete_header_is_rewritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");
        std::fs::write(&path, &codec::MAGIC[..2]).unwrap();

        let (log, entries) = RecordLog::open(&path, false).unwrap();
        assert!(entries.is_empty());
        log.append("Messages", content_digest(b"a"), &Record::new(), "me").unwrap();
        drop(log);

        let (log, entries) = RecordLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(log.sequence(), 1);
    }

    #[test]
    fn test_foreign_file_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");
        std::fs::write(&path, b"abc").unwrap();

        let err = RecordLog::open(&path, false).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }
}

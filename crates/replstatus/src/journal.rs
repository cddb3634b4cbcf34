//! Append-only local journal of status cache writes.
//!
//! Record layout (little endian):
//!
//! ```text
//! | payload_len: u32 | crc32(payload): u32 | key_len: u32 | key bytes | value bytes |
//!                                          \------------- payload ---------------/
//! ```
//!
//! Key and value bytes come from the versioned serializers in [`crate::codec`].
//! A short final record is a torn write: replay stops there and cuts the file
//! back to the last whole record, so later appends follow valid data. A
//! checksum or decode failure anywhere else is corruption and fails replay.

use crate::codec::{CacheSerializer, StatusKeySerializer, StatusValueSerializer};
use crate::error::StatusError;
use crate::status::{StatusKey, StatusValue};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const HEADER_LEN: usize = 8;

/// Local file journal.
pub struct FileJournal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

fn open_append(path: &Path) -> Result<BufWriter<File>, StatusError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn encode_record(key: &StatusKey, value: &StatusValue) -> Result<Vec<u8>, StatusError> {
    let key_bytes = StatusKeySerializer.serialize(key)?;
    let value_bytes = StatusValueSerializer.serialize(value)?;

    let mut payload = Vec::with_capacity(4 + key_bytes.len() + value_bytes.len());
    payload.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
    payload.extend_from_slice(&key_bytes);
    payload.extend_from_slice(&value_bytes);

    let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    record.extend_from_slice(&payload);
    Ok(record)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn decode_payload(payload: &[u8]) -> Result<(StatusKey, StatusValue), String> {
    if payload.len() < 4 {
        return Err("payload shorter than key length".to_string());
    }
    let key_len = read_u32(payload) as usize;
    let rest = &payload[4..];
    if rest.len() < key_len {
        return Err(format!("key length {} exceeds payload", key_len));
    }
    let (key_bytes, value_bytes) = rest.split_at(key_len);
    let key = StatusKeySerializer
        .deserialize(key_bytes)
        .map_err(|e| format!("key: {}", e))?;
    let value = StatusValueSerializer
        .deserialize(value_bytes)
        .map_err(|e| format!("value: {}", e))?;
    Ok((key, value))
}

impl FileJournal {
    /// Open (creating if needed) the journal at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StatusError> {
        let path = path.into();
        let writer = open_append(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    /// Journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one write and flush it to the OS.
    pub fn append(&self, key: &StatusKey, value: &StatusValue) -> Result<(), StatusError> {
        let record = encode_record(key, value)?;
        let mut writer = self.writer.lock();
        writer.write_all(&record)?;
        writer.flush()?;
        Ok(())
    }

    /// Read every record in write order.
    ///
    /// A torn tail is truncated away before the writer lock is released.
    pub fn replay(&self) -> Result<Vec<(StatusKey, StatusValue)>, StatusError> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        let data = std::fs::read(&self.path)?;

        let mut entries = Vec::new();
        let mut offset = 0usize;
        while offset < data.len() {
            let remaining = &data[offset..];
            if remaining.len() < HEADER_LEN {
                tracing::warn!(offset, path = %self.path.display(), "torn journal header, stopping replay");
                break;
            }
            let payload_len = read_u32(remaining) as usize;
            let crc = read_u32(&remaining[4..]);
            if remaining.len() - HEADER_LEN < payload_len {
                tracing::warn!(offset, path = %self.path.display(), "torn journal record, stopping replay");
                break;
            }
            let payload = &remaining[HEADER_LEN..HEADER_LEN + payload_len];
            if crc32fast::hash(payload) != crc {
                return Err(StatusError::JournalCorrupted {
                    offset: offset as u64,
                    msg: "checksum mismatch".to_string(),
                });
            }
            let entry = decode_payload(payload).map_err(|msg| StatusError::JournalCorrupted {
                offset: offset as u64,
                msg,
            })?;
            entries.push(entry);
            offset += HEADER_LEN + payload_len;
        }

        if offset < data.len() {
            writer.get_ref().set_len(offset as u64)?;
            tracing::warn!(
                dropped = data.len() - offset,
                path = %self.path.display(),
                "truncated torn journal tail"
            );
        }
        Ok(entries)
    }

    /// Replace the journal contents with `entries`.
    ///
    /// Callers must stop concurrent appends while `entries` is gathered and
    /// written, or those appends are lost with the old file.
    pub fn compact(&self, entries: &[(StatusKey, StatusValue)]) -> Result<(), StatusError> {
        let mut writer = self.writer.lock();
        writer.flush()?;

        let tmp = self.path.with_extension("compact");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for (key, value) in entries {
                out.write_all(&encode_record(key, value)?)?;
            }
            out.flush()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        *writer = open_append(&self.path)?;

        tracing::info!(records = entries.len(), path = %self.path.display(), "journal compacted");
        Ok(())
    }
}

impl std::fmt::Debug for FileJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileJournal").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ReplicationResult;
    use tempfile::TempDir;

    fn entry(r: &str, status: ReplicationResult, when: i64) -> (StatusKey, StatusValue) {
        (
            StatusKey::new("demo", "host1", r),
            StatusValue::new(status, when),
        )
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let journal = FileJournal::open(dir.path().join("status.journal")).unwrap();
        let a = entry("refs/heads/a", ReplicationResult::Succeeded, 1);
        let b = entry("refs/heads/b", ReplicationResult::Failed, 2);
        journal.append(&a.0, &a.1).unwrap();
        journal.append(&b.0, &b.1).unwrap();

        let replayed = journal.replay().unwrap();
        assert_eq!(replayed, vec![a, b]);
    }

    #[test]
    fn test_replay_empty() {
        let dir = TempDir::new().unwrap();
        let journal = FileJournal::open(dir.path().join("nested/dir/j")).unwrap();
        assert!(journal.replay().unwrap().is_empty());
    }

    #[test]
    fn test_torn_tail_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j");
        let journal = FileJournal::open(&path).unwrap();
        let a = entry("refs/heads/a", ReplicationResult::Succeeded, 1);
        journal.append(&a.0, &a.1).unwrap();
        drop(journal);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x40, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        let journal = FileJournal::open(&path).unwrap();
        assert_eq!(journal.replay().unwrap(), vec![a]);
    }

    #[test]
    fn test_appends_after_torn_tail_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j");
        let journal = FileJournal::open(&path).unwrap();
        let a = entry("refs/heads/a", ReplicationResult::Succeeded, 1);
        journal.append(&a.0, &a.1).unwrap();
        let good_len = std::fs::metadata(&path).unwrap().len();
        drop(journal);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x40, 0, 0, 0, 9, 9, 9, 9, 1, 2]).unwrap();
        drop(file);

        let journal = FileJournal::open(&path).unwrap();
        assert_eq!(journal.replay().unwrap(), vec![a.clone()]);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        let mut expected = vec![a];
        for i in 0..5 {
            let e = entry("refs/heads/b", ReplicationResult::Failed, 10 + i);
            journal.append(&e.0, &e.1).unwrap();
            expected.push(e);
        }
        drop(journal);

        let journal = FileJournal::open(&path).unwrap();
        assert_eq!(journal.replay().unwrap(), expected);
    }

    #[test]
    fn test_checksum_mismatch_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j");
        let journal = FileJournal::open(&path).unwrap();
        let a = entry("refs/heads/a", ReplicationResult::Succeeded, 1);
        journal.append(&a.0, &a.1).unwrap();
        drop(journal);

        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        let journal = FileJournal::open(&path).unwrap();
        assert!(matches!(
            journal.replay(),
            Err(StatusError::JournalCorrupted { offset: 0, .. })
        ));
    }

    #[test]
    fn test_compact_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let journal = FileJournal::open(dir.path().join("j")).unwrap();
        for i in 0..10 {
            let e = entry("refs/heads/a", ReplicationResult::Scheduled, i);
            journal.append(&e.0, &e.1).unwrap();
        }
        let live = vec![entry("refs/heads/a", ReplicationResult::Succeeded, 99)];
        journal.compact(&live).unwrap();
        assert_eq!(journal.replay().unwrap(), live);

        let more = entry("refs/heads/b", ReplicationResult::Failed, 100);
        journal.append(&more.0, &more.1).unwrap();
        assert_eq!(journal.replay().unwrap().len(), 2);
    }
}

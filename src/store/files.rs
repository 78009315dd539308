// SPDX-License-Identifier: MIT OR Apache-2.0

//! `files.tab`: append-only log of FileRecords, compacted on commit.
//!
//! Each frame is either an upsert of a full record or a deletion by path.
//! Replaying the frames in order yields the file table.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::DecodeError;
use crate::store::codec::{self, Reader};

pub const FILES_MAGIC: &[u8; 4] = b"SXFL";

const TAG_UPSERT: u8 = 1;
const TAG_DELETE: u8 = 2;

/// BLAKE3 digest of a file's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

/// Last indexed state of one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Normalized absolute path.
    pub path: String,
    pub hash: ContentHash,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: u64,
    pub extractor: String,
    pub extractor_version: u32,
    pub indexed_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLogEntry {
    Upsert(FileRecord),
    Delete(String),
}

impl FileLogEntry {
    pub fn path(&self) -> &str {
        match self {
            FileLogEntry::Upsert(record) => &record.path,
            FileLogEntry::Delete(path) => path,
        }
    }
}

/// Empty log containing only the header.
pub fn new_log() -> Vec<u8> {
    codec::log_header(FILES_MAGIC)
}

pub fn append_entry(out: &mut Vec<u8>, entry: &FileLogEntry) {
    let mut payload = Vec::with_capacity(96);
    match entry {
        FileLogEntry::Upsert(record) => {
            payload.push(TAG_UPSERT);
            encode_record(&mut payload, record);
        }
        FileLogEntry::Delete(path) => {
            payload.push(TAG_DELETE);
            codec::write_str(&mut payload, path);
        }
    }
    codec::write_frame(out, &payload);
}

/// Compacted log: one upsert per live record, sorted by path.
pub fn compact(files: &BTreeMap<String, FileRecord>) -> Vec<u8> {
    let mut out = new_log();
    for record in files.values() {
        append_entry(&mut out, &FileLogEntry::Upsert(record.clone()));
    }
    out
}

/// Decode every frame, in log order.
pub fn read_entries(bytes: &[u8]) -> Result<Vec<FileLogEntry>, DecodeError> {
    codec::read_frames(FILES_MAGIC, bytes)?
        .into_iter()
        .map(decode_entry)
        .collect()
}

/// Replay the log into the current file table.
pub fn replay(bytes: &[u8]) -> Result<BTreeMap<String, FileRecord>, DecodeError> {
    let mut files = BTreeMap::new();
    for entry in read_entries(bytes)? {
        match entry {
            FileLogEntry::Upsert(record) => {
                files.insert(record.path.clone(), record);
            }
            FileLogEntry::Delete(path) => {
                files.remove(&path);
            }
        }
    }
    Ok(files)
}

fn decode_entry(payload: &[u8]) -> Result<FileLogEntry, DecodeError> {
    let mut reader = Reader::new(payload);
    match reader.read_u8()? {
        TAG_UPSERT => decode_record(&mut reader).map(FileLogEntry::Upsert),
        TAG_DELETE => Ok(FileLogEntry::Delete(reader.read_str()?.to_string())),
        tag => Err(DecodeError::InvalidTag(tag)),
    }
}

pub(crate) fn encode_record(out: &mut Vec<u8>, record: &FileRecord) {
    codec::write_str(out, &record.path);
    out.extend_from_slice(&record.hash.0);
    codec::write_var_u64(out, record.size);
    codec::write_var_u64(out, record.mtime_ns);
    codec::write_str(out, &record.extractor);
    codec::write_var_u64(out, u64::from(record.extractor_version));
    codec::write_var_u64(out, record.indexed_at_ms);
}

pub(crate) fn decode_record(reader: &mut Reader<'_>) -> Result<FileRecord, DecodeError> {
    let path = reader.read_str()?.to_string();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(reader.read_bytes(32)?);
    Ok(FileRecord {
        path,
        hash: ContentHash(hash),
        size: reader.read_var_u64()?,
        mtime_ns: reader.read_var_u64()?,
        extractor: reader.read_str()?.to_string(),
        extractor_version: reader.read_var_u32()?,
        indexed_at_ms: reader.read_var_u64()?,
    })
}

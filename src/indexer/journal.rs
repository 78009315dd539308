// SPDX-License-Identifier: MIT OR Apache-2.0

//! Staging journal: spilled build deltas.
//!
//! When the in-memory delta exceeds its byte budget it is handed to a
//! dedicated writer thread which appends it to `staging/journal.log`.
//! Commit replays the journal before applying what is still in memory.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::thread::JoinHandle;

use crate::errors::{DecodeError, IndexError};
use crate::parser::symbols::SymbolRecord;
use crate::store::codec::{self, Reader};
use crate::store::files::{decode_record, encode_record, FileRecord};
use crate::store::symbols;

pub const JOURNAL_FILE: &str = "journal.log";
const JOURNAL_MAGIC: &[u8; 4] = b"SXJR";

const TAG_UPSERT: u8 = 1;
const TAG_TOUCH: u8 = 2;
const TAG_DELETE: u8 = 3;

/// Batches waiting for the writer before submitters block.
const QUEUE_DEPTH: usize = 2;

/// One file's pending change inside a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingChange {
    /// New extraction result; replaces all prior symbols of the file.
    Upsert {
        record: FileRecord,
        symbols: Vec<SymbolRecord>,
    },
    /// Metadata-only update; prior symbols are kept.
    Touch(FileRecord),
    Delete(String),
}

impl PendingChange {
    pub fn path(&self) -> &str {
        match self {
            PendingChange::Upsert { record, .. } | PendingChange::Touch(record) => &record.path,
            PendingChange::Delete(path) => path,
        }
    }

    /// Rough in-memory footprint, used against the delta budget.
    pub fn estimated_bytes(&self) -> usize {
        const RECORD_OVERHEAD: usize = 128;
        match self {
            PendingChange::Upsert { record, symbols } => {
                RECORD_OVERHEAD
                    + record.path.len()
                    + symbols
                        .iter()
                        .map(|symbol| {
                            RECORD_OVERHEAD
                                + symbol.path.len()
                                + symbol.name.len() * 2
                                + symbol.qualified_name.len()
                                + symbol.signature.len()
                                + symbol.doc.as_ref().map_or(0, String::len)
                                + symbol.container.as_ref().map_or(0, String::len)
                        })
                        .sum::<usize>()
            }
            PendingChange::Touch(record) => RECORD_OVERHEAD + record.path.len(),
            PendingChange::Delete(path) => RECORD_OVERHEAD + path.len(),
        }
    }
}

fn encode_change(change: &PendingChange) -> Vec<u8> {
    let mut payload = Vec::new();
    match change {
        PendingChange::Upsert { record, symbols } => {
            payload.push(TAG_UPSERT);
            encode_record(&mut payload, record);
            codec::write_var_u64(&mut payload, symbols.len() as u64);
            for symbol in symbols {
                symbols::encode_record(&mut payload, symbol);
            }
        }
        PendingChange::Touch(record) => {
            payload.push(TAG_TOUCH);
            encode_record(&mut payload, record);
        }
        PendingChange::Delete(path) => {
            payload.push(TAG_DELETE);
            codec::write_str(&mut payload, path);
        }
    }
    payload
}

fn decode_change(payload: &[u8]) -> Result<PendingChange, DecodeError> {
    let mut reader = Reader::new(payload);
    match reader.read_u8()? {
        TAG_UPSERT => {
            let record = decode_record(&mut reader)?;
            let count = reader.read_len()?;
            let mut decoded = Vec::with_capacity(count.min(payload.len()));
            for _ in 0..count {
                decoded.push(symbols::decode_record(&mut reader)?);
            }
            Ok(PendingChange::Upsert {
                record,
                symbols: decoded,
            })
        }
        TAG_TOUCH => decode_record(&mut reader).map(PendingChange::Touch),
        TAG_DELETE => Ok(PendingChange::Delete(reader.read_str()?.to_string())),
        tag => Err(DecodeError::InvalidTag(tag)),
    }
}

/// Counts reported by the writer when it finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalStats {
    pub batches: usize,
    pub changes: usize,
    pub bytes: u64,
}

/// Handle on the writer thread.
pub struct Journal {
    sender: Option<SyncSender<Vec<PendingChange>>>,
    handle: Option<JoinHandle<Result<JournalStats, IndexError>>>,
    path: PathBuf,
}

impl Journal {
    pub fn start(staging: &Path) -> Result<Self, IndexError> {
        let path = staging.join(JOURNAL_FILE);
        let (sender, receiver) = sync_channel::<Vec<PendingChange>>(QUEUE_DEPTH);
        let writer_path = path.clone();
        let handle = std::thread::Builder::new()
            .name("symdex-journal".to_string())
            .spawn(move || -> Result<JournalStats, IndexError> {
                let file = File::create(&writer_path).map_err(|err| {
                    IndexError::io(format!("failed to create {}", writer_path.display()), err)
                })?;
                let mut out = BufWriter::new(file);
                let write_err = |err: std::io::Error| {
                    IndexError::io(format!("failed to write {}", writer_path.display()), err)
                };
                out.write_all(&codec::log_header(JOURNAL_MAGIC))
                    .map_err(write_err)?;

                let mut stats = JournalStats::default();
                let mut frame = Vec::new();
                for batch in receiver {
                    stats.batches += 1;
                    for change in &batch {
                        frame.clear();
                        codec::write_frame(&mut frame, &encode_change(change));
                        out.write_all(&frame).map_err(write_err)?;
                        stats.changes += 1;
                        stats.bytes += frame.len() as u64;
                    }
                    tracing::debug!(
                        "journal spilled {} changes ({} bytes total)",
                        batch.len(),
                        stats.bytes
                    );
                }
                let file = out
                    .into_inner()
                    .map_err(|err| write_err(err.into_error()))?;
                file.sync_all().map_err(write_err)?;
                Ok(stats)
            })
            .map_err(|err| IndexError::io("failed to start journal writer", err))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            path,
        })
    }

    /// Queue a batch; blocks while the writer is behind.
    pub fn send(&self, batch: Vec<PendingChange>) -> Result<(), IndexError> {
        let Some(sender) = &self.sender else {
            return Err(self.stopped());
        };
        sender.send(batch).map_err(|_| self.stopped())
    }

    /// Close the queue and wait for everything to reach disk.
    pub fn finish(mut self) -> Result<JournalStats, IndexError> {
        self.join()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn join(&mut self) -> Result<JournalStats, IndexError> {
        self.sender.take();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                IndexError::io(
                    "journal writer panicked",
                    std::io::Error::other("writer thread panicked"),
                )
            })?,
            None => Ok(JournalStats::default()),
        }
    }

    fn stopped(&self) -> IndexError {
        IndexError::io(
            format!("journal writer for {} stopped", self.path.display()),
            std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        )
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if let Err(err) = self.join() {
            tracing::debug!("journal writer failed during shutdown: {err}");
        }
    }
}

/// Changes recorded in a journal, in the order they were spilled.
pub fn replay(path: &Path) -> Result<Vec<PendingChange>, IndexError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(IndexError::io(
                format!("failed to read {}", path.display()),
                err,
            ))
        }
    };
    codec::read_frames(JOURNAL_MAGIC, &bytes)
        .and_then(|frames| frames.into_iter().map(decode_change).collect())
        .map_err(|err| IndexError::corrupt(path, err))
}

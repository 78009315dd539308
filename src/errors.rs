// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types with helpful suggestions
//!
//! Every failure that can end a command is an [`IndexError`]; the variant
//! decides the process exit code.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Exit code for a successful command.
pub const EXIT_OK: i32 = 0;
/// Exit code for a query that matched nothing.
pub const EXIT_NO_RESULTS: i32 = 1;
/// Exit code for bad arguments, bad queries and missing roots.
pub const EXIT_USER: i32 = 2;
/// Exit code for I/O failures, corrupted indexes and concurrent builds.
pub const EXIT_INTERNAL: i32 = 3;
/// Exit code after a user interrupt.
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot walk '{}': {reason}\n\nSuggestion: pass an existing directory, e.g. symdex index ./src", .root.display())]
    Walk { root: PathBuf, reason: String },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("invalid query term '{term}': {reason}\n\nQuery syntax: <text> | name:<text> | kind:<kind> | file:<glob>")]
    QueryParse { term: String, reason: String },

    #[error("index not found at '{}'\n\nSuggestion: run 'symdex index <root>' to create the index first.\nOr point at an existing index with --db <path> or INDEX_DB_PATH.", .path.display())]
    IndexMissing { path: PathBuf },

    #[error("{}", version_message(.path, .found, .expected))]
    IndexVersion {
        path: PathBuf,
        found: Option<u32>,
        expected: u32,
    },

    #[error("index file '{}' is corrupted: {reason}\n\nSuggestion: rebuild the index with 'symdex index --force <root>'.", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("{}", busy_message(.lock_path, .pid))]
    Busy { lock_path: PathBuf, pid: Option<u32> },

    #[error("build cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl IndexError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn query(term: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::QueryParse {
            term: term.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Walk { .. }
            | Self::InvalidArgument(_)
            | Self::QueryParse { .. }
            | Self::IndexMissing { .. } => EXIT_USER,
            Self::IndexVersion { .. } | Self::Corrupt { .. } | Self::Busy { .. } | Self::Io { .. } => {
                EXIT_INTERNAL
            }
            Self::Cancelled => EXIT_CANCELLED,
        }
    }
}

fn version_message(path: &std::path::Path, found: &Option<u32>, expected: &u32) -> String {
    let found = match found {
        Some(version) => format!("schema version {version}"),
        None => "an unreadable manifest".to_string(),
    };
    format!(
        "index at '{}' has {found}, expected schema version {expected}\n\n\
         Suggestion: re-index with 'symdex index <root>' to rebuild it.",
        path.display()
    )
}

fn busy_message(lock_path: &std::path::Path, pid: &Option<u32>) -> String {
    let owner = pid
        .map(|pid| format!(" (held by pid {pid})"))
        .unwrap_or_default();
    format!(
        "another build is in progress{owner}\n\n\
         Lock file: {}\n\
         Suggestion: wait for it to finish, or check 'symdex status'.",
        lock_path.display()
    )
}

/// Failure of a single file's extraction. Never aborts a build.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no extractor for language '{0}'")]
    Unsupported(String),

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("extraction exceeded {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("extraction cancelled")]
    Cancelled,

    #[error("file looks binary")]
    Binary,
}

/// Low-level decoding failure inside an index table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of data at byte {0}")]
    UnexpectedEof(usize),

    #[error("bad magic header")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedFormat(u32),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid UTF-8 string at byte {0}")]
    InvalidUtf8(usize),

    #[error("invalid record tag {0}")]
    InvalidTag(u8),

    #[error("invalid symbol kind {0}")]
    InvalidKind(u8),

    #[error("varint overflow at byte {0}")]
    VarintOverflow(usize),
}

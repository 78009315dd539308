// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index readiness: the `Absent -> Building -> Ready` state of an index
//! directory, read without taking the build lock.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::IndexError;
use crate::indexer::lock::{self, LockState};
use crate::store::manifest::Manifest;
use crate::store::IndexStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// No committed snapshot and no build running.
    Absent,
    Ready,
    /// A live process holds the build lock.
    Building,
    /// The last build died; the next `index` recovers.
    Interrupted,
}

impl IndexState {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexState::Absent => "absent",
            IndexState::Ready => "ready",
            IndexState::Building => "building",
            IndexState::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub db: String,
    pub state: IndexState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    pub schema_version: Option<u32>,
    pub files: u64,
    pub symbols: u64,
    pub tokens: u64,
    pub extractors: BTreeMap<String, u32>,
    pub created_at_ms: Option<u64>,
    pub updated_at_ms: Option<u64>,
}

/// Inspect `store` without modifying it.
///
/// A committed snapshot whose manifest cannot be read is an error
/// (`IndexVersion` or `Corrupt`), so `status` fails the same way `search`
/// does.
pub fn read_status(store: &IndexStore) -> Result<IndexStatus, IndexError> {
    let lock_state = lock::inspect(&store.lock_path()).map_err(|err| {
        IndexError::io(
            format!("failed to inspect {}", store.lock_path().display()),
            err,
        )
    })?;
    let manifest = if store.exists() {
        Some(store.read_manifest()?)
    } else {
        None
    };

    let (state, pid) = match lock_state {
        LockState::Held { pid } => (IndexState::Building, pid),
        LockState::Stale { pid } => (IndexState::Interrupted, Some(pid)),
        LockState::Free if store.has_staging() => (IndexState::Interrupted, None),
        LockState::Free if manifest.is_some() => (IndexState::Ready, None),
        LockState::Free => (IndexState::Absent, None),
    };
    Ok(from_manifest(store.db(), state, pid, manifest.as_ref()))
}

fn from_manifest(
    db: &Path,
    state: IndexState,
    pid: Option<u32>,
    manifest: Option<&Manifest>,
) -> IndexStatus {
    IndexStatus {
        db: db.display().to_string(),
        state,
        pid,
        root: manifest.map(|m| m.root.clone()),
        schema_version: manifest.map(|m| m.schema_version),
        files: manifest.map_or(0, |m| m.file_count),
        symbols: manifest.map_or(0, |m| m.symbol_count),
        tokens: manifest.map_or(0, |m| m.token_count),
        extractors: manifest.map(|m| m.extractors.clone()).unwrap_or_default(),
        created_at_ms: manifest.map(|m| m.created_at_ms),
        updated_at_ms: manifest.map(|m| m.updated_at_ms),
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! `manifest.json`: versioned metadata that makes an index directory
//! self-describing. Written last, so its presence marks a complete snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::IndexError;

/// Bumped whenever the on-disk layout changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub schema_version: u32,
    /// Absolute root the index was built from.
    pub root: String,
    /// Extractor id -> version used for the indexed files.
    pub extractors: BTreeMap<String, u32>,
    pub file_count: u64,
    pub symbol_count: u64,
    pub token_count: u64,
    /// Posting shard prefixes present under `postings/`.
    #[serde(default)]
    pub shards: Vec<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Manifest {
    pub fn new(root: impl Into<String>, extractors: BTreeMap<String, u32>, now_ms: u64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            root: root.into(),
            extractors,
            file_count: 0,
            symbol_count: 0,
            token_count: 0,
            shards: Vec::new(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, IndexError> {
        let mut bytes = serde_json::to_vec_pretty(self).map_err(|err| {
            IndexError::io("failed to encode manifest", std::io::Error::other(err))
        })?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Parse a manifest, checking the schema version before anything else.
///
/// `db` names the index directory in error messages.
pub fn parse_manifest(db: &Path, bytes: &[u8]) -> Result<Manifest, IndexError> {
    let unreadable = || IndexError::IndexVersion {
        path: db.to_path_buf(),
        found: None,
        expected: SCHEMA_VERSION,
    };
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|_| unreadable())?;
    let found = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .and_then(|version| u32::try_from(version).ok())
        .ok_or_else(unreadable)?;
    if found != SCHEMA_VERSION {
        return Err(IndexError::IndexVersion {
            path: db.to_path_buf(),
            found: Some(found),
            expected: SCHEMA_VERSION,
        });
    }
    serde_json::from_value(value).map_err(|err| IndexError::corrupt(db.join(MANIFEST_FILE), err))
}

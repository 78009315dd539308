// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parser module - symbol extraction using tree-sitter
//!
//! Extractors are pure: given a path and the file bytes they return symbol
//! records and perform no I/O of their own.

pub mod go;
pub mod rust;
pub mod symbols;
pub mod syntax;
pub mod tokens;

use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::errors::ExtractError;
use symbols::SymbolRecord;

/// Default soft limit for one file's extraction.
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);

const CHECKPOINT_INTERVAL: u32 = 256;

/// Per-file extraction budget: cancellation and soft timeout.
pub struct ExtractContext<'a> {
    cancel: &'a CancelToken,
    deadline: Instant,
    timeout: Duration,
    visited: Cell<u32>,
}

impl<'a> ExtractContext<'a> {
    pub fn new(cancel: &'a CancelToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
            timeout,
            visited: Cell::new(0),
        }
    }

    /// Checked at coarse boundaries while walking a syntax tree.
    pub fn checkpoint(&self) -> Result<(), ExtractError> {
        let visited = self.visited.get().wrapping_add(1);
        self.visited.set(visited);
        if visited % CHECKPOINT_INTERVAL != 0 {
            return Ok(());
        }
        self.check_now()
    }

    pub fn check_now(&self) -> Result<(), ExtractError> {
        if self.cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(ExtractError::Timeout(self.timeout));
        }
        Ok(())
    }

    /// Remaining budget for the tree-sitter parser, never zero.
    pub fn remaining_micros(&self) -> u64 {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        (remaining.as_micros() as u64).max(1)
    }
}

/// A per-language symbol extractor.
pub trait Extractor: Send + Sync {
    /// Stable identifier recorded in FileRecords and the manifest.
    fn id(&self) -> &'static str;

    /// Bumped whenever output for the same bytes may change.
    fn version(&self) -> u32;

    /// Lowercase file extensions this extractor handles.
    fn extensions(&self) -> &'static [&'static str];

    fn extract(
        &self,
        path: &str,
        source: &[u8],
        ctx: &ExtractContext<'_>,
    ) -> Result<Vec<SymbolRecord>, ExtractError>;
}

/// Registered extractors, looked up by file extension.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new(vec![Box::new(go::GoExtractor), Box::new(rust::RustExtractor)])
    }
}

impl ExtractorRegistry {
    pub fn new(extractors: Vec<Box<dyn Extractor>>) -> Self {
        Self { extractors }
    }

    pub fn for_path(&self, path: &Path) -> Option<&dyn Extractor> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.extractors
            .iter()
            .find(|extractor| extractor.extensions().contains(&ext.as_str()))
            .map(|extractor| extractor.as_ref())
    }

    pub fn get(&self, id: &str) -> Option<&dyn Extractor> {
        self.extractors
            .iter()
            .find(|extractor| extractor.id() == id)
            .map(|extractor| extractor.as_ref())
    }

    /// Every extension some extractor handles.
    pub fn extensions(&self) -> Vec<&'static str> {
        self.extractors
            .iter()
            .flat_map(|extractor| extractor.extensions().iter().copied())
            .collect()
    }

    pub fn versions(&self) -> BTreeMap<String, u32> {
        self.extractors
            .iter()
            .map(|extractor| (extractor.id().to_string(), extractor.version()))
            .collect()
    }
}

/// True when the first 8 KiB contain a NUL byte.
pub fn looks_binary(source: &[u8]) -> bool {
    source.iter().take(8 * 1024).any(|&byte| byte == 0)
}

/// Drop repeated keys, keeping the first occurrence.
pub(crate) fn dedupe_symbols_in_place(symbols: &mut Vec<SymbolRecord>) {
    let mut seen = std::collections::HashSet::new();
    symbols.retain(|symbol| seen.insert((symbol.byte_offset, symbol.name.clone())));
}

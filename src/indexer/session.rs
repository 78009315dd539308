// SPDX-License-Identifier: MIT OR Apache-2.0

//! Build sessions: the only mutator of an index.
//!
//! A session holds the build lock from `begin` until `commit` or `abort`
//! (or drop). Workers call `submit`, `touch` and `delete_file` concurrently
//! through `&self`; `commit` consumes the session, so every outstanding
//! call has returned before the merge starts.
//!
//! Pending changes live in memory: one map of per-file changes behind a
//! mutex, plus postings of the new symbols split over token buckets with a
//! lock each. A read/write gate separates inserts (shared) from spills of
//! the whole delta to the staging journal (exclusive).

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::errors::IndexError;
use crate::indexer::journal::{self, Journal, PendingChange, JOURNAL_FILE};
use crate::indexer::lock::BuildLock;
use crate::parser::symbols::{SymbolId, SymbolRecord};
use crate::store::files::FileRecord;
use crate::store::manifest::Manifest;
use crate::store::postings::{self, PostingMap};
use crate::store::snapshot::{assign_ids, build_postings, Snapshot};
use crate::store::{now_unix_ms, IndexStore};

/// Default in-memory delta size before spilling to the staging journal.
pub const DEFAULT_DELTA_BUDGET: usize = 8 * 1024 * 1024;

const TOKEN_BUCKETS: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Ignore the committed snapshot and rebuild everything.
    pub force: bool,
    pub delta_budget_bytes: usize,
    /// Extractor id -> version registered for this build.
    pub extractors: BTreeMap<String, u32>,
    pub cancel: CancelToken,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            force: false,
            delta_budget_bytes: DEFAULT_DELTA_BUDGET,
            extractors: BTreeMap::new(),
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    /// A new snapshot replaced the previous one.
    Published,
    /// Nothing changed; only the manifest timestamp was rewritten.
    ManifestOnly,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitSummary {
    pub outcome: CommitOutcome,
    pub files: u64,
    pub symbols: u64,
    pub tokens: u64,
    pub spilled_changes: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

#[derive(Default)]
struct PendingFiles {
    changes: BTreeMap<String, PendingChange>,
    bytes: usize,
}

pub struct BuildSession {
    store: IndexStore,
    root: String,
    base: Snapshot,
    /// The base is a readable snapshot of the same root.
    base_valid: bool,
    options: SessionOptions,
    gate: RwLock<()>,
    pending: Mutex<PendingFiles>,
    buckets: Vec<Mutex<PostingMap>>,
    journal: Option<Journal>,
    lock: Option<BuildLock>,
}

impl BuildSession {
    /// Acquire the build lock, repair leftovers of an interrupted build and
    /// load the committed snapshot as the base.
    ///
    /// An unreadable or incompatible snapshot is treated as absent.
    pub fn begin(
        store: IndexStore,
        root: &Path,
        options: SessionOptions,
    ) -> Result<Self, IndexError> {
        let lock = BuildLock::acquire(&store.lock_path())?;
        if store.recover()? {
            tracing::info!("recovered interrupted build in {}", store.db().display());
        }

        let root = root.to_string_lossy().into_owned();
        let fresh = || Snapshot::empty(Manifest::new(root.clone(), BTreeMap::new(), now_unix_ms()));
        let (base, base_valid) = if options.force {
            tracing::info!("forced rebuild; ignoring committed snapshot");
            (fresh(), false)
        } else {
            match store.load() {
                Ok(snapshot) if snapshot.manifest().root == root => (snapshot, true),
                Ok(snapshot) => {
                    tracing::warn!(
                        "index was built from {}, rebuilding for {root}",
                        snapshot.manifest().root
                    );
                    (fresh(), false)
                }
                Err(IndexError::IndexMissing { .. }) => (fresh(), false),
                Err(err @ (IndexError::IndexVersion { .. } | IndexError::Corrupt { .. })) => {
                    tracing::warn!("{err}");
                    tracing::warn!("treating index as absent and rebuilding");
                    (fresh(), false)
                }
                Err(err) => return Err(err),
            }
        };

        let staging = store.create_staging()?;
        let journal = Journal::start(&staging)?;
        tracing::debug!(
            "build session started for {root} (base: {} files)",
            base.files().len()
        );

        Ok(Self {
            store,
            root,
            base,
            base_valid,
            options,
            gate: RwLock::new(()),
            pending: Mutex::new(PendingFiles::default()),
            buckets: (0..TOKEN_BUCKETS)
                .map(|_| Mutex::new(PostingMap::new()))
                .collect(),
            journal: Some(journal),
            lock: Some(lock),
        })
    }

    /// Committed state this build started from (empty on a full build).
    pub fn base(&self) -> &Snapshot {
        &self.base
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.options.cancel
    }

    /// Merge one file's extraction result, replacing anything submitted for
    /// the same path earlier in this session.
    pub fn submit(&self, record: FileRecord, symbols: Vec<SymbolRecord>) -> Result<(), IndexError> {
        self.check_cancelled()?;
        if let Some(stray) = symbols.iter().find(|symbol| symbol.path != record.path) {
            return Err(IndexError::InvalidArgument(format!(
                "symbol '{}' belongs to {} but was submitted for {}",
                stray.name, stray.path, record.path
            )));
        }

        let mut by_bucket: BTreeMap<usize, Vec<(String, postings::Posting)>> = BTreeMap::new();
        for symbol in &symbols {
            for (token, posting) in postings::postings_for(symbol.id(), &symbol.name) {
                by_bucket
                    .entry(postings::bucket_of(&token, TOKEN_BUCKETS))
                    .or_default()
                    .push((token, posting));
            }
        }

        {
            let _shared = read_gate(&self.gate);
            for (bucket, entries) in by_bucket {
                let mut map = lock(&self.buckets[bucket]);
                for (token, posting) in entries {
                    map.entry(token).or_default().push(posting);
                }
            }
            self.record(PendingChange::Upsert { record, symbols });
        }
        self.spill_if_over_budget()
    }

    /// Update a file's metadata without touching its symbols.
    pub fn touch(&self, record: FileRecord) -> Result<(), IndexError> {
        self.check_cancelled()?;
        {
            let _shared = read_gate(&self.gate);
            self.record(PendingChange::Touch(record));
        }
        self.spill_if_over_budget()
    }

    /// Remove a path and all of its symbols.
    pub fn delete_file(&self, path: &str) -> Result<(), IndexError> {
        self.check_cancelled()?;
        {
            let _shared = read_gate(&self.gate);
            self.record(PendingChange::Delete(path.to_string()));
        }
        self.spill_if_over_budget()
    }

    /// Publish the pending snapshot and release the lock.
    ///
    /// On any failure the staging area is removed and the committed
    /// snapshot stays as it was.
    pub fn commit(mut self) -> Result<CommitSummary, IndexError> {
        let started = Instant::now();
        if self.options.cancel.is_cancelled() {
            self.cleanup();
            return Err(IndexError::Cancelled);
        }
        let result = self.commit_inner(started);
        match &result {
            Ok(summary) => tracing::info!(
                "commit {:?}: {} files, {} symbols in {:?}",
                summary.outcome,
                summary.files,
                summary.symbols,
                summary.elapsed
            ),
            Err(err) => {
                tracing::warn!("commit failed, rolling back: {err}");
                self.cleanup();
            }
        }
        self.lock.take();
        result
    }

    /// Discard all pending changes and release the lock.
    pub fn abort(mut self) -> Result<(), IndexError> {
        if let Some(journal) = self.journal.take() {
            if let Err(err) = journal.finish() {
                tracing::debug!("journal failed during abort: {err}");
            }
        }
        let result = self.store.discard_staging();
        self.lock.take();
        result
    }

    fn check_cancelled(&self) -> Result<(), IndexError> {
        if self.options.cancel.is_cancelled() {
            Err(IndexError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn record(&self, change: PendingChange) {
        let bytes = change.estimated_bytes();
        let mut pending = lock(&self.pending);
        let previous = pending.changes.insert(change.path().to_string(), change);
        if let Some(previous) = previous {
            pending.bytes = pending.bytes.saturating_sub(previous.estimated_bytes());
        }
        pending.bytes += bytes;
    }

    fn spill_if_over_budget(&self) -> Result<(), IndexError> {
        if lock(&self.pending).bytes <= self.options.delta_budget_bytes {
            return Ok(());
        }
        let _exclusive = write_gate(&self.gate);
        let batch = {
            let mut pending = lock(&self.pending);
            if pending.bytes <= self.options.delta_budget_bytes {
                return Ok(());
            }
            pending.bytes = 0;
            std::mem::take(&mut pending.changes)
        };
        for bucket in &self.buckets {
            lock(bucket).clear();
        }
        tracing::debug!("spilling {} pending changes to staging", batch.len());
        match &self.journal {
            Some(journal) => journal.send(batch.into_values().collect()),
            None => Err(IndexError::io(
                "journal already closed",
                std::io::Error::from(std::io::ErrorKind::BrokenPipe),
            )),
        }
    }

    fn commit_inner(&mut self, started: Instant) -> Result<CommitSummary, IndexError> {
        let stats = match self.journal.take() {
            Some(journal) => journal.finish()?,
            None => Default::default(),
        };
        let staging = self.store.staging_dir();
        let journal_path = staging.join(JOURNAL_FILE);
        let spilled = journal::replay(&journal_path)?;
        let in_memory = std::mem::take(&mut lock(&self.pending).changes);

        let mut files = self.base.files().clone();
        let mut per_file: BTreeMap<String, Vec<SymbolRecord>> = files
            .keys()
            .map(|path| {
                let records = self
                    .base
                    .symbols_in(path)
                    .iter()
                    .map(|stored| stored.record.clone())
                    .collect();
                (path.clone(), records)
            })
            .collect();
        let mut replaced: BTreeSet<String> = BTreeSet::new();
        let mut from_memory: BTreeSet<String> = BTreeSet::new();
        let mut changed = false;

        let ordered = spilled
            .into_iter()
            .map(|change| (false, change))
            .chain(in_memory.into_values().map(|change| (true, change)));
        for (memory, change) in ordered {
            match change {
                PendingChange::Upsert { record, symbols } => {
                    let path = record.path.clone();
                    changed |= files.get(&path) != Some(&record)
                        || per_file.get(&path) != Some(&symbols);
                    files.insert(path.clone(), record);
                    per_file.insert(path.clone(), symbols);
                    if memory {
                        from_memory.insert(path.clone());
                    } else {
                        from_memory.remove(&path);
                    }
                    replaced.insert(path);
                }
                PendingChange::Touch(record) => match files.get_mut(&record.path) {
                    Some(existing) => {
                        changed |= *existing != record;
                        *existing = record;
                    }
                    None => tracing::debug!("ignoring touch of unindexed {}", record.path),
                },
                PendingChange::Delete(path) => {
                    changed |= files.remove(&path).is_some();
                    per_file.remove(&path);
                    from_memory.remove(&path);
                    replaced.insert(path);
                }
            }
        }

        let now = now_unix_ms();
        let same_extractors = self.base.manifest().extractors == self.options.extractors;
        if self.base_valid && !changed && same_extractors {
            let mut manifest = self.base.manifest().clone();
            manifest.updated_at_ms = now;
            self.store.rewrite_manifest(&manifest)?;
            self.store.discard_staging()?;
            return Ok(CommitSummary {
                outcome: CommitOutcome::ManifestOnly,
                files: manifest.file_count,
                symbols: manifest.symbol_count,
                tokens: manifest.token_count,
                spilled_changes: stats.changes,
                elapsed: started.elapsed(),
            });
        }

        let (symbols, displaced) = assign_ids(&per_file);
        let postings = if displaced || self.base.ids_displaced() {
            build_postings(&symbols)
        } else {
            self.merge_postings(&per_file, &replaced, &from_memory)
        };

        let mut manifest = Manifest::new(self.root.clone(), self.options.extractors.clone(), now);
        if self.base_valid {
            manifest.created_at_ms = self.base.manifest().created_at_ms;
        }
        let snapshot = Snapshot::from_parts(manifest, files, symbols, postings);

        std::fs::remove_file(&journal_path).map_err(|err| {
            IndexError::io(format!("failed to remove {}", journal_path.display()), err)
        })?;
        snapshot.write_to(&staging)?;
        self.check_cancelled()?;
        self.store.publish_staging()?;

        let manifest = snapshot.manifest();
        Ok(CommitSummary {
            outcome: CommitOutcome::Published,
            files: manifest.file_count,
            symbols: manifest.symbol_count,
            tokens: manifest.token_count,
            spilled_changes: stats.changes,
            elapsed: started.elapsed(),
        })
    }

    /// Base postings minus replaced files, plus postings of the new symbols.
    ///
    /// Valid only when every final id equals its derived id.
    fn merge_postings(
        &self,
        per_file: &BTreeMap<String, Vec<SymbolRecord>>,
        replaced: &BTreeSet<String>,
        from_memory: &BTreeSet<String>,
    ) -> PostingMap {
        let removed: HashSet<SymbolId> = replaced
            .iter()
            .flat_map(|path| self.base.symbols_in(path))
            .map(|stored| stored.id)
            .collect();

        let mut map = PostingMap::new();
        for (token, list) in self.base.postings() {
            let kept: Vec<_> = list
                .iter()
                .filter(|posting| !removed.contains(&posting.symbol))
                .copied()
                .collect();
            if !kept.is_empty() {
                map.insert(token.clone(), kept);
            }
        }

        let live_in_memory: HashSet<SymbolId> = from_memory
            .iter()
            .filter_map(|path| per_file.get(path))
            .flatten()
            .map(SymbolRecord::id)
            .collect();
        for bucket in &self.buckets {
            let bucket = std::mem::take(&mut *lock(bucket));
            for (token, list) in bucket {
                let live: Vec<_> = list
                    .into_iter()
                    .filter(|posting| live_in_memory.contains(&posting.symbol))
                    .collect();
                if !live.is_empty() {
                    map.entry(token).or_default().extend(live);
                }
            }
        }

        for path in replaced.iter().filter(|path| !from_memory.contains(*path)) {
            for symbol in per_file.get(path).into_iter().flatten() {
                for (token, posting) in postings::postings_for(symbol.id(), &symbol.name) {
                    map.entry(token).or_default().push(posting);
                }
            }
        }

        postings::normalize(&mut map);
        map
    }

    fn cleanup(&mut self) {
        if let Some(journal) = self.journal.take() {
            if let Err(err) = journal.finish() {
                tracing::debug!("journal failed during rollback: {err}");
            }
        }
        if let Err(err) = self.store.discard_staging() {
            tracing::warn!("failed to remove staging: {err}");
        }
    }
}

impl Drop for BuildSession {
    fn drop(&mut self) {
        if self.lock.is_some() {
            tracing::debug!("build session dropped without commit; discarding staging");
            self.cleanup();
            self.lock.take();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_gate(gate: &RwLock<()>) -> std::sync::RwLockReadGuard<'_, ()> {
    gate.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_gate(gate: &RwLock<()>) -> std::sync::RwLockWriteGuard<'_, ()> {
    gate.write().unwrap_or_else(PoisonError::into_inner)
}

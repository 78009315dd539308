// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `index` pipeline: walk, classify, extract, submit, commit.
//!
//! A walker thread feeds a bounded queue; a rayon pool of `workers` threads
//! drains it. A full queue blocks the walker.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::errors::{ExtractError, IndexError};
use crate::indexer::changes::{Change, ChangeDetector};
use crate::indexer::scanner::{FileScanner, ScannedFile};
use crate::indexer::session::{BuildSession, CommitOutcome, SessionOptions, DEFAULT_DELTA_BUDGET};
use crate::parser::{looks_binary, ExtractContext, ExtractorRegistry, DEFAULT_EXTRACT_TIMEOUT};
use crate::store::files::{ContentHash, FileRecord};
use crate::store::{now_unix_ms, IndexStore, DEFAULT_DB_DIR};

/// Files larger than this are skipped unless configured otherwise.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

const QUEUE_PER_WORKER: usize = 4;

/// Everything one `index` run needs.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub root: PathBuf,
    /// Index directory; `<root>/.symdex` when unset.
    pub db: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub verify_hash: bool,
    pub workers: usize,
    pub force: bool,
    pub max_file_size: u64,
    pub keep_failed: bool,
    pub follow_links: bool,
    pub delta_budget_bytes: usize,
    pub extract_timeout: Duration,
    pub show_progress: bool,
}

impl IndexOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            db: None,
            include: Vec::new(),
            exclude: Vec::new(),
            verify_hash: false,
            workers: default_workers(),
            force: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            keep_failed: false,
            follow_links: false,
            delta_budget_bytes: DEFAULT_DELTA_BUDGET,
            extract_timeout: DEFAULT_EXTRACT_TIMEOUT,
            show_progress: false,
        }
    }

    /// Index directory for a canonical root.
    pub fn db_path(&self, root: &Path) -> PathBuf {
        match &self.db {
            Some(db) if db.is_relative() => std::env::current_dir()
                .map(|cwd| cwd.join(db))
                .unwrap_or_else(|_| db.clone()),
            Some(db) => db.clone(),
            None => root.join(DEFAULT_DB_DIR),
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// What an `index` run did.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub root: String,
    pub db: String,
    pub scanned: usize,
    pub new: usize,
    pub modified: usize,
    pub touched: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub files: u64,
    pub symbols: u64,
    pub tokens: u64,
    pub outcome: CommitOutcome,
    pub elapsed_ms: u64,
}

#[derive(Default)]
struct Counters {
    scanned: AtomicUsize,
    new: AtomicUsize,
    modified: AtomicUsize,
    touched: AtomicUsize,
    unchanged: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}

struct Worker<'a> {
    session: &'a BuildSession,
    detector: ChangeDetector<'a>,
    registry: &'a ExtractorRegistry,
    options: &'a IndexOptions,
    counters: &'a Counters,
    seen: &'a Mutex<HashSet<String>>,
    progress: &'a ProgressBar,
}

impl Worker<'_> {
    fn process(&self, file: ScannedFile) -> Result<(), IndexError> {
        let cancel = self.session.cancel_token();
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        Counters::bump(&self.counters.scanned);
        self.progress.inc(1);

        if file.size > self.options.max_file_size {
            tracing::warn!(
                "skipping {} ({} bytes exceeds max file size {})",
                file.key,
                file.size,
                self.options.max_file_size
            );
            Counters::bump(&self.counters.skipped);
            return Ok(());
        }
        let Some(extractor) = self.registry.for_path(&file.path) else {
            Counters::bump(&self.counters.skipped);
            return Ok(());
        };

        let change = match self
            .detector
            .classify(&file, extractor.id(), extractor.version())
        {
            Ok(change) => change,
            Err(err) => {
                tracing::warn!("skipping unreadable {}: {err}", file.key);
                Counters::bump(&self.counters.skipped);
                return Ok(());
            }
        };

        let (bytes, is_new) = match change {
            Change::Unchanged => {
                Counters::bump(&self.counters.unchanged);
                self.mark_seen(&file);
                return Ok(());
            }
            Change::Touched(hash) => {
                let indexed_at_ms = self
                    .detector
                    .prior(&file.key)
                    .map_or_else(now_unix_ms, |prior| prior.indexed_at_ms);
                self.session.touch(FileRecord {
                    path: file.key.clone(),
                    hash,
                    size: file.size,
                    mtime_ns: file.mtime_ns,
                    extractor: extractor.id().to_string(),
                    extractor_version: extractor.version(),
                    indexed_at_ms,
                })?;
                Counters::bump(&self.counters.touched);
                self.mark_seen(&file);
                return Ok(());
            }
            Change::New => (None, true),
            Change::Modified(bytes) => (bytes, false),
        };

        let bytes = match bytes {
            Some(bytes) => bytes,
            None => match std::fs::read(&file.path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!("skipping unreadable {}: {err}", file.key);
                    Counters::bump(&self.counters.skipped);
                    return Ok(());
                }
            },
        };
        if looks_binary(&bytes) {
            tracing::warn!("skipping binary file {}", file.key);
            Counters::bump(&self.counters.skipped);
            return Ok(());
        }

        let ctx = ExtractContext::new(cancel, self.options.extract_timeout);
        match extractor.extract(&file.key, &bytes, &ctx) {
            Ok(symbols) => {
                tracing::debug!("extracted {} symbols from {}", symbols.len(), file.key);
                let record = FileRecord {
                    path: file.key.clone(),
                    hash: ContentHash::of(&bytes),
                    size: bytes.len() as u64,
                    mtime_ns: file.mtime_ns,
                    extractor: extractor.id().to_string(),
                    extractor_version: extractor.version(),
                    indexed_at_ms: now_unix_ms(),
                };
                self.session.submit(record, symbols)?;
                Counters::bump(if is_new {
                    &self.counters.new
                } else {
                    &self.counters.modified
                });
                self.mark_seen(&file);
                Ok(())
            }
            Err(ExtractError::Cancelled) => Err(IndexError::Cancelled),
            Err(err) => {
                tracing::warn!("failed to extract {}: {err}", file.key);
                Counters::bump(&self.counters.failed);
                if self.options.keep_failed && self.detector.prior(&file.key).is_some() {
                    tracing::info!("keeping previous symbols of {}", file.key);
                    self.mark_seen(&file);
                }
                Ok(())
            }
        }
    }

    fn mark_seen(&self, file: &ScannedFile) {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(file.key.clone());
    }
}

/// Run one incremental (or forced) build of `options.root`.
pub fn run_index(
    options: &IndexOptions,
    registry: &ExtractorRegistry,
    cancel: CancelToken,
) -> Result<IndexSummary, IndexError> {
    let started = Instant::now();
    let scanner = FileScanner::new(&options.root)?;
    let root = scanner.root().to_path_buf();
    let db = options.db_path(&root);
    let extensions = registry.extensions();
    let scanner = scanner
        .with_include(&options.include)?
        .with_exclude(&options.exclude)?
        .with_extensions(&extensions)
        .follow_links(options.follow_links)
        .skip_path(&db);

    let store = IndexStore::new(&db);
    let session = BuildSession::begin(
        store,
        &root,
        SessionOptions {
            force: options.force,
            delta_budget_bytes: options.delta_budget_bytes,
            extractors: registry.versions(),
            cancel: cancel.clone(),
        },
    )?;
    tracing::info!(
        "indexing {} into {} with {} workers",
        root.display(),
        db.display(),
        options.workers
    );

    let counters = Counters::default();
    let seen = Mutex::new(HashSet::new());
    let progress = progress_bar(options.show_progress);
    let workers = options.workers.max(1);

    let walked = {
        let worker = Worker {
            session: &session,
            detector: ChangeDetector::new(session.base().files(), options.verify_hash),
            registry,
            options,
            counters: &counters,
            seen: &seen,
            progress: &progress,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("symdex-worker-{i}"))
            .build()
            .map_err(|err| IndexError::io("failed to start worker pool", std::io::Error::other(err)))?;

        std::thread::scope(|scope| {
            let (tx, rx) = sync_channel::<ScannedFile>(workers * QUEUE_PER_WORKER);
            let walker_cancel = cancel.clone();
            let scanner = &scanner;
            let walker = scope.spawn(move || {
                let mut walk = scanner.walk();
                for file in walk.by_ref() {
                    if walker_cancel.is_cancelled() || tx.send(file).is_err() {
                        break;
                    }
                }
                walk.warnings()
            });
            let processed = pool.install(|| {
                rx.into_iter()
                    .par_bridge()
                    .try_for_each(|file| worker.process(file))
            });
            let joined = walker.join();
            processed?;
            walker_outcome(joined)
        })
    };
    progress.finish_and_clear();

    let warnings = match walked {
        Ok(warnings) => warnings,
        Err(err) => {
            if let Err(abort_err) = session.abort() {
                tracing::warn!("failed to discard staging: {abort_err}");
            }
            return Err(err);
        }
    };
    if cancel.is_cancelled() {
        session.abort()?;
        return Err(IndexError::Cancelled);
    }
    if warnings > 0 {
        tracing::warn!("{warnings} entries could not be read and were skipped");
    }

    let seen = seen
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let deleted = ChangeDetector::new(session.base().files(), false).deleted(&seen);
    for path in &deleted {
        tracing::debug!("removing deleted file {path}");
        session.delete_file(path)?;
    }

    let commit = session.commit()?;
    Ok(IndexSummary {
        root: root.to_string_lossy().into_owned(),
        db: db.to_string_lossy().into_owned(),
        scanned: Counters::get(&counters.scanned),
        new: Counters::get(&counters.new),
        modified: Counters::get(&counters.modified),
        touched: Counters::get(&counters.touched),
        unchanged: Counters::get(&counters.unchanged),
        deleted: deleted.len(),
        failed: Counters::get(&counters.failed),
        skipped: Counters::get(&counters.skipped),
        files: commit.files,
        symbols: commit.symbols,
        tokens: commit.tokens,
        outcome: commit.outcome,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

/// Warnings of a finished walk. A walker that died leaves `seen` incomplete,
/// so the build must not go on to delete what it never reached.
fn walker_outcome(joined: std::thread::Result<usize>) -> Result<usize, IndexError> {
    joined.map_err(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|msg| msg.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!("file walker panicked: {reason}");
        IndexError::io(
            "file walker stopped before finishing the tree",
            std::io::Error::other(reason),
        )
    })
}

fn progress_bar(enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} indexing {pos} files ({elapsed})") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! File watcher for incremental index updates

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::errors::IndexError;
use crate::indexer::pipeline::{run_index, IndexOptions, IndexSummary};
use crate::parser::ExtractorRegistry;

/// Quiet period after the last event before re-indexing.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

const CANCEL_POLL: Duration = Duration::from_millis(250);

/// Build once, then re-run incremental builds whenever the tree changes.
///
/// `report` sees every build result. A busy index is logged and retried on
/// the next change; cancellation ends the loop with `Cancelled`.
pub fn watch(
    options: &IndexOptions,
    registry: &ExtractorRegistry,
    debounce: Duration,
    cancel: CancelToken,
    mut report: impl FnMut(&IndexSummary),
) -> Result<(), IndexError> {
    let summary = run_index(options, registry, cancel.clone())?;
    let root = PathBuf::from(&summary.root);
    let db = PathBuf::from(&summary.db);
    report(&summary);

    let (tx, rx) = channel();
    let config = Config::default().with_poll_interval(Duration::from_secs(2));
    let mut watcher = RecommendedWatcher::new(tx, config).map_err(watch_error)?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(watch_error)?;
    tracing::info!("watching {} for changes", root.display());

    loop {
        if !wait_for_change(&rx, &db, debounce, &cancel)? {
            return Ok(());
        }
        tracing::info!("change detected, re-indexing");
        match run_index(options, registry, cancel.clone()) {
            Ok(summary) => report(&summary),
            Err(err @ IndexError::Busy { .. }) => {
                tracing::warn!("{err}");
                tracing::warn!("will retry on the next change");
            }
            Err(IndexError::Cancelled) => return Err(IndexError::Cancelled),
            Err(err @ IndexError::Walk { .. }) => return Err(err),
            Err(err) => tracing::warn!("re-index failed: {err}"),
        }
    }
}

/// Block until a relevant event arrives and the tree has been quiet for
/// `debounce`. Returns false when the watcher channel closed.
fn wait_for_change(
    rx: &Receiver<notify::Result<Event>>,
    db: &Path,
    debounce: Duration,
    cancel: &CancelToken,
) -> Result<bool, IndexError> {
    loop {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        match rx.recv_timeout(CANCEL_POLL) {
            Ok(Ok(event)) if should_reindex(&event, db) => break,
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::warn!("watch error: {err}"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(false),
        }
    }
    // Drain the burst.
    loop {
        match rx.recv_timeout(debounce) {
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => return Ok(true),
            Err(RecvTimeoutError::Disconnected) => return Ok(false),
        }
    }
}

/// Content events outside the index directory trigger a rebuild.
fn should_reindex(event: &Event, db: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|path| !path.starts_with(db))
}

fn watch_error(err: notify::Error) -> IndexError {
    IndexError::io("file watcher failed", std::io::Error::other(err))
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Indexer module - handles file scanning, change detection, build sessions
//! and watching

pub mod changes;
pub mod journal;
pub mod lock;
pub mod pipeline;
pub mod scanner;
pub mod session;
pub mod status;
pub mod watch;

pub use pipeline::{run_index, IndexOptions, IndexSummary};
pub use session::BuildSession;

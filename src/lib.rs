// SPDX-License-Identifier: MIT OR Apache-2.0

//! symdex - Lexical symbol index and search
//!
//! Library behind the `symdex` CLI: extractors turn source files into symbol
//! records, the indexer keeps a persistent snapshot of them current, and the
//! query engine ranks symbols against parsed queries.

pub mod cancel;
pub mod config;
pub mod errors;
pub mod indexer;
pub mod output;
pub mod parser;
pub mod query;
pub mod store;

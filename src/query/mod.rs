// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query module - query parsing, ranking and the search command

pub mod engine;
pub mod parser;
pub mod search;

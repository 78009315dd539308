// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `search` command: load the committed snapshot, run one query window
//! and print it.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::errors::{IndexError, EXIT_NO_RESULTS, EXIT_OK};
use crate::output::{colorize_kind, colorize_line_num, colorize_name, colorize_path, print_json};
use crate::parser::symbols::{Span, SymbolRecord};
use crate::query::engine::{Cursor, QueryEngine, SearchHit};
use crate::query::parser::{file_term, kind_term, parse_query, Query};
use crate::store::IndexStore;

/// Inputs of one `search` invocation.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub query: String,
    pub db: PathBuf,
    pub limit: usize,
    pub kind: Option<String>,
    pub file: Option<String>,
    pub cursor: Option<String>,
    pub json: bool,
    /// Declaration lines shown per hit; 0 disables context.
    pub context: usize,
}

/// Minimal search result for JSON output
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SearchResultJson<'a> {
    pub path: &'a str,
    pub line: u32,
    pub col: u32,
    pub kind: &'static str,
    pub name: &'a str,
    pub signature: &'a str,
    pub doc: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
}

impl<'a> SearchResultJson<'a> {
    fn from_hit(hit: &'a SearchHit<'_>, context: Option<Vec<String>>) -> Self {
        let record = &hit.symbol.record;
        Self {
            path: &hit.path,
            line: record.span.start_line,
            col: record.span.start_col,
            kind: record.kind.as_str(),
            name: &record.name,
            signature: &record.signature,
            doc: record.doc.as_deref(),
            context,
        }
    }
}

/// The first `max_lines` source lines of the declaration at `span`.
pub fn declaration_lines(source: &str, span: &Span, max_lines: usize) -> Vec<String> {
    if max_lines == 0 {
        return Vec::new();
    }
    let first = span.start_line.max(1) as usize;
    let last = (span.end_line as usize).max(first);
    let count = (last - first + 1).min(max_lines);
    source
        .lines()
        .skip(first - 1)
        .take(count)
        .map(str::to_string)
        .collect()
}

/// Reads each hit's file at most once per page.
struct ContextReader {
    max_lines: usize,
    files: HashMap<String, Option<String>>,
}

impl ContextReader {
    fn new(max_lines: usize) -> Self {
        Self {
            max_lines,
            files: HashMap::new(),
        }
    }

    fn lines(&mut self, record: &SymbolRecord) -> Option<Vec<String>> {
        if self.max_lines == 0 {
            return None;
        }
        let source = self
            .files
            .entry(record.path.clone())
            .or_insert_with(|| match std::fs::read_to_string(&record.path) {
                Ok(text) => Some(text),
                Err(err) => {
                    tracing::debug!("no context for {}: {err}", record.path);
                    None
                }
            })
            .as_deref()?;
        let lines = declaration_lines(source, &record.span, self.max_lines);
        (!lines.is_empty()).then_some(lines)
    }
}

/// Query string plus `--kind` / `--file` flags as one ANDed query.
pub fn build_query(
    query: &str,
    kind: Option<&str>,
    file: Option<&str>,
) -> Result<Query, IndexError> {
    let mut parsed = if query.trim().is_empty() && (kind.is_some() || file.is_some()) {
        Query::default()
    } else {
        parse_query(query)?
    };
    if let Some(kind) = kind {
        parsed.push(kind_term(kind)?);
    }
    if let Some(file) = file {
        parsed.push(file_term(file)?);
    }
    Ok(parsed)
}

/// Run the search command; returns the process exit code.
pub fn run(options: &SearchOptions) -> Result<i32> {
    let query = build_query(&options.query, options.kind.as_deref(), options.file.as_deref())?;
    let cursor = options
        .cursor
        .as_deref()
        .map(str::parse::<Cursor>)
        .transpose()?;

    let store = IndexStore::new(&options.db);
    let snapshot = store.load()?;
    let engine = QueryEngine::new(&snapshot);
    let page = engine.search(&query, options.limit.max(1), cursor.as_ref());
    tracing::debug!(
        "query '{}' matched {} symbols, showing {}",
        options.query,
        page.total,
        page.hits.len()
    );

    let mut context = ContextReader::new(options.context);
    if options.json {
        let results: Vec<SearchResultJson<'_>> = page
            .hits
            .iter()
            .map(|hit| SearchResultJson::from_hit(hit, context.lines(&hit.symbol.record)))
            .collect();
        print_json(&results, false)?;
    } else {
        for hit in &page.hits {
            let record = &hit.symbol.record;
            println!(
                "{}:{}:{} {} {}",
                colorize_path(&hit.path),
                colorize_line_num(record.span.start_line),
                record.span.start_col,
                colorize_kind(record.kind.as_str()),
                colorize_name(&record.name)
            );
            if let Some(lines) = context.lines(record) {
                for (line_no, line) in (record.span.start_line.max(1)..).zip(&lines) {
                    println!("  {}| {line}", colorize_line_num(line_no));
                }
            }
        }
        if page.hits.is_empty() {
            eprintln!("No symbols found matching: {}", options.query.trim());
        }
    }
    if let Some(next) = &page.next_cursor {
        eprintln!("next cursor: {next}");
    }

    Ok(if page.hits.is_empty() {
        EXIT_NO_RESULTS
    } else {
        EXIT_OK
    })
}

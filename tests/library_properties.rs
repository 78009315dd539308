// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use symdex::cancel::CancelToken;
use symdex::indexer::pipeline::{run_index, IndexOptions};
use symdex::parser::tokens::tokenize;
use symdex::parser::ExtractorRegistry;
use symdex::query::engine::QueryEngine;
use symdex::query::parser::parse_query;
use symdex::store::IndexStore;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write file");
}

fn fixture(dir: &Path) {
    write_file(
        &dir.join("billing/invoice.go"),
        "package billing\n\n\
         // Invoice is a customer bill.\n\
         type Invoice struct {\n\tTotal float64\n\tLineItems []string\n}\n\n\
         const MaxLineItems = 100\n\n\
         var defaultRate = 0.2\n\n\
         // TODO: support multiple currencies\n\
         func (i *Invoice) CalculateTax() float64 {\n\treturn i.Total * defaultRate\n}\n\n\
         func NewHTTPServer(port int) {}\n",
    );
    write_file(
        &dir.join("src/lib.rs"),
        "pub const MAX_RETRIES: u32 = 3;\n\n\
         /// Parses a config file.\n\
         pub fn parse_config_v2(path: &str) -> Option<String> {\n    None\n}\n\n\
         pub struct HttpServer {\n    pub port: u16,\n}\n\n\
         impl HttpServer {\n    pub fn start(&self) {}\n}\n\n\
         pub enum Mode {\n    Fast,\n    Slow,\n}\n",
    );
}

fn build(dir: &Path) -> IndexStore {
    let mut options = IndexOptions::new(dir);
    options.workers = 2;
    let summary =
        run_index(&options, &ExtractorRegistry::default(), CancelToken::new()).expect("index");
    assert_eq!(summary.files, 2);
    IndexStore::new(summary.db)
}

#[test]
fn every_name_token_finds_its_symbol() {
    let dir = TempDir::new().expect("tempdir");
    fixture(dir.path());
    let snapshot = build(dir.path()).load().expect("load");
    let engine = QueryEngine::new(&snapshot);
    assert!(snapshot.symbols().len() >= 10);

    for stored in snapshot.symbols() {
        for token in tokenize(&stored.record.name) {
            let query = parse_query(&token).expect("token query");
            let hits = engine.ranked(&query);
            assert!(
                hits.iter().any(|hit| hit.symbol.id == stored.id),
                "token '{token}' does not find {}",
                stored.record.name
            );
        }
    }
}

#[test]
fn exact_name_hits_are_the_stored_records() {
    let dir = TempDir::new().expect("tempdir");
    fixture(dir.path());
    let snapshot = build(dir.path()).load().expect("load");
    let engine = QueryEngine::new(&snapshot);

    for stored in snapshot.symbols() {
        let query = parse_query(&stored.record.name).expect("name query");
        let hits = engine.ranked(&query);
        let exact: Vec<_> = hits
            .iter()
            .filter(|hit| hit.symbol.record.name == stored.record.name)
            .collect();
        assert!(!exact.is_empty(), "{} not found", stored.record.name);
        for hit in exact {
            assert_eq!(snapshot.symbol(hit.symbol.id), Some(hit.symbol));
        }
    }
}

#[test]
fn deleted_file_symbols_disappear() {
    let dir = TempDir::new().expect("tempdir");
    fixture(dir.path());
    let store = build(dir.path());
    let before = store.load().expect("load");
    let rust_symbols = before
        .symbols()
        .iter()
        .filter(|s| s.record.path.ends_with("lib.rs"))
        .count();
    assert!(rust_symbols > 0);

    fs::remove_file(dir.path().join("src/lib.rs")).expect("remove");
    let mut options = IndexOptions::new(dir.path());
    options.workers = 1;
    let summary =
        run_index(&options, &ExtractorRegistry::default(), CancelToken::new()).expect("reindex");
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.files, 1);

    let after = store.load().expect("load");
    assert!(after.symbols().iter().all(|s| !s.record.path.ends_with("lib.rs")));
    let engine = QueryEngine::new(&after);
    for name in ["HttpServer", "parse_config_v2", "MAX_RETRIES"] {
        let hits = engine.ranked(&parse_query(name).expect("query"));
        assert!(
            hits.iter().all(|hit| !hit.path.ends_with("lib.rs")),
            "{name} still found"
        );
    }
    assert_eq!(
        after.symbols().len(),
        before.symbols().len() - rust_symbols
    );
}

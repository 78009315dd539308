// SPDX-License-Identifier: MIT OR Apache-2.0

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write file");
}

fn symdex(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("symdex"));
    cmd.current_dir(dir)
        .env_remove("INDEX_DB_PATH")
        .env_remove("INDEX_WORKERS")
        .env("NO_COLOR", "1");
    cmd
}

fn index_json(dir: &Path, args: &[&str]) -> Value {
    let assert = symdex(dir)
        .arg("index")
        .args(args)
        .arg("--json")
        .assert()
        .success();
    serde_json::from_slice(&assert.get_output().stdout).expect("index json")
}

fn module_tree(dir: &Path) {
    for module in 0..4 {
        for file in 0..5 {
            write_file(
                &dir.join(format!("module_{module}/file_{file}.go")),
                &format!(
                    "package module{module}\n\n\
                     func Function{module}{file}() int {{ return {file} }}\n\n\
                     func Validate{module}{file}(input string) bool {{ return input != \"\" }}\n\n\
                     type Process{module}{file} struct {{\n\tName string\n}}\n"
                ),
            );
        }
    }
    write_file(
        &dir.join("src/lib.rs"),
        "/// Adds numbers.\npub fn add_numbers(a: i32, b: i32) -> i32 {\n    a + b\n}\n\npub struct HttpServer {\n    pub port: u16,\n}\n",
    );
}

/// `symbols.tab` and every postings shard of the committed snapshot.
fn table_bytes(db: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let current = db.join("current");
    let mut out = BTreeMap::new();
    let mut pending = vec![current.clone()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).expect("read dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let rel = path.strip_prefix(&current).expect("prefix").to_path_buf();
                if rel == Path::new("symbols.tab") || rel.starts_with("postings") {
                    out.insert(rel, fs::read(&path).expect("read table"));
                }
            }
        }
    }
    out
}

#[test]
fn two_full_builds_are_byte_identical() {
    let tree = TempDir::new().expect("tempdir");
    module_tree(tree.path());
    let dbs = TempDir::new().expect("tempdir");
    let first = dbs.path().join("first");
    let second = dbs.path().join("second");

    index_json(tree.path(), &["--db", first.to_str().expect("utf8"), "-j", "1"]);
    index_json(tree.path(), &["--db", second.to_str().expect("utf8"), "-j", "4"]);

    let a = table_bytes(&first);
    let b = table_bytes(&second);
    assert!(a.contains_key(Path::new("symbols.tab")));
    assert!(a.keys().any(|p| p.starts_with("postings")));
    assert_eq!(a, b);
}

#[test]
fn reindex_without_changes_only_touches_the_manifest() {
    let dir = TempDir::new().expect("tempdir");
    module_tree(dir.path());

    let first = index_json(dir.path(), &[]);
    assert_eq!(first["new"], 21);
    assert_eq!(first["outcome"], "published");

    let symbols = dir.path().join(".symdex/current/symbols.tab");
    let before = fs::metadata(&symbols).expect("meta").modified().expect("mtime");
    let before_bytes = table_bytes(&dir.path().join(".symdex"));

    let second = index_json(dir.path(), &[]);
    assert_eq!(second["outcome"], "manifest_only");
    assert_eq!(second["unchanged"], 21);
    assert_eq!(second["new"], 0);
    assert_eq!(second["symbols"], first["symbols"]);

    let after = fs::metadata(&symbols).expect("meta").modified().expect("mtime");
    assert_eq!(before, after);
    assert_eq!(before_bytes, table_bytes(&dir.path().join(".symdex")));
    let files_tab = dir.path().join(".symdex/current/files.tab");
    assert!(files_tab.exists());
}

#[test]
fn rewritten_identical_content_is_not_modified() {
    let dir = TempDir::new().expect("tempdir");
    let file = dir.path().join("main.go");
    write_file(&file, "package main\n\nfunc main() {}\n");
    index_json(dir.path(), &[]);

    std::thread::sleep(std::time::Duration::from_millis(20));
    write_file(&file, "package main\n\nfunc main() {}\n");
    let summary = index_json(dir.path(), &["--verify-hash"]);
    assert_eq!(summary["modified"], 0);
    assert_eq!(summary["new"], 0);
}

#[test]
fn ignore_rules_and_globs_limit_the_walk() {
    let dir = TempDir::new().expect("tempdir");
    write_file(&dir.path().join(".gitignore"), "generated/\n");
    write_file(&dir.path().join("app/main.go"), "package app\n\nfunc Serve() {}\n");
    write_file(&dir.path().join("lib/util.go"), "package lib\n\nfunc Helper() {}\n");
    write_file(&dir.path().join("generated/gen.go"), "package gen\n\nfunc Generated() {}\n");
    write_file(&dir.path().join("vendor/dep.go"), "package dep\n\nfunc Vendored() {}\n");
    write_file(&dir.path().join("notes.txt"), "func NotCode() {}\n");

    let summary = index_json(dir.path(), &["--exclude", "vendor"]);
    assert_eq!(summary["files"], 2, "{summary}");

    symdex(dir.path())
        .args(["search", "generated"])
        .assert()
        .code(1);
    symdex(dir.path())
        .args(["search", "vendored"])
        .assert()
        .code(1);
    symdex(dir.path())
        .args(["search", "serve"])
        .assert()
        .success()
        .stdout(predicate::str::contains("app/main.go:3:"));

    let only_app = index_json(dir.path(), &["--include", "app/**", "--exclude", "vendor"]);
    assert_eq!(only_app["files"], 1);
    assert_eq!(only_app["deleted"], 1);
}

#[test]
fn status_reports_absent_then_ready() {
    let dir = TempDir::new().expect("tempdir");
    write_file(&dir.path().join("main.go"), "package main\n\nfunc main() {}\n");

    let assert = symdex(dir.path())
        .args(["status", "--json", "--db", ".symdex"])
        .assert()
        .success();
    let status: Value = serde_json::from_slice(&assert.get_output().stdout).expect("json");
    assert_eq!(status["state"], "absent");
    assert_eq!(status["files"], 0);

    index_json(dir.path(), &[]);
    let assert = symdex(dir.path())
        .args(["status", "--json"])
        .assert()
        .success();
    let status: Value = serde_json::from_slice(&assert.get_output().stdout).expect("json");
    assert_eq!(status["state"], "ready");
    assert_eq!(status["files"], 1);
    assert_eq!(status["schema_version"], 1);
    assert!(status["extractors"]["go"].is_number());

    symdex(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("state:    ready"))
        .stdout(
            predicate::str::is_match(r"updated:  \d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2} UTC")
                .expect("regex"),
        );
}

#[test]
fn search_finds_index_from_a_subdirectory() {
    let dir = TempDir::new().expect("tempdir");
    write_file(&dir.path().join("pkg/util/util.go"), "package util\n\nfunc HelperFunc() {}\n");
    index_json(dir.path(), &[]);

    symdex(&dir.path().join("pkg/util"))
        .args(["search", "helper"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pkg/util/util.go:3:"));
}

#[test]
fn env_db_path_is_honoured() {
    let dir = TempDir::new().expect("tempdir");
    let db = TempDir::new().expect("tempdir");
    write_file(&dir.path().join("main.go"), "package main\n\nfunc EnvMarker() {}\n");

    symdex(dir.path())
        .env("INDEX_DB_PATH", db.path())
        .arg("index")
        .assert()
        .success()
        .stdout(predicate::str::contains("Indexed"));
    assert!(!dir.path().join(".symdex").exists());
    assert!(db.path().join("current/manifest.json").exists());

    symdex(dir.path())
        .env("INDEX_DB_PATH", db.path())
        .args(["search", "env"])
        .assert()
        .success()
        .stdout(predicate::str::contains("function EnvMarker"));
}

#[test]
fn completions_are_generated() {
    let dir = TempDir::new().expect("tempdir");
    symdex(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("symdex"));
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! File walker using the ignore crate (same as ripgrep)
//!
//! Walks depth-first with entries sorted by name, so two walks over the same
//! tree yield the same sequence.

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::errors::IndexError;
use crate::store::DEFAULT_DB_DIR;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", ".hg", ".svn", DEFAULT_DB_DIR];

/// A candidate source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Absolute path as stored in FileRecords.
    pub key: String,
    pub size: u64,
    pub mtime_ns: u64,
}

/// File walker that respects .gitignore and include/exclude globs
pub struct FileScanner {
    root: PathBuf,
    include: Option<GlobSet>,
    exclude: Option<Arc<GlobSet>>,
    extensions: Vec<String>,
    follow_links: bool,
    skip_paths: Vec<PathBuf>,
}

impl FileScanner {
    /// Fails with `Walk` when `root` is missing or not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, IndexError> {
        let root = root.as_ref();
        let walk_error = |reason: &str| IndexError::Walk {
            root: root.to_path_buf(),
            reason: reason.to_string(),
        };
        let metadata = std::fs::metadata(root).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => walk_error("directory does not exist"),
            _ => walk_error(&err.to_string()),
        })?;
        if !metadata.is_dir() {
            return Err(walk_error("not a directory"));
        }
        let root = root
            .canonicalize()
            .map_err(|err| walk_error(&err.to_string()))?;
        Ok(Self {
            root,
            include: None,
            exclude: None,
            extensions: Vec::new(),
            follow_links: false,
            skip_paths: Vec::new(),
        })
    }

    /// Only files matching one of `patterns` (relative to the root) are
    /// yielded. An empty list includes everything.
    pub fn with_include(mut self, patterns: &[String]) -> Result<Self, IndexError> {
        self.include = build_globset(patterns)?;
        Ok(self)
    }

    /// Files and directories matching one of `patterns` are skipped.
    pub fn with_exclude(mut self, patterns: &[String]) -> Result<Self, IndexError> {
        self.exclude = build_globset(patterns)?.map(Arc::new);
        Ok(self)
    }

    /// Restrict the walk to these lowercase extensions.
    pub fn with_extensions<S: AsRef<str>>(mut self, extensions: &[S]) -> Self {
        self.extensions = extensions
            .iter()
            .map(|ext| ext.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn follow_links(mut self, enabled: bool) -> Self {
        self.follow_links = enabled;
        self
    }

    /// Never descend into `path`, e.g. an index directory inside the root.
    pub fn skip_path(mut self, path: &Path) -> Self {
        self.skip_paths
            .push(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn make_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(false)
            .follow_links(self.follow_links)
            .require_git(false)
            .git_ignore(true)
            .git_exclude(true)
            .git_global(true)
            .sort_by_file_name(|a, b| a.cmp(b));

        let root = self.root.clone();
        let exclude = self.exclude.clone();
        let skip_paths = self.skip_paths.clone();
        builder.filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
            if is_dir {
                let skipped_name = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name));
                if skipped_name || skip_paths.iter().any(|skip| skip == entry.path()) {
                    return false;
                }
            }
            match &exclude {
                Some(exclude) => !exclude.is_match(relative(&root, entry.path())),
                None => true,
            }
        });
        builder
    }

    /// Lazily walk the tree.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            scanner: self,
            inner: self.make_builder().build(),
            warnings: 0,
        }
    }

    fn wants(&self, path: &Path) -> bool {
        let extension_ok = self.extensions.is_empty()
            || path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| self.extensions.contains(&ext.to_ascii_lowercase()));
        if !extension_ok {
            return false;
        }
        match &self.include {
            Some(include) => include.is_match(relative(&self.root, path)),
            None => true,
        }
    }
}

/// Iterator over the files of one walk.
pub struct Walk<'a> {
    scanner: &'a FileScanner,
    inner: ignore::Walk,
    warnings: usize,
}

impl Walk<'_> {
    /// Entries skipped because they could not be read.
    pub fn warnings(&self) -> usize {
        self.warnings
    }
}

impl Iterator for Walk<'_> {
    type Item = ScannedFile;

    fn next(&mut self) -> Option<ScannedFile> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("skipping unreadable entry: {err}");
                    self.warnings += 1;
                    continue;
                }
            };
            // Unfollowed symlinks report their own type and are skipped here.
            if !entry.file_type().is_some_and(|kind| kind.is_file()) {
                continue;
            }
            let path = entry.path();
            if !self.scanner.wants(path) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::warn!("skipping {}: {err}", path.display());
                    self.warnings += 1;
                    continue;
                }
            };
            return Some(ScannedFile {
                key: path.to_string_lossy().into_owned(),
                path: path.to_path_buf(),
                size: metadata.len(),
                mtime_ns: mtime_ns(&metadata),
            });
        }
    }
}

/// Modification time in nanoseconds since the epoch; 0 when unavailable.
pub fn mtime_ns(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>, IndexError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| {
            IndexError::InvalidArgument(format!("invalid glob pattern '{pattern}': {err}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|err| IndexError::InvalidArgument(format!("invalid glob patterns: {err}")))
}

/// Root-relative path with `/` separators.
pub fn relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let text = rel.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        text.into_owned()
    } else {
        text.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    fn walked(scanner: &FileScanner) -> Vec<String> {
        scanner
            .walk()
            .map(|file| relative(scanner.root(), &file.path))
            .collect()
    }

    #[test]
    fn walk_is_name_sorted_and_depth_first() {
        let dir = TempDir::new().expect("tempdir");
        write_file(dir.path(), "b.go", "package b");
        write_file(dir.path(), "a/z.go", "package a");
        write_file(dir.path(), "a/c.go", "package a");
        write_file(dir.path(), "c.go", "package c");

        let scanner = FileScanner::new(dir.path()).expect("scanner");
        assert_eq!(walked(&scanner), vec!["a/c.go", "a/z.go", "b.go", "c.go"]);
    }

    #[test]
    fn respects_gitignore_and_skips_index_dir() {
        let dir = TempDir::new().expect("tempdir");
        write_file(dir.path(), ".gitignore", "generated/\n");
        write_file(dir.path(), "generated/out.go", "package gen");
        write_file(dir.path(), ".symdex/current/manifest.json", "{}");
        write_file(dir.path(), ".git/HEAD", "ref");
        write_file(dir.path(), "main.go", "package main");

        let scanner = FileScanner::new(dir.path())
            .expect("scanner")
            .with_extensions(&["go", "json"]);
        assert_eq!(walked(&scanner), vec!["main.go"]);
    }

    #[test]
    fn include_and_exclude_globs_use_relative_paths() {
        let dir = TempDir::new().expect("tempdir");
        write_file(dir.path(), "cmd/main.go", "package main");
        write_file(dir.path(), "cmd/main_test.go", "package main");
        write_file(dir.path(), "vendor/dep/dep.go", "package dep");
        write_file(dir.path(), "lib.rs", "fn main() {}");

        let scanner = FileScanner::new(dir.path())
            .expect("scanner")
            .with_include(&["**/*.go".to_string()])
            .expect("include")
            .with_exclude(&["vendor".to_string(), "*_test.go".to_string()])
            .expect("exclude");
        assert_eq!(walked(&scanner), vec!["cmd/main.go"]);
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let dir = TempDir::new().expect("tempdir");
        write_file(dir.path(), "Main.GO", "package main");
        write_file(dir.path(), "notes.txt", "todo");

        let scanner = FileScanner::new(dir.path())
            .expect("scanner")
            .with_extensions(&["go"]);
        assert_eq!(walked(&scanner), vec!["Main.GO"]);
    }

    #[test]
    fn reports_size_and_mtime() {
        let dir = TempDir::new().expect("tempdir");
        write_file(dir.path(), "main.go", "package main\n");
        let scanner = FileScanner::new(dir.path()).expect("scanner");
        let file = scanner.walk().next().expect("one file");
        assert_eq!(file.size, 13);
        assert!(file.mtime_ns > 0);
        assert!(Path::new(&file.key).is_absolute());
    }

    #[test]
    fn missing_root_is_walk_error() {
        let dir = TempDir::new().expect("tempdir");
        let err = FileScanner::new(dir.path().join("missing"))
            .err()
            .expect("missing root");
        assert!(matches!(err, IndexError::Walk { .. }));

        write_file(dir.path(), "file.go", "package x");
        let err = FileScanner::new(dir.path().join("file.go"))
            .err()
            .expect("file root");
        assert!(matches!(err, IndexError::Walk { .. }));
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let result = FileScanner::new(dir.path())
            .expect("scanner")
            .with_include(&["a[".to_string()]);
        assert!(matches!(result, Err(IndexError::InvalidArgument(_))));
    }
}

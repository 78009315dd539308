// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change detection against the last committed FileRecords.

use std::collections::{BTreeMap, HashSet};
use std::io;

use crate::indexer::scanner::ScannedFile;
use crate::store::files::{ContentHash, FileRecord};

/// How a walked file relates to its prior record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    New,
    /// Content (or the extractor) changed. Carries the bytes when they were
    /// already read for hashing.
    Modified(Option<Vec<u8>>),
    /// Size or mtime moved but the content hash did not.
    Touched(ContentHash),
    Unchanged,
}

pub struct ChangeDetector<'a> {
    prior: &'a BTreeMap<String, FileRecord>,
    verify_hash: bool,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(prior: &'a BTreeMap<String, FileRecord>, verify_hash: bool) -> Self {
        Self { prior, verify_hash }
    }

    pub fn prior(&self, path: &str) -> Option<&'a FileRecord> {
        self.prior.get(path)
    }

    /// Classify one file. Reads the file only when the metadata short-circuit
    /// cannot decide.
    pub fn classify(
        &self,
        file: &ScannedFile,
        extractor: &str,
        extractor_version: u32,
    ) -> io::Result<Change> {
        let Some(prior) = self.prior.get(&file.key) else {
            return Ok(Change::New);
        };
        if prior.extractor != extractor || prior.extractor_version != extractor_version {
            return Ok(Change::Modified(None));
        }
        let same_metadata = prior.size == file.size && prior.mtime_ns == file.mtime_ns;
        if same_metadata && !self.verify_hash {
            return Ok(Change::Unchanged);
        }

        let bytes = std::fs::read(&file.path)?;
        let hash = ContentHash::of(&bytes);
        Ok(if hash != prior.hash {
            Change::Modified(Some(bytes))
        } else if same_metadata {
            Change::Unchanged
        } else {
            Change::Touched(hash)
        })
    }

    /// Prior paths that were not seen during the walk, in path order.
    pub fn deleted(&self, seen: &HashSet<String>) -> Vec<String> {
        self.prior
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::scanner::FileScanner;
    use tempfile::TempDir;

    fn scan_one(root: &std::path::Path) -> ScannedFile {
        FileScanner::new(root)
            .expect("scanner")
            .walk()
            .next()
            .expect("one file")
    }

    fn prior_for(file: &ScannedFile, content: &str) -> BTreeMap<String, FileRecord> {
        let mut prior = BTreeMap::new();
        prior.insert(
            file.key.clone(),
            FileRecord {
                path: file.key.clone(),
                hash: ContentHash::of(content.as_bytes()),
                size: file.size,
                mtime_ns: file.mtime_ns,
                extractor: "go".to_string(),
                extractor_version: 1,
                indexed_at_ms: 1,
            },
        );
        prior
    }

    #[test]
    fn unknown_path_is_new() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("a.go"), "package a").expect("write");
        let file = scan_one(dir.path());
        let prior = BTreeMap::new();
        let detector = ChangeDetector::new(&prior, false);
        assert_eq!(detector.classify(&file, "go", 1).expect("classify"), Change::New);
    }

    #[test]
    fn matching_metadata_short_circuits() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("a.go"), "package a").expect("write");
        let file = scan_one(dir.path());
        // Hash deliberately differs: without verification it is never read.
        let prior = prior_for(&file, "something else");
        let detector = ChangeDetector::new(&prior, false);
        assert_eq!(
            detector.classify(&file, "go", 1).expect("classify"),
            Change::Unchanged
        );

        let verifying = ChangeDetector::new(&prior, true);
        assert!(matches!(
            verifying.classify(&file, "go", 1).expect("classify"),
            Change::Modified(Some(_))
        ));
    }

    #[test]
    fn metadata_change_with_same_content_is_touch() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("a.go"), "package a").expect("write");
        let mut file = scan_one(dir.path());
        let prior = prior_for(&file, "package a");
        file.mtime_ns += 1;
        let detector = ChangeDetector::new(&prior, false);
        assert_eq!(
            detector.classify(&file, "go", 1).expect("classify"),
            Change::Touched(ContentHash::of(b"package a"))
        );
    }

    #[test]
    fn extractor_version_bump_forces_reextraction() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("a.go"), "package a").expect("write");
        let file = scan_one(dir.path());
        let prior = prior_for(&file, "package a");
        let detector = ChangeDetector::new(&prior, false);
        assert_eq!(
            detector.classify(&file, "go", 2).expect("classify"),
            Change::Modified(None)
        );
    }

    #[test]
    fn unseen_prior_paths_are_deleted() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("a.go"), "package a").expect("write");
        let file = scan_one(dir.path());
        let mut prior = prior_for(&file, "package a");
        let gone = FileRecord {
            path: "/gone.go".to_string(),
            ..prior[&file.key].clone()
        };
        prior.insert(gone.path.clone(), gone);

        let detector = ChangeDetector::new(&prior, false);
        let seen: HashSet<String> = [file.key.clone()].into_iter().collect();
        assert_eq!(detector.deleted(&seen), vec!["/gone.go".to_string()]);
    }
}

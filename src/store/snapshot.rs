// SPDX-License-Identifier: MIT OR Apache-2.0

//! Immutable in-memory view of one committed index directory.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::path::Path;

use crate::errors::IndexError;
use crate::parser::symbols::{SymbolId, SymbolRecord};
use crate::store::files::{self, FileRecord};
use crate::store::manifest::{parse_manifest, Manifest, MANIFEST_FILE};
use crate::store::postings::{self, Posting, PostingMap, POSTINGS_DIR};
use crate::store::symbols::{self as symbol_table, StoredSymbol};
use crate::store::{read_mapped, sync_dir, write_synced};

pub const FILES_TABLE: &str = "files.tab";
pub const SYMBOLS_TABLE: &str = "symbols.tab";

#[derive(Debug, Clone)]
pub struct Snapshot {
    manifest: Manifest,
    files: BTreeMap<String, FileRecord>,
    symbols: Vec<StoredSymbol>,
    by_id: HashMap<SymbolId, usize>,
    by_file: HashMap<String, Range<usize>>,
    postings: PostingMap,
    ids_displaced: bool,
}

/// Assign ids in key order, moving to `id + 1` on collision.
///
/// Returns the stored symbols (grouped by path, extractor order kept) and
/// whether any id differs from its derived value.
pub fn assign_ids(per_file: &BTreeMap<String, Vec<SymbolRecord>>) -> (Vec<StoredSymbol>, bool) {
    let total = per_file.values().map(Vec::len).sum();
    let mut taken = HashSet::with_capacity(total);
    let mut out = Vec::with_capacity(total);
    let mut displaced = false;
    for records in per_file.values() {
        for record in records {
            let mut id = record.id();
            while !taken.insert(id) {
                id = SymbolId(id.0.wrapping_add(1));
                displaced = true;
            }
            out.push(StoredSymbol {
                id,
                record: record.clone(),
            });
        }
    }
    (out, displaced)
}

/// Full posting map for `symbols`.
pub fn build_postings(symbols: &[StoredSymbol]) -> PostingMap {
    let mut map = PostingMap::new();
    for symbol in symbols {
        for (token, posting) in postings::postings_for(symbol.id, &symbol.record.name) {
            map.entry(token).or_default().push(posting);
        }
    }
    postings::normalize(&mut map);
    map
}

impl Snapshot {
    pub fn empty(manifest: Manifest) -> Self {
        Self::from_parts(manifest, BTreeMap::new(), Vec::new(), PostingMap::new())
    }

    /// Snapshot built from scratch for the given files and their symbols.
    pub fn build(
        manifest: Manifest,
        files: BTreeMap<String, FileRecord>,
        per_file: &BTreeMap<String, Vec<SymbolRecord>>,
    ) -> Self {
        let (symbols, displaced) = assign_ids(per_file);
        let postings = build_postings(&symbols);
        let mut snapshot = Self::from_parts(manifest, files, symbols, postings);
        snapshot.ids_displaced = displaced;
        snapshot
    }

    /// Assemble from final tables. `symbols` must be grouped by path.
    pub(crate) fn from_parts(
        mut manifest: Manifest,
        files: BTreeMap<String, FileRecord>,
        symbols: Vec<StoredSymbol>,
        postings: PostingMap,
    ) -> Self {
        let mut by_id = HashMap::with_capacity(symbols.len());
        let mut by_file: HashMap<String, Range<usize>> = HashMap::new();
        let mut ids_displaced = false;
        for (idx, symbol) in symbols.iter().enumerate() {
            by_id.insert(symbol.id, idx);
            ids_displaced |= symbol.id != symbol.record.id();
            by_file
                .entry(symbol.record.path.clone())
                .and_modify(|range| range.end = idx + 1)
                .or_insert(idx..idx + 1);
        }

        manifest.file_count = files.len() as u64;
        manifest.symbol_count = symbols.len() as u64;
        manifest.token_count = postings.len() as u64;
        manifest.shards = postings::shards(&postings).into_keys().collect();

        Self {
            manifest,
            files,
            symbols,
            by_id,
            by_file,
            postings,
            ids_displaced,
        }
    }

    /// Load the snapshot stored in `dir`. `db` is used in error messages.
    pub fn read_from(dir: &Path, db: &Path) -> Result<Self, IndexError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest_bytes = match std::fs::read(&manifest_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(IndexError::io(
                    format!("failed to read {}", manifest_path.display()),
                    err,
                ))
            }
        };
        let manifest = parse_manifest(db, &manifest_bytes)?;

        let files_path = dir.join(FILES_TABLE);
        let files = files::replay(&read_mapped(&files_path)?)
            .map_err(|err| IndexError::corrupt(&files_path, err))?;

        let symbols_path = dir.join(SYMBOLS_TABLE);
        let symbols = symbol_table::decode_table(&read_mapped(&symbols_path)?)
            .map_err(|err| IndexError::corrupt(&symbols_path, err))?;

        let mut postings = PostingMap::new();
        for prefix in &manifest.shards {
            let shard_path = dir
                .join(POSTINGS_DIR)
                .join(postings::shard_file_name(prefix));
            let entries = postings::decode_shard(&read_mapped(&shard_path)?)
                .map_err(|err| IndexError::corrupt(&shard_path, err))?;
            for (token, list) in entries {
                if postings::shard_prefix(&token) != *prefix {
                    return Err(IndexError::corrupt(
                        &shard_path,
                        format!("token '{token}' stored in the wrong shard"),
                    ));
                }
                postings.insert(token, list);
            }
        }

        let mut seen = HashSet::with_capacity(symbols.len());
        for symbol in &symbols {
            if !files.contains_key(&symbol.record.path) {
                return Err(IndexError::corrupt(
                    &symbols_path,
                    format!("symbol owned by unknown file {}", symbol.record.path),
                ));
            }
            if !seen.insert(symbol.id) {
                return Err(IndexError::corrupt(
                    &symbols_path,
                    format!("duplicate symbol id {}", symbol.id),
                ));
            }
        }

        Ok(Self::from_parts(manifest, files, symbols, postings))
    }

    /// Write every table into `dir` (which must be empty), manifest last,
    /// syncing each file and the directories.
    pub fn write_to(&self, dir: &Path) -> Result<(), IndexError> {
        let postings_dir = dir.join(POSTINGS_DIR);
        std::fs::create_dir_all(&postings_dir).map_err(|err| {
            IndexError::io(format!("failed to create {}", postings_dir.display()), err)
        })?;

        write_synced(&dir.join(FILES_TABLE), &files::compact(&self.files))?;
        write_synced(
            &dir.join(SYMBOLS_TABLE),
            &symbol_table::encode_table(&self.symbols),
        )?;
        for (prefix, entries) in postings::shards(&self.postings) {
            write_synced(
                &postings_dir.join(postings::shard_file_name(&prefix)),
                &postings::encode_shard(&entries),
            )?;
        }
        sync_dir(&postings_dir)?;

        write_synced(&dir.join(MANIFEST_FILE), &self.manifest.to_json()?)?;
        sync_dir(dir)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub(crate) fn manifest_mut(&mut self) -> &mut Manifest {
        &mut self.manifest
    }

    pub fn root(&self) -> &Path {
        Path::new(&self.manifest.root)
    }

    pub fn files(&self) -> &BTreeMap<String, FileRecord> {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn symbols(&self) -> &[StoredSymbol] {
        &self.symbols
    }

    pub fn symbol(&self, id: SymbolId) -> Option<&StoredSymbol> {
        self.by_id.get(&id).map(|&idx| &self.symbols[idx])
    }

    /// Symbols of one file, in extractor order.
    pub fn symbols_in(&self, path: &str) -> &[StoredSymbol] {
        self.by_file
            .get(path)
            .map(|range| &self.symbols[range.clone()])
            .unwrap_or(&[])
    }

    pub fn postings(&self) -> &PostingMap {
        &self.postings
    }

    pub fn postings_for(&self, token: &str) -> &[Posting] {
        self.postings.get(token).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tokens starting with `prefix`, in sorted order.
    pub fn tokens_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Vec<Posting>)> + 'a {
        self.postings
            .range(prefix.to_string()..)
            .take_while(move |(token, _)| token.starts_with(prefix))
    }

    pub fn ids_displaced(&self) -> bool {
        self.ids_displaced
    }

    /// `path` relative to the indexed root, with `/` separators.
    pub fn display_path(&self, path: &str) -> String {
        Path::new(path)
            .strip_prefix(self.root())
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::symbols::SymbolKind;
    use crate::store::files::tests::record;
    use crate::store::symbols::tests::symbol;
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        let mut files = BTreeMap::new();
        files.insert("/repo/tax.go".to_string(), record("/repo/tax.go", "tax"));
        files.insert("/repo/util.go".to_string(), record("/repo/util.go", "util"));

        let mut per_file = BTreeMap::new();
        per_file.insert(
            "/repo/tax.go".to_string(),
            vec![
                symbol("/repo/tax.go", 30, "Invoice", SymbolKind::Type),
                symbol("/repo/tax.go", 10, "CalculateTax", SymbolKind::Function),
            ],
        );
        per_file.insert(
            "/repo/util.go".to_string(),
            vec![symbol("/repo/util.go", 5, "taxRate", SymbolKind::Variable)],
        );
        let manifest = Manifest::new("/repo", BTreeMap::new(), 42);
        Snapshot::build(manifest, files, &per_file)
    }

    #[test]
    fn build_indexes_every_token() {
        let snapshot = sample();
        assert_eq!(snapshot.manifest().file_count, 2);
        assert_eq!(snapshot.manifest().symbol_count, 3);
        assert_eq!(snapshot.postings_for("tax").len(), 2);
        assert_eq!(snapshot.postings_for("invoice").len(), 1);
        let prefixed: Vec<&String> = snapshot.tokens_with_prefix("ra").map(|(t, _)| t).collect();
        assert_eq!(prefixed, vec!["rate"]);
    }

    #[test]
    fn symbols_keep_extractor_order_within_file() {
        let snapshot = sample();
        let names: Vec<&str> = snapshot
            .symbols_in("/repo/tax.go")
            .iter()
            .map(|s| s.record.name.as_str())
            .collect();
        assert_eq!(names, vec!["Invoice", "CalculateTax"]);
        assert!(snapshot.symbols_in("/repo/missing.go").is_empty());
    }

    #[test]
    fn write_and_read_back() {
        let dir = TempDir::new().expect("tempdir");
        let snapshot = sample();
        snapshot.write_to(dir.path()).expect("write");
        assert!(dir.path().join("postings/ca.post").is_file());
        assert!(dir.path().join("postings/ta.post").is_file());

        let loaded = Snapshot::read_from(dir.path(), dir.path()).expect("read");
        assert_eq!(loaded.files(), snapshot.files());
        assert_eq!(loaded.symbols(), snapshot.symbols());
        assert_eq!(loaded.postings(), snapshot.postings());
        assert_eq!(loaded.manifest(), snapshot.manifest());
        assert!(!loaded.ids_displaced());
    }

    #[test]
    fn colliding_ids_are_displaced() {
        let mut per_file = BTreeMap::new();
        let first = symbol("/repo/a.go", 1, "A", SymbolKind::Function);
        per_file.insert("/repo/a.go".to_string(), vec![first.clone(), first]);
        let (symbols, displaced) = assign_ids(&per_file);
        assert!(displaced);
        assert_eq!(symbols[1].id.0, symbols[0].id.0.wrapping_add(1));
    }

    #[test]
    fn display_path_is_root_relative() {
        let snapshot = sample();
        assert_eq!(snapshot.display_path("/repo/pkg/tax.go"), "pkg/tax.go");
        assert_eq!(snapshot.display_path("/elsewhere/x.go"), "/elsewhere/x.go");
    }

    #[test]
    fn truncated_symbol_table_is_corrupt() {
        let dir = TempDir::new().expect("tempdir");
        sample().write_to(dir.path()).expect("write");
        let table = dir.path().join(SYMBOLS_TABLE);
        let bytes = std::fs::read(&table).expect("read");
        std::fs::write(&table, &bytes[..bytes.len() / 2]).expect("truncate");

        let err = Snapshot::read_from(dir.path(), dir.path()).expect_err("corrupt");
        assert!(matches!(err, IndexError::Corrupt { .. }), "{err}");
    }
}

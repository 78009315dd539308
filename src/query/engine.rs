// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query evaluation over a committed snapshot: candidate lookup through the
//! inverted index, predicate filtering, ranking and cursor pagination.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::IndexError;
use crate::parser::symbols::SymbolId;
use crate::parser::tokens::tokenize;
use crate::query::parser::{Query, Term};
use crate::store::snapshot::Snapshot;
use crate::store::symbols::StoredSymbol;

/// How well a symbol matched; lower ranks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// A whole token equals the query text.
    Exact,
    /// A token starts with the query text.
    Prefix,
    /// The query text occurs inside a token or across tokens.
    Substring,
}

impl MatchTier {
    fn code(self) -> u8 {
        match self {
            MatchTier::Exact => 0,
            MatchTier::Prefix => 1,
            MatchTier::Substring => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MatchTier::Exact),
            1 => Some(MatchTier::Prefix),
            2 => Some(MatchTier::Substring),
            _ => None,
        }
    }
}

/// Total order of results: tier, kind priority, shorter name, path, then
/// position in the file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RankKey {
    tier: MatchTier,
    priority: u8,
    name_len: u32,
    path: String,
    offset: u64,
    id: SymbolId,
}

/// Resume point: the rank key of the last result already returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(RankKey);

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = &self.0;
        let path_hex: String = key.path.bytes().map(|b| format!("{b:02x}")).collect();
        write!(
            f,
            "{}.{}.{}.{}.{}.{}",
            key.tier.code(),
            key.priority,
            key.name_len,
            key.offset,
            key.id,
            path_hex
        )
    }
}

impl FromStr for Cursor {
    type Err = IndexError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || IndexError::InvalidArgument(format!("invalid cursor '{raw}'"));
        let parts: Vec<&str> = raw.split('.').collect();
        let [tier, priority, name_len, offset, id, path_hex] = parts.as_slice() else {
            return Err(invalid());
        };
        let tier = tier
            .parse()
            .ok()
            .and_then(MatchTier::from_code)
            .ok_or_else(invalid)?;
        let id = u64::from_str_radix(id, 16).map_err(|_| invalid())?;
        if path_hex.len() % 2 != 0 {
            return Err(invalid());
        }
        let bytes = (0..path_hex.len())
            .step_by(2)
            .map(|i| {
                path_hex
                    .get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
            })
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(invalid)?;
        let path = String::from_utf8(bytes).map_err(|_| invalid())?;
        Ok(Cursor(RankKey {
            tier,
            priority: priority.parse().map_err(|_| invalid())?,
            name_len: name_len.parse().map_err(|_| invalid())?,
            path,
            offset: offset.parse().map_err(|_| invalid())?,
            id: SymbolId(id),
        }))
    }
}

/// One ranked result.
#[derive(Debug, Clone)]
pub struct SearchHit<'a> {
    pub symbol: &'a StoredSymbol,
    pub tier: MatchTier,
    /// Root-relative path.
    pub path: String,
    key: RankKey,
}

impl SearchHit<'_> {
    pub fn cursor(&self) -> Cursor {
        Cursor(self.key.clone())
    }
}

/// One window of results.
#[derive(Debug, Clone)]
pub struct Page<'a> {
    pub hits: Vec<SearchHit<'a>>,
    /// Present when more results follow this window.
    pub next_cursor: Option<Cursor>,
    /// Matches across all windows.
    pub total: usize,
}

/// Read-only query evaluation over one snapshot.
pub struct QueryEngine<'a> {
    snapshot: &'a Snapshot,
}

impl<'a> QueryEngine<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self { snapshot }
    }

    /// Results `after` the cursor (or from the start), at most `limit`.
    pub fn search(&self, query: &Query, limit: usize, after: Option<&Cursor>) -> Page<'a> {
        let hits = self.ranked(query);
        let total = hits.len();
        let start = match after {
            Some(cursor) => hits.partition_point(|hit| hit.key <= cursor.0),
            None => 0,
        };
        let mut window: Vec<SearchHit<'a>> = hits.into_iter().skip(start).collect();
        let next_cursor = if window.len() > limit {
            window.truncate(limit);
            window.last().map(SearchHit::cursor)
        } else {
            None
        };
        Page {
            hits: window,
            next_cursor,
            total,
        }
    }

    /// Every match, best first.
    pub fn ranked(&self, query: &Query) -> Vec<SearchHit<'a>> {
        let mut hits: Vec<SearchHit<'a>> = match self.candidates(query) {
            Some(ids) => ids
                .into_iter()
                .filter_map(|id| self.snapshot.symbol(id))
                .filter_map(|symbol| self.evaluate(query, symbol))
                .collect(),
            None => self
                .snapshot
                .symbols()
                .iter()
                .filter_map(|symbol| self.evaluate(query, symbol))
                .collect(),
        };
        hits.sort_by(|a, b| a.key.cmp(&b.key));
        hits
    }

    /// Symbols carrying every text fragment as a token or token prefix.
    /// `None` when the query has no text terms.
    fn candidates(&self, query: &Query) -> Option<HashSet<SymbolId>> {
        let mut result: Option<HashSet<SymbolId>> = None;
        let fragments = query.terms().iter().flat_map(|term| match term {
            Term::Text { fragments, .. } => fragments.as_slice(),
            _ => &[][..],
        });
        for fragment in fragments {
            let ids: HashSet<SymbolId> = self
                .snapshot
                .tokens_with_prefix(fragment)
                .flat_map(|(_, postings)| postings.iter().map(|posting| posting.symbol))
                .collect();
            result = Some(match result {
                Some(current) => current.intersection(&ids).copied().collect(),
                None => ids,
            });
            if result.as_ref().is_some_and(HashSet::is_empty) {
                break;
            }
        }
        result
    }

    fn evaluate(&self, query: &Query, symbol: &'a StoredSymbol) -> Option<SearchHit<'a>> {
        let record = &symbol.record;
        let path = self.snapshot.display_path(&record.path);
        let tokens = tokenize(&record.name);
        let mut tier = MatchTier::Exact;

        for term in query.terms() {
            match term {
                Term::Text { fragments, .. } => {
                    for fragment in fragments {
                        tier = tier.max(token_tier(&tokens, fragment)?);
                    }
                }
                Term::Name(needle) => {
                    let lowered = record.name.to_lowercase();
                    if !lowered.contains(needle.as_str()) {
                        return None;
                    }
                    let name_tier = if lowered == *needle {
                        MatchTier::Exact
                    } else {
                        token_tier(&tokens, needle).unwrap_or(MatchTier::Substring)
                    };
                    tier = tier.max(name_tier);
                }
                Term::Kind(kind) => {
                    if record.kind != *kind {
                        return None;
                    }
                }
                Term::File { matcher, .. } => {
                    if !matcher.is_match(&path) {
                        return None;
                    }
                }
            }
        }

        let key = RankKey {
            tier,
            priority: record.kind.priority(),
            name_len: record.name.chars().count() as u32,
            path: path.clone(),
            offset: record.byte_offset,
            id: symbol.id,
        };
        Some(SearchHit {
            symbol,
            tier,
            path,
            key,
        })
    }
}

fn token_tier(tokens: &[String], fragment: &str) -> Option<MatchTier> {
    if tokens.iter().any(|token| token == fragment) {
        Some(MatchTier::Exact)
    } else if tokens.iter().any(|token| token.starts_with(fragment)) {
        Some(MatchTier::Prefix)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::symbols::{SymbolKind, SymbolRecord};
    use crate::query::parser::{parse_query, Term};
    use crate::store::files::tests::record;
    use crate::store::manifest::Manifest;
    use crate::store::symbols::tests::symbol;
    use std::collections::BTreeMap;

    fn snapshot(files: Vec<(&str, Vec<SymbolRecord>)>) -> Snapshot {
        let mut records = BTreeMap::new();
        let mut per_file = BTreeMap::new();
        for (path, symbols) in files {
            records.insert(path.to_string(), record(path, path));
            per_file.insert(path.to_string(), symbols);
        }
        Snapshot::build(Manifest::new("/repo", BTreeMap::new(), 0), records, &per_file)
    }

    fn billing() -> Snapshot {
        snapshot(vec![
            (
                "/repo/tax.go",
                vec![symbol("/repo/tax.go", 10, "CalculateTax", SymbolKind::Function)],
            ),
            (
                "/repo/invoice.go",
                vec![
                    symbol("/repo/invoice.go", 5, "Invoice", SymbolKind::Type),
                    symbol("/repo/invoice.go", 40, "CalculateTax", SymbolKind::Method),
                    symbol("/repo/invoice.go", 90, "taxRate", SymbolKind::Variable),
                ],
            ),
        ])
    }

    fn names(page: &Page<'_>) -> Vec<String> {
        page.hits
            .iter()
            .map(|hit| format!("{}:{}", hit.symbol.record.kind, hit.symbol.record.name))
            .collect()
    }

    fn search(snapshot: &Snapshot, input: &str) -> Vec<String> {
        let query = parse_query(input).expect("parse");
        names(&QueryEngine::new(snapshot).search(&query, 50, None))
    }

    #[test]
    fn exact_and_prefix_tokens_match() {
        let snapshot = billing();
        assert_eq!(
            search(&snapshot, "calculate"),
            vec!["function:CalculateTax", "method:CalculateTax"]
        );
        assert_eq!(
            search(&snapshot, "calc"),
            vec!["function:CalculateTax", "method:CalculateTax"]
        );
        assert!(search(&snapshot, "xyz").is_empty());
    }

    #[test]
    fn exact_token_outranks_prefix() {
        let snapshot = snapshot(vec![(
            "/repo/a.go",
            vec![
                symbol("/repo/a.go", 1, "Taxonomy", SymbolKind::Type),
                symbol("/repo/a.go", 50, "applyTax", SymbolKind::Function),
            ],
        )]);
        let query = parse_query("tax").expect("parse");
        let hits = QueryEngine::new(&snapshot).ranked(&query);
        assert_eq!(hits[0].symbol.record.name, "applyTax");
        assert_eq!(hits[0].tier, MatchTier::Exact);
        assert_eq!(hits[1].tier, MatchTier::Prefix);
    }

    #[test]
    fn kind_priority_then_length_break_ties() {
        let snapshot = billing();
        assert_eq!(
            search(&snapshot, "tax"),
            vec![
                "function:CalculateTax",
                "method:CalculateTax",
                "variable:taxRate"
            ]
        );
    }

    #[test]
    fn terms_are_anded_with_filters() {
        let snapshot = billing();
        assert_eq!(
            search(&snapshot, "kind:method calculate"),
            vec!["method:CalculateTax"]
        );
        assert_eq!(
            search(&snapshot, "calculate file:invoice.go"),
            vec!["method:CalculateTax"]
        );
        assert_eq!(search(&snapshot, "calculate tax"), search(&snapshot, "calculateTax"));
        assert!(search(&snapshot, "invoice calculate").is_empty());
    }

    #[test]
    fn name_substring_ranks_last() {
        let snapshot = billing();
        let query = parse_query("name:lculat").expect("parse");
        let hits = QueryEngine::new(&snapshot).ranked(&query);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.tier == MatchTier::Substring));

        let query = parse_query("name:invoice").expect("parse");
        let hits = QueryEngine::new(&snapshot).ranked(&query);
        assert_eq!(hits[0].tier, MatchTier::Exact);
    }

    #[test]
    fn filter_only_query_scans_all_symbols() {
        let snapshot = billing();
        assert_eq!(search(&snapshot, "kind:type"), vec!["type:Invoice"]);
    }

    #[test]
    fn pagination_is_stable_and_complete() {
        let snapshot = billing();
        let mut query = parse_query("tax").expect("parse");
        query.push(Term::Kind(SymbolKind::Method));
        let engine = QueryEngine::new(&snapshot);
        assert_eq!(engine.search(&query, 10, None).total, 1);

        let query = parse_query("name:a").expect("parse");
        let all = names(&engine.search(&query, 100, None));
        let mut paged = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let page = engine.search(&query, 1, cursor.as_ref());
            paged.extend(names(&page));
            match page.next_cursor {
                Some(next) => {
                    // Cursors survive a round trip through text.
                    cursor = Some(next.to_string().parse().expect("cursor"));
                }
                None => break,
            }
        }
        assert_eq!(paged, all);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn malformed_cursor_is_invalid_argument() {
        for raw in ["", "1.2.3", "9.0.0.0.00.", "0.0.0.0.zz.", "0.0.0.0.00.abc"] {
            assert!(
                matches!(raw.parse::<Cursor>(), Err(IndexError::InvalidArgument(_))),
                "{raw}"
            );
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query string parsing.
//!
//! ```text
//! query := term (WS term)*
//! term  := "name:" text | "kind:" kind | "file:" glob | text
//! ```
//!
//! A term whose part before the first `:` is a plain word is a filter term;
//! unknown filter names are rejected instead of being searched as text. Path
//! separators such as `std::fs` stay text.

use globset::{Glob, GlobMatcher};

use crate::errors::IndexError;
use crate::parser::symbols::SymbolKind;
use crate::parser::tokens::tokenize;

#[derive(Debug, Clone)]
pub enum Term {
    /// Bare text: every fragment must match a symbol token exactly or as a
    /// prefix.
    Text { raw: String, fragments: Vec<String> },
    /// Case-insensitive substring of the display name.
    Name(String),
    Kind(SymbolKind),
    /// Glob over the root-relative path.
    File { pattern: String, matcher: GlobMatcher },
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Term::Text { raw: a, .. }, Term::Text { raw: b, .. }) => a == b,
            (Term::Name(a), Term::Name(b)) => a == b,
            (Term::Kind(a), Term::Kind(b)) => a == b,
            (Term::File { pattern: a, .. }, Term::File { pattern: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// A parsed query; terms are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    terms: Vec<Term>,
}

impl Query {
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Add a term, e.g. from `--kind` or `--file`.
    pub fn push(&mut self, term: Term) {
        self.terms.push(term);
    }

    /// True when no term constrains names, so every symbol is a candidate.
    pub fn is_filter_only(&self) -> bool {
        !self
            .terms
            .iter()
            .any(|term| matches!(term, Term::Text { .. } | Term::Name(_)))
    }
}

/// Parse a whitespace-separated query string.
pub fn parse_query(input: &str) -> Result<Query, IndexError> {
    let terms = input
        .split_whitespace()
        .map(parse_term)
        .collect::<Result<Vec<_>, _>>()?;
    if terms.is_empty() {
        return Err(IndexError::query(input, "query is empty"));
    }
    Ok(Query { terms })
}

/// Parse one term.
pub fn parse_term(raw: &str) -> Result<Term, IndexError> {
    if let Some((prefix, value)) = raw.split_once(':') {
        let is_filter = !prefix.is_empty()
            && prefix.chars().all(|ch| ch.is_ascii_alphabetic())
            && !value.starts_with(':');
        if is_filter {
            if value.is_empty() {
                return Err(IndexError::query(raw, format!("'{prefix}:' needs a value")));
            }
            return match prefix.to_ascii_lowercase().as_str() {
                "name" => Ok(Term::Name(value.to_lowercase())),
                "kind" => kind_term(value),
                "file" => file_term(value),
                other => Err(IndexError::query(
                    raw,
                    format!("unknown filter '{other}:' (expected name:, kind: or file:)"),
                )),
            };
        }
    }
    text_term(raw)
}

pub fn kind_term(value: &str) -> Result<Term, IndexError> {
    value
        .parse::<SymbolKind>()
        .map(Term::Kind)
        .map_err(|reason| IndexError::query(format!("kind:{value}"), reason))
}

pub fn file_term(pattern: &str) -> Result<Term, IndexError> {
    let glob = Glob::new(pattern)
        .map_err(|err| IndexError::query(format!("file:{pattern}"), err.kind().to_string()))?;
    Ok(Term::File {
        pattern: pattern.to_string(),
        matcher: glob.compile_matcher(),
    })
}

fn text_term(raw: &str) -> Result<Term, IndexError> {
    let fragments = tokenize(raw);
    if fragments.is_empty() {
        return Err(IndexError::query(raw, "no letters or digits to search for"));
    }
    Ok(Term::Text {
        raw: raw.to_string(),
        fragments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_text_is_tokenized() {
        let query = parse_query("calculateTax").expect("parse");
        match &query.terms()[0] {
            Term::Text { fragments, .. } => assert_eq!(fragments, &["calculate", "tax"]),
            other => panic!("unexpected term {other:?}"),
        }
        assert!(!query.is_filter_only());
    }

    #[test]
    fn filters_parse() {
        let query = parse_query("kind:method name:Tax file:**/*.go").expect("parse");
        assert_eq!(query.terms().len(), 3);
        assert_eq!(query.terms()[0], Term::Kind(SymbolKind::Method));
        assert_eq!(query.terms()[1], Term::Name("tax".to_string()));
        match &query.terms()[2] {
            Term::File { matcher, .. } => assert!(matcher.is_match("billing/tax.go")),
            other => panic!("unexpected term {other:?}"),
        }
    }

    #[test]
    fn kind_only_query_is_filter_only() {
        assert!(parse_query("kind:type").expect("parse").is_filter_only());
    }

    #[test]
    fn malformed_terms_are_rejected() {
        for input in ["", "   ", "kind:", "kind:widget", "color:red", "file:a[", "---"] {
            let err = parse_query(input).expect_err(input);
            assert!(
                matches!(err, IndexError::QueryParse { .. }),
                "{input}: {err}"
            );
        }
    }

    #[test]
    fn non_word_prefix_is_text() {
        let query = parse_query("std::fs").expect("parse");
        match &query.terms()[0] {
            Term::Text { fragments, .. } => assert_eq!(fragments, &["std", "fs"]),
            other => panic!("unexpected term {other:?}"),
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tree-sitter helpers shared by the language extractors.

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::{Node, Parser, Tree};

use super::symbols::{Span, SymbolKind, SymbolRecord};
use super::ExtractContext;
use crate::errors::ExtractError;

const MAX_SIGNATURE_CHARS: usize = 240;

static COMMENT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(TODO|FIXME|XXX|HACK|BUG)\b").expect("comment tag regex"));

/// Parse `source` with `language`, honoring the context's time budget.
pub fn parse_tree(
    language: tree_sitter::Language,
    source: &[u8],
    ctx: &ExtractContext<'_>,
) -> Result<Tree, ExtractError> {
    ctx.check_now()?;
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|err| ExtractError::Parse(err.to_string()))?;
    parser.set_timeout_micros(ctx.remaining_micros());
    match parser.parse(source, None) {
        Some(tree) => Ok(tree),
        None => {
            ctx.check_now()?;
            Err(ExtractError::Parse("parser produced no tree".to_string()))
        }
    }
}

/// Push the children of `node` onto an explicit walk stack so they pop in
/// source order, each paired with `state`.
pub fn push_children<'t, S: Clone>(stack: &mut Vec<(Node<'t>, S)>, node: Node<'t>, state: S) {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
    stack.extend(children.into_iter().rev().map(|child| (child, state.clone())));
}

pub fn node_text<'s>(node: Node<'_>, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or("")
}

pub fn field_text<'s>(node: Node<'_>, field: &str, source: &'s [u8]) -> Option<&'s str> {
    let child = node.child_by_field_name(field)?;
    let text = node_text(child, source).trim();
    (!text.is_empty()).then_some(text)
}

pub fn span_of(node: Node<'_>) -> Span {
    let start = node.start_position();
    let end = node.end_position();
    Span {
        start_line: start.row as u32 + 1,
        start_col: start.column as u32 + 1,
        end_line: end.row as u32 + 1,
        end_col: end.column as u32 + 1,
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Declaration text up to (not including) the `body` field.
pub fn signature_before(node: Node<'_>, body_field: &str, source: &[u8]) -> String {
    let end = node
        .child_by_field_name(body_field)
        .map(|body| body.start_byte())
        .unwrap_or_else(|| node.end_byte());
    let raw = source
        .get(node.start_byte()..end)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default();
    let collapsed = collapse_whitespace(&raw);
    truncate_chars(
        collapsed.trim_end_matches(['{', ';', '=']).trim_end().to_string(),
        MAX_SIGNATURE_CHARS,
    )
}

pub fn summarize(text: &str) -> String {
    truncate_chars(collapse_whitespace(text), MAX_SIGNATURE_CHARS)
}

/// Strip `//`, `///`, `/* */` markers from one comment node's text.
pub fn comment_body(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed.strip_prefix("/*") {
        let inner = inner.strip_suffix("*/").unwrap_or(inner);
        return inner
            .lines()
            .map(|line| line.trim().trim_start_matches('*').trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
    }
    trimmed
        .trim_start_matches('/')
        .trim_start_matches('!')
        .trim()
        .to_string()
}

/// Contiguous comment lines directly above `node`.
///
/// Attributes between the comment block and the item are skipped.
/// `accept` decides which comment nodes count as documentation.
pub fn leading_doc(
    node: Node<'_>,
    source: &[u8],
    is_comment: impl Fn(Node<'_>) -> bool,
    accept: impl Fn(&str) -> bool,
) -> Option<String> {
    let mut lines = Vec::new();
    let mut expected_row = node.start_position().row;
    let mut current = node.prev_sibling();
    while let Some(prev) = current {
        if prev.kind() == "attribute_item" {
            expected_row = prev.start_position().row;
            current = prev.prev_sibling();
            continue;
        }
        if !is_comment(prev) || prev.end_position().row + 1 < expected_row {
            break;
        }
        let text = node_text(prev, source);
        if !accept(text) {
            break;
        }
        lines.push(comment_body(text));
        expected_row = prev.start_position().row;
        current = prev.prev_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    let doc = lines.join("\n").trim().to_string();
    (!doc.is_empty()).then_some(doc)
}

/// A `TODO`-style tag inside a comment node, as a comment-tag symbol.
pub fn comment_tag(node: Node<'_>, source: &[u8], path: &str) -> Option<SymbolRecord> {
    let raw = node_text(node, source);
    let body = comment_body(raw);
    let tag = COMMENT_TAG.find(&body)?.as_str().to_string();
    Some(SymbolRecord {
        path: path.to_string(),
        byte_offset: node.start_byte() as u64,
        kind: SymbolKind::CommentTag,
        qualified_name: tag.clone(),
        name: tag,
        container: None,
        signature: summarize(&body),
        doc: None,
        span: span_of(node),
        exported: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_body_strips_markers() {
        assert_eq!(comment_body("// hello"), "hello");
        assert_eq!(comment_body("/// docs here"), "docs here");
        assert_eq!(comment_body("//! crate docs"), "crate docs");
        assert_eq!(comment_body("/* one\n * two\n */"), "one\ntwo");
    }

    #[test]
    fn collapse_and_truncate() {
        assert_eq!(collapse_whitespace("func  A(\n\tx int)"), "func A( x int)");
        let long = "x".repeat(300);
        let out = truncate_chars(long, 10);
        assert_eq!(out.chars().count(), 11);
        assert!(out.ends_with('…'));
    }
}

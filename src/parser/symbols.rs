// SPDX-License-Identifier: MIT OR Apache-2.0

//! Symbol records produced by extractors and stored by the index.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Symbol kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolKind {
    Function,
    Method,
    Type,
    Field,
    Constant,
    Variable,
    CommentTag,
}

impl SymbolKind {
    pub const ALL: [SymbolKind; 7] = [
        SymbolKind::Type,
        SymbolKind::Function,
        SymbolKind::Method,
        SymbolKind::Field,
        SymbolKind::Variable,
        SymbolKind::Constant,
        SymbolKind::CommentTag,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Type => "type",
            SymbolKind::Field => "field",
            SymbolKind::Constant => "constant",
            SymbolKind::Variable => "variable",
            SymbolKind::CommentTag => "comment-tag",
        }
    }

    /// Ranking priority; lower sorts first.
    pub fn priority(self) -> u8 {
        match self {
            SymbolKind::Type => 0,
            SymbolKind::Function => 1,
            SymbolKind::Method => 2,
            SymbolKind::Field => 3,
            SymbolKind::Variable => 4,
            SymbolKind::Constant => 5,
            SymbolKind::CommentTag => 6,
        }
    }

    /// Stable on-disk tag.
    pub fn code(self) -> u8 {
        match self {
            SymbolKind::Function => 1,
            SymbolKind::Method => 2,
            SymbolKind::Type => 3,
            SymbolKind::Field => 4,
            SymbolKind::Constant => 5,
            SymbolKind::Variable => 6,
            SymbolKind::CommentTag => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => SymbolKind::Function,
            2 => SymbolKind::Method,
            3 => SymbolKind::Type,
            4 => SymbolKind::Field,
            5 => SymbolKind::Constant,
            6 => SymbolKind::Variable,
            7 => SymbolKind::CommentTag,
            _ => return None,
        })
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "function" | "func" | "fn" => Ok(SymbolKind::Function),
            "method" => Ok(SymbolKind::Method),
            "type" | "struct" | "interface" | "enum" | "trait" => Ok(SymbolKind::Type),
            "field" => Ok(SymbolKind::Field),
            "constant" | "const" => Ok(SymbolKind::Constant),
            "variable" | "var" | "static" => Ok(SymbolKind::Variable),
            "comment-tag" | "comment_tag" | "tag" | "todo" => Ok(SymbolKind::CommentTag),
            other => Err(format!(
                "unknown kind '{other}' (expected one of: {})",
                SymbolKind::ALL.map(SymbolKind::as_str).join(", ")
            )),
        }
    }
}

/// 64-bit symbol identifier derived from the symbol key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u64);

impl SymbolId {
    /// Deterministic id for the key (path, byte offset, name).
    pub fn derive(path: &str, byte_offset: u64, name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
        hasher.update(&byte_offset.to_le_bytes());
        hasher.update(&[0]);
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        Self(u64::from_le_bytes(head))
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// 1-based line/column span of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

/// Extracted symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    /// Owning file (normalized absolute path).
    pub path: String,
    pub byte_offset: u64,
    pub kind: SymbolKind,
    /// Display name, the source of search tokens.
    pub name: String,
    pub qualified_name: String,
    pub container: Option<String>,
    pub signature: String,
    pub doc: Option<String>,
    pub span: Span,
    pub exported: bool,
}

impl SymbolRecord {
    pub fn key(&self) -> (&str, u64, &str) {
        (&self.path, self.byte_offset, &self.name)
    }

    pub fn id(&self) -> SymbolId {
        SymbolId::derive(&self.path, self.byte_offset, &self.name)
    }
}

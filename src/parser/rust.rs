// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rust symbol extraction

use std::rc::Rc;
use tree_sitter::Node;

use super::symbols::{SymbolKind, SymbolRecord};
use super::syntax::{
    comment_tag, field_text, leading_doc, node_text, parse_tree, push_children, signature_before,
    span_of, summarize,
};
use super::{dedupe_symbols_in_place, ExtractContext, Extractor};
use crate::errors::ExtractError;

const RUST_EXTRACTOR_VERSION: u32 = 1;

pub struct RustExtractor;

impl Extractor for RustExtractor {
    fn id(&self) -> &'static str {
        "rust"
    }

    fn version(&self) -> u32 {
        RUST_EXTRACTOR_VERSION
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn extract(
        &self,
        path: &str,
        source: &[u8],
        ctx: &ExtractContext<'_>,
    ) -> Result<Vec<SymbolRecord>, ExtractError> {
        let tree = parse_tree(tree_sitter_rust::LANGUAGE.into(), source, ctx)?;
        let mut walker = RustWalker {
            path,
            source,
            ctx,
            symbols: Vec::new(),
        };
        walker.walk(tree.root_node())?;

        let mut symbols = walker.symbols;
        dedupe_symbols_in_place(&mut symbols);
        Ok(symbols)
    }
}

#[derive(Debug, Clone, Default)]
struct Scope {
    modules: Vec<String>,
    container: Option<String>,
    in_body: bool,
}

impl Scope {
    fn with_container(&self, container: Option<String>) -> Self {
        Self {
            modules: self.modules.clone(),
            container,
            in_body: self.in_body,
        }
    }

    fn body(&self) -> Self {
        Self {
            in_body: true,
            ..self.clone()
        }
    }
}

struct RustWalker<'a> {
    path: &'a str,
    source: &'a [u8],
    ctx: &'a ExtractContext<'a>,
    symbols: Vec<SymbolRecord>,
}

impl RustWalker<'_> {
    /// Walk with an explicit stack; tree depth never grows the call stack.
    fn walk<'t>(&mut self, root: Node<'t>) -> Result<(), ExtractError> {
        let mut stack = vec![(root, Rc::new(Scope::default()))];
        while let Some((node, scope)) = stack.pop() {
            self.ctx.checkpoint()?;
            if let Some(inner) = self.visit(node, &scope) {
                push_children(&mut stack, node, inner);
            }
        }
        Ok(())
    }

    /// Record `node`; returns the scope its children are walked in, or `None`
    /// to skip them.
    fn visit(&mut self, node: Node<'_>, scope: &Rc<Scope>) -> Option<Rc<Scope>> {
        let kind = node.kind();
        if matches!(kind, "line_comment" | "block_comment") {
            if let Some(tag) = comment_tag(node, self.source, self.path) {
                self.symbols.push(tag);
            }
            return None;
        }
        if scope.in_body {
            return Some(Rc::clone(scope));
        }

        match kind {
            "function_item" | "function_signature_item" => {
                let symbol_kind = if scope.container.is_some() {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                if let Some(name) = field_text(node, "name", self.source) {
                    let signature = signature_before(node, "body", self.source);
                    self.push(node, symbol_kind, name.to_string(), scope, signature);
                }
                Some(Rc::new(scope.body()))
            }
            "impl_item" => {
                let target = field_text(node, "type", self.source).map(base_type_name);
                Some(Rc::new(scope.with_container(target)))
            }
            "trait_item" => {
                let name = field_text(node, "name", self.source)?.to_string();
                let signature = signature_before(node, "body", self.source);
                self.push(node, SymbolKind::Type, name.clone(), scope, signature);
                Some(Rc::new(scope.with_container(Some(name))))
            }
            "struct_item" | "union_item" => {
                let name = field_text(node, "name", self.source)?.to_string();
                let signature = signature_before(node, "body", self.source);
                self.push(node, SymbolKind::Type, name.clone(), scope, signature);
                if let Some(body) = node.child_by_field_name("body") {
                    self.push_fields(body, &scope.with_container(Some(name)));
                }
                Some(Rc::new(scope.body()))
            }
            "enum_item" | "type_item" => {
                if let Some(name) = field_text(node, "name", self.source) {
                    let signature = signature_before(node, "body", self.source);
                    self.push(node, SymbolKind::Type, name.to_string(), scope, signature);
                }
                Some(Rc::new(scope.body()))
            }
            "const_item" | "static_item" => {
                let symbol_kind = if kind == "const_item" {
                    SymbolKind::Constant
                } else {
                    SymbolKind::Variable
                };
                if let Some(name) = field_text(node, "name", self.source) {
                    let signature = signature_before(node, "value", self.source);
                    self.push(node, symbol_kind, name.to_string(), scope, signature);
                }
                None
            }
            "mod_item" => match field_text(node, "name", self.source) {
                Some(name) => {
                    let mut inner = scope.with_container(None);
                    inner.modules.push(name.to_string());
                    Some(Rc::new(inner))
                }
                None => Some(Rc::clone(scope)),
            },
            _ => Some(Rc::clone(scope)),
        }
    }

    fn push_fields(&mut self, body: Node<'_>, scope: &Scope) {
        if body.kind() != "field_declaration_list" {
            return;
        }
        let mut cursor = body.walk();
        let fields: Vec<Node<'_>> = body
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "field_declaration")
            .collect();
        for field in fields {
            if let Some(name) = field_text(field, "name", self.source) {
                let signature = summarize(node_text(field, self.source));
                self.push(field, SymbolKind::Field, name.to_string(), scope, signature);
            }
        }
    }

    fn push(
        &mut self,
        node: Node<'_>,
        kind: SymbolKind,
        name: String,
        scope: &Scope,
        signature: String,
    ) {
        let mut qualified: Vec<&str> = scope.modules.iter().map(String::as_str).collect();
        if let Some(container) = &scope.container {
            qualified.push(container.as_str());
        }
        qualified.push(name.as_str());
        let qualified_name = qualified.join("::");
        let doc = leading_doc(
            node,
            self.source,
            |n| n.kind() == "line_comment",
            is_outer_doc_comment,
        );

        self.symbols.push(SymbolRecord {
            path: self.path.to_string(),
            byte_offset: node.start_byte() as u64,
            kind,
            exported: has_visibility(node),
            qualified_name,
            name,
            container: scope.container.clone(),
            signature,
            doc,
            span: span_of(node),
        });
    }
}

fn is_outer_doc_comment(text: &str) -> bool {
    let text = text.trim_start();
    text.starts_with("///") && !text.starts_with("////")
}

fn has_visibility(node: Node<'_>) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| child.kind() == "visibility_modifier");
    found
}

/// `&'a mut Foo<T>` -> `Foo`
fn base_type_name(raw: &str) -> String {
    let stripped = raw
        .trim_start_matches('&')
        .trim_start()
        .trim_start_matches("mut ")
        .trim();
    let stripped = if stripped.starts_with('\'') {
        stripped
            .split_once(' ')
            .map(|(_, rest)| rest.trim_start_matches("mut ").trim())
            .unwrap_or(stripped)
    } else {
        stripped
    };
    let head = stripped.split('<').next().unwrap_or(stripped);
    head.rsplit("::").next().unwrap_or(head).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::parser::DEFAULT_EXTRACT_TIMEOUT;

    fn extract(source: &str) -> Vec<SymbolRecord> {
        let cancel = CancelToken::new();
        let ctx = ExtractContext::new(&cancel, DEFAULT_EXTRACT_TIMEOUT);
        RustExtractor
            .extract("/repo/src/lib.rs", source.as_bytes(), &ctx)
            .expect("extract")
    }

    fn find<'a>(symbols: &'a [SymbolRecord], name: &str, kind: SymbolKind) -> &'a SymbolRecord {
        symbols
            .iter()
            .find(|s| s.name == name && s.kind == kind)
            .unwrap_or_else(|| panic!("missing {kind} {name}: {symbols:#?}"))
    }

    const LIB: &str = r#"
/// A bill.
#[derive(Debug)]
pub struct Invoice {
    pub amount: f64,
    notes: Vec<String>,
}

impl Invoice {
    /// Tax owed on the invoice.
    pub fn calculate_tax(&self) -> f64 {
        // FIXME: rounding
        let local = 1.0;
        self.amount * local
    }
}

fn helper() {}

pub const RATE: f64 = 0.2;
static COUNTER: u32 = 0;

pub mod billing {
    pub trait Ledger {
        fn post(&mut self, amount: f64);
    }
}
"#;

    #[test]
    fn test_extract_rust_function() {
        let symbols = extract(LIB);
        let helper = find(&symbols, "helper", SymbolKind::Function);
        assert!(!helper.exported);
        assert_eq!(helper.signature, "fn helper()");
    }

    #[test]
    fn test_extract_rust_struct_and_fields() {
        let symbols = extract(LIB);
        let invoice = find(&symbols, "Invoice", SymbolKind::Type);
        assert!(invoice.exported);
        assert_eq!(invoice.doc.as_deref(), Some("A bill."));
        let amount = find(&symbols, "amount", SymbolKind::Field);
        assert!(amount.exported);
        assert_eq!(amount.container.as_deref(), Some("Invoice"));
        assert!(!find(&symbols, "notes", SymbolKind::Field).exported);
    }

    #[test]
    fn test_extract_rust_impl_method() {
        let symbols = extract(LIB);
        let method = find(&symbols, "calculate_tax", SymbolKind::Method);
        assert_eq!(method.container.as_deref(), Some("Invoice"));
        assert_eq!(method.qualified_name, "Invoice::calculate_tax");
        assert_eq!(method.doc.as_deref(), Some("Tax owed on the invoice."));
        assert_eq!(method.signature, "pub fn calculate_tax(&self) -> f64");
        assert!(!symbols.iter().any(|s| s.name == "local"));
    }

    #[test]
    fn test_extract_rust_items_and_modules() {
        let symbols = extract(LIB);
        assert!(find(&symbols, "RATE", SymbolKind::Constant).exported);
        assert!(!find(&symbols, "COUNTER", SymbolKind::Variable).exported);
        let ledger = find(&symbols, "Ledger", SymbolKind::Type);
        assert_eq!(ledger.qualified_name, "billing::Ledger");
        let post = find(&symbols, "post", SymbolKind::Method);
        assert_eq!(post.container.as_deref(), Some("Ledger"));
        assert_eq!(post.qualified_name, "billing::Ledger::post");
    }

    #[test]
    fn test_extract_rust_comment_tag() {
        let symbols = extract(LIB);
        let tag = find(&symbols, "FIXME", SymbolKind::CommentTag);
        assert_eq!(tag.signature, "FIXME: rounding");
    }

    #[test]
    fn deeply_nested_expression_does_not_exhaust_the_stack() {
        let depth = 20_000;
        let source = format!(
            "pub fn deep() -> i32 {{\n    {}1{}\n}}\n",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || extract(&source))
            .expect("spawn");
        let symbols = handle.join().expect("extraction thread");
        find(&symbols, "deep", SymbolKind::Function);
    }

    #[test]
    fn base_type_name_strips_references_and_generics() {
        assert_eq!(base_type_name("Invoice"), "Invoice");
        assert_eq!(base_type_name("Store<T>"), "Store");
        assert_eq!(base_type_name("crate::billing::Ledger"), "Ledger");
        assert_eq!(base_type_name("&'a mut Buffer<'a>"), "Buffer");
    }
}

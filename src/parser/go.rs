// SPDX-License-Identifier: MIT OR Apache-2.0

//! Go symbol extraction

use tree_sitter::Node;

use super::symbols::{SymbolKind, SymbolRecord};
use super::syntax::{
    comment_tag, field_text, leading_doc, node_text, parse_tree, push_children, signature_before,
    span_of, summarize,
};
use super::{dedupe_symbols_in_place, ExtractContext, Extractor};
use crate::errors::ExtractError;

const GO_EXTRACTOR_VERSION: u32 = 1;

pub struct GoExtractor;

impl Extractor for GoExtractor {
    fn id(&self) -> &'static str {
        "go"
    }

    fn version(&self) -> u32 {
        GO_EXTRACTOR_VERSION
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn extract(
        &self,
        path: &str,
        source: &[u8],
        ctx: &ExtractContext<'_>,
    ) -> Result<Vec<SymbolRecord>, ExtractError> {
        let tree = parse_tree(tree_sitter_go::LANGUAGE.into(), source, ctx)?;
        let root = tree.root_node();
        let mut walker = GoWalker {
            path,
            source,
            ctx,
            package: package_name(root, source),
            symbols: Vec::new(),
        };
        walker.walk(root)?;

        let mut symbols = walker.symbols;
        dedupe_symbols_in_place(&mut symbols);
        Ok(symbols)
    }
}

struct GoWalker<'a> {
    path: &'a str,
    source: &'a [u8],
    ctx: &'a ExtractContext<'a>,
    package: Option<String>,
    symbols: Vec<SymbolRecord>,
}

impl GoWalker<'_> {
    /// Declarations inside function bodies are locals and skipped; comments
    /// are scanned everywhere. The walk keeps an explicit stack; tree depth
    /// never grows the call stack.
    fn walk<'t>(&mut self, root: Node<'t>) -> Result<(), ExtractError> {
        let mut stack = vec![(root, false)];
        while let Some((node, in_body)) = stack.pop() {
            self.ctx.checkpoint()?;
            if let Some(children_in_body) = self.visit(node, in_body) {
                push_children(&mut stack, node, children_in_body);
            }
        }
        Ok(())
    }

    /// Record `node`; returns how its children are walked, or `None` to skip
    /// them.
    fn visit(&mut self, node: Node<'_>, in_body: bool) -> Option<bool> {
        match node.kind() {
            "comment" => {
                if let Some(tag) = comment_tag(node, self.source, self.path) {
                    self.symbols.push(tag);
                }
                None
            }
            "function_declaration" if !in_body => {
                self.push_callable(node, SymbolKind::Function, None);
                Some(true)
            }
            "method_declaration" if !in_body => {
                let receiver = node
                    .child_by_field_name("receiver")
                    .and_then(|receiver| receiver_type_name(receiver, self.source));
                self.push_callable(node, SymbolKind::Method, receiver);
                Some(true)
            }
            "type_spec" | "type_alias" if !in_body => {
                self.push_type(node);
                Some(in_body)
            }
            "const_spec" if !in_body => {
                self.push_values(node, SymbolKind::Constant);
                Some(in_body)
            }
            "var_spec" if !in_body => {
                self.push_values(node, SymbolKind::Variable);
                Some(in_body)
            }
            _ => Some(in_body),
        }
    }

    fn push_callable(&mut self, node: Node<'_>, kind: SymbolKind, container: Option<String>) {
        let Some(name) = field_text(node, "name", self.source) else {
            return;
        };
        let signature = signature_before(node, "body", self.source);
        let doc = self.doc_for(node);
        self.push(node, kind, name.to_string(), container, signature, doc);
    }

    fn push_type(&mut self, node: Node<'_>) {
        let Some(name) = field_text(node, "name", self.source) else {
            return;
        };
        let name = name.to_string();
        let type_node = node.child_by_field_name("type");
        let shape = match type_node.map(|t| t.kind()) {
            Some("struct_type") => "struct".to_string(),
            Some("interface_type") => "interface".to_string(),
            _ => type_node
                .map(|t| summarize(node_text(t, self.source)))
                .unwrap_or_default(),
        };
        let signature = if node.kind() == "type_alias" {
            format!("type {name} = {shape}")
        } else {
            format!("type {name} {shape}")
        };
        let doc = self.doc_for(node);
        self.push(node, SymbolKind::Type, name.clone(), None, signature, doc);

        let Some(type_node) = type_node else {
            return;
        };
        match type_node.kind() {
            "struct_type" => self.push_struct_fields(type_node, &name),
            "interface_type" => self.push_interface_methods(type_node, &name),
            _ => {}
        }
    }

    fn push_struct_fields(&mut self, struct_node: Node<'_>, owner: &str) {
        let mut cursor = struct_node.walk();
        let lists: Vec<Node<'_>> = struct_node
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "field_declaration_list")
            .collect();
        for list in lists {
            let mut list_cursor = list.walk();
            let fields: Vec<Node<'_>> = list
                .named_children(&mut list_cursor)
                .filter(|child| child.kind() == "field_declaration")
                .collect();
            for field in fields {
                let type_text = field
                    .child_by_field_name("type")
                    .map(|t| summarize(node_text(t, self.source)))
                    .unwrap_or_default();
                let doc = self.doc_for(field);
                let mut name_cursor = field.walk();
                let names: Vec<String> = field
                    .children_by_field_name("name", &mut name_cursor)
                    .map(|n| node_text(n, self.source).trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect();
                for name in names {
                    let signature = format!("{name} {type_text}").trim().to_string();
                    self.push(
                        field,
                        SymbolKind::Field,
                        name,
                        Some(owner.to_string()),
                        signature,
                        doc.clone(),
                    );
                }
            }
        }
    }

    fn push_interface_methods(&mut self, iface: Node<'_>, owner: &str) {
        let mut cursor = iface.walk();
        let methods: Vec<Node<'_>> = iface
            .named_children(&mut cursor)
            .filter(|child| matches!(child.kind(), "method_elem" | "method_spec"))
            .collect();
        for method in methods {
            let Some(name) = field_text(method, "name", self.source) else {
                continue;
            };
            let signature = summarize(node_text(method, self.source));
            let doc = self.doc_for(method);
            self.push(
                method,
                SymbolKind::Method,
                name.to_string(),
                Some(owner.to_string()),
                signature,
                doc,
            );
        }
    }

    fn push_values(&mut self, node: Node<'_>, kind: SymbolKind) {
        let signature = summarize(node_text(node, self.source));
        let doc = self.doc_for(node);
        let mut cursor = node.walk();
        let names: Vec<String> = node
            .children_by_field_name("name", &mut cursor)
            .map(|n| node_text(n, self.source).trim().to_string())
            .filter(|n| !n.is_empty() && n != "_")
            .collect();
        for name in names {
            self.push(node, kind, name, None, signature.clone(), doc.clone());
        }
    }

    fn doc_for(&self, node: Node<'_>) -> Option<String> {
        let is_comment = |n: Node<'_>| n.kind() == "comment";
        let accept = |text: &str| text.trim_start().starts_with("//");
        leading_doc(node, self.source, is_comment, accept).or_else(|| {
            // `type X struct{}` documents the enclosing declaration.
            let parent = node.parent()?;
            let single_spec = parent.named_child_count() == 1;
            if single_spec
                && matches!(
                    parent.kind(),
                    "type_declaration" | "const_declaration" | "var_declaration"
                )
            {
                leading_doc(parent, self.source, is_comment, accept)
            } else {
                None
            }
        })
    }

    fn push(
        &mut self,
        node: Node<'_>,
        kind: SymbolKind,
        name: String,
        container: Option<String>,
        signature: String,
        doc: Option<String>,
    ) {
        let mut qualified = Vec::new();
        if let Some(package) = &self.package {
            qualified.push(package.as_str());
        }
        if let Some(container) = &container {
            qualified.push(container.as_str());
        }
        qualified.push(name.as_str());
        let qualified_name = qualified.join(".");

        self.symbols.push(SymbolRecord {
            path: self.path.to_string(),
            byte_offset: node.start_byte() as u64,
            kind,
            exported: is_exported(&name),
            qualified_name,
            name,
            container,
            signature,
            doc,
            span: span_of(node),
        });
    }
}

fn package_name(root: Node<'_>, source: &[u8]) -> Option<String> {
    let mut cursor = root.walk();
    let clause = root
        .named_children(&mut cursor)
        .find(|child| child.kind() == "package_clause")?;
    let mut clause_cursor = clause.walk();
    let ident = clause
        .named_children(&mut clause_cursor)
        .find(|child| child.kind() == "package_identifier")?;
    let name = node_text(ident, source).trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// `(i *Invoice[T])` -> `Invoice`
fn receiver_type_name(receiver: Node<'_>, source: &[u8]) -> Option<String> {
    let mut cursor = receiver.walk();
    let param = receiver
        .named_children(&mut cursor)
        .find(|child| child.kind() == "parameter_declaration")?;
    let type_text = field_text(param, "type", source)?;
    let name = type_text
        .trim_start_matches('*')
        .split('[')
        .next()
        .unwrap_or_default()
        .trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Go exports identifiers that start with an uppercase letter.
fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

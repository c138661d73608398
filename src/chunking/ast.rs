//! Declaration-level chunking using tree-sitter.
//!
//! Walks the syntax tree and emits:
//! 1. FUNCTION chunks for named top-level function declarations
//! 2. CLASS chunks for named class declarations (Rust: struct / enum / trait),
//!    including JS/TS classes declared inside functions or blocks
//! 3. METHOD chunks named `<class>.<method>` for methods of those classes
//!    (Rust: functions inside `impl` blocks)
//!
//! Each chunk covers the exact byte span of its declaration. tree-sitter
//! recovers from syntax errors, so a malformed file still yields whatever
//! declarations survive. The caller falls back to line-based chunking when:
//! - Language is not supported
//! - Parse produces >30% error nodes
//! - No named declaration was found

use tree_sitter::Node;

use super::Language;
use crate::models::{Chunk, ChunkKind};

/// If more than this fraction of AST nodes are error nodes, fall back.
const ERROR_THRESHOLD: f64 = 0.30;

/// Chunk source code into declarations.
/// Returns None if the language is unsupported or the fallback should run.
pub fn chunk_with_ast(location: &str, content: &str, language: Language) -> Option<Vec<Chunk>> {
    let ts_language = language.tree_sitter_language()?;
    let mut parser = tree_sitter::Parser::new();
    parser.set_language(&ts_language).ok()?;

    let tree = parser.parse(content, None)?;
    let root = tree.root_node();

    // Check error rate
    let (total, errors) = count_nodes(root);
    if total > 0 && (errors as f64 / total as f64) > ERROR_THRESHOLD {
        tracing::warn!(
            "AST error rate {:.0}% in {location} exceeds threshold, falling back to line-based chunking",
            (errors as f64 / total as f64) * 100.0
        );
        return None;
    }

    let mut acc = Accumulator::new(location, content);
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match language {
            Language::Rust => visit_rust_item(child, &mut acc),
            _ => visit_js_statement(child, &mut acc),
        }
    }

    if acc.chunks.is_empty() {
        return None;
    }

    Some(acc.chunks)
}

/// Chunks collected so far plus the source they are cut from.
///
/// Enclosing-class context is passed down explicitly as an argument, so
/// nothing here outlives a single walk.
struct Accumulator<'a> {
    location: &'a str,
    source: &'a str,
    chunks: Vec<Chunk>,
}

impl<'a> Accumulator<'a> {
    fn new(location: &'a str, source: &'a str) -> Self {
        Self {
            location,
            source,
            chunks: Vec::new(),
        }
    }

    fn text(&self, node: Node) -> &'a str {
        &self.source[node.byte_range()]
    }

    fn push(&mut self, kind: ChunkKind, name: String, node: Node) {
        let ordinal = self.chunks.len();
        self.chunks.push(Chunk {
            kind,
            name,
            content: self.text(node).to_string(),
            location: self.location.to_string(),
            ordinal,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
        });
    }
}

// ── JavaScript / TypeScript ─────────────────────────────

fn visit_js_statement(node: Node, acc: &mut Accumulator) {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            if let Some(name) = field_text(node, "name", acc) {
                acc.push(ChunkKind::Function, name, node);
            }
            visit_nested_classes(node, acc);
        }
        // `class` is the expression form that `export default class X` may parse to.
        "class_declaration" | "abstract_class_declaration" | "class" => visit_js_class(node, acc),
        "export_statement" => {
            // `export function f` / `export default class C`: chunk the
            // declaration itself, without the export keyword.
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                visit_js_statement(child, acc);
            }
        }
        _ => visit_nested_classes(node, acc),
    }
}

/// Class declarations below the top level: in function bodies, blocks,
/// arrow functions and so on. Nested functions are not chunked, and a
/// class found here is not searched again for inner classes.
fn visit_nested_classes(node: Node, acc: &mut Accumulator) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "class_declaration" | "abstract_class_declaration" => visit_js_class(child, acc),
            _ => visit_nested_classes(child, acc),
        }
    }
}

fn visit_js_class(node: Node, acc: &mut Accumulator) {
    let Some(class_name) = field_text(node, "name", acc) else {
        return;
    };
    acc.push(ChunkKind::Class, class_name.clone(), node);

    let Some(body) = node.child_by_field_name("body") else {
        return;
    };
    let mut cursor = body.walk();
    for member in body.named_children(&mut cursor) {
        if member.kind() != "method_definition" {
            continue;
        }
        // Computed, string and #private keys have no plain identifier name.
        let Some(key) = member.child_by_field_name("name") else {
            continue;
        };
        if key.kind() != "property_identifier" {
            continue;
        }
        let method = acc.text(key);
        acc.push(ChunkKind::Method, format!("{class_name}.{method}"), member);
    }
}

// ── Rust ────────────────────────────────────────────────

fn visit_rust_item(node: Node, acc: &mut Accumulator) {
    match node.kind() {
        "function_item" => {
            if let Some(name) = field_text(node, "name", acc) {
                acc.push(ChunkKind::Function, name, node);
            }
        }
        "struct_item" | "enum_item" | "trait_item" | "union_item" => {
            if let Some(name) = field_text(node, "name", acc) {
                acc.push(ChunkKind::Class, name, node);
            }
        }
        "impl_item" => visit_rust_impl(node, acc),
        _ => {}
    }
}

fn visit_rust_impl(node: Node, acc: &mut Accumulator) {
    let Some(type_node) = node.child_by_field_name("type") else {
        return;
    };
    // `impl<T> Foo<T>` names its methods `Foo.method`.
    let type_name = match type_node.kind() {
        "generic_type" => type_node
            .child_by_field_name("type")
            .map(|t| acc.text(t))
            .unwrap_or_else(|| acc.text(type_node)),
        _ => acc.text(type_node),
    };

    let Some(body) = node.child_by_field_name("body") else {
        return;
    };
    let mut cursor = body.walk();
    for item in body.named_children(&mut cursor) {
        if item.kind() != "function_item" {
            continue;
        }
        if let Some(method) = field_text(item, "name", acc) {
            acc.push(ChunkKind::Method, format!("{type_name}.{method}"), item);
        }
    }
}

fn field_text(node: Node, field: &str, acc: &Accumulator) -> Option<String> {
    let child = node.child_by_field_name(field)?;
    let text = acc.text(child).trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Count total nodes and error nodes in a tree.
fn count_nodes(node: Node) -> (usize, usize) {
    let mut total = 1usize;
    let mut errors = if node.is_error() { 1usize } else { 0 };

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        let (t, e) = count_nodes(child);
        total += t;
        errors += e;
    }

    (total, errors)
}

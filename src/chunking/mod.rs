//! Code chunking module: declaration-level AST chunks for supported languages,
//! line-based fallback for the rest.

pub mod ast;
pub mod fallback;

use std::path::Path;

use crate::models::Chunk;

/// Content longer than this (in characters) is not chunked at all.
pub const MAX_CONTENT_CHARS: usize = 1_000_000;

/// How many leading bytes are inspected for a NUL when sniffing binaries.
const BINARY_SNIFF_BYTES: usize = 24;

/// Languages with tree-sitter AST support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Tsx,
    Unknown,
}

impl Language {
    /// Map a file extension / language name string to a Language variant.
    pub fn from_str(lang: &str) -> Self {
        match lang.to_lowercase().as_str() {
            "rust" | "rs" => Language::Rust,
            "javascript" | "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "typescript" | "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            _ => Language::Unknown,
        }
    }

    /// Pick the language from a file path's extension.
    pub fn from_path(path: &str) -> Self {
        Path::new(path)
            .extension()
            .map(|ext| Self::from_str(&ext.to_string_lossy()))
            .unwrap_or(Language::Unknown)
    }

    /// Return the tree-sitter Language for this variant, or None if unsupported.
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Language::Unknown => None,
        }
    }
}

/// True when a NUL shows up in the first 24 bytes.
pub fn is_binary(content: &str) -> bool {
    content
        .as_bytes()
        .iter()
        .take(BINARY_SNIFF_BYTES)
        .any(|&b| b == 0)
}

fn is_oversized(content: &str) -> bool {
    content.len() > MAX_CONTENT_CHARS && content.chars().count() > MAX_CONTENT_CHARS
}

/// Chunk one file.
///
/// Binary and oversized content yields no chunks. Supported languages get
/// FUNCTION / CLASS / METHOD chunks; anything that cannot be parsed (or
/// parses to no named declarations) goes through the line-based fallback.
pub fn chunk_file(file_path: &str, content: &str) -> Vec<Chunk> {
    if is_binary(content) || is_oversized(content) {
        tracing::debug!("Skipping {file_path}: binary or oversized content");
        return Vec::new();
    }
    if content.trim().is_empty() {
        return Vec::new();
    }

    let language = Language::from_path(file_path);

    if let Some(chunks) = ast::chunk_with_ast(file_path, content, language) {
        return chunks;
    }

    fallback::chunk_fallback(file_path, content)
}

//! Line-based fallback chunker for files without AST support.
//!
//! Whole lines accumulate into a block until the next line would push it
//! past the character budget; the block is then flushed and the line starts
//! a new one. Lines are never split, so a single line longer than the budget
//! becomes its own chunk.

use std::path::Path;

use crate::models::{Chunk, ChunkKind};

/// Maximum characters per chunk (newlines between lines included).
pub const CHAR_BUDGET: usize = 1000;

/// Chunk content into FILE_BLOCK chunks named `<basename>-chunk-<n>`.
pub fn chunk_fallback(location: &str, content: &str) -> Vec<Chunk> {
    let basename = Path::new(location)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| location.to_string());

    let mut builder = Builder {
        location,
        basename: &basename,
        content,
        chunks: Vec::new(),
    };

    // Byte span and char count of the block being accumulated.
    let mut block: Option<(usize, usize, usize)> = None;
    let mut offset = 0usize;

    for line in content.split('\n') {
        let line_start = offset;
        let line_end = line_start + line.len();
        offset = line_end + 1;
        let line_chars = line.chars().count();

        block = match block {
            None => Some((line_start, line_end, line_chars)),
            Some((start, end, chars)) => {
                let projected = chars + 1 + line_chars;
                if projected > CHAR_BUDGET {
                    builder.flush(start, end);
                    Some((line_start, line_end, line_chars))
                } else {
                    Some((start, line_end, projected))
                }
            }
        };
    }

    if let Some((start, end, _)) = block {
        builder.flush(start, end);
    }

    builder.chunks
}

struct Builder<'a> {
    location: &'a str,
    basename: &'a str,
    content: &'a str,
    chunks: Vec<Chunk>,
}

impl Builder<'_> {
    /// Emit the trimmed block `content[start..end]`, skipping blank blocks.
    fn flush(&mut self, start: usize, end: usize) {
        let block = &self.content[start..end];
        let trimmed = block.trim();
        if trimmed.is_empty() {
            return;
        }

        let start_byte = start + (block.len() - block.trim_start().len());
        let end_byte = start_byte + trimmed.len();
        let ordinal = self.chunks.len();

        self.chunks.push(Chunk {
            kind: ChunkKind::FileBlock,
            name: format!("{}-chunk-{}", self.basename, ordinal + 1),
            content: trimmed.to_string(),
            location: self.location.to_string(),
            ordinal,
            start_byte,
            end_byte,
            start_line: line_number(self.content, start_byte),
            end_line: line_number(self.content, end_byte),
        });
    }
}

fn line_number(content: &str, byte: usize) -> usize {
    content[..byte].bytes().filter(|&b| b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_file(lines: usize, width: usize) -> String {
        (0..lines)
            .map(|i| {
                let prefix = format!("line {i:03} ");
                format!("{prefix}{}", "x".repeat(width - prefix.len()))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_fallback_empty() {
        assert!(chunk_fallback("a.txt", "").is_empty());
        assert!(chunk_fallback("a.txt", "   \n\n  ").is_empty());
    }

    #[test]
    fn test_fallback_small_file() {
        let content = "line 1\nline 2\nline 3";
        let chunks = chunk_fallback("docs/notes.txt", content);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].name, "notes.txt-chunk-1");
        assert_eq!(chunks[0].location, "docs/notes.txt");
        assert_eq!(chunks[0].content, content);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn test_2500_chars_in_50_char_lines_yields_three_chunks() {
        let content = text_file(50, 50);
        assert!(content.len() >= 2_500);

        let chunks = chunk_fallback("plain.txt", &content);
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.content.chars().count() <= CHAR_BUDGET);
            assert_eq!(chunk.name, format!("plain.txt-chunk-{}", i + 1));
            assert_eq!(chunk.ordinal, i);
        }
    }

    #[test]
    fn test_rejoined_chunks_reproduce_trimmed_lines() {
        let content = text_file(120, 37);
        let chunks = chunk_fallback("f.txt", &content);
        assert!(chunks.len() > 1);

        let rejoined = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(rejoined, content);
    }

    #[test]
    fn test_long_single_line_is_its_own_chunk() {
        let long = "y".repeat(1_500);
        let content = format!("short\n{long}\ntail");
        let chunks = chunk_fallback("x.txt", &content);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "short");
        assert_eq!(chunks[1].content, long);
        assert_eq!(chunks[2].content, "tail");
    }

    #[test]
    fn test_byte_and_line_spans() {
        let content = "\n\nfirst\nsecond\n";
        let chunks = chunk_fallback("s.txt", content);
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(&content[chunk.start_byte..chunk.end_byte], "first\nsecond");
        assert_eq!(chunk.start_line, 3);
        assert_eq!(chunk.end_line, 4);
    }

    #[test]
    fn test_multibyte_lines_count_chars() {
        // 400 two-byte chars per line: two lines fit in 1000 chars, not bytes.
        let line = "é".repeat(400);
        let content = format!("{line}\n{line}\n{line}");
        let chunks = chunk_fallback("u.txt", &content);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content.chars().count(), 801);
    }
}

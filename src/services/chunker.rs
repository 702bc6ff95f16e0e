//! Splits dump content into bounded, lossless chunks.

use crate::models::{Chunk, ChunkingConfig};

/// Line that opens a type block in an IL2CPP dump.
const TYPE_BLOCK_MARKER: &str = "\n// Namespace:";

/// Splits content into consecutive chunks whose concatenation is the input.
#[derive(Debug, Clone)]
pub struct ContentChunker {
    /// Target chunk size in bytes
    chunk_size: usize,
}

impl ContentChunker {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `content` into chunks of at most `chunk_size` bytes, except where a
    /// single character is wider than `chunk_size`.
    pub fn split(&self, content: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let total = content.len();
        let mut start = 0;

        while start < total {
            let end = self.find_break_point(content, start);
            chunks.push(Chunk::new(
                chunks.len(),
                start,
                content[start..end].to_string(),
            ));
            start = end;
        }

        chunks
    }

    /// Pick the end of the chunk starting at `start`, preferring a structural
    /// boundary within the last 20% of the target window.
    fn find_break_point(&self, content: &str, start: usize) -> usize {
        let total = content.len();
        let target_end = start.saturating_add(self.chunk_size);
        if target_end >= total {
            return total;
        }

        let target_end = floor_char_boundary(content, target_end);
        if target_end <= start {
            return ceil_char_boundary(content, start + 1);
        }

        let search_start = ceil_char_boundary(
            content,
            target_end.saturating_sub(self.chunk_size / 5).max(start + 1),
        );
        let window = &content[search_start..target_end];

        // Priority: type block > blank line > newline > statement end > space
        let type_block = window.rfind(TYPE_BLOCK_MARKER).map(|i| i + 1);
        let blank_line = window.rfind("\n\n").map(|i| i + 2);
        let newline = window.rfind('\n').map(|i| i + 1);
        let statement = last_statement_end(window);
        let space = window.rfind(|c: char| c == ' ' || c == '\t').map(|i| i + 1);

        type_block
            .or(blank_line)
            .or(newline)
            .or(statement)
            .or(space)
            .map_or(target_end, |offset| search_start + offset)
    }
}

/// Position just after the last `;`, `}` or sentence end followed by whitespace.
fn last_statement_end(window: &str) -> Option<usize> {
    let bytes = window.as_bytes();
    (0..bytes.len().saturating_sub(1)).rev().find_map(|i| {
        let is_end = matches!(bytes[i], b';' | b'}' | b'.' | b'!' | b'?');
        (is_end && bytes[i + 1].is_ascii_whitespace()).then_some(i + 1)
    })
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

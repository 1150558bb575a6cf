// Chunker
// Splits long discussions into boundary-aligned, overlapping chunks.
// Chunk text is an exact slice of the input so offsets translate by addition.

use crate::models::TextChunk;

use super::error::ChunkerError;

/// How far back from the size limit a natural boundary is searched for (bytes)
const BOUNDARY_LOOKBACK: usize = 200;

/// Split `text` into chunks of at most `max_chunk_size` bytes overlapping by roughly
/// `overlap_size` bytes. Boundaries prefer paragraph and sentence ends, then
/// whitespace; a chunk never starts inside a word.
pub fn split(text: &str, max_chunk_size: usize, overlap_size: usize) -> Result<Vec<TextChunk>, ChunkerError> {
    if max_chunk_size == 0 || overlap_size >= max_chunk_size {
        return Err(ChunkerError::InvalidSizes {
            max_chunk_size,
            overlap_size,
        });
    }

    if text.len() <= max_chunk_size {
        return Ok(vec![TextChunk::whole(text)]);
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let limit = floor_char_boundary(text, start + max_chunk_size);
        let end = if limit >= text.len() {
            text.len()
        } else {
            find_break(text, start, limit)
        };

        chunks.push(TextChunk {
            text: text[start..end].to_string(),
            start_offset: start,
            end_offset: end,
            sequence_index: chunks.len(),
            char_before: text[..start].chars().next_back(),
            char_after: text[end..].chars().next(),
        });

        if end >= text.len() {
            break;
        }

        let next = word_start(text, floor_char_boundary(text, end.saturating_sub(overlap_size)));
        start = if next > start && next < end { next } else { end };
    }

    Ok(chunks)
}

/// Pick the end of a chunk spanning `[start, limit)`
fn find_break(text: &str, start: usize, limit: usize) -> usize {
    let window_start = ceil_char_boundary(text, limit.saturating_sub(BOUNDARY_LOOKBACK).max(start));
    let window = &text[window_start..limit];

    // Paragraph or sentence end: break right after the punctuation / blank line
    let sentence = [". ", "! ", "? "]
        .iter()
        .filter_map(|p| window.rfind(p).map(|i| i + 1))
        .chain(window.rfind("\n\n").map(|i| i + 2))
        .max();
    if let Some(i) = sentence {
        let end = window_start + i;
        if end > start {
            return end;
        }
    }

    // Whitespace anywhere in the chunk, latest first
    let region = &text[start..limit];
    if let Some((i, c)) = region.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
        let end = start + i + c.len_utf8();
        if end > start {
            return end;
        }
    }

    // Any character that cannot be part of a shortcut token
    if let Some((i, c)) = region
        .char_indices()
        .rev()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == ':'))
    {
        let end = start + i + c.len_utf8();
        if end > start {
            return end;
        }
    }

    if limit > start {
        limit
    } else {
        ceil_char_boundary(text, start + 1)
    }
}

/// Move `pos` back to the first byte of the whitespace-delimited word containing it
fn word_start(text: &str, pos: usize) -> usize {
    text[..pos]
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0)
}

fn floor_char_boundary(text: &str, pos: usize) -> usize {
    let mut pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn ceil_char_boundary(text: &str, pos: usize) -> usize {
    let mut pos = pos.min(text.len());
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

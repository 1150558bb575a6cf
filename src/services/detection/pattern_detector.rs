// Pattern Detector
// Deterministic exact-phrase matching of catalog aliases and prefix families.
// Baseline for the model detector and the automatic fallback path.

use regex::RegexBuilder;

use crate::models::{Category, MatchConfidence, Occurrence, TextChunk};

use super::catalog::{family_code, ShortcutCatalog};

#[derive(Debug, Clone)]
struct Hit {
    start: usize,
    end: usize,
    code: String,
    category: Category,
}

/// Detect every shortcut mention in one chunk. Offsets are full-text offsets.
pub fn detect(chunk: &TextChunk, catalog: &ShortcutCatalog) -> Vec<Occurrence> {
    let text = chunk.text.as_str();

    let mut alias_hits: Vec<Hit> = Vec::new();
    for pattern in catalog.alias_patterns() {
        let entry = catalog.entry(pattern.entry);
        for m in pattern.regex.find_iter(text) {
            if !chunk_has_clean_boundaries(chunk, m.start(), m.end()) {
                continue;
            }
            alias_hits.push(Hit {
                start: m.start(),
                end: m.end(),
                code: entry.code.clone(),
                category: entry.category,
            });
        }
    }
    let mut accepted = leftmost_longest(alias_hits);

    let mut family_hits: Vec<Hit> = Vec::new();
    for pattern in catalog.family_patterns() {
        let family = catalog.family(pattern.family);
        for m in pattern.regex.find_iter(text) {
            if !chunk_has_clean_boundaries(chunk, m.start(), m.end()) {
                continue;
            }
            if accepted.iter().any(|h| h.start < m.end() && m.start() < h.end) {
                continue;
            }
            let suffix = &m.as_str()[family.prefix.len()..];
            family_hits.push(Hit {
                start: m.start(),
                end: m.end(),
                code: family_code(&family.prefix, suffix),
                category: family.category,
            });
        }
    }
    accepted.extend(leftmost_longest(family_hits));
    accepted.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.code.cmp(&b.code)));

    accepted
        .into_iter()
        .map(|hit| {
            let (start_offset, end_offset) = chunk.to_global(hit.start, hit.end);
            Occurrence {
                code: hit.code,
                category: hit.category,
                matched_text: text[hit.start..hit.end].to_string(),
                start_offset,
                end_offset,
                source_chunk: chunk.sequence_index,
                confidence: MatchConfidence::Exact,
            }
        })
        .collect()
}

/// Detect over the whole text as a single chunk
pub fn detect_text(text: &str, catalog: &ShortcutCatalog) -> Vec<Occurrence> {
    detect(&TextChunk::whole(text), catalog)
}

/// Per-chunk results, ready for merging
pub fn detect_chunks(chunks: &[TextChunk], catalog: &ShortcutCatalog) -> Vec<Vec<Occurrence>> {
    chunks.iter().map(|chunk| detect(chunk, catalog)).collect()
}

/// Keep non-overlapping hits, preferring the earliest start and then the longest span
fn leftmost_longest(mut hits: Vec<Hit>) -> Vec<Hit> {
    hits.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| b.end.cmp(&a.end))
            .then_with(|| a.code.cmp(&b.code))
    });
    let mut kept: Vec<Hit> = Vec::with_capacity(hits.len());
    for hit in hits {
        if kept.last().map_or(true, |last| hit.start >= last.end) {
            kept.push(hit);
        }
    }
    kept
}

/// Find every exact (case-insensitive) occurrence of `phrase` in `haystack`,
/// rejecting matches glued to surrounding word characters.
pub fn find_phrase(haystack: &str, phrase: &str) -> Vec<(usize, usize)> {
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return Vec::new();
    }
    let Ok(re) = RegexBuilder::new(&regex::escape(phrase)).case_insensitive(true).build() else {
        return Vec::new();
    };
    re.find_iter(haystack)
        .filter(|m| has_clean_boundaries(haystack, m.start(), m.end()))
        .map(|m| (m.start(), m.end()))
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Characters that continue a shortcut token to the left (`MOS:WP:V` is not `WP:V`)
fn is_token_char(c: char) -> bool {
    is_word_char(c) || c == ':'
}

/// A span is an exact phrase when it is not glued to the surrounding token
pub(crate) fn has_clean_boundaries(text: &str, start: usize, end: usize) -> bool {
    clean_between(
        text[..start].chars().next_back(),
        &text[start..end],
        text[end..].chars().next(),
    )
}

/// Boundary check for a chunk-local span; at the chunk edges the neighbours come
/// from the full text
pub(crate) fn chunk_has_clean_boundaries(chunk: &TextChunk, start: usize, end: usize) -> bool {
    let text = chunk.text.as_str();
    let prev = if start == 0 {
        chunk.char_before
    } else {
        text[..start].chars().next_back()
    };
    let next = if end == text.len() {
        chunk.char_after
    } else {
        text[end..].chars().next()
    };
    clean_between(prev, &text[start..end], next)
}

fn clean_between(prev: Option<char>, span: &str, next: Option<char>) -> bool {
    let before_ok = match (prev, span.chars().next()) {
        (Some(prev), Some(first)) if is_word_char(first) => !is_token_char(prev),
        _ => true,
    };
    let after_ok = match (next, span.chars().next_back()) {
        (Some(next), Some(last)) if is_word_char(last) => !is_word_char(next),
        _ => true,
    };
    before_ok && after_ok
}

// Model Detector
// One backend request per (chunk, category). Candidates are only trusted once
// their quoted text is found again inside the chunk.

use regex::RegexBuilder;
use tracing::debug;

use crate::models::{Category, MatchConfidence, Occurrence, TextChunk};

use super::backend::{BackendRequest, Candidate, DetectionBackend};
use super::catalog::{family_code, Classified, ShortcutCatalog};
use super::error::DetectionError;
use super::pattern_detector::{chunk_has_clean_boundaries, find_phrase, has_clean_boundaries};

/// Ask the backend about one category in one chunk and keep the relocatable candidates
pub async fn detect(
    chunk: &TextChunk,
    catalog: &ShortcutCatalog,
    category: Category,
    loose_mode: bool,
    backend: &dyn DetectionBackend,
) -> Result<Vec<Occurrence>, DetectionError> {
    let request = BackendRequest {
        category,
        chunk_text: &chunk.text,
        entries: catalog.entries_for(category),
        families: catalog.families_for(category),
        loose_mode,
    };

    let candidates = backend.find_candidates(&request).await?;
    Ok(locate_candidates(chunk, catalog, category, loose_mode, candidates))
}

/// Turn backend candidates into occurrences with verified full-text offsets
pub fn locate_candidates(
    chunk: &TextChunk,
    catalog: &ShortcutCatalog,
    category: Category,
    loose_mode: bool,
    candidates: Vec<Candidate>,
) -> Vec<Occurrence> {
    let mut occurrences: Vec<Occurrence> = Vec::new();
    let mut claimed: Vec<(String, usize, usize)> = Vec::new();
    let total = candidates.len();

    for candidate in candidates {
        let Some(classified) = catalog.classify(&candidate.code) else {
            debug!("[MODEL_DETECTOR] Unknown code {:?} discarded", candidate.code);
            continue;
        };
        if classified.category != category {
            debug!(
                "[MODEL_DETECTOR] {} is a {}, not a {}; discarded",
                classified.code, classified.category, category
            );
            continue;
        }

        let taken: Vec<(usize, usize)> = claimed
            .iter()
            .filter(|(code, _, _)| *code == classified.code)
            .map(|(_, s, e)| (*s, *e))
            .collect();

        match relocate(chunk, &candidate, &classified, catalog, loose_mode, &taken) {
            Ok((start, end, confidence)) => {
                claimed.push((classified.code.clone(), start, end));
                let (start_offset, end_offset) = chunk.to_global(start, end);
                occurrences.push(Occurrence {
                    code: classified.code,
                    category,
                    matched_text: chunk.text[start..end].to_string(),
                    start_offset,
                    end_offset,
                    source_chunk: chunk.sequence_index,
                    confidence,
                });
            }
            Err(e) => {
                debug!(
                    "[MODEL_DETECTOR] chunk={} hint={:?}: {}",
                    chunk.sequence_index, candidate.location_hint, e
                );
            }
        }
    }

    debug!(
        "[MODEL_DETECTOR] chunk={} category={} candidates={} kept={}",
        chunk.sequence_index,
        category,
        total,
        occurrences.len()
    );
    occurrences
}

/// Find the candidate's quote inside the chunk, skipping spans already claimed
/// by an earlier candidate for the same code. An exact quote only counts when it
/// names the code; the occurrence is then the shortcut inside the quote.
fn relocate(
    chunk: &TextChunk,
    candidate: &Candidate,
    classified: &Classified,
    catalog: &ShortcutCatalog,
    loose_mode: bool,
    taken: &[(usize, usize)],
) -> Result<(usize, usize, MatchConfidence), DetectionError> {
    let text = chunk.text.as_str();
    let free = |spans: Vec<(usize, usize)>| {
        spans
            .into_iter()
            .filter(|&(s, e)| chunk_has_clean_boundaries(chunk, s, e))
            .find(|span| !taken.contains(span))
    };

    let named: Vec<(usize, usize)> = find_phrase(text, &candidate.matched_text)
        .into_iter()
        .flat_map(|(s, e)| code_spans_within(chunk, s, e, classified, catalog))
        .collect();
    if let Some((s, e)) = free(named) {
        return Ok((s, e, MatchConfidence::Exact));
    }

    if loose_mode {
        if let Some((s, e)) = free(find_normalized(text, &candidate.matched_text)) {
            return Ok((s, e, MatchConfidence::Loose));
        }

        // The quote may be a paraphrase around a shortcut that is in the text verbatim
        if let Some(entry) = catalog.lookup(&classified.code) {
            let quote = candidate.matched_text.to_uppercase();
            for alias in entry.aliases.iter().filter(|a| quote.contains(&a.to_uppercase())) {
                if let Some((s, e)) = free(find_phrase(text, alias)) {
                    return Ok((s, e, MatchConfidence::Loose));
                }
            }
        }
    }

    Err(DetectionError::NoRelocatableMatch {
        code: classified.code.clone(),
        category: classified.category,
        quote: candidate.matched_text.clone(),
    })
}

/// Spans inside `[start, end)` of the chunk that spell the classified code: one of
/// its aliases, or a family token resolving to it. Leftmost-longest, non-overlapping.
fn code_spans_within(
    chunk: &TextChunk,
    start: usize,
    end: usize,
    classified: &Classified,
    catalog: &ShortcutCatalog,
) -> Vec<(usize, usize)> {
    let window = &chunk.text[start..end];
    let mut spans: Vec<(usize, usize)> = Vec::new();

    if classified.via_family {
        for pattern in catalog.family_patterns() {
            let family = catalog.family(pattern.family);
            for m in pattern.regex.find_iter(window) {
                let suffix = &m.as_str()[family.prefix.len()..];
                if family_code(&family.prefix, suffix) == classified.code {
                    spans.push((start + m.start(), start + m.end()));
                }
            }
        }
    } else if let Some(entry) = catalog.lookup(&classified.code) {
        for alias in &entry.aliases {
            spans.extend(find_phrase(window, alias).into_iter().map(|(s, e)| (start + s, start + e)));
        }
    }

    spans.retain(|&(s, e)| chunk_has_clean_boundaries(chunk, s, e));
    spans.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)));
    let mut kept: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for span in spans {
        if kept.last().map_or(true, |last| span.0 >= last.1) {
            kept.push(span);
        }
    }
    kept
}

const QUOTE_TRIM: &[char] = &[
    '"', '\'', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}', '.', ',', ';', '!', '?', '\u{2026}', '(', ')', '[', ']',
];

/// Case-insensitive search that tolerates whitespace differences and stray
/// surrounding quotes or punctuation
fn find_normalized(haystack: &str, quote: &str) -> Vec<(usize, usize)> {
    let trimmed = quote.trim().trim_matches(QUOTE_TRIM).trim();
    let words: Vec<String> = trimmed.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return Vec::new();
    }
    let Ok(re) = RegexBuilder::new(&words.join(r"\s+")).case_insensitive(true).build() else {
        return Vec::new();
    };
    re.find_iter(haystack)
        .filter(|m| has_clean_boundaries(haystack, m.start(), m.end()))
        .map(|m| (m.start(), m.end()))
        .collect()
}

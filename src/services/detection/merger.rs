// Merger / Deduplicator
// Combines per-chunk occurrences into one ordered list. Mentions seen twice
// because of chunk overlap collapse; genuine repeats at disjoint spans survive.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{DetectionResult, DetectorMode, MatchConfidence, Occurrence};

fn occurrence_order(a: &Occurrence, b: &Occurrence) -> Ordering {
    a.start_offset
        .cmp(&b.start_offset)
        .then_with(|| a.code.cmp(&b.code))
        .then_with(|| a.confidence.cmp(&b.confidence))
        .then_with(|| a.source_chunk.cmp(&b.source_chunk))
        .then_with(|| a.end_offset.cmp(&b.end_offset))
}

/// Whether two occurrences of the same code describe the same mention
fn is_same_mention(kept: &Occurrence, candidate: &Occurrence, tolerance: usize) -> bool {
    if kept.start_offset == candidate.start_offset && kept.end_offset == candidate.end_offset {
        return true;
    }
    kept.overlap_with(candidate) > tolerance
}

/// Merge per-chunk results. `tolerance` is the overlap (in bytes) two spans of the
/// same code may share and still count as distinct mentions.
pub fn merge(per_chunk: Vec<Vec<Occurrence>>, tolerance: usize) -> Vec<Occurrence> {
    let mut all: Vec<Occurrence> = per_chunk.into_iter().flatten().collect();
    all.sort_by(occurrence_order);

    let mut merged: Vec<Occurrence> = Vec::with_capacity(all.len());
    // code -> indices into `merged` whose span may still overlap later ones
    let mut open: HashMap<String, Vec<usize>> = HashMap::new();

    for occ in all {
        let slots = open.entry(occ.code.clone()).or_default();
        slots.retain(|&i| merged[i].end_offset > occ.start_offset || merged[i].start_offset == occ.start_offset);

        let duplicate_of = slots
            .iter()
            .copied()
            .find(|&i| is_same_mention(&merged[i], &occ, tolerance));

        match duplicate_of {
            Some(i) => {
                if merged[i].confidence == MatchConfidence::Loose && occ.confidence == MatchConfidence::Exact {
                    merged[i] = occ;
                }
            }
            None => {
                slots.push(merged.len());
                merged.push(occ);
            }
        }
    }

    merged.sort_by(occurrence_order);
    merged
}

/// Merge and wrap into the terminal result of one analysis
pub fn merge_into_result(
    per_chunk: Vec<Vec<Occurrence>>,
    detector_used: DetectorMode,
    fell_back: bool,
    chunk_count: usize,
    tolerance: usize,
) -> DetectionResult {
    DetectionResult {
        occurrences: merge(per_chunk, tolerance),
        detector_used,
        fell_back,
        chunk_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn occ(code: &str, start: usize, end: usize, chunk: usize, confidence: MatchConfidence) -> Occurrence {
        Occurrence {
            code: code.to_string(),
            category: Category::Policy,
            matched_text: "x".repeat(end - start),
            start_offset: start,
            end_offset: end,
            source_chunk: chunk,
            confidence,
        }
    }

    #[test]
    fn test_overlap_duplicates_collapse() {
        let merged = merge(
            vec![
                vec![occ("WP:V", 100, 104, 0, MatchConfidence::Exact)],
                vec![occ("WP:V", 100, 104, 1, MatchConfidence::Exact)],
            ],
            0,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source_chunk, 0);
    }

    #[test]
    fn test_disjoint_repeats_survive() {
        let merged = merge(
            vec![vec![
                occ("WP:V", 0, 4, 0, MatchConfidence::Exact),
                occ("WP:V", 10, 14, 0, MatchConfidence::Exact),
                occ("WP:V", 4, 8, 0, MatchConfidence::Exact),
            ]],
            0,
        );
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].start_offset, 4);
    }

    #[test]
    fn test_exact_preferred_over_loose() {
        let merged = merge(
            vec![
                vec![occ("WP:OR", 50, 70, 0, MatchConfidence::Loose)],
                vec![occ("WP:OR", 52, 70, 1, MatchConfidence::Exact)],
            ],
            0,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, MatchConfidence::Exact);
        assert_eq!(merged[0].start_offset, 52);
    }

    #[test]
    fn test_different_codes_never_collapse() {
        let merged = merge(
            vec![vec![
                occ("WP:NPOV", 0, 20, 0, MatchConfidence::Exact),
                occ("WP:V", 0, 20, 0, MatchConfidence::Exact),
            ]],
            0,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].code, "WP:NPOV");
    }

    #[test]
    fn test_tolerance_allows_small_overlap() {
        let input = vec![vec![
            occ("WP:RS", 0, 30, 0, MatchConfidence::Loose),
            occ("WP:RS", 27, 60, 0, MatchConfidence::Loose),
        ]];
        assert_eq!(merge(input.clone(), 0).len(), 1);
        assert_eq!(merge(input, 5).len(), 2);
    }

    #[test]
    fn test_identical_span_collapses_regardless_of_tolerance() {
        let input = vec![
            vec![occ("WP:RS", 0, 5, 0, MatchConfidence::Exact)],
            vec![occ("WP:RS", 0, 5, 1, MatchConfidence::Exact)],
        ];
        assert_eq!(merge(input, 100).len(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let input = vec![
            vec![
                occ("WP:V", 0, 4, 0, MatchConfidence::Exact),
                occ("WP:OR", 20, 40, 0, MatchConfidence::Loose),
                occ("WP:V", 90, 94, 0, MatchConfidence::Exact),
            ],
            vec![
                occ("WP:V", 90, 94, 1, MatchConfidence::Exact),
                occ("WP:OR", 25, 40, 1, MatchConfidence::Exact),
                occ("WP:N", 120, 124, 1, MatchConfidence::Exact),
            ],
        ];
        let once = merge_into_result(input, DetectorMode::Pattern, false, 2, 0);
        let twice = merge_into_result(
            vec![once.occurrences.clone(), once.occurrences.clone()],
            once.detector_used,
            once.fell_back,
            once.chunk_count,
            0,
        );
        assert_eq!(once, twice);
        assert_eq!(once.occurrences.len(), 4);
    }
}

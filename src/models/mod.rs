// talkscan Data Models
// Shared by detectors, merger, exporter and the CLI

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============ Catalog ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Policy,
    Guideline,
    Essay,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Policy, Category::Guideline, Category::Essay];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Policy => "policy",
            Category::Guideline => "guideline",
            Category::Essay => "essay",
        }
    }

    /// Capitalized label used in exports and prompts
    pub fn label(&self) -> &'static str {
        match self {
            Category::Policy => "Policy",
            Category::Guideline => "Guideline",
            Category::Essay => "Essay",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            Category::Policy => "POLICIES",
            Category::Guideline => "GUIDELINES",
            Category::Essay => "ESSAYS",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutEntry {
    pub code: String,
    pub category: Category,
    /// Accepted surface forms. Always contains `code` itself.
    #[serde(default)]
    pub aliases: BTreeSet<String>,
}

/// A code family such as `MOS:` where any well-formed suffix is a valid shortcut
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefixFamily {
    pub prefix: String,
    pub category: Category,
}

// ============ Chunks ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChunk {
    pub text: String,
    /// UTF-8 byte offset (0-based) into the full text.
    pub start_offset: usize,
    /// UTF-8 byte offset (0-based, end-exclusive) into the full text.
    pub end_offset: usize,
    pub sequence_index: usize,
    /// Full-text neighbours of the chunk, so boundary checks at the chunk edges
    /// see the same characters as an unchunked scan would.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_before: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_after: Option<char>,
}

impl TextChunk {
    /// Whole text as a single chunk
    pub fn whole(text: &str) -> Self {
        Self {
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
            sequence_index: 0,
            char_before: None,
            char_after: None,
        }
    }

    /// Convert a chunk-local span into full-text coordinates
    pub fn to_global(&self, local_start: usize, local_end: usize) -> (usize, usize) {
        (self.start_offset + local_start, self.start_offset + local_end)
    }
}

// ============ Occurrences ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    Exact,
    Loose,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub code: String,
    pub category: Category,
    pub matched_text: String,
    /// UTF-8 byte offset into the full text, never chunk-local.
    pub start_offset: usize,
    pub end_offset: usize,
    pub source_chunk: usize,
    pub confidence: MatchConfidence,
}

impl Occurrence {
    pub fn len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overlap length in bytes between two spans
    pub fn overlap_with(&self, other: &Occurrence) -> usize {
        let start = self.start_offset.max(other.start_offset);
        let end = self.end_offset.min(other.end_offset);
        end.saturating_sub(start)
    }

    /// Surrounding text, clipped to `radius` bytes on each side and snapped to char boundaries
    pub fn context<'a>(&self, text: &'a str, radius: usize) -> &'a str {
        let mut start = self.start_offset.saturating_sub(radius).min(text.len());
        let mut end = self.end_offset.saturating_add(radius).min(text.len());
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        while end < text.len() && !text.is_char_boundary(end) {
            end += 1;
        }
        text.get(start..end).unwrap_or("")
    }
}

// ============ Detection Result ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorMode {
    Model,
    Pattern,
}

impl fmt::Display for DetectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorMode::Model => f.write_str("model"),
            DetectorMode::Pattern => f.write_str("pattern"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub occurrences: Vec<Occurrence>,
    pub detector_used: DetectorMode,
    pub fell_back: bool,
    #[serde(default)]
    pub chunk_count: usize,
}

impl DetectionResult {
    pub fn empty(detector_used: DetectorMode, fell_back: bool) -> Self {
        Self {
            occurrences: Vec::new(),
            detector_used,
            fell_back,
            chunk_count: 0,
        }
    }

    /// Occurrence count per code, the view used for accuracy comparisons
    pub fn count_by_code(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for occ in &self.occurrences {
            *counts.entry(occ.code.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn of_category(&self, category: Category) -> impl Iterator<Item = &Occurrence> {
        self.occurrences.iter().filter(move |o| o.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occ(code: &str, start: usize, end: usize) -> Occurrence {
        Occurrence {
            code: code.to_string(),
            category: Category::Policy,
            matched_text: String::new(),
            start_offset: start,
            end_offset: end,
            source_chunk: 0,
            confidence: MatchConfidence::Exact,
        }
    }

    #[test]
    fn test_chunk_to_global() {
        let chunk = TextChunk {
            text: "WP:V".to_string(),
            start_offset: 100,
            end_offset: 104,
            sequence_index: 3,
            char_before: None,
            char_after: None,
        };
        assert_eq!(chunk.to_global(0, 4), (100, 104));
    }

    #[test]
    fn test_overlap_with() {
        assert_eq!(occ("WP:V", 0, 10).overlap_with(&occ("WP:V", 5, 12)), 5);
        assert_eq!(occ("WP:V", 0, 4).overlap_with(&occ("WP:V", 4, 8)), 0);
    }

    #[test]
    fn test_context_snaps_to_char_boundary() {
        let text = "é WP:V é";
        let o = occ("WP:V", 3, 7);
        assert_eq!(&text[3..7], "WP:V");
        assert_eq!(o.context(text, 2), "é WP:V é");
    }

    #[test]
    fn test_count_by_code() {
        let result = DetectionResult {
            occurrences: vec![occ("WP:V", 0, 4), occ("WP:V", 10, 14), occ("WP:OR", 20, 25)],
            detector_used: DetectorMode::Pattern,
            fell_back: false,
            chunk_count: 1,
        };
        let counts = result.count_by_code();
        assert_eq!(counts.get("WP:V"), Some(&2));
        assert_eq!(counts.get("WP:OR"), Some(&1));
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = DetectionResult::empty(DetectorMode::Pattern, true);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"detectorUsed\":\"pattern\""));
        assert!(json.contains("\"fellBack\":true"));
    }
}

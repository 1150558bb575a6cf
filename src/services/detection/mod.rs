// Detection Module
// Shortcut detection core organized into specialized submodules:
// - catalog: Known shortcuts, aliases and prefix families
// - chunker: Splits long text into overlapping chunks
// - pattern_detector: Deterministic regex matching against the catalog
// - backend / model_detector: Language-model candidates re-located in the text
// - merger: Chunk-local results into one deduplicated list
// - orchestrator: Chooses a detector, runs chunks concurrently, falls back

pub mod error;
pub mod catalog;
pub mod chunker;
pub mod pattern_detector;
pub mod merger;
pub mod backend;
pub mod model_detector;
pub mod orchestrator;

// Re-export commonly used items
pub use error::{CatalogError, ChunkerError, DetectionError};
pub use catalog::{Classified, ShortcutCatalog};
pub use backend::{BackendRequest, Candidate, DetectionBackend, OpenAiBackend};
pub use merger::{merge, merge_into_result};
pub use orchestrator::{analyze, analyze_with_pattern, AnalyzeOptions};

// talkscan Core Services

pub mod config_store;
pub mod providers;
pub mod detection;
pub mod exporter;

pub use config_store::*;
pub use providers::*;
pub use exporter::{format_batch_for_sheets, format_for_sheets, ExportFormat, LabeledResult};

// Re-export detection entry points
pub use detection::{
    analyze,
    analyze_with_pattern,
    AnalyzeOptions,
    CatalogError,
    DetectionBackend,
    DetectionError,
    OpenAiBackend,
    ShortcutCatalog,
};

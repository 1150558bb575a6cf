// Detection Errors

use std::path::PathBuf;
use thiserror::Error;

use crate::models::Category;
use crate::services::providers::ProviderError;

/// Errors raised while building or loading a shortcut catalog. Always fatal.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Catalog entry has an empty code")]
    EmptyCode,
    #[error("Catalog entry {code} has an empty alias")]
    EmptyAlias { code: String },
    #[error("Alias {alias} is claimed by both {first} and {second}")]
    DuplicateAlias {
        alias: String,
        first: String,
        second: String,
    },
    #[error("Invalid prefix family: {0}")]
    InvalidFamily(String),
    #[error("Invalid pattern for {surface}: {source}")]
    Pattern {
        surface: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("Invalid chunk sizes: max={max_chunk_size}, overlap={overlap_size}")]
    InvalidSizes {
        max_chunk_size: usize,
        overlap_size: usize,
    },
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Catalog could not be loaded: {0}")]
    CatalogLoad(#[from] CatalogError),
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Backend returned a malformed response: {0}")]
    BackendMalformedResponse(String),
    #[error("Backend call timed out after {0}s")]
    Timeout(u64),
    #[error("No relocatable match for {code} ({category}): {quote:?}")]
    NoRelocatableMatch {
        code: String,
        category: Category,
        quote: String,
    },
}

impl DetectionError {
    /// Whether this failure should abandon model-assisted detection for the analysis
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            DetectionError::BackendUnavailable(_)
                | DetectionError::BackendMalformedResponse(_)
                | DetectionError::Timeout(_)
        )
    }
}

impl From<ProviderError> for DetectionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::JsonError(msg) => DetectionError::BackendMalformedResponse(msg),
            ProviderError::MissingContent => {
                DetectionError::BackendMalformedResponse("missing content".to_string())
            }
            other => DetectionError::BackendUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_mapping() {
        let e: DetectionError = ProviderError::MissingApiKey.into();
        assert!(matches!(e, DetectionError::BackendUnavailable(_)));

        let e: DetectionError = ProviderError::JsonError("bad".into()).into();
        assert!(matches!(e, DetectionError::BackendMalformedResponse(_)));
        assert!(e.triggers_fallback());
    }

    #[test]
    fn test_no_relocatable_match_does_not_trigger_fallback() {
        let e = DetectionError::NoRelocatableMatch {
            code: "WP:V".into(),
            category: Category::Policy,
            quote: "made up".into(),
        };
        assert!(!e.triggers_fallback());
    }
}

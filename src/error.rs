//! Error types for model selection

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for model selection operations
pub type Result<T> = std::result::Result<T, SelectError>;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum SelectError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Model config not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to write model config to {}: {source}", .path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: Box<SelectError>,
    },

    #[error("Unresolved {kind} target: {target}")]
    UnresolvedTarget { kind: &'static str, target: String },

    #[error("Failed to construct candidate '{candidate}' ({target}): {source}")]
    Construction {
        candidate: String,
        target: String,
        #[source]
        source: Box<SelectError>,
    },

    #[error("Search failed for candidate '{candidate}' during {stage}: {source}")]
    Search {
        candidate: String,
        stage: SearchStage,
        #[source]
        source: Box<SelectError>,
    },

    #[error("No candidate reached base accuracy {base_accuracy}; best score was {}", fmt_score(.best_score))]
    BelowThreshold {
        base_accuracy: f64,
        best_score: Option<f64>,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Computation error: {0}")]
    ComputationError(String),
}

/// Stage of a candidate's search in which an error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStage {
    /// Building fold estimators from a parameter combination
    Configure,
    /// Fitting on a training fold
    Fit,
    /// Scoring on a test fold
    Score,
    /// Refitting the best combination on the full data
    Refit,
}

impl std::fmt::Display for SearchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SearchStage::Configure => "configure",
            SearchStage::Fit => "fit",
            SearchStage::Score => "score",
            SearchStage::Refit => "refit",
        };
        f.write_str(s)
    }
}

fn fmt_score(score: &Option<f64>) -> String {
    match score {
        Some(s) => format!("{:.6}", s),
        None => "n/a".to_string(),
    }
}

impl SelectError {
    /// Shorthand for an invalid parameter error
    pub fn invalid_param(name: &str, value: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        SelectError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<polars::error::PolarsError> for SelectError {
    fn from(err: polars::error::PolarsError) -> Self {
        SelectError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for SelectError {
    fn from(err: serde_json::Error) -> Self {
        SelectError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for SelectError {
    fn from(err: ndarray::ShapeError) -> Self {
        SelectError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SelectError::DataError("test error".to_string());
        assert_eq!(err.to_string(), "Data error: test error");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SelectError = io_err.into();
        assert!(matches!(err, SelectError::IoError(_)));
    }

    #[test]
    fn test_search_error_carries_context() {
        let err = SelectError::Search {
            candidate: "module_0".to_string(),
            stage: SearchStage::Fit,
            source: Box::new(SelectError::ModelNotFitted),
        };
        let msg = err.to_string();
        assert!(msg.contains("module_0"));
        assert!(msg.contains("fit"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_below_threshold_display() {
        let err = SelectError::BelowThreshold { base_accuracy: 0.9, best_score: Some(0.5) };
        assert!(err.to_string().contains("0.9"));
        let err = SelectError::BelowThreshold { base_accuracy: 0.9, best_score: None };
        assert!(err.to_string().contains("n/a"));
    }
}

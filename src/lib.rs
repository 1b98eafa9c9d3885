//! Kolosal Select - Config-driven model selection
//!
//! Reads a YAML model config listing estimator candidates and their
//! hyperparameter grids, cross-validates every grid with the configured
//! search strategy and returns the best-scoring fitted model.
//!
//! ```no_run
//! use kolosal_select::prelude::*;
//! use ndarray::{Array1, Array2};
//!
//! # fn main() -> kolosal_select::Result<()> {
//! let path = generate_sample_model_config("config")?;
//! let builder = ModelBuilder::from_path(&path)?;
//!
//! let x = Array2::from_shape_fn((200, 3), |(i, j)| ((i * (j + 3)) % 17) as f64);
//! let y: Array1<f64> = x.rows().into_iter().map(|r| 2.0 * r[0] - r[1] + 0.5 * r[2]).collect();
//!
//! let best = builder.get_best_model(&x, &y, Some(0.6))?;
//! println!("{} scored {:.4} with {:?}", best.name, best.best_score, best.best_parameters);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`] - YAML model config and the sample generator
//! - [`selection`] - [`ModelBuilder`](selection::ModelBuilder) orchestration
//! - [`search`] - parameter grids, cross-validation and search strategies
//! - [`training`] - estimators and the estimator registry
//! - [`params`] - typed hyperparameter values
//! - [`data`] - CSV / JSON loading for the CLI
//! - [`cli`] - command-line interface

// Core error handling
pub mod error;
pub mod params;

// Model selection
pub mod config;
pub mod selection;
pub mod search;
pub mod training;

// Data and CLI
pub mod data;
pub mod cli;

pub use error::{Result, SearchStage, SelectError};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{Result, SearchStage, SelectError};

    // Config
    pub use crate::config::{generate_sample_model_config, CandidateSpec, ModelConfig, SearchConfig, MODEL_CONFIG_FILE_NAME};
    pub use crate::params::{ParamValue, Params};

    // Selection
    pub use crate::selection::{BestModel, BestModelReport, GridSearchedModel, InitializedModel, ModelBuilder};

    // Search
    pub use crate::search::{GridSearchCV, ParameterGrid, RandomizedSearchCV, Scoring, SearchRegistry, SearchSettings, SearchStrategy};

    // Training
    pub use crate::training::{Estimator, EstimatorKind, EstimatorRegistry};
}

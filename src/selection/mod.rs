//! Model selection orchestration
//!
//! [`ModelBuilder`] turns a [`ModelConfig`] into a ranked set of grid-searched
//! candidates and returns the single best one:
//!
//! 1. resolve every candidate's `module + class` through the
//!    [`EstimatorRegistry`] and apply its fixed params and grid values
//!    ([`ModelBuilder::initialized_models`]);
//! 2. search each candidate with the configured strategy
//!    ([`ModelBuilder::search_initialized_models`]);
//! 3. keep the candidate with the strictly greatest best score, first
//!    declared wins ties, optionally gated by `base_accuracy`
//!    ([`ModelBuilder::best_from_searched`]).

use crate::config::ModelConfig;
use crate::error::{Result, SelectError};
use crate::params::{format_params, Params};
use crate::search::{CombinationResult, ParameterGrid, SearchRegistry, SearchStrategy};
use crate::training::models::Estimator;
use crate::training::registry::EstimatorRegistry;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A candidate resolved and configured, not yet fitted
#[derive(Debug)]
pub struct InitializedModel {
    /// Position in the config's `model_selection`
    pub index: usize,
    pub name: String,
    /// `module.class`
    pub target: String,
    /// Estimator with the fixed params applied
    pub estimator: Box<dyn Estimator>,
    pub param_grid: ParameterGrid,
}

/// Search result for one candidate
#[derive(Debug)]
pub struct GridSearchedModel {
    pub index: usize,
    pub name: String,
    pub target: String,
    /// Unfitted estimator the search started from
    pub base_estimator: Box<dyn Estimator>,
    /// Best combination refit on all data
    pub best_estimator: Box<dyn Estimator>,
    pub best_params: Params,
    pub best_score: f64,
    pub cv_results: Vec<CombinationResult>,
}

/// Per-candidate line of a [`BestModelReport`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub name: String,
    pub target: String,
    pub best_score: f64,
    pub best_params: Params,
    pub n_combinations: usize,
}

impl From<&GridSearchedModel> for CandidateSummary {
    fn from(model: &GridSearchedModel) -> Self {
        Self {
            name: model.name.clone(),
            target: model.target.clone(),
            best_score: model.best_score,
            best_params: model.best_params.clone(),
            n_combinations: model.cv_results.len(),
        }
    }
}

/// The winning candidate, fitted and owned by the caller
#[derive(Debug)]
pub struct BestModel {
    pub name: String,
    pub target: String,
    pub best_model: Box<dyn Estimator>,
    pub best_score: f64,
    pub best_parameters: Params,
    pub base_accuracy: Option<f64>,
    /// `module.class` of the search strategy used
    pub search_strategy: String,
    /// Every searched candidate, in declared order
    pub candidates: Vec<CandidateSummary>,
}

/// Serializable summary of a selection run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestModelReport {
    pub candidate: String,
    pub target: String,
    pub best_score: f64,
    pub best_parameters: Params,
    pub base_accuracy: Option<f64>,
    pub search_strategy: String,
    pub candidates: Vec<CandidateSummary>,
    pub generated_at: DateTime<Utc>,
}

impl BestModel {
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.best_model.predict(x)
    }

    pub fn report(&self) -> BestModelReport {
        BestModelReport {
            candidate: self.name.clone(),
            target: self.target.clone(),
            best_score: self.best_score,
            best_parameters: self.best_parameters.clone(),
            base_accuracy: self.base_accuracy,
            search_strategy: self.search_strategy.clone(),
            candidates: self.candidates.clone(),
            generated_at: Utc::now(),
        }
    }

    /// Write [`BestModel::report`] as pretty JSON
    pub fn save_report(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.report())?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Write the fitted estimator's serialized state
    pub fn save_model(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.best_model.to_bytes()?)?;
        Ok(())
    }
}

/// Runs model selection for one [`ModelConfig`]
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    config: ModelConfig,
    estimators: EstimatorRegistry,
    searches: SearchRegistry,
}

impl ModelBuilder {
    /// Builder over the default registries
    pub fn new(config: ModelConfig) -> Self {
        Self::with_registries(config, EstimatorRegistry::with_defaults(), SearchRegistry::with_defaults())
    }

    /// Load the config at `path`
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(ModelConfig::from_path(path)?))
    }

    pub fn with_registries(config: ModelConfig, estimators: EstimatorRegistry, searches: SearchRegistry) -> Self {
        Self {
            config,
            estimators,
            searches,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Resolve the search strategy and every candidate without fitting anything
    pub fn validate(&self) -> Result<()> {
        self.search_strategy()?;
        self.initialized_models()?;
        Ok(())
    }

    /// The configured search strategy
    pub fn search_strategy(&self) -> Result<Box<dyn SearchStrategy>> {
        let search = &self.config.grid_search;
        self.searches.construct(&search.module, &search.class_name, &search.params)
    }

    /// Resolve and configure every candidate, in declared order.
    ///
    /// Each grid value is applied to a scratch copy so a bad value fails
    /// here rather than midway through a search.
    pub fn initialized_models(&self) -> Result<Vec<InitializedModel>> {
        self.config
            .model_selection
            .iter()
            .enumerate()
            .map(|(index, (name, spec))| -> Result<InitializedModel> {
                let target = spec.target();
                let construction = |source: SelectError| SelectError::Construction {
                    candidate: name.clone(),
                    target: target.clone(),
                    source: Box::new(source),
                };

                let mut estimator = self
                    .estimators
                    .construct(&spec.module, &spec.class_name)
                    .map_err(construction)?;
                estimator.set_params(&spec.params).map_err(construction)?;

                let param_grid = ParameterGrid::new(&spec.search_param_grid).map_err(construction)?;
                for (param, value) in param_grid.entries() {
                    let mut scratch = estimator.clone_unfitted();
                    scratch.set_param(param, value).map_err(construction)?;
                }

                debug!(
                    candidate = %name,
                    target = %target,
                    params = %format_params(&spec.params),
                    combinations = param_grid.len(),
                    "Initialized candidate"
                );

                Ok(InitializedModel {
                    index,
                    name: name.clone(),
                    target,
                    estimator,
                    param_grid,
                })
            })
            .collect()
    }

    /// Search every initialized candidate, in order
    pub fn search_initialized_models(
        &self,
        models: Vec<InitializedModel>,
        x: &Array2<f64>,
        y: &Array1<f64>,
    ) -> Result<Vec<GridSearchedModel>> {
        let strategy = self.search_strategy()?;
        let total = models.len();

        models
            .into_iter()
            .map(|model| -> Result<GridSearchedModel> {
                let start = Instant::now();
                info!(
                    candidate = %model.name,
                    target = %model.target,
                    "Training candidate {}/{}",
                    model.index + 1,
                    total
                );

                let outcome = strategy.search(&model.name, model.estimator.as_ref(), &model.param_grid, x, y)?;

                info!(
                    candidate = %model.name,
                    best_score = outcome.best_score,
                    best_params = %format_params(&outcome.best_params),
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "Candidate searched"
                );

                Ok(GridSearchedModel {
                    index: model.index,
                    name: model.name,
                    target: model.target,
                    base_estimator: model.estimator,
                    best_estimator: outcome.best_estimator,
                    best_params: outcome.best_params,
                    best_score: outcome.best_score,
                    cv_results: outcome.cv_results,
                })
            })
            .collect()
    }

    /// Pick the winner among searched candidates.
    ///
    /// Strictly greatest score wins, so the first declared candidate keeps
    /// a tie. With `base_accuracy`, only scores `>= base_accuracy` qualify.
    pub fn best_from_searched(
        &self,
        models: Vec<GridSearchedModel>,
        base_accuracy: Option<f64>,
    ) -> Result<BestModel> {
        check_base_accuracy(base_accuracy)?;
        if models.is_empty() {
            return Err(SelectError::ValidationError("no searched candidates to select from".to_string()));
        }

        let candidates: Vec<CandidateSummary> = models.iter().map(CandidateSummary::from).collect();

        let mut winner: Option<usize> = None;
        for (idx, model) in models.iter().enumerate() {
            let score = model.best_score;
            if score.is_nan() {
                warn!(candidate = %model.name, "Candidate produced no finite score");
                continue;
            }
            if let Some(threshold) = base_accuracy {
                if score < threshold {
                    debug!(candidate = %model.name, score, threshold, "Candidate below base accuracy");
                    continue;
                }
            }
            match winner {
                Some(best) if score <= models[best].best_score => {}
                _ => winner = Some(idx),
            }
        }

        let winner = match winner {
            Some(idx) => idx,
            None => {
                let best_score = models
                    .iter()
                    .map(|m| m.best_score)
                    .filter(|s| !s.is_nan())
                    .reduce(f64::max);
                return Err(match base_accuracy {
                    Some(threshold) => SelectError::BelowThreshold {
                        base_accuracy: threshold,
                        best_score,
                    },
                    None => SelectError::ComputationError("no candidate produced a finite score".to_string()),
                });
            }
        };

        let model = models.into_iter().nth(winner).ok_or_else(|| {
            SelectError::ComputationError("selected candidate disappeared".to_string())
        })?;

        info!(
            candidate = %model.name,
            target = %model.target,
            best_score = model.best_score,
            best_params = %format_params(&model.best_params),
            "Best model selected"
        );

        Ok(BestModel {
            name: model.name,
            target: model.target,
            best_model: model.best_estimator,
            best_score: model.best_score,
            best_parameters: model.best_params,
            base_accuracy,
            search_strategy: self.config.grid_search.target(),
            candidates,
        })
    }

    /// Validate, search every candidate and return the best.
    ///
    /// Every candidate is resolved and configured before the first fit.
    pub fn get_best_model(&self, x: &Array2<f64>, y: &Array1<f64>, base_accuracy: Option<f64>) -> Result<BestModel> {
        check_base_accuracy(base_accuracy)?;
        self.search_strategy()?;
        let models = self.initialized_models()?;

        info!(
            candidates = models.len(),
            search = %self.config.grid_search.target(),
            n_samples = x.nrows(),
            n_features = x.ncols(),
            "Starting model selection"
        );

        let searched = self.search_initialized_models(models, x, y)?;
        self.best_from_searched(searched, base_accuracy)
    }
}

fn check_base_accuracy(base_accuracy: Option<f64>) -> Result<()> {
    match base_accuracy {
        Some(t) if !t.is_finite() => Err(SelectError::invalid_param("base_accuracy", t, "must be a finite number")),
        _ => Ok(()),
    }
}

//! Hyperparameter search
//!
//! - [`ParameterGrid`] - cartesian product of a `search_param_grid`
//! - [`CrossValidator`] - KFold / StratifiedKFold splitters
//! - [`SearchStrategy`] - `GridSearchCV` and `RandomizedSearchCV`
//! - [`SearchRegistry`] - resolves the `grid_search` target of a model config

pub mod cross_validation;
pub mod grid;
pub mod strategy;

pub use cross_validation::{CVResults, CVSplit, CVStrategy, CrossValidator};
pub use grid::ParameterGrid;
pub use strategy::{
    CombinationResult, GridSearchCV, RandomizedSearchCV, Scoring, SearchOutcome, SearchSettings,
    SearchStrategy,
};

use crate::error::{Result, SelectError};
use crate::params::Params;
use crate::training::registry::qualified_name;
use std::collections::BTreeMap;

/// Builds a search strategy from its fixed `params`
pub type SearchConstructor = fn(&Params) -> Result<Box<dyn SearchStrategy>>;

/// Lookup table from (module, class) to search strategy constructor
#[derive(Clone, Default)]
pub struct SearchRegistry {
    constructors: BTreeMap<(String, String), SearchConstructor>,
}

impl std::fmt::Debug for SearchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries().map(|(module, class)| qualified_name(module, class)))
            .finish()
    }
}

impl SearchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `GridSearchCV` and `RandomizedSearchCV`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("sklearn.model_selection", "GridSearchCV", |params| {
            Ok(Box::new(GridSearchCV::from_params(params)?))
        });
        registry.register("sklearn.model_selection", "RandomizedSearchCV", |params| {
            Ok(Box::new(RandomizedSearchCV::from_params(params)?))
        });
        registry
    }

    pub fn register(&mut self, module: &str, class: &str, constructor: SearchConstructor) -> &mut Self {
        self.constructors.insert((module.to_string(), class.to_string()), constructor);
        self
    }

    pub fn contains(&self, module: &str, class: &str) -> bool {
        self.constructors.contains_key(&(module.to_string(), class.to_string()))
    }

    /// Build `module.class` with `params`, or `UnresolvedTarget`
    pub fn construct(&self, module: &str, class: &str, params: &Params) -> Result<Box<dyn SearchStrategy>> {
        let constructor = self
            .constructors
            .get(&(module.to_string(), class.to_string()))
            .ok_or_else(|| SelectError::UnresolvedTarget {
                kind: "search strategy",
                target: qualified_name(module, class),
            })?;
        constructor(params)
    }

    /// Every registered (module, class) pair, sorted
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.constructors.keys().map(|(m, c)| (m.as_str(), c.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategies() {
        let registry = SearchRegistry::with_defaults();
        let mut params = Params::new();
        params.insert("cv".into(), 3.into());

        let grid = registry.construct("sklearn.model_selection", "GridSearchCV", &params).unwrap();
        assert_eq!(grid.name(), "GridSearchCV");
        assert_eq!(grid.settings().cv, 3);

        let randomized = registry
            .construct("sklearn.model_selection", "RandomizedSearchCV", &params)
            .unwrap();
        assert_eq!(randomized.name(), "RandomizedSearchCV");
    }

    #[test]
    fn test_unknown_strategy() {
        let registry = SearchRegistry::with_defaults();
        let err = registry
            .construct("sklearn.model_selection", "HalvingGridSearchCV", &Params::new())
            .unwrap_err();
        assert!(matches!(err, SelectError::UnresolvedTarget { kind: "search strategy", .. }));
    }
}

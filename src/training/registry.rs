//! Estimator registry: resolves `module` + `class` pairs from the model config

use crate::error::{Result, SelectError};
use super::decision_tree::DecisionTree;
use super::dummy::{DummyClassifier, DummyRegressor};
use super::knn::{KNNConfig, KNearestNeighbors};
use super::linear_models::{LassoRegression, LinearRegression, LogisticRegression, RidgeRegression};
use super::models::Estimator;
use super::random_forest::RandomForest;
use super::xgboost::{XGBoost, XGBoostConfig};
use std::collections::BTreeMap;

/// Builds a fresh, unfitted estimator with default parameters
pub type EstimatorConstructor = fn() -> Box<dyn Estimator>;

/// Fully qualified `module.class` name
pub fn qualified_name(module: &str, class: &str) -> String {
    format!("{}.{}", module, class)
}

/// Lookup table from (module, class) to estimator constructor
#[derive(Debug, Clone, Default)]
pub struct EstimatorRegistry {
    constructors: BTreeMap<(String, String), EstimatorConstructor>,
}

impl EstimatorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in estimator
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register("sklearn.ensemble", "RandomForestRegressor", || {
            Box::new(RandomForest::new_regressor(100))
        });
        registry.register("sklearn.ensemble", "RandomForestClassifier", || {
            Box::new(RandomForest::new_classifier(100))
        });
        registry.register("sklearn.tree", "DecisionTreeRegressor", || Box::new(DecisionTree::new_regressor()));
        registry.register("sklearn.tree", "DecisionTreeClassifier", || Box::new(DecisionTree::new_classifier()));
        registry.register("sklearn.linear_model", "LinearRegression", || Box::new(LinearRegression::new()));
        registry.register("sklearn.linear_model", "Ridge", || Box::new(RidgeRegression::default()));
        registry.register("sklearn.linear_model", "Lasso", || Box::new(LassoRegression::default()));
        registry.register("sklearn.linear_model", "LogisticRegression", || Box::new(LogisticRegression::new()));
        registry.register("sklearn.neighbors", "KNeighborsRegressor", || {
            Box::new(KNearestNeighbors::new_regressor(KNNConfig::default()))
        });
        registry.register("sklearn.neighbors", "KNeighborsClassifier", || {
            Box::new(KNearestNeighbors::new_classifier(KNNConfig::default()))
        });
        registry.register("sklearn.dummy", "DummyRegressor", || Box::new(DummyRegressor::default()));
        registry.register("sklearn.dummy", "DummyClassifier", || Box::new(DummyClassifier::default()));
        registry.register("xgboost", "XGBRegressor", || Box::new(XGBoost::new_regressor(XGBoostConfig::default())));
        registry.register("xgboost", "XGBClassifier", || Box::new(XGBoost::new_classifier(XGBoostConfig::default())));

        registry
    }

    /// Add or replace a constructor
    pub fn register(&mut self, module: &str, class: &str, constructor: EstimatorConstructor) -> &mut Self {
        self.constructors.insert((module.to_string(), class.to_string()), constructor);
        self
    }

    pub fn contains(&self, module: &str, class: &str) -> bool {
        self.constructors.contains_key(&(module.to_string(), class.to_string()))
    }

    /// Constructor for `module.class`, or `UnresolvedTarget`
    pub fn resolve(&self, module: &str, class: &str) -> Result<EstimatorConstructor> {
        self.constructors
            .get(&(module.to_string(), class.to_string()))
            .copied()
            .ok_or_else(|| SelectError::UnresolvedTarget {
                kind: "estimator",
                target: qualified_name(module, class),
            })
    }

    /// Build a default instance of `module.class`
    pub fn construct(&self, module: &str, class: &str) -> Result<Box<dyn Estimator>> {
        Ok(self.resolve(module, class)?())
    }

    /// Every registered (module, class) pair, sorted
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.constructors.keys().map(|(m, c)| (m.as_str(), c.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::models::EstimatorKind;

    #[test]
    fn test_defaults_resolve_to_matching_class_names() {
        let registry = EstimatorRegistry::with_defaults();
        for (module, class) in registry.entries() {
            let estimator = registry.construct(module, class).unwrap();
            assert_eq!(estimator.class_name(), class);
        }
        assert_eq!(registry.entries().count(), 14);
    }

    #[test]
    fn test_unknown_target() {
        let registry = EstimatorRegistry::with_defaults();
        let err = registry.construct("sklearn.ensemble", "RandomForestRegresor").unwrap_err();
        match err {
            SelectError::UnresolvedTarget { kind, target } => {
                assert_eq!(kind, "estimator");
                assert_eq!(target, "sklearn.ensemble.RandomForestRegresor");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.construct("sklearn.ensembl", "RandomForestRegressor").is_err());
    }

    #[test]
    fn test_register_custom_constructor() {
        let mut registry = EstimatorRegistry::new();
        registry.register("my.models", "Baseline", || Box::new(DummyRegressor::default()));
        assert!(registry.contains("my.models", "Baseline"));
        let estimator = registry.construct("my.models", "Baseline").unwrap();
        assert_eq!(estimator.kind(), EstimatorKind::Regressor);
    }
}

//! Estimators available to model selection
//!
//! Every estimator implements [`Estimator`] and is reachable from a model
//! config through [`EstimatorRegistry`]:
//! - Decision trees and random forests
//! - Linear models (OLS, Ridge, Lasso, Logistic)
//! - K-Nearest Neighbors
//! - XGBoost-style gradient boosting
//! - Dummy baselines

pub mod metrics;
pub mod models;
pub mod decision_tree;
pub mod random_forest;
pub mod linear_models;
pub mod knn;
pub mod xgboost;
pub mod dummy;
pub mod registry;

pub use models::{Estimator, EstimatorKind};
pub use metrics::{accuracy_score, mean_absolute_error, mean_squared_error, r2_score};
pub use decision_tree::{Criterion, DecisionTree, MaxFeatures, TreeNode};
pub use random_forest::RandomForest;
pub use linear_models::{LassoRegression, LinearRegression, LogisticRegression, RidgeRegression};
pub use knn::{DistanceMetric, KNNConfig, KNearestNeighbors, WeightScheme};
pub use xgboost::{Objective, XGBoost, XGBoostConfig};
pub use dummy::{ClassifierStrategy, DummyClassifier, DummyRegressor, RegressorStrategy};
pub use registry::{qualified_name, EstimatorConstructor, EstimatorRegistry};

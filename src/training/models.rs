//! Estimator trait shared by every registered model

use crate::error::{Result, SelectError};
use crate::params::{ParamValue, Params};
use super::metrics::{accuracy_score, r2_score};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Whether an estimator predicts continuous values or class labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimatorKind {
    Regressor,
    Classifier,
}

/// A constructible, configurable, fittable model.
///
/// Estimators are built unfitted by a registry constructor, configured
/// through [`Estimator::set_param`], then fitted. `clone_unfitted` yields a
/// fresh copy carrying the same parameters, which is what a search strategy
/// fits on each fold.
pub trait Estimator: Debug + Send + Sync {
    /// Class name as written in the model config (e.g. `RandomForestRegressor`)
    fn class_name(&self) -> &'static str;

    fn kind(&self) -> EstimatorKind;

    /// Apply a single named parameter
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()>;

    /// Current value of every settable parameter
    fn get_params(&self) -> Params;

    /// Fit the model to training data
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    /// Make predictions
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Fresh, unfitted copy with identical parameters
    fn clone_unfitted(&self) -> Box<dyn Estimator>;

    /// Serialize the model (fitted state included)
    fn to_bytes(&self) -> Result<Vec<u8>>;

    /// Apply every parameter in `params`, in key order
    fn set_params(&mut self, params: &Params) -> Result<()> {
        for (name, value) in params {
            self.set_param(name, value)?;
        }
        Ok(())
    }

    /// Default score: R² for regressors, accuracy for classifiers
    fn score(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64> {
        let y_pred = self.predict(x)?;
        Ok(match self.kind() {
            EstimatorKind::Regressor => r2_score(y, &y_pred),
            EstimatorKind::Classifier => accuracy_score(y, &y_pred),
        })
    }

    /// Get feature importances (if available)
    fn feature_importances(&self) -> Option<Array1<f64>> {
        None
    }
}

impl Clone for Box<dyn Estimator> {
    fn clone(&self) -> Self {
        self.clone_unfitted()
    }
}

/// Error for a parameter name the estimator does not know
pub(crate) fn unknown_param(class_name: &str, name: &str, value: &ParamValue) -> SelectError {
    SelectError::invalid_param(name, value, format!("not a parameter of {}", class_name))
}

/// Shape check shared by every `fit`
pub(crate) fn check_xy(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(SelectError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if x.nrows() == 0 {
        return Err(SelectError::ValidationError("cannot fit on zero samples".to_string()));
    }
    Ok(())
}

/// Shape check shared by every `predict`
pub(crate) fn check_n_features(expected: usize, x: &Array2<f64>) -> Result<()> {
    if x.ncols() != expected {
        return Err(SelectError::ShapeError {
            expected: format!("{} features", expected),
            actual: format!("{} features", x.ncols()),
        });
    }
    Ok(())
}

/// Sorted distinct labels of a classification target
pub(crate) fn unique_classes(y: &Array1<f64>) -> Vec<f64> {
    let mut classes: Vec<f64> = y.iter().map(|v| v.round()).collect();
    classes.sort_by(|a, b| a.total_cmp(b));
    classes.dedup();
    classes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_check_xy_rejects_mismatch() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0];
        assert!(matches!(check_xy(&x, &y), Err(SelectError::ShapeError { .. })));
    }

    #[test]
    fn test_unique_classes_sorted() {
        let y = array![2.0, 0.0, 1.0, 2.0, 0.0];
        assert_eq!(unique_classes(&y), vec![0.0, 1.0, 2.0]);
    }
}

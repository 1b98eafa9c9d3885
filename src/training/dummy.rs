//! Baseline estimators that ignore the features

use crate::error::{Result, SelectError};
use crate::params::{ParamValue, Params};
use super::models::{check_n_features, check_xy, unique_classes, unknown_param, Estimator, EstimatorKind};
use ndarray::{Array1, Array2};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Prediction rule of a [`DummyRegressor`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RegressorStrategy {
    Mean,
    Median,
    /// Quantile in [0, 1] taken from the `quantile` parameter
    Quantile,
    /// Value taken from the `constant` parameter
    Constant,
}

/// Predicts a single statistic of the training target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DummyRegressor {
    pub strategy: RegressorStrategy,
    pub constant: Option<f64>,
    pub quantile: Option<f64>,
    n_features: usize,
    value: Option<f64>,
}

impl Default for DummyRegressor {
    fn default() -> Self {
        Self {
            strategy: RegressorStrategy::Mean,
            constant: None,
            quantile: None,
            n_features: 0,
            value: None,
        }
    }
}

/// Linear-interpolated quantile of unsorted values
fn quantile_of(values: &Array1<f64>, q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

impl Estimator for DummyRegressor {
    fn class_name(&self) -> &'static str {
        "DummyRegressor"
    }

    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Regressor
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "strategy" => {
                self.strategy = match value.expect_str(name)? {
                    "mean" => RegressorStrategy::Mean,
                    "median" => RegressorStrategy::Median,
                    "quantile" => RegressorStrategy::Quantile,
                    "constant" => RegressorStrategy::Constant,
                    _ => {
                        return Err(SelectError::invalid_param(
                            name,
                            value,
                            "expected mean, median, quantile or constant",
                        ))
                    }
                }
            }
            "constant" => {
                self.constant = if value.is_null() { None } else { Some(value.expect_f64(name)?) }
            }
            "quantile" => {
                self.quantile = if value.is_null() {
                    None
                } else {
                    let q = value.expect_f64(name)?;
                    if !(0.0..=1.0).contains(&q) {
                        return Err(SelectError::invalid_param(name, value, "must be in [0, 1]"));
                    }
                    Some(q)
                }
            }
            _ => return Err(unknown_param(self.class_name(), name, value)),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        let strategy = match self.strategy {
            RegressorStrategy::Mean => "mean",
            RegressorStrategy::Median => "median",
            RegressorStrategy::Quantile => "quantile",
            RegressorStrategy::Constant => "constant",
        };
        let mut params = Params::new();
        params.insert("strategy".into(), strategy.into());
        params.insert("constant".into(), self.constant.into());
        params.insert("quantile".into(), self.quantile.into());
        params
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        let value = match self.strategy {
            RegressorStrategy::Mean => y.mean().unwrap_or(0.0),
            RegressorStrategy::Median => quantile_of(y, 0.5),
            RegressorStrategy::Quantile => {
                let q = self.quantile.ok_or_else(|| {
                    SelectError::ValidationError("strategy 'quantile' requires the quantile parameter".to_string())
                })?;
                quantile_of(y, q)
            }
            RegressorStrategy::Constant => self.constant.ok_or_else(|| {
                SelectError::ValidationError("strategy 'constant' requires the constant parameter".to_string())
            })?,
        };
        self.n_features = x.ncols();
        self.value = Some(value);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let value = self.value.ok_or(SelectError::ModelNotFitted)?;
        check_n_features(self.n_features, x)?;
        Ok(Array1::from_elem(x.nrows(), value))
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        Box::new(Self {
            strategy: self.strategy,
            constant: self.constant,
            quantile: self.quantile,
            ..Default::default()
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Prediction rule of a [`DummyClassifier`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ClassifierStrategy {
    MostFrequent,
    /// Same predictions as most_frequent
    Prior,
    Constant,
    /// Random class drawn from the training distribution
    Stratified,
    /// Random class drawn uniformly
    Uniform,
}

/// Predicts classes without looking at the features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DummyClassifier {
    pub strategy: ClassifierStrategy,
    pub constant: Option<f64>,
    pub random_state: Option<u64>,
    n_features: usize,
    classes: Vec<f64>,
    class_counts: Vec<usize>,
}

impl Default for DummyClassifier {
    fn default() -> Self {
        Self {
            strategy: ClassifierStrategy::Prior,
            constant: None,
            random_state: None,
            n_features: 0,
            classes: Vec::new(),
            class_counts: Vec::new(),
        }
    }
}

impl DummyClassifier {
    fn most_frequent(&self) -> f64 {
        let mut best = 0;
        for (c, &count) in self.class_counts.iter().enumerate() {
            if count > self.class_counts[best] {
                best = c;
            }
        }
        self.classes.get(best).copied().unwrap_or(0.0)
    }
}

impl Estimator for DummyClassifier {
    fn class_name(&self) -> &'static str {
        "DummyClassifier"
    }

    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Classifier
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "strategy" => {
                self.strategy = match value.expect_str(name)? {
                    "most_frequent" => ClassifierStrategy::MostFrequent,
                    "prior" => ClassifierStrategy::Prior,
                    "constant" => ClassifierStrategy::Constant,
                    "stratified" => ClassifierStrategy::Stratified,
                    "uniform" => ClassifierStrategy::Uniform,
                    _ => {
                        return Err(SelectError::invalid_param(
                            name,
                            value,
                            "expected most_frequent, prior, constant, stratified or uniform",
                        ))
                    }
                }
            }
            "constant" => {
                self.constant = if value.is_null() { None } else { Some(value.expect_f64(name)?) }
            }
            "random_state" => self.random_state = value.expect_seed(name)?,
            _ => return Err(unknown_param(self.class_name(), name, value)),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        let strategy = match self.strategy {
            ClassifierStrategy::MostFrequent => "most_frequent",
            ClassifierStrategy::Prior => "prior",
            ClassifierStrategy::Constant => "constant",
            ClassifierStrategy::Stratified => "stratified",
            ClassifierStrategy::Uniform => "uniform",
        };
        let mut params = Params::new();
        params.insert("strategy".into(), strategy.into());
        params.insert("constant".into(), self.constant.into());
        params.insert("random_state".into(), self.random_state.map(|s| s as i64).into());
        params
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        if self.strategy == ClassifierStrategy::Constant && self.constant.is_none() {
            return Err(SelectError::ValidationError(
                "strategy 'constant' requires the constant parameter".to_string(),
            ));
        }
        self.classes = unique_classes(y);
        self.class_counts = vec![0; self.classes.len()];
        for v in y.iter() {
            if let Ok(c) = self.classes.binary_search_by(|cls| cls.total_cmp(&v.round())) {
                self.class_counts[c] += 1;
            }
        }
        self.n_features = x.ncols();
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.classes.is_empty() {
            return Err(SelectError::ModelNotFitted);
        }
        check_n_features(self.n_features, x)?;
        let n = x.nrows();

        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state.unwrap_or_else(rand::random));
        Ok(match self.strategy {
            ClassifierStrategy::MostFrequent | ClassifierStrategy::Prior => {
                Array1::from_elem(n, self.most_frequent())
            }
            ClassifierStrategy::Constant => Array1::from_elem(n, self.constant.unwrap_or(0.0)),
            ClassifierStrategy::Uniform => {
                (0..n).map(|_| self.classes[rng.gen_range(0..self.classes.len())]).collect()
            }
            ClassifierStrategy::Stratified => {
                let dist = WeightedIndex::new(&self.class_counts)
                    .map_err(|e| SelectError::ComputationError(e.to_string()))?;
                (0..n).map(|_| self.classes[dist.sample(&mut rng)]).collect()
            }
        })
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        Box::new(Self {
            strategy: self.strategy,
            constant: self.constant,
            random_state: self.random_state,
            ..Default::default()
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_dummy_regressor_strategies() {
        let x = array![[0.0], [0.0], [0.0], [0.0]];
        let y = array![1.0, 2.0, 3.0, 10.0];

        let mut model = DummyRegressor::default();
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap(), array![4.0, 4.0, 4.0, 4.0]);

        model.set_param("strategy", &"median".into()).unwrap();
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap()[0], 2.5);

        model.set_param("strategy", &"constant".into()).unwrap();
        assert!(model.fit(&x, &y).is_err());
        model.set_param("constant", &ParamValue::Int(7)).unwrap();
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap()[0], 7.0);
    }

    #[test]
    fn test_dummy_regressor_scores_zero_r2() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![1.0, 2.0, 3.0];
        let mut model = DummyRegressor::default();
        model.fit(&x, &y).unwrap();
        assert!(model.score(&x, &y).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_dummy_classifier_most_frequent() {
        let x = array![[0.0], [0.0], [0.0], [0.0], [0.0]];
        let y = array![1.0, 0.0, 1.0, 2.0, 1.0];

        let mut model = DummyClassifier::default();
        model.set_param("strategy", &"most_frequent".into()).unwrap();
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap(), array![1.0, 1.0, 1.0, 1.0, 1.0]);
        assert!((model.score(&x, &y).unwrap() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_dummy_classifier_stratified_is_seeded() {
        let x = Array2::<f64>::zeros((20, 1));
        let y: Array1<f64> = (0..20).map(|i| (i % 2) as f64).collect();

        let mut model = DummyClassifier::default();
        model.set_param("strategy", &"stratified".into()).unwrap();
        model.set_param("random_state", &ParamValue::Int(3)).unwrap();
        model.fit(&x, &y).unwrap();

        let a = model.predict(&x).unwrap();
        let b = model.predict(&x).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|&v| v == 0.0 || v == 1.0));
    }
}

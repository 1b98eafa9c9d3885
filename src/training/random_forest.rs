//! Random Forest implementation

use crate::error::{Result, SelectError};
use crate::params::{ParamValue, Params};
use super::decision_tree::{DecisionTree, MaxFeatures};
use super::models::{check_n_features, check_xy, unique_classes, unknown_param, Estimator, EstimatorKind};
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Random Forest model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    /// Individual trees
    trees: Vec<DecisionTree>,
    /// Number of trees
    pub n_estimators: usize,
    /// Maximum depth per tree
    pub max_depth: Option<usize>,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Features drawn at each split
    pub max_features: MaxFeatures,
    /// Bootstrap sampling
    pub bootstrap: bool,
    /// Criterion name, forwarded to every tree
    pub criterion: ParamValue,
    /// Random state
    pub random_state: Option<u64>,
    /// Accepted for config compatibility; trees are always built on the rayon pool
    pub n_jobs: ParamValue,
    kind: EstimatorKind,
    /// Feature importances
    feature_importances: Option<Array1<f64>>,
    /// Number of features
    n_features: usize,
    /// Classes (for classification)
    classes: Vec<f64>,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new_classifier(100)
    }
}

impl RandomForest {
    /// Create a new classifier forest
    pub fn new_classifier(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            criterion: "gini".into(),
            random_state: None,
            n_jobs: ParamValue::Null,
            kind: EstimatorKind::Classifier,
            feature_importances: None,
            n_features: 0,
            classes: Vec::new(),
        }
    }

    /// Create a new regressor forest
    pub fn new_regressor(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: true,
            criterion: "squared_error".into(),
            random_state: None,
            n_jobs: ParamValue::Null,
            kind: EstimatorKind::Regressor,
            feature_importances: None,
            n_features: 0,
            classes: Vec::new(),
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Set max features strategy
    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    /// Set random state
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    fn tree_template(&self) -> Result<DecisionTree> {
        let mut tree = match self.kind {
            EstimatorKind::Classifier => DecisionTree::new_classifier(),
            EstimatorKind::Regressor => DecisionTree::new_regressor(),
        }
        .with_min_samples_split(self.min_samples_split)
        .with_min_samples_leaf(self.min_samples_leaf)
        .with_max_features(self.max_features);
        tree.max_depth = self.max_depth;
        tree.set_param("criterion", &self.criterion)?;
        Ok(tree)
    }

    /// Fit the forest to training data
    pub fn fit_forest(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        check_xy(x, y)?;
        if self.n_estimators == 0 {
            return Err(SelectError::invalid_param("n_estimators", 0, "must be >= 1"));
        }
        let n_samples = x.nrows();
        self.n_features = x.ncols();

        if self.kind == EstimatorKind::Classifier {
            self.classes = unique_classes(y);
        }

        // One seed per tree, drawn up front so the forest is reproducible under rayon
        let mut seeder = ChaCha8Rng::seed_from_u64(self.random_state.unwrap_or_else(rand::random));
        let seeds: Vec<u64> = (0..self.n_estimators).map(|_| seeder.gen()).collect();
        let template = self.tree_template()?;
        let bootstrap = self.bootstrap;

        let trees = seeds
            .into_par_iter()
            .map(|seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let mut tree = template.clone().with_random_state(rng.gen());

                if bootstrap {
                    let sample_indices: Vec<usize> =
                        (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                    let x_boot = x.select(Axis(0), &sample_indices);
                    let y_boot = y.select(Axis(0), &sample_indices);
                    tree.fit_tree(&x_boot, &y_boot)?;
                } else {
                    tree.fit_tree(x, y)?;
                }
                Ok(tree)
            })
            .collect::<Result<Vec<DecisionTree>>>()?;

        self.trees = trees;
        self.compute_feature_importances();

        Ok(self)
    }

    fn compute_feature_importances(&mut self) {
        let mut total_importances = vec![0.0; self.n_features];

        for tree in &self.trees {
            if let Some(imp) = tree.importances() {
                for (total, &val) in total_importances.iter_mut().zip(imp.iter()) {
                    *total += val;
                }
            }
        }

        let total: f64 = total_importances.iter().sum();
        if total > 0.0 {
            for imp in &mut total_importances {
                *imp /= total;
            }
        }

        self.feature_importances = Some(Array1::from_vec(total_importances));
    }

    fn tree_predictions(&self, x: &Array2<f64>) -> Result<Vec<Array1<f64>>> {
        if self.trees.is_empty() {
            return Err(SelectError::ModelNotFitted);
        }
        check_n_features(self.n_features, x)?;

        self.trees.par_iter().map(|tree| tree.predict_tree(x)).collect()
    }

    /// Make predictions
    pub fn predict_forest(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let all_predictions = self.tree_predictions(x)?;

        match self.kind {
            // Majority vote, smallest class on ties
            EstimatorKind::Classifier => {
                let proba = self.vote_fractions(x.nrows(), &all_predictions);
                Ok(proba
                    .rows()
                    .into_iter()
                    .map(|row| {
                        let mut best = 0;
                        for (c, &p) in row.iter().enumerate() {
                            if p > row[best] {
                                best = c;
                            }
                        }
                        self.classes.get(best).copied().unwrap_or(0.0)
                    })
                    .collect())
            }
            EstimatorKind::Regressor => {
                let mut sum = Array1::<f64>::zeros(x.nrows());
                for preds in &all_predictions {
                    sum += preds;
                }
                Ok(sum / all_predictions.len() as f64)
            }
        }
    }

    /// Predict class probabilities as the fraction of trees voting for each class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.kind != EstimatorKind::Classifier {
            return Err(SelectError::ValidationError(
                "predict_proba is only available for classification".to_string(),
            ));
        }
        let all_predictions = self.tree_predictions(x)?;
        Ok(self.vote_fractions(x.nrows(), &all_predictions))
    }

    fn vote_fractions(&self, n_samples: usize, all_predictions: &[Array1<f64>]) -> Array2<f64> {
        let mut proba = Array2::zeros((n_samples, self.classes.len()));
        for preds in all_predictions {
            for (i, &p) in preds.iter().enumerate() {
                if let Ok(c) = self.classes.binary_search_by(|cls| cls.total_cmp(&p.round())) {
                    proba[[i, c]] += 1.0;
                }
            }
        }
        proba / all_predictions.len().max(1) as f64
    }

    /// Get number of trees
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Estimator for RandomForest {
    fn class_name(&self) -> &'static str {
        match self.kind {
            EstimatorKind::Classifier => "RandomForestClassifier",
            EstimatorKind::Regressor => "RandomForestRegressor",
        }
    }

    fn kind(&self) -> EstimatorKind {
        self.kind
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "n_estimators" => self.n_estimators = value.expect_usize_min(name, 1)?,
            "max_depth" => self.max_depth = value.expect_optional_usize(name)?,
            "min_samples_split" => self.min_samples_split = value.expect_usize_min(name, 2)?,
            "min_samples_leaf" => self.min_samples_leaf = value.expect_usize_min(name, 1)?,
            "max_features" => self.max_features = MaxFeatures::parse(value)?,
            "bootstrap" => self.bootstrap = value.expect_bool(name)?,
            "random_state" => self.random_state = value.expect_seed(name)?,
            "criterion" => {
                // Validate against a tree of the same kind before storing
                let mut scratch = self.tree_template()?;
                scratch.set_param(name, value)?;
                self.criterion = value.clone();
            }
            "n_jobs" => {
                if !value.is_null() && value.as_int().is_none() {
                    return Err(SelectError::invalid_param(name, value, "expected an integer or null"));
                }
                self.n_jobs = value.clone();
            }
            _ => return Err(unknown_param(self.class_name(), name, value)),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("n_estimators".into(), self.n_estimators.into());
        params.insert("max_depth".into(), self.max_depth.into());
        params.insert("min_samples_split".into(), self.min_samples_split.into());
        params.insert("min_samples_leaf".into(), self.min_samples_leaf.into());
        params.insert("max_features".into(), self.max_features.to_param());
        params.insert("bootstrap".into(), self.bootstrap.into());
        params.insert("criterion".into(), self.criterion.clone());
        params.insert("random_state".into(), self.random_state.map(|s| s as i64).into());
        params.insert("n_jobs".into(), self.n_jobs.clone());
        params
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.fit_forest(x, y).map(|_| ())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.predict_forest(x)
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        let mut fresh = self.clone();
        fresh.trees.clear();
        fresh.feature_importances = None;
        fresh.classes.clear();
        fresh.n_features = 0;
        Box::new(fresh)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        self.feature_importances.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_classifier() {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.1],
            [0.2, 0.2],
            [1.0, 1.0],
            [1.1, 1.1],
            [1.2, 1.2],
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];

        let mut rf = RandomForest::new_classifier(10).with_random_state(42);
        rf.fit_forest(&x, &y).unwrap();

        let predictions = rf.predict_forest(&x).unwrap();

        let accuracy = predictions
            .iter()
            .zip(y.iter())
            .filter(|(p, a)| (*p - *a).abs() < 0.5)
            .count() as f64
            / y.len() as f64;

        assert!(accuracy >= 0.8, "Accuracy too low: {}", accuracy);
    }

    #[test]
    fn test_regressor() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0];

        let mut rf = RandomForest::new_regressor(10).with_random_state(42);
        rf.fit_forest(&x, &y).unwrap();

        let predictions = rf.predict_forest(&x).unwrap();

        let mse: f64 = predictions
            .iter()
            .zip(y.iter())
            .map(|(p, a)| (p - a).powi(2))
            .sum::<f64>()
            / y.len() as f64;

        assert!(mse < 2.0, "MSE too high: {}", mse);
    }

    #[test]
    fn test_seeded_forest_is_reproducible() {
        let x = array![[1.0, 5.0], [2.0, 3.0], [3.0, 8.0], [4.0, 1.0], [5.0, 7.0], [6.0, 2.0]];
        let y = array![1.5, 2.0, 3.5, 4.0, 5.5, 6.0];

        let mut a = RandomForest::new_regressor(8).with_random_state(7);
        let mut b = RandomForest::new_regressor(8).with_random_state(7);
        a.fit_forest(&x, &y).unwrap();
        b.fit_forest(&x, &y).unwrap();

        assert_eq!(a.predict_forest(&x).unwrap(), b.predict_forest(&x).unwrap());
    }

    #[test]
    fn test_predict_proba() {
        let x = array![[0.0, 0.0], [1.0, 1.0]];
        let y = array![0.0, 1.0];

        let mut rf = RandomForest::new_classifier(10).with_random_state(42);
        rf.fit_forest(&x, &y).unwrap();

        let proba = rf.predict_proba(&x).unwrap();

        assert_eq!(proba.nrows(), 2);
        assert_eq!(proba.ncols(), 2);
        for i in 0..proba.nrows() {
            let row_sum: f64 = proba.row(i).sum();
            assert!((row_sum - 1.0).abs() < 1e-6, "Row {} sum: {}", i, row_sum);
        }
    }

    #[test]
    fn test_feature_importances() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]];
        let y = array![1.0, 2.0, 3.0, 4.0];

        let mut rf = RandomForest::new_regressor(10).with_random_state(42);
        rf.fit_forest(&x, &y).unwrap();

        let importances = Estimator::feature_importances(&rf).unwrap();
        assert_eq!(importances.len(), 2);
        assert!(importances[0] >= importances[1]);
    }

    #[test]
    fn test_params_round_trip_through_clone() {
        let mut rf = RandomForest::new_regressor(100);
        rf.set_param("n_estimators", &ParamValue::Int(200)).unwrap();
        rf.set_param("max_depth", &ParamValue::Int(5)).unwrap();
        rf.set_param("random_state", &ParamValue::Int(42)).unwrap();

        let fresh = rf.clone_unfitted();
        let params = fresh.get_params();
        assert_eq!(params["n_estimators"], ParamValue::Int(200));
        assert_eq!(params["max_depth"], ParamValue::Int(5));
        assert_eq!(params["random_state"], ParamValue::Int(42));
        assert_eq!(params["max_features"], ParamValue::Null);

        assert!(rf.set_param("criterion", &"gini".into()).is_err());
        assert!(rf.set_param("learning_rate", &ParamValue::Float(0.1)).is_err());
    }
}

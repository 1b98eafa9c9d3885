//! K-Nearest Neighbors implementation
//!
//! KNN classifier and regressor with distance metrics.

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Result, SelectError};
use crate::params::{ParamValue, Params};
use super::models::{check_n_features, check_xy, unique_classes, unknown_param, Estimator, EstimatorKind};

/// Distance metric for KNN
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum DistanceMetric {
    /// Minkowski distance with parameter p (p = 2 is Euclidean)
    #[default]
    Minkowski,
    /// Euclidean distance (L2)
    Euclidean,
    /// Manhattan distance (L1)
    Manhattan,
    /// Cosine similarity (converted to distance)
    Cosine,
}

impl DistanceMetric {
    fn parse(value: &ParamValue) -> Result<Self> {
        match value.expect_str("metric")? {
            "minkowski" => Ok(Self::Minkowski),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "manhattan" | "l1" | "cityblock" => Ok(Self::Manhattan),
            "cosine" => Ok(Self::Cosine),
            _ => Err(SelectError::invalid_param("metric", value, "unsupported distance metric")),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Minkowski => "minkowski",
            Self::Euclidean => "euclidean",
            Self::Manhattan => "manhattan",
            Self::Cosine => "cosine",
        }
    }
}

/// Weighting scheme for neighbors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum WeightScheme {
    /// All neighbors have equal weight
    #[default]
    Uniform,
    /// Closer neighbors have more weight (inverse distance)
    Distance,
}

impl WeightScheme {
    fn weight(&self, dist: f64) -> f64 {
        match self {
            WeightScheme::Uniform => 1.0,
            WeightScheme::Distance => 1.0 / (dist + 1e-10),
        }
    }
}

/// KNN configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNNConfig {
    /// Number of neighbors
    pub n_neighbors: usize,
    /// Distance metric
    pub metric: DistanceMetric,
    /// Minkowski power
    pub p: f64,
    /// Weighting scheme
    pub weights: WeightScheme,
}

impl Default for KNNConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            metric: DistanceMetric::Minkowski,
            p: 2.0,
            weights: WeightScheme::Uniform,
        }
    }
}

/// Stored training set
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Fitted {
    x_train: Array2<f64>,
    y_train: Array1<f64>,
    classes: Vec<f64>,
}

/// K-Nearest Neighbors classifier or regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNearestNeighbors {
    pub config: KNNConfig,
    kind: EstimatorKind,
    fitted: Option<Fitted>,
}

impl KNearestNeighbors {
    pub fn new_classifier(config: KNNConfig) -> Self {
        Self { config, kind: EstimatorKind::Classifier, fitted: None }
    }

    pub fn new_regressor(config: KNNConfig) -> Self {
        Self { config, kind: EstimatorKind::Regressor, fitted: None }
    }

    /// Neighbours of every row in `x`, as (distance, label) pairs
    fn neighbors(&self, x: &Array2<f64>) -> Result<(Vec<Vec<(f64, f64)>>, &Fitted)> {
        let fitted = self.fitted.as_ref().ok_or(SelectError::ModelNotFitted)?;
        check_n_features(fitted.x_train.ncols(), x)?;
        let k = self.config.n_neighbors;
        if k > fitted.x_train.nrows() {
            return Err(SelectError::ValidationError(format!(
                "n_neighbors = {} exceeds the {} training samples",
                k,
                fitted.x_train.nrows()
            )));
        }

        let rows: Vec<ArrayView1<f64>> = x.rows().into_iter().collect();
        let neighbors: Vec<Vec<(f64, f64)>> = rows
            .par_iter()
            .map(|row| find_k_nearest(row, fitted, k, &self.config))
            .collect();
        Ok((neighbors, fitted))
    }

    /// Predict class probabilities (classification only)
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.kind != EstimatorKind::Classifier {
            return Err(SelectError::ValidationError(
                "predict_proba is only available for classification".to_string(),
            ));
        }
        let (neighbors, fitted) = self.neighbors(x)?;
        let n_classes = fitted.classes.len();
        let flat: Vec<f64> = neighbors
            .iter()
            .flat_map(|n| class_probs_from(n, &fitted.classes, self.config.weights))
            .collect();
        Ok(Array2::from_shape_vec((x.nrows(), n_classes), flat)?)
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Max-heap entry for partial sort (keeps k smallest distances, earliest sample on ties)
struct Neighbor {
    dist: f64,
    index: usize,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Neighbor {}
impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.total_cmp(&other.dist).then(self.index.cmp(&other.index))
    }
}

/// Find k nearest neighbors using a max-heap, O(n log k)
fn find_k_nearest(point: &ArrayView1<f64>, fitted: &Fitted, k: usize, config: &KNNConfig) -> Vec<(f64, f64)> {
    let mut heap = BinaryHeap::with_capacity(k + 1);

    for (index, row) in fitted.x_train.rows().into_iter().enumerate() {
        let candidate = Neighbor { dist: compute_distance(point, &row, config), index };
        if heap.len() < k {
            heap.push(candidate);
        } else if heap.peek().map_or(false, |top| candidate < *top) {
            heap.pop();
            heap.push(candidate);
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|n| (n.dist, fitted.y_train[n.index]))
        .collect()
}

/// Compute distance between two points using the configured metric
fn compute_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>, config: &KNNConfig) -> f64 {
    let pairs = a.iter().zip(b.iter());
    match config.metric {
        DistanceMetric::Euclidean => pairs.map(|(ai, bi)| (ai - bi).powi(2)).sum::<f64>().sqrt(),
        DistanceMetric::Manhattan => pairs.map(|(ai, bi)| (ai - bi).abs()).sum(),
        DistanceMetric::Minkowski => {
            let p = config.p;
            pairs.map(|(ai, bi)| (ai - bi).abs().powf(p)).sum::<f64>().powf(1.0 / p)
        }
        DistanceMetric::Cosine => {
            let mut dot = 0.0;
            let mut norm_a = 0.0;
            let mut norm_b = 0.0;
            for (ai, bi) in pairs {
                dot += ai * bi;
                norm_a += ai * ai;
                norm_b += bi * bi;
            }
            let denom = norm_a.sqrt() * norm_b.sqrt();
            if denom > 0.0 { 1.0 - (dot / denom) } else { 1.0 }
        }
    }
}

/// Class probabilities from weighted neighbor votes
fn class_probs_from(neighbors: &[(f64, f64)], classes: &[f64], weights: WeightScheme) -> Vec<f64> {
    let mut counts = vec![0.0; classes.len()];
    let mut total = 0.0;
    for &(dist, label) in neighbors {
        if let Ok(idx) = classes.binary_search_by(|c| c.total_cmp(&label.round())) {
            let w = weights.weight(dist);
            counts[idx] += w;
            total += w;
        }
    }
    if total > 0.0 {
        counts.iter_mut().for_each(|c| *c /= total);
    }
    counts
}

/// Classify by weighted majority vote, smallest class on ties
fn vote_classify(neighbors: &[(f64, f64)], classes: &[f64], weights: WeightScheme) -> f64 {
    let probs = class_probs_from(neighbors, classes, weights);
    let mut best = 0;
    for (c, &p) in probs.iter().enumerate() {
        if p > probs[best] {
            best = c;
        }
    }
    classes.get(best).copied().unwrap_or(0.0)
}

/// Weighted mean of neighbor targets
fn weighted_mean_from(neighbors: &[(f64, f64)], weights: WeightScheme) -> f64 {
    let mut sum = 0.0;
    let mut total = 0.0;
    for &(dist, value) in neighbors {
        let w = weights.weight(dist);
        sum += w * value;
        total += w;
    }
    if total > 0.0 { sum / total } else { 0.0 }
}

impl Estimator for KNearestNeighbors {
    fn class_name(&self) -> &'static str {
        match self.kind {
            EstimatorKind::Classifier => "KNeighborsClassifier",
            EstimatorKind::Regressor => "KNeighborsRegressor",
        }
    }

    fn kind(&self) -> EstimatorKind {
        self.kind
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "n_neighbors" => self.config.n_neighbors = value.expect_usize_min(name, 1)?,
            "metric" => self.config.metric = DistanceMetric::parse(value)?,
            "p" => {
                let p = value.expect_f64(name)?;
                if p < 1.0 {
                    return Err(SelectError::invalid_param(name, value, "must be >= 1"));
                }
                self.config.p = p;
            }
            "weights" => {
                self.config.weights = match value.expect_str(name)? {
                    "uniform" => WeightScheme::Uniform,
                    "distance" => WeightScheme::Distance,
                    _ => return Err(SelectError::invalid_param(name, value, "expected uniform or distance")),
                }
            }
            _ => return Err(unknown_param(self.class_name(), name, value)),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("n_neighbors".into(), self.config.n_neighbors.into());
        params.insert("metric".into(), self.config.metric.as_str().into());
        params.insert("p".into(), self.config.p.into());
        let weights = match self.config.weights {
            WeightScheme::Uniform => "uniform",
            WeightScheme::Distance => "distance",
        };
        params.insert("weights".into(), weights.into());
        params
    }

    /// Stores the training data
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        let classes = match self.kind {
            EstimatorKind::Classifier => unique_classes(y),
            EstimatorKind::Regressor => Vec::new(),
        };
        self.fitted = Some(Fitted { x_train: x.clone(), y_train: y.clone(), classes });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (neighbors, fitted) = self.neighbors(x)?;
        let weights = self.config.weights;
        Ok(neighbors
            .iter()
            .map(|n| match self.kind {
                EstimatorKind::Classifier => vote_classify(n, &fitted.classes, weights),
                EstimatorKind::Regressor => weighted_mean_from(n, weights),
            })
            .collect())
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        Box::new(Self { config: self.config.clone(), kind: self.kind, fitted: None })
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn config(k: usize) -> KNNConfig {
        KNNConfig { n_neighbors: k, ..Default::default() }
    }

    #[test]
    fn test_knn_classifier() {
        let x = array![[0.0, 0.0], [0.1, 0.1], [0.2, 0.0], [5.0, 5.0], [5.1, 5.1], [5.0, 5.2]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];

        let mut knn = KNearestNeighbors::new_classifier(config(3));
        knn.fit(&x, &y).unwrap();

        let predictions = knn.predict(&array![[0.05, 0.05], [5.05, 5.05]]).unwrap();
        assert_eq!(predictions, array![0.0, 1.0]);

        let proba = knn.predict_proba(&array![[0.05, 0.05]]).unwrap();
        assert!((proba[[0, 0]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_knn_regressor() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![10.0, 20.0, 30.0, 40.0, 50.0];

        let mut knn = KNearestNeighbors::new_regressor(config(2));
        knn.fit(&x, &y).unwrap();

        let predictions = knn.predict(&array![[1.4]]).unwrap();
        assert!((predictions[0] - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance_weighting() {
        let x = array![[0.0], [10.0]];
        let y = array![0.0, 100.0];

        let mut knn = KNearestNeighbors::new_regressor(config(2));
        knn.set_param("weights", &"distance".into()).unwrap();
        knn.fit(&x, &y).unwrap();

        let predictions = knn.predict(&array![[1.0]]).unwrap();
        assert!(predictions[0] < 50.0);
    }

    #[test]
    fn test_too_many_neighbors_is_an_error() {
        let mut knn = KNearestNeighbors::new_regressor(config(5));
        knn.fit(&array![[1.0], [2.0]], &array![1.0, 2.0]).unwrap();
        assert!(knn.predict(&array![[1.5]]).is_err());
    }

    #[test]
    fn test_predict_before_fit() {
        let knn = KNearestNeighbors::new_classifier(config(1));
        assert!(matches!(knn.predict(&array![[1.0]]), Err(SelectError::ModelNotFitted)));
    }
}

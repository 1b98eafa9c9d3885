//! Decision tree implementation

use crate::error::{Result, SelectError};
use crate::params::{ParamValue, Params};
use super::models::{check_n_features, check_xy, unique_classes, unknown_param, Estimator, EstimatorKind};
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with prediction value
    Leaf {
        value: f64,
        n_samples: usize,
    },
    /// Internal node with split
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
    },
}

/// Impurity criterion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Criterion {
    /// Gini impurity (classification)
    Gini,
    /// Entropy (classification)
    Entropy,
    /// Squared error (regression)
    SquaredError,
}

impl Criterion {
    fn parse(kind: EstimatorKind, value: &ParamValue) -> Result<Self> {
        let name = value.expect_str("criterion")?;
        match (kind, name) {
            (EstimatorKind::Classifier, "gini") => Ok(Criterion::Gini),
            (EstimatorKind::Classifier, "entropy" | "log_loss") => Ok(Criterion::Entropy),
            (EstimatorKind::Regressor, "squared_error" | "friedman_mse" | "mse") => {
                Ok(Criterion::SquaredError)
            }
            _ => Err(SelectError::invalid_param(
                "criterion",
                value,
                "unsupported criterion for this estimator",
            )),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Criterion::Gini => "gini",
            Criterion::Entropy => "entropy",
            Criterion::SquaredError => "squared_error",
        }
    }
}

/// Strategy for the number of features considered at each split
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum MaxFeatures {
    /// Square root of n_features
    Sqrt,
    /// Log2 of n_features
    Log2,
    /// Fraction of n_features
    Fraction(f64),
    /// Fixed number
    Fixed(usize),
    /// All features
    All,
}

impl MaxFeatures {
    /// Parse the `max_features` parameter (`null`, `sqrt`, `log2`, int or float)
    pub fn parse(value: &ParamValue) -> Result<Self> {
        match value {
            ParamValue::Null => Ok(MaxFeatures::All),
            ParamValue::String(s) => match s.as_str() {
                "sqrt" | "auto" => Ok(MaxFeatures::Sqrt),
                "log2" => Ok(MaxFeatures::Log2),
                _ => Err(SelectError::invalid_param(
                    "max_features",
                    value,
                    "expected sqrt, log2, null or a number",
                )),
            },
            ParamValue::Int(_) => value.expect_usize_min("max_features", 1).map(MaxFeatures::Fixed),
            ParamValue::Float(_) => value.expect_fraction("max_features").map(MaxFeatures::Fraction),
            ParamValue::Bool(_) => Err(SelectError::invalid_param(
                "max_features",
                value,
                "expected sqrt, log2, null or a number",
            )),
        }
    }

    /// Number of features to draw, always within `1..=n_features`
    pub fn resolve(&self, n_features: usize) -> usize {
        match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().floor() as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).floor() as usize,
            MaxFeatures::Fixed(n) => *n,
            MaxFeatures::All => n_features,
        }
        .clamp(1, n_features.max(1))
    }

    pub fn to_param(&self) -> ParamValue {
        match self {
            MaxFeatures::Sqrt => "sqrt".into(),
            MaxFeatures::Log2 => "log2".into(),
            MaxFeatures::Fraction(f) => (*f).into(),
            MaxFeatures::Fixed(n) => (*n).into(),
            MaxFeatures::All => ParamValue::Null,
        }
    }
}

/// Decision tree model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Tree root
    root: Option<TreeNode>,
    /// Maximum depth
    pub max_depth: Option<usize>,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Maximum features to consider per split
    pub max_features: MaxFeatures,
    /// Impurity criterion
    pub criterion: Criterion,
    /// Seed for feature sub-sampling
    pub random_state: Option<u64>,
    kind: EstimatorKind,
    /// Number of features
    n_features: usize,
    /// Feature importances
    feature_importances: Option<Array1<f64>>,
    /// Classes (for classification)
    classes: Vec<f64>,
}

/// Training targets as seen by the split search
enum Targets<'a> {
    Values(ArrayView1<'a, f64>),
    Classes { labels: Vec<usize>, n_classes: usize },
}

/// Best split found for a node
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new_classifier()
    }
}

impl DecisionTree {
    fn with_kind(kind: EstimatorKind) -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            criterion: match kind {
                EstimatorKind::Classifier => Criterion::Gini,
                EstimatorKind::Regressor => Criterion::SquaredError,
            },
            random_state: None,
            kind,
            n_features: 0,
            feature_importances: None,
            classes: Vec::new(),
        }
    }

    /// Create a new classifier tree
    pub fn new_classifier() -> Self {
        Self::with_kind(EstimatorKind::Classifier)
    }

    /// Create a new regressor tree
    pub fn new_regressor() -> Self {
        Self::with_kind(EstimatorKind::Regressor)
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Set minimum samples to split
    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples;
        self
    }

    /// Set minimum samples in leaf
    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples;
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

    /// Fit the tree to training data
    pub fn fit_tree(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        check_xy(x, y)?;
        let n_samples = x.nrows();
        let n_features = x.ncols();
        self.n_features = n_features;

        let targets = match self.kind {
            EstimatorKind::Classifier => {
                self.classes = unique_classes(y);
                let labels = y
                    .iter()
                    .map(|v| class_index(&self.classes, *v))
                    .collect::<Result<Vec<_>>>()?;
                Targets::Classes { labels, n_classes: self.classes.len() }
            }
            EstimatorKind::Regressor => Targets::Values(y.view()),
        };

        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state.unwrap_or_else(rand::random));
        let mut importances = vec![0.0; n_features];
        let mut indices: Vec<usize> = (0..n_samples).collect();

        let root = self.build_tree(x, &targets, &mut indices, 0, &mut importances, &mut rng);
        self.root = Some(root);

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }
        self.feature_importances = Some(Array1::from_vec(importances));

        Ok(self)
    }

    fn build_tree(
        &self,
        x: &Array2<f64>,
        targets: &Targets<'_>,
        indices: &mut [usize],
        depth: usize,
        importances: &mut [f64],
        rng: &mut ChaCha8Rng,
    ) -> TreeNode {
        let n_samples = indices.len();
        let leaf = TreeNode::Leaf {
            value: self.leaf_value(targets, indices),
            n_samples,
        };

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d)
            || is_pure(targets, indices);
        if should_stop {
            return leaf;
        }

        let Some(split) = self.find_best_split(x, targets, indices, rng) else {
            return leaf;
        };
        importances[split.feature_idx] += split.gain;

        // Partition in place: left block holds samples <= threshold
        let mut boundary = 0;
        for i in 0..indices.len() {
            if x[[indices[i], split.feature_idx]] <= split.threshold {
                indices.swap(i, boundary);
                boundary += 1;
            }
        }
        let (left_idx, right_idx) = indices.split_at_mut(boundary);

        let left = Box::new(self.build_tree(x, targets, left_idx, depth + 1, importances, rng));
        let right = Box::new(self.build_tree(x, targets, right_idx, depth + 1, importances, rng));

        TreeNode::Split {
            feature_idx: split.feature_idx,
            threshold: split.threshold,
            left,
            right,
            n_samples,
        }
    }

    fn find_best_split(
        &self,
        x: &Array2<f64>,
        targets: &Targets<'_>,
        indices: &[usize],
        rng: &mut ChaCha8Rng,
    ) -> Option<SplitCandidate> {
        let n_features = x.ncols();
        let n_try = self.max_features.resolve(n_features);
        let features: Vec<usize> = if n_try >= n_features {
            (0..n_features).collect()
        } else {
            rand::seq::index::sample(rng, n_features, n_try).into_vec()
        };

        let parent = node_impurity(self.criterion, targets, indices);

        // Each feature is scanned independently; ties keep the earliest drawn feature
        let per_feature: Vec<Option<SplitCandidate>> = features
            .par_iter()
            .map(|&feature_idx| self.best_split_for_feature(x, targets, indices, feature_idx, parent))
            .collect();

        let mut best: Option<SplitCandidate> = None;
        for candidate in per_feature.into_iter().flatten() {
            if best.as_ref().map_or(true, |b| candidate.gain > b.gain) {
                best = Some(candidate);
            }
        }
        best
    }

    /// Sorted sweep over one feature; impurities are kept as `n * impurity`
    fn best_split_for_feature(
        &self,
        x: &Array2<f64>,
        targets: &Targets<'_>,
        indices: &[usize],
        feature_idx: usize,
        parent: f64,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        if n < 2 {
            return None;
        }
        let mut order: Vec<(f64, usize)> = indices.iter().map(|&i| (x[[i, feature_idx]], i)).collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut best_gain = 1e-12;
        let mut best_threshold = None;

        match targets {
            Targets::Values(y) => {
                let total_sum: f64 = order.iter().map(|&(_, i)| y[i]).sum();
                let total_sq: f64 = order.iter().map(|&(_, i)| y[i] * y[i]).sum();
                let mut left_sum = 0.0;
                let mut left_sq = 0.0;

                for pos in 0..n - 1 {
                    let yi = y[order[pos].1];
                    left_sum += yi;
                    left_sq += yi * yi;
                    let n_left = pos + 1;
                    let n_right = n - n_left;
                    if order[pos].0 == order[pos + 1].0
                        || n_left < self.min_samples_leaf
                        || n_right < self.min_samples_leaf
                    {
                        continue;
                    }
                    let sse_left = left_sq - left_sum * left_sum / n_left as f64;
                    let right_sum = total_sum - left_sum;
                    let sse_right = (total_sq - left_sq) - right_sum * right_sum / n_right as f64;
                    let gain = parent - (sse_left + sse_right);
                    if gain > best_gain {
                        best_gain = gain;
                        best_threshold = Some((order[pos].0 + order[pos + 1].0) / 2.0);
                    }
                }
            }
            Targets::Classes { labels, n_classes } => {
                let mut total = vec![0usize; *n_classes];
                for &(_, i) in &order {
                    total[labels[i]] += 1;
                }
                let mut left = vec![0usize; *n_classes];
                let mut right = total;

                for pos in 0..n - 1 {
                    let label = labels[order[pos].1];
                    left[label] += 1;
                    right[label] -= 1;
                    let n_left = pos + 1;
                    let n_right = n - n_left;
                    if order[pos].0 == order[pos + 1].0
                        || n_left < self.min_samples_leaf
                        || n_right < self.min_samples_leaf
                    {
                        continue;
                    }
                    let children = class_impurity(self.criterion, &left, n_left)
                        + class_impurity(self.criterion, &right, n_right);
                    let gain = parent - children;
                    if gain > best_gain {
                        best_gain = gain;
                        best_threshold = Some((order[pos].0 + order[pos + 1].0) / 2.0);
                    }
                }
            }
        }

        best_threshold.map(|threshold| SplitCandidate {
            feature_idx,
            threshold,
            gain: best_gain,
        })
    }

    fn leaf_value(&self, targets: &Targets<'_>, indices: &[usize]) -> f64 {
        if indices.is_empty() {
            return 0.0;
        }
        match targets {
            Targets::Values(y) => indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64,
            Targets::Classes { labels, n_classes } => {
                let mut counts = vec![0usize; *n_classes];
                for &i in indices {
                    counts[labels[i]] += 1;
                }
                // Most frequent class, smallest label on ties
                let mut best = 0;
                for (c, &count) in counts.iter().enumerate() {
                    if count > counts[best] {
                        best = c;
                    }
                }
                self.classes.get(best).copied().unwrap_or(0.0)
            }
        }
    }

    /// Make predictions
    pub fn predict_tree(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(SelectError::ModelNotFitted)?;
        check_n_features(self.n_features, x)?;

        Ok(x.rows().into_iter().map(|row| predict_sample(root, &row)).collect())
    }

    /// Get tree depth
    pub fn get_depth(&self) -> usize {
        self.root.as_ref().map_or(0, node_depth)
    }

    /// Get number of leaves
    pub fn get_n_leaves(&self) -> usize {
        self.root.as_ref().map_or(0, count_leaves)
    }

    pub(crate) fn importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }
}

fn class_index(classes: &[f64], value: f64) -> Result<usize> {
    classes
        .binary_search_by(|c| c.total_cmp(&value.round()))
        .map_err(|_| SelectError::ComputationError(format!("unknown class label {}", value)))
}

fn class_impurity(criterion: Criterion, counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let nf = n as f64;
    match criterion {
        Criterion::Entropy => -counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| c as f64 * (c as f64 / nf).ln())
            .sum::<f64>(),
        _ => nf - counts.iter().map(|&c| (c * c) as f64).sum::<f64>() / nf,
    }
}

fn node_impurity(criterion: Criterion, targets: &Targets<'_>, indices: &[usize]) -> f64 {
    match targets {
        Targets::Values(y) => {
            let n = indices.len() as f64;
            let sum: f64 = indices.iter().map(|&i| y[i]).sum();
            let sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
            sq - sum * sum / n
        }
        Targets::Classes { labels, n_classes } => {
            let mut counts = vec![0usize; *n_classes];
            for &i in indices {
                counts[labels[i]] += 1;
            }
            class_impurity(criterion, &counts, indices.len())
        }
    }
}

fn is_pure(targets: &Targets<'_>, indices: &[usize]) -> bool {
    let Some(&first) = indices.first() else {
        return true;
    };
    match targets {
        Targets::Values(y) => indices.iter().all(|&i| (y[i] - y[first]).abs() < 1e-10),
        Targets::Classes { labels, .. } => indices.iter().all(|&i| labels[i] == labels[first]),
    }
}

fn predict_sample(node: &TreeNode, sample: &ArrayView1<f64>) -> f64 {
    match node {
        TreeNode::Leaf { value, .. } => *value,
        TreeNode::Split { feature_idx, threshold, left, right, .. } => {
            if sample[*feature_idx] <= *threshold {
                predict_sample(left, sample)
            } else {
                predict_sample(right, sample)
            }
        }
    }
}

fn node_depth(node: &TreeNode) -> usize {
    match node {
        TreeNode::Leaf { .. } => 1,
        TreeNode::Split { left, right, .. } => 1 + node_depth(left).max(node_depth(right)),
    }
}

fn count_leaves(node: &TreeNode) -> usize {
    match node {
        TreeNode::Leaf { .. } => 1,
        TreeNode::Split { left, right, .. } => count_leaves(left) + count_leaves(right),
    }
}

impl Estimator for DecisionTree {
    fn class_name(&self) -> &'static str {
        match self.kind {
            EstimatorKind::Classifier => "DecisionTreeClassifier",
            EstimatorKind::Regressor => "DecisionTreeRegressor",
        }
    }

    fn kind(&self) -> EstimatorKind {
        self.kind
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "max_depth" => self.max_depth = value.expect_optional_usize(name)?,
            "min_samples_split" => self.min_samples_split = value.expect_usize_min(name, 2)?,
            "min_samples_leaf" => self.min_samples_leaf = value.expect_usize_min(name, 1)?,
            "max_features" => self.max_features = MaxFeatures::parse(value)?,
            "criterion" => self.criterion = Criterion::parse(self.kind, value)?,
            "random_state" => self.random_state = value.expect_seed(name)?,
            _ => return Err(unknown_param(self.class_name(), name, value)),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("max_depth".into(), self.max_depth.into());
        params.insert("min_samples_split".into(), self.min_samples_split.into());
        params.insert("min_samples_leaf".into(), self.min_samples_leaf.into());
        params.insert("max_features".into(), self.max_features.to_param());
        params.insert("criterion".into(), self.criterion.as_str().into());
        params.insert("random_state".into(), self.random_state.map(|s| s as i64).into());
        params
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.fit_tree(x, y).map(|_| ())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.predict_tree(x)
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        let mut fresh = Self::with_kind(self.kind);
        fresh.max_depth = self.max_depth;
        fresh.min_samples_split = self.min_samples_split;
        fresh.min_samples_leaf = self.min_samples_leaf;
        fresh.max_features = self.max_features;
        fresh.criterion = self.criterion;
        fresh.random_state = self.random_state;
        Box::new(fresh)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        self.feature_importances.clone()
    }
}

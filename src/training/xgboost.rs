//! XGBoost-style gradient boosting with second-order approximation
//!
//! - Uses both gradient (first derivative) and hessian (second derivative) of loss
//! - Regularized leaf weights: w* = -G / (H + lambda)
//! - Gain-based split scoring: Gain = 0.5 * [GL²/(HL+λ) + GR²/(HR+λ) - (GL+GR)²/(HL+HR+λ)] - γ
//! - Built-in L1 (alpha) and L2 (lambda) regularization
//! - Minimum child weight constraint
//!
//! Exposed as `xgboost.XGBRegressor` and `xgboost.XGBClassifier`.

use crate::error::{Result, SelectError};
use crate::params::{ParamValue, Params};
use super::models::{check_n_features, check_xy, unique_classes, unknown_param, Estimator, EstimatorKind};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Training objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// `reg:squarederror`
    SquaredError,
    /// `binary:logistic`
    BinaryLogistic,
    /// `multi:softprob`, also accepted as `multi:softmax`
    MultiSoftprob,
}

impl Objective {
    fn parse(kind: EstimatorKind, value: &ParamValue) -> Result<Self> {
        let name = value.expect_str("objective")?;
        match (kind, name) {
            (EstimatorKind::Regressor, "reg:squarederror" | "reg:linear") => Ok(Objective::SquaredError),
            (EstimatorKind::Classifier, "binary:logistic") => Ok(Objective::BinaryLogistic),
            (EstimatorKind::Classifier, "multi:softprob" | "multi:softmax") => Ok(Objective::MultiSoftprob),
            _ => Err(SelectError::invalid_param(
                "objective",
                value,
                "unsupported objective for this estimator",
            )),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Objective::SquaredError => "reg:squarederror",
            Objective::BinaryLogistic => "binary:logistic",
            Objective::MultiSoftprob => "multi:softprob",
        }
    }
}

/// XGBoost configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub reg_lambda: f64,
    /// L1 regularization on leaf weights
    pub reg_alpha: f64,
    /// Minimum loss reduction to make a split (gamma)
    pub gamma: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub random_state: Option<u64>,
}

impl Default for XGBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            gamma: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            random_state: Some(0),
        }
    }
}

/// A single node in the XGBoost tree
#[derive(Debug, Clone, Serialize, Deserialize)]
enum XGBNode {
    Leaf { weight: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<XGBNode>,
        right: Box<XGBNode>,
    },
}

impl XGBNode {
    fn predict(&self, sample: &ArrayView1<f64>) -> f64 {
        match self {
            XGBNode::Leaf { weight } => *weight,
            XGBNode::Split { feature, threshold, left, right } => {
                if sample[*feature] <= *threshold {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }
}

/// Build an XGBoost tree using exact greedy split finding
fn build_xgb_tree(
    x: &Array2<f64>,
    grad: &Array1<f64>,
    hess: &Array1<f64>,
    indices: &[usize],
    feature_indices: &[usize],
    depth: usize,
    config: &XGBoostConfig,
) -> XGBNode {
    let n = indices.len();

    let g_sum: f64 = indices.iter().map(|&i| grad[i]).sum();
    let h_sum: f64 = indices.iter().map(|&i| hess[i]).sum();
    let leaf_weight = compute_leaf_weight(g_sum, h_sum, config.reg_lambda, config.reg_alpha);

    if depth >= config.max_depth || n < 2 || h_sum < config.min_child_weight {
        return XGBNode::Leaf { weight: leaf_weight };
    }

    // Features are scanned in parallel; the first feature wins on equal gain
    let candidates: Vec<Option<(usize, f64, f64)>> = feature_indices
        .par_iter()
        .map(|&f| find_best_split_for_feature(x, grad, hess, indices, f, config))
        .collect();
    let mut best_split: Option<(usize, f64, f64)> = None;
    for candidate in candidates.into_iter().flatten() {
        if best_split.map_or(true, |b| candidate.2 > b.2) {
            best_split = Some(candidate);
        }
    }

    match best_split {
        Some((feature, threshold, gain)) if gain > config.gamma => {
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
                indices.iter().partition(|&&i| x[[i, feature]] <= threshold);

            if left_idx.is_empty() || right_idx.is_empty() {
                return XGBNode::Leaf { weight: leaf_weight };
            }

            let left = build_xgb_tree(x, grad, hess, &left_idx, feature_indices, depth + 1, config);
            let right = build_xgb_tree(x, grad, hess, &right_idx, feature_indices, depth + 1, config);

            XGBNode::Split {
                feature,
                threshold,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        _ => XGBNode::Leaf { weight: leaf_weight },
    }
}

/// Optimal leaf weight with L1 (alpha) and L2 (lambda) regularization
fn compute_leaf_weight(g_sum: f64, h_sum: f64, lambda: f64, alpha: f64) -> f64 {
    let g_adj = if g_sum > alpha {
        g_sum - alpha
    } else if g_sum < -alpha {
        g_sum + alpha
    } else {
        return 0.0;
    };
    -g_adj / (h_sum + lambda)
}

/// Best (feature, threshold, gain) for a single feature using the exact greedy method
fn find_best_split_for_feature(
    x: &Array2<f64>,
    grad: &Array1<f64>,
    hess: &Array1<f64>,
    indices: &[usize],
    feature: usize,
    config: &XGBoostConfig,
) -> Option<(usize, f64, f64)> {
    let mut sorted_indices: Vec<usize> = indices.to_vec();
    sorted_indices.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

    let g_total: f64 = sorted_indices.iter().map(|&i| grad[i]).sum();
    let h_total: f64 = sorted_indices.iter().map(|&i| hess[i]).sum();
    let lambda = config.reg_lambda;

    let mut g_left = 0.0;
    let mut h_left = 0.0;
    let mut best: Option<(f64, f64)> = None;

    for pos in 0..sorted_indices.len().saturating_sub(1) {
        let idx = sorted_indices[pos];
        let next_idx = sorted_indices[pos + 1];
        g_left += grad[idx];
        h_left += hess[idx];

        // No threshold separates identical values
        if x[[idx, feature]] == x[[next_idx, feature]] {
            continue;
        }

        let g_right = g_total - g_left;
        let h_right = h_total - h_left;
        if h_left < config.min_child_weight || h_right < config.min_child_weight {
            continue;
        }

        let gain = 0.5
            * ((g_left * g_left) / (h_left + lambda) + (g_right * g_right) / (h_right + lambda)
                - (g_total * g_total) / (h_total + lambda));

        if best.map_or(true, |(g, _)| gain > g) {
            let threshold = (x[[idx, feature]] + x[[next_idx, feature]]) / 2.0;
            best = Some((gain, threshold));
        }
    }

    best.map(|(gain, threshold)| (feature, threshold, gain))
}

fn subsample(rng: &mut Xoshiro256PlusPlus, n: usize, ratio: f64) -> Vec<usize> {
    if ratio >= 1.0 {
        return (0..n).collect();
    }
    let k = (((n as f64) * ratio).ceil() as usize).max(1);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(k);
    indices.sort_unstable();
    indices
}

/// Compute split-count importances from XGBNode trees
fn xgb_tree_importances(trees: &[XGBNode], n_features: usize) -> Array1<f64> {
    let mut counts = vec![0.0f64; n_features];
    for tree in trees {
        xgb_count_splits(tree, &mut counts);
    }
    let total: f64 = counts.iter().sum();
    if total > 0.0 {
        for c in counts.iter_mut() {
            *c /= total;
        }
    }
    Array1::from_vec(counts)
}

fn xgb_count_splits(node: &XGBNode, counts: &mut [f64]) {
    if let XGBNode::Split { feature, left, right, .. } = node {
        if let Some(c) = counts.get_mut(*feature) {
            *c += 1.0;
        }
        xgb_count_splits(left, counts);
        xgb_count_splits(right, counts);
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Row-wise softmax in place
fn softmax_rows(raw: &mut Array2<f64>) {
    for mut row in raw.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row /= total;
    }
}

/// Fitted boosting state. `trees[round][output]` with one output per
/// class for softprob and a single output otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Booster {
    trees: Vec<Vec<XGBNode>>,
    base_score: Vec<f64>,
    classes: Vec<f64>,
    n_features: usize,
    /// Objective actually trained; binary logistic widens to softprob on >2 classes
    objective: Objective,
}

/// XGBoost regressor or classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoost {
    pub config: XGBoostConfig,
    pub objective: Objective,
    /// Accepted for config compatibility; split search always runs on the rayon pool
    n_jobs: ParamValue,
    verbosity: ParamValue,
    kind: EstimatorKind,
    booster: Option<Booster>,
}

impl XGBoost {
    pub fn new_regressor(config: XGBoostConfig) -> Self {
        Self {
            config,
            objective: Objective::SquaredError,
            n_jobs: ParamValue::Null,
            verbosity: ParamValue::Null,
            kind: EstimatorKind::Regressor,
            booster: None,
        }
    }

    pub fn new_classifier(config: XGBoostConfig) -> Self {
        Self {
            config,
            objective: Objective::BinaryLogistic,
            n_jobs: ParamValue::Null,
            verbosity: ParamValue::Null,
            kind: EstimatorKind::Classifier,
            booster: None,
        }
    }

    /// Raw margin per sample and output
    fn raw_scores(&self, x: &Array2<f64>) -> Result<(Array2<f64>, &Booster)> {
        let booster = self.booster.as_ref().ok_or(SelectError::ModelNotFitted)?;
        check_n_features(booster.n_features, x)?;

        let n_outputs = booster.base_score.len();
        let mut raw = Array2::<f64>::zeros((x.nrows(), n_outputs));
        for (k, &base) in booster.base_score.iter().enumerate() {
            raw.column_mut(k).fill(base);
        }
        for (i, sample) in x.rows().into_iter().enumerate() {
            for round in &booster.trees {
                for (k, tree) in round.iter().enumerate() {
                    raw[[i, k]] += self.config.learning_rate * tree.predict(&sample);
                }
            }
        }
        Ok((raw, booster))
    }

    /// Class probabilities, one column per class (classification only)
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.kind != EstimatorKind::Classifier {
            return Err(SelectError::ValidationError(
                "predict_proba is only available for classification".to_string(),
            ));
        }
        let (mut raw, _) = self.raw_scores(x)?;
        if raw.ncols() == 1 {
            let positive = raw.column(0).mapv(sigmoid);
            let mut proba = Array2::<f64>::zeros((x.nrows(), 2));
            proba.column_mut(0).assign(&positive.mapv(|p| 1.0 - p));
            proba.column_mut(1).assign(&positive);
            return Ok(proba);
        }
        softmax_rows(&mut raw);
        Ok(raw)
    }

    fn boost(
        &self,
        x: &Array2<f64>,
        targets: &Array2<f64>,
        base_score: &[f64],
        objective: Objective,
    ) -> Vec<Vec<XGBNode>> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        let n_outputs = base_score.len();

        let mut raw = Array2::<f64>::zeros((n_samples, n_outputs));
        for (k, &base) in base_score.iter().enumerate() {
            raw.column_mut(k).fill(base);
        }

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        let mut rounds = Vec::with_capacity(self.config.n_estimators);
        for _ in 0..self.config.n_estimators {
            let row_indices = subsample(&mut rng, n_samples, self.config.subsample);
            let col_indices = subsample(&mut rng, n_features, self.config.colsample_bytree);

            let probs = match objective {
                Objective::SquaredError => raw.clone(),
                Objective::BinaryLogistic => raw.mapv(sigmoid),
                Objective::MultiSoftprob => {
                    let mut p = raw.clone();
                    softmax_rows(&mut p);
                    p
                }
            };

            let mut round = Vec::with_capacity(n_outputs);
            for k in 0..n_outputs {
                let p = probs.column(k);
                let grad: Array1<f64> = &p - &targets.column(k);
                let hess: Array1<f64> = match objective {
                    // Squared error: grad = pred - y, hess = 1
                    Objective::SquaredError => Array1::from_elem(n_samples, 1.0),
                    // Logistic / softmax: grad = p - y, hess = p * (1 - p)
                    _ => p.mapv(|p| (p * (1.0 - p)).max(1e-7)),
                };
                round.push(build_xgb_tree(x, &grad, &hess, &row_indices, &col_indices, 0, &self.config));
            }

            for (i, sample) in x.rows().into_iter().enumerate() {
                for (k, tree) in round.iter().enumerate() {
                    raw[[i, k]] += self.config.learning_rate * tree.predict(&sample);
                }
            }
            rounds.push(round);
        }
        rounds
    }
}

impl Estimator for XGBoost {
    fn class_name(&self) -> &'static str {
        match self.kind {
            EstimatorKind::Classifier => "XGBClassifier",
            EstimatorKind::Regressor => "XGBRegressor",
        }
    }

    fn kind(&self) -> EstimatorKind {
        self.kind
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let config = &mut self.config;
        match name {
            "n_estimators" => config.n_estimators = value.expect_usize_min(name, 1)?,
            "learning_rate" | "eta" => {
                let lr = value.expect_f64(name)?;
                if lr <= 0.0 {
                    return Err(SelectError::invalid_param(name, value, "must be > 0"));
                }
                config.learning_rate = lr;
            }
            "max_depth" => config.max_depth = value.expect_usize(name)?,
            "min_child_weight" => config.min_child_weight = value.expect_non_negative(name)?,
            "reg_lambda" | "lambda" => config.reg_lambda = value.expect_non_negative(name)?,
            "reg_alpha" | "alpha" => config.reg_alpha = value.expect_non_negative(name)?,
            "gamma" => config.gamma = value.expect_non_negative(name)?,
            "subsample" => config.subsample = value.expect_fraction(name)?,
            "colsample_bytree" => config.colsample_bytree = value.expect_fraction(name)?,
            "random_state" | "seed" => config.random_state = value.expect_seed(name)?,
            "objective" => self.objective = Objective::parse(self.kind, value)?,
            "n_jobs" => self.n_jobs = value.clone(),
            "verbosity" => self.verbosity = value.clone(),
            _ => return Err(unknown_param(self.class_name(), name, value)),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        let c = &self.config;
        let mut params = Params::new();
        params.insert("n_estimators".into(), c.n_estimators.into());
        params.insert("learning_rate".into(), c.learning_rate.into());
        params.insert("max_depth".into(), c.max_depth.into());
        params.insert("min_child_weight".into(), c.min_child_weight.into());
        params.insert("reg_lambda".into(), c.reg_lambda.into());
        params.insert("reg_alpha".into(), c.reg_alpha.into());
        params.insert("gamma".into(), c.gamma.into());
        params.insert("subsample".into(), c.subsample.into());
        params.insert("colsample_bytree".into(), c.colsample_bytree.into());
        params.insert("random_state".into(), c.random_state.map(|s| s as i64).into());
        params.insert("objective".into(), self.objective.as_str().into());
        params.insert("n_jobs".into(), self.n_jobs.clone());
        params.insert("verbosity".into(), self.verbosity.clone());
        params
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        let n_samples = x.nrows();

        let mut objective = self.objective;
        let (targets, base_score, classes) = match self.kind {
            EstimatorKind::Regressor => {
                let base = y.mean().unwrap_or(0.0);
                (y.clone().insert_axis(Axis(1)), vec![base], Vec::new())
            }
            EstimatorKind::Classifier => {
                let classes = unique_classes(y);
                if classes.len() < 2 {
                    return Err(SelectError::ValidationError(format!(
                        "{} needs at least 2 classes, got {}",
                        self.class_name(),
                        classes.len()
                    )));
                }
                if classes.len() > 2 && objective == Objective::BinaryLogistic {
                    objective = Objective::MultiSoftprob;
                }

                let mut one_hot = Array2::<f64>::zeros((n_samples, classes.len()));
                for (i, &v) in y.iter().enumerate() {
                    if let Ok(c) = classes.binary_search_by(|cls| cls.total_cmp(&v.round())) {
                        one_hot[[i, c]] = 1.0;
                    }
                }

                if objective == Objective::BinaryLogistic {
                    // Base score in log-odds space of the positive class
                    let p = one_hot.column(1).mean().unwrap_or(0.5).clamp(1e-7, 1.0 - 1e-7);
                    let positive = one_hot.column(1).to_owned().insert_axis(Axis(1));
                    (positive, vec![(p / (1.0 - p)).ln()], classes)
                } else {
                    let base = vec![0.0; classes.len()];
                    (one_hot, base, classes)
                }
            }
        };

        let trees = self.boost(x, &targets, &base_score, objective);
        self.booster = Some(Booster {
            trees,
            base_score,
            classes,
            n_features: x.ncols(),
            objective,
        });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self.kind {
            EstimatorKind::Regressor => {
                let (raw, _) = self.raw_scores(x)?;
                Ok(raw.column(0).to_owned())
            }
            EstimatorKind::Classifier => {
                let proba = self.predict_proba(x)?;
                let booster = self.booster.as_ref().ok_or(SelectError::ModelNotFitted)?;
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
                        booster.classes[best]
                    })
                    .collect())
            }
        }
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        let mut fresh = self.clone();
        fresh.booster = None;
        Box::new(fresh)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Split-count importances across all trees
    fn feature_importances(&self) -> Option<Array1<f64>> {
        let booster = self.booster.as_ref()?;
        let all: Vec<XGBNode> = booster.trees.iter().flatten().cloned().collect();
        Some(xgb_tree_importances(&all, booster.n_features))
    }
}

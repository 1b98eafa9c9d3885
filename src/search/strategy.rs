//! Cross-validated search strategies over a [`ParameterGrid`]

use crate::error::{Result, SearchStage, SelectError};
use crate::params::{format_params, Params};
use crate::training::metrics::{accuracy_score, mean_absolute_error, mean_squared_error, r2_score};
use crate::training::models::{Estimator, EstimatorKind};
use super::cross_validation::{CVResults, CVStrategy, CrossValidator};
use super::grid::ParameterGrid;
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Instant;
use tracing::{debug, info};

/// Named scoring function applied to each test fold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    R2,
    NegMeanSquaredError,
    NegMeanAbsoluteError,
    Accuracy,
}

impl Scoring {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "r2" => Ok(Scoring::R2),
            "neg_mean_squared_error" => Ok(Scoring::NegMeanSquaredError),
            "neg_mean_absolute_error" => Ok(Scoring::NegMeanAbsoluteError),
            "accuracy" => Ok(Scoring::Accuracy),
            other => Err(SelectError::invalid_param(
                "scoring",
                other,
                "expected one of r2, neg_mean_squared_error, neg_mean_absolute_error, accuracy",
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scoring::R2 => "r2",
            Scoring::NegMeanSquaredError => "neg_mean_squared_error",
            Scoring::NegMeanAbsoluteError => "neg_mean_absolute_error",
            Scoring::Accuracy => "accuracy",
        }
    }

    /// Score a fitted estimator; higher is always better
    pub fn score(&self, estimator: &dyn Estimator, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64> {
        let y_pred = estimator.predict(x)?;
        Ok(match self {
            Scoring::R2 => r2_score(y, &y_pred),
            Scoring::NegMeanSquaredError => -mean_squared_error(y, &y_pred),
            Scoring::NegMeanAbsoluteError => -mean_absolute_error(y, &y_pred),
            Scoring::Accuracy => accuracy_score(y, &y_pred),
        })
    }
}

/// Fixed parameters of a search strategy, read from `grid_search.params`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Number of cross-validation folds
    pub cv: usize,
    /// 0 = quiet, 1 = summary, 2 = per combination, 3 = per fold
    pub verbose: u8,
    /// `None` or `Some(1)` evaluates combinations sequentially
    pub n_jobs: Option<i64>,
    /// `None` uses the estimator's own `score`
    pub scoring: Option<Scoring>,
    /// Shuffle samples before splitting into folds
    pub shuffle: bool,
    pub random_state: Option<u64>,
    /// Combinations sampled by the randomized strategy
    pub n_iter: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            cv: 5,
            verbose: 0,
            n_jobs: None,
            scoring: None,
            shuffle: false,
            random_state: None,
            n_iter: 10,
        }
    }
}

impl SearchSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cv(mut self, cv: usize) -> Self {
        self.cv = cv;
        self
    }

    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_n_jobs(mut self, n_jobs: Option<i64>) -> Self {
        self.n_jobs = n_jobs;
        self
    }

    pub fn with_scoring(mut self, scoring: Scoring) -> Self {
        self.scoring = Some(scoring);
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool, random_state: Option<u64>) -> Self {
        self.shuffle = shuffle;
        self.random_state = random_state;
        self
    }

    pub fn with_n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    /// Parse strategy params. `n_iter` is only accepted when `randomized`.
    pub fn from_params(params: &Params, randomized: bool) -> Result<Self> {
        let mut settings = Self::default();
        for (name, value) in params {
            match name.as_str() {
                "cv" => settings.cv = value.expect_usize_min(name, 2)?,
                "verbose" => settings.verbose = value.expect_usize(name)?.min(u8::MAX as usize) as u8,
                "n_jobs" => {
                    settings.n_jobs = if value.is_null() {
                        None
                    } else {
                        let n = value
                            .as_int()
                            .ok_or_else(|| SelectError::invalid_param(name, value, "expected an integer or null"))?;
                        if n == 0 {
                            return Err(SelectError::invalid_param(name, value, "must not be 0"));
                        }
                        Some(n)
                    }
                }
                "scoring" => {
                    settings.scoring = if value.is_null() {
                        None
                    } else {
                        Some(Scoring::parse(value.expect_str(name)?)?)
                    }
                }
                "shuffle" => settings.shuffle = value.expect_bool(name)?,
                "random_state" => settings.random_state = value.expect_seed(name)?,
                "refit" => {
                    if !value.expect_bool(name)? {
                        return Err(SelectError::ConfigError(
                            "refit: false is not supported; the best combination is always refit".to_string(),
                        ));
                    }
                }
                "n_iter" if randomized => settings.n_iter = value.expect_usize_min(name, 1)?,
                other => {
                    return Err(SelectError::ConfigError(format!(
                        "unknown search parameter '{}'",
                        other
                    )))
                }
            }
        }
        Ok(settings)
    }

    fn parallel(&self) -> bool {
        !matches!(self.n_jobs, None | Some(1))
    }
}

/// Cross-validation record of one parameter combination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinationResult {
    pub params: Params,
    pub fold_scores: Vec<f64>,
    pub mean_test_score: f64,
    pub std_test_score: f64,
    /// 1 = best; equal means share the lowest rank
    pub rank: usize,
}

/// What a search hands back for one candidate
#[derive(Debug)]
pub struct SearchOutcome {
    /// Best combination refit on the full data
    pub best_estimator: Box<dyn Estimator>,
    pub best_params: Params,
    /// Mean test score of the best combination
    pub best_score: f64,
    /// Index into `cv_results`
    pub best_index: usize,
    pub cv_results: Vec<CombinationResult>,
}

/// A strategy that explores a parameter grid with cross-validation.
///
/// Implementors choose which combinations to evaluate; fold construction,
/// fitting, scoring, best-selection and the final refit are shared.
pub trait SearchStrategy: Debug + Send + Sync {
    /// Class name as written in the model config
    fn name(&self) -> &'static str;

    fn settings(&self) -> &SearchSettings;

    /// Combinations to evaluate, in evaluation order
    fn candidates(&self, grid: &ParameterGrid) -> Vec<Params>;

    /// Search `grid` around `estimator` (fixed params already applied).
    ///
    /// Failures are wrapped as [`SelectError::Search`] naming `candidate`
    /// and the stage they surfaced in.
    fn search(
        &self,
        candidate: &str,
        estimator: &dyn Estimator,
        grid: &ParameterGrid,
        x: &Array2<f64>,
        y: &Array1<f64>,
    ) -> Result<SearchOutcome> {
        run_search(self.settings(), candidate, estimator, self.candidates(grid), x, y)
    }
}

/// Exhaustive search over every combination
#[derive(Debug, Clone, Default)]
pub struct GridSearchCV {
    settings: SearchSettings,
}

impl GridSearchCV {
    pub fn new(settings: SearchSettings) -> Self {
        Self { settings }
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        Ok(Self::new(SearchSettings::from_params(params, false)?))
    }
}

impl SearchStrategy for GridSearchCV {
    fn name(&self) -> &'static str {
        "GridSearchCV"
    }

    fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    fn candidates(&self, grid: &ParameterGrid) -> Vec<Params> {
        grid.iter().collect()
    }
}

/// Evaluates `n_iter` distinct combinations drawn without replacement
#[derive(Debug, Clone, Default)]
pub struct RandomizedSearchCV {
    settings: SearchSettings,
}

impl RandomizedSearchCV {
    pub fn new(settings: SearchSettings) -> Self {
        Self { settings }
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        Ok(Self::new(SearchSettings::from_params(params, true)?))
    }
}

impl SearchStrategy for RandomizedSearchCV {
    fn name(&self) -> &'static str {
        "RandomizedSearchCV"
    }

    fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    fn candidates(&self, grid: &ParameterGrid) -> Vec<Params> {
        let total = grid.len();
        if self.settings.n_iter >= total {
            return grid.iter().collect();
        }

        let mut rng = match self.settings.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut picked = rand::seq::index::sample(&mut rng, total, self.settings.n_iter).into_vec();
        picked.sort_unstable();
        picked.into_iter().filter_map(|i| grid.get(i)).collect()
    }
}

struct Fold {
    x_train: Array2<f64>,
    y_train: Array1<f64>,
    x_test: Array2<f64>,
    y_test: Array1<f64>,
}

fn wrap(candidate: &str, stage: SearchStage, source: SelectError) -> SelectError {
    SelectError::Search {
        candidate: candidate.to_string(),
        stage,
        source: Box::new(source),
    }
}

fn run_search(
    settings: &SearchSettings,
    candidate: &str,
    estimator: &dyn Estimator,
    combinations: Vec<Params>,
    x: &Array2<f64>,
    y: &Array1<f64>,
) -> Result<SearchOutcome> {
    let start = Instant::now();

    if x.nrows() != y.len() {
        return Err(wrap(
            candidate,
            SearchStage::Configure,
            SelectError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            },
        ));
    }
    if combinations.is_empty() {
        return Err(wrap(
            candidate,
            SearchStage::Configure,
            SelectError::ValidationError("search produced no parameter combinations".to_string()),
        ));
    }

    let strategy = match estimator.kind() {
        EstimatorKind::Regressor => CVStrategy::KFold {
            n_splits: settings.cv,
            shuffle: settings.shuffle,
        },
        EstimatorKind::Classifier => CVStrategy::StratifiedKFold {
            n_splits: settings.cv,
            shuffle: settings.shuffle,
        },
    };
    let splits = CrossValidator::new(strategy)
        .with_random_state(settings.random_state)
        .split(x.nrows(), Some(y))
        .map_err(|e| wrap(candidate, SearchStage::Configure, e))?;

    // Every combination is configured before the first fit
    let templates = combinations
        .iter()
        .map(|params| -> Result<Box<dyn Estimator>> {
            let mut model = estimator.clone_unfitted();
            model.set_params(params)?;
            Ok(model)
        })
        .collect::<Result<Vec<_>>>()
        .map_err(|e| wrap(candidate, SearchStage::Configure, e))?;

    let folds: Vec<Fold> = splits
        .iter()
        .map(|split| Fold {
            x_train: x.select(Axis(0), &split.train_indices),
            y_train: y.select(Axis(0), &split.train_indices),
            x_test: x.select(Axis(0), &split.test_indices),
            y_test: y.select(Axis(0), &split.test_indices),
        })
        .collect();

    let n_folds = folds.len();
    let n_candidates = templates.len();
    if settings.verbose >= 1 {
        info!(
            candidate,
            "Fitting {} folds for each of {} candidates, totalling {} fits",
            n_folds,
            n_candidates,
            n_folds * n_candidates
        );
    } else {
        debug!(candidate, n_folds, n_candidates, "Starting search");
    }

    let evaluate = |(idx, template): (usize, &Box<dyn Estimator>)| -> Result<Vec<f64>> {
        let mut scores = Vec::with_capacity(n_folds);
        for (fold_idx, fold) in folds.iter().enumerate() {
            let mut model = template.clone_unfitted();
            model
                .fit(&fold.x_train, &fold.y_train)
                .map_err(|e| wrap(candidate, SearchStage::Fit, e))?;
            let score = match settings.scoring {
                Some(scoring) => scoring.score(model.as_ref(), &fold.x_test, &fold.y_test),
                None => model.score(&fold.x_test, &fold.y_test),
            }
            .map_err(|e| wrap(candidate, SearchStage::Score, e))?;

            if settings.verbose >= 3 {
                info!(candidate, combination = idx, fold = fold_idx, score, "Fold scored");
            } else {
                debug!(candidate, combination = idx, fold = fold_idx, score, "Fold scored");
            }
            scores.push(score);
        }
        Ok(scores)
    };

    let fold_scores: Vec<Vec<f64>> = if settings.parallel() {
        templates.par_iter().enumerate().map(evaluate).collect::<Result<Vec<_>>>()?
    } else {
        templates.iter().enumerate().map(evaluate).collect::<Result<Vec<_>>>()?
    };

    let mut cv_results: Vec<CombinationResult> = combinations
        .into_iter()
        .zip(fold_scores)
        .map(|(params, scores)| {
            let summary = CVResults::from_scores(scores);
            CombinationResult {
                params,
                mean_test_score: summary.mean_score,
                std_test_score: summary.std_score,
                fold_scores: summary.scores,
                rank: 0,
            }
        })
        .collect();
    assign_ranks(&mut cv_results);

    for result in &cv_results {
        if settings.verbose >= 2 {
            info!(
                candidate,
                params = %format_params(&result.params),
                mean = result.mean_test_score,
                std = result.std_test_score,
                "Combination evaluated"
            );
        } else {
            debug!(
                candidate,
                params = %format_params(&result.params),
                mean = result.mean_test_score,
                "Combination evaluated"
            );
        }
    }

    let best_index = best_index(&cv_results);
    let best = &cv_results[best_index];

    let mut best_estimator = templates[best_index].clone_unfitted();
    best_estimator
        .fit(x, y)
        .map_err(|e| wrap(candidate, SearchStage::Refit, e))?;

    debug!(
        candidate,
        best_score = best.mean_test_score,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Search finished"
    );

    Ok(SearchOutcome {
        best_estimator,
        best_params: best.params.clone(),
        best_score: best.mean_test_score,
        best_index,
        cv_results,
    })
}

/// Highest mean wins, first combination on ties, NaN never beats a number
fn best_index(results: &[CombinationResult]) -> usize {
    let mut best: Option<(usize, f64)> = None;
    for (idx, result) in results.iter().enumerate() {
        let score = result.mean_test_score;
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx).unwrap_or(0)
}

fn assign_ranks(results: &mut [CombinationResult]) {
    let means: Vec<f64> = results.iter().map(|r| r.mean_test_score).collect();
    let n_scored = means.iter().filter(|m| !m.is_nan()).count();
    for (result, &mean) in results.iter_mut().zip(&means) {
        result.rank = if mean.is_nan() {
            n_scored + 1
        } else {
            1 + means.iter().filter(|&&other| other > mean).count()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;
    use crate::training::decision_tree::DecisionTree;
    use crate::training::dummy::DummyRegressor;
    use crate::training::linear_models::LogisticRegression;
    use indexmap::IndexMap;

    fn linear_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        // Interleaved so that contiguous folds still span the whole range
        let xs: Vec<f64> = (0..n).map(|i| ((i * 7) % n) as f64).collect();
        let x = Array2::from_shape_vec((n, 1), xs.clone()).unwrap();
        let y = Array1::from_vec(xs.iter().map(|v| 3.0 * v + 1.0).collect());
        (x, y)
    }

    fn grid(entries: &[(&str, Vec<ParamValue>)]) -> ParameterGrid {
        let map: IndexMap<String, Vec<ParamValue>> =
            entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        ParameterGrid::new(&map).unwrap()
    }

    fn params(entries: &[(&str, ParamValue)]) -> Params {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_settings_defaults_and_parsing() {
        let settings = SearchSettings::from_params(&Params::new(), false).unwrap();
        assert_eq!(settings, SearchSettings::default());

        let settings = SearchSettings::from_params(
            &params(&[
                ("cv", 3.into()),
                ("verbose", 1.into()),
                ("n_jobs", (-1).into()),
                ("scoring", "neg_mean_squared_error".into()),
            ]),
            false,
        )
        .unwrap();
        assert_eq!(settings.cv, 3);
        assert_eq!(settings.verbose, 1);
        assert_eq!(settings.n_jobs, Some(-1));
        assert_eq!(settings.scoring, Some(Scoring::NegMeanSquaredError));
    }

    #[test]
    fn test_settings_reject_bad_values() {
        assert!(SearchSettings::from_params(&params(&[("cv", 1.into())]), false).is_err());
        assert!(matches!(
            SearchSettings::from_params(&params(&[("pre_dispatch", 2.into())]), false),
            Err(SelectError::ConfigError(_))
        ));
        // n_iter belongs to the randomized strategy only
        assert!(SearchSettings::from_params(&params(&[("n_iter", 4.into())]), false).is_err());
        assert!(SearchSettings::from_params(&params(&[("n_iter", 4.into())]), true).is_ok());
        assert!(SearchSettings::from_params(&params(&[("scoring", "f1".into())]), false).is_err());
    }

    #[test]
    fn test_grid_search_prefers_deeper_tree() {
        let (x, y) = linear_data(60);
        let search = GridSearchCV::new(SearchSettings::new().with_cv(3));
        let base = DecisionTree::new_regressor().with_random_state(0);
        let grid = grid(&[("max_depth", vec![1.into(), ParamValue::Null])]);

        let outcome = search.search("tree", &base, &grid, &x, &y).unwrap();

        assert_eq!(outcome.cv_results.len(), 2);
        assert_eq!(outcome.best_index, 1);
        assert_eq!(outcome.best_params["max_depth"], ParamValue::Null);
        assert_eq!(outcome.cv_results[1].rank, 1);
        assert_eq!(outcome.cv_results[0].rank, 2);
        assert!(outcome.best_score > outcome.cv_results[0].mean_test_score);
        assert!(outcome.best_estimator.predict(&x).is_ok());
    }

    #[test]
    fn test_ties_go_to_first_combination() {
        let (x, y) = linear_data(30);
        let search = GridSearchCV::new(SearchSettings::new().with_cv(3));
        let base = DummyRegressor::default();
        // Identical combinations score identically
        let grid = grid(&[("strategy", vec!["mean".into(), "mean".into()])]);

        let outcome = search.search("dummy", &base, &grid, &x, &y).unwrap();
        assert_eq!(outcome.best_index, 0);
        assert!(outcome.cv_results.iter().all(|r| r.rank == 1));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (x, y) = linear_data(45);
        let base = DecisionTree::new_regressor().with_random_state(3);
        let grid = grid(&[("max_depth", vec![1.into(), 2.into(), 4.into()])]);

        let sequential = GridSearchCV::new(SearchSettings::new().with_cv(3))
            .search("tree", &base, &grid, &x, &y)
            .unwrap();
        let parallel = GridSearchCV::new(SearchSettings::new().with_cv(3).with_n_jobs(Some(-1)))
            .search("tree", &base, &grid, &x, &y)
            .unwrap();

        assert_eq!(sequential.best_index, parallel.best_index);
        for (a, b) in sequential.cv_results.iter().zip(&parallel.cv_results) {
            assert_eq!(a.fold_scores, b.fold_scores);
        }
    }

    #[test]
    fn test_randomized_samples_distinct_combinations() {
        let grid = grid(&[
            ("max_depth", vec![1.into(), 2.into(), 3.into()]),
            ("min_samples_leaf", vec![1.into(), 2.into()]),
        ]);
        let search = RandomizedSearchCV::new(SearchSettings::new().with_n_iter(3).with_shuffle(false, Some(7)));

        let first = search.candidates(&grid);
        let second = search.candidates(&grid);
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        for (i, a) in first.iter().enumerate() {
            for b in &first[i + 1..] {
                assert_ne!(a, b);
            }
        }

        let exhaustive = RandomizedSearchCV::new(SearchSettings::new().with_n_iter(50));
        assert_eq!(exhaustive.candidates(&grid).len(), 6);
    }

    #[test]
    fn test_classifier_uses_stratified_folds_and_accuracy() {
        let n = 40;
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(n, |i| if i < n / 2 { 0.0 } else { 1.0 });

        let search = GridSearchCV::new(SearchSettings::new().with_cv(4).with_scoring(Scoring::Accuracy));
        let base = LogisticRegression::new();
        let grid = grid(&[("C", vec![1.0.into(), 10.0.into()])]);

        let outcome = search.search("logit", &base, &grid, &x, &y).unwrap();
        assert!(outcome.best_score > 0.8);
        assert_eq!(outcome.best_estimator.class_name(), "LogisticRegression");
    }

    #[test]
    fn test_invalid_grid_value_fails_at_configure_stage() {
        let (x, y) = linear_data(30);
        let search = GridSearchCV::default();
        let base = DecisionTree::new_regressor();
        let grid = grid(&[("max_depth", vec!["deep".into()])]);

        match search.search("tree", &base, &grid, &x, &y).unwrap_err() {
            SelectError::Search { candidate, stage, .. } => {
                assert_eq!(candidate, "tree");
                assert_eq!(stage, SearchStage::Configure);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[derive(Debug)]
    struct NoCombinations(SearchSettings);

    impl SearchStrategy for NoCombinations {
        fn name(&self) -> &'static str {
            "NoCombinations"
        }

        fn settings(&self) -> &SearchSettings {
            &self.0
        }

        fn candidates(&self, _grid: &ParameterGrid) -> Vec<Params> {
            Vec::new()
        }
    }

    #[test]
    fn test_empty_combination_list_is_an_error() {
        let (x, y) = linear_data(20);
        let search = NoCombinations(SearchSettings::default());
        let base = DummyRegressor::default();

        match search.search("dummy", &base, &grid(&[]), &x, &y).unwrap_err() {
            SelectError::Search { candidate, stage, source } => {
                assert_eq!(candidate, "dummy");
                assert_eq!(stage, SearchStage::Configure);
                assert!(matches!(*source, SelectError::ValidationError(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ranks_put_nan_last() {
        let mk = |mean: f64| CombinationResult {
            params: Params::new(),
            fold_scores: vec![mean],
            mean_test_score: mean,
            std_test_score: 0.0,
            rank: 0,
        };
        let mut results = vec![mk(f64::NAN), mk(0.5), mk(0.9), mk(0.5)];
        assign_ranks(&mut results);
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![4, 2, 1, 2]);
        assert_eq!(best_index(&results), 2);
    }
}

//! Integration test: model selection end-to-end

use kolosal_select::config::{generate_sample_model_config, CandidateSpec, ModelConfig, SearchConfig};
use kolosal_select::params::{ParamValue, Params};
use kolosal_select::search::SearchRegistry;
use kolosal_select::selection::ModelBuilder;
use kolosal_select::training::{Estimator, EstimatorKind, EstimatorRegistry};
use kolosal_select::{Result, SelectError};
use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn linear_data(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n, 3), |_| rng.gen_range(-5.0..5.0));
    let y = x
        .rows()
        .into_iter()
        .map(|r| 3.0 * r[0] - 2.0 * r[1] + 0.5 * r[2] + 1.0 + rng.gen_range(-0.1..0.1))
        .collect();
    (x, y)
}

fn candidate(module: &str, class: &str, params: &[(&str, ParamValue)], grid: &[(&str, Vec<ParamValue>)]) -> CandidateSpec {
    CandidateSpec {
        module: module.to_string(),
        class_name: class.to_string(),
        params: params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        search_param_grid: grid.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
    }
}

fn model_config(cv: i64, candidates: Vec<(&str, CandidateSpec)>) -> ModelConfig {
    let mut params = Params::new();
    params.insert("cv".into(), cv.into());
    ModelConfig {
        grid_search: SearchConfig {
            module: "sklearn.model_selection".into(),
            class_name: "GridSearchCV".into(),
            params,
        },
        model_selection: candidates
            .into_iter()
            .map(|(name, spec)| (name.to_string(), spec))
            .collect::<IndexMap<_, _>>(),
    }
}

fn forest_vs_constant() -> ModelConfig {
    model_config(
        3,
        vec![
            (
                "forest",
                candidate(
                    "sklearn.ensemble",
                    "RandomForestRegressor",
                    &[("random_state", 42.into())],
                    &[("n_estimators", vec![100.into(), 200.into()])],
                ),
            ),
            (
                "constant",
                candidate("sklearn.dummy", "DummyRegressor", &[("strategy", "mean".into())], &[]),
            ),
        ],
    )
}

#[test]
fn test_forest_beats_constant_predictor() {
    let (x, y) = linear_data(90, 7);
    let best = ModelBuilder::new(forest_vs_constant()).get_best_model(&x, &y, None).unwrap();

    assert_eq!(best.name, "forest");
    assert_eq!(best.target, "sklearn.ensemble.RandomForestRegressor");
    assert_eq!(best.best_model.class_name(), "RandomForestRegressor");
    assert!(best.best_score > 0.5, "forest R² was {}", best.best_score);
    assert!(best.best_parameters.contains_key("n_estimators"));

    let constant = best.candidates.iter().find(|c| c.name == "constant").unwrap();
    assert!(constant.best_score < best.best_score);

    let predictions = best.predict(&x).unwrap();
    assert_eq!(predictions.len(), x.nrows());
}

#[test]
fn test_higher_scoring_candidate_wins_regardless_of_order() {
    let (x, y) = linear_data(60, 11);
    let config = model_config(
        3,
        vec![
            ("baseline", candidate("sklearn.dummy", "DummyRegressor", &[], &[])),
            (
                "ridge",
                candidate(
                    "sklearn.linear_model",
                    "Ridge",
                    &[],
                    &[("alpha", vec![0.01.into(), 100.0.into()])],
                ),
            ),
        ],
    );
    let builder = ModelBuilder::new(config);

    let searched = builder
        .search_initialized_models(builder.initialized_models().unwrap(), &x, &y)
        .unwrap();
    let ridge_score = searched[1].best_score;
    let ridge_params = searched[1].best_params.clone();
    assert!(ridge_score > searched[0].best_score);

    let best = builder.best_from_searched(searched, None).unwrap();
    assert_eq!(best.name, "ridge");
    assert_eq!(best.best_score, ridge_score);
    assert_eq!(best.best_parameters, ridge_params);
    assert_eq!(best.best_parameters["alpha"], ParamValue::Float(0.01));
}

#[test]
fn test_base_accuracy_above_every_score_fails() {
    let (x, y) = linear_data(60, 3);
    let err = ModelBuilder::new(forest_vs_constant())
        .get_best_model(&x, &y, Some(1.5))
        .unwrap_err();

    match err {
        SelectError::BelowThreshold { base_accuracy, best_score } => {
            assert_eq!(base_accuracy, 1.5);
            assert!(best_score.map_or(false, |s| s < 1.5));
        }
        other => panic!("expected BelowThreshold, got {other}"),
    }
}

#[test]
fn test_base_accuracy_met_returns_model() {
    let (x, y) = linear_data(60, 5);
    let best = ModelBuilder::new(forest_vs_constant())
        .get_best_model(&x, &y, Some(0.3))
        .unwrap();
    assert!(best.best_score >= 0.3);
    assert_eq!(best.base_accuracy, Some(0.3));
}

static FIT_CALLS: AtomicUsize = AtomicUsize::new(0);

/// Predicts zero and counts every fit
#[derive(Debug, Default)]
struct CountingRegressor {
    n_features: usize,
}

impl Estimator for CountingRegressor {
    fn class_name(&self) -> &'static str {
        "CountingRegressor"
    }

    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Regressor
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        Err(SelectError::invalid_param(name, value, "CountingRegressor takes no parameters"))
    }

    fn get_params(&self) -> Params {
        Params::new()
    }

    fn fit(&mut self, x: &Array2<f64>, _y: &Array1<f64>) -> Result<()> {
        FIT_CALLS.fetch_add(1, Ordering::SeqCst);
        self.n_features = x.ncols();
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(Array1::zeros(x.nrows()))
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        Box::new(CountingRegressor::default())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[test]
fn test_unknown_target_fails_before_any_fit() {
    let mut estimators = EstimatorRegistry::with_defaults();
    estimators.register("tests", "CountingRegressor", || Box::new(CountingRegressor::default()));

    let (x, y) = linear_data(30, 1);

    for (module, class) in [("sklearn.ensembl", "RandomForestRegressor"), ("sklearn.ensemble", "RandomForestRegresor")] {
        let config = model_config(
            3,
            vec![
                ("counting", candidate("tests", "CountingRegressor", &[], &[])),
                ("typo", candidate(module, class, &[], &[])),
            ],
        );
        let builder = ModelBuilder::with_registries(config, estimators.clone(), SearchRegistry::with_defaults());

        let err = builder.get_best_model(&x, &y, None).unwrap_err();
        match err {
            SelectError::Construction { candidate, target, source } => {
                assert_eq!(candidate, "typo");
                assert_eq!(target, format!("{}.{}", module, class));
                match *source {
                    SelectError::UnresolvedTarget { kind, target } => {
                        assert_eq!(kind, "estimator");
                        assert_eq!(target, format!("{}.{}", module, class));
                    }
                    other => panic!("expected UnresolvedTarget, got {other}"),
                }
            }
            other => panic!("expected Construction, got {other}"),
        }
    }
    assert_eq!(FIT_CALLS.load(Ordering::SeqCst), 0);

    // The counting estimator is fit once per fold plus the refit
    let config = model_config(3, vec![("counting", candidate("tests", "CountingRegressor", &[], &[]))]);
    let builder = ModelBuilder::with_registries(config, estimators, SearchRegistry::with_defaults());
    builder.get_best_model(&x, &y, None).unwrap();
    assert_eq!(FIT_CALLS.load(Ordering::SeqCst), 4);
}

#[test]
fn test_invalid_constructor_param_is_construction_error() {
    let (x, y) = linear_data(30, 2);
    let config = model_config(
        3,
        vec![(
            "forest",
            candidate("sklearn.ensemble", "RandomForestRegressor", &[("n_estimators", "many".into())], &[]),
        )],
    );

    match ModelBuilder::new(config).get_best_model(&x, &y, None).unwrap_err() {
        SelectError::Construction { candidate, source, .. } => {
            assert_eq!(candidate, "forest");
            assert!(matches!(*source, SelectError::InvalidParameter { .. }));
        }
        other => panic!("expected Construction, got {other}"),
    }
}

#[test]
fn test_fit_failure_is_wrapped_with_candidate_and_stage() {
    // More neighbors than any training fold holds
    let (x, y) = linear_data(12, 4);
    let config = model_config(
        3,
        vec![("knn", candidate("sklearn.neighbors", "KNeighborsRegressor", &[("n_neighbors", 50.into())], &[]))],
    );

    match ModelBuilder::new(config).get_best_model(&x, &y, None).unwrap_err() {
        SelectError::Search { candidate, stage, .. } => {
            assert_eq!(candidate, "knn");
            assert!(matches!(stage, kolosal_select::SearchStage::Fit | kolosal_select::SearchStage::Score));
        }
        other => panic!("expected Search error, got {other}"),
    }
}

#[test]
fn test_classification_selection() {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let n = 80;
    let x = Array2::from_shape_fn((n, 2), |_| rng.gen_range(-3.0..3.0));
    let y: Array1<f64> = x.rows().into_iter().map(|r| if r[0] + r[1] > 0.0 { 1.0 } else { 0.0 }).collect();

    let config = model_config(
        4,
        vec![
            ("prior", candidate("sklearn.dummy", "DummyClassifier", &[], &[])),
            (
                "logistic",
                candidate("sklearn.linear_model", "LogisticRegression", &[], &[("C", vec![0.1.into(), 1.0.into()])]),
            ),
            (
                "tree",
                candidate("sklearn.tree", "DecisionTreeClassifier", &[("random_state", 0.into())], &[("max_depth", vec![2.into(), 4.into()])]),
            ),
        ],
    );

    let best = ModelBuilder::new(config).get_best_model(&x, &y, Some(0.7)).unwrap();
    assert_ne!(best.name, "prior");
    assert!(best.best_score >= 0.7);
}

#[test]
fn test_sample_config_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = generate_sample_model_config(dir.path()).unwrap();
    let (x, y) = linear_data(100, 42);

    let best = ModelBuilder::from_path(&path).unwrap().get_best_model(&x, &y, Some(0.6)).unwrap();
    assert!(["module_0", "module_1"].contains(&best.name.as_str()));
    assert_eq!(best.candidates.len(), 2);
    assert_eq!(best.candidates[0].n_combinations, 4);

    let report_path = dir.path().join("report.json");
    best.save_report(&report_path).unwrap();
    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["candidate"], serde_json::json!(best.name));

    let model_path = dir.path().join("model.json");
    best.save_model(&model_path).unwrap();
    assert!(std::fs::metadata(&model_path).unwrap().len() > 0);
}

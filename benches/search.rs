use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use kolosal_select::config::ModelConfig;
use kolosal_select::params::ParamValue;
use kolosal_select::search::{GridSearchCV, ParameterGrid, SearchSettings, SearchStrategy};
use kolosal_select::selection::ModelBuilder;
use kolosal_select::training::{DecisionTree, RandomForest};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn create_regression_data(n_rows: usize, n_features: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let x = Array2::from_shape_fn((n_rows, n_features), |_| rng.gen::<f64>() * 10.0);
    // Target as sum of features + noise
    let y = x.rows().into_iter().map(|r| r.sum() + rng.gen::<f64>() * 0.1).collect();
    (x, y)
}

fn depth_grid() -> ParameterGrid {
    let mut grid: IndexMap<String, Vec<ParamValue>> = IndexMap::new();
    grid.insert("max_depth".into(), vec![2.into(), 4.into(), 8.into(), ParamValue::Null]);
    grid.insert("min_samples_leaf".into(), vec![1.into(), 5.into()]);
    ParameterGrid::new(&grid).unwrap()
}

fn bench_grid_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_search");
    group.sample_size(10);

    let grid = depth_grid();
    for n_rows in [500, 2000].iter() {
        let (x, y) = create_regression_data(*n_rows, 8);
        let base = DecisionTree::new_regressor().with_random_state(0);

        for (label, n_jobs) in [("sequential", None), ("parallel", Some(-1))] {
            let search = GridSearchCV::new(SearchSettings::new().with_cv(5).with_n_jobs(n_jobs));
            group.bench_with_input(BenchmarkId::new(label, n_rows), &(&x, &y), |b, (x, y)| {
                b.iter(|| search.search("tree", &base, black_box(&grid), x, y).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_forest_fit(c: &mut Criterion) {
    use kolosal_select::training::Estimator;

    let mut group = c.benchmark_group("random_forest");
    group.sample_size(10);

    for n_rows in [1000, 5000].iter() {
        let (x, y) = create_regression_data(*n_rows, 10);
        group.bench_with_input(BenchmarkId::new("fit", n_rows), &(&x, &y), |b, (x, y)| {
            b.iter(|| {
                let mut forest = RandomForest::new_regressor(50).with_random_state(0);
                forest.fit(black_box(x), black_box(y)).unwrap()
            })
        });
    }

    group.finish();
}

fn bench_sample_config(c: &mut Criterion) {
    let (x, y) = create_regression_data(300, 5);
    let builder = ModelBuilder::new(ModelConfig::sample());

    let mut group = c.benchmark_group("model_selection");
    group.sample_size(10);
    group.bench_function("sample_config", |b| {
        b.iter(|| builder.get_best_model(black_box(&x), black_box(&y), None).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_grid_search, bench_forest_fit, bench_sample_config);
criterion_main!(benches);

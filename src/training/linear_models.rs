//! Linear model implementations

use crate::error::{Result, SelectError};
use crate::params::{ParamValue, Params};
use super::models::{check_n_features, check_xy, unique_classes, unknown_param, Estimator, EstimatorKind};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Solve symmetric positive-definite system Ax = b using Cholesky decomposition.
/// Returns `None` if the matrix is not positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    // A = L * L^T
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L * y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T * x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Gaussian elimination with partial pivoting (fallback)
fn gauss_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut aug = Array2::<f64>::zeros((n, n + 1));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = a[[i, j]];
        }
        aug[[i, n]] = b[i];
    }

    for col in 0..n {
        let mut max_row = col;
        for row in col + 1..n {
            if aug[[row, col]].abs() > aug[[max_row, col]].abs() {
                max_row = row;
            }
        }
        if aug[[max_row, col]].abs() < 1e-10 {
            return None;
        }
        if max_row != col {
            for j in 0..=n {
                aug.swap([col, j], [max_row, j]);
            }
        }
        for row in col + 1..n {
            let factor = aug[[row, col]] / aug[[col, col]];
            for j in col..=n {
                aug[[row, j]] -= factor * aug[[col, j]];
            }
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = aug[[i, n]];
        for j in (i + 1)..n {
            sum -= aug[[i, j]] * x[j];
        }
        x[i] = sum / aug[[i, i]];
    }
    Some(x)
}

/// Solve `(X^T X + alpha*I) w = X^T y`.
///
/// Cholesky first; a rank-deficient OLS system gets a tiny ridge before the
/// Gaussian fallback so collinear features still produce a solution.
fn solve_normal_equations(x: &Array2<f64>, y: &Array1<f64>, alpha: f64) -> Result<Array1<f64>> {
    let mut xtx = x.t().dot(x);
    for i in 0..xtx.nrows() {
        xtx[[i, i]] += alpha;
    }
    let xty = x.t().dot(y);

    if let Some(w) = cholesky_solve(&xtx, &xty) {
        return Ok(w);
    }

    let n = xtx.nrows().max(1);
    let jitter = 1e-8 * xtx.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64;
    let mut regularized = xtx.clone();
    for i in 0..regularized.nrows() {
        regularized[[i, i]] += jitter.max(1e-12);
    }

    cholesky_solve(&regularized, &xty)
        .or_else(|| gauss_solve(&xtx, &xty))
        .ok_or_else(|| SelectError::ComputationError("Matrix is singular, cannot solve least squares".to_string()))
}

/// Centered copies of `x` and `y` plus their means when fitting an intercept
fn center(
    x: &Array2<f64>,
    y: &Array1<f64>,
    fit_intercept: bool,
) -> Result<(Array2<f64>, Array1<f64>, Option<(Array1<f64>, f64)>)> {
    if !fit_intercept {
        return Ok((x.clone(), y.clone(), None));
    }
    let x_mean = x
        .mean_axis(Axis(0))
        .ok_or_else(|| SelectError::ValidationError("cannot center an empty matrix".to_string()))?;
    let y_mean = y.mean().unwrap_or(0.0);
    let x_c = x - &x_mean.clone().insert_axis(Axis(0));
    let y_c = y - y_mean;
    Ok((x_c, y_c, Some((x_mean, y_mean))))
}

fn intercept_from(coefficients: &Array1<f64>, means: Option<(Array1<f64>, f64)>) -> f64 {
    means.map_or(0.0, |(x_mean, y_mean)| y_mean - coefficients.dot(&x_mean))
}

/// Fitted weights shared by the linear regressors
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinearState {
    coefficients: Array1<f64>,
    intercept: f64,
}

impl LinearState {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        check_n_features(self.coefficients.len(), x)?;
        Ok(x.dot(&self.coefficients) + self.intercept)
    }
}

/// Ordinary least squares (`sklearn.linear_model.LinearRegression`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    /// Whether to fit intercept
    pub fit_intercept: bool,
    state: Option<LinearState>,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearRegression {
    /// Create a new linear regression model
    pub fn new() -> Self {
        Self {
            fit_intercept: true,
            state: None,
        }
    }

    /// Enable/disable fitting intercept
    pub fn with_fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    /// Fitted coefficients
    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.state.as_ref().map(|s| &s.coefficients)
    }

    pub fn intercept(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.intercept)
    }
}

impl Estimator for LinearRegression {
    fn class_name(&self) -> &'static str {
        "LinearRegression"
    }

    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Regressor
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "fit_intercept" => self.fit_intercept = value.expect_bool(name)?,
            _ => return Err(unknown_param(self.class_name(), name, value)),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("fit_intercept".into(), self.fit_intercept.into());
        params
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        let (x_c, y_c, means) = center(x, y, self.fit_intercept)?;
        let coefficients = solve_normal_equations(&x_c, &y_c, 0.0)?;
        let intercept = intercept_from(&coefficients, means);
        self.state = Some(LinearState { coefficients, intercept });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.state.as_ref().ok_or(SelectError::ModelNotFitted)?.predict(x)
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        Box::new(Self::new().with_fit_intercept(self.fit_intercept))
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Ridge Regression (L2-regularized linear regression)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegression {
    pub fit_intercept: bool,
    /// L2 regularization strength
    pub alpha: f64,
    state: Option<LinearState>,
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RidgeRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            fit_intercept: true,
            alpha,
            state: None,
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }
}

impl Estimator for RidgeRegression {
    fn class_name(&self) -> &'static str {
        "Ridge"
    }

    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Regressor
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "alpha" => self.alpha = value.expect_non_negative(name)?,
            "fit_intercept" => self.fit_intercept = value.expect_bool(name)?,
            _ => return Err(unknown_param(self.class_name(), name, value)),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("alpha".into(), self.alpha.into());
        params.insert("fit_intercept".into(), self.fit_intercept.into());
        params
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        let (x_c, y_c, means) = center(x, y, self.fit_intercept)?;
        let coefficients = solve_normal_equations(&x_c, &y_c, self.alpha)?;
        let intercept = intercept_from(&coefficients, means);
        self.state = Some(LinearState { coefficients, intercept });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.state.as_ref().ok_or(SelectError::ModelNotFitted)?.predict(x)
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        let mut fresh = Self::new(self.alpha);
        fresh.fit_intercept = self.fit_intercept;
        Box::new(fresh)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Lasso Regression (L1-regularized via coordinate descent)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LassoRegression {
    pub fit_intercept: bool,
    /// L1 regularization strength
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f64,
    state: Option<LinearState>,
}

impl Default for LassoRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl LassoRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            fit_intercept: true,
            alpha,
            max_iter: 1000,
            tol: 1e-6,
            state: None,
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Soft-threshold operator for L1 proximal step
    fn soft_threshold(val: f64, threshold: f64) -> f64 {
        if val > threshold {
            val - threshold
        } else if val < -threshold {
            val + threshold
        } else {
            0.0
        }
    }

    fn coordinate_descent(&self, x_c: &Array2<f64>, y_c: &Array1<f64>) -> Array1<f64> {
        let n_samples = x_c.nrows();
        let n_features = x_c.ncols();

        let col_norms: Vec<f64> = (0..n_features)
            .map(|j| x_c.column(j).mapv(|v| v * v).sum())
            .collect();

        let mut w = Array1::<f64>::zeros(n_features);
        let lambda = self.alpha * n_samples as f64;
        let mut r = y_c.clone();

        for _iter in 0..self.max_iter {
            let mut max_step = 0.0f64;

            for j in 0..n_features {
                if col_norms[j] < 1e-15 {
                    continue;
                }
                let old_wj = w[j];
                let rho = x_c.column(j).dot(&r) + col_norms[j] * old_wj;
                w[j] = Self::soft_threshold(rho, lambda) / col_norms[j];

                let delta = old_wj - w[j];
                if delta != 0.0 {
                    r.scaled_add(delta, &x_c.column(j));
                }
                max_step = max_step.max(delta.abs());
            }

            if max_step < self.tol {
                break;
            }
        }
        w
    }
}

impl Estimator for LassoRegression {
    fn class_name(&self) -> &'static str {
        "Lasso"
    }

    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Regressor
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "alpha" => self.alpha = value.expect_non_negative(name)?,
            "fit_intercept" => self.fit_intercept = value.expect_bool(name)?,
            "max_iter" => self.max_iter = value.expect_usize_min(name, 1)?,
            "tol" => self.tol = value.expect_non_negative(name)?,
            _ => return Err(unknown_param(self.class_name(), name, value)),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("alpha".into(), self.alpha.into());
        params.insert("fit_intercept".into(), self.fit_intercept.into());
        params.insert("max_iter".into(), self.max_iter.into());
        params.insert("tol".into(), self.tol.into());
        params
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        let (x_c, y_c, means) = center(x, y, self.fit_intercept)?;
        let coefficients = self.coordinate_descent(&x_c, &y_c);
        let intercept = intercept_from(&coefficients, means);
        self.state = Some(LinearState { coefficients, intercept });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.state.as_ref().ok_or(SelectError::ModelNotFitted)?.predict(x)
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        let mut fresh = self.clone();
        fresh.state = None;
        Box::new(fresh)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// One-vs-rest weights over standardized features
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogisticState {
    classes: Vec<f64>,
    /// One row per binary problem (a single row for two classes)
    weights: Array2<f64>,
    biases: Array1<f64>,
    x_mean: Array1<f64>,
    x_scale: Array1<f64>,
}

/// Logistic regression trained by gradient descent, one-vs-rest for multiclass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Inverse regularization strength
    pub c: f64,
    /// Whether the L2 penalty is applied
    pub penalty: bool,
    pub fit_intercept: bool,
    /// Maximum iterations
    pub max_iter: usize,
    /// Convergence tolerance
    pub tol: f64,
    /// Learning rate
    pub learning_rate: f64,
    state: Option<LogisticState>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    /// Create a new logistic regression model
    pub fn new() -> Self {
        Self {
            c: 1.0,
            penalty: true,
            fit_intercept: true,
            max_iter: 1000,
            tol: 1e-6,
            learning_rate: 0.5,
            state: None,
        }
    }

    /// Set maximum iterations
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set inverse regularization strength
    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    fn sigmoid(z: &Array1<f64>) -> Array1<f64> {
        z.mapv(|v| 1.0 / (1.0 + (-v).exp()))
    }

    /// Binary gradient descent against 0/1 targets
    fn fit_binary(&self, x: &Array2<f64>, target: &Array1<f64>) -> (Array1<f64>, f64) {
        let n_samples = x.nrows() as f64;
        let alpha = if self.penalty { 1.0 / (self.c * n_samples) } else { 0.0 };
        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;

        for _iter in 0..self.max_iter {
            let predictions = Self::sigmoid(&(x.dot(&weights) + bias));
            let errors = &predictions - target;
            let dw = x.t().dot(&errors) / n_samples + alpha * &weights;
            let db = if self.fit_intercept { errors.mean().unwrap_or(0.0) } else { 0.0 };

            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if grad_norm < self.tol {
                break;
            }

            weights.scaled_add(-self.learning_rate, &dw);
            bias -= self.learning_rate * db;
        }
        (weights, bias)
    }

    /// Class probabilities, one column per class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let state = self.state.as_ref().ok_or(SelectError::ModelNotFitted)?;
        check_n_features(state.x_mean.len(), x)?;

        let x_s = (x - &state.x_mean.view().insert_axis(Axis(0))) / &state.x_scale.view().insert_axis(Axis(0));
        let mut scores = x_s.dot(&state.weights.t()) + &state.biases.view().insert_axis(Axis(0));
        scores.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp()));

        if state.classes.len() == 2 {
            let positive = scores.column(0).to_owned();
            let mut proba = Array2::<f64>::zeros((x.nrows(), 2));
            proba.column_mut(0).assign(&positive.mapv(|p| 1.0 - p));
            proba.column_mut(1).assign(&positive);
            return Ok(proba);
        }

        for mut row in scores.rows_mut() {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            }
        }
        Ok(scores)
    }
}

impl Estimator for LogisticRegression {
    fn class_name(&self) -> &'static str {
        "LogisticRegression"
    }

    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Classifier
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "C" => {
                let c = value.expect_f64(name)?;
                if c <= 0.0 {
                    return Err(SelectError::invalid_param(name, value, "must be > 0"));
                }
                self.c = c;
            }
            "penalty" => {
                self.penalty = match value {
                    ParamValue::Null => false,
                    ParamValue::String(s) if s == "none" => false,
                    ParamValue::String(s) if s == "l2" => true,
                    _ => return Err(SelectError::invalid_param(name, value, "expected l2 or null")),
                }
            }
            "fit_intercept" => self.fit_intercept = value.expect_bool(name)?,
            "max_iter" => self.max_iter = value.expect_usize_min(name, 1)?,
            "tol" => self.tol = value.expect_non_negative(name)?,
            "learning_rate" => {
                let lr = value.expect_f64(name)?;
                if lr <= 0.0 {
                    return Err(SelectError::invalid_param(name, value, "must be > 0"));
                }
                self.learning_rate = lr;
            }
            _ => return Err(unknown_param(self.class_name(), name, value)),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("C".into(), self.c.into());
        params.insert("penalty".into(), if self.penalty { "l2".into() } else { ParamValue::Null });
        params.insert("fit_intercept".into(), self.fit_intercept.into());
        params.insert("max_iter".into(), self.max_iter.into());
        params.insert("tol".into(), self.tol.into());
        params.insert("learning_rate".into(), self.learning_rate.into());
        params
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        let classes = unique_classes(y);
        if classes.len() < 2 {
            return Err(SelectError::ValidationError(format!(
                "LogisticRegression needs at least 2 classes, got {}",
                classes.len()
            )));
        }

        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| SelectError::ValidationError("cannot fit on zero samples".to_string()))?;
        let x_scale = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let x_s = (x - &x_mean.view().insert_axis(Axis(0))) / &x_scale.view().insert_axis(Axis(0));

        let targets: Vec<f64> = if classes.len() == 2 { vec![classes[1]] } else { classes.clone() };
        let mut weights = Array2::<f64>::zeros((targets.len(), x.ncols()));
        let mut biases = Array1::<f64>::zeros(targets.len());

        for (k, &class) in targets.iter().enumerate() {
            let binary = y.mapv(|v| if (v - class).abs() < 0.5 { 1.0 } else { 0.0 });
            let (w, b) = self.fit_binary(&x_s, &binary);
            weights.row_mut(k).assign(&w);
            biases[k] = b;
        }

        self.state = Some(LogisticState { classes, weights, biases, x_mean, x_scale });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        let classes = &self.state.as_ref().ok_or(SelectError::ModelNotFitted)?.classes;

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
                classes[best]
            })
            .collect())
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        let mut fresh = self.clone();
        fresh.state = None;
        Box::new(fresh)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

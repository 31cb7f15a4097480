use crate::domain::ports::Classifier;
use crate::utils::error::{Result, RiskError};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticRegressionParams {
    /// Inverse of the L2 regularisation strength.
    pub c: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub random_state: u64,
}

impl Default for LogisticRegressionParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tol: 1e-4,
            random_state: 42,
        }
    }
}

/// L2-penalised binary logistic regression.
///
/// Minimises `0.5 * ‖w‖² + C * Σ logloss(xᵢ·w + b, yᵢ)` with damped Newton
/// steps; the intercept is not penalised.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub params: LogisticRegressionParams,
    pub coef: Vec<f64>,
    pub intercept: f64,
    pub n_iter: usize,
    pub fitted: bool,
}

impl LogisticRegression {
    pub fn new(params: LogisticRegressionParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    fn decision_function(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.fitted {
            return Err(RiskError::not_fitted("LogisticRegression"));
        }
        if x.ncols() != self.coef.len() {
            return Err(RiskError::ValidationError {
                message: format!(
                    "LogisticRegression expects {} features, got {}",
                    self.coef.len(),
                    x.ncols()
                ),
            });
        }
        let w = Array1::from(self.coef.clone());
        Ok(x.dot(&w) + self.intercept)
    }

    fn objective(&self, x: &Array2<f64>, y: &Array1<f64>, w: &Array1<f64>, b: f64) -> f64 {
        let z = x.dot(w) + b;
        let loss: f64 = z
            .iter()
            .zip(y.iter())
            .map(|(&zi, &yi)| softplus(zi) - yi * zi)
            .sum();
        0.5 * w.dot(w) + self.params.c * loss
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// ln(1 + e^z) without overflow.
fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

/// 高斯消去法 (部分主元) 解 A·x = b
fn solve_linear(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-300 {
            return Err(RiskError::model("singular Hessian in logistic regression"));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in (row + 1)..n {
            sum -= a[[row, k]] * x[k];
        }
        x[row] = sum / a[[row, row]];
    }
    Ok(x)
}

impl Classifier for LogisticRegression {
    fn name(&self) -> &'static str {
        "LogisticRegression"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &[u8]) -> Result<()> {
        let (n, d) = x.dim();
        if n != y.len() {
            return Err(RiskError::ValidationError {
                message: format!("{} rows but {} labels", n, y.len()),
            });
        }
        let positives = y.iter().filter(|&&v| v == 1).count();
        if positives == 0 || positives == n {
            return Err(RiskError::model(
                "LogisticRegression needs samples of both classes",
            ));
        }

        let c = self.params.c;
        let y_f = Array1::from_iter(y.iter().map(|&v| f64::from(v)));
        let mut w = Array1::<f64>::zeros(d);
        let mut b = 0.0;
        let mut objective = self.objective(x, &y_f, &w, b);
        let mut converged = false;
        let mut iterations = 0;

        for iter in 0..self.params.max_iter {
            iterations = iter + 1;
            let z = x.dot(&w) + b;
            let p = z.mapv(sigmoid);
            let residual = &p - &y_f;

            let grad_w = x.t().dot(&residual) * c + &w;
            let grad_b = residual.sum() * c;

            let max_grad = grad_w
                .iter()
                .fold(grad_b.abs(), |acc, g| acc.max(g.abs()));
            if max_grad < self.params.tol {
                converged = true;
                break;
            }

            // Hessian: [C·XᵀSX + I, C·Xᵀs; C·sᵀX, C·Σs]
            let s = p.mapv(|pi| pi * (1.0 - pi));
            let weighted = x * &s.view().insert_axis(Axis(1));
            let mut hessian = Array2::<f64>::zeros((d + 1, d + 1));
            hessian
                .slice_mut(ndarray::s![..d, ..d])
                .assign(&(x.t().dot(&weighted) * c + Array2::<f64>::eye(d)));
            let xs = x.t().dot(&s) * c;
            for j in 0..d {
                hessian[[j, d]] = xs[j];
                hessian[[d, j]] = xs[j];
            }
            hessian[[d, d]] = s.sum() * c + 1e-10;

            let mut gradient = Array1::<f64>::zeros(d + 1);
            gradient.slice_mut(ndarray::s![..d]).assign(&grad_w);
            gradient[d] = grad_b;

            let step = solve_linear(hessian, gradient)?;

            // 回溯線搜尋，確保目標函數下降
            let mut scale = 1.0;
            loop {
                let w_new = &w - &(step.slice(ndarray::s![..d]).to_owned() * scale);
                let b_new = b - step[d] * scale;
                let candidate = self.objective(x, &y_f, &w_new, b_new);
                if candidate <= objective || scale < 1e-8 {
                    w = w_new;
                    b = b_new;
                    objective = candidate;
                    break;
                }
                scale *= 0.5;
            }
        }

        if !converged {
            tracing::warn!(
                "LogisticRegression did not converge in {} iterations",
                self.params.max_iter
            );
        }

        self.coef = w.to_vec();
        self.intercept = b;
        self.n_iter = iterations;
        self.fitted = true;
        tracing::debug!(
            "LogisticRegression fitted in {} iterations (objective {:.6})",
            iterations,
            objective
        );
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        Ok(self.decision_function(x)?.mapv(sigmoid).to_vec())
    }

    fn params(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("C".to_string(), self.params.c.to_string()),
            ("max_iter".to_string(), self.params.max_iter.to_string()),
            ("random_state".to_string(), self.params.random_state.to_string()),
            ("solver".to_string(), "newton".to_string()),
            ("tol".to_string(), self.params.tol.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable() -> (Array2<f64>, Vec<u8>) {
        let x = array![
            [-2.0, -1.0],
            [-1.5, -0.5],
            [-1.0, -1.5],
            [-0.5, -0.2],
            [0.5, 0.3],
            [1.0, 1.5],
            [1.5, 0.5],
            [2.0, 1.0]
        ];
        (x, vec![0, 0, 0, 0, 1, 1, 1, 1])
    }

    #[test]
    fn test_fit_separates_classes() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new(LogisticRegressionParams::default());
        model.fit(&x, &y).unwrap();

        assert!(model.fitted);
        assert_eq!(model.predict(&x).unwrap(), y);
        let proba = model.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(proba[0] < 0.5 && proba[7] > 0.5);
    }

    #[test]
    fn test_gradient_vanishes_at_solution() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new(LogisticRegressionParams {
            tol: 1e-8,
            ..Default::default()
        });
        model.fit(&x, &y).unwrap();

        let p = Array1::from(model.predict_proba(&x).unwrap());
        let y_f = Array1::from_iter(y.iter().map(|&v| f64::from(v)));
        let grad_w = x.t().dot(&(&p - &y_f)) + Array1::from(model.coef.clone());
        assert!(grad_w.iter().all(|g| g.abs() < 1e-6));
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let model = LogisticRegression::default();
        assert!(model.predict_proba(&array![[1.0, 2.0]]).is_err());
    }

    #[test]
    fn test_single_class_is_rejected() {
        let mut model = LogisticRegression::default();
        assert!(model.fit(&array![[1.0], [2.0]], &[1, 1]).is_err());
    }

    #[test]
    fn test_solve_linear() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![3.0, 5.0];
        let x = solve_linear(a, b).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }
}

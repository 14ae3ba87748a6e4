//! Standardization + logistic regression pipeline

use crate::error::PipelineError;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Per-feature standardization fitted on the training split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit means and population standard deviations column by column.
    ///
    /// Constant columns get a scale of 1.0 so they map to zero.
    pub fn fit(x: &[Vec<f64>]) -> Result<Self, PipelineError> {
        let width = row_width(x)?;
        let n = x.len() as f64;

        let mut mean = vec![0.0; width];
        for row in x {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }

        let mut variance = vec![0.0; width];
        for row in x {
            for ((var, v), m) in variance.iter_mut().zip(row).zip(&mean) {
                *var += (v - m).powi(2) / n;
            }
        }

        let scale = variance
            .into_iter()
            .map(|var| {
                let sd = var.sqrt();
                if sd > f64::EPSILON {
                    sd
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self { mean, scale })
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// Solver settings for [`LogisticRegression::fit`]
#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    /// Inverse L2 regularization strength
    pub c: f64,
    pub max_iter: usize,
    pub tolerance: f64,
    /// Weight classes inversely to their frequency
    pub balanced: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 500,
            tolerance: 1e-8,
            balanced: true,
        }
    }
}

/// Binary logistic regression on standardized inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticRegression {
    /// Fit by Newton iterations on the L2-regularized weighted log-loss.
    ///
    /// The intercept is not penalized. Returns the model and the number of
    /// iterations used.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[u8],
        options: &SolverOptions,
    ) -> Result<(Self, usize), PipelineError> {
        let width = row_width(x)?;
        if x.len() != y.len() {
            return Err(PipelineError::training(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }

        let sample_weights = class_weights(y, options.balanced);
        let dim = width + 1;
        // Column 0 is the intercept
        let design = DMatrix::from_fn(x.len(), dim, |i, j| if j == 0 { 1.0 } else { x[i][j - 1] });
        let targets = DVector::from_iterator(y.len(), y.iter().map(|&v| f64::from(v)));
        let weights = DVector::from_vec(sample_weights);

        let mut penalty = DMatrix::<f64>::identity(dim, dim) / options.c;
        // Intercept is unpenalized; the jitter keeps the system solvable when a class is absent
        penalty[(0, 0)] = 1e-12;

        let mut theta = DVector::<f64>::zeros(dim);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < options.max_iter {
            iterations += 1;

            let p = (&design * &theta).map(sigmoid);
            let residual = (&p - &targets).component_mul(&weights);
            let curvature = p.zip_map(&weights, |pi, w| w * pi * (1.0 - pi));

            let mut weighted = design.clone();
            for (mut row, c) in weighted.row_iter_mut().zip(curvature.iter()) {
                row *= *c;
            }

            let mut shrink = &penalty * &theta;
            shrink[0] = 0.0;
            let gradient = design.tr_mul(&residual) + shrink;
            let hessian = design.tr_mul(&weighted) + &penalty;

            let step = hessian
                .cholesky()
                .ok_or_else(|| PipelineError::training("Hessian is not positive definite"))?
                .solve(&gradient);
            theta -= &step;

            if step.amax() < options.tolerance {
                converged = true;
                break;
            }
        }

        if converged {
            debug!(iterations, "Logistic regression converged");
        } else {
            warn!(
                iterations,
                max_iter = options.max_iter,
                "Logistic regression did not converge"
            );
        }

        Ok((
            Self {
                intercept: theta[0],
                coefficients: theta.iter().skip(1).copied().collect(),
            },
            iterations,
        ))
    }

    /// Positive-class probability for one standardized row.
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        sigmoid(self.intercept + dot(&self.coefficients, row))
    }
}

/// The fitted artifact: scaler and classifier plus the schema they expect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    pub model_version: String,
    /// Column order the pipeline was fitted on
    pub features: Vec<String>,
    pub scaler: StandardScaler,
    pub classifier: LogisticRegression,
}

impl FittedPipeline {
    /// Probability for a row already in `features` order.
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        self.classifier.predict_proba(&self.scaler.transform(row))
    }

    /// Per-feature terms of the linear score, `coef * standardized value`.
    pub fn contributions(&self, row: &[f64]) -> Vec<(String, f64)> {
        self.scaler
            .transform(row)
            .iter()
            .zip(&self.classifier.coefficients)
            .zip(&self.features)
            .map(|((z, coef), name)| (name.clone(), coef * z))
            .collect()
    }

    /// Check internal dimensions agree.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let n = self.features.len();
        if self.scaler.mean.len() != n
            || self.scaler.scale.len() != n
            || self.classifier.coefficients.len() != n
        {
            return Err(PipelineError::artifact(format!(
                "pipeline dimensions disagree with {n} features"
            )));
        }
        Ok(())
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

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn row_width(x: &[Vec<f64>]) -> Result<usize, PipelineError> {
    let width = x
        .first()
        .map(Vec::len)
        .ok_or_else(|| PipelineError::training("no rows to fit"))?;
    if x.iter().any(|r| r.len() != width) {
        return Err(PipelineError::training("rows have differing lengths"));
    }
    Ok(width)
}

/// `n / (n_classes * n_c)` per sample when balanced, else 1.0.
fn class_weights(y: &[u8], balanced: bool) -> Vec<f64> {
    if !balanced {
        return vec![1.0; y.len()];
    }
    let positives = y.iter().filter(|&&v| v == 1).count();
    let counts = [y.len() - positives, positives];
    let present = counts.iter().filter(|&&c| c > 0).count().max(1);

    y.iter()
        .map(|&v| {
            let count = counts[usize::from(v == 1)];
            y.len() as f64 / (present as f64 * count as f64)
        })
        .collect()
}

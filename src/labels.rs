//! Label rules turning `free_ratio` into the binary training target.
//!
//! A low free ratio stands in for "this station is about to run out of bikes".
//! Synthetic data uses a fixed cut; live data uses a cut recomputed from each
//! frame. The two stay separate, named rules.

use crate::dataset::TrainingFrame;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

/// Fixed cut used with synthetic data
pub const SYNTHETIC_THRESHOLD: f64 = 0.30;

/// Percentile used by the data-derived rule
pub const LIVE_QUANTILE: f64 = 0.20;

/// Fewest rows the data-derived rule will label
pub const MIN_TRAINING_ROWS: usize = 20;

/// A label rule with its resolved threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LabelRule {
    /// `free_ratio < threshold` with a constant threshold
    SyntheticFixed { threshold: f64 },
    /// `free_ratio < threshold` where threshold is a percentile of the frame
    Quantile { quantile: f64, threshold: f64 },
}

/// Serializable description stored in artifact metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRuleInfo {
    pub rule_name: String,
    pub threshold: f64,
    pub target_rule: String,
}

impl LabelRule {
    pub fn synthetic() -> Self {
        Self::SyntheticFixed {
            threshold: SYNTHETIC_THRESHOLD,
        }
    }

    /// The 20th-percentile rule computed from `frame`.
    pub fn q20(frame: &TrainingFrame, min_rows: usize) -> Result<Self, PipelineError> {
        Self::from_quantile(frame, LIVE_QUANTILE, min_rows)
    }

    pub fn from_quantile(
        frame: &TrainingFrame,
        quantile: f64,
        min_rows: usize,
    ) -> Result<Self, PipelineError> {
        let required = min_rows.max(1);
        if frame.len() < required {
            return Err(PipelineError::InsufficientData {
                found: frame.len(),
                required,
            });
        }

        Ok(Self::Quantile {
            quantile,
            threshold: percentile(&frame.free_ratios(), quantile),
        })
    }

    pub fn name(&self) -> String {
        match self {
            Self::SyntheticFixed { .. } => "synthetic_fixed".to_string(),
            Self::Quantile { quantile, .. } => format!("q{}", (quantile * 100.0).round() as u32),
        }
    }

    pub fn threshold(&self) -> f64 {
        match *self {
            Self::SyntheticFixed { threshold } | Self::Quantile { threshold, .. } => threshold,
        }
    }

    /// Label for one `free_ratio` value.
    pub fn label(&self, free_ratio: f64) -> u8 {
        u8::from(free_ratio < self.threshold())
    }

    /// Labels for every row of `frame`, in row order.
    pub fn apply(&self, frame: &TrainingFrame) -> Vec<u8> {
        frame.rows().iter().map(|r| self.label(r.free_ratio)).collect()
    }

    pub fn info(&self) -> LabelRuleInfo {
        let target_rule = match self {
            Self::SyntheticFixed { threshold } => format!("free_ratio < {threshold:.6} (synthetic)"),
            Self::Quantile { threshold, .. } => format!("free_ratio < {threshold:.6}"),
        };
        LabelRuleInfo {
            rule_name: self.name(),
            threshold: self.threshold(),
            target_rule,
        }
    }
}

/// Percentile with linear interpolation between order statistics.
///
/// The fractional rank is `q * (n + 1)` over zero-based sorted positions,
/// clamped to the sample range. For `[0.1, 0.1, 0.2, 0.3, 0.9]` and `q = 0.2`
/// the rank is 1.2, giving 0.12, so the tied minimum is labelled positive.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let last = (sorted.len() - 1) as f64;
    let rank = (q.clamp(0.0, 1.0) * (sorted.len() + 1) as f64).clamp(0.0, last);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

//! Offline training: split, fit, evaluate.

use crate::dataset::TrainingFrame;
use crate::error::PipelineError;
use crate::labels::LabelRule;
use crate::models::artifacts::{ArtifactMetadata, TrainingMetrics};
use crate::models::evaluation::{f1_score, roc_auc};
use crate::models::pipeline::{FittedPipeline, LogisticRegression, SolverOptions, StandardScaler};
use crate::types::prediction::DECISION_THRESHOLD;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

/// Training run settings
#[derive(Debug, Clone, Copy)]
pub struct TrainOptions {
    /// Held-out share of rows
    pub test_fraction: f64,
    /// Seed for the split shuffle
    pub seed: u64,
    pub max_iter: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            test_fraction: 0.25,
            seed: 42,
            max_iter: 500,
        }
    }
}

/// Everything one training run produces
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub pipeline: FittedPipeline,
    pub metrics: TrainingMetrics,
    pub metadata: ArtifactMetadata,
}

/// Row indices of a train/test split
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    pub stratified: bool,
}

/// Version string for a run at `at`; sorts lexicographically by time.
pub fn model_version_at(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Fit the standardization + logistic regression pipeline and evaluate it.
pub fn train(
    frame: &TrainingFrame,
    labels: &[u8],
    rule: &LabelRule,
    options: &TrainOptions,
) -> Result<TrainingOutcome, PipelineError> {
    if frame.len() != labels.len() {
        return Err(PipelineError::training(format!(
            "{} rows but {} labels",
            frame.len(),
            labels.len()
        )));
    }
    if frame.len() < 2 {
        return Err(PipelineError::InsufficientData {
            found: frame.len(),
            required: 2,
        });
    }

    let positives = labels.iter().filter(|&&y| y == 1).count();
    let rule_info = rule.info();
    info!(
        class0 = labels.len() - positives,
        class1 = positives,
        "Class distribution"
    );
    info!(
        rule_name = %rule_info.rule_name,
        threshold = rule_info.threshold,
        target = %rule_info.target_rule,
        "Label rule"
    );

    let split = train_test_split(labels, options.test_fraction, options.seed);
    if !split.stratified {
        warn!("Not enough samples per class for a stratified split; using a non-stratified split");
    }

    let x = frame.matrix();
    let x_train: Vec<Vec<f64>> = split.train.iter().map(|&i| x[i].clone()).collect();
    let y_train: Vec<u8> = split.train.iter().map(|&i| labels[i]).collect();

    let scaler = StandardScaler::fit(&x_train)?;
    let z_train: Vec<Vec<f64>> = x_train.iter().map(|r| scaler.transform(r)).collect();
    let solver = SolverOptions {
        max_iter: options.max_iter,
        ..SolverOptions::default()
    };
    let (classifier, iterations) = LogisticRegression::fit(&z_train, &y_train, &solver)?;

    let model_version = model_version_at(Utc::now());
    let pipeline = FittedPipeline {
        model_version: model_version.clone(),
        features: frame.feature_names(),
        scaler,
        classifier,
    };

    let y_test: Vec<u8> = split.test.iter().map(|&i| labels[i]).collect();
    let proba: Vec<f64> = split
        .test
        .iter()
        .map(|&i| pipeline.predict_proba(&x[i]))
        .collect();
    let predicted: Vec<u8> = proba
        .iter()
        .map(|&p| u8::from(p >= DECISION_THRESHOLD))
        .collect();

    let metrics = TrainingMetrics {
        f1: f1_score(&y_test, &predicted),
        roc_auc: roc_auc(&y_test, &proba),
        n_samples: frame.len(),
        n_train: split.train.len(),
        n_test: split.test.len(),
        threshold: DECISION_THRESHOLD,
        stratified: split.stratified,
        iterations,
    };

    info!(
        model_version = %model_version,
        f1 = metrics.f1,
        roc_auc = metrics.roc_auc,
        n = metrics.n_samples,
        "Trained model"
    );

    let metadata = ArtifactMetadata {
        model_version,
        features: pipeline.features.clone(),
        rule_name: Some(rule_info.rule_name),
        threshold: Some(rule_info.threshold),
        target_rule: Some(rule_info.target_rule),
    };

    Ok(TrainingOutcome {
        pipeline,
        metrics,
        metadata,
    })
}

/// Seeded shuffle split.
///
/// Stratifies by label when both classes have at least two rows.
pub fn train_test_split(labels: &[u8], test_fraction: f64, seed: u64) -> Split {
    let mut rng = StdRng::seed_from_u64(seed);
    let fraction = test_fraction.clamp(0.0, 1.0);

    let mut by_class: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    for (i, &y) in labels.iter().enumerate() {
        by_class[usize::from(y == 1)].push(i);
    }
    let stratified = by_class.iter().all(|c| c.len() >= 2);

    let groups: Vec<Vec<usize>> = if stratified {
        by_class.to_vec()
    } else {
        vec![(0..labels.len()).collect()]
    };

    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for mut group in groups {
        group.shuffle(&mut rng);
        let n_test = held_out_count(group.len(), fraction);
        test.extend_from_slice(&group[..n_test]);
        train.extend_from_slice(&group[n_test..]);
    }

    Split {
        train,
        test,
        stratified,
    }
}

/// Rows to hold out from a group: rounded up, leaving at least one on each side.
fn held_out_count(len: usize, fraction: f64) -> usize {
    if len < 2 {
        return 0;
    }
    ((len as f64 * fraction).ceil() as usize).clamp(1, len - 1)
}

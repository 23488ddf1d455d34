//! Multinomial logistic regression over standardized URL features.

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::UrlCategory;

use super::features::FEATURE_COUNT;

/// Bumped whenever the feature layout or serialized shape changes; stored
/// models with another version are treated as incompatible.
pub const MODEL_FORMAT_VERSION: u32 = 1;

const CLASS_COUNT: usize = UrlCategory::ALL.len();

/// Training hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    pub l2: f32,
    /// Fraction of samples held out for evaluation.
    pub test_ratio: f32,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 300,
            learning_rate: 0.5,
            l2: 0.001,
            test_ratio: 0.2,
            seed: 0x5eed_cafe,
        }
    }
}

/// Evaluation on the held-out split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub train_size: usize,
    pub test_size: usize,
    /// Accuracy on the held-out split, or on the training split when the
    /// dataset is too small to hold anything out.
    pub accuracy: f32,
    pub epochs: usize,
}

/// A trained model: standardization parameters plus one weight row per class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub format_version: u32,
    pub feature_count: usize,
    pub means: Vec<f32>,
    pub scales: Vec<f32>,
    /// `weights[class][feature]`, class order is [`UrlCategory::index`].
    pub weights: Vec<Vec<f32>>,
    pub biases: Vec<f32>,
    /// SHA-256 of the dataset file this model was trained on.
    pub dataset_hash: Option<String>,
    pub report: TrainingReport,
    pub trained_at: DateTime<Utc>,
}

impl LinearModel {
    /// True if this model can score vectors from the current feature extractor.
    pub fn is_compatible(&self) -> bool {
        self.format_version == MODEL_FORMAT_VERSION
            && self.feature_count == FEATURE_COUNT
            && self.means.len() == FEATURE_COUNT
            && self.scales.len() == FEATURE_COUNT
            && self.biases.len() == CLASS_COUNT
            && self.weights.len() == CLASS_COUNT
            && self.weights.iter().all(|row| row.len() == FEATURE_COUNT)
    }

    /// Class probabilities, or `None` when `features` has the wrong length.
    pub fn predict_proba(&self, features: &[f32]) -> Option<Vec<f32>> {
        if features.len() != self.feature_count {
            return None;
        }
        let x = standardize(features, &self.means, &self.scales);
        Some(softmax(&logits(&self.weights, &self.biases, &x)))
    }

    /// Top class and its probability.
    pub fn predict(&self, features: &[f32]) -> Option<(UrlCategory, f32)> {
        let probs = self.predict_proba(features)?;
        let (idx, p) = probs
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))?;
        Some((UrlCategory::from_index(idx), p))
    }
}

/// Train on `samples` with a deterministic shuffle and an 80/20 split.
pub fn train(
    samples: &[(Vec<f32>, UrlCategory)],
    config: &TrainingConfig,
) -> Result<LinearModel, AppError> {
    let samples: Vec<&(Vec<f32>, UrlCategory)> = samples
        .iter()
        .filter(|(x, _)| x.len() == FEATURE_COUNT)
        .collect();
    if samples.is_empty() {
        return Err(AppError::ModelUnavailable(
            "No usable training samples".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..samples.len()).collect();
    order.shuffle(&mut StdRng::seed_from_u64(config.seed));

    let test_size = if samples.len() < 2 {
        0
    } else {
        ((samples.len() as f32 * config.test_ratio).round() as usize).min(samples.len() - 1)
    };
    let (test_idx, train_idx) = order.split_at(test_size);

    let (means, scales) = fit_scaler(train_idx.iter().map(|&i| samples[i].0.as_slice()));
    let train_set: Vec<(Vec<f32>, usize)> = train_idx
        .iter()
        .map(|&i| (standardize(&samples[i].0, &means, &scales), samples[i].1.index()))
        .collect();

    let mut weights = vec![vec![0.0_f32; FEATURE_COUNT]; CLASS_COUNT];
    let mut biases = vec![0.0_f32; CLASS_COUNT];
    let n = train_set.len() as f32;

    for _ in 0..config.epochs {
        let mut grad_w = vec![vec![0.0_f32; FEATURE_COUNT]; CLASS_COUNT];
        let mut grad_b = vec![0.0_f32; CLASS_COUNT];

        for (x, label) in &train_set {
            let probs = softmax(&logits(&weights, &biases, x));
            for class in 0..CLASS_COUNT {
                let target = if class == *label { 1.0 } else { 0.0 };
                let err = probs[class] - target;
                grad_b[class] += err;
                for (g, xi) in grad_w[class].iter_mut().zip(x) {
                    *g += err * xi;
                }
            }
        }

        for class in 0..CLASS_COUNT {
            biases[class] -= config.learning_rate * grad_b[class] / n;
            for (w, g) in weights[class].iter_mut().zip(&grad_w[class]) {
                *w -= config.learning_rate * (g / n + config.l2 * *w);
            }
        }
    }

    let mut model = LinearModel {
        format_version: MODEL_FORMAT_VERSION,
        feature_count: FEATURE_COUNT,
        means,
        scales,
        weights,
        biases,
        dataset_hash: None,
        report: TrainingReport {
            train_size: train_idx.len(),
            test_size,
            accuracy: 0.0,
            epochs: config.epochs,
        },
        trained_at: Utc::now(),
    };

    let eval_idx = if test_idx.is_empty() { train_idx } else { test_idx };
    let correct = eval_idx
        .iter()
        .filter(|&&i| {
            model
                .predict(&samples[i].0)
                .is_some_and(|(category, _)| category == samples[i].1)
        })
        .count();
    model.report.accuracy = correct as f32 / eval_idx.len() as f32;

    Ok(model)
}

fn fit_scaler<'a>(rows: impl Iterator<Item = &'a [f32]>) -> (Vec<f32>, Vec<f32>) {
    let rows: Vec<&[f32]> = rows.collect();
    let n = rows.len().max(1) as f32;
    let mut means = vec![0.0_f32; FEATURE_COUNT];
    for row in &rows {
        for (m, v) in means.iter_mut().zip(row.iter()) {
            *m += v / n;
        }
    }
    let mut scales = vec![0.0_f32; FEATURE_COUNT];
    for row in &rows {
        for ((s, v), m) in scales.iter_mut().zip(row.iter()).zip(&means) {
            *s += (v - m).powi(2) / n;
        }
    }
    for s in &mut scales {
        *s = s.sqrt();
        if *s < 1e-6 {
            *s = 1.0;
        }
    }
    (means, scales)
}

fn standardize(x: &[f32], means: &[f32], scales: &[f32]) -> Vec<f32> {
    x.iter()
        .zip(means)
        .zip(scales)
        .map(|((v, m), s)| (v - m) / s)
        .collect()
}

fn logits(weights: &[Vec<f32>], biases: &[f32], x: &[f32]) -> Vec<f32> {
    weights
        .iter()
        .zip(biases)
        .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + b)
        .collect()
}

fn softmax(z: &[f32]) -> Vec<f32> {
    let max = z.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = z.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

//! URL classification: a small trained model with a keyword heuristic fallback.
//!
//! [`UrlClassifier::initialize`] never fails. It loads a stored model, trains
//! one from the labeled dataset when none is stored, or settles on the
//! heuristic when neither is possible.

pub mod features;
pub mod heuristic;
pub mod model;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{UrlCategory, compute_hash};

pub use features::{FEATURE_COUNT, extract_features};
pub use model::{LinearModel, TrainingConfig, TrainingReport};
pub use store::{FileModelStore, ModelStore};

/// Minimum top-class probability for the model's verdict to be used.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Which path produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Model,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub category: UrlCategory,
    pub confidence: f32,
    pub source: PredictionSource,
}

#[derive(Debug, Deserialize)]
struct LabeledUrl {
    url: String,
    label: String,
}

pub struct UrlClassifier {
    model: RwLock<Option<Arc<LinearModel>>>,
    store: Option<Box<dyn ModelStore>>,
    dataset: Option<PathBuf>,
    training: TrainingConfig,
}

impl std::fmt::Debug for UrlClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlClassifier")
            .field("model_loaded", &self.is_model_loaded())
            .field("dataset", &self.dataset)
            .finish()
    }
}

impl UrlClassifier {
    /// A classifier that only ever uses the keyword heuristic.
    pub fn heuristic_only() -> Self {
        Self {
            model: RwLock::new(None),
            store: None,
            dataset: None,
            training: TrainingConfig::default(),
        }
    }

    /// Load a stored model, else train from `dataset`, else fall back to the heuristic.
    pub fn initialize(
        store: Box<dyn ModelStore>,
        dataset: Option<PathBuf>,
        training: TrainingConfig,
    ) -> Self {
        let classifier = Self {
            model: RwLock::new(None),
            store: Some(store),
            dataset,
            training,
        };

        match classifier.load_stored() {
            Ok(Some(model)) => {
                tracing::info!(
                    accuracy = model.report.accuracy,
                    trained_at = %model.trained_at,
                    "Loaded classifier model"
                );
                classifier.install(model);
                return classifier;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Stored classifier model unusable"),
        }

        match classifier.retrain() {
            Ok(report) => tracing::info!(
                accuracy = report.accuracy,
                train_size = report.train_size,
                test_size = report.test_size,
                "Trained classifier model"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                "No classifier model available, using keyword heuristic"
            ),
        }
        classifier
    }

    fn load_stored(&self) -> Result<Option<LinearModel>, AppError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        match store.load()? {
            Some(model) if model.is_compatible() => Ok(Some(model)),
            Some(_) => Err(AppError::ModelUnavailable(format!(
                "Model at {} is incompatible with the current feature layout",
                store.location()
            ))),
            None => Ok(None),
        }
    }

    fn install(&self, model: LinearModel) {
        let mut slot = self.model.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(Arc::new(model));
    }

    fn current(&self) -> Option<Arc<LinearModel>> {
        self.model.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_model_loaded(&self) -> bool {
        self.current().is_some()
    }

    /// Report of the active model, if any.
    pub fn model_report(&self) -> Option<TrainingReport> {
        self.current().map(|m| m.report.clone())
    }

    /// Classify a URL. Never fails.
    pub fn predict(&self, url: &str) -> Prediction {
        let features = extract_features(url);
        if !features.is_empty()
            && let Some(model) = self.current()
            && let Some((category, confidence)) = model.predict(&features)
            && confidence >= CONFIDENCE_THRESHOLD
        {
            return Prediction {
                category,
                confidence,
                source: PredictionSource::Model,
            };
        }

        let (category, confidence) = heuristic::classify(url);
        Prediction {
            category,
            confidence,
            source: PredictionSource::Heuristic,
        }
    }

    /// Train from the dataset, persist, and swap the model in.
    ///
    /// Training is deterministic, so repeating it on an unchanged dataset
    /// yields the same weights.
    pub fn retrain(&self) -> Result<TrainingReport, AppError> {
        let dataset = self
            .dataset
            .as_deref()
            .ok_or_else(|| AppError::ModelUnavailable("No training dataset configured".into()))?;
        let (samples, hash) = load_dataset(dataset)?;

        let mut model = model::train(&samples, &self.training)?;
        model.dataset_hash = Some(hash);
        let report = model.report.clone();

        if let Some(store) = &self.store
            && let Err(e) = store.save(&model)
        {
            tracing::error!(error = %e, location = %store.location(), "Failed to persist model");
        }
        self.install(model);
        Ok(report)
    }

    /// Retrain only when the dataset fingerprint differs from the active model's.
    pub fn retrain_if_changed(&self) -> Result<Option<TrainingReport>, AppError> {
        let dataset = self
            .dataset
            .as_deref()
            .ok_or_else(|| AppError::ModelUnavailable("No training dataset configured".into()))?;
        let hash = dataset_fingerprint(dataset)?;
        let current = self.current().and_then(|m| m.dataset_hash.clone());
        if current.as_deref() == Some(hash.as_str()) {
            tracing::debug!("Dataset unchanged, skipping retrain");
            return Ok(None);
        }
        self.retrain().map(Some)
    }
}

/// SHA-256 of the dataset file.
pub fn dataset_fingerprint(path: &Path) -> Result<String, AppError> {
    let bytes = std::fs::read(path).map_err(|e| {
        AppError::ModelUnavailable(format!("Cannot read dataset {}: {e}", path.display()))
    })?;
    Ok(compute_hash(&bytes))
}

/// Read a `url,label` CSV into feature vectors. Rows with an unknown label or
/// an unparseable URL are skipped.
pub fn load_dataset(path: &Path) -> Result<(Vec<(Vec<f32>, UrlCategory)>, String), AppError> {
    let bytes = std::fs::read(path).map_err(|e| {
        AppError::ModelUnavailable(format!("Cannot read dataset {}: {e}", path.display()))
    })?;
    let hash = compute_hash(&bytes);

    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let mut samples = Vec::new();
    let mut skipped = 0usize;
    for row in reader.deserialize::<LabeledUrl>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                skipped += 1;
                tracing::debug!(error = %e, "Skipping malformed dataset row");
                continue;
            }
        };
        let Ok(category) = row.label.parse::<UrlCategory>() else {
            skipped += 1;
            continue;
        };
        let features = extract_features(&row.url);
        if features.is_empty() {
            skipped += 1;
            continue;
        }
        samples.push((features, category));
    }

    if skipped > 0 {
        tracing::warn!(skipped, path = %path.display(), "Skipped unusable dataset rows");
    }
    Ok((samples, hash))
}

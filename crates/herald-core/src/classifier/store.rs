//! Model persistence.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AppError;

use super::model::{LinearModel, MODEL_FORMAT_VERSION};

/// Saves and loads classifier models.
pub trait ModelStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<LinearModel>, AppError>;

    fn save(&self, model: &LinearModel) -> Result<(), AppError>;

    /// Where the model lives, for logging.
    fn location(&self) -> String;
}

/// JSON file under `{root}/{name}/v{format_version}/model.json`.
#[derive(Debug, Clone)]
pub struct FileModelStore {
    path: PathBuf,
}

impl FileModelStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::named(root, "url-classifier")
    }

    pub fn named(root: impl AsRef<Path>, name: &str) -> Self {
        let path = root
            .as_ref()
            .join(name)
            .join(format!("v{MODEL_FORMAT_VERSION}"))
            .join("model.json");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelStore for FileModelStore {
    fn load(&self) -> Result<Option<LinearModel>, AppError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::ModelUnavailable(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        let model = serde_json::from_slice(&bytes)?;
        Ok(Some(model))
    }

    fn save(&self, model: &LinearModel) -> Result<(), AppError> {
        let io_err = |e: std::io::Error| {
            AppError::Generic(format!("Failed to write {}: {e}", self.path.display()))
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(model)?).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        tracing::info!(path = %self.path.display(), "Saved classifier model");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

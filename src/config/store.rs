use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a JSON file
///
/// The file is read once on open; a missing file is created with defaults.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Arc<AppConfig>,
}

impl ConfigStore {
    /// Open the store at `path`, writing a default file if none exists
    pub async fn new(path: &Path) -> Result<Self> {
        let config = Self::load_config(path).await?;

        Ok(Self {
            path: path.to_path_buf(),
            config: Arc::new(config),
        })
    }

    async fn load_config(path: &Path) -> Result<AppConfig> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = AppConfig::default();
                Self::save_config_to_file(path, &config).await?;
                tracing::info!("Created default configuration at {}", path.display());
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_config_to_file(path: &Path, config: &AppConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write to a sibling temp file and rename so readers never see half a file
        let json = serde_json::to_string_pretty(config)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Get the loaded configuration
    pub fn get(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

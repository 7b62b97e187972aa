use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ModelSource;
use crate::musicgen::GenerationParams;
use crate::store::OutputNaming;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSource,
    /// Only use model files already present in the local hub cache.
    pub offline: bool,
    pub intra_threads: Option<usize>,
    /// Load the model at startup rather than on the first request.
    pub preload_model: bool,
    pub output_dir: PathBuf,
    pub output_naming: OutputNaming,
    pub host: String,
    pub port: u16,
    /// Requests allowed to run a generation at once; others queue.
    pub max_concurrency: usize,
    pub generation: GenerationParams,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelSource::default(),
            offline: false,
            intra_threads: None,
            preload_model: false,
            output_dir: PathBuf::from("audio_output"),
            output_naming: OutputNaming::default(),
            host: "127.0.0.1".into(),
            port: 8501,
            max_concurrency: 1,
            generation: GenerationParams::default(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply overrides from environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("HF_HUB_OFFLINE") {
            self.offline = matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "ON" | "on");
        }
        if let Some(v) = var("SONGFORGE_MODEL") {
            self.model = v.parse()?;
        }
        if let Some(v) = var("SONGFORGE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = var("HOST") {
            self.host = v;
        }
        if let Some(v) = var("PORT") {
            self.port = v
                .parse()
                .map_err(|e| Error::Config(format!("invalid PORT {v:?}: {e}")))?;
        }
        Ok(())
    }
}

/// Default location of the user's config file.
pub fn config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("songforge");
    path.push("config.json");
    path
}

/// Load the config at `path`, or the default location when `None`.
/// A missing file yields defaults; a malformed one is an error.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let default_path = config_path();
    let path = path.unwrap_or(&default_path);
    if path.exists() {
        tracing::debug!(path = %path.display(), "loading config");
        AppConfig::load(path)
    } else {
        Ok(AppConfig::default())
    }
}

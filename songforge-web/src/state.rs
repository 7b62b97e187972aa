use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};

use songforge_core::musicgen::GenerationParams;
use songforge_core::store::AudioStore;
use songforge_core::{AppConfig, CachedMusicGen, GenerationStatus, MusicGenerator, Result};

/// Whether the model is resident, as far as a request can tell without
/// waiting for the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    NotLoaded,
    Loading,
    Loaded,
}

impl ModelState {
    pub fn label(self) -> &'static str {
        match self {
            ModelState::NotLoaded => "not loaded yet",
            ModelState::Loading => "loading",
            ModelState::Loaded => "loaded",
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<Mutex<Box<dyn MusicGenerator>>>,
    pub store: Arc<AudioStore>,
    pub status: GenerationStatus,
    pub defaults: GenerationParams,
    /// Limits how many requests run a generation at once. Further
    /// requests queue on the semaphore.
    pub permits: Arc<Semaphore>,
    /// Last known `is_loaded()` of the generator, readable while it is busy.
    pub model_ready: Arc<AtomicBool>,
    pub model_label: String,
    pub offline: bool,
}

impl AppState {
    pub fn new(
        generator: Box<dyn MusicGenerator>,
        store: AudioStore,
        defaults: GenerationParams,
        max_concurrency: usize,
    ) -> Self {
        let ready = generator.is_loaded();
        Self {
            generator: Arc::new(Mutex::new(generator)),
            store: Arc::new(store),
            status: GenerationStatus::new(),
            defaults,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            model_ready: Arc::new(AtomicBool::new(ready)),
            model_label: String::new(),
            offline: false,
        }
    }

    /// Build the production state: output directory plus the cached
    /// MusicGen model, optionally loaded right away.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = AudioStore::open(&config.output_dir, config.output_naming)?;
        let mut generator =
            CachedMusicGen::new(config.model.clone(), config.offline, config.intra_threads);
        if config.preload_model {
            generator.warm_up()?;
        }
        let mut state = Self::new(
            Box::new(generator),
            store,
            config.generation.clone(),
            config.max_concurrency,
        );
        state.model_label = config.model.to_string();
        state.offline = config.offline;
        Ok(state)
    }

    /// A busy generator that has never reported a loaded model is still
    /// loading it.
    pub fn model_state(&self) -> ModelState {
        match self.generator.try_lock() {
            Ok(generator) if generator.is_loaded() => ModelState::Loaded,
            Ok(_) => ModelState::NotLoaded,
            Err(_) if self.model_ready.load(Ordering::Acquire) => ModelState::Loaded,
            Err(_) => ModelState::Loading,
        }
    }
}

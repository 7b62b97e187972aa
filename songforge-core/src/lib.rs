//! Lyrics-to-music generation with a MusicGen ONNX export.
//!
//! A [`song::SongRequest`] is turned into a text prompt, handed to a
//! [`generator::MusicGenerator`], and the resulting clip is written to an
//! [`store::AudioStore`] as a WAV file.

pub mod config;
pub mod download;
pub mod error;
pub mod generator;
pub mod model;
pub mod musicgen;
pub mod song;
pub mod store;
pub mod waveform;
pub mod wav;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use generator::{CachedMusicGen, Clip, MusicGenerator};
pub use song::{Genre, SongRequest};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "message")]
pub enum GenerationState {
    Idle,
    Generating,
    Complete,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    #[serde(flatten)]
    pub state: GenerationState,
    pub progress: f32,
    pub prompt: String,
}

/// Progress of the most recent generation, shared between the worker
/// thread and whoever reports it.
#[derive(Clone)]
pub struct GenerationStatus {
    inner: Arc<Mutex<StatusSnapshot>>,
}

impl GenerationStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatusSnapshot {
                state: GenerationState::Idle,
                progress: 0.0,
                prompt: String::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self, prompt: &str) {
        let mut status = self.lock();
        status.state = GenerationState::Generating;
        status.progress = 0.0;
        status.prompt = prompt.to_string();
    }

    pub fn set_progress(&self, progress: f32) {
        self.lock().progress = progress.clamp(0.0, 1.0);
    }

    pub fn complete(&self) {
        let mut status = self.lock();
        status.state = GenerationState::Complete;
        status.progress = 1.0;
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.lock().state = GenerationState::Error(message.into());
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().clone()
    }

    /// One-line summary, e.g. `Generating... 42%`.
    pub fn status_text(&self) -> String {
        let status = self.snapshot();
        match status.state {
            GenerationState::Idle => "Ready".into(),
            GenerationState::Generating => {
                format!("Generating... {:.0}%", status.progress * 100.0)
            }
            GenerationState::Complete => "Complete".into(),
            GenerationState::Error(e) => format!("Error: {e}"),
        }
    }
}

impl Default for GenerationStatus {
    fn default() -> Self {
        Self::new()
    }
}

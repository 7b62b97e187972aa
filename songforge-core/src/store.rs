use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::generator::Clip;
use crate::wav;

/// How saved clips are named inside the output directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputNaming {
    /// Always `audio_0.wav`; each generation replaces the previous one.
    Fixed,
    /// `generated_music_<n>.wav` with a random `n` below one million.
    #[default]
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedClip {
    pub file_name: String,
    pub path: PathBuf,
    pub duration_secs: f32,
}

/// Directory of generated WAV files.
#[derive(Debug, Clone)]
pub struct AudioStore {
    dir: PathBuf,
    naming: OutputNaming,
}

impl AudioStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>, naming: OutputNaming) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, naming })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_file_name(&self) -> String {
        match self.naming {
            OutputNaming::Fixed => "audio_0.wav".to_string(),
            OutputNaming::Random => {
                let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
                format!("generated_music_{n}.wav")
            }
        }
    }

    pub fn save(&self, clip: &Clip) -> Result<SavedClip> {
        let file_name = self.next_file_name();
        let path = self.dir.join(&file_name);
        wav::write_wav(&clip.samples, clip.sample_rate, &path)?;
        tracing::info!(path = %path.display(), "saved clip");
        Ok(SavedClip {
            file_name,
            path,
            duration_secs: clip.duration_secs(),
        })
    }

    /// Map a requested file name to a stored clip. Only bare `.wav` names
    /// are accepted, so lookups never leave the output directory.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf> {
        let valid = file_name.ends_with(".wav")
            && !file_name.starts_with('.')
            && file_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid || file_name.contains("..") {
            return Err(Error::InvalidFileName(file_name.to_string()));
        }
        let path = self.dir.join(file_name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::NotFound(file_name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip() -> Clip {
        Clip {
            samples: vec![0.1; 3200],
            sample_rate: 32_000,
        }
    }

    #[test]
    fn test_open_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let store = AudioStore::open(root.path().join("audio_output"), OutputNaming::Fixed).unwrap();
        assert!(store.dir().is_dir());
    }

    #[test]
    fn test_fixed_naming_overwrites() {
        let root = tempfile::tempdir().unwrap();
        let store = AudioStore::open(root.path(), OutputNaming::Fixed).unwrap();
        let first = store.save(&clip()).unwrap();
        let second = store.save(&clip()).unwrap();
        assert_eq!(first.file_name, "audio_0.wav");
        assert_eq!(first.path, second.path);
        assert!((first.duration_secs - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_random_naming_pattern() {
        let root = tempfile::tempdir().unwrap();
        let store = AudioStore::open(root.path(), OutputNaming::Random).unwrap();
        let saved = store.save(&clip()).unwrap();
        let n = saved
            .file_name
            .strip_prefix("generated_music_")
            .and_then(|rest| rest.strip_suffix(".wav"))
            .and_then(|n| n.parse::<u32>().ok())
            .unwrap();
        assert!(n < 1_000_000);
        assert_eq!(store.resolve(&saved.file_name).unwrap(), saved.path);
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = tempfile::tempdir().unwrap();
        let store = AudioStore::open(root.path(), OutputNaming::Fixed).unwrap();
        for name in ["../secret.wav", "a/b.wav", "..wav", ".hidden.wav", "notes.txt"] {
            assert!(matches!(store.resolve(name), Err(Error::InvalidFileName(_))), "{name}");
        }
        assert!(matches!(store.resolve("audio_0.wav"), Err(Error::NotFound(_))));
    }
}

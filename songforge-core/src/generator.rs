use crate::error::Result;
use crate::model::{self, ModelSource};
use crate::musicgen::{GenerationParams, MusicGenPipeline, SAMPLE_RATE};

/// A generated mono clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Clip {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Anything that turns a text prompt into audio.
pub trait MusicGenerator: Send {
    fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Clip>;

    /// Whether the model is already resident in memory.
    fn is_loaded(&self) -> bool {
        true
    }
}

/// MusicGen pipeline loaded on first use and kept for every later request.
pub struct CachedMusicGen {
    source: ModelSource,
    offline: bool,
    intra_threads: Option<usize>,
    pipeline: Option<MusicGenPipeline>,
}

impl CachedMusicGen {
    pub fn new(source: ModelSource, offline: bool, intra_threads: Option<usize>) -> Self {
        Self {
            source,
            offline,
            intra_threads,
            pipeline: None,
        }
    }

    /// Load the pipeline now instead of on the first request.
    pub fn warm_up(&mut self) -> Result<()> {
        self.pipeline().map(|_| ())
    }

    fn pipeline(&mut self) -> Result<&mut MusicGenPipeline> {
        let pipeline = match self.pipeline.take() {
            Some(pipeline) => pipeline,
            None => {
                tracing::info!(model = %self.source, offline = self.offline, "loading MusicGen model");
                let files = model::resolve(&self.source, self.offline)?;
                MusicGenPipeline::load(&files, self.intra_threads)?
            }
        };
        Ok(self.pipeline.insert(pipeline))
    }
}

impl MusicGenerator for CachedMusicGen {
    fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Clip> {
        let samples = self.pipeline()?.generate(prompt, params, progress)?;
        tracing::info!(
            samples = samples.len(),
            seconds = samples.len() as f32 / SAMPLE_RATE as f32,
            "generation finished"
        );
        Ok(Clip {
            samples,
            sample_rate: SAMPLE_RATE,
        })
    }

    fn is_loaded(&self) -> bool {
        self.pipeline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_duration() {
        let clip = Clip {
            samples: vec![0.0; 48_000],
            sample_rate: 32_000,
        };
        assert!((clip.duration_secs() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_missing_local_model_fails_without_caching() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator =
            CachedMusicGen::new(ModelSource::Local(dir.path().to_path_buf()), true, None);
        assert!(!generator.is_loaded());
        assert!(generator
            .generate("Lyrics: hi\nGenre: Pop", &GenerationParams::default(), &mut |_| {})
            .is_err());
        assert!(!generator.is_loaded());
    }
}

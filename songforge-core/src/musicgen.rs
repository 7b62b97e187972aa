use std::collections::HashMap;

use ndarray::{s, Array1, Array2, Array3, ArrayD, Axis, Ix3, IxDyn};
use ort::session::{Session, SessionInputValue};
use ort::value::Tensor;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{load_session, ModelFiles};

/// Output sample rate of the EnCodec decoder.
pub const SAMPLE_RATE: u32 = 32_000;
/// Codec frames per second of audio.
pub const FRAME_RATE: usize = 50;
/// Longest stretch the decoder generates in one pass.
pub const MAX_WINDOW_SECS: f32 = 30.0;

const NUM_CODEBOOKS: usize = 4;
const NUM_HEADS: usize = 16;
const HEAD_DIM: usize = 64;
const NUM_LAYERS: usize = 24;
const BOS_TOKEN: i64 = 2048;
const PAD_TOKEN: i64 = 2048;
const MAX_TEXT_TOKENS: usize = 512;
const CFG_BATCH: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub duration_secs: f32,
    pub use_sampling: bool,
    /// Zero disables top-k filtering.
    pub top_k: usize,
    /// Nucleus sampling threshold, used instead of top-k when above zero.
    pub top_p: f32,
    pub temperature: f32,
    pub guidance_scale: f32,
    /// New audio generated per window once a clip runs past one window.
    pub extend_stride_secs: f32,
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            duration_secs: 60.0,
            use_sampling: true,
            top_k: 250,
            top_p: 0.0,
            temperature: 1.0,
            guidance_scale: 3.0,
            extend_stride_secs: 18.0,
            seed: None,
        }
    }
}

impl GenerationParams {
    pub fn total_frames(&self) -> usize {
        (self.duration_secs * FRAME_RATE as f32).round() as usize
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.duration_secs > 0.0) {
            return Err(Error::InvalidParams("duration must be positive".into()));
        }
        if !(self.extend_stride_secs > 0.0 && self.extend_stride_secs <= MAX_WINDOW_SECS) {
            return Err(Error::InvalidParams(format!(
                "extend stride must be in (0, {MAX_WINDOW_SECS}] seconds"
            )));
        }
        if self.use_sampling && !(self.temperature > 0.0) {
            return Err(Error::InvalidParams("temperature must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(Error::InvalidParams("top_p must be within [0, 1]".into()));
        }
        Ok(())
    }
}

/// One decoder pass: `context_frames` of earlier codes are replayed before
/// `new_frames` fresh frames are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub context_frames: usize,
    pub new_frames: usize,
}

impl Window {
    fn frames(&self) -> usize {
        self.context_frames + self.new_frames
    }

    /// Decoder steps needed for this window (delayed length minus BOS).
    fn steps(&self) -> usize {
        self.frames() + NUM_CODEBOOKS - 1
    }
}

/// Split `total_frames` into decoder windows of at most `window_frames`,
/// each later window keeping `window_frames - stride_frames` of context.
pub fn plan_windows(total_frames: usize, window_frames: usize, stride_frames: usize) -> Vec<Window> {
    let stride_frames = stride_frames.clamp(1, window_frames.max(1));
    let context_frames = window_frames - stride_frames;
    let mut windows = Vec::new();
    let mut produced = 0;
    while produced < total_frames {
        let window = if produced == 0 {
            Window {
                context_frames: 0,
                new_frames: total_frames.min(window_frames),
            }
        } else {
            Window {
                context_frames: context_frames.min(produced),
                new_frames: (total_frames - produced).min(stride_frames),
            }
        };
        produced += window.new_frames;
        windows.push(window);
    }
    windows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pad,
    Frame(usize),
}

/// Which aligned frame codebook `cb` holds at delayed position `pos`.
/// Codebook k lags k positions behind codebook 0; position 0 is BOS.
fn delay_slot(cb: usize, pos: usize, frames: usize) -> Slot {
    if pos <= cb {
        return Slot::Pad;
    }
    let t = pos - 1 - cb;
    if t < frames {
        Slot::Frame(t)
    } else {
        Slot::Pad
    }
}

/// Align a delayed `[codebooks, frames + codebooks]` sequence back to
/// `[codebooks, frames]`. Stray PAD tokens decode as code 0.
fn undelay(delayed: &Array2<i64>, frames: usize) -> Array2<i64> {
    Array2::from_shape_fn((NUM_CODEBOOKS, frames), |(cb, t)| {
        match delayed[[cb, 1 + cb + t]] {
            PAD_TOKEN => 0,
            v => v,
        }
    })
}

fn argmax(logits: &[f32]) -> usize {
    logits
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Draw a token id from raw logits.
fn sample_token(logits: &[f32], params: &GenerationParams, rng: &mut impl Rng) -> Result<i64> {
    if !params.use_sampling || logits.is_empty() {
        return Ok(argmax(logits) as i64);
    }

    let mut indexed: Vec<(usize, f32)> = logits
        .iter()
        .enumerate()
        .map(|(i, &v)| (i, v / params.temperature))
        .collect();
    indexed.sort_unstable_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let max_logit = indexed[0].1;
    let exps: Vec<f32> = indexed.iter().map(|(_, v)| (v - max_logit).exp()).collect();
    let sum: f32 = exps.iter().sum();
    let mut probs: Vec<f32> = exps.iter().map(|e| e / sum).collect();

    let keep = if params.top_p > 0.0 {
        let mut cumulative = 0.0;
        probs
            .iter()
            .position(|p| {
                cumulative += p;
                cumulative >= params.top_p
            })
            .map_or(probs.len(), |i| i + 1)
    } else if params.top_k > 0 {
        params.top_k.min(probs.len())
    } else {
        probs.len()
    };
    probs.truncate(keep);

    let dist = WeightedIndex::new(&probs).map_err(|e| Error::Inference(e.to_string()))?;
    Ok(indexed[dist.sample(rng)].0 as i64)
}

/// Cut token ids and mask to `MAX_TEXT_TOKENS`, keeping the trailing EOS so
/// the encoder still sees a terminated sequence. Returns whether anything
/// was dropped.
fn truncate_prompt(token_ids: &mut Vec<i64>, attention: &mut Vec<i64>) -> bool {
    if token_ids.len() <= MAX_TEXT_TOKENS {
        return false;
    }
    let eos = token_ids[token_ids.len() - 1];
    token_ids.truncate(MAX_TEXT_TOKENS);
    token_ids[MAX_TEXT_TOKENS - 1] = eos;
    attention.truncate(MAX_TEXT_TOKENS);
    true
}

/// Text conditioning for classifier-free guidance: conditional row first,
/// zeroed unconditional row second.
struct Conditioning {
    hidden_states: Array3<f32>,
    attention_mask: Array2<i64>,
}

struct KvCache {
    decoder: HashMap<String, ArrayD<f32>>,
    encoder: HashMap<String, ArrayD<f32>>,
}

impl KvCache {
    fn empty() -> Self {
        let blank = || ArrayD::zeros(IxDyn(&[CFG_BATCH, NUM_HEADS, 0, HEAD_DIM]));
        let mut decoder = HashMap::new();
        let mut encoder = HashMap::new();
        for layer in 0..NUM_LAYERS {
            for kind in ["key", "value"] {
                decoder.insert(format!("past_key_values.{layer}.decoder.{kind}"), blank());
                encoder.insert(format!("past_key_values.{layer}.encoder.{kind}"), blank());
            }
        }
        Self { decoder, encoder }
    }
}

pub struct MusicGenPipeline {
    text_encoder: Session,
    decoder: Session,
    encodec_decode: Session,
    tokenizer: tokenizers::Tokenizer,
}

impl MusicGenPipeline {
    pub fn load(files: &ModelFiles, intra_threads: Option<usize>) -> Result<Self> {
        tracing::info!(path = %files.text_encoder.display(), "loading text encoder");
        let text_encoder = load_session(&files.text_encoder, intra_threads)?;
        tracing::info!(path = %files.decoder.display(), "loading decoder");
        let decoder = load_session(&files.decoder, intra_threads)?;
        tracing::info!(path = %files.encodec_decode.display(), "loading EnCodec decoder");
        let encodec_decode = load_session(&files.encodec_decode, intra_threads)?;
        let tokenizer = tokenizers::Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| Error::Tokenization(e.to_string()))?;

        tracing::info!("MusicGen pipeline loaded");
        Ok(Self {
            text_encoder,
            decoder,
            encodec_decode,
            tokenizer,
        })
    }

    /// Generate mono samples at [`SAMPLE_RATE`] for `prompt`.
    pub fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Vec<f32>> {
        params.validate()?;
        let mut rng: StdRng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let conditioning = self.encode_prompt(prompt)?;

        let window_frames = (MAX_WINDOW_SECS * FRAME_RATE as f32) as usize;
        let stride_frames = (params.extend_stride_secs * FRAME_RATE as f32).round() as usize;
        let windows = plan_windows(params.total_frames(), window_frames, stride_frames);
        let total_steps: usize = windows.iter().map(Window::steps).sum();
        tracing::debug!(?windows, total_steps, "planned generation windows");

        let mut codes = Array2::<i64>::zeros((NUM_CODEBOOKS, 0));
        let mut steps_done = 0;
        for window in &windows {
            let context = codes
                .slice(s![.., codes.ncols() - window.context_frames..])
                .to_owned();
            let fresh = self.decode_window(
                &conditioning,
                &context,
                window.new_frames,
                params,
                &mut rng,
                &mut |step: usize| progress((steps_done + step) as f32 / total_steps as f32),
            )?;
            steps_done += window.steps();
            codes = ndarray::concatenate(Axis(1), &[codes.view(), fresh.view()])?;
        }
        progress(1.0);

        self.decode_audio(&codes)
    }

    fn encode_prompt(&mut self, prompt: &str) -> Result<Conditioning> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| Error::Tokenization(e.to_string()))?;
        let mut token_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mut attention: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        if truncate_prompt(&mut token_ids, &mut attention) {
            tracing::warn!("prompt truncated to {MAX_TEXT_TOKENS} tokens");
        }
        let text_seq_len = token_ids.len();

        let input_ids = Array2::from_shape_vec((1, text_seq_len), token_ids)?;
        let attention_mask = Array2::from_shape_vec((1, text_seq_len), attention)?;

        let cond_hidden = {
            let outputs = self.text_encoder.run(ort::inputs! {
                "input_ids" => Tensor::from_array(input_ids)?,
                "attention_mask" => Tensor::from_array(attention_mask.clone())?,
            })?;
            outputs["last_hidden_state"]
                .try_extract_array::<f32>()?
                .to_owned()
                .into_dimensionality::<Ix3>()?
        };

        let uncond_hidden = Array3::<f32>::zeros(cond_hidden.raw_dim());
        let uncond_attn = Array2::<i64>::zeros(attention_mask.raw_dim());
        Ok(Conditioning {
            hidden_states: ndarray::concatenate(
                Axis(0),
                &[cond_hidden.view(), uncond_hidden.view()],
            )?,
            attention_mask: ndarray::concatenate(
                Axis(0),
                &[attention_mask.view(), uncond_attn.view()],
            )?,
        })
    }

    /// Run one decoder step and return the `[codebooks * 2, seq, vocab]` logits.
    fn decoder_step(
        &mut self,
        conditioning: &Conditioning,
        cache: &mut KvCache,
        next_tokens: &Array2<i64>,
        use_cache: bool,
    ) -> Result<Array3<f32>> {
        let mut inputs: Vec<(std::borrow::Cow<'_, str>, SessionInputValue<'_>)> = vec![
            (
                "encoder_attention_mask".into(),
                Tensor::from_array(conditioning.attention_mask.clone())?.into(),
            ),
            (
                "input_ids".into(),
                Tensor::from_array(next_tokens.clone())?.into(),
            ),
            (
                "encoder_hidden_states".into(),
                Tensor::from_array(conditioning.hidden_states.clone())?.into(),
            ),
        ];
        for (name, value) in cache.decoder.iter().chain(cache.encoder.iter()) {
            inputs.push((
                name.clone().into(),
                Tensor::from_array(value.clone())?.into(),
            ));
        }
        inputs.push((
            "use_cache_branch".into(),
            Tensor::from_array(Array1::from_vec(vec![use_cache]))?.into(),
        ));

        let outputs = self.decoder.run(inputs)?;

        for layer in 0..NUM_LAYERS {
            for kind in ["key", "value"] {
                let present = format!("present.{layer}.decoder.{kind}");
                cache.decoder.insert(
                    format!("past_key_values.{layer}.decoder.{kind}"),
                    outputs[present.as_str()].try_extract_array::<f32>()?.to_owned(),
                );
            }
        }
        // Cross-attention keys only change on the first step of a window.
        if !use_cache {
            for layer in 0..NUM_LAYERS {
                for kind in ["key", "value"] {
                    let present = format!("present.{layer}.encoder.{kind}");
                    cache.encoder.insert(
                        format!("past_key_values.{layer}.encoder.{kind}"),
                        outputs[present.as_str()].try_extract_array::<f32>()?.to_owned(),
                    );
                }
            }
        }

        Ok(outputs["logits"]
            .try_extract_array::<f32>()?
            .to_owned()
            .into_dimensionality::<Ix3>()?)
    }

    /// Replay `context` through the decoder, then sample `new_frames` more
    /// frames. Returns only the new aligned codes, `[codebooks, new_frames]`.
    fn decode_window(
        &mut self,
        conditioning: &Conditioning,
        context: &Array2<i64>,
        new_frames: usize,
        params: &GenerationParams,
        rng: &mut StdRng,
        progress: &mut dyn FnMut(usize),
    ) -> Result<Array2<i64>> {
        let context_frames = context.ncols();
        let frames = context_frames + new_frames;
        let seq_len = frames + NUM_CODEBOOKS;

        let mut delayed = Array2::from_elem((NUM_CODEBOOKS, seq_len), PAD_TOKEN);
        delayed.column_mut(0).fill(BOS_TOKEN);

        let mut cache = KvCache::empty();
        let mut next_tokens = Array2::from_elem((CFG_BATCH * NUM_CODEBOOKS, 1), BOS_TOKEN);

        for step in 0..seq_len - 1 {
            let logits = self.decoder_step(conditioning, &mut cache, &next_tokens, step > 0)?;
            let last = logits.shape()[1] - 1;

            let pos = step + 1;
            for cb in 0..NUM_CODEBOOKS {
                let token = match delay_slot(cb, pos, frames) {
                    Slot::Pad => PAD_TOKEN,
                    Slot::Frame(t) if t < context_frames => context[[cb, t]],
                    Slot::Frame(_) => {
                        let cond = logits.slice(s![cb, last, ..]);
                        let uncond = logits.slice(s![cb + NUM_CODEBOOKS, last, ..]);
                        let guided: Vec<f32> = cond
                            .iter()
                            .zip(uncond.iter())
                            .map(|(&c, &u)| u + params.guidance_scale * (c - u))
                            .collect();
                        sample_token(&guided, params, rng)?
                    }
                };
                delayed[[cb, pos]] = token;
            }

            // Both CFG halves are fed the same tokens.
            next_tokens = Array2::from_shape_fn((CFG_BATCH * NUM_CODEBOOKS, 1), |(r, _)| {
                delayed[[r % NUM_CODEBOOKS, pos]]
            });
            progress(step + 1);
        }

        let aligned = undelay(&delayed, frames);
        Ok(aligned.slice(s![.., context_frames..]).to_owned())
    }

    fn decode_audio(&mut self, codes: &Array2<i64>) -> Result<Vec<f32>> {
        let frames = codes.ncols();
        let flat: Vec<i64> = codes.iter().copied().collect();
        let codes_tensor = Tensor::from_array(([1usize, 1, NUM_CODEBOOKS, frames], flat))?;
        let outputs = self.encodec_decode.run(ort::inputs! {
            "audio_codes" => codes_tensor,
        })?;
        let samples: Vec<f32> = outputs["audio_values"]
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_window_for_short_clips() {
        assert_eq!(
            plan_windows(1000, 1500, 900),
            vec![Window {
                context_frames: 0,
                new_frames: 1000
            }]
        );
    }

    #[test]
    fn test_windows_extend_with_context() {
        let windows = plan_windows(3000, 1500, 900);
        assert_eq!(
            windows,
            vec![
                Window { context_frames: 0, new_frames: 1500 },
                Window { context_frames: 600, new_frames: 900 },
                Window { context_frames: 600, new_frames: 600 },
            ]
        );
        assert!(windows.iter().all(|w| w.frames() <= 1500));
        assert_eq!(windows.iter().map(|w| w.new_frames).sum::<usize>(), 3000);
    }

    #[test]
    fn test_longest_duration_plan() {
        let params = GenerationParams {
            duration_secs: 180.0,
            ..Default::default()
        };
        let windows = plan_windows(params.total_frames(), 1500, 900);
        assert_eq!(windows.iter().map(|w| w.new_frames).sum::<usize>(), 9000);
        assert_eq!(windows.len(), 10);
    }

    #[test]
    fn test_delay_slots() {
        // Codebook 0 starts right after BOS; codebook 3 three positions later.
        assert_eq!(delay_slot(0, 1, 10), Slot::Frame(0));
        assert_eq!(delay_slot(3, 3, 10), Slot::Pad);
        assert_eq!(delay_slot(3, 4, 10), Slot::Frame(0));
        // The tail past the last frame is padding for the early codebooks.
        assert_eq!(delay_slot(0, 11, 10), Slot::Pad);
        assert_eq!(delay_slot(3, 13, 10), Slot::Frame(9));
    }

    #[test]
    fn test_undelay_recovers_frames() {
        let frames = 5;
        let aligned = Array2::from_shape_fn((NUM_CODEBOOKS, frames), |(cb, t)| (cb * 100 + t) as i64);
        let mut delayed = Array2::from_elem((NUM_CODEBOOKS, frames + NUM_CODEBOOKS), PAD_TOKEN);
        for cb in 0..NUM_CODEBOOKS {
            for pos in 0..frames + NUM_CODEBOOKS {
                if let Slot::Frame(t) = delay_slot(cb, pos, frames) {
                    delayed[[cb, pos]] = aligned[[cb, t]];
                }
            }
        }
        assert_eq!(undelay(&delayed, frames), aligned);
    }

    #[test]
    fn test_greedy_picks_argmax() {
        let params = GenerationParams {
            use_sampling: false,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let token = sample_token(&[0.1, 3.0, -2.0, 2.9], &params, &mut rng).unwrap();
        assert_eq!(token, 1);
    }

    #[test]
    fn test_top_k_one_is_deterministic() {
        let params = GenerationParams {
            top_k: 1,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            assert_eq!(sample_token(&[0.0, 0.5, 4.0, 1.0], &params, &mut rng).unwrap(), 2);
        }
    }

    #[test]
    fn test_top_p_restricts_to_nucleus() {
        let params = GenerationParams {
            top_p: 0.5,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        // Token 0 alone carries far more than half of the mass.
        for _ in 0..20 {
            assert_eq!(sample_token(&[10.0, 0.0, 0.0, 0.0], &params, &mut rng).unwrap(), 0);
        }
    }

    #[test]
    fn test_sampling_stays_in_top_k() {
        let params = GenerationParams {
            top_k: 2,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let token = sample_token(&[5.0, -1.0, 5.0, -1.0, -1.0], &params, &mut rng).unwrap();
            assert!(token == 0 || token == 2);
        }
    }

    #[test]
    fn test_top_k_zero_samples_full_distribution() {
        let params = GenerationParams {
            top_k: 0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        let drawn: Vec<i64> = (0..500)
            .map(|_| sample_token(&[2.0, 0.0, 0.0], &params, &mut rng).unwrap())
            .collect();
        assert!(drawn.contains(&0));
        assert!(drawn.iter().any(|&t| t != 0));
    }

    #[test]
    fn test_long_prompt_keeps_eos() {
        const EOS: i64 = 1;
        let mut ids: Vec<i64> = (100..699).collect();
        ids.push(EOS);
        let mut mask = vec![1; ids.len()];
        assert_eq!(ids.len(), 600);

        assert!(truncate_prompt(&mut ids, &mut mask));
        assert_eq!(ids.len(), MAX_TEXT_TOKENS);
        assert_eq!(mask.len(), MAX_TEXT_TOKENS);
        assert_eq!(ids[MAX_TEXT_TOKENS - 1], EOS);
        assert_eq!(ids[MAX_TEXT_TOKENS - 2], 100 + MAX_TEXT_TOKENS as i64 - 2);
    }

    #[test]
    fn test_short_prompt_untouched() {
        let mut ids = vec![5, 6, 1];
        let mut mask = vec![1, 1, 1];
        assert!(!truncate_prompt(&mut ids, &mut mask));
        assert_eq!(ids, vec![5, 6, 1]);
    }

    #[test]
    fn test_params_validation() {
        assert!(GenerationParams::default().validate().is_ok());
        let bad = GenerationParams {
            duration_secs: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = GenerationParams {
            extend_stride_secs: 45.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_params_partial_json_uses_defaults() {
        let params: GenerationParams = serde_json::from_str(r#"{"duration_secs": 90}"#).unwrap();
        assert_eq!(params.duration_secs, 90.0);
        assert_eq!(params.top_k, 250);
        assert_eq!(params.total_frames(), 4500);
    }
}

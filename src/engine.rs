//! Chatterbox ONNX engine.
//!
//! Uses [`ort`] (ONNX Runtime Rust bindings) for inference.  The checkpoint
//! ships as two graphs:
//!
//! | Graph             | Inputs                                   | Output            |
//! |-------------------|------------------------------------------|-------------------|
//! | speaker encoder   | `reference [1, n]` f32                   | `embedding [1, d]`|
//! | synthesizer       | `input_ids [1, seq]` i64, `speaker [1, d]` f32, `params [1, 3]` f32, `language_id [1]` i64, `max_tokens [1]` i64 | waveform f32 |
//!
//! The `params` tensor carries `(exaggeration, cfg_weight, temperature)`;
//! `language_id` is the index into the supported-language table.
//!
//! The model is **not reentrant**: a single mutex over both sessions
//! serializes every inference call.  Callers that need throughput must queue
//! in front of the engine, not around it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use ort::{session::Session, value::Tensor};

use crate::audio::read_wav_samples;
use crate::registry::{GenerationParams, SUPPORTED_LANGUAGES};
use crate::tokenize::text_to_ids;

/// Sample rate the Chatterbox checkpoint produces.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// The synthesizer degrades past this many input characters; longer text is
/// truncated before tokenization.
const MODEL_MAX_CHARS: usize = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Synthesizer trait — the seam between the HTTP layer and the model
// ─────────────────────────────────────────────────────────────────────────────

/// One synthesis call, fully resolved: the registry lookup has already
/// produced the voice's reference sample and generation parameters.
#[derive(Debug)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    /// Voice id, used to key the speaker-embedding cache.
    pub voice_id: &'a str,
    /// Reference WAV the speaker encoder embeds.
    pub reference_audio: &'a Path,
    /// Language id; unsupported codes fall back to English.
    pub language: &'a str,
    pub params: GenerationParams,
    /// Generation length cap, already clamped by the caller.
    pub max_tokens: usize,
}

/// Common interface for synthesis backends.
///
/// The HTTP layer only depends on this trait, which keeps the routes
/// testable with a stub backend and leaves room for other checkpoints.
pub trait Synthesizer: Send + Sync {
    /// Sample rate of produced audio in Hz.
    fn sample_rate(&self) -> u32;

    /// Generate raw audio samples for one request.
    ///
    /// Implementations may block; callers on an async runtime are expected
    /// to dispatch onto a blocking thread.
    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Vec<f32>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// ChatterboxOnnx
// ─────────────────────────────────────────────────────────────────────────────

/// Both ORT sessions live behind one lock; see the module docs.
struct Sessions {
    speaker_encoder: Session,
    synthesizer: Session,
}

/// The Chatterbox model handle.
pub struct ChatterboxOnnx {
    sessions: Mutex<Sessions>,
    /// Per-voice speaker embeddings.  Encoding a reference sample costs a
    /// full encoder pass, so each voice is embedded once per process.
    embeddings: Mutex<HashMap<String, Arc<Vec<f32>>>>,
    sample_rate: u32,
}

impl ChatterboxOnnx {
    /// Load the engine from the two ONNX files.
    pub fn load(
        speaker_encoder_path: &Path,
        synthesizer_path: &Path,
        sample_rate: u32,
    ) -> Result<Self> {
        let speaker_encoder = Session::builder()
            .context("Failed to create ORT session builder")?
            .commit_from_file(speaker_encoder_path)
            .with_context(|| {
                format!("Cannot load speaker encoder: {}", speaker_encoder_path.display())
            })?;

        let synthesizer = Session::builder()
            .context("Failed to create ORT session builder")?
            .commit_from_file(synthesizer_path)
            .with_context(|| format!("Cannot load synthesizer: {}", synthesizer_path.display()))?;

        tracing::info!(
            speaker_encoder = %speaker_encoder_path.display(),
            synthesizer = %synthesizer_path.display(),
            sample_rate,
            "Chatterbox engine loaded"
        );

        Ok(Self {
            sessions: Mutex::new(Sessions { speaker_encoder, synthesizer }),
            embeddings: Mutex::new(HashMap::new()),
            sample_rate,
        })
    }

    /// Number of voices with a cached speaker embedding.
    pub fn embedded_voices(&self) -> usize {
        self.embeddings.lock().expect("embedding cache mutex poisoned").len()
    }

    /// Embed a reference sample, or return the cached embedding for this voice.
    fn voice_embedding(&self, voice_id: &str, reference: &Path) -> Result<Arc<Vec<f32>>> {
        if let Some(embedding) = self
            .embeddings
            .lock()
            .expect("embedding cache mutex poisoned")
            .get(voice_id)
        {
            return Ok(embedding.clone());
        }

        let (samples, _rate) = read_wav_samples(reference)?;
        let n = samples.len();
        let t_reference = Tensor::<f32>::from_array(([1usize, n], samples))
            .context("Failed to build reference tensor")?;

        let mut sessions = self.sessions.lock().expect("engine mutex poisoned");
        let outputs = sessions
            .speaker_encoder
            .run(ort::inputs![t_reference])
            .context("Speaker encoder inference failed")?;
        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract speaker embedding")?;
        let embedding = Arc::new(data.to_vec());
        drop(outputs);
        drop(sessions);

        tracing::debug!(voice_id, dims = embedding.len(), "embedded reference sample");

        self.embeddings
            .lock()
            .expect("embedding cache mutex poisoned")
            .insert(voice_id.to_string(), embedding.clone());
        Ok(embedding)
    }
}

impl Synthesizer for ChatterboxOnnx {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Vec<f32>> {
        let started = Instant::now();

        // Truncate on a char boundary before tokenizing.
        let text: String = request.text.chars().take(MODEL_MAX_CHARS).collect();
        let ids = text_to_ids(&text);
        let seq_len = ids.len();

        let embedding = self.voice_embedding(request.voice_id, request.reference_audio)?;
        let embed_dim = embedding.len();

        let t_input_ids = Tensor::<i64>::from_array(([1usize, seq_len], ids))
            .context("Failed to build input_ids tensor")?;
        let t_speaker = Tensor::<f32>::from_array(([1usize, embed_dim], embedding.as_ref().clone()))
            .context("Failed to build speaker tensor")?;
        let t_params = Tensor::<f32>::from_array((
            [1usize, 3usize],
            vec![
                request.params.exaggeration,
                request.params.cfg_weight,
                request.params.temperature,
            ],
        ))
        .context("Failed to build params tensor")?;
        let language_id = SUPPORTED_LANGUAGES
            .iter()
            .position(|(code, _)| *code == request.language)
            .or_else(|| SUPPORTED_LANGUAGES.iter().position(|(code, _)| *code == "en"))
            .unwrap_or(0) as i64;
        let t_language = Tensor::<i64>::from_array(([1usize], vec![language_id]))
            .context("Failed to build language tensor")?;
        let t_max_tokens = Tensor::<i64>::from_array(([1usize], vec![request.max_tokens as i64]))
            .context("Failed to build max_tokens tensor")?;

        let mut sessions = self.sessions.lock().expect("engine mutex poisoned");
        let outputs = sessions
            .synthesizer
            .run(ort::inputs![t_input_ids, t_speaker, t_params, t_language, t_max_tokens])
            .context("ONNX inference failed")?;

        // Output 0 is the raw waveform (shape [1, T] or [T]).
        let (_shape, audio_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract audio tensor")?;
        let audio = audio_data.to_vec();
        drop(outputs);
        drop(sessions);

        tracing::debug!(
            voice_id = request.voice_id,
            chars = text.chars().count(),
            samples = audio.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "synthesized clip"
        );

        Ok(audio)
    }
}

//! # chatterbox-server
//!
//! Character-voice text-to-speech service backed by
//! [Chatterbox](https://github.com/resemble-ai/chatterbox) ONNX models.
//!
//! The crate is a small synthesis library plus (behind the default `server`
//! feature) the HTTP API that the chat frontend talks to: named characters
//! mapped to voices, a bounded response cache, S3 upload with public or
//! presigned URLs, and sentence-chunked streaming over SSE.
//!
//! ## Quick start
//!
//! ```no_run
//! use chatterbox_server::{download, registry::Registry, SynthesisRequest, Synthesizer};
//!
//! // Download the model from HuggingFace (cached after first run)
//! let engine = download::load_from_hub("ResembleAI/chatterbox-onnx").unwrap();
//!
//! let registry = Registry::defaults();
//! let (voice_id, voice) = registry.resolve("narrator", None).unwrap();
//!
//! let samples = engine
//!     .synthesize(&SynthesisRequest {
//!         text: "Hello from Rust!",
//!         voice_id: &voice_id,
//!         reference_audio: &voice.audio_path,
//!         language: "en",
//!         params: voice.parameters,
//!         max_tokens: 400,
//!     })
//!     .unwrap();
//!
//! let clip = chatterbox_server::AudioClip::from_samples(samples, engine.sample_rate());
//! std::fs::write("output.wav", clip.to_wav_bytes().unwrap()).unwrap();
//! ```
//!
//! ## Pipeline
//!
//! 1. **Registry lookup** — character → voice → generation parameters.
//! 2. **Cache check** — SHA-256 over (text, character, voice).
//! 3. **Tokenisation** — characters mapped to integer token IDs.
//! 4. **Speaker embedding** — reference WAV through the speaker encoder,
//!    cached per voice.
//! 5. **ONNX inference** — serialized through one lock; the model is not
//!    reentrant.
//! 6. **WAV encoding** — peak-normalized 16-bit PCM.

pub mod audio;
pub mod cache;
pub mod download;
pub mod engine;
pub mod registry;
pub mod text;
pub mod tokenize;

#[cfg(feature = "server")]
pub mod config;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "server")]
pub mod storage;

// ─── Re-exports for convenience ─────────────────────────────────────────────

/// The ONNX engine handle — use [`download::load_from_hub`] to obtain one.
pub use engine::{ChatterboxOnnx, SynthesisRequest, Synthesizer};

/// Sample rate the stock checkpoint produces.
pub use engine::DEFAULT_SAMPLE_RATE;

pub use audio::AudioClip;
pub use registry::{Character, GenerationParams, Registry, Voice};

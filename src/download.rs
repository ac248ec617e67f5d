//! Model acquisition — HuggingFace Hub or a local directory.
//!
//! A model repository contains `config.json` naming the speaker-encoder and
//! synthesizer ONNX files plus the output sample rate.  Hub downloads are
//! cached by the hub client (`~/.cache/huggingface/hub` by default), so only
//! the first start of a fresh host pays the transfer.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use hf_hub::api::sync::Api;
use serde::Deserialize;

use crate::engine::{ChatterboxOnnx, DEFAULT_SAMPLE_RATE};

/// Default model repository on the HuggingFace Hub.
pub const DEFAULT_MODEL_REPO: &str = "ResembleAI/chatterbox-onnx";

// ─────────────────────────────────────────────────────────────────────────────
// config.json schema
// ─────────────────────────────────────────────────────────────────────────────

/// Deserialized `config.json` from a Chatterbox model repository.
#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    /// Must be `"ONNX"`.
    #[serde(rename = "type")]
    pub model_type: String,

    /// Filename of the speaker-encoder graph (e.g. `"speaker_encoder.onnx"`).
    pub speaker_encoder: String,

    /// Filename of the synthesizer graph (e.g. `"synthesizer.onnx"`).
    pub synthesizer: String,

    /// Output sample rate in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn parse_config(bytes: &[u8]) -> Result<ModelConfig> {
    let config: ModelConfig =
        serde_json::from_slice(bytes).context("Failed to parse config.json")?;
    if config.model_type != "ONNX" {
        bail!("Unsupported model type '{}' — expected ONNX", config.model_type);
    }
    Ok(config)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Download a single file from a HuggingFace repository.
fn hf_download(api: &Api, repo_id: &str, filename: &str) -> Result<PathBuf> {
    let repo = api.model(repo_id.to_string());
    repo.get(filename)
        .with_context(|| format!("Failed to download '{}' from '{}'", filename, repo_id))
}

/// Download and initialize a [`ChatterboxOnnx`] engine from HuggingFace.
///
/// # Arguments
/// * `repo_id` — repository ID, e.g. `"ResembleAI/chatterbox-onnx"`.
///   A bare name is expanded under the `ResembleAI/` namespace.
pub fn load_from_hub(repo_id: &str) -> Result<ChatterboxOnnx> {
    let repo_id = if repo_id.contains('/') {
        repo_id.to_string()
    } else {
        format!("ResembleAI/{}", repo_id)
    };

    tracing::info!(repo = %repo_id, "downloading model configuration");
    let api = Api::new().context("Failed to initialise HuggingFace Hub client")?;

    let config_path = hf_download(&api, &repo_id, "config.json")?;
    let config_bytes = std::fs::read(&config_path)
        .with_context(|| format!("Cannot read config: {}", config_path.display()))?;
    let config = parse_config(&config_bytes)?;

    tracing::info!(file = %config.speaker_encoder, "downloading speaker encoder");
    let encoder_path = hf_download(&api, &repo_id, &config.speaker_encoder)?;

    tracing::info!(file = %config.synthesizer, "downloading synthesizer");
    let synthesizer_path = hf_download(&api, &repo_id, &config.synthesizer)?;

    ChatterboxOnnx::load(&encoder_path, &synthesizer_path, config.sample_rate)
}

/// Initialize a [`ChatterboxOnnx`] engine from a local model directory
/// containing `config.json` and the ONNX files it names.
pub fn load_from_dir(dir: &Path) -> Result<ChatterboxOnnx> {
    let config_path = dir.join("config.json");
    let config_bytes = std::fs::read(&config_path)
        .with_context(|| format!("Cannot read config: {}", config_path.display()))?;
    let config = parse_config(&config_bytes)?;

    ChatterboxOnnx::load(
        &dir.join(&config.speaker_encoder),
        &dir.join(&config.synthesizer),
        config.sample_rate,
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let config = parse_config(
            br#"{"type":"ONNX","speaker_encoder":"enc.onnx","synthesizer":"syn.onnx"}"#,
        )
        .unwrap();
        assert_eq!(config.speaker_encoder, "enc.onnx");
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_parse_config_rejects_unknown_type() {
        let err = parse_config(
            br#"{"type":"SAFETENSORS","speaker_encoder":"e","synthesizer":"s"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unsupported model type"));
    }

    #[test]
    fn test_parse_config_explicit_sample_rate() {
        let config = parse_config(
            br#"{"type":"ONNX","speaker_encoder":"e","synthesizer":"s","sample_rate":22050}"#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 22_050);
    }
}

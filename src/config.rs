//! Service configuration from environment variables.
//!
//! Every knob has a default, so `chatterbox-server` starts with no
//! environment at all.  Variable names are the struct fields upper-cased
//! (`API_PORT`, `MAX_TEXT_LENGTH`, `S3_BUCKET_NAME`, …).

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::download::DEFAULT_MODEL_REPO;
use crate::text::{DEFAULT_CHUNK_CHARS, DEFAULT_CHUNK_SENTENCES};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Maximum request text length for single-shot generation.
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
    /// Maximum request text length for the streaming endpoint.
    #[serde(default = "default_stream_max_text_length")]
    pub stream_max_text_length: usize,
    /// Character budget per streamed chunk.
    #[serde(default = "default_stream_chunk_chars")]
    pub stream_chunk_chars: usize,
    /// Sentences grouped per streamed chunk.
    #[serde(default = "default_stream_chunk_sentences")]
    pub stream_chunk_sentences: usize,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: usize,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Admission bound: requests beyond this many in flight get a 429.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,

    /// HuggingFace repository to fetch the model from.
    #[serde(default = "default_model_repo")]
    pub model_repo: String,
    /// Local model directory; takes precedence over `model_repo` when set.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    #[serde(default)]
    pub s3_enabled: bool,
    #[serde(default)]
    pub s3_bucket_name: String,
    #[serde(default = "default_aws_region")]
    pub aws_region: String,
    #[serde(default = "default_s3_audio_prefix")]
    pub s3_audio_prefix: String,
    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,

    /// Comma-separated allowed origins, or `*`.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    5000
}
fn default_max_text_length() -> usize {
    500
}
fn default_stream_max_text_length() -> usize {
    2000
}
fn default_stream_chunk_chars() -> usize {
    DEFAULT_CHUNK_CHARS
}
fn default_stream_chunk_sentences() -> usize {
    DEFAULT_CHUNK_SENTENCES
}
fn default_max_tokens() -> usize {
    400
}
fn default_true() -> bool {
    true
}
fn default_cache_capacity() -> usize {
    100
}
fn default_max_queue_depth() -> usize {
    4
}
fn default_registry_path() -> PathBuf {
    PathBuf::from("registry.json")
}
fn default_model_repo() -> String {
    DEFAULT_MODEL_REPO.to_string()
}
fn default_aws_region() -> String {
    "us-east-1".to_string()
}
fn default_s3_audio_prefix() -> String {
    "chatterbox/audio/".to_string()
}
fn default_presign_expiry_secs() -> u64 {
    3600
}
fn default_cors_origins() -> String {
    "*".to_string()
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        envy::from_env().context("invalid environment configuration")
    }

    /// Cache capacity with the enable toggle folded in.
    pub fn effective_cache_capacity(&self) -> usize {
        if self.cache_enabled {
            self.cache_capacity
        } else {
            0
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ServerConfig = envy::from_iter(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.api_port, 5000);
        assert_eq!(config.max_text_length, 500);
        assert_eq!(config.cache_capacity, 100);
        assert!(config.cache_enabled);
        assert!(!config.s3_enabled);
        assert_eq!(config.registry_path, PathBuf::from("registry.json"));
    }

    #[test]
    fn test_overrides() {
        let config: ServerConfig = envy::from_iter(vec![
            ("API_PORT".to_string(), "8080".to_string()),
            ("CACHE_ENABLED".to_string(), "false".to_string()),
            ("S3_ENABLED".to_string(), "true".to_string()),
            ("S3_BUCKET_NAME".to_string(), "clips".to_string()),
        ])
        .unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.effective_cache_capacity(), 0);
        assert!(config.s3_enabled);
        assert_eq!(config.s3_bucket_name, "clips");
    }
}

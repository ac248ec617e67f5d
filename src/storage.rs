//! S3 storage for generated audio.
//!
//! The generation endpoints can return audio inline, as a public object URL,
//! or as a time-limited presigned URL.  This module owns the bucket client
//! and the key/URL conventions; it is only constructed when `S3_ENABLED` is
//! set, so deployments without AWS credentials never touch the SDK.

use std::time::Duration;

use anyhow::{Context, Result};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;

/// Build the virtual-hosted public URL for an object.
fn public_object_url(bucket: &str, region: &str, key: &str) -> String {
    format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")
}

/// Object key for one generated clip: prefix + random suffix.
fn audio_object_key(prefix: &str, suffix: &str) -> String {
    format!("{prefix}tts_{suffix}.wav")
}

/// S3 client wrapper bound to one bucket and key prefix.
pub struct AudioStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
    audio_prefix: String,
    presign_expiry: Duration,
}

impl AudioStorage {
    /// Connect using the default AWS credential chain (environment,
    /// profile, instance role).
    pub async fn connect(
        region: String,
        bucket: String,
        audio_prefix: String,
        presign_expiry: Duration,
    ) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()))
            .load()
            .await;

        tracing::info!(%bucket, %region, "S3 storage enabled");

        Self {
            client: aws_sdk_s3::Client::new(&sdk_config),
            bucket,
            region,
            audio_prefix,
            presign_expiry,
        }
    }

    /// Upload WAV bytes under a fresh object key; returns the key.
    pub async fn upload_wav(&self, suffix: &str, bytes: Vec<u8>) -> Result<String> {
        let key = audio_object_key(&self.audio_prefix, suffix);
        let size = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type("audio/wav")
            .metadata("source", "chatterbox-tts")
            .send()
            .await
            .with_context(|| format!("S3 upload failed for key '{key}'"))?;

        tracing::debug!(%key, size, "uploaded audio to S3");
        Ok(key)
    }

    /// Public (unsigned) URL for an uploaded object.
    pub fn public_url(&self, key: &str) -> String {
        public_object_url(&self.bucket, &self.region, key)
    }

    /// Time-limited presigned GET URL for an uploaded object.
    pub async fn presigned_url(&self, key: &str) -> Result<String> {
        let presign = PresigningConfig::expires_in(self.presign_expiry)
            .context("invalid presign expiry")?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign)
            .await
            .with_context(|| format!("Failed to presign key '{key}'"))?;
        Ok(request.uri().to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_layout() {
        let key = audio_object_key("chatterbox/audio/", "ab12cd34");
        assert_eq!(key, "chatterbox/audio/tts_ab12cd34.wav");
    }

    #[test]
    fn test_public_url_layout() {
        let url = public_object_url("clips", "us-east-1", "chatterbox/audio/tts_x.wav");
        assert_eq!(
            url,
            "https://clips.s3.us-east-1.amazonaws.com/chatterbox/audio/tts_x.wav"
        );
    }
}

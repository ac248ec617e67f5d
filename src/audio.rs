//! Audio clip container and WAV encoding.
//!
//! The engine produces raw f32 samples; the API layer needs WAV bytes it can
//! return inline, cache, or upload.  16-bit PCM is used over 32-bit float
//! because every consumer in the chat frontend stack (browser `Audio`,
//! mobile players) decodes it reliably.

use std::io::Cursor;

use anyhow::{Context, Result};

/// A mono audio clip: raw samples plus their sample rate.
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Raw audio samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioClip {
    /// Wrap raw samples, normalizing peaks above 1.0 down to 0.95 so the
    /// PCM conversion cannot clip.
    pub fn from_samples(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        if peak > 1.0 {
            let scale = 0.95 / peak;
            for s in &mut samples {
                *s *= scale;
            }
        }
        Self { samples, sample_rate }
    }

    /// Duration of the clip in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Encode the clip as an in-memory 16-bit PCM WAV file.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).context("Cannot create WAV writer")?;
            for &s in &self.samples {
                // f32 [-1.0, 1.0] → i16 [-32768, 32767]
                let s16 = (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                writer.write_sample(s16).context("WAV write error")?;
            }
            writer.finalize().context("WAV finalise error")?;
        }
        Ok(cursor.into_inner())
    }
}

/// Read a mono reference sample from a WAV file, converting to f32.
///
/// Multi-channel files are downmixed by keeping the first channel; the
/// speaker encoder only needs one.
pub fn read_wav_samples(path: &std::path::Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Cannot open reference sample: {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .collect::<std::result::Result<_, _>>()
            .context("WAV decode error")?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<_, _>>()
                .context("WAV decode error")?
        }
    };

    Ok((samples, spec.sample_rate))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

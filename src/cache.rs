//! Bounded in-memory cache for generated audio.
//!
//! Chat frontends retry aggressively and characters repeat lines, so a small
//! response cache absorbs a lot of duplicate inference.  Keys cover the full
//! generation identity — text, character, and the voice actually used — and
//! entries are evicted oldest-first once the capacity is reached.  Lifetime
//! is the process lifetime; there is no persistence.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// A cached generation result, shared between the cache and responses.
#[derive(Debug)]
pub struct CachedAudio {
    /// Encoded WAV bytes.
    pub wav_bytes: Vec<u8>,
    /// Sample rate of the audio.
    pub sample_rate: u32,
    /// Duration in seconds.
    pub duration_secs: f64,
}

/// Cache key: SHA-256 over the generation identity.
pub fn cache_key(text: &str, character_id: &str, voice_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0u8]);
    hasher.update(character_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(voice_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Bounded audio cache with oldest-first eviction.
#[derive(Debug)]
pub struct AudioCache {
    entries: HashMap<String, Arc<CachedAudio>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl AudioCache {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A zero capacity yields a cache that never stores anything, which is
    /// how `CACHE_ENABLED=false` is implemented.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Look up a previously generated clip.
    pub fn get(&self, key: &str) -> Option<Arc<CachedAudio>> {
        self.entries.get(key).cloned()
    }

    /// Insert a clip, evicting the oldest entry if the cache is full.
    /// Re-inserting an existing key refreshes its value but not its age.
    pub fn insert(&mut self, key: String, audio: Arc<CachedAudio>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), audio).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                tracing::debug!(key = %oldest, "cache evicted oldest entry");
            }
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

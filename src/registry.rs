//! Character and voice registry.
//!
//! A voice is a reference audio sample plus generation parameters; a
//! character is a named persona pointing at exactly one voice.  The registry
//! is a single JSON document loaded at startup and written back whenever a
//! character is re-assigned to a different voice.  It ships with built-in
//! defaults so a fresh deployment works without any file on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Languages the multilingual Chatterbox checkpoint supports.
pub const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("ar", "Arabic"),
    ("da", "Danish"),
    ("de", "German"),
    ("el", "Greek"),
    ("en", "English"),
    ("es", "Spanish"),
    ("fi", "Finnish"),
    ("fr", "French"),
    ("he", "Hebrew"),
    ("hi", "Hindi"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("ms", "Malay"),
    ("nl", "Dutch"),
    ("no", "Norwegian"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("ru", "Russian"),
    ("sv", "Swedish"),
    ("sw", "Swahili"),
    ("tr", "Turkish"),
    ("zh", "Chinese"),
];

/// Whether `code` is a supported language id.
pub fn is_supported_language(code: &str) -> bool {
    SUPPORTED_LANGUAGES.iter().any(|(c, _)| *c == code)
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Generation knobs attached to a voice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    /// Emotional intensity, 0.0 (flat) to 1.0 (theatrical).
    pub exaggeration: f32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Classifier-free-guidance weight; also controls pacing.
    pub cfg_weight: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { exaggeration: 0.5, temperature: 0.7, cfg_weight: 0.6 }
    }
}

/// A reference audio sample plus the parameters that define a speaking style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub language: String,
    /// Local WAV file with the reference sample the speaker encoder embeds.
    pub audio_path: PathBuf,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: GenerationParams,
}

/// A persona exposed to end users, mapped to one voice at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    /// Must reference an existing voice; checked on load and on reassignment.
    pub voice_id: String,
    pub language: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown character '{0}'")]
    UnknownCharacter(String),
    #[error("unknown voice '{0}'")]
    UnknownVoice(String),
    #[error("character '{character}' references missing voice '{voice}'")]
    DanglingVoice { character: String, voice: String },
    #[error("cannot read registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("registry {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot serialize registry: {0}")]
    Serialize(#[source] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// The registry document as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    pub voices: BTreeMap<String, Voice>,
    pub characters: BTreeMap<String, Character>,
}

impl Registry {
    /// Load the registry from `path`, or fall back to [`Registry::defaults`]
    /// when the file does not exist yet.
    ///
    /// Every character's `voice_id` is validated; a dangling reference is a
    /// configuration error and refuses to load.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "registry file missing, using built-in defaults");
                return Ok(Self::defaults());
            }
            Err(source) => return Err(RegistryError::Io { path: path.to_path_buf(), source }),
        };
        let registry: Registry = serde_json::from_slice(&bytes)
            .map_err(|source| RegistryError::Parse { path: path.to_path_buf(), source })?;
        registry.validate()?;
        Ok(registry)
    }

    /// Write the registry document to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let json = serde_json::to_vec_pretty(self).map_err(RegistryError::Serialize)?;
        std::fs::write(path, json)
            .map_err(|source| RegistryError::Io { path: path.to_path_buf(), source })
    }

    /// Check that every character references an existing voice.
    pub fn validate(&self) -> Result<(), RegistryError> {
        for (id, character) in &self.characters {
            if !self.voices.contains_key(&character.voice_id) {
                return Err(RegistryError::DanglingVoice {
                    character: id.clone(),
                    voice: character.voice_id.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn character(&self, id: &str) -> Result<&Character, RegistryError> {
        self.characters
            .get(id)
            .ok_or_else(|| RegistryError::UnknownCharacter(id.to_string()))
    }

    pub fn voice(&self, id: &str) -> Result<&Voice, RegistryError> {
        self.voices
            .get(id)
            .ok_or_else(|| RegistryError::UnknownVoice(id.to_string()))
    }

    /// Resolve a character to the voice it should speak with, honoring an
    /// optional per-request voice override.
    ///
    /// Returns the voice id actually used together with the voice record.
    pub fn resolve<'a>(
        &'a self,
        character_id: &str,
        voice_override: Option<&str>,
    ) -> Result<(String, &'a Voice), RegistryError> {
        let character = self.character(character_id)?;
        let voice_id = voice_override.unwrap_or(&character.voice_id);
        let voice = self.voice(voice_id)?;
        Ok((voice_id.to_string(), voice))
    }

    /// Re-assign `character_id` to `voice_id`, validating both sides.
    /// The caller persists with [`Registry::save`].
    pub fn set_character_voice(
        &mut self,
        character_id: &str,
        voice_id: &str,
    ) -> Result<(), RegistryError> {
        if !self.voices.contains_key(voice_id) {
            return Err(RegistryError::UnknownVoice(voice_id.to_string()));
        }
        let character = self
            .characters
            .get_mut(character_id)
            .ok_or_else(|| RegistryError::UnknownCharacter(character_id.to_string()))?;
        character.voice_id = voice_id.to_string();
        Ok(())
    }

    /// Characters currently assigned to `voice_id`.
    pub fn characters_using(&self, voice_id: &str) -> Vec<String> {
        self.characters
            .iter()
            .filter(|(_, c)| c.voice_id == voice_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn character_ids(&self) -> Vec<String> {
        self.characters.keys().cloned().collect()
    }

    pub fn voice_ids(&self) -> Vec<String> {
        self.voices.keys().cloned().collect()
    }

    /// Built-in registry used when no file exists: six voices and the six
    /// stock characters of the chat frontend.
    pub fn defaults() -> Self {
        fn voice(
            name: &str,
            file: &str,
            description: &str,
            tags: &[&str],
            exaggeration: f32,
            temperature: f32,
            cfg_weight: f32,
        ) -> Voice {
            Voice {
                name: name.to_string(),
                language: "en".to_string(),
                audio_path: PathBuf::from("voices").join(file),
                description: description.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                parameters: GenerationParams { exaggeration, temperature, cfg_weight },
            }
        }

        fn character(name: &str, voice_id: &str, description: &str) -> Character {
            Character {
                name: name.to_string(),
                voice_id: voice_id.to_string(),
                language: "en".to_string(),
                description: description.to_string(),
                system_prompt: None,
                metadata: BTreeMap::new(),
            }
        }

        let voices = BTreeMap::from([
            (
                "narrator".to_string(),
                voice(
                    "Professional Narrator",
                    "narrator.wav",
                    "Clear, professional voice for narration",
                    &["professional", "formal", "narrative"],
                    0.5, 0.7, 0.6,
                ),
            ),
            (
                "friendly".to_string(),
                voice(
                    "Friendly Voice",
                    "friendly.wav",
                    "Warm and approachable voice",
                    &["friendly", "warm", "casual"],
                    0.6, 0.8, 0.5,
                ),
            ),
            (
                "expert".to_string(),
                voice(
                    "Expert Voice",
                    "expert.wav",
                    "Authoritative voice for knowledge sharing",
                    &["expert", "authoritative", "formal"],
                    0.4, 0.6, 0.7,
                ),
            ),
            (
                "child".to_string(),
                voice(
                    "Child Voice",
                    "child.wav",
                    "Youthful, energetic voice",
                    &["child", "energetic", "playful"],
                    0.7, 0.9, 0.5,
                ),
            ),
            (
                "mysterious".to_string(),
                voice(
                    "Mysterious Voice",
                    "mysterious.wav",
                    "Enigmatic and intriguing voice",
                    &["mysterious", "dramatic", "theatrical"],
                    0.5, 0.8, 0.6,
                ),
            ),
            (
                "calm".to_string(),
                voice(
                    "Calm Voice",
                    "calm.wav",
                    "Soothing and meditative voice",
                    &["calm", "soothing", "meditative"],
                    0.3, 0.6, 0.8,
                ),
            ),
        ]);

        let characters = BTreeMap::from([
            (
                "narrator".to_string(),
                character("Narrator", "narrator", "Professional narrator voice"),
            ),
            (
                "assistant".to_string(),
                character("AI Assistant", "friendly", "Friendly AI assistant"),
            ),
            (
                "expert".to_string(),
                character("Expert", "expert", "Knowledgeable expert"),
            ),
            (
                "luna".to_string(),
                character("Luna", "mysterious", "Mysterious character voice"),
            ),
            (
                "sage".to_string(),
                character("Sage", "calm", "Wise and calm character"),
            ),
            (
                "elara".to_string(),
                character("Elara", "friendly", "Cheerful and warm character"),
            ),
        ]);

        Self { voices, characters }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let registry = Registry::defaults();
        registry.validate().unwrap();
        assert_eq!(registry.voices.len(), 6);
        assert_eq!(registry.characters.len(), 6);
    }

    #[test]
    fn test_resolve_uses_character_voice() {
        let registry = Registry::defaults();
        let (voice_id, voice) = registry.resolve("sage", None).unwrap();
        assert_eq!(voice_id, "calm");
        assert_eq!(voice.parameters.cfg_weight, 0.8);
    }

    #[test]
    fn test_resolve_honors_override() {
        let registry = Registry::defaults();
        let (voice_id, _) = registry.resolve("sage", Some("friendly")).unwrap();
        assert_eq!(voice_id, "friendly");
    }

    #[test]
    fn test_resolve_unknown_character() {
        let registry = Registry::defaults();
        let err = registry.resolve("nobody", None).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownCharacter(_)));
    }

    #[test]
    fn test_reassign_rejects_unknown_voice() {
        let mut registry = Registry::defaults();
        let err = registry.set_character_voice("sage", "missing").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownVoice(_)));
        // state untouched
        assert_eq!(registry.character("sage").unwrap().voice_id, "calm");
    }

    #[test]
    fn test_reassign_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = Registry::defaults();
        registry.set_character_voice("sage", "mysterious").unwrap();
        registry.save(&path).unwrap();

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.character("sage").unwrap().voice_id, "mysterious");
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(registry.characters.len(), 6);
    }

    #[test]
    fn test_load_rejects_dangling_voice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut registry = Registry::defaults();
        registry.voices.remove("calm");
        let json = serde_json::to_vec(&registry).unwrap();
        std::fs::write(&path, json).unwrap();

        let err = Registry::load(&path).unwrap_err();
        assert!(matches!(err, RegistryError::DanglingVoice { .. }));
    }

    #[test]
    fn test_characters_using_voice() {
        let registry = Registry::defaults();
        let users = registry.characters_using("friendly");
        assert_eq!(users, vec!["assistant".to_string(), "elara".to_string()]);
    }

    #[test]
    fn test_supported_languages() {
        assert!(is_supported_language("en"));
        assert!(is_supported_language("ja"));
        assert!(!is_supported_language("xx"));
        assert_eq!(SUPPORTED_LANGUAGES.len(), 23);
    }
}

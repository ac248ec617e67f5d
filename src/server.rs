//! HTTP API for character-voice speech generation.
//!
//! Routes:
//!
//! | Method | Path                      |                                        |
//! |--------|---------------------------|----------------------------------------|
//! | GET    | `/health`                 | liveness, cache and queue stats        |
//! | POST   | `/generate-audio`         | primary generation (base64 / S3 URL)   |
//! | POST   | `/tts`                    | generation returning a WAV file        |
//! | POST   | `/tts-json`               | generation returning base64 JSON       |
//! | POST   | `/tts-batch`              | sequential multi-text generation       |
//! | POST   | `/tts-stream`             | SSE: sentence chunks in input order    |
//! | GET    | `/characters`, `/characters/{id}` | registry listing / detail      |
//! | POST   | `/characters/{id}/voice`  | re-assign a character's voice          |
//! | GET    | `/voices`, `/voices/{id}` | voice listing / detail                 |
//! | GET    | `/languages`              | supported language table               |
//!
//! The engine serializes inference internally; this layer only bounds
//! admission (a semaphore sized by `MAX_QUEUE_DEPTH`) and rejects overflow
//! with 429 plus a retry hint.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::audio::AudioClip;
use crate::cache::{cache_key, AudioCache, CachedAudio};
use crate::config::ServerConfig;
use crate::engine::{SynthesisRequest, Synthesizer};
use crate::registry::{is_supported_language, Registry, RegistryError, SUPPORTED_LANGUAGES};
use crate::storage::AudioStorage;
use crate::text::split_into_chunks;

/// Character used when a request does not name one.
const DEFAULT_CHARACTER: &str = "narrator";

/// Retry hint sent with 429 responses.
const BUSY_RETRY_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Request-handling limits copied out of [`ServerConfig`] at startup.
#[derive(Debug, Clone)]
pub struct ServiceLimits {
    pub max_text_length: usize,
    pub stream_max_text_length: usize,
    pub stream_chunk_chars: usize,
    pub stream_chunk_sentences: usize,
    pub default_max_tokens: usize,
    pub cache_enabled: bool,
    pub cors_origins: String,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<dyn Synthesizer>,
    registry: Arc<RwLock<Registry>>,
    registry_path: Arc<PathBuf>,
    cache: Arc<Mutex<AudioCache>>,
    storage: Option<Arc<AudioStorage>>,
    queue: Arc<Semaphore>,
    limits: Arc<ServiceLimits>,
}

impl AppState {
    pub fn new(
        engine: Arc<dyn Synthesizer>,
        registry: Registry,
        storage: Option<AudioStorage>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            engine,
            registry: Arc::new(RwLock::new(registry)),
            registry_path: Arc::new(config.registry_path.clone()),
            cache: Arc::new(Mutex::new(AudioCache::new(config.effective_cache_capacity()))),
            storage: storage.map(Arc::new),
            queue: Arc::new(Semaphore::new(config.max_queue_depth)),
            limits: Arc::new(ServiceLimits {
                max_text_length: config.max_text_length,
                stream_max_text_length: config.stream_max_text_length,
                stream_chunk_chars: config.stream_chunk_chars,
                stream_chunk_sentences: config.stream_chunk_sentences,
                default_max_tokens: config.default_max_tokens,
                cache_enabled: config.cache_enabled,
                cors_origins: config.cors_origins.clone(),
            }),
        }
    }
}

/// Build the service router with CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.limits.cors_origins);
    Router::new()
        .route("/health", get(health))
        .route("/generate-audio", post(generate_audio))
        .route("/tts", post(tts))
        .route("/tts-json", post(tts_json))
        .route("/tts-batch", post(tts_batch))
        .route("/tts-stream", post(tts_stream))
        .route("/characters", get(list_characters))
        .route("/characters/{id}", get(get_character))
        .route("/characters/{id}/voice", post(set_character_voice))
        .route("/voices", get(list_voices))
        .route("/voices/{id}", get(get_voice))
        .route("/languages", get(list_languages))
        .fallback(endpoint_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600));

    if origins.trim() == "*" {
        layer.allow_origin(Any)
    } else {
        let list: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|origin| origin.trim().parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(list))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// API-level error, mapped onto a status code and a JSON body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("server is at capacity, retry shortly")]
    Busy { retry_after_secs: u64 },
    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            ApiError::Busy { retry_after_secs } => {
                (StatusCode::TOO_MANY_REQUESTS, Some(*retry_after_secs))
            }
            ApiError::Internal(source) => {
                tracing::error!(error = ?source, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        // Internal details stay in the log, not the response.
        let message = match &self {
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let mut body = serde_json::json!({ "success": false, "error": message });
        if let Some(secs) = retry_after {
            body["retry_after_secs"] = serde_json::json!(secs);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Translate registry lookup failures into 400s listing the valid ids.
fn registry_bad_request(err: RegistryError, registry: &Registry) -> ApiError {
    match err {
        RegistryError::UnknownCharacter(id) => ApiError::bad_request(format!(
            "Unknown character '{}'. Available: {}",
            id,
            registry.character_ids().join(", ")
        )),
        RegistryError::UnknownVoice(id) => ApiError::bad_request(format!(
            "Unknown voice '{}'. Available: {}",
            id,
            registry.voice_ids().join(", ")
        )),
        other => ApiError::Internal(other.into()),
    }
}

async fn endpoint_not_found() -> ApiError {
    ApiError::not_found("Endpoint not found")
}

// ─────────────────────────────────────────────────────────────────────────────
// Generation core
// ─────────────────────────────────────────────────────────────────────────────

struct GeneratedClip {
    audio: Arc<CachedAudio>,
    voice_id: String,
    cached: bool,
}

fn acquire_slot(state: &AppState) -> Result<OwnedSemaphorePermit, ApiError> {
    Arc::clone(&state.queue)
        .try_acquire_owned()
        .map_err(|_| ApiError::Busy { retry_after_secs: BUSY_RETRY_SECS })
}

/// Resolve, consult the cache, and on a miss run the model exactly once.
///
/// `admitted` is set by the streaming path, which holds one queue permit for
/// its whole connection; single-shot callers acquire per miss here.
async fn generate_clip(
    state: &AppState,
    text: &str,
    character_id: &str,
    voice_override: Option<&str>,
    language_override: Option<&str>,
    max_tokens: usize,
    admitted: bool,
) -> Result<GeneratedClip, ApiError> {
    let (voice_id, reference, params, language) = {
        let registry = state.registry.read().await;
        let (voice_id, voice) = registry
            .resolve(character_id, voice_override)
            .map_err(|e| registry_bad_request(e, &registry))?;

        let character_language = registry
            .character(character_id)
            .map_err(|e| registry_bad_request(e, &registry))?
            .language
            .clone();
        let language = match language_override {
            Some(code) if is_supported_language(code) => code.to_string(),
            Some(code) => {
                tracing::warn!(code, fallback = %character_language, "unsupported language, using character default");
                character_language
            }
            None => character_language,
        };

        (voice_id, voice.audio_path.clone(), voice.parameters, language)
    };

    let key = cache_key(text, character_id, &voice_id);
    let hit = state.cache.lock().expect("cache mutex poisoned").get(&key);
    if let Some(audio) = hit {
        tracing::debug!(character_id, voice_id = %voice_id, "cache hit");
        return Ok(GeneratedClip { audio, voice_id, cached: true });
    }

    let _permit = if admitted { None } else { Some(acquire_slot(state)?) };

    let engine = Arc::clone(&state.engine);
    let text_owned = text.to_string();
    let voice_for_task = voice_id.clone();
    let samples = tokio::task::spawn_blocking(move || {
        engine.synthesize(&SynthesisRequest {
            text: &text_owned,
            voice_id: &voice_for_task,
            reference_audio: &reference,
            language: &language,
            params,
            max_tokens,
        })
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("synthesis task failed: {e}")))?
    .map_err(ApiError::Internal)?;

    let clip = AudioClip::from_samples(samples, state.engine.sample_rate());
    let wav_bytes = clip.to_wav_bytes().map_err(ApiError::Internal)?;
    let audio = Arc::new(CachedAudio {
        wav_bytes,
        sample_rate: clip.sample_rate,
        duration_secs: clip.duration_secs(),
    });

    state
        .cache
        .lock()
        .expect("cache mutex poisoned")
        .insert(key, Arc::clone(&audio));

    Ok(GeneratedClip { audio, voice_id, cached: false })
}

fn validate_text(text: Option<&str>, max_chars: usize) -> Result<String, ApiError> {
    let Some(raw) = text else {
        return Err(ApiError::bad_request("Missing 'text' field"));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("Text cannot be empty"));
    }
    let chars = trimmed.chars().count();
    if chars > max_chars {
        return Err(ApiError::bad_request(format!(
            "Text too long (max {max_chars} characters)"
        )));
    }
    Ok(trimmed.to_string())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn clamp_max_tokens(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).clamp(100, 1000)
}

// ─────────────────────────────────────────────────────────────────────────────
// Generation endpoints
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "character_id")]
    character: Option<String>,
    #[serde(default)]
    voice_id: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    max_tokens: Option<usize>,
    /// `base64` (default), `url`, or `presigned`.
    #[serde(default)]
    return_format: Option<String>,
    /// `/tts` only: `wav` (default) or `base64`.
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_url: Option<String>,
    sample_rate: u32,
    duration: f64,
    character: String,
    voice_id: String,
    text_length: usize,
    generation_time_ms: u64,
    cached: bool,
}

#[derive(Debug, PartialEq)]
enum ReturnFormat {
    Base64,
    Url,
    Presigned,
}

impl ReturnFormat {
    /// Unrecognized values fall back to base64.
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("url") => Self::Url,
            Some("presigned") => Self::Presigned,
            _ => Self::Base64,
        }
    }
}

/// Primary generation endpoint used by the chat backend.
async fn generate_audio(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let started = Instant::now();

    let text = validate_text(request.text.as_deref(), state.limits.max_text_length)?;
    let character = request
        .character
        .clone()
        .unwrap_or_else(|| DEFAULT_CHARACTER.to_string());
    let max_tokens = clamp_max_tokens(request.max_tokens, state.limits.default_max_tokens);

    let clip = generate_clip(
        &state,
        &text,
        &character,
        request.voice_id.as_deref(),
        request.language.as_deref(),
        max_tokens,
        false,
    )
    .await?;

    let mut response = GenerateResponse {
        success: true,
        audio: None,
        audio_url: None,
        sample_rate: clip.audio.sample_rate,
        duration: round2(clip.audio.duration_secs),
        character,
        voice_id: clip.voice_id.clone(),
        text_length: text.chars().count(),
        generation_time_ms: started.elapsed().as_millis() as u64,
        cached: clip.cached,
    };

    match ReturnFormat::parse(request.return_format.as_deref()) {
        ReturnFormat::Base64 => {
            response.audio = Some(BASE64.encode(&clip.audio.wav_bytes));
        }
        format @ (ReturnFormat::Url | ReturnFormat::Presigned) => {
            let storage = state
                .storage
                .as_ref()
                .ok_or_else(|| ApiError::bad_request("Object storage is not configured"))?;
            let key = storage
                .upload_wav(&short_id(), clip.audio.wav_bytes.clone())
                .await
                .map_err(ApiError::Internal)?;
            response.audio_url = Some(match format {
                ReturnFormat::Presigned => {
                    storage.presigned_url(&key).await.map_err(ApiError::Internal)?
                }
                _ => storage.public_url(&key),
            });
        }
    }

    Ok(Json(response))
}

fn wav_response(audio: &CachedAudio) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"tts_{}.wav\"", short_id()),
        )
        .header("X-Sample-Rate", audio.sample_rate.to_string())
        .header("X-Duration-Seconds", format!("{:.2}", audio.duration_secs))
        .body(Body::from(audio.wav_bytes.clone()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[derive(Debug, Serialize)]
struct TtsJsonResponse {
    success: bool,
    audio: String,
    audio_format: &'static str,
    sample_rate: u32,
    duration_seconds: f64,
    character_id: String,
    text_length: usize,
}

async fn run_tts(
    state: &AppState,
    request: &GenerateRequest,
) -> Result<(GeneratedClip, String, String), ApiError> {
    let text = validate_text(request.text.as_deref(), state.limits.max_text_length)?;
    let character = request
        .character
        .clone()
        .unwrap_or_else(|| DEFAULT_CHARACTER.to_string());
    let max_tokens = clamp_max_tokens(request.max_tokens, state.limits.default_max_tokens);

    let clip = generate_clip(
        state,
        &text,
        &character,
        request.voice_id.as_deref(),
        request.language.as_deref(),
        max_tokens,
        false,
    )
    .await?;
    Ok((clip, character, text))
}

/// Generation returning a WAV file (or base64 JSON when `format=base64`).
async fn tts(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    let base64_wanted = request
        .format
        .as_deref()
        .is_some_and(|f| f.eq_ignore_ascii_case("base64"));

    let (clip, character, text) = run_tts(&state, &request).await?;

    if base64_wanted {
        return Ok(Json(TtsJsonResponse {
            success: true,
            audio: BASE64.encode(&clip.audio.wav_bytes),
            audio_format: "wav",
            sample_rate: clip.audio.sample_rate,
            duration_seconds: round2(clip.audio.duration_secs),
            character_id: character,
            text_length: text.chars().count(),
        })
        .into_response());
    }

    Ok(wav_response(&clip.audio))
}

/// Generation always returning base64 JSON.
async fn tts_json(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<TtsJsonResponse>, ApiError> {
    let (clip, character, text) = run_tts(&state, &request).await?;
    Ok(Json(TtsJsonResponse {
        success: true,
        audio: BASE64.encode(&clip.audio.wav_bytes),
        audio_format: "wav",
        sample_rate: clip.audio.sample_rate,
        duration_seconds: round2(clip.audio.duration_secs),
        character_id: character,
        text_length: text.chars().count(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Batch endpoint
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BatchRequest {
    #[serde(default)]
    requests: Option<Vec<BatchItem>>,
}

#[derive(Debug, Deserialize)]
struct BatchItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "character")]
    character_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct BatchItemResult {
    id: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct BatchResponse {
    success: bool,
    results: Vec<BatchItemResult>,
    total: usize,
}

/// Sequential batch generation; item failures do not abort the batch.
async fn tts_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    let items = request
        .requests
        .ok_or_else(|| ApiError::bad_request("Missing 'requests' field"))?;

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let id = item.id.unwrap_or_else(short_id);
        let character = item
            .character_id
            .unwrap_or_else(|| DEFAULT_CHARACTER.to_string());

        let outcome = match validate_text(item.text.as_deref(), state.limits.max_text_length) {
            Ok(text) => generate_clip(
                &state,
                &text,
                &character,
                None,
                None,
                state.limits.default_max_tokens,
                false,
            )
            .await,
            Err(err) => Err(err),
        };

        results.push(match outcome {
            Ok(clip) => BatchItemResult {
                id,
                success: true,
                audio: Some(BASE64.encode(&clip.audio.wav_bytes)),
                duration_seconds: Some(round2(clip.audio.duration_secs)),
                error: None,
            },
            Err(err) => BatchItemResult {
                id,
                success: false,
                audio: None,
                duration_seconds: None,
                error: Some(err.to_string()),
            },
        });
    }

    let total = results.len();
    Ok(Json(BatchResponse { success: true, results, total }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming endpoint
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct StreamChunkEvent<'a> {
    chunk_index: usize,
    total_chunks: usize,
    text: &'a str,
    audio: String,
    sample_rate: u32,
    duration: f64,
    is_final: bool,
}

#[derive(Debug, Serialize)]
struct StreamErrorEvent {
    chunk_index: usize,
    total_chunks: usize,
    error: String,
    is_final: bool,
}

#[derive(Debug, Serialize)]
struct StreamDoneEvent {
    total_chunks: usize,
}

fn stream_event(name: &'static str, payload: &impl Serialize) -> Event {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(data)
}

/// SSE generation: one `chunk` event per sentence group, in input order,
/// then a terminal `done` event.  One queue permit covers the whole stream.
async fn tts_stream(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let text = validate_text(request.text.as_deref(), state.limits.stream_max_text_length)?;
    let character = request
        .character
        .clone()
        .unwrap_or_else(|| DEFAULT_CHARACTER.to_string());

    // Resolve before opening the stream so bad ids fail as a plain 4xx.
    {
        let registry = state.registry.read().await;
        registry
            .resolve(&character, request.voice_id.as_deref())
            .map_err(|e| registry_bad_request(e, &registry))?;
    }

    let chunks = split_into_chunks(
        &text,
        state.limits.stream_chunk_chars,
        state.limits.stream_chunk_sentences,
    );
    let max_tokens = clamp_max_tokens(request.max_tokens, state.limits.default_max_tokens);
    let permit = acquire_slot(&state)?;

    let (tx, rx) = mpsc::channel::<Event>(16);
    let voice_override = request.voice_id.clone();
    let language = request.language.clone();

    tokio::spawn(async move {
        let _permit = permit;
        let total = chunks.len();

        for (index, chunk_text) in chunks.iter().enumerate() {
            let is_final = index + 1 == total;
            let event = match generate_clip(
                &state,
                chunk_text,
                &character,
                voice_override.as_deref(),
                language.as_deref(),
                max_tokens,
                true,
            )
            .await
            {
                Ok(clip) => stream_event(
                    "chunk",
                    &StreamChunkEvent {
                        chunk_index: index,
                        total_chunks: total,
                        text: chunk_text,
                        audio: BASE64.encode(&clip.audio.wav_bytes),
                        sample_rate: clip.audio.sample_rate,
                        duration: round2(clip.audio.duration_secs),
                        is_final,
                    },
                ),
                Err(err) => {
                    tracing::error!(error = %err, chunk = index, "stream chunk failed");
                    stream_event(
                        "error",
                        &StreamErrorEvent {
                            chunk_index: index,
                            total_chunks: total,
                            error: err.to_string(),
                            is_final,
                        },
                    )
                }
            };

            if tx.send(event).await.is_err() {
                tracing::debug!("stream client disconnected");
                return;
            }
        }

        let _ = tx
            .send(stream_event("done", &StreamDoneEvent { total_chunks: total }))
            .await;
    });

    let stream = ReceiverStream::new(rx).map(Ok::<Event, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry endpoints
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CharacterSummary {
    id: String,
    name: String,
    language: String,
    description: String,
}

#[derive(Debug, Serialize)]
struct CharacterList {
    characters: Vec<CharacterSummary>,
    total: usize,
}

async fn list_characters(State(state): State<AppState>) -> Json<CharacterList> {
    let registry = state.registry.read().await;
    let characters: Vec<CharacterSummary> = registry
        .characters
        .iter()
        .map(|(id, c)| CharacterSummary {
            id: id.clone(),
            name: c.name.clone(),
            language: c.language.clone(),
            description: c.description.clone(),
        })
        .collect();
    let total = characters.len();
    Json(CharacterList { characters, total })
}

#[derive(Debug, Serialize)]
struct CharacterDetail {
    id: String,
    name: String,
    language: String,
    description: String,
    voice_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,
    parameters: crate::registry::GenerationParams,
}

async fn get_character(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CharacterDetail>, ApiError> {
    let registry = state.registry.read().await;
    let character = registry
        .character(&id)
        .map_err(|_| ApiError::not_found(format!("Character '{id}' not found")))?;
    // Parameters come from the character's current voice.
    let voice = registry
        .voice(&character.voice_id)
        .map_err(|e| ApiError::Internal(e.into()))?;

    Ok(Json(CharacterDetail {
        id,
        name: character.name.clone(),
        language: character.language.clone(),
        description: character.description.clone(),
        voice_id: character.voice_id.clone(),
        system_prompt: character.system_prompt.clone(),
        parameters: voice.parameters,
    }))
}

#[derive(Debug, Deserialize)]
struct SetVoiceRequest {
    #[serde(default)]
    voice_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SetVoiceResponse {
    success: bool,
    character: String,
    voice_id: String,
    voice_name: String,
}

/// Re-assign a character's voice and persist the registry.
async fn set_character_voice(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SetVoiceRequest>,
) -> Result<Json<SetVoiceResponse>, ApiError> {
    let voice_id = request
        .voice_id
        .ok_or_else(|| ApiError::bad_request("Missing 'voice_id' field"))?;

    let snapshot = {
        let mut registry = state.registry.write().await;
        if !registry.characters.contains_key(&id) {
            return Err(ApiError::not_found(format!("Character '{id}' not found")));
        }
        registry
            .set_character_voice(&id, &voice_id)
            .map_err(|e| registry_bad_request(e, &registry))?;
        registry.clone()
    };

    let voice_name = snapshot
        .voice(&voice_id)
        .map_err(|e| ApiError::Internal(e.into()))?
        .name
        .clone();

    let path = (*state.registry_path).clone();
    tokio::task::spawn_blocking(move || snapshot.save(&path))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("registry save task failed: {e}")))?
        .map_err(|e| ApiError::Internal(e.into()))?;

    tracing::info!(character = %id, voice = %voice_id, "character voice updated");

    Ok(Json(SetVoiceResponse {
        success: true,
        character: id,
        voice_id,
        voice_name,
    }))
}

#[derive(Debug, Serialize)]
struct VoiceSummary {
    id: String,
    name: String,
    language: String,
    description: String,
    tags: Vec<String>,
}

#[derive(Debug, Serialize)]
struct VoiceList {
    voices: Vec<VoiceSummary>,
    total: usize,
}

async fn list_voices(State(state): State<AppState>) -> Json<VoiceList> {
    let registry = state.registry.read().await;
    let voices: Vec<VoiceSummary> = registry
        .voices
        .iter()
        .map(|(id, v)| VoiceSummary {
            id: id.clone(),
            name: v.name.clone(),
            language: v.language.clone(),
            description: v.description.clone(),
            tags: v.tags.clone(),
        })
        .collect();
    let total = voices.len();
    Json(VoiceList { voices, total })
}

#[derive(Debug, Serialize)]
struct VoiceDetail {
    id: String,
    name: String,
    language: String,
    description: String,
    tags: Vec<String>,
    parameters: crate::registry::GenerationParams,
    used_by_characters: Vec<String>,
}

async fn get_voice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VoiceDetail>, ApiError> {
    let registry = state.registry.read().await;
    let voice = registry
        .voice(&id)
        .map_err(|_| ApiError::not_found(format!("Voice '{id}' not found")))?;

    Ok(Json(VoiceDetail {
        used_by_characters: registry.characters_using(&id),
        id,
        name: voice.name.clone(),
        language: voice.language.clone(),
        description: voice.description.clone(),
        tags: voice.tags.clone(),
        parameters: voice.parameters,
    }))
}

#[derive(Debug, Serialize)]
struct LanguageEntry {
    code: &'static str,
    name: &'static str,
}

#[derive(Debug, Serialize)]
struct LanguageList {
    languages: Vec<LanguageEntry>,
    total: usize,
}

async fn list_languages() -> Json<LanguageList> {
    let languages: Vec<LanguageEntry> = SUPPORTED_LANGUAGES
        .iter()
        .map(|&(code, name)| LanguageEntry { code, name })
        .collect();
    let total = languages.len();
    Json(LanguageList { languages, total })
}

// ─────────────────────────────────────────────────────────────────────────────
// Health endpoint
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    sample_rate: u32,
    cache_enabled: bool,
    cache_size: usize,
    queue_free: usize,
    characters: usize,
    voices: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.registry.read().await;
    let cache_size = state.cache.lock().expect("cache mutex poisoned").len();
    Json(HealthResponse {
        status: "healthy",
        model_loaded: true,
        sample_rate: state.engine.sample_rate(),
        cache_enabled: state.limits.cache_enabled,
        cache_size,
        queue_free: state.queue.available_permits(),
        characters: registry.characters.len(),
        voices: registry.voices.len(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tower::ServiceExt;

    /// Deterministic stand-in for the ONNX engine: 0.1 s of audio per call.
    struct StubSynthesizer {
        fail: bool,
    }

    impl Synthesizer for StubSynthesizer {
        fn sample_rate(&self) -> u32 {
            24_000
        }

        fn synthesize(&self, _request: &SynthesisRequest<'_>) -> anyhow::Result<Vec<f32>> {
            if self.fail {
                anyhow::bail!("synthesizer exploded");
            }
            Ok(vec![0.1; 2_400])
        }
    }

    fn test_state(overrides: Vec<(&str, &str)>, fail: bool) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry_path = dir.path().join("registry.json");

        let mut env: Vec<(String, String)> = vec![(
            "REGISTRY_PATH".to_string(),
            registry_path.to_string_lossy().into_owned(),
        )];
        env.extend(overrides.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
        let config: ServerConfig = envy::from_iter(env).unwrap();

        let state = AppState::new(
            Arc::new(StubSynthesizer { fail }),
            Registry::defaults(),
            None,
            &config,
        );
        (state, dir)
    }

    fn test_app() -> (Router, AppState, tempfile::TempDir) {
        let (state, dir) = test_state(Vec::new(), false);
        (router(state.clone()), state, dir)
    }

    async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get_path(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _, _dir) = test_app();
        let response = get_path(&app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sample_rate"], 24_000);
        assert_eq!(body["characters"], 6);
    }

    #[tokio::test]
    async fn test_generate_audio_base64() {
        let (app, _, _dir) = test_app();
        let response = post_json(
            &app,
            "/generate-audio",
            serde_json::json!({"text": "Hello there.", "character": "narrator"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["cached"], false);
        assert_eq!(body["voice_id"], "narrator");
        assert!(!body["audio"].as_str().unwrap().is_empty());
        assert!(body["duration"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_generate_audio_cache_hit() {
        let (app, _, _dir) = test_app();
        let payload = serde_json::json!({"text": "Say it twice.", "character": "sage"});
        let first = json_body(post_json(&app, "/generate-audio", payload.clone()).await).await;
        assert_eq!(first["cached"], false);
        let second = json_body(post_json(&app, "/generate-audio", payload).await).await;
        assert_eq!(second["cached"], true);
        assert_eq!(first["audio"], second["audio"]);
    }

    #[tokio::test]
    async fn test_voice_override_changes_cache_key() {
        let (app, _, _dir) = test_app();
        let base = serde_json::json!({"text": "Same words.", "character": "sage"});
        let overridden =
            serde_json::json!({"text": "Same words.", "character": "sage", "voice_id": "friendly"});
        json_body(post_json(&app, "/generate-audio", base).await).await;
        let body = json_body(post_json(&app, "/generate-audio", overridden).await).await;
        assert_eq!(body["cached"], false);
        assert_eq!(body["voice_id"], "friendly");
    }

    #[tokio::test]
    async fn test_generate_audio_unknown_character() {
        let (app, _, _dir) = test_app();
        let response = post_json(
            &app,
            "/generate-audio",
            serde_json::json!({"text": "Hi.", "character": "nobody"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("Unknown character 'nobody'"));
        assert!(message.contains("narrator"));
    }

    #[tokio::test]
    async fn test_generate_audio_text_validation() {
        let (app, _, _dir) = test_app();

        let response = post_json(&app, "/generate-audio", serde_json::json!({})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("Missing 'text'"));

        let response =
            post_json(&app, "/generate-audio", serde_json::json!({"text": "   "})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let long = "x".repeat(501);
        let response =
            post_json(&app, "/generate-audio", serde_json::json!({"text": long})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("Text too long"));
    }

    #[tokio::test]
    async fn test_generate_audio_url_without_storage() {
        let (app, _, _dir) = test_app();
        let response = post_json(
            &app,
            "/generate-audio",
            serde_json::json!({"text": "Hi.", "return_format": "url"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("storage"));
    }

    #[tokio::test]
    async fn test_queue_exhaustion_returns_429() {
        let (state, _dir) = test_state(vec![("MAX_QUEUE_DEPTH", "0")], false);
        let app = router(state);
        let response = post_json(
            &app,
            "/generate-audio",
            serde_json::json!({"text": "Busy now."}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        let body = json_body(response).await;
        assert_eq!(body["retry_after_secs"], BUSY_RETRY_SECS);
    }

    #[tokio::test]
    async fn test_engine_failure_is_500() {
        let (state, _dir) = test_state(Vec::new(), true);
        let app = router(state);
        let response = post_json(
            &app,
            "/generate-audio",
            serde_json::json!({"text": "Boom."}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_tts_returns_wav_file() {
        let (app, _, _dir) = test_app();
        let response =
            post_json(&app, "/tts", serde_json::json!({"text": "A wav please."})).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            HeaderValue::from_static("audio/wav")
        );
        assert!(response.headers().contains_key("X-Duration-Seconds"));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
    }

    #[tokio::test]
    async fn test_tts_json_shape() {
        let (app, _, _dir) = test_app();
        let response = post_json(
            &app,
            "/tts-json",
            serde_json::json!({"text": "Json please.", "character_id": "expert"}),
        )
        .await;
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["audio_format"], "wav");
        assert_eq!(body["character_id"], "expert");
    }

    #[tokio::test]
    async fn test_batch_mixed_results() {
        let (app, _, _dir) = test_app();
        let response = post_json(
            &app,
            "/tts-batch",
            serde_json::json!({"requests": [
                {"id": "a", "text": "First line."},
                {"id": "b", "text": ""},
            ]}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["results"][0]["success"], true);
        assert_eq!(body["results"][1]["success"], false);
    }

    #[tokio::test]
    async fn test_stream_emits_chunks_then_done() {
        let (app, _, _dir) = test_app();
        let response = post_json(
            &app,
            "/tts-stream",
            serde_json::json!({
                "text": "First sentence here. Second sentence there. Third sentence somewhere. Fourth one too.",
                "character": "luna"
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: chunk"));
        assert!(text.contains("\"chunk_index\":0"));
        assert!(text.contains("event: done"));
    }

    #[tokio::test]
    async fn test_stream_unknown_character_fails_early() {
        let (app, _, _dir) = test_app();
        let response = post_json(
            &app,
            "/tts-stream",
            serde_json::json!({"text": "Hello there.", "character": "ghost"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_and_get_characters() {
        let (app, _, _dir) = test_app();
        let body = json_body(get_path(&app, "/characters").await).await;
        assert_eq!(body["total"], 6);

        let body = json_body(get_path(&app, "/characters/sage").await).await;
        assert_eq!(body["voice_id"], "calm");
        assert_eq!(body["parameters"]["cfg_weight"], 0.8);

        let response = get_path(&app, "/characters/ghost").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_and_get_voices() {
        let (app, _, _dir) = test_app();
        let body = json_body(get_path(&app, "/voices").await).await;
        assert_eq!(body["total"], 6);

        let body = json_body(get_path(&app, "/voices/friendly").await).await;
        let users: Vec<&str> = body["used_by_characters"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(users, vec!["assistant", "elara"]);
    }

    #[tokio::test]
    async fn test_set_character_voice_persists() {
        let (app, state, _dir) = test_app();
        let response = post_json(
            &app,
            "/characters/sage/voice",
            serde_json::json!({"voice_id": "mysterious"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["voice_name"], "Mysterious Voice");

        // Visible through the API and written to disk.
        let body = json_body(get_path(&app, "/characters/sage").await).await;
        assert_eq!(body["voice_id"], "mysterious");

        let reloaded = Registry::load(&state.registry_path).unwrap();
        assert_eq!(reloaded.character("sage").unwrap().voice_id, "mysterious");
    }

    #[tokio::test]
    async fn test_set_character_voice_validation() {
        let (app, _, _dir) = test_app();

        let response = post_json(
            &app,
            "/characters/ghost/voice",
            serde_json::json!({"voice_id": "calm"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = post_json(
            &app,
            "/characters/sage/voice",
            serde_json::json!({"voice_id": "missing"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response =
            post_json(&app, "/characters/sage/voice", serde_json::json!({})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_languages() {
        let (app, _, _dir) = test_app();
        let body = json_body(get_path(&app, "/languages").await).await;
        assert_eq!(body["total"], 23);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_404() {
        let (app, _, _dir) = test_app();
        let response = get_path(&app, "/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Endpoint not found");
    }
}

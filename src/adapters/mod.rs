//! Adapter interfaces for external systems.
//!
//! The collector and processor only talk to these traits. Concrete
//! implementations live in the submodules:
//! - `bilibili`: favorites folders as a [`MetadataSource`] and AI subtitles
//!   as a [`SubtitleSource`]
//! - `passport`: renewal of the platform web session
//! - `ytdlp`: audio download as a [`PayloadSource`]
//! - `whisper`: OpenAI-compatible transcription as a [`SpeechBackend`]
//! - `chat`: OpenAI-compatible chat completions as an [`LlmBackend`]

pub mod bilibili;
pub mod chat;
pub mod passport;
pub mod whisper;
pub mod ytdlp;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Bucket, Credential, Item, Page};

pub use bilibili::{BiliFavorites, SessionCookies};
pub use chat::ChatApi;
pub use passport::{RefreshError, SessionRefresher, SessionState};
pub use whisper::WhisperApi;
pub use ytdlp::YtDlpFetcher;

/// Errors surfaced by a metadata source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Session rejected; nothing will work until credentials are renewed
    #[error("Authentication rejected by source: {0}")]
    AuthRejected(String),

    /// Timeouts, 5xx, throttling or malformed responses; safe to retry
    #[error("Transient source error: {0}")]
    Transient(String),
}

/// Paginated listing of the user's saved items
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Human-readable source name
    fn name(&self) -> &str;

    /// All buckets owned by the user
    async fn list_buckets(&self) -> Result<Vec<Bucket>, SourceError>;

    /// One page (1-indexed) of a bucket
    async fn list_page(&self, bucket: &Bucket, page: u32) -> Result<Page, SourceError>;
}

/// Subtitles the platform already generated for an item
#[async_trait]
pub trait SubtitleSource: Send + Sync {
    /// Plain text covering every part of `item`, or `None` when no part
    /// has subtitles
    async fn subtitles(&self, item: &Item) -> Result<Option<String>, SourceError>;
}

/// Raw media handed to the speech backend
#[derive(Debug, Clone)]
pub struct Payload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Payload {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Errors acquiring a payload. All of them are terminal for the item.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Payload unavailable: {0}")]
    Unavailable(String),

    #[error("Payload too large: {size} > {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Payload fetch timed out after {0:?}")]
    TimedOut(Duration),
}

/// Source of the media to transcribe
#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// Download the audio for `item`. Implementations may give up early
    /// once `max_bytes` is exceeded.
    async fn fetch(&self, item: &Item, max_bytes: u64) -> Result<Payload, FetchError>;
}

/// Output of a speech-to-text call
#[derive(Debug, Clone, Default)]
pub struct Transcription {
    pub text: String,

    /// Audio length billed by the backend, if reported
    pub duration_secs: Option<f64>,
}

/// Errors from the speech backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The credential is out of quota right now
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Backend error: {0}")]
    Other(String),
}

/// Speech-to-text service
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn transcribe(
        &self,
        credential: &Credential,
        payload: &Payload,
    ) -> Result<Transcription, BackendError>;
}

/// Chat-completion LLM used by the filter and rewrite stages
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Model name, recorded in stage outputs
    fn model(&self) -> &str;

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

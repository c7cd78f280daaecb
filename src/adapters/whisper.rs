//! Whisper transcription over an OpenAI-compatible HTTP API.
//!
//! Uploads the payload as multipart form data and asks for `verbose_json`
//! so the billed audio duration comes back alongside the text.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;

use super::{BackendError, Payload, SpeechBackend, Transcription};
use crate::domain::Credential;

/// Longest error body excerpt kept in error messages
const ERROR_EXCERPT_CHARS: usize = 200;

/// Whisper API client (Groq, OpenAI, or anything speaking the same protocol)
pub struct WhisperApi {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    language: Option<String>,
}

/// `verbose_json` response (only the fields we use)
#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    duration: Option<f64>,
}

impl WhisperApi {
    /// `base_url` is the API root, e.g. `https://api.groq.com/openai/v1`
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        language: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/audio/transcriptions", base_url.trim_end_matches('/')),
            model: model.into(),
            language,
        })
    }

    fn form(&self, payload: &Payload) -> Result<Form, BackendError> {
        let part = Part::bytes(payload.bytes.clone())
            .file_name(payload.file_name.clone())
            .mime_str("audio/mp4")
            .map_err(|e| BackendError::Other(format!("Invalid MIME type: {}", e)))?;

        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("temperature", "0")
            .part("file", part);

        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        Ok(form)
    }
}

#[async_trait]
impl SpeechBackend for WhisperApi {
    async fn transcribe(
        &self,
        credential: &Credential,
        payload: &Payload,
    ) -> Result<Transcription, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential.secret())
            .multipart(self.form(payload)?)
            .send()
            .await
            .map_err(|e| BackendError::Other(format!("Transcription request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Other(format!("Failed to read transcription response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        parse_transcription(&body)
    }
}

fn parse_transcription(body: &str) -> Result<Transcription, BackendError> {
    let parsed: VerboseTranscription = serde_json::from_str(body)
        .map_err(|e| BackendError::Other(format!("Failed to parse transcription JSON: {}", e)))?;

    Ok(Transcription {
        text: parsed.text.trim().to_string(),
        duration_secs: parsed.duration.filter(|d| *d > 0.0),
    })
}

/// Map a failed response to a backend error.
///
/// HTTP 429 and `rate_limit_exceeded` error codes mean the key is out of
/// quota; everything else is an ordinary failure.
fn classify_failure(status: StatusCode, body: &str) -> BackendError {
    let excerpt: String = body.chars().take(ERROR_EXCERPT_CHARS).collect();

    if status == StatusCode::TOO_MANY_REQUESTS || body.to_lowercase().contains("rate_limit") {
        BackendError::RateLimited(format!("HTTP {}: {}", status.as_u16(), excerpt))
    } else {
        BackendError::Other(format!("HTTP {}: {}", status.as_u16(), excerpt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_building() {
        let api = WhisperApi::new(
            "https://api.groq.com/openai/v1/",
            "whisper-large-v3-turbo",
            Some("zh".to_string()),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(api.endpoint, "https://api.groq.com/openai/v1/audio/transcriptions");
    }

    #[test]
    fn test_parse_verbose_json() {
        let body = r#"{"task": "transcribe", "language": "zh", "duration": 61.5, "text": "  你好，世界  ", "segments": []}"#;
        let t = parse_transcription(body).unwrap();
        assert_eq!(t.text, "你好，世界");
        assert_eq!(t.duration_secs, Some(61.5));
    }

    #[test]
    fn test_parse_empty_text_without_duration() {
        let t = parse_transcription(r#"{"text": ""}"#).unwrap();
        assert!(t.text.is_empty());
        assert_eq!(t.duration_secs, None);
    }

    #[test]
    fn test_rate_limit_classification() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, BackendError::RateLimited(_)));

        let body = r#"{"error": {"message": "Limit reached", "code": "rate_limit_exceeded"}}"#;
        let err = classify_failure(StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, BackendError::RateLimited(_)));

        let err = classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(matches!(err, BackendError::Other(_)));
    }

    #[test]
    fn test_error_excerpt_is_bounded() {
        let body = "x".repeat(1000);
        match classify_failure(StatusCode::BAD_GATEWAY, &body) {
            BackendError::Other(msg) => assert!(msg.len() < 300),
            other => panic!("unexpected {:?}", other),
        }
    }
}

//! Per-item outcome of the speech-to-text stage.

use serde::{Deserialize, Serialize};

/// Outcome recorded for one queued item.
///
/// `Ok` and `NoSpeech` are settled and never reprocessed. The error
/// variants are retried on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Transcript produced and stored
    Ok,

    /// Processed, but the audio carried no usable speech
    NoSpeech,

    /// Payload could not be acquired (missing, oversized or too slow)
    ErrorDownload,

    /// Backend rejected or failed the transcription
    ErrorTranscribe,
}

impl ItemStatus {
    /// Whether the item is done for good
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Ok | Self::NoSpeech)
    }

    pub fn is_error(self) -> bool {
        matches!(self, Self::ErrorDownload | Self::ErrorTranscribe)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Ok => write!(f, "ok"),
            ItemStatus::NoSpeech => write!(f, "no_speech"),
            ItemStatus::ErrorDownload => write!(f, "error_download"),
            ItemStatus::ErrorTranscribe => write!(f, "error_transcribe"),
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "ok" => Ok(ItemStatus::Ok),
            "no_speech" => Ok(ItemStatus::NoSpeech),
            "error_download" => Ok(ItemStatus::ErrorDownload),
            "error_transcribe" => Ok(ItemStatus::ErrorTranscribe),
            _ => anyhow::bail!("Unknown item status: {}", s),
        }
    }
}

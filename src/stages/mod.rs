//! Per-item stages around speech-to-text.
//!
//! - `subtitles`: takes platform subtitles before any ASR quota is spent
//! - `filter`: judges whether a transcript is worth turning into a document
//! - `polish`: rewrites raw transcripts into readable prose
//!
//! Each stage checkpoints a per-item progress map, retries remote calls
//! with backoff, and falls back to an explicit outcome when retries run out.

pub mod filter;
pub mod polish;
pub mod subtitles;

use std::time::Duration;

use crate::core::RetryPolicy;

pub use filter::{load_suitability, FilterReport, Suitability, SuitabilityFile, SuitabilityFilter};
pub use polish::{PolishOutcome, PolishReport, Polisher};
pub use subtitles::{NoSubtitleFile, SubtitleExtractor, SubtitleReport, SubtitleStatus};

/// Shared knobs for the per-item stages
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub retry: RetryPolicy,

    /// Items between progress flushes
    pub checkpoint_every: usize,

    /// Pause between remote calls
    pub item_delay: Duration,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            checkpoint_every: 20,
            item_delay: Duration::from_millis(300),
        }
    }
}

/// Remove a surrounding Markdown code fence, if the model added one
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }

    // Drop the opening fence line (it may carry a language tag)
    let body = match trimmed.split_once('\n') {
        Some((_, rest)) => rest,
        None => return "",
    };

    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  ```\nplain\n```  \n"), "plain");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```"), "");
    }
}

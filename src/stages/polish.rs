//! Rewrites raw transcripts into readable documents.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::adapters::LlmBackend;
use crate::config::paths::DataPaths;
use crate::core::checkpoint::CheckpointStore;
use crate::domain::Item;
use crate::transcripts::{Tier, TranscriptStore};

use super::{strip_code_fences, StageSettings, Suitability};

const SYSTEM_PROMPT: &str = r#"You are a subtitle editing tool. Turn a video subtitle or speech-to-text transcript into a readable document.

Editing rules (minimal intervention):
1. Remove filler words and verbal tics
2. Merge self-corrections ("no wait, it is X" becomes just X)
3. Fix obvious speech-recognition homophone errors using the context
4. Split into paragraphs at topic changes and give each a short heading taken from the content
5. Normalize punctuation and sentence breaks
6. Keep the speaker's voice; do not turn spoken language into formal prose
7. Do not change the meaning, add content, or add your own opinions
8. For dialogue or interviews, keep speakers apart when the context allows

Output format:
- Output only the edited text, with no preface or explanation
- Use Markdown (## headings)
- Leave a blank line between paragraphs"#;

/// Per-item result of the rewrite stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolishOutcome {
    Polished,

    /// Raw transcript missing, a placeholder, or too short
    Unusable,

    /// Model kept failing; retried on the next run
    Failed,
}

impl PolishOutcome {
    pub fn is_final(&self) -> bool {
        !matches!(self, PolishOutcome::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PolishReport {
    pub polished: usize,
    pub unusable: usize,
    pub failed: usize,
}

pub struct Polisher<'a, L: LlmBackend> {
    llm: &'a L,
    transcripts: &'a TranscriptStore,
    progress: CheckpointStore<HashMap<String, PolishOutcome>>,
    settings: StageSettings,
}

impl<'a, L: LlmBackend> Polisher<'a, L> {
    pub fn new(
        llm: &'a L,
        transcripts: &'a TranscriptStore,
        paths: &DataPaths,
        settings: StageSettings,
    ) -> Self {
        Self {
            llm,
            transcripts,
            progress: CheckpointStore::new(paths.polish_progress()),
            settings,
        }
    }

    /// Rewrite every suitable item that has no polished transcript yet
    #[instrument(skip_all, fields(model = %self.llm.model()))]
    pub async fn run(
        &self,
        items: &[Item],
        verdicts: &BTreeMap<String, Suitability>,
    ) -> Result<PolishReport> {
        let mut progress = self.progress.load_or_default()?;

        let remaining: Vec<&Item> = items
            .iter()
            .filter(|item| verdicts.get(&item.id).map_or(false, |v| v.suitable))
            .filter(|item| !progress.get(&item.id).map_or(false, |o| o.is_final()))
            .filter(|item| !self.transcripts.exists(Tier::Polished, &item.id))
            .collect();
        info!(remaining = remaining.len(), "Starting polish");

        let mut report = PolishReport::default();
        let mut since_flush = 0;

        for item in remaining {
            let outcome = self.polish(item).await?;
            match outcome {
                PolishOutcome::Polished => report.polished += 1,
                PolishOutcome::Unusable => report.unusable += 1,
                PolishOutcome::Failed => report.failed += 1,
            }

            progress.insert(item.id.clone(), outcome);
            since_flush += 1;
            if since_flush >= self.settings.checkpoint_every {
                self.progress.save(&progress)?;
                since_flush = 0;
            }
        }

        self.progress.save(&progress)?;

        info!(
            polished = report.polished,
            unusable = report.unusable,
            failed = report.failed,
            "Polish finished"
        );
        Ok(report)
    }

    async fn polish(&self, item: &Item) -> Result<PolishOutcome> {
        let raw = self
            .transcripts
            .get_raw(&item.id)
            .with_context(|| format!("Failed to read transcript for {}", item.id))?;

        let Some(raw) = raw else {
            info!(id = %item.id, "No usable transcript, skipping");
            return Ok(PolishOutcome::Unusable);
        };

        let user_prompt = format!("Video title: {}\n\nRaw transcript:\n{}", item.title, raw.text);
        let llm = self.llm;

        let result = self
            .settings
            .retry
            .run("polish", || {
                let user_prompt = user_prompt.as_str();
                async move { llm.complete(SYSTEM_PROMPT, user_prompt).await }
            })
            .await;

        tokio::time::sleep(self.settings.item_delay).await;

        match result {
            Ok(text) => {
                let text = strip_code_fences(&text);
                if text.is_empty() {
                    warn!(id = %item.id, "Model returned an empty document");
                    return Ok(PolishOutcome::Failed);
                }

                self.transcripts
                    .write(Tier::Polished, &item.id, text)
                    .with_context(|| format!("Failed to write polished transcript for {}", item.id))?;
                info!(id = %item.id, source = %raw.tier, chars = text.chars().count(), "Polished");
                Ok(PolishOutcome::Polished)
            }
            Err(e) => {
                warn!(id = %item.id, error = %e, "Polish failed");
                Ok(PolishOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(serde_json::to_string(&PolishOutcome::Unusable).unwrap(), "\"unusable\"");
        assert!(PolishOutcome::Polished.is_final());
        assert!(PolishOutcome::Unusable.is_final());
        assert!(!PolishOutcome::Failed.is_final());
    }
}

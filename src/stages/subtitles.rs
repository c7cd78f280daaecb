//! Platform subtitle extraction.
//!
//! Runs before speech-to-text. Items the platform already subtitled get a
//! `subtitle` tier transcript and never spend ASR quota. Items without
//! subtitles are listed in `no_subtitle.json`.
//!
//! A rejected session stops the stage at once: every later request would
//! fail the same way. Statuses gathered up to that point are saved first.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::adapters::{SourceError, SubtitleSource};
use crate::config::paths::DataPaths;
use crate::core::checkpoint::CheckpointStore;
use crate::domain::Item;
use crate::transcripts::{Tier, TranscriptStore};

use super::StageSettings;

/// Lookup result per item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleStatus {
    Ok,
    NoSubtitle,

    /// Lookup kept failing; tried again on the next run
    Error,
}

impl SubtitleStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, SubtitleStatus::Error)
    }
}

/// `no_subtitle.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoSubtitleFile {
    pub meta: NoSubtitleMeta,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoSubtitleMeta {
    pub total: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubtitleReport {
    pub found: usize,
    pub no_subtitle: usize,
    pub failed: usize,

    /// Settled earlier, or already transcribed some other way
    pub skipped: usize,
}

pub struct SubtitleExtractor<'a, S: SubtitleSource> {
    source: &'a S,
    transcripts: &'a TranscriptStore,
    status: CheckpointStore<BTreeMap<String, SubtitleStatus>>,
    no_subtitle: CheckpointStore<NoSubtitleFile>,
    settings: StageSettings,
}

impl<'a, S: SubtitleSource> SubtitleExtractor<'a, S> {
    pub fn new(
        source: &'a S,
        transcripts: &'a TranscriptStore,
        paths: &DataPaths,
        settings: StageSettings,
    ) -> Self {
        Self {
            source,
            transcripts,
            status: CheckpointStore::new(paths.subtitle_status()),
            no_subtitle: CheckpointStore::new(paths.no_subtitle()),
            settings,
        }
    }

    /// Look up subtitles for every item without a settled status
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn run(&self, items: &[Item]) -> Result<SubtitleReport> {
        let mut status = self.status.load_or_default()?;
        let mut report = SubtitleReport::default();

        let drained = self.drain(items, &mut status, &mut report).await;
        let saved = self.status.save(&status);
        drained?;
        saved?;

        let without: Vec<Item> = items
            .iter()
            .filter(|item| status.get(&item.id) == Some(&SubtitleStatus::NoSubtitle))
            .cloned()
            .collect();
        self.no_subtitle.save(&NoSubtitleFile {
            meta: NoSubtitleMeta {
                total: without.len(),
                generated_at: Utc::now(),
            },
            items: without,
        })?;

        info!(
            found = report.found,
            no_subtitle = report.no_subtitle,
            failed = report.failed,
            skipped = report.skipped,
            "Subtitle extraction finished"
        );
        Ok(report)
    }

    async fn drain(
        &self,
        items: &[Item],
        status: &mut BTreeMap<String, SubtitleStatus>,
        report: &mut SubtitleReport,
    ) -> Result<()> {
        let mut looked_up = 0;
        let mut since_flush = 0;

        for item in items {
            if status.get(&item.id).map_or(false, |s| s.is_settled())
                || self.transcripts.has_any(&item.id)?
            {
                report.skipped += 1;
                continue;
            }

            if looked_up > 0 {
                tokio::time::sleep(self.settings.item_delay).await;
            }
            looked_up += 1;

            let outcome = match self.lookup(item).await {
                Ok(Some(text)) => {
                    self.transcripts
                        .write(Tier::Subtitle, &item.id, &text)
                        .with_context(|| format!("Failed to write subtitles for {}", item.id))?;
                    info!(id = %item.id, chars = text.chars().count(), "Subtitles found");
                    report.found += 1;
                    SubtitleStatus::Ok
                }
                Ok(None) => {
                    report.no_subtitle += 1;
                    SubtitleStatus::NoSubtitle
                }
                Err(SourceError::AuthRejected(message)) => {
                    anyhow::bail!(
                        "Session rejected while fetching subtitles ({}). Update it with `harvest creds set-session` and re-run",
                        message
                    );
                }
                Err(e) => {
                    warn!(id = %item.id, error = %e, "Subtitle lookup failed");
                    report.failed += 1;
                    SubtitleStatus::Error
                }
            };

            status.insert(item.id.clone(), outcome);
            since_flush += 1;
            if since_flush >= self.settings.checkpoint_every {
                self.status.save(status)?;
                since_flush = 0;
            }
        }

        Ok(())
    }

    /// Retries transient failures; auth rejection is returned at once
    async fn lookup(&self, item: &Item) -> Result<Option<String>, SourceError> {
        let source = self.source;
        let result = self
            .settings
            .retry
            .run("subtitles", || async move {
                match source.subtitles(item).await {
                    Err(SourceError::Transient(message)) => Err(message),
                    other => Ok(other),
                }
            })
            .await;

        match result {
            Ok(inner) => inner,
            Err(message) => Err(SourceError::Transient(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_format() {
        let json = r#"{"BV1": "ok", "BV2": "no_subtitle", "BV3": "error"}"#;
        let status: BTreeMap<String, SubtitleStatus> = serde_json::from_str(json).unwrap();

        assert!(status["BV1"].is_settled());
        assert!(status["BV2"].is_settled());
        assert!(!status["BV3"].is_settled());
    }
}

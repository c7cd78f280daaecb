//! End-to-end pipeline: collect → subtitles → ASR → filter → polish.
//!
//! Each step reads what the previous one left on disk, so any step can
//! also be run on its own from the CLI. The runner records what happened
//! in `last_run.json` whether or not the run succeeded.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{LlmBackend, MetadataSource, PayloadSource, SpeechBackend, SubtitleSource};
use crate::config::Settings;
use crate::stages::{load_suitability, Polisher, SubtitleExtractor, SuitabilityFilter};
use crate::transcripts::TranscriptStore;

use super::checkpoint::{write_atomic, CheckpointStore};
use super::collector::{CollectMode, Collector};
use super::processor::{prepare_queue, AsrCheckpoint, BatchProcessor, HaltReason};
use super::quota::CredentialPool;

/// `last_run.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub steps: StepResults,

    /// Items added by the collection step
    pub new_items: usize,

    /// Why the ASR step stopped early, if it did
    #[serde(default)]
    pub asr_halt: Option<HaltReason>,

    #[serde(default)]
    pub error: Option<String>,
}

/// Whether each step completed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResults {
    pub collect: bool,
    #[serde(default)]
    pub subtitles: bool,
    pub asr: bool,
    pub filter: bool,
    pub polish: bool,
}

/// Everything the pipeline talks to
pub struct Pipeline<'a, S, P, B, L>
where
    S: MetadataSource + SubtitleSource,
    P: PayloadSource,
    B: SpeechBackend,
    L: LlmBackend,
{
    pub settings: &'a Settings,
    pub source: &'a S,
    pub payloads: &'a P,
    pub speech: &'a B,
    pub pool: &'a CredentialPool,
    pub filter_llm: &'a L,
    pub polish_llm: &'a L,
}

impl<'a, S, P, B, L> Pipeline<'a, S, P, B, L>
where
    S: MetadataSource + SubtitleSource,
    P: PayloadSource,
    B: SpeechBackend,
    L: LlmBackend,
{
    /// Run every step and record the summary.
    ///
    /// A failed step stops the run; its error is returned after
    /// `last_run.json` is written.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<LastRun> {
        let started = Instant::now();
        let mut record = LastRun {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed_secs: 0.0,
            steps: StepResults::default(),
            new_items: 0,
            asr_halt: None,
            error: None,
        };
        info!(run_id = %record.run_id, "Starting pipeline");

        let result = self.run_steps(&mut record).await;

        record.elapsed_secs = started.elapsed().as_secs_f64();
        if let Err(e) = &result {
            error!(error = %e, "Pipeline stopped");
            record.error = Some(format!("{:#}", e));
        }
        self.save_record(&record)?;

        info!(
            run_id = %record.run_id,
            elapsed_secs = record.elapsed_secs,
            collect = record.steps.collect,
            subtitles = record.steps.subtitles,
            asr = record.steps.asr,
            filter = record.steps.filter,
            polish = record.steps.polish,
            "Pipeline finished"
        );

        result.map(|()| record)
    }

    async fn run_steps(&self, record: &mut LastRun) -> Result<()> {
        let paths = self.settings.paths();
        let transcripts = TranscriptStore::new(paths.transcripts());

        let collector = Collector::new(self.source, &paths, self.settings.collector_settings());
        let outcome = collector
            .collect(CollectMode::Incremental)
            .await
            .context("Collection failed")?;
        record.steps.collect = true;
        record.new_items = outcome.new_items.len();

        if self.settings.subtitles.enabled {
            let extractor = SubtitleExtractor::new(
                self.source,
                &transcripts,
                &paths,
                self.settings.subtitle_stage(),
            );
            extractor
                .run(&outcome.items)
                .await
                .context("Subtitle extraction failed")?;
            record.steps.subtitles = true;
        }

        if self.pool.is_empty() {
            warn!("No ASR credentials configured, skipping speech-to-text");
        } else {
            let processor_settings = self.settings.processor_settings(None);
            let checkpoint = CheckpointStore::<AsrCheckpoint>::new(paths.asr_status());
            let queue = prepare_queue(
                &outcome.items,
                &transcripts,
                &checkpoint,
                self.pool.limits(),
                processor_settings.max_duration_secs,
            )?;

            let processor = BatchProcessor::new(
                self.pool,
                self.payloads,
                self.speech,
                &transcripts,
                checkpoint,
                processor_settings,
            );
            let report = processor.process(&queue).await.context("ASR failed")?;
            record.asr_halt = report.halt;
            record.steps.asr = true;
        }

        let filter = SuitabilityFilter::new(
            self.filter_llm,
            &transcripts,
            &paths,
            self.settings.filter_stage(),
        );
        filter.run(&outcome.items).await.context("Suitability filter failed")?;
        record.steps.filter = true;

        let verdicts = load_suitability(&paths)?
            .map(|file| file.results)
            .unwrap_or_default();
        let polisher = Polisher::new(
            self.polish_llm,
            &transcripts,
            &paths,
            self.settings.polish_stage(),
        );
        polisher.run(&outcome.items, &verdicts).await.context("Polish failed")?;
        record.steps.polish = true;

        Ok(())
    }

    fn save_record(&self, record: &LastRun) -> Result<()> {
        let path = self.settings.paths().last_run();
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &json)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Read `last_run.json`, if a run was ever recorded
pub fn load_last_run(settings: &Settings) -> Result<Option<LastRun>> {
    let store = CheckpointStore::<LastRun>::new(settings.paths().last_run());
    Ok(store.load()?)
}

//! Quota-rotating speech-to-text batch processor.
//!
//! Drains a queue of items one at a time against a pool of credentials.
//! Each credential has rolling hourly and daily budgets measured in seconds
//! of audio; the processor rotates to the next credential with headroom
//! and halts cleanly when none is left. All progress lives in one atomic
//! checkpoint, so a killed run picks up where it stopped.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{BackendError, FetchError, Payload, PayloadSource, SpeechBackend};
use crate::domain::{Credential, CredentialUsage, Item, ItemStatus, QuotaLimits};
use crate::transcripts::{Tier, TranscriptStore};

use super::checkpoint::{CheckpointError, CheckpointStore};
use super::quota::CredentialPool;

/// `asr_status.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AsrCheckpoint {
    /// Outcome per item id
    #[serde(default)]
    pub processed: HashMap<String, ItemStatus>,

    /// Usage per credential id (never the secret)
    #[serde(default)]
    pub key_usage: HashMap<String, CredentialUsage>,
}

impl AsrCheckpoint {
    pub fn status(&self, id: &str) -> Option<ItemStatus> {
        self.processed.get(id).copied()
    }

    pub fn is_settled(&self, id: &str) -> bool {
        self.status(id).map_or(false, |s| s.is_settled())
    }

    /// Number of items per status
    pub fn counts(&self) -> HashMap<ItemStatus, usize> {
        let mut counts = HashMap::new();
        for status in self.processed.values() {
            *counts.entry(*status).or_insert(0) += 1;
        }
        counts
    }
}

/// Why a run stopped before draining its queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// No credential has headroom for the next item
    QuotaExhausted,

    /// Too many downloads failed in a row
    FailureStreak,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::QuotaExhausted => write!(f, "quota exhausted"),
            HaltReason::FailureStreak => write!(f, "download failure streak"),
        }
    }
}

/// Summary of one processor run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub ok: usize,
    pub no_speech: usize,
    pub error_download: usize,
    pub error_transcribe: usize,

    /// Settled items passed over without any work
    pub skipped: usize,

    pub halt: Option<HaltReason>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            ok: 0,
            no_speech: 0,
            error_download: 0,
            error_transcribe: 0,
            skipped: 0,
            halt: None,
        }
    }

    /// Items that got a status in this run
    pub fn attempted(&self) -> usize {
        self.ok + self.no_speech + self.error_download + self.error_transcribe
    }

    fn record(&mut self, status: ItemStatus) {
        match status {
            ItemStatus::Ok => self.ok += 1,
            ItemStatus::NoSpeech => self.no_speech += 1,
            ItemStatus::ErrorDownload => self.error_download += 1,
            ItemStatus::ErrorTranscribe => self.error_transcribe += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Payloads above this size are not sent to the backend
    pub max_payload_bytes: u64,

    /// Wall-clock bound on acquiring one payload
    pub fetch_timeout: Duration,

    /// Consecutive download failures that halt the run
    pub failure_streak_limit: u32,

    /// Successful items between checkpoint flushes
    pub checkpoint_every: u32,

    /// Pause between consecutive items
    pub item_delay: Duration,

    /// Longest item queued, in seconds
    pub max_duration_secs: u64,

    /// Stop after this many items got a status
    pub limit: Option<usize>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: 24 * 1024 * 1024,
            fetch_timeout: Duration::from_secs(120),
            failure_streak_limit: 10,
            checkpoint_every: 20,
            item_delay: Duration::from_secs(4),
            max_duration_secs: 1800,
            limit: None,
        }
    }
}

/// Items that still need speech-to-text.
///
/// Items with a transcript in any tier are left out. An ASR transcript with
/// no recorded status comes from a run that stopped before its checkpoint
/// was written, so its status is set to `ok` here. Items longer than
/// `max_duration_secs` or too costly for even an unused credential are
/// dropped with a warning.
pub fn prepare_queue(
    items: &[Item],
    transcripts: &TranscriptStore,
    checkpoint: &CheckpointStore<AsrCheckpoint>,
    limits: &QuotaLimits,
    max_duration_secs: u64,
) -> Result<Vec<Item>> {
    let mut state = checkpoint.load_or_default()?;
    let mut queue = Vec::new();
    let mut too_long = 0;
    let mut over_quota = 0;
    let mut reconciled = 0;

    for item in items {
        if state.status(&item.id).is_none() && transcripts.get_tier(Tier::Asr, &item.id)?.is_some() {
            state.processed.insert(item.id.clone(), ItemStatus::Ok);
            reconciled += 1;
        }

        if item.duration_secs > max_duration_secs {
            too_long += 1;
            continue;
        }
        if !limits.admits(item.cost()) {
            warn!(
                id = %item.id,
                cost = item.cost(),
                hourly = limits.hourly,
                daily = limits.daily,
                "Item exceeds a full credential budget, skipping"
            );
            over_quota += 1;
            continue;
        }
        if transcripts.has_any(&item.id)? {
            continue;
        }
        queue.push(item.clone());
    }

    if reconciled > 0 {
        info!(reconciled, "Recorded status for transcripts left by an interrupted run");
        checkpoint.save(&state)?;
    }

    info!(queued = queue.len(), too_long, over_quota, total = items.len(), "Prepared ASR queue");
    Ok(queue)
}

/// Outcome of trying to transcribe one downloaded payload
enum Attempt {
    Done(ItemStatus),
    Halt,
}

/// Runs the speech-to-text queue
pub struct BatchProcessor<'a, P: PayloadSource, B: SpeechBackend> {
    pool: &'a CredentialPool,
    payloads: &'a P,
    backend: &'a B,
    transcripts: &'a TranscriptStore,
    checkpoint: CheckpointStore<AsrCheckpoint>,
    settings: ProcessorSettings,
}

/// Mutable state of one run
struct RunState {
    checkpoint: AsrCheckpoint,
    current: usize,
    throttled: HashSet<String>,
    since_flush: u32,
    failure_streak: u32,
}

impl<'a, P: PayloadSource, B: SpeechBackend> BatchProcessor<'a, P, B> {
    pub fn new(
        pool: &'a CredentialPool,
        payloads: &'a P,
        backend: &'a B,
        transcripts: &'a TranscriptStore,
        checkpoint: CheckpointStore<AsrCheckpoint>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            pool,
            payloads,
            backend,
            transcripts,
            checkpoint,
            settings,
        }
    }

    /// Process `queue` in order until it is drained or the run halts
    #[instrument(skip(self, queue), fields(queue = queue.len(), credentials = self.pool.len()))]
    pub async fn process(&self, queue: &[Item]) -> Result<RunReport> {
        if self.pool.is_empty() {
            anyhow::bail!("No ASR credentials configured");
        }

        let mut state = RunState {
            checkpoint: self.checkpoint.load_or_default()?,
            current: 0,
            throttled: HashSet::new(),
            since_flush: 0,
            failure_streak: 0,
        };
        let mut report = RunReport::new();
        info!(run_id = %report.run_id, "Starting ASR run");

        // Start on the first credential that is usable at all
        if let Some(index) =
            self.pool
                .find_available(&mut state.checkpoint.key_usage, 0, 0.0, Utc::now(), &state.throttled)
        {
            state.current = index;
        }

        let drained = self.drain(&mut state, &mut report, queue).await;

        // Statuses and usage recorded before a failure are still written
        let flushed = self.flush(&mut state);
        if let Err(e) = &drained {
            warn!(run_id = %report.run_id, error = %e, "ASR run aborted");
        }
        drained?;
        flushed?;

        info!(
            run_id = %report.run_id,
            ok = report.ok,
            no_speech = report.no_speech,
            error_download = report.error_download,
            error_transcribe = report.error_transcribe,
            skipped = report.skipped,
            halt = ?report.halt,
            "ASR run finished"
        );
        self.log_usage(&state.checkpoint);

        Ok(report)
    }

    /// Work through the queue, stopping at a halt or the item limit
    async fn drain(&self, state: &mut RunState, report: &mut RunReport, queue: &[Item]) -> Result<()> {
        for item in queue {
            if state.checkpoint.is_settled(&item.id) {
                report.skipped += 1;
                continue;
            }

            if let Some(limit) = self.settings.limit {
                if report.attempted() >= limit {
                    info!(limit, "Item limit reached");
                    return Ok(());
                }
            }

            if report.attempted() > 0 {
                tokio::time::sleep(self.settings.item_delay).await;
            }

            if !self.select_credential(state, item)? {
                report.halt = Some(HaltReason::QuotaExhausted);
                return Ok(());
            }

            let payload = match self.fetch(item).await {
                Ok(payload) => {
                    state.failure_streak = 0;
                    payload
                }
                Err(e) => {
                    state.failure_streak += 1;
                    warn!(id = %item.id, streak = state.failure_streak, error = %e, "Download failed");

                    state.checkpoint.processed.insert(item.id.clone(), ItemStatus::ErrorDownload);
                    report.record(ItemStatus::ErrorDownload);
                    self.flush(state)?;

                    if state.failure_streak >= self.settings.failure_streak_limit {
                        warn!(streak = state.failure_streak, "Too many consecutive download failures, stopping");
                        report.halt = Some(HaltReason::FailureStreak);
                        return Ok(());
                    }
                    continue;
                }
            };

            match self.transcribe(state, item, &payload).await? {
                Attempt::Done(status) => {
                    state.checkpoint.processed.insert(item.id.clone(), status);
                    report.record(status);

                    if status == ItemStatus::Ok {
                        state.since_flush += 1;
                        if state.since_flush >= self.settings.checkpoint_every {
                            self.flush(state)?;
                            self.log_usage(&state.checkpoint);
                        }
                    }
                }
                Attempt::Halt => {
                    report.halt = Some(HaltReason::QuotaExhausted);
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    /// Make sure the current credential can take `item`, rotating if not.
    ///
    /// Returns false when no credential in the pool has headroom.
    fn select_credential(&self, state: &mut RunState, item: &Item) -> Result<bool, CheckpointError> {
        let cost = item.cost();
        let now = Utc::now();

        let current_ok = self
            .pool
            .get(state.current)
            .map_or(false, |c| !state.throttled.contains(&c.id()))
            && self
                .pool
                .has_headroom(&mut state.checkpoint.key_usage, state.current, cost, now);

        if current_ok {
            return Ok(true);
        }

        if let Some(credential) = self.pool.get(state.current) {
            let usage = self.pool.usage_mut(&mut state.checkpoint.key_usage, credential, now);
            let window = usage
                .blocking_window(self.pool.limits(), cost)
                .map(|w| w.to_string())
                .unwrap_or_else(|| "throttled".to_string());
            info!(key = %credential.id(), %window, cost, "Credential out of headroom, rotating");
        }

        self.flush(state)?;
        Ok(self.rotate(state, cost))
    }

    /// Move to the next credential with headroom, searching after the current one
    fn rotate(&self, state: &mut RunState, cost: f64) -> bool {
        let found = self.pool.find_available(
            &mut state.checkpoint.key_usage,
            state.current + 1,
            cost,
            Utc::now(),
            &state.throttled,
        );

        match found.and_then(|index| self.pool.get(index).map(|c| (index, c))) {
            Some((index, credential)) => {
                state.current = index;
                info!(key = %credential.id(), "Rotated credential");
                true
            }
            None => {
                warn!("All credentials exhausted");
                false
            }
        }
    }

    async fn fetch(&self, item: &Item) -> Result<Payload, FetchError> {
        let max = self.settings.max_payload_bytes;
        let limit = self.settings.fetch_timeout;

        let payload = match timeout(limit, self.payloads.fetch(item, max)).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::TimedOut(limit)),
        };

        if payload.len() > max {
            return Err(FetchError::TooLarge {
                size: payload.len(),
                limit: max,
            });
        }

        debug!(id = %item.id, bytes = payload.len(), "Payload fetched");
        Ok(payload)
    }

    /// Transcribe one payload, retrying it on another credential when the
    /// current one gets rate limited.
    async fn transcribe(
        &self,
        state: &mut RunState,
        item: &Item,
        payload: &Payload,
    ) -> Result<Attempt> {
        loop {
            let credential: &Credential = self
                .pool
                .get(state.current)
                .context("Current credential index out of range")?;

            match self.backend.transcribe(credential, payload).await {
                Ok(transcription) => {
                    let charged = transcription.duration_secs.unwrap_or_else(|| item.cost());
                    self.pool
                        .usage_mut(&mut state.checkpoint.key_usage, credential, Utc::now())
                        .record(charged);

                    if transcription.text.trim().is_empty() {
                        info!(id = %item.id, "No speech detected");
                        return Ok(Attempt::Done(ItemStatus::NoSpeech));
                    }

                    self.transcripts
                        .write(Tier::Asr, &item.id, &transcription.text)
                        .with_context(|| format!("Failed to write transcript for {}", item.id))?;

                    info!(
                        id = %item.id,
                        seconds = charged,
                        chars = transcription.text.chars().count(),
                        key = %credential.id(),
                        "Transcribed"
                    );
                    return Ok(Attempt::Done(ItemStatus::Ok));
                }
                Err(BackendError::RateLimited(message)) => {
                    warn!(id = %item.id, key = %credential.id(), %message, "Rate limited, rotating");
                    state.throttled.insert(credential.id());
                    self.flush(state)?;

                    if !self.rotate(state, item.cost()) {
                        return Ok(Attempt::Halt);
                    }
                }
                Err(BackendError::Other(message)) => {
                    warn!(id = %item.id, %message, "Transcription failed");
                    return Ok(Attempt::Done(ItemStatus::ErrorTranscribe));
                }
            }
        }
    }

    fn flush(&self, state: &mut RunState) -> Result<(), CheckpointError> {
        state.since_flush = 0;
        self.checkpoint.save(&state.checkpoint)
    }

    fn log_usage(&self, checkpoint: &AsrCheckpoint) {
        for credential in self.pool.credentials() {
            if let Some(usage) = checkpoint.key_usage.get(&credential.id()) {
                info!(
                    key = %credential.id(),
                    hourly_used = usage.hourly_used,
                    daily_used = usage.daily_used,
                    "Credential usage"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_format() {
        let json = r#"{
            "processed": {"BV1": "ok", "BV2": "no_speech", "BV3": "error_download"},
            "key_usage": {
                "a1b2c3d4e5f6": {
                    "hourly_used": 120.5,
                    "hour_start": "2026-01-01T00:00:00Z",
                    "daily_used": 300.0,
                    "day_start": "2026-01-01T00:00:00Z"
                }
            }
        }"#;

        let checkpoint: AsrCheckpoint = serde_json::from_str(json).unwrap();
        assert!(checkpoint.is_settled("BV1"));
        assert!(checkpoint.is_settled("BV2"));
        assert!(!checkpoint.is_settled("BV3"));
        assert!(!checkpoint.is_settled("BV4"));
        assert_eq!(checkpoint.key_usage["a1b2c3d4e5f6"].hourly_used, 120.5);
        assert_eq!(checkpoint.counts()[&ItemStatus::Ok], 1);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let json = r#"{"processed": {"BV1": "maybe"}}"#;
        assert!(serde_json::from_str::<AsrCheckpoint>(json).is_err());
    }

    #[test]
    fn test_report_counts() {
        let mut report = RunReport::new();
        report.record(ItemStatus::Ok);
        report.record(ItemStatus::NoSpeech);
        report.record(ItemStatus::ErrorDownload);
        report.skipped = 4;

        assert_eq!(report.attempted(), 3);
        assert_eq!(report.ok, 1);
        assert_eq!(report.halt, None);
    }

    #[test]
    fn test_prepare_queue_filters_transcribed_and_long() {
        let temp = tempfile::TempDir::new().unwrap();
        let transcripts = TranscriptStore::new(temp.path().join("transcripts"));
        let checkpoint = CheckpointStore::new(temp.path().join("asr_status.json"));
        transcripts.write(Tier::Subtitle, "has_sub", "text").unwrap();

        let items = vec![
            Item::new("has_sub", 60, 1),
            Item::new("too_long", 1801, 2),
            Item::new("edge", 1800, 3),
            Item::new("fresh", 60, 4),
        ];

        let queue = prepare_queue(&items, &transcripts, &checkpoint, &QuotaLimits::default(), 1800).unwrap();
        let ids: Vec<_> = queue.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["edge", "fresh"]);
        // Nothing to reconcile, so nothing written
        assert!(!checkpoint.exists());
    }

    #[test]
    fn test_prepare_queue_drops_items_no_credential_can_take() {
        let temp = tempfile::TempDir::new().unwrap();
        let transcripts = TranscriptStore::new(temp.path().join("transcripts"));
        let checkpoint = CheckpointStore::new(temp.path().join("asr_status.json"));
        let limits = QuotaLimits {
            hourly: 600.0,
            daily: 1000.0,
        };

        let items = vec![
            Item::new("fits", 600, 1),
            Item::new("over_hourly", 601, 2),
            Item::new("after", 30, 3),
        ];

        let queue = prepare_queue(&items, &transcripts, &checkpoint, &limits, 1800).unwrap();
        let ids: Vec<_> = queue.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["fits", "after"]);
    }

    #[test]
    fn test_prepare_queue_records_orphaned_transcripts() {
        let temp = tempfile::TempDir::new().unwrap();
        let transcripts = TranscriptStore::new(temp.path().join("transcripts"));
        let checkpoint: CheckpointStore<AsrCheckpoint> = CheckpointStore::new(temp.path().join("asr_status.json"));
        transcripts.write(Tier::Asr, "landed", "spoken words").unwrap();
        transcripts.write(Tier::Subtitle, "subtitled", "subtitle words").unwrap();

        let mut existing = AsrCheckpoint::default();
        existing.processed.insert("failed".to_string(), ItemStatus::ErrorTranscribe);
        transcripts.write(Tier::Asr, "failed", "late words").unwrap();
        checkpoint.save(&existing).unwrap();

        let items = vec![
            Item::new("landed", 60, 1),
            Item::new("subtitled", 60, 2),
            Item::new("failed", 60, 3),
        ];
        let queue = prepare_queue(&items, &transcripts, &checkpoint, &QuotaLimits::default(), 1800).unwrap();
        assert!(queue.is_empty());

        let saved = checkpoint.load().unwrap().unwrap();
        assert_eq!(saved.status("landed"), Some(ItemStatus::Ok));
        assert_eq!(saved.status("subtitled"), None);
        // A recorded status is left alone
        assert_eq!(saved.status("failed"), Some(ItemStatus::ErrorTranscribe));
    }
}

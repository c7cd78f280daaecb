//! Command-line interface for harvest.
//!
//! Provides commands for each pipeline stage, the end-to-end run, status
//! reporting, and credential management.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::adapters::{BiliFavorites, ChatApi, WhisperApi, YtDlpFetcher};
use crate::config::Settings;
use crate::core::collector::load_collection;
use crate::core::pipeline::load_last_run;
use crate::core::{
    prepare_queue, AsrCheckpoint, BatchProcessor, CheckpointStore, CollectMode, Collector,
    CredentialPool, Pipeline,
};
use crate::credentials::{CredentialStore, CredentialsFile};
use crate::domain::{Item, ItemStatus};
use crate::stages::{
    load_suitability, Polisher, SubtitleExtractor, SubtitleStatus, SuitabilityFilter,
};
use crate::transcripts::{Tier, TranscriptStore};

pub mod creds;

/// harvest - collect, transcribe and curate a saved video collection
#[derive(Parser, Debug)]
#[command(name = "harvest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect saved items from the platform
    Collect {
        /// Re-scan every bucket instead of stopping at the cursor
        #[arg(long)]
        full: bool,
    },

    /// Take platform subtitles for collected items
    Subtitles,

    /// Transcribe items that have no transcript yet
    Transcribe {
        /// Maximum number of items to process
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Judge which transcripts are worth turning into documents
    Filter,

    /// Rewrite suitable transcripts into readable documents
    Polish,

    /// Run every stage in sequence, refreshing the session first
    Run,

    /// Show collection, transcription and quota status
    Status,

    /// Check the platform session
    Auth {
        #[command(subcommand)]
        command: creds::AuthCommands,
    },

    /// Manage the credentials file
    Creds {
        #[command(subcommand)]
        command: creds::CredsCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self, settings: &Settings) -> Result<()> {
        match self.command {
            Commands::Collect { full } => collect(settings, full).await,
            Commands::Subtitles => subtitles(settings).await,
            Commands::Transcribe { limit } => transcribe(settings, limit).await,
            Commands::Filter => filter(settings).await,
            Commands::Polish => polish(settings).await,
            Commands::Run => run_all(settings).await,
            Commands::Status => show_status(settings),
            Commands::Auth { command } => creds::execute_auth(settings, command).await,
            Commands::Creds { command } => creds::execute_creds(settings, command).await,
            Commands::Config => show_config(settings),
        }
    }
}

fn load_credentials(settings: &Settings) -> Result<CredentialsFile> {
    Ok(CredentialStore::new(settings.paths().credentials()).load()?)
}

pub(crate) fn build_source(settings: &Settings, creds: &CredentialsFile) -> Result<BiliFavorites> {
    if !creds.platform.is_complete() {
        anyhow::bail!("Platform session is incomplete. Run `harvest creds set-session` first");
    }

    Ok(BiliFavorites::new(
        &creds.platform,
        settings.collect.page_size,
        Duration::from_secs(settings.collect.request_timeout_secs),
    )?
    .with_part_delay(Duration::from_millis(settings.subtitles.part_delay_ms)))
}

fn build_pool(settings: &Settings, creds: &CredentialsFile) -> CredentialPool {
    CredentialPool::new(creds.asr_pool_keys(), settings.quota_limits())
}

fn build_speech(settings: &Settings) -> Result<WhisperApi> {
    WhisperApi::new(
        &settings.asr.base_url,
        settings.asr.model.clone(),
        settings.asr.language.clone(),
        Duration::from_secs(settings.asr.request_timeout_secs),
    )
}

fn build_fetcher(settings: &Settings) -> YtDlpFetcher {
    YtDlpFetcher::new().with_cookies_file(settings.asr.cookies_file.clone())
}

fn build_filter_llm(settings: &Settings, creds: &CredentialsFile) -> Result<ChatApi> {
    let key = llm_key(creds)?;
    Ok(ChatApi::new(
        &settings.llm.base_url,
        key,
        settings.llm.filter_model.clone(),
        Duration::from_secs(settings.llm.filter_timeout_secs),
    )?
    .with_sampling(0.1, 200))
}

fn build_polish_llm(settings: &Settings, creds: &CredentialsFile) -> Result<ChatApi> {
    let key = llm_key(creds)?;
    Ok(ChatApi::new(
        &settings.llm.base_url,
        key,
        settings.llm.polish_model.clone(),
        Duration::from_secs(settings.llm.polish_timeout_secs),
    )?
    .with_sampling(0.2, 16000))
}

fn llm_key(creds: &CredentialsFile) -> Result<String> {
    creds
        .llm_api_key()
        .context("No LLM API key. Set llm.api_key in credentials.json or LLM_API_KEY")
}

fn collected_items(settings: &Settings) -> Result<Vec<Item>> {
    let collection = load_collection(&settings.paths())?
        .context("Nothing collected yet. Run `harvest collect` first")?;
    Ok(collection.items)
}

/// Collect saved items
async fn collect(settings: &Settings, full: bool) -> Result<()> {
    let creds = load_credentials(settings)?;
    let source = build_source(settings, &creds)?;

    let mode = if full {
        CollectMode::Full
    } else {
        CollectMode::Incremental
    };

    let collector = Collector::new(&source, &settings.paths(), settings.collector_settings());
    let outcome = collector.collect(mode).await?;

    println!("Mode:      {}", outcome.mode);
    println!("Total:     {}", outcome.items.len());
    println!("New:       {}", outcome.new_items.len());
    println!("Cursor:    {}", outcome.cursor.marker);
    if !outcome.abandoned_buckets.is_empty() {
        println!(
            "Abandoned: {} (re-run to retry)",
            outcome.abandoned_buckets.join(", ")
        );
    }

    for item in outcome.new_items.iter().take(20) {
        println!("  + {} {}", item.id, item.title);
    }
    if outcome.new_items.len() > 20 {
        println!("  ... and {} more", outcome.new_items.len() - 20);
    }

    Ok(())
}

/// Look up platform subtitles
async fn subtitles(settings: &Settings) -> Result<()> {
    let creds = load_credentials(settings)?;
    let source = build_source(settings, &creds)?;
    let paths = settings.paths();
    let items = collected_items(settings)?;
    let transcripts = TranscriptStore::new(paths.transcripts());

    let stage = SubtitleExtractor::new(&source, &transcripts, &paths, settings.subtitle_stage());
    let report = stage.run(&items).await?;

    println!("Found:        {}", report.found);
    println!("No subtitles: {}", report.no_subtitle);
    println!("Failed:       {}", report.failed);
    println!("Skipped:      {}", report.skipped);

    Ok(())
}

/// Transcribe items without a transcript
async fn transcribe(settings: &Settings, limit: Option<usize>) -> Result<()> {
    let creds = load_credentials(settings)?;
    let pool = build_pool(settings, &creds);
    if pool.is_empty() {
        anyhow::bail!("No ASR API keys. Run `harvest creds add-asr-key` or set ASR_API_KEY");
    }

    let paths = settings.paths();
    let items = collected_items(settings)?;
    let transcripts = TranscriptStore::new(paths.transcripts());
    let processor_settings = settings.processor_settings(limit);
    let checkpoint = CheckpointStore::<AsrCheckpoint>::new(paths.asr_status());
    let queue = prepare_queue(
        &items,
        &transcripts,
        &checkpoint,
        pool.limits(),
        processor_settings.max_duration_secs,
    )?;

    let fetcher = build_fetcher(settings);
    let speech = build_speech(settings)?;
    let processor = BatchProcessor::new(
        &pool,
        &fetcher,
        &speech,
        &transcripts,
        checkpoint,
        processor_settings,
    );
    let report = processor.process(&queue).await?;

    println!("Run:               {}", report.run_id);
    println!("Transcribed:       {}", report.ok);
    println!("No speech:         {}", report.no_speech);
    println!("Download errors:   {}", report.error_download);
    println!("Transcribe errors: {}", report.error_transcribe);
    println!("Skipped:           {}", report.skipped);
    if let Some(halt) = report.halt {
        println!("Stopped early:     {}", halt);
    }

    Ok(())
}

/// Run the suitability filter
async fn filter(settings: &Settings) -> Result<()> {
    let creds = load_credentials(settings)?;
    let llm = build_filter_llm(settings, &creds)?;
    let paths = settings.paths();
    let items = collected_items(settings)?;
    let transcripts = TranscriptStore::new(paths.transcripts());

    let stage = SuitabilityFilter::new(&llm, &transcripts, &paths, settings.filter_stage());
    let report = stage.run(&items).await?;

    println!("Judged:        {}", report.judged);
    println!("Suitable:      {}", report.suitable);
    println!("No transcript: {}", report.no_transcript);
    if report.defaulted > 0 {
        println!("Kept by default (LLM unavailable): {}", report.defaulted);
    }

    Ok(())
}

/// Rewrite suitable transcripts
async fn polish(settings: &Settings) -> Result<()> {
    let creds = load_credentials(settings)?;
    let llm = build_polish_llm(settings, &creds)?;
    let paths = settings.paths();
    let items = collected_items(settings)?;
    let transcripts = TranscriptStore::new(paths.transcripts());

    let verdicts = load_suitability(&paths)?
        .context("No suitability results yet. Run `harvest filter` first")?
        .results;

    let stage = Polisher::new(&llm, &transcripts, &paths, settings.polish_stage());
    let report = stage.run(&items, &verdicts).await?;

    println!("Polished: {}", report.polished);
    println!("Unusable: {}", report.unusable);
    println!("Failed:   {}", report.failed);

    Ok(())
}

/// Run every stage
async fn run_all(settings: &Settings) -> Result<()> {
    let store = CredentialStore::new(settings.paths().credentials());
    if store.load()?.platform.refresh_token.is_empty() {
        info!("No refresh token stored, skipping session refresh");
    } else if let Err(e) = creds::refresh_session(settings, &store, false).await {
        // The session may well still work; collection reports it if not
        warn!(error = %e, "Session refresh failed");
    }

    let creds = load_credentials(settings)?;
    let source = build_source(settings, &creds)?;
    let pool = build_pool(settings, &creds);
    let fetcher = build_fetcher(settings);
    let speech = build_speech(settings)?;
    let filter_llm = build_filter_llm(settings, &creds)?;
    let polish_llm = build_polish_llm(settings, &creds)?;

    let pipeline = Pipeline {
        settings,
        source: &source,
        payloads: &fetcher,
        speech: &speech,
        pool: &pool,
        filter_llm: &filter_llm,
        polish_llm: &polish_llm,
    };

    let record = pipeline.run().await?;

    println!("Run {} finished in {:.0}s", record.run_id, record.elapsed_secs);
    println!("New items: {}", record.new_items);
    if let Some(halt) = record.asr_halt {
        println!("Transcription stopped early: {}", halt);
    }

    Ok(())
}

/// Show where everything stands
fn show_status(settings: &Settings) -> Result<()> {
    let paths = settings.paths();
    let transcripts = TranscriptStore::new(paths.transcripts());

    println!("Collection:");
    match load_collection(&paths)? {
        Some(collection) => {
            println!("  Items:      {}", collection.items.len());
            println!("  Last fetch: {} ({})", collection.meta.fetched_at, collection.meta.mode);
            if collection.meta.auth_expired {
                println!("  Last fetch stopped: session expired");
            }
        }
        None => println!("  (nothing collected)"),
    }
    if let Some(cursor) = CheckpointStore::<crate::domain::Cursor>::new(paths.cursor()).load()? {
        println!("  Cursor:     {} (scanned {})", cursor.marker, cursor.scanned_at);
    }
    if paths.collect_progress().exists() {
        println!("  An interrupted full collection will resume on the next `collect --full`");
    }

    let subtitle_status: std::collections::BTreeMap<String, SubtitleStatus> =
        CheckpointStore::new(paths.subtitle_status()).load_or_default()?;
    if !subtitle_status.is_empty() {
        let count = |wanted: SubtitleStatus| subtitle_status.values().filter(|s| **s == wanted).count();
        println!();
        println!("Subtitles:");
        println!("  found:       {}", count(SubtitleStatus::Ok));
        println!("  none:        {}", count(SubtitleStatus::NoSubtitle));
        println!("  errors:      {}", count(SubtitleStatus::Error));
    }

    println!();
    println!("Transcripts:");
    for tier in Tier::ALL {
        println!("  {:<9} {}", format!("{}:", tier), transcripts.count(tier)?);
    }

    let checkpoint = CheckpointStore::<AsrCheckpoint>::new(paths.asr_status()).load_or_default()?;
    let counts = checkpoint.counts();
    println!();
    println!("Speech-to-text:");
    for status in [
        ItemStatus::Ok,
        ItemStatus::NoSpeech,
        ItemStatus::ErrorDownload,
        ItemStatus::ErrorTranscribe,
    ] {
        println!(
            "  {:<17} {}",
            format!("{}:", status),
            counts.get(&status).copied().unwrap_or(0)
        );
    }

    // Credentials are optional for status; show usage only for known keys
    if let Ok(creds) = CredentialStore::new(paths.credentials()).load() {
        let pool = build_pool(settings, &creds);
        let limits = pool.limits();
        let now = Utc::now();

        println!();
        println!("Key usage (seconds of audio):");
        if pool.is_empty() {
            println!("  (no keys configured)");
        }
        for credential in pool.credentials() {
            match checkpoint.key_usage.get(&credential.id()) {
                Some(usage) => {
                    let mut usage = usage.clone();
                    usage.roll(now);
                    println!(
                        "  ..{}  hourly {:>7.0}/{:<7.0} daily {:>7.0}/{:<7.0}",
                        credential.id(),
                        usage.hourly_used,
                        limits.hourly,
                        usage.daily_used,
                        limits.daily
                    );
                }
                None => println!("  ..{}  unused", credential.id()),
            }
        }
    }

    if let Some(suitability) = load_suitability(&paths)? {
        println!();
        println!(
            "Suitability: {}/{} suitable ({})",
            suitability.meta.suitable, suitability.meta.total, suitability.meta.model
        );
    }

    if let Some(last) = load_last_run(settings)? {
        println!();
        println!("Last run: {} at {}", last.run_id, last.started_at);
        println!(
            "  collect={} subtitles={} asr={} filter={} polish={} ({:.0}s)",
            last.steps.collect,
            last.steps.subtitles,
            last.steps.asr,
            last.steps.filter,
            last.steps.polish,
            last.elapsed_secs
        );
        if let Some(error) = last.error {
            println!("  error: {}", error);
        }
    }

    Ok(())
}

/// Show resolved configuration
fn show_config(settings: &Settings) -> Result<()> {
    let paths = settings.paths();

    let config_file = settings
        .config_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none, using defaults)".to_string());

    println!("Config file: {}", config_file);
    println!();
    println!("Paths:");
    println!("  Home:         {}", paths.home().display());
    println!("  Credentials:  {}", paths.credentials().display());
    println!("  Data:         {}", paths.data_dir().display());
    println!("  Transcripts:  {}", paths.transcripts().display());
    println!();
    println!("Collection:");
    println!("  Page size:        {}", settings.collect.page_size);
    println!("  Stop threshold:   {}", settings.collect.stop_threshold);
    println!("  Max page retries: {}", settings.collect.max_page_retries);
    println!();
    println!("Subtitles:");
    println!("  Enabled:      {}", settings.subtitles.enabled);
    println!("  Item delay:   {}ms", settings.subtitles.item_delay_ms);
    println!();
    println!("Speech-to-text:");
    println!("  Endpoint:     {} ({})", settings.asr.base_url, settings.asr.model);
    println!("  Hourly limit: {}s per key", settings.asr.hourly_limit_secs);
    println!("  Daily limit:  {}s per key", settings.asr.daily_limit_secs);
    println!("  Max duration: {}s", settings.asr.max_duration_secs);
    println!("  Max payload:  {} MiB", settings.asr.max_payload_mb);
    println!();
    println!("LLM:");
    println!("  Endpoint:     {}", settings.llm.base_url);
    println!("  Filter model: {}", settings.llm.filter_model);
    println!("  Polish model: {}", settings.llm.polish_model);
    println!("  Attempts:     {}", settings.llm.retry.max_attempts);

    Ok(())
}

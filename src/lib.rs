//! harvest - personal content pipeline for a saved video collection
//!
//! Collects the items saved in a user's favorites folders and takes platform
//! subtitles where they exist. The rest are transcribed through a pool of
//! speech-to-text API keys. LLM stages then pick out and rewrite the
//! transcripts worth keeping.
//!
//! # Architecture
//!
//! Every stage persists its progress as an atomic JSON checkpoint:
//! - A killed run resumes where it stopped
//! - A corrupt checkpoint is an error, never a silent reset
//! - Incremental collection only re-reads what changed since the cursor
//!
//! # Modules
//!
//! - `adapters`: External system integrations (platform, yt-dlp, Whisper, chat LLM)
//! - `core`: Checkpoints, collector, quota-rotating processor, pipeline runner
//! - `domain`: Data structures (Item, Cursor, Credential, ItemStatus)
//! - `stages`: Subtitle extraction, LLM suitability filter and rewrite
//! - `transcripts`: Transcript tiers on disk
//! - `credentials`: Credentials file
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Pick up new favorites
//! harvest collect
//!
//! # Take platform subtitles
//! harvest subtitles
//!
//! # Transcribe up to 50 items
//! harvest transcribe --limit 50
//!
//! # Everything, end to end
//! harvest run
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod credentials;
pub mod domain;
pub mod stages;
pub mod transcripts;

// Re-export main types at crate root for convenience
pub use config::Settings;
pub use crate::core::{BatchProcessor, CheckpointStore, Collector, CredentialPool, Pipeline};
pub use domain::{Credential, Cursor, Item, ItemStatus};
pub use transcripts::{Tier, TranscriptStore};

//! Transcript files, one directory per tier.
//!
//! ```text
//! transcripts/
//! ├── polished/   rewritten by the polish stage
//! ├── subtitle/   platform subtitles, written by the subtitle stage
//! └── asr/        speech-to-text output
//! ```
//!
//! Every file is `{id}.txt`, UTF-8. Readers consult the tiers in priority
//! order and take the first non-empty hit.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use crate::core::checkpoint::{write_atomic, CheckpointError};

/// Placeholders that upstream tools write instead of real text
const INVALID_MARKERS: &[&str] = &["[无字幕]", "[无内容]", "[empty]"];

/// Raw transcripts shorter than this are not worth rewriting
pub const DEFAULT_MIN_CHARS: usize = 50;

#[derive(Debug, Error)]
pub enum TranscriptError {
    /// The id cannot be used as a file name inside a tier directory
    #[error("Invalid transcript id: {0:?}")]
    InvalidId(String),

    #[error(transparent)]
    Write(#[from] CheckpointError),
}

/// Transcript source, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Polished,
    Subtitle,
    Asr,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Polished, Tier::Subtitle, Tier::Asr];

    /// Tiers holding unedited text
    pub const RAW: [Tier; 2] = [Tier::Subtitle, Tier::Asr];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Tier::Polished => "polished",
            Tier::Subtitle => "subtitle",
            Tier::Asr => "asr",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A transcript and the tier it was read from
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub tier: Tier,
    pub text: String,
}

/// Read/write access to the transcript directories
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    root: PathBuf,
    min_chars: usize,
}

impl TranscriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            min_chars: DEFAULT_MIN_CHARS,
        }
    }

    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.root.join(tier.dir_name())
    }

    /// File holding `id` in `tier`.
    ///
    /// Ids are joined as a single file name, so anything that could leave
    /// the tier directory is refused.
    pub fn path(&self, tier: Tier, id: &str) -> Result<PathBuf, TranscriptError> {
        validate_id(id)?;
        Ok(self.tier_dir(tier).join(format!("{}.txt", id)))
    }

    /// Best available transcript across all tiers
    pub fn get(&self, id: &str) -> Result<Option<Transcript>> {
        self.first_of(&Tier::ALL, id)
    }

    /// Unedited transcript fit for rewriting.
    ///
    /// Skips the polished tier and rejects placeholder or very short text.
    pub fn get_raw(&self, id: &str) -> Result<Option<Transcript>> {
        let found = self.first_of(&Tier::RAW, id)?;

        Ok(found.filter(|t| {
            !INVALID_MARKERS.iter().any(|m| t.text.contains(m))
                && t.text.chars().count() >= self.min_chars
        }))
    }

    /// Transcript from a single tier
    pub fn get_tier(&self, tier: Tier, id: &str) -> Result<Option<Transcript>> {
        self.first_of(&[tier], id)
    }

    /// Whether any tier holds text for `id`
    pub fn has_any(&self, id: &str) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    pub fn exists(&self, tier: Tier, id: &str) -> bool {
        self.path(tier, id).map_or(false, |path| path.exists())
    }

    /// Atomically write a transcript
    pub fn write(&self, tier: Tier, id: &str, text: &str) -> Result<PathBuf, TranscriptError> {
        let path = self.path(tier, id)?;
        write_atomic(&path, text.as_bytes())?;
        Ok(path)
    }

    /// Number of transcript files in a tier
    pub fn count(&self, tier: Tier) -> Result<usize> {
        let pattern = self.tier_dir(tier).join("*.txt");
        let pattern = pattern.to_string_lossy();

        let paths = glob::glob(&pattern)
            .with_context(|| format!("Invalid glob pattern: {}", pattern))?;

        Ok(paths.filter_map(|entry| entry.ok()).count())
    }

    fn first_of(&self, tiers: &[Tier], id: &str) -> Result<Option<Transcript>> {
        for &tier in tiers {
            let path = self.path(tier, id)?;
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read {}", path.display()))
                }
            };

            let text = text.trim();
            if !text.is_empty() {
                return Ok(Some(Transcript {
                    tier,
                    text: text.to_string(),
                }));
            }
        }

        Ok(None)
    }
}

fn validate_id(id: &str) -> Result<(), TranscriptError> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(|c: char| c == '/' || c == '\\' || c == '\0');

    if bad {
        return Err(TranscriptError::InvalidId(id.to_string()));
    }
    Ok(())
}

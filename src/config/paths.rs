//! Canonical file locations under the harvest home.
//!
//! Single source of truth - build paths from here instead of joining
//! file names by hand.
//!
//! ## Layout
//!
//! | Path | Writer | Purpose |
//! |------|--------|---------|
//! | `credentials.json` | `harvest creds` | Session cookies and API keys |
//! | `data/collection.json` | collector | Known items |
//! | `data/cursor.json` | collector | High-water mark for incremental runs |
//! | `data/.collect_progress.json` | collector | Resume point of a full run |
//! | `data/subtitle_status.json` | subtitle stage | Subtitle lookup per item |
//! | `data/no_subtitle.json` | subtitle stage | Items left for speech-to-text |
//! | `data/asr_status.json` | processor | Item statuses and key usage |
//! | `data/suitability.json` | filter stage | Suitability verdicts |
//! | `data/.suitability_progress.json` | filter stage | Resume state |
//! | `data/.polish_progress.json` | polish stage | Resume state |
//! | `data/last_run.json` | pipeline runner | Summary of the last `run` |
//! | `transcripts/{polished,subtitle,asr}/` | stages | Transcript tiers |

use std::path::{Path, PathBuf};

/// Resolved file locations rooted at one home directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    home: PathBuf,
}

impl DataPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn data_dir(&self) -> PathBuf {
        self.home.join("data")
    }

    pub fn credentials(&self) -> PathBuf {
        self.home.join("credentials.json")
    }

    pub fn collection(&self) -> PathBuf {
        self.data_dir().join("collection.json")
    }

    pub fn cursor(&self) -> PathBuf {
        self.data_dir().join("cursor.json")
    }

    pub fn collect_progress(&self) -> PathBuf {
        self.data_dir().join(".collect_progress.json")
    }

    pub fn subtitle_status(&self) -> PathBuf {
        self.data_dir().join("subtitle_status.json")
    }

    pub fn no_subtitle(&self) -> PathBuf {
        self.data_dir().join("no_subtitle.json")
    }

    pub fn asr_status(&self) -> PathBuf {
        self.data_dir().join("asr_status.json")
    }

    pub fn suitability(&self) -> PathBuf {
        self.data_dir().join("suitability.json")
    }

    pub fn suitability_progress(&self) -> PathBuf {
        self.data_dir().join(".suitability_progress.json")
    }

    pub fn polish_progress(&self) -> PathBuf {
        self.data_dir().join(".polish_progress.json")
    }

    pub fn last_run(&self) -> PathBuf {
        self.data_dir().join("last_run.json")
    }

    pub fn transcripts(&self) -> PathBuf {
        self.home.join("transcripts")
    }
}

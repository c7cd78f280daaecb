//! Collected items, the buckets they come from, and the crawl cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A saved video discovered in one of the user's buckets.
///
/// Identity is `id`: the same item can show up in several buckets, but the
/// known set keeps only the first sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Platform identifier (e.g. a BV id)
    pub id: String,

    /// Media duration, used as the processing cost estimate
    #[serde(default)]
    pub duration_secs: u64,

    /// Insertion marker (when the item was saved), seconds since epoch
    #[serde(default)]
    pub marker: i64,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub uploader: String,

    /// Label of the bucket the item was first seen in
    #[serde(default)]
    pub bucket: String,

    #[serde(default)]
    pub link: String,

    /// Publication time on the platform, seconds since epoch
    #[serde(default)]
    pub published_at: i64,
}

impl Item {
    /// Create an item with only the fields the crawl logic cares about
    pub fn new(id: impl Into<String>, duration_secs: u64, marker: i64) -> Self {
        Self {
            id: id.into(),
            duration_secs,
            marker,
            title: String::new(),
            description: String::new(),
            uploader: String::new(),
            bucket: String::new(),
            link: String::new(),
            published_at: 0,
        }
    }

    /// Estimated processing cost in seconds of audio
    pub fn cost(&self) -> f64 {
        self.duration_secs as f64
    }
}

/// An independently paginated source partition (a favorites folder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub label: String,
    pub expected_count: u64,
}

/// One page of a bucket listing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    pub has_more: bool,
}

/// High-water mark of the last completed drain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Maximum insertion marker observed
    pub marker: i64,

    /// Size of the known set when the cursor was written
    pub known_count: usize,

    /// When the scan that produced this cursor finished
    pub scanned_at: DateTime<Utc>,
}

impl Cursor {
    /// Build the cursor that follows `previous`, never moving backwards.
    pub fn advance(previous: Option<&Cursor>, items: &[Item]) -> Self {
        let seen_max = items.iter().map(|item| item.marker).max().unwrap_or(0);
        let previous_max = previous.map(|c| c.marker).unwrap_or(0);

        Self {
            marker: seen_max.max(previous_max),
            known_count: items.len(),
            scanned_at: Utc::now(),
        }
    }
}

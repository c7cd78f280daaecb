//! Incremental crawl of a metadata source.
//!
//! Full mode drains every bucket and can resume from a progress file after
//! an interruption. Incremental mode re-reads each bucket from the first
//! page and stops once it has walked past enough items it already knows
//! that are older than the saved cursor.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{MetadataSource, SourceError};
use crate::config::paths::DataPaths;
use crate::domain::{Bucket, Cursor, Item};

use super::checkpoint::{CheckpointError, CheckpointStore};

/// Errors that end a collection run
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Session rejected by {source_name} ({saved} items saved): {message}. Renew the platform credentials and run again")]
    AuthRejected {
        source_name: String,
        saved: usize,
        message: String,
    },

    #[error("Failed to list buckets: {0}")]
    Listing(SourceError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectMode {
    Full,
    Incremental,
}

impl fmt::Display for CollectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectMode::Full => write!(f, "full"),
            CollectMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Pacing and cutoff knobs
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub page_delay: Duration,
    pub bucket_delay: Duration,
    pub retry_delay: Duration,

    /// Consecutive failures of one page before its bucket is abandoned
    pub max_page_retries: u32,

    /// Known, older-than-cursor items in a row that end an incremental scan
    pub stop_threshold: u32,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(1500),
            bucket_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(3),
            max_page_retries: 5,
            stop_threshold: 3,
        }
    }
}

/// `collection.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionFile {
    pub meta: CollectionMeta,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub total: usize,
    pub buckets_scanned: usize,
    pub fetched_at: DateTime<Utc>,
    pub mode: CollectMode,
    pub new_items: usize,
    pub auth_expired: bool,
}

/// `.collect_progress.json`: where an interrupted full run picks up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectProgress {
    pub bucket_id: String,
    pub bucket_index: usize,
    pub next_page: u32,
    pub items: Vec<Item>,
}

/// Result of a completed collection
#[derive(Debug, Clone)]
pub struct CollectOutcome {
    /// Full known set after the merge
    pub items: Vec<Item>,

    /// Items that were not in the collection file before this run
    pub new_items: Vec<Item>,

    pub cursor: Cursor,
    pub mode: CollectMode,

    /// Ids of buckets given up on after repeated page failures
    pub abandoned_buckets: Vec<String>,
}

/// Insertion-ordered set of items, first sighting wins
struct KnownSet {
    items: Vec<Item>,
    ids: HashSet<String>,
}

impl KnownSet {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            ids: HashSet::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, item: Item) -> bool {
        if self.ids.insert(item.id.clone()) {
            self.items.push(item);
            true
        } else {
            false
        }
    }

    fn extend(&mut self, items: impl IntoIterator<Item = Item>) {
        for item in items {
            self.insert(item);
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Position of the next page to read in a full run
#[derive(Debug, Clone)]
struct Position {
    bucket_id: String,
    bucket_index: usize,
    next_page: u32,
}

enum BucketEnd {
    Drained,
    Abandoned { page: u32 },
    AuthRejected(String),
}

/// Walks every bucket of a [`MetadataSource`] and maintains the known set
pub struct Collector<'a, S: MetadataSource> {
    source: &'a S,
    settings: CollectorSettings,
    collection: CheckpointStore<CollectionFile>,
    cursor: CheckpointStore<Cursor>,
    progress: CheckpointStore<CollectProgress>,
}

impl<'a, S: MetadataSource> Collector<'a, S> {
    pub fn new(source: &'a S, paths: &DataPaths, settings: CollectorSettings) -> Self {
        Self {
            source,
            settings,
            collection: CheckpointStore::new(paths.collection()),
            cursor: CheckpointStore::new(paths.cursor()),
            progress: CheckpointStore::new(paths.collect_progress()),
        }
    }

    /// Run one collection pass
    #[instrument(skip(self), fields(source = %self.source.name()))]
    pub async fn collect(&self, mode: CollectMode) -> Result<CollectOutcome, CollectError> {
        let previous_cursor = self.cursor.load()?;

        let mode = match (mode, &previous_cursor) {
            (CollectMode::Incremental, None) => {
                info!("No cursor saved yet, running a full collection");
                CollectMode::Full
            }
            _ => mode,
        };

        let existing = self.collection.load()?.map(|c| c.items).unwrap_or_default();
        let existing_ids: HashSet<String> = existing.iter().map(|i| i.id.clone()).collect();

        let mut known = KnownSet::new();
        known.extend(existing);

        let resume = match mode {
            CollectMode::Full => self.progress.load()?,
            CollectMode::Incremental => None,
        };
        if let Some(progress) = &resume {
            info!(
                bucket = %progress.bucket_id,
                page = progress.next_page,
                items = progress.items.len(),
                "Resuming interrupted full collection"
            );
            known.extend(progress.items.iter().cloned());
        }

        // The cutoff only applies in incremental mode
        let cutoff = match (mode, &previous_cursor) {
            (CollectMode::Incremental, Some(cursor)) => Some(cursor.marker),
            _ => None,
        };

        let buckets = self.list_buckets().await?;
        let expected: u64 = buckets.iter().map(|b| b.expected_count).sum();
        info!(%mode, buckets = buckets.len(), expected, known = known.len(), "Starting collection");

        let (start_index, start_page) = match &resume {
            Some(progress) => resume_position(&buckets, progress),
            None => (0, 1),
        };

        let mut first_abandoned: Option<Position> = None;
        let mut abandoned_buckets = Vec::new();
        let mut buckets_scanned = 0;

        for (index, bucket) in buckets.iter().enumerate().skip(start_index) {
            if bucket.expected_count == 0 {
                debug!(bucket = %bucket.label, "Skipping empty bucket");
                continue;
            }

            if buckets_scanned > 0 {
                tokio::time::sleep(self.settings.bucket_delay).await;
            }

            let first_page = if index == start_index { start_page } else { 1 };
            let before = known.len();

            let end = self
                .drain_bucket(index, bucket, first_page, mode, cutoff, &mut known, &first_abandoned)
                .await?;
            buckets_scanned += 1;

            info!(
                bucket = %bucket.label,
                added = known.len() - before,
                total = known.len(),
                "Bucket finished"
            );

            match end {
                BucketEnd::Drained => {}
                BucketEnd::Abandoned { page } => {
                    warn!(bucket = %bucket.label, page, "Bucket abandoned for this run");
                    abandoned_buckets.push(bucket.id.clone());
                    if first_abandoned.is_none() {
                        first_abandoned = Some(Position {
                            bucket_id: bucket.id.clone(),
                            bucket_index: index,
                            next_page: page,
                        });
                    }
                }
                BucketEnd::AuthRejected(message) => {
                    let saved = known.len();
                    self.save_collection(&known, &existing_ids, mode, buckets_scanned, true)?;
                    warn!(saved, "Session rejected, collected items saved; cursor left unchanged");

                    return Err(CollectError::AuthRejected {
                        source_name: self.source.name().to_string(),
                        saved,
                        message,
                    });
                }
            }
        }

        let new_items = self.save_collection(&known, &existing_ids, mode, buckets_scanned, false)?;

        let cursor = Cursor::advance(previous_cursor.as_ref(), &known.items);
        self.cursor.save(&cursor)?;

        if mode == CollectMode::Full {
            if abandoned_buckets.is_empty() {
                self.progress.clear()?;
            } else if let Some(position) = &first_abandoned {
                self.save_progress(position, &known)?;
            }
        }

        info!(
            %mode,
            total = known.len(),
            new = new_items.len(),
            cursor = cursor.marker,
            abandoned = abandoned_buckets.len(),
            "Collection complete"
        );

        Ok(CollectOutcome {
            items: known.items,
            new_items,
            cursor,
            mode,
            abandoned_buckets,
        })
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>, CollectError> {
        let mut failures = 0;

        loop {
            match self.source.list_buckets().await {
                Ok(buckets) => return Ok(buckets),
                Err(SourceError::AuthRejected(message)) => {
                    return Err(CollectError::AuthRejected {
                        source_name: self.source.name().to_string(),
                        saved: 0,
                        message,
                    })
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.settings.max_page_retries {
                        return Err(CollectError::Listing(e));
                    }
                    warn!(attempt = failures, error = %e, "Bucket listing failed, retrying");
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }
    }

    /// Read one bucket from `first_page` until it runs out, the cutoff
    /// triggers, or the page keeps failing.
    #[allow(clippy::too_many_arguments)]
    async fn drain_bucket(
        &self,
        index: usize,
        bucket: &Bucket,
        first_page: u32,
        mode: CollectMode,
        cutoff: Option<i64>,
        known: &mut KnownSet,
        first_abandoned: &Option<Position>,
    ) -> Result<BucketEnd, CollectError> {
        let mut page_no = first_page;
        let mut failures = 0;
        let mut streak = 0;

        loop {
            let page = match self.source.list_page(bucket, page_no).await {
                Ok(page) => page,
                Err(SourceError::AuthRejected(message)) => {
                    if mode == CollectMode::Full {
                        let here = Position {
                            bucket_id: bucket.id.clone(),
                            bucket_index: index,
                            next_page: page_no,
                        };
                        self.save_progress(first_abandoned.as_ref().unwrap_or(&here), known)?;
                    }
                    return Ok(BucketEnd::AuthRejected(message));
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.settings.max_page_retries {
                        return Ok(BucketEnd::Abandoned { page: page_no });
                    }
                    warn!(bucket = %bucket.label, page = page_no, attempt = failures, error = %e, "Page failed, retrying");
                    tokio::time::sleep(self.settings.retry_delay).await;
                    continue;
                }
            };
            failures = 0;

            if page.items.is_empty() {
                debug!(bucket = %bucket.label, page = page_no, "Empty page, bucket done");
                break;
            }

            let returned = page.items.len();
            let mut added = 0;
            let mut stop_after_page = false;

            for item in page.items {
                if let Some(cutoff) = cutoff {
                    if known.contains(&item.id) && item.marker <= cutoff {
                        streak += 1;
                        if streak >= self.settings.stop_threshold {
                            stop_after_page = true;
                        }
                        continue;
                    }
                }
                streak = 0;

                if known.insert(item) {
                    added += 1;
                }
            }

            debug!(bucket = %bucket.label, page = page_no, returned, added, has_more = page.has_more, "Page read");
            page_no += 1;

            if mode == CollectMode::Full {
                let here = Position {
                    bucket_id: bucket.id.clone(),
                    bucket_index: index,
                    next_page: page_no,
                };
                self.save_progress(first_abandoned.as_ref().unwrap_or(&here), known)?;
            }

            if stop_after_page {
                info!(bucket = %bucket.label, streak, "Reached known items older than the cursor");
                break;
            }

            if !page.has_more {
                break;
            }

            tokio::time::sleep(self.settings.page_delay).await;
        }

        Ok(BucketEnd::Drained)
    }

    fn save_progress(&self, position: &Position, known: &KnownSet) -> Result<(), CheckpointError> {
        self.progress.save(&CollectProgress {
            bucket_id: position.bucket_id.clone(),
            bucket_index: position.bucket_index,
            next_page: position.next_page,
            items: known.items.clone(),
        })
    }

    fn save_collection(
        &self,
        known: &KnownSet,
        existing_ids: &HashSet<String>,
        mode: CollectMode,
        buckets_scanned: usize,
        auth_expired: bool,
    ) -> Result<Vec<Item>, CheckpointError> {
        let new_items: Vec<Item> = known
            .items
            .iter()
            .filter(|item| !existing_ids.contains(&item.id))
            .cloned()
            .collect();

        self.collection.save(&CollectionFile {
            meta: CollectionMeta {
                total: known.len(),
                buckets_scanned,
                fetched_at: Utc::now(),
                mode,
                new_items: new_items.len(),
                auth_expired,
            },
            items: known.items.clone(),
        })?;

        Ok(new_items)
    }
}

/// Bucket index and page to restart from; buckets are matched by id first
/// since the listing order can change between runs.
fn resume_position(buckets: &[Bucket], progress: &CollectProgress) -> (usize, u32) {
    match buckets.iter().position(|b| b.id == progress.bucket_id) {
        Some(index) => (index, progress.next_page.max(1)),
        None if progress.bucket_index < buckets.len() => (progress.bucket_index, 1),
        None => (buckets.len(), 1),
    }
}

/// Load the persisted collection, if any
pub fn load_collection(paths: &DataPaths) -> Result<Option<CollectionFile>, CheckpointError> {
    CheckpointStore::new(paths.collection()).load()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(id: &str) -> Bucket {
        Bucket {
            id: id.to_string(),
            label: id.to_string(),
            expected_count: 10,
        }
    }

    fn progress(bucket_id: &str, bucket_index: usize, next_page: u32) -> CollectProgress {
        CollectProgress {
            bucket_id: bucket_id.to_string(),
            bucket_index,
            next_page,
            items: vec![],
        }
    }

    #[test]
    fn test_resume_position_prefers_bucket_id() {
        let buckets = vec![bucket("a"), bucket("b"), bucket("c")];

        assert_eq!(resume_position(&buckets, &progress("c", 0, 4)), (2, 4));
        // Unknown id falls back to the index, from the first page
        assert_eq!(resume_position(&buckets, &progress("zz", 1, 4)), (1, 1));
        assert_eq!(resume_position(&buckets, &progress("zz", 9, 4)), (3, 1));
    }

    #[test]
    fn test_known_set_first_seen_wins() {
        let mut known = KnownSet::new();
        let mut first = Item::new("x", 10, 100);
        first.bucket = "first".to_string();
        let mut second = Item::new("x", 20, 200);
        second.bucket = "second".to_string();

        assert!(known.insert(first));
        assert!(!known.insert(second));
        assert_eq!(known.len(), 1);
        assert_eq!(known.items[0].bucket, "first");
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(serde_json::to_string(&CollectMode::Incremental).unwrap(), "\"incremental\"");
        assert_eq!(CollectMode::Full.to_string(), "full");
    }
}

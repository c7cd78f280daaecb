//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use harvest::adapters::{
    BackendError, FetchError, LlmBackend, MetadataSource, Payload, PayloadSource, SourceError,
    SpeechBackend, SubtitleSource, Transcription,
};
use harvest::config::{AsrConfig, CollectConfig, LlmConfig, Settings, SubtitleConfig};
use harvest::core::{CollectorSettings, ProcessorSettings, RetryPolicy};
use harvest::domain::{Bucket, Credential, Item, Page};

/// Collector knobs without any sleeping
pub fn fast_collector() -> CollectorSettings {
    CollectorSettings {
        page_delay: Duration::ZERO,
        bucket_delay: Duration::ZERO,
        retry_delay: Duration::ZERO,
        ..Default::default()
    }
}

/// Processor knobs without any sleeping
pub fn fast_processor() -> ProcessorSettings {
    ProcessorSettings {
        item_delay: Duration::ZERO,
        ..Default::default()
    }
}

/// Settings rooted at `home` with every delay zeroed
pub fn fast_settings(home: &Path) -> Settings {
    Settings {
        home: home.to_path_buf(),
        config_file: None,
        collect: CollectConfig {
            page_delay_ms: 0,
            bucket_delay_ms: 0,
            retry_delay_ms: 0,
            ..Default::default()
        },
        subtitles: SubtitleConfig {
            item_delay_ms: 0,
            part_delay_ms: 0,
            retry: RetryPolicy::immediate(1),
            ..Default::default()
        },
        asr: AsrConfig {
            item_delay_ms: 0,
            ..Default::default()
        },
        llm: LlmConfig {
            filter_delay_ms: 0,
            polish_delay_ms: 0,
            retry: RetryPolicy::immediate(1),
            ..Default::default()
        },
    }
}

/// `count` items of bucket `bucket`, newest first, markers counting down from `top`
pub fn items(bucket: &str, prefix: &str, count: usize, top: i64) -> Vec<Item> {
    (0..count)
        .map(|i| {
            let mut item = Item::new(format!("{}{:03}", prefix, i), 60, top - i as i64);
            item.bucket = bucket.to_string();
            item.title = format!("Video {}{:03}", prefix, i);
            item
        })
        .collect()
}

pub fn item(id: &str, duration_secs: u64) -> Item {
    let mut item = Item::new(id, duration_secs, 0);
    item.title = id.to_uppercase();
    item
}

pub fn credentials(n: usize) -> Vec<Credential> {
    (1..=n).map(|i| Credential::new(format!("key-{}", i))).collect()
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Auth,
    /// Fail this many more times, then succeed
    Transient(u32),
}

/// Paginated favorites served from memory, plus subtitles for some items
pub struct FakeSource {
    buckets: Vec<(Bucket, Vec<Item>)>,
    page_size: usize,
    failures: Mutex<HashMap<(String, u32), Failure>>,
    listing_failure: Mutex<Option<Failure>>,
    calls: Mutex<Vec<(String, u32)>>,
    subtitles: HashMap<String, String>,
    subtitle_failures: Mutex<HashMap<String, Failure>>,
    subtitle_calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(page_size: usize) -> Self {
        Self {
            buckets: Vec::new(),
            page_size,
            failures: Mutex::new(HashMap::new()),
            listing_failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            subtitles: HashMap::new(),
            subtitle_failures: Mutex::new(HashMap::new()),
            subtitle_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_subtitle(mut self, id: &str, text: &str) -> Self {
        self.subtitles.insert(id.to_string(), text.to_string());
        self
    }

    pub fn fail_subtitles(self, id: &str, failure: Failure) -> Self {
        self.subtitle_failures
            .lock()
            .unwrap()
            .insert(id.to_string(), failure);
        self
    }

    /// Item ids looked up for subtitles so far
    pub fn subtitle_calls(&self) -> Vec<String> {
        self.subtitle_calls.lock().unwrap().clone()
    }

    pub fn with_bucket(mut self, id: &str, items: Vec<Item>) -> Self {
        let bucket = Bucket {
            id: id.to_string(),
            label: format!("Folder {}", id),
            expected_count: items.len() as u64,
        };
        self.buckets.push((bucket, items));
        self
    }

    pub fn fail_page(self, bucket: &str, page: u32, failure: Failure) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert((bucket.to_string(), page), failure);
        self
    }

    pub fn fail_listing(self, failure: Failure) -> Self {
        *self.listing_failure.lock().unwrap() = Some(failure);
        self
    }

    /// Every `(bucket, page)` requested so far
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, bucket: &str, page: u32) -> usize {
        self.calls()
            .iter()
            .filter(|(b, p)| b == bucket && *p == page)
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn trip(failure: &mut Failure) -> Option<SourceError> {
        match failure {
            Failure::Auth => Some(SourceError::AuthRejected("-101 not logged in".to_string())),
            Failure::Transient(0) => None,
            Failure::Transient(remaining) => {
                *remaining -= 1;
                Some(SourceError::Transient("HTTP 502".to_string()))
            }
        }
    }
}

#[async_trait]
impl MetadataSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>, SourceError> {
        if let Some(failure) = self.listing_failure.lock().unwrap().as_mut() {
            if let Some(err) = Self::trip(failure) {
                return Err(err);
            }
        }
        Ok(self.buckets.iter().map(|(b, _)| b.clone()).collect())
    }

    async fn list_page(&self, bucket: &Bucket, page: u32) -> Result<Page, SourceError> {
        self.calls.lock().unwrap().push((bucket.id.clone(), page));

        if let Some(failure) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&(bucket.id.clone(), page))
        {
            if let Some(err) = Self::trip(failure) {
                return Err(err);
            }
        }

        let items = self
            .buckets
            .iter()
            .find(|(b, _)| b.id == bucket.id)
            .map(|(_, items)| items.as_slice())
            .unwrap_or_default();

        let start = (page as usize - 1) * self.page_size;
        if start >= items.len() {
            return Ok(Page::default());
        }
        let end = (start + self.page_size).min(items.len());

        Ok(Page {
            items: items[start..end].to_vec(),
            has_more: end < items.len(),
        })
    }
}

#[async_trait]
impl SubtitleSource for FakeSource {
    async fn subtitles(&self, item: &Item) -> Result<Option<String>, SourceError> {
        self.subtitle_calls.lock().unwrap().push(item.id.clone());

        if let Some(failure) = self.subtitle_failures.lock().unwrap().get_mut(&item.id) {
            if let Some(err) = Self::trip(failure) {
                return Err(err);
            }
        }

        Ok(self.subtitles.get(&item.id).cloned())
    }
}

/// Serves a small payload per item; ids in `broken` fail to download
#[derive(Default)]
pub struct FakePayloads {
    broken: HashSet<String>,
    size: usize,
    fetches: AtomicUsize,
}

impl FakePayloads {
    pub fn new() -> Self {
        Self {
            size: 1024,
            ..Default::default()
        }
    }

    pub fn broken(mut self, ids: &[&str]) -> Self {
        self.broken.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayloadSource for FakePayloads {
    async fn fetch(&self, item: &Item, _max_bytes: u64) -> Result<Payload, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if self.broken.contains(&item.id) {
            return Err(FetchError::Unavailable(format!("{} is gone", item.id)));
        }

        Ok(Payload {
            file_name: item.id.clone(),
            bytes: vec![0u8; self.size],
        })
    }
}

/// Speech backend that transcribes the payload's file name
#[derive(Default)]
pub struct FakeSpeech {
    rate_limited: HashSet<String>,
    silent: HashSet<String>,
    failing: HashSet<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credential that is always rate limited
    pub fn rate_limit(mut self, credential: &Credential) -> Self {
        self.rate_limited.insert(credential.id());
        self
    }

    /// Items with no speech in them
    pub fn silent(mut self, ids: &[&str]) -> Self {
        self.silent.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    /// Items the backend chokes on
    pub fn failing(mut self, ids: &[&str]) -> Self {
        self.failing.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    /// `(credential id, item id)` per call
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn text_for(id: &str) -> String {
        format!("spoken words from {} ", id).repeat(5)
    }
}

#[async_trait]
impl SpeechBackend for FakeSpeech {
    async fn transcribe(
        &self,
        credential: &Credential,
        payload: &Payload,
    ) -> Result<Transcription, BackendError> {
        let id = payload.file_name.clone();
        self.calls.lock().unwrap().push((credential.id(), id.clone()));

        if self.rate_limited.contains(&credential.id()) {
            return Err(BackendError::RateLimited("HTTP 429".to_string()));
        }
        if self.failing.contains(&id) {
            return Err(BackendError::Other("HTTP 500".to_string()));
        }

        let text = if self.silent.contains(&id) {
            String::new()
        } else {
            Self::text_for(&id)
        };

        Ok(Transcription {
            text,
            duration_secs: None,
        })
    }
}

type Reply = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Chat model answering through a closure over the user prompt
pub struct FakeLlm {
    reply: Reply,
    calls: AtomicUsize,
}

impl FakeLlm {
    pub fn new(reply: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for FakeLlm {
    fn model(&self) -> &str {
        "fake-model"
    }

    async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)(user_prompt)
    }
}

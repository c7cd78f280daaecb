//! Audio download through the `yt-dlp` binary.
//!
//! Shells out once per item into a scratch directory that is removed when
//! the fetch returns. Wall-clock limits are applied by the caller; the child
//! process is killed if the fetch future is dropped.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{FetchError, Payload, PayloadSource};
use crate::domain::Item;

/// Downloads the best audio-only stream of an item
pub struct YtDlpFetcher {
    binary_path: String,
    cookies_file: Option<PathBuf>,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self {
            binary_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            cookies_file: None,
        }
    }

    pub fn with_binary_path(mut self, binary_path: impl Into<String>) -> Self {
        self.binary_path = binary_path.into();
        self
    }

    /// Netscape cookie file for members-only or login-gated media
    pub fn with_cookies_file(mut self, path: Option<PathBuf>) -> Self {
        self.cookies_file = path;
        self
    }

    fn build_args(&self, item: &Item, output: &str, max_bytes: u64) -> Vec<String> {
        let mut args: Vec<String> = [
            "-f",
            "ba[ext=m4a]/ba",
            "--no-playlist",
            "--socket-timeout",
            "30",
            "--retries",
            "2",
            "--limit-rate",
            "2M",
            "-q",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push("--max-filesize".to_string());
        args.push(max_bytes.to_string());
        args.push("-o".to_string());
        args.push(output.to_string());

        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().to_string());
        }

        args.push(media_url(item));
        args
    }
}

fn media_url(item: &Item) -> String {
    if item.link.is_empty() {
        format!("https://www.bilibili.com/video/{}", item.id)
    } else {
        item.link.clone()
    }
}

/// Keep ids usable as file names
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl PayloadSource for YtDlpFetcher {
    async fn fetch(&self, item: &Item, max_bytes: u64) -> Result<Payload, FetchError> {
        let scratch = tempfile::tempdir()
            .map_err(|e| FetchError::Unavailable(format!("Failed to create temp dir: {}", e)))?;

        let file_name = format!("{}.m4a", file_stem(&item.id));
        let output_path = scratch.path().join(&file_name);

        let output = Command::new(&self.binary_path)
            .args(self.build_args(item, &output_path.to_string_lossy(), max_bytes))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::Unavailable(format!("Failed to run {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(200).collect();
            return Err(FetchError::Unavailable(format!(
                "yt-dlp exited with {}: {}",
                output.status.code().unwrap_or(-1),
                excerpt
            )));
        }

        // --max-filesize makes yt-dlp skip the download but still exit 0
        let size = tokio::fs::metadata(&output_path)
            .await
            .map_err(|_| FetchError::Unavailable("yt-dlp produced no audio file".to_string()))?
            .len();

        if size > max_bytes {
            return Err(FetchError::TooLarge {
                size,
                limit: max_bytes,
            });
        }

        let bytes = tokio::fs::read(&output_path)
            .await
            .map_err(|e| FetchError::Unavailable(format!("Failed to read audio file: {}", e)))?;

        Ok(Payload { file_name, bytes })
    }
}

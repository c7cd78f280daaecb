//! Bilibili favorites folders as a metadata source, plus AI subtitles.
//!
//! Folder and page listings and the player endpoint require WBI-signed
//! query strings. The signing keys are fetched lazily from the nav endpoint
//! and refreshed once when the API rejects a signature.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{MetadataSource, SourceError, SubtitleSource};
use crate::domain::{Bucket, Item, Page};

const DEFAULT_API_BASE: &str = "https://api.bilibili.com";
const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const SITE_REFERER: &str = "https://www.bilibili.com";

/// Session expired or missing
const CODE_NOT_LOGGED_IN: i64 = -101;
/// Signature rejected; the WBI keys rotated
const CODE_SIGNATURE_REJECTED: i64 = -403;

const SIGNATURE_RETRY_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_PART_DELAY: Duration = Duration::from_millis(500);

/// Written for parts of a multi-part item that have no subtitles
const MISSING_PART_MARKER: &str = "[无字幕]";

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Browser session cookies for the platform account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookies {
    #[serde(default)]
    pub sessdata: String,
    #[serde(default)]
    pub bili_jct: String,
    #[serde(default)]
    pub buvid3: String,
    #[serde(default)]
    pub dedeuserid: String,

    /// Issued at login; needed to renew the session
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
}

impl SessionCookies {
    /// Account id the favorites belong to
    pub fn uid(&self) -> &str {
        &self.dedeuserid
    }

    pub fn is_complete(&self) -> bool {
        !self.sessdata.is_empty() && !self.dedeuserid.is_empty()
    }

    pub(crate) fn header_value(&self) -> String {
        format!(
            "SESSDATA={}; bili_jct={}; buvid3={}; DedeUserID={}",
            self.sessdata, self.bili_jct, self.buvid3, self.dedeuserid
        )
    }
}

/// Account identity reported by the nav endpoint
#[derive(Debug, Clone)]
pub struct Account {
    pub name: String,
    pub uid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WbiKeys {
    img: String,
    sub: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct NavData {
    #[serde(default, rename = "isLogin")]
    is_login: bool,
    #[serde(default)]
    uname: String,
    #[serde(default)]
    mid: u64,
    wbi_img: Option<WbiImg>,
}

#[derive(Debug, Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

#[derive(Debug, Deserialize)]
struct FolderList {
    #[serde(default)]
    list: Option<Vec<Folder>>,
}

#[derive(Debug, Deserialize)]
struct Folder {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    media_count: u64,
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    medias: Option<Vec<Media>>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct Media {
    #[serde(default)]
    bvid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    intro: String,
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    upper: Option<Upper>,
    #[serde(default)]
    pubtime: i64,
    #[serde(default)]
    fav_time: i64,
}

#[derive(Debug, Default, Deserialize)]
struct Upper {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PagePart {
    cid: u64,
    #[serde(default)]
    part: String,
}

#[derive(Debug, Deserialize)]
struct PlayerData {
    #[serde(default)]
    subtitle: Option<SubtitleInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct SubtitleInfo {
    #[serde(default)]
    subtitles: Vec<SubtitleTrack>,
}

#[derive(Debug, Deserialize)]
struct SubtitleTrack {
    #[serde(default)]
    lan: String,
    #[serde(default)]
    subtitle_url: String,
}

#[derive(Debug, Deserialize)]
struct SubtitleBody {
    #[serde(default)]
    body: Vec<SubtitleLine>,
}

#[derive(Debug, Deserialize)]
struct SubtitleLine {
    #[serde(default)]
    content: String,
}

impl Media {
    fn into_item(self, bucket: &Bucket) -> Item {
        Item {
            link: format!("https://www.bilibili.com/video/{}", self.bvid),
            id: self.bvid,
            duration_secs: self.duration,
            marker: self.fav_time,
            title: self.title,
            description: self.intro,
            uploader: self.upper.unwrap_or_default().name,
            bucket: bucket.label.clone(),
            published_at: self.pubtime,
        }
    }
}

/// Favorites folders of one account
pub struct BiliFavorites {
    client: reqwest::Client,
    api_base: String,
    uid: String,
    page_size: u32,
    part_delay: Duration,
    wbi_keys: Mutex<Option<WbiKeys>>,
}

impl BiliFavorites {
    pub fn new(cookies: &SessionCookies, page_size: u32, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
        headers.insert(REFERER, HeaderValue::from_static(SITE_REFERER));
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&cookies.header_value())
                .context("Session cookies contain invalid header characters")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            uid: cookies.uid().to_string(),
            page_size,
            part_delay: DEFAULT_PART_DELAY,
            wbi_keys: Mutex::new(None),
        })
    }

    /// Point the client at a different API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Pause between the parts of a multi-part item
    pub fn with_part_delay(mut self, part_delay: Duration) -> Self {
        self.part_delay = part_delay;
        self
    }

    /// Verify the session and report who it belongs to
    pub async fn whoami(&self) -> Result<Account, SourceError> {
        let resp: ApiResponse<NavData> = self.get_json("/x/web-interface/nav", &[]).await?;
        match (resp.code, resp.data) {
            (0, Some(nav)) if nav.is_login => Ok(Account {
                name: nav.uname,
                uid: nav.mid,
            }),
            (0, _) | (CODE_NOT_LOGGED_IN, _) => {
                Err(SourceError::AuthRejected("session is not logged in".to_string()))
            }
            (code, _) => Err(SourceError::Transient(format!(
                "nav returned code {}: {}",
                code, resp.message
            ))),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<ApiResponse<T>, SourceError> {
        let url = format!("{}{}", self.api_base, path);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("GET {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Transient(format!("GET {} returned HTTP {}", path, status)));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("GET {} returned bad JSON: {}", path, e)))
    }

    async fn refresh_wbi_keys(&self) -> Result<WbiKeys, SourceError> {
        // nav reports the keys even when the response code is -101
        let resp: ApiResponse<NavData> = self.get_json("/x/web-interface/nav", &[]).await?;
        let img = resp
            .data
            .and_then(|nav| nav.wbi_img)
            .ok_or_else(|| SourceError::Transient("nav response carried no WBI keys".to_string()))?;

        let keys = WbiKeys {
            img: key_from_url(&img.img_url),
            sub: key_from_url(&img.sub_url),
        };
        debug!("Refreshed WBI keys");

        if let Ok(mut cached) = self.wbi_keys.lock() {
            *cached = Some(keys.clone());
        }
        Ok(keys)
    }

    async fn current_wbi_keys(&self) -> Result<WbiKeys, SourceError> {
        let cached = self.wbi_keys.lock().ok().and_then(|k| k.clone());
        match cached {
            Some(keys) => Ok(keys),
            None => self.refresh_wbi_keys().await,
        }
    }

    /// Signed GET with one signature refresh, mapping API codes to errors
    async fn signed_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<T, SourceError> {
        let keys = self.current_wbi_keys().await?;
        let mut resp: ApiResponse<T> = self
            .get_json(path, &sign_params(params.clone(), &keys, unix_now()))
            .await?;

        if resp.code == CODE_SIGNATURE_REJECTED {
            warn!(path, "Signature rejected, refreshing WBI keys");
            let keys = self.refresh_wbi_keys().await?;
            tokio::time::sleep(SIGNATURE_RETRY_DELAY).await;
            resp = self
                .get_json(path, &sign_params(params, &keys, unix_now()))
                .await?;
        }

        check_code(resp)
    }
}

#[async_trait]
impl MetadataSource for BiliFavorites {
    fn name(&self) -> &str {
        "bilibili"
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>, SourceError> {
        let data: FolderList = self
            .signed_get(
                "/x/v3/fav/folder/created/list-all",
                vec![("up_mid".to_string(), self.uid.clone())],
            )
            .await?;

        Ok(data
            .list
            .unwrap_or_default()
            .into_iter()
            .map(|f| Bucket {
                id: f.id.to_string(),
                label: f.title,
                expected_count: f.media_count,
            })
            .collect())
    }

    async fn list_page(&self, bucket: &Bucket, page: u32) -> Result<Page, SourceError> {
        let data: ResourceList = self
            .signed_get(
                "/x/v3/fav/resource/list",
                vec![
                    ("media_id".to_string(), bucket.id.clone()),
                    ("pn".to_string(), page.to_string()),
                    ("ps".to_string(), self.page_size.to_string()),
                    ("platform".to_string(), "web".to_string()),
                ],
            )
            .await?;

        Ok(Page {
            items: data
                .medias
                .unwrap_or_default()
                .into_iter()
                .filter(|m| !m.bvid.is_empty())
                .map(|m| m.into_item(bucket))
                .collect(),
            has_more: data.has_more,
        })
    }
}

impl BiliFavorites {
    /// Fetch a subtitle file and flatten it to text.
    ///
    /// Subtitle files live on a CDN, not the API host.
    async fn download_subtitle(&self, url: &str) -> Result<String, SourceError> {
        let url = absolute_url(url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("Subtitle download failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Transient(format!("Subtitle download returned HTTP {}", status)));
        }

        let body: SubtitleBody = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("Subtitle file is not JSON: {}", e)))?;
        Ok(subtitle_text(&body))
    }
}

#[async_trait]
impl SubtitleSource for BiliFavorites {
    async fn subtitles(&self, item: &Item) -> Result<Option<String>, SourceError> {
        let resp: ApiResponse<Vec<PagePart>> = self
            .get_json("/x/player/pagelist", &[("bvid".to_string(), item.id.clone())])
            .await?;
        let parts = check_code(resp)?;

        let mut texts = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.part_delay).await;
            }

            let player: PlayerData = self
                .signed_get(
                    "/x/player/wbi/v2",
                    vec![
                        ("bvid".to_string(), item.id.clone()),
                        ("cid".to_string(), part.cid.to_string()),
                    ],
                )
                .await?;

            let track = player.subtitle.as_ref().and_then(|s| pick_track(&s.subtitles));
            let text = match track {
                Some(track) => Some(self.download_subtitle(&track.subtitle_url).await?),
                None => None,
            };

            let name = if part.part.is_empty() {
                format!("P{}", i + 1)
            } else {
                part.part.clone()
            };
            debug!(id = %item.id, part = %name, found = text.is_some(), "Subtitle lookup");
            texts.push((name, text.filter(|t| !t.is_empty())));
        }

        Ok(join_parts(texts))
    }
}

fn check_code<T>(resp: ApiResponse<T>) -> Result<T, SourceError> {
    match resp.code {
        0 => resp
            .data
            .ok_or_else(|| SourceError::Transient("response carried no data".to_string())),
        CODE_NOT_LOGGED_IN => Err(SourceError::AuthRejected(format!(
            "code {}: {}",
            resp.code, resp.message
        ))),
        code => Err(SourceError::Transient(format!("code {}: {}", code, resp.message))),
    }
}

/// Prefer the AI Chinese track, then any Chinese track, then whatever is first
fn pick_track(tracks: &[SubtitleTrack]) -> Option<&SubtitleTrack> {
    let usable = || tracks.iter().filter(|t| !t.subtitle_url.is_empty());

    usable()
        .find(|t| t.lan == "ai-zh")
        .or_else(|| usable().find(|t| t.lan.contains("zh")))
        .or_else(|| usable().next())
}

/// One line per subtitle entry, with adjacent repeats dropped
fn subtitle_text(body: &SubtitleBody) -> String {
    let mut lines: Vec<&str> = Vec::with_capacity(body.body.len());
    for line in &body.body {
        let content = line.content.trim();
        if !content.is_empty() && lines.last() != Some(&content) {
            lines.push(content);
        }
    }
    lines.join("\n")
}

/// Single parts are returned as-is; multi-part items get a heading per part
fn join_parts(parts: Vec<(String, Option<String>)>) -> Option<String> {
    if parts.iter().all(|(_, text)| text.is_none()) {
        return None;
    }

    if parts.len() == 1 {
        return parts.into_iter().next().and_then(|(_, text)| text);
    }

    let sections: Vec<String> = parts
        .into_iter()
        .map(|(name, text)| {
            format!("## {}\n{}", name, text.as_deref().unwrap_or(MISSING_PART_MARKER))
        })
        .collect();
    Some(sections.join("\n\n"))
}

fn absolute_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else {
        url.to_string()
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// "https://i0.hdslb.com/bfs/wbi/7cd0...077c.png" -> "7cd0...077c"
fn key_from_url(url: &str) -> String {
    let file = url.rsplit('/').next().unwrap_or(url);
    file.split('.').next().unwrap_or(file).to_string()
}

fn mixin_key(img_key: &str, sub_key: &str) -> String {
    let orig: Vec<char> = format!("{}{}", img_key, sub_key).chars().collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&i| orig.get(i))
        .take(32)
        .collect()
}

/// Add `wts` and `w_rid` to a parameter list.
///
/// Parameters are sorted by key and stripped of `!'()*` before being
/// form-encoded and hashed together with the mixin key.
fn sign_params(params: Vec<(String, String)>, keys: &WbiKeys, wts: i64) -> Vec<(String, String)> {
    let mixin = mixin_key(&keys.img, &keys.sub);

    let mut params: Vec<(String, String)> = params
        .into_iter()
        .chain(std::iter::once(("wts".to_string(), wts.to_string())))
        .map(|(k, v)| {
            let cleaned: String = v.chars().filter(|c| !"!'()*".contains(*c)).collect();
            (k, cleaned)
        })
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();
    let mut hasher = Md5::new();
    hasher.update(format!("{}{}", query, mixin).as_bytes());
    let digest = hasher.finalize();

    params.push(("w_rid".to_string(), format!("{:x}", digest)));
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_keys() -> WbiKeys {
        WbiKeys {
            img: "7cd084941338484aae1ad9425b84077c".to_string(),
            sub: "4932caff0ff746eab6f01bf08b70ac45".to_string(),
        }
    }

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_mixin_key() {
        let keys = doc_keys();
        assert_eq!(mixin_key(&keys.img, &keys.sub), "ea1db124af3c7062474693fa704f4ff8");
    }

    #[test]
    fn test_sign_params_reference_vector() {
        let signed = sign_params(
            pairs(&[("foo", "114"), ("bar", "514"), ("zab", "1919810")]),
            &doc_keys(),
            1702204169,
        );

        let keys: Vec<&str> = signed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["bar", "foo", "wts", "zab", "w_rid"]);
        assert_eq!(signed[4].1, "8f6f2b5b3d485fe1886cec6a0be8c5d4");
    }

    #[test]
    fn test_sign_params_strips_reserved_chars() {
        let signed = sign_params(
            pairs(&[
                ("media_id", "123"),
                ("pn", "2"),
                ("ps", "20"),
                ("platform", "web"),
                ("keyword", "a b(c)!"),
            ]),
            &doc_keys(),
            1700000000,
        );

        assert_eq!(signed[0], ("keyword".to_string(), "a bc".to_string()));
        assert_eq!(signed.last().unwrap().1, "7a1ff6b4cb2e70648d1195022fb3252d");
    }

    #[test]
    fn test_key_from_url() {
        assert_eq!(
            key_from_url("https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png"),
            "7cd084941338484aae1ad9425b84077c"
        );
    }

    #[test]
    fn test_check_code_mapping() {
        let ok: ApiResponse<u32> = ApiResponse { code: 0, message: String::new(), data: Some(5) };
        assert_eq!(check_code(ok).unwrap(), 5);

        let expired: ApiResponse<u32> = ApiResponse {
            code: -101,
            message: "账号未登录".to_string(),
            data: None,
        };
        assert!(matches!(check_code(expired), Err(SourceError::AuthRejected(_))));

        let throttled: ApiResponse<u32> = ApiResponse { code: -412, message: String::new(), data: None };
        assert!(matches!(check_code(throttled), Err(SourceError::Transient(_))));
    }

    #[test]
    fn test_media_into_item() {
        let json = r#"{
            "code": 0,
            "message": "0",
            "data": {
                "medias": [
                    {"id": 1, "bvid": "BV1ab411c7de", "title": "Rust tips", "intro": "intro",
                     "duration": 615, "upper": {"mid": 9, "name": "someone"},
                     "pubtime": 1690000000, "fav_time": 1700000000},
                    {"id": 2, "bvid": "", "title": "invalid"}
                ],
                "has_more": true
            }
        }"#;

        let resp: ApiResponse<ResourceList> = serde_json::from_str(json).unwrap();
        let data = check_code(resp).unwrap();
        let bucket = Bucket {
            id: "42".to_string(),
            label: "Default".to_string(),
            expected_count: 2,
        };
        let items: Vec<Item> = data
            .medias
            .unwrap()
            .into_iter()
            .filter(|m| !m.bvid.is_empty())
            .map(|m| m.into_item(&bucket))
            .collect();

        assert!(data.has_more);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "BV1ab411c7de");
        assert_eq!(items[0].marker, 1700000000);
        assert_eq!(items[0].duration_secs, 615);
        assert_eq!(items[0].uploader, "someone");
        assert_eq!(items[0].bucket, "Default");
        assert_eq!(items[0].link, "https://www.bilibili.com/video/BV1ab411c7de");
    }

    #[test]
    fn test_cookie_header() {
        let cookies = SessionCookies {
            sessdata: "s".to_string(),
            bili_jct: "j".to_string(),
            buvid3: "b".to_string(),
            dedeuserid: "7".to_string(),
            refresh_token: "never sent".to_string(),
        };
        assert!(cookies.is_complete());
        assert_eq!(cookies.header_value(), "SESSDATA=s; bili_jct=j; buvid3=b; DedeUserID=7");
        assert!(!SessionCookies::default().is_complete());
    }

    fn track(lan: &str, url: &str) -> SubtitleTrack {
        SubtitleTrack {
            lan: lan.to_string(),
            subtitle_url: url.to_string(),
        }
    }

    #[test]
    fn test_pick_track_prefers_ai_chinese() {
        let tracks = vec![track("en-US", "//en"), track("zh-Hans", "//zh"), track("ai-zh", "//ai")];
        assert_eq!(pick_track(&tracks).unwrap().subtitle_url, "//ai");

        let tracks = vec![track("en-US", "//en"), track("zh-Hans", "//zh")];
        assert_eq!(pick_track(&tracks).unwrap().subtitle_url, "//zh");

        let tracks = vec![track("ai-zh", ""), track("en-US", "//en")];
        assert_eq!(pick_track(&tracks).unwrap().subtitle_url, "//en");

        assert!(pick_track(&[]).is_none());
    }

    #[test]
    fn test_player_response_without_subtitles() {
        let json = r#"{"code": 0, "message": "0", "data": {"subtitle": {"subtitles": []}}}"#;
        let resp: ApiResponse<PlayerData> = serde_json::from_str(json).unwrap();
        let player = check_code(resp).unwrap();
        assert!(player.subtitle.and_then(|s| pick_track(&s.subtitles).map(|_| ())).is_none());

        let expired = r#"{"code": -101, "message": "账号未登录", "data": null}"#;
        let resp: ApiResponse<PlayerData> = serde_json::from_str(expired).unwrap();
        assert!(matches!(check_code(resp), Err(SourceError::AuthRejected(_))));
    }

    #[test]
    fn test_subtitle_text_drops_repeats() {
        let json = r#"{"body": [
            {"from": 0.0, "to": 1.0, "content": "大家好"},
            {"from": 1.0, "to": 2.0, "content": "大家好"},
            {"from": 2.0, "to": 3.0, "content": "  "},
            {"from": 3.0, "to": 4.0, "content": "今天聊聊 Rust "},
            {"from": 4.0, "to": 5.0, "content": "大家好"}
        ]}"#;
        let body: SubtitleBody = serde_json::from_str(json).unwrap();
        assert_eq!(subtitle_text(&body), "大家好\n今天聊聊 Rust\n大家好");
    }

    #[test]
    fn test_join_parts() {
        assert_eq!(join_parts(vec![("P1".to_string(), None)]), None);
        assert_eq!(
            join_parts(vec![("P1".to_string(), Some("only".to_string()))]),
            Some("only".to_string())
        );
        assert_eq!(
            join_parts(vec![
                ("intro".to_string(), Some("hello".to_string())),
                ("P2".to_string(), None),
            ]),
            Some("## intro\nhello\n\n## P2\n[无字幕]".to_string())
        );
        assert_eq!(join_parts(vec![("a".to_string(), None), ("b".to_string(), None)]), None);
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(absolute_url("//aisubtitle.hdslb.com/x.json"), "https://aisubtitle.hdslb.com/x.json");
        assert_eq!(absolute_url("https://a/b.json"), "https://a/b.json");
    }
}

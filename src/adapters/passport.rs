//! Bilibili web session refresh.
//!
//! A browser session stays usable for a long time only if it is refreshed
//! when the passport service asks for it:
//! 1. `cookie/info` reports whether a refresh is due
//! 2. The correspond page, addressed by an RSA-OAEP encrypted timestamp,
//!    yields a one-time `refresh_csrf`
//! 3. `cookie/refresh` issues new cookies and a new refresh token
//! 4. `confirm/refresh` retires the old refresh token

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, COOKIE, REFERER, SET_COOKIE, USER_AGENT};
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::OsRng;
use rsa::{Oaep, RsaPublicKey};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::bilibili::SessionCookies;

const PASSPORT_BASE: &str = "https://passport.bilibili.com";
const WWW_BASE: &str = "https://www.bilibili.com";
const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Key the correspond path is encrypted with
const CORRESPOND_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDLgd2OAkcGVtoE3ThUREbio0Eg
Uc/prcajMKXvkCKFCWhJYJcLkcM2DKKcSeFpD/j6Boy538YXnR6VhcuUJOhH2x71
nzPjfdTcqMz7djHum0qSZA0AyCBDABUqCrfNgCiJ00Ra7GmRj+YCK1NJEuewlb40
JNrRuoEUXpabUzGB8QIDAQAB
-----END PUBLIC KEY-----
";

const REFRESH_CSRF_MARKER: &str = r#"<div id="1-name">"#;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("No refresh token stored. Pass --refresh-token to `harvest creds set-session`")]
    MissingRefreshToken,

    #[error("Session has no bili_jct cookie")]
    MissingCsrf,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Refresh rejected: {0}")]
    Rejected(String),
}

/// What `cookie/info` said about the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Valid,

    /// A refresh is due; carries the server clock in milliseconds
    NeedsRefresh { timestamp_ms: Option<u64> },

    /// Not logged in or otherwise refused
    Invalid { code: i64, message: String },
}

#[derive(Debug, Deserialize)]
struct PassportResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CookieInfo {
    #[serde(default)]
    refresh: bool,
    #[serde(default)]
    timestamp: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    #[serde(default)]
    refresh_token: String,
}

/// Client for the passport refresh flow
pub struct SessionRefresher {
    client: reqwest::Client,
    passport_base: String,
    www_base: String,
}

impl SessionRefresher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            passport_base: PASSPORT_BASE.to_string(),
            www_base: WWW_BASE.to_string(),
        })
    }

    /// Ask the passport service whether the session should be refreshed
    pub async fn check(&self, cookies: &SessionCookies) -> Result<SessionState, RefreshError> {
        let url = format!("{}/x/passport-login/web/cookie/info", self.passport_base);
        let resp: PassportResponse<CookieInfo> = self
            .client
            .get(&url)
            .query(&[("csrf", cookies.bili_jct.as_str())])
            .header(COOKIE, cookies.header_value())
            .header(USER_AGENT, BROWSER_UA)
            .send()
            .await?
            .json()
            .await?;

        Ok(match (resp.code, resp.data) {
            (0, Some(info)) if info.refresh => SessionState::NeedsRefresh {
                timestamp_ms: info.timestamp,
            },
            (0, _) => SessionState::Valid,
            (code, _) => SessionState::Invalid {
                code,
                message: resp.message,
            },
        })
    }

    /// Run the refresh flow and return the renewed session.
    ///
    /// `timestamp_ms` should be the server clock from [`check`](Self::check)
    /// when it reported one.
    pub async fn refresh(
        &self,
        cookies: &SessionCookies,
        timestamp_ms: Option<u64>,
    ) -> Result<SessionCookies, RefreshError> {
        if cookies.refresh_token.is_empty() {
            return Err(RefreshError::MissingRefreshToken);
        }
        if cookies.bili_jct.is_empty() {
            return Err(RefreshError::MissingCsrf);
        }

        let timestamp_ms = match timestamp_ms {
            Some(ts) if ts > 0 => ts,
            _ => chrono::Utc::now().timestamp_millis().max(0) as u64,
        };
        let refresh_csrf = self.refresh_csrf(cookies, timestamp_ms).await?;

        let url = format!("{}/x/passport-login/web/cookie/refresh", self.passport_base);
        let response = self
            .client
            .post(&url)
            .header(COOKIE, cookies.header_value())
            .header(USER_AGENT, BROWSER_UA)
            .form(&[
                ("csrf", cookies.bili_jct.as_str()),
                ("refresh_csrf", refresh_csrf.as_str()),
                ("source", "main_web"),
                ("refresh_token", cookies.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let issued = parse_set_cookies(response.headers());
        let resp: PassportResponse<RefreshData> = response.json().await?;
        if resp.code != 0 {
            return Err(RefreshError::Rejected(format!("code {}: {}", resp.code, resp.message)));
        }

        let new_token = resp.data.map(|d| d.refresh_token).unwrap_or_default();
        if new_token.is_empty() {
            warn!("Refresh succeeded without a new refresh token");
        }
        let renewed = apply_refresh(cookies, &issued, &new_token);

        // The old token stays valid until confirmed; a failed confirm is not fatal
        if let Err(e) = self.confirm(&renewed, &cookies.refresh_token).await {
            warn!(error = %e, "Could not confirm the refresh");
        }

        info!(uid = %renewed.uid(), "Session refreshed");
        Ok(renewed)
    }

    async fn refresh_csrf(
        &self,
        cookies: &SessionCookies,
        timestamp_ms: u64,
    ) -> Result<String, RefreshError> {
        let url = format!("{}/correspond/1/{}", self.www_base, correspond_path(timestamp_ms)?);
        let response = self
            .client
            .get(&url)
            .header(COOKIE, cookies.header_value())
            .header(USER_AGENT, BROWSER_UA)
            .header(REFERER, WWW_BASE)
            .send()
            .await?;

        let status = response.status();
        let html = response.text().await?;
        extract_refresh_csrf(&html).ok_or_else(|| {
            RefreshError::Rejected(format!("correspond page (HTTP {}) carried no refresh_csrf", status))
        })
    }

    async fn confirm(&self, renewed: &SessionCookies, old_token: &str) -> Result<(), RefreshError> {
        let url = format!("{}/x/passport-login/web/confirm/refresh", self.passport_base);
        let resp: PassportResponse<serde_json::Value> = self
            .client
            .post(&url)
            .header(COOKIE, renewed.header_value())
            .header(USER_AGENT, BROWSER_UA)
            .form(&[
                ("csrf", renewed.bili_jct.as_str()),
                ("refresh_token", old_token),
            ])
            .send()
            .await?
            .json()
            .await?;

        debug!(code = resp.code, "Refresh confirm");
        if resp.code != 0 {
            return Err(RefreshError::Rejected(format!("confirm code {}: {}", resp.code, resp.message)));
        }
        Ok(())
    }
}

/// Hex of the RSA-OAEP (SHA-256) encryption of `refresh_{timestamp_ms}`
pub fn correspond_path(timestamp_ms: u64) -> Result<String, RefreshError> {
    let key = RsaPublicKey::from_public_key_pem(CORRESPOND_KEY_PEM)
        .map_err(|e| RefreshError::Crypto(e.to_string()))?;

    let message = format!("refresh_{}", timestamp_ms);
    let encrypted = key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), message.as_bytes())
        .map_err(|e| RefreshError::Crypto(e.to_string()))?;

    Ok(hex::encode(encrypted))
}

fn extract_refresh_csrf(html: &str) -> Option<String> {
    let start = html.find(REFRESH_CSRF_MARKER)? + REFRESH_CSRF_MARKER.len();
    let rest = &html[start..];
    let end = rest.find("</div>")?;

    let csrf = rest[..end].trim();
    (!csrf.is_empty()).then(|| csrf.to_string())
}

/// `name=value` of every Set-Cookie header
fn parse_set_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Session with the issued cookies and token swapped in
fn apply_refresh(
    cookies: &SessionCookies,
    issued: &HashMap<String, String>,
    refresh_token: &str,
) -> SessionCookies {
    let pick = |name: &str, current: &str| {
        issued
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| current.to_string())
    };

    SessionCookies {
        sessdata: pick("SESSDATA", &cookies.sessdata),
        bili_jct: pick("bili_jct", &cookies.bili_jct),
        buvid3: cookies.buvid3.clone(),
        dedeuserid: pick("DedeUserID", &cookies.dedeuserid),
        refresh_token: if refresh_token.is_empty() {
            cookies.refresh_token.clone()
        } else {
            refresh_token.to_string()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn session() -> SessionCookies {
        SessionCookies {
            sessdata: "old_sess".to_string(),
            bili_jct: "old_jct".to_string(),
            buvid3: "buvid".to_string(),
            dedeuserid: "42".to_string(),
            refresh_token: "old_token".to_string(),
        }
    }

    #[test]
    fn test_correspond_path_is_hex_of_one_block() {
        let path = correspond_path(1_700_000_000_000).unwrap();
        // 1024-bit key
        assert_eq!(path.len(), 256);
        assert!(path.chars().all(|c| c.is_ascii_hexdigit()));
        // OAEP is randomized
        assert_ne!(path, correspond_path(1_700_000_000_000).unwrap());
    }

    #[test]
    fn test_extract_refresh_csrf() {
        let html = r#"<html><body><div id="1-name"> b0cc8411ded2f9db2cff2edb3123acac </div></body></html>"#;
        assert_eq!(
            extract_refresh_csrf(html),
            Some("b0cc8411ded2f9db2cff2edb3123acac".to_string())
        );
        assert_eq!(extract_refresh_csrf("<div id=\"1-name\"></div>"), None);
        assert_eq!(extract_refresh_csrf("<html>login</html>"), None);
    }

    #[test]
    fn test_set_cookies_replace_session() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("SESSDATA=new_sess; Path=/; Domain=bilibili.com; HttpOnly"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("bili_jct=new_jct; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("sid=abc; Path=/"));

        let issued = parse_set_cookies(&headers);
        assert_eq!(issued.len(), 3);

        let renewed = apply_refresh(&session(), &issued, "new_token");
        assert_eq!(renewed.sessdata, "new_sess");
        assert_eq!(renewed.bili_jct, "new_jct");
        assert_eq!(renewed.dedeuserid, "42");
        assert_eq!(renewed.buvid3, "buvid");
        assert_eq!(renewed.refresh_token, "new_token");

        // Nothing issued keeps what we had
        assert_eq!(apply_refresh(&session(), &HashMap::new(), ""), session());
    }

    #[tokio::test]
    async fn test_refresh_needs_token() {
        let refresher = SessionRefresher::new(Duration::from_secs(1)).unwrap();
        let mut cookies = session();
        cookies.refresh_token.clear();

        let err = refresher.refresh(&cookies, None).await.unwrap_err();
        assert!(matches!(err, RefreshError::MissingRefreshToken));
    }
}

//! Credential CLI subcommands.
//!
//! Provides commands to:
//! - `auth check`: Verify the platform session and list configured keys
//! - `creds set-session`: Store browser session cookies
//! - `creds add-asr-key`: Add a speech-to-text API key to the pool
//! - `creds refresh`: Renew the session through the passport service

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::{info, warn};

use crate::adapters::{SessionRefresher, SessionState, SourceError};
use crate::config::Settings;
use crate::credentials::{CredentialStore, CredentialsFile};
use crate::domain::Credential;

use super::build_source;

/// Session checks
#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Verify the stored session against the platform
    Check,
}

/// Credentials file edits
#[derive(Subcommand, Debug)]
pub enum CredsCommands {
    /// Store the platform session cookies
    SetSession {
        /// SESSDATA cookie
        #[arg(long, env = "BILI_SESSDATA", hide_env_values = true)]
        sessdata: String,

        /// bili_jct cookie
        #[arg(long, env = "BILI_JCT", hide_env_values = true, default_value = "")]
        bili_jct: String,

        /// buvid3 cookie
        #[arg(long, env = "BILI_BUVID3", default_value = "")]
        buvid3: String,

        /// DedeUserID cookie (account id)
        #[arg(long, env = "BILI_DEDEUSERID")]
        dedeuserid: String,

        /// ac_time_value from the browser's local storage, used by `creds refresh`
        #[arg(long, env = "BILI_REFRESH_TOKEN", hide_env_values = true, default_value = "")]
        refresh_token: String,
    },

    /// Renew the session cookies when the platform asks for it
    Refresh {
        /// Refresh even if the session is not due
        #[arg(long)]
        force: bool,
    },

    /// Add a speech-to-text API key
    AddAsrKey {
        /// The API key
        key: String,
    },
}

/// Execute auth subcommands
pub async fn execute_auth(settings: &Settings, command: AuthCommands) -> Result<()> {
    match command {
        AuthCommands::Check => check(settings).await,
    }
}

/// Execute creds subcommands
pub async fn execute_creds(settings: &Settings, command: CredsCommands) -> Result<()> {
    let store = CredentialStore::new(settings.paths().credentials());

    match command {
        CredsCommands::SetSession {
            sessdata,
            bili_jct,
            buvid3,
            dedeuserid,
            refresh_token,
        } => {
            store.update(|file| {
                file.platform.sessdata = sessdata.trim().to_string();
                file.platform.bili_jct = bili_jct.trim().to_string();
                file.platform.buvid3 = buvid3.trim().to_string();
                file.platform.dedeuserid = dedeuserid.trim().to_string();
                // Keep a stored token when none is given
                if !refresh_token.trim().is_empty() {
                    file.platform.refresh_token = refresh_token.trim().to_string();
                }
            })?;

            println!("Session saved to {}", store.path().display());
            println!("Run `harvest auth check` to verify it");
            Ok(())
        }
        CredsCommands::AddAsrKey { key } => {
            let mut added = false;
            let file = store.update(|file| {
                added = file.add_asr_key(&key);
            })?;

            let id = Credential::new(key.trim()).id();
            if added {
                println!("Added key ..{} ({} keys configured)", id, file.asr.api_keys.len());
            } else {
                println!("Key ..{} is already configured", id);
            }
            Ok(())
        }
        CredsCommands::Refresh { force } => {
            if refresh_session(settings, &store, force).await? {
                println!("Session refreshed and saved to {}", store.path().display());
            } else {
                println!("Session is not due for a refresh");
            }
            Ok(())
        }
    }
}

/// Renew the stored session if the passport service asks for it.
///
/// Returns whether new cookies were written.
pub async fn refresh_session(settings: &Settings, store: &CredentialStore, force: bool) -> Result<bool> {
    let creds = store.load()?;
    if creds.platform.refresh_token.is_empty() {
        return Err(crate::adapters::RefreshError::MissingRefreshToken.into());
    }

    let refresher = SessionRefresher::new(Duration::from_secs(settings.collect.request_timeout_secs))?;
    let state = refresher
        .check(&creds.platform)
        .await
        .context("Could not check the session")?;

    let timestamp_ms = match state {
        SessionState::Valid if !force => {
            info!("Session is valid, no refresh needed");
            return Ok(false);
        }
        SessionState::Valid => None,
        SessionState::NeedsRefresh { timestamp_ms } => timestamp_ms,
        // An expired session can still be renewed with its refresh token
        SessionState::Invalid { code, message } => {
            warn!(code, %message, "Session check refused, attempting refresh");
            None
        }
    };

    let renewed = refresher
        .refresh(&creds.platform, timestamp_ms)
        .await
        .context("Session refresh failed")?;
    store.update(|file| file.platform = renewed)?;
    Ok(true)
}

async fn check(settings: &Settings) -> Result<()> {
    let store = CredentialStore::new(settings.paths().credentials());
    let creds = store.load()?;

    print_keys(&creds);

    let source = build_source(settings, &creds)?;
    match source.whoami().await {
        Ok(account) => {
            println!("Session OK: {} (uid {})", account.name, account.uid);
            Ok(())
        }
        Err(SourceError::AuthRejected(message)) => Err(anyhow::anyhow!(
            "Session rejected ({}). Update it with `harvest creds set-session`",
            message
        )),
        Err(e) => Err(e).context("Could not verify the session"),
    }
}

fn print_keys(creds: &CredentialsFile) {
    let asr = creds.asr_pool_keys();
    if asr.is_empty() {
        println!("ASR keys: none");
    } else {
        let ids: Vec<String> = asr.iter().map(|c| format!("..{}", c.id())).collect();
        println!("ASR keys: {} ({})", asr.len(), ids.join(", "));
    }

    let llm = if creds.llm_api_key().is_some() {
        "configured"
    } else {
        "missing"
    };
    println!("LLM key:  {}", llm);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(temp: &TempDir) -> Settings {
        let home = temp.path().join("home");
        Settings::load_from(
            temp.path(),
            Some(home.to_string_lossy().into_owned()),
            home.clone(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_set_session_and_add_keys() {
        let temp = TempDir::new().unwrap();
        let settings = settings(&temp);

        execute_creds(
            &settings,
            CredsCommands::SetSession {
                sessdata: " abc ".to_string(),
                bili_jct: String::new(),
                buvid3: String::new(),
                dedeuserid: "42".to_string(),
                refresh_token: "token".to_string(),
            },
        )
        .await
        .unwrap();

        for _ in 0..2 {
            execute_creds(
                &settings,
                CredsCommands::AddAsrKey {
                    key: "gsk_one".to_string(),
                },
            )
            .await
            .unwrap();
        }

        let file = CredentialStore::new(settings.paths().credentials())
            .load()
            .unwrap();
        assert_eq!(file.platform.sessdata, "abc");
        assert_eq!(file.platform.uid(), "42");
        assert_eq!(file.asr.api_keys, vec!["gsk_one"]);
        assert_eq!(file.platform.refresh_token, "token");

        // A new session without a token keeps the stored one
        execute_creds(
            &settings,
            CredsCommands::SetSession {
                sessdata: "def".to_string(),
                bili_jct: String::new(),
                buvid3: String::new(),
                dedeuserid: "42".to_string(),
                refresh_token: String::new(),
            },
        )
        .await
        .unwrap();
        let file = CredentialStore::new(settings.paths().credentials())
            .load()
            .unwrap();
        assert_eq!(file.platform.sessdata, "def");
        assert_eq!(file.platform.refresh_token, "token");
    }

    #[tokio::test]
    async fn test_refresh_requires_refresh_token() {
        let temp = TempDir::new().unwrap();
        let settings = settings(&temp);
        let store = CredentialStore::new(settings.paths().credentials());
        store
            .update(|file| {
                file.platform.sessdata = "abc".to_string();
                file.platform.dedeuserid = "42".to_string();
            })
            .unwrap();

        let err = execute_creds(&settings, CredsCommands::Refresh { force: false })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No refresh token stored"));
        // Nothing was rewritten
        assert_eq!(store.load().unwrap().platform.sessdata, "abc");
    }

    #[tokio::test]
    async fn test_check_requires_credentials_file() {
        let temp = TempDir::new().unwrap();
        let settings = settings(&temp);

        let err = execute_auth(&settings, AuthCommands::Check).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}

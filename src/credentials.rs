//! `credentials.json`: platform session cookies and API keys.
//!
//! Rewrites hold an exclusive advisory lock on a sibling `.lock` file so two
//! `harvest creds` invocations cannot interleave. The lock is taken
//! non-blocking; a busy lock is reported instead of waited on.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::adapters::SessionCookies;
use crate::core::checkpoint::{write_atomic_private, CheckpointError};
use crate::domain::Credential;

/// Environment variable used when the file lists no ASR keys
pub const ASR_KEY_ENV: &str = "ASR_API_KEY";

/// Environment variable used when the file has no LLM key
pub const LLM_KEY_ENV: &str = "LLM_API_KEY";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credentials file not found: {0}. Run `harvest creds set-session` first")]
    Missing(PathBuf),

    #[error("Failed to parse credentials file {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Credentials file is being updated by another process: {0}")]
    Locked(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Write(#[from] CheckpointError),

    #[error("Failed to serialize credentials: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialsFile {
    #[serde(default)]
    pub platform: SessionCookies,

    #[serde(default)]
    pub asr: AsrKeys,

    #[serde(default)]
    pub llm: LlmKey,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AsrKeys {
    #[serde(default)]
    pub api_keys: Vec<String>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LlmKey {
    #[serde(default)]
    pub api_key: String,
}

impl std::fmt::Debug for CredentialsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsFile")
            .field("platform_uid", &self.platform.uid())
            .field("asr_keys", &self.asr.api_keys.len())
            .field("llm_key", &!self.llm.api_key.is_empty())
            .finish()
    }
}

impl CredentialsFile {
    /// ASR credentials from the file, or from `env_key` when the file has none
    pub fn asr_credentials(&self, env_key: Option<String>) -> Vec<Credential> {
        let keys: Vec<Credential> = self
            .asr
            .api_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(Credential::new)
            .collect();

        if !keys.is_empty() {
            return keys;
        }

        env_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| vec![Credential::new(k)])
            .unwrap_or_default()
    }

    /// ASR credentials, falling back to `ASR_API_KEY`
    pub fn asr_pool_keys(&self) -> Vec<Credential> {
        self.asr_credentials(std::env::var(ASR_KEY_ENV).ok())
    }

    /// LLM key, falling back to `LLM_API_KEY`
    pub fn llm_api_key(&self) -> Option<String> {
        let key = self.llm.api_key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
        std::env::var(LLM_KEY_ENV)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    /// Add an ASR key unless it is already present. Returns whether it was added.
    pub fn add_asr_key(&mut self, key: &str) -> bool {
        let key = key.trim();
        if key.is_empty() || self.asr.api_keys.iter().any(|k| k.trim() == key) {
            return false;
        }
        self.asr.api_keys.push(key.to_string());
        true
    }
}

/// Location of the credentials file
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    pub fn load(&self) -> Result<CredentialsFile, CredentialError> {
        match self.read()? {
            Some(file) => Ok(file),
            None => Err(CredentialError::Missing(self.path.clone())),
        }
    }

    /// Read, modify and atomically rewrite the file under the lock.
    ///
    /// A missing file starts out empty.
    pub fn update<F>(&self, apply: F) -> Result<CredentialsFile, CredentialError>
    where
        F: FnOnce(&mut CredentialsFile),
    {
        let _lock = self.lock()?;

        let mut file = self.read()?.unwrap_or_default();
        apply(&mut file);

        let json = serde_json::to_vec_pretty(&file)?;
        write_atomic_private(&self.path, &json)?;
        debug!(path = %self.path.display(), "Credentials rewritten");

        Ok(file)
    }

    fn read(&self) -> Result<Option<CredentialsFile>, CredentialError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CredentialError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| CredentialError::Invalid {
                path: self.path.clone(),
                source,
            })
    }

    /// Exclusive lock, released when the returned file is dropped
    fn lock(&self) -> Result<File, CredentialError> {
        let lock_path = self.lock_path();
        let io_err = |source| CredentialError::Io {
            path: lock_path.clone(),
            source,
        };

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(io_err)?;

        if file.try_lock_exclusive().is_err() {
            return Err(CredentialError::Locked(self.path.clone()));
        }

        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_update_creates_file() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::new(temp.path().join("credentials.json"));

        assert!(matches!(store.load(), Err(CredentialError::Missing(_))));

        store
            .update(|f| {
                f.platform.sessdata = "sess".to_string();
                f.platform.dedeuserid = "42".to_string();
            })
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.platform.uid(), "42");
        assert!(loaded.platform.is_complete());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let store = CredentialStore::new(temp.path().join("credentials.json"));
        store.update(|f| f.llm.api_key = "k".to_string()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_concurrent_rewrite_is_refused() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::new(temp.path().join("credentials.json"));

        let held = store.lock().unwrap();
        let result = store.update(|f| {
            f.add_asr_key("k1");
        });
        assert!(matches!(result, Err(CredentialError::Locked(_))));

        drop(held);
        store
            .update(|f| {
                f.add_asr_key("k1");
            })
            .unwrap();
        assert_eq!(store.load().unwrap().asr.api_keys, vec!["k1"]);
    }

    #[test]
    fn test_add_asr_key_dedupes() {
        let mut file = CredentialsFile::default();
        assert!(file.add_asr_key("gsk_a"));
        assert!(!file.add_asr_key(" gsk_a "));
        assert!(!file.add_asr_key(""));
        assert!(file.add_asr_key("gsk_b"));
        assert_eq!(file.asr.api_keys.len(), 2);
    }

    #[test]
    fn test_env_fallback_only_when_file_has_no_keys() {
        let mut file = CredentialsFile::default();
        assert!(file.asr_credentials(None).is_empty());

        let from_env = file.asr_credentials(Some("env-key".to_string()));
        assert_eq!(from_env, vec![Credential::new("env-key")]);

        file.add_asr_key("file-key");
        let from_file = file.asr_credentials(Some("env-key".to_string()));
        assert_eq!(from_file, vec![Credential::new("file-key")]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("credentials.json");
        fs::write(&path, "{ not json").unwrap();

        let store = CredentialStore::new(&path);
        assert!(matches!(store.load(), Err(CredentialError::Invalid { .. })));
        assert!(store.update(|_| {}).is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut file = CredentialsFile::default();
        file.platform.sessdata = "top-secret".to_string();
        file.add_asr_key("gsk_secret");
        assert!(!format!("{:?}", file).contains("secret"));
    }
}

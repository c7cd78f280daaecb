//! Atomic JSON checkpoints shared by every stage.
//!
//! A checkpoint is written to a hidden sibling temp file, synced, and then
//! renamed over the target. Readers see either the previous complete file
//! or the new complete file, never a torn write.

use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur reading or writing a checkpoint
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint is corrupt, refusing to reset it: {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CheckpointError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable snapshot of a single serializable state value
#[derive(Debug, Clone)]
pub struct CheckpointStore<T> {
    path: PathBuf,
    _state: PhantomData<fn() -> T>,
}

impl<T> CheckpointStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _state: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the last saved state.
    ///
    /// `Ok(None)` means nothing was ever saved. A file that exists but does
    /// not parse is an error.
    pub fn load(&self) -> Result<Option<T>, CheckpointError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(&self.path, e)),
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Load the last saved state, or the default when nothing was saved
    pub fn load_or_default(&self) -> Result<T, CheckpointError>
    where
        T: Default,
    {
        Ok(self.load()?.unwrap_or_default())
    }

    /// Atomically replace the saved state
    pub fn save(&self, state: &T) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &json)
    }

    /// Remove the saved state (no-op if absent)
    pub fn clear(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(&self.path, e)),
        }
    }
}

/// Write `bytes` to `path` atomically (temp file, fsync, rename)
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    write_atomic_inner(path, bytes, None)
}

/// Like [`write_atomic`], but the result is readable by the owner only
pub fn write_atomic_private(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    write_atomic_inner(path, bytes, Some(0o600))
}

fn write_atomic_inner(path: &Path, bytes: &[u8], mode: Option<u32>) -> Result<(), CheckpointError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| CheckpointError::io(parent, e))?;

    let tmp_path = tmp.path().to_path_buf();
    let tmp_err = |e: io::Error| CheckpointError::io(&tmp_path, e);

    tmp.write_all(bytes).map_err(tmp_err)?;
    tmp.flush().map_err(tmp_err)?;
    tmp.as_file().sync_all().map_err(tmp_err)?;

    if let Some(mode) = mode {
        set_mode(tmp.as_file(), mode).map_err(tmp_err)?;
    }

    // On failure the temp file is dropped and deleted; the target is untouched
    tmp.persist(path)
        .map_err(|e| CheckpointError::io(path, e.error))?;

    sync_dir(parent).map_err(|e| CheckpointError::io(parent, e))
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

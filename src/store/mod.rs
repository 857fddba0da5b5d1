//! Content-addressed artifact store.
//!
//! Each installed artifact is an immutable directory under
//! `<store>/<build-fingerprint>/`, admitted by a single atomic rename and
//! never modified afterwards. Because keys are content-addressed, a rename
//! losing the race to a concurrent insert of the same key is a success.

pub mod db;
pub mod generations;
pub mod lock;
pub mod state;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the per-artifact manifest.
pub const MANIFEST_FILE: &str = "manifest";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("artifact {0} not present in store")]
    Missing(String),

    #[error("manifest for {key} unreadable: {reason}")]
    Manifest { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// What an installed artifact records about itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub name: String,
    pub version: Option<String>,
    /// Store keys of the direct dependencies this build linked against.
    pub dependencies: Vec<String>,
    /// The ref the source was fetched at, when it came from a remote repo.
    pub fetched_ref: Option<String>,
    pub tree_fingerprint: String,
    pub built_at: DateTime<Utc>,
}

pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.artifact_dir(key).is_dir()
    }

    /// Admit a staged prefix under `key` by atomic rename. An existing
    /// destination means an identical build already won; the staging copy
    /// is discarded and the insert reports success.
    pub fn insert(&self, staging: &Path, key: &str) -> Result<PathBuf, StoreError> {
        let dest = self.artifact_dir(key);
        if dest.exists() {
            fs::remove_dir_all(staging).ok();
            return Ok(dest);
        }

        fs::create_dir_all(&self.root)?;
        match fs::rename(staging, &dest) {
            Ok(()) => Ok(dest),
            Err(e) if dest.exists() => {
                // Lost the race; same content either way.
                tracing::debug!(key, error = %e, "store insert raced, discarding staging");
                fs::remove_dir_all(staging).ok();
                Ok(dest)
            }
            Err(_) => {
                // Cross-device staging; fall back to a copy.
                copy_dir_all(staging, &dest)?;
                fs::remove_dir_all(staging).ok();
                Ok(dest)
            }
        }
    }

    pub fn artifact_manifest(&self, key: &str) -> Result<ArtifactManifest, StoreError> {
        let path = self.artifact_dir(key).join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(StoreError::Missing(key.to_string()));
        }
        let bytes = fs::read(&path)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Manifest {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// All store keys, sorted, for compaction and status reporting.
    pub fn enumerate(&self) -> Result<Vec<String>, StoreError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                keys.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Executable files under the artifact's `bin/`.
    pub fn executables(&self, key: &str) -> Result<Vec<PathBuf>, StoreError> {
        let bin_dir = self.artifact_dir(key).join("bin");
        if !bin_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(&bin_dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if meta.permissions().mode() & 0o111 == 0 {
                    continue;
                }
            }
            found.push(entry.path());
        }
        found.sort();
        Ok(found)
    }
}

pub(crate) fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    fs_extra::dir::copy(
        src,
        dst,
        &fs_extra::dir::CopyOptions::new().content_only(true).overwrite(true),
    )
    .map_err(io::Error::other)?;
    Ok(())
}

//! Root directory resolution and on-disk layout.
//!
//! Everything pygr touches lives under a single root: the store, profile
//! generations, recipe repo clones, the declarative state file, backups, and
//! the metadata database. The root defaults to `~/.pygr` and can be
//! overridden by `-c DIR` or `PYGR_ROOT`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("could not determine home directory")]
    NoHome,

    #[error("root {0} exists but is not writable")]
    NotWritable(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The on-disk layout rooted at a single directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Resolve the root: explicit override, then `PYGR_ROOT`, then `~/.pygr`.
    pub fn resolve(override_dir: Option<&Path>) -> Result<Self, LayoutError> {
        let root = match override_dir {
            Some(dir) => dir.to_path_buf(),
            None => match std::env::var_os(crate::ROOT_ENV) {
                Some(dir) => PathBuf::from(dir),
                None => dirs::home_dir().ok_or(LayoutError::NoHome)?.join(".pygr"),
            },
        };
        Self::at(root)
    }

    /// Use an explicit root, creating the directory tree on first use.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self, LayoutError> {
        let layout = Self { root: root.into() };
        layout.ensure_dirs()?;
        Ok(layout)
    }

    fn ensure_dirs(&self) -> Result<(), LayoutError> {
        for dir in [
            self.root.clone(),
            self.store_dir(),
            self.profiles_dir(),
            self.repos_dir(),
            self.config_dir(),
            self.backups_dir(),
            self.logs_dir(),
            // tmp shares the store's volume so staging renames stay atomic
            self.tmp_dir(),
        ] {
            create_private_dir(&dir)?;
        }

        let probe = self.root.join(".write-probe");
        match fs::write(&probe, b"") {
            Ok(()) => {
                let _ = fs::remove_file(&probe);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                Err(LayoutError::NotWritable(self.root.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content-addressed store of installed artifacts.
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Profile generations plus the `current`/`previous` symlinks.
    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    /// Recipe repo clones and cached source checkouts.
    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    /// Cached source clones, keyed by a digest of the remote URL.
    pub fn sources_dir(&self) -> PathBuf {
        self.repos_dir().join("src")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    /// The declarative state file.
    pub fn state_file(&self) -> PathBuf {
        self.config_dir().join("packages.conf")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Key-value metadata database (repo cache bookkeeping).
    pub fn db_path(&self) -> PathBuf {
        self.root.join("meta.db")
    }

    /// Lock file guarding generation allocation and state rewrites.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// Build log path for a package, timestamped so reruns never clobber.
    pub fn build_log_path(&self, package: &str, version: &str) -> PathBuf {
        let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        self.logs_dir()
            .join(format!("build-{package}-{version}-{timestamp}.log"))
    }
}

fn create_private_dir(dir: &Path) -> Result<(), LayoutError> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

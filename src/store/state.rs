//! Declarative state file.
//!
//! `config/packages.conf` lists exactly the packages whose presence was a
//! user mutation, one entry per line:
//!
//! ```text
//! # comment
//! system:apt:curl
//! remote-repo:BurntSushi/ripgrep@v13.0.0
//! recipe:zlib@1.2.13
//! ```
//!
//! Transitive dependencies are implicit; they are recoverable from the
//! current generation's manifest and never written here.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::core::version::Version;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("invalid state entry at line {line}: {content:?}")]
    Parse { line: usize, content: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One declarative entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    System {
        pm: String,
        name: String,
    },
    RemoteRepo {
        owner: String,
        repo: String,
        git_ref: Option<String>,
    },
    Recipe {
        name: String,
        version: Version,
    },
}

impl Entry {
    /// The identity duplicates are judged by: a later line for the same
    /// package replaces an earlier one regardless of version or ref.
    pub fn key(&self) -> String {
        match self {
            Entry::System { pm, name } => format!("system:{pm}:{name}"),
            Entry::RemoteRepo { owner, repo, .. } => format!("remote-repo:{owner}/{repo}"),
            Entry::Recipe { name, .. } => format!("recipe:{name}"),
        }
    }

    /// The short package name this entry advertises.
    pub fn package_name(&self) -> &str {
        match self {
            Entry::System { name, .. } => name,
            Entry::RemoteRepo { repo, .. } => repo,
            Entry::Recipe { name, .. } => name,
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::System { pm, name } => write!(f, "system:{pm}:{name}"),
            Entry::RemoteRepo {
                owner,
                repo,
                git_ref,
            } => match git_ref {
                Some(r) => write!(f, "remote-repo:{owner}/{repo}@{r}"),
                None => write!(f, "remote-repo:{owner}/{repo}"),
            },
            Entry::Recipe { name, version } => write!(f, "recipe:{name}@{version}"),
        }
    }
}

impl FromStr for Entry {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(rest) = s.strip_prefix("system:") {
            let (pm, name) = rest.split_once(':').ok_or(())?;
            let (pm, name) = (pm.trim(), name.trim());
            if pm.is_empty() || name.is_empty() {
                return Err(());
            }
            return Ok(Entry::System {
                pm: pm.into(),
                name: name.into(),
            });
        }

        if let Some(rest) = s.strip_prefix("remote-repo:") {
            let (locator, git_ref) = match rest.split_once('@') {
                Some((l, r)) => (l.trim(), Some(r.trim().to_string())),
                None => (rest.trim(), None),
            };
            let (owner, repo) = locator.split_once('/').ok_or(())?;
            let (owner, repo) = (owner.trim(), repo.trim());
            if owner.is_empty() || repo.is_empty() || git_ref.as_deref() == Some("") {
                return Err(());
            }
            return Ok(Entry::RemoteRepo {
                owner: owner.into(),
                repo: repo.into(),
                git_ref,
            });
        }

        if let Some(rest) = s.strip_prefix("recipe:") {
            let (name, version) = rest.split_once('@').ok_or(())?;
            let version = Version::parse(version.trim()).map_err(|_| ())?;
            let name = name.trim();
            if name.is_empty() {
                return Err(());
            }
            return Ok(Entry::Recipe {
                name: name.into(),
                version,
            });
        }

        Err(())
    }
}

/// Parse a whole state document. Duplicate keys keep the last occurrence at
/// the first occurrence's position, with a warning per shadowed line.
pub fn parse(content: &str) -> Result<Vec<Entry>, StateError> {
    let mut entries: Vec<Entry> = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let entry: Entry = line.parse().map_err(|()| StateError::Parse {
            line: idx + 1,
            content: raw.to_string(),
        })?;

        match entries.iter().position(|e| e.key() == entry.key()) {
            Some(pos) => {
                tracing::warn!(
                    line = idx + 1,
                    key = entry.key(),
                    "duplicate state entry, keeping the later one"
                );
                entries[pos] = entry;
            }
            None => entries.push(entry),
        }
    }

    Ok(entries)
}

pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Vec<Entry>, StateError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => parse(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic rewrite: temp file in the same directory, fsync, rename.
    pub fn write(&self, entries: &[Entry]) -> Result<(), StateError> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        for entry in entries {
            writeln!(tmp, "{entry}")?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

//! Recipe schema and validation.
//!
//! A recipe is a YAML mapping pinning a package's source and commands:
//!
//! ```yaml
//! name: zlib
//! version: 1.2.13
//! source:
//!   kind: remote-repo
//!   repo: madler/zlib
//!   ref: v1.2.13
//! build:
//!   - ./configure --prefix={{prefix}}
//!   - make
//! install:
//!   - make install
//! dependencies:
//!   - name: libfoo
//!     constraint: ">=1.2"
//! ```
//!
//! `{{prefix}}` is the only expansion token. Unknown fields are ignored.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::core::constraint::Constraint;
use crate::core::version::Version;

/// The only placeholder recipe commands may reference.
pub const PREFIX_PLACEHOLDER: &str = "{{prefix}}";

#[derive(Error, Debug)]
pub enum RecipeError {
    #[error("malformed recipe {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub version: Version,
    pub source: Source,
    #[serde(default)]
    pub build: Vec<String>,
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Source {
    pub kind: SourceKind,
    pub repo: String,
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    RemoteRepo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub constraint: Constraint,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.constraint)
    }
}

impl Recipe {
    /// Load and validate a recipe file.
    pub fn load(path: &Path) -> Result<Self, RecipeError> {
        let bytes = std::fs::read(path).map_err(|source| RecipeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_slice(&bytes, path)
    }

    pub fn from_slice(bytes: &[u8], path: &Path) -> Result<Self, RecipeError> {
        let recipe: Recipe =
            serde_yaml::from_slice(bytes).map_err(|e| RecipeError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        recipe.validate(path)?;
        Ok(recipe)
    }

    fn validate(&self, path: &Path) -> Result<(), RecipeError> {
        if self.name.is_empty() {
            return Err(RecipeError::Malformed {
                path: path.to_path_buf(),
                reason: "empty name".into(),
            });
        }
        if self.source.repo.is_empty() {
            return Err(RecipeError::Malformed {
                path: path.to_path_buf(),
                reason: "empty source.repo".into(),
            });
        }
        for command in self.build.iter().chain(&self.install) {
            if let Some(token) = foreign_placeholder(command) {
                return Err(RecipeError::Malformed {
                    path: path.to_path_buf(),
                    reason: format!("unknown template token {token:?} (only {PREFIX_PLACEHOLDER})"),
                });
            }
        }
        Ok(())
    }

    /// The remote URL of the source, expanding `owner/repo` shorthand.
    pub fn source_url(&self) -> String {
        expand_repo_shorthand(&self.source.repo)
    }

    /// Deterministic text form of this recipe; feeds the build fingerprint.
    /// Stable across reformatting of the underlying YAML.
    pub fn canonical_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("name {}\n", self.name));
        out.push_str(&format!("version {}\n", self.version));
        out.push_str(&format!("source remote-repo {}", self.source.repo));
        if let Some(git_ref) = &self.source.git_ref {
            out.push_str(&format!(" @{git_ref}"));
        }
        out.push('\n');
        for command in &self.build {
            out.push_str(&format!("build {command}\n"));
        }
        for command in &self.install {
            out.push_str(&format!("install {command}\n"));
        }
        let mut deps: Vec<String> = self.dependencies.iter().map(|d| d.to_string()).collect();
        deps.sort();
        for dep in deps {
            out.push_str(&format!("dep {dep}\n"));
        }
        out
    }
}

/// Find a `{{...}}` token that is not the prefix placeholder.
fn foreign_placeholder(command: &str) -> Option<String> {
    let mut rest = command;
    while let Some(start) = rest.find("{{") {
        let tail = &rest[start..];
        match tail.find("}}") {
            Some(end) => {
                let token = &tail[..end + 2];
                if token != PREFIX_PLACEHOLDER {
                    return Some(token.to_string());
                }
                rest = &tail[end + 2..];
            }
            None => return Some(tail.to_string()),
        }
    }
    None
}

/// `owner/repo` expands to a GitHub URL; anything with a scheme passes through.
pub fn expand_repo_shorthand(repo: &str) -> String {
    if repo.contains("://") || repo.starts_with("git@") {
        repo.to_string()
    } else {
        format!("https://github.com/{repo}")
    }
}

//! Recipe catalog.
//!
//! Added recipe repos are git clones under `repos/<name>`; lookups scan
//! every clone for a matching recipe and pick the newest version satisfying
//! the constraint. Repo registration order is stable and drives scan order.

use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::core::constraint::Constraint;
use crate::core::recipe::{Recipe, RecipeError};
use crate::io::fetch::{FetchError, Fetcher};
use crate::store::db::{DbError, MetaDb, RepoEntry};

/// Reserved for cached source clones; not a valid repo name.
const SOURCES_SUBDIR: &str = "src";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("invalid repo name {0:?}")]
    InvalidName(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A recipe found in a catalog scan, with its provenance.
#[derive(Debug)]
pub struct Found {
    pub recipe: Recipe,
    pub repo: String,
    pub path: PathBuf,
}

pub struct Catalog<'a> {
    repos_dir: PathBuf,
    db: &'a MetaDb,
    fetcher: &'a Fetcher,
}

impl<'a> Catalog<'a> {
    pub fn new(repos_dir: PathBuf, db: &'a MetaDb, fetcher: &'a Fetcher) -> Self {
        Self {
            repos_dir,
            db,
            fetcher,
        }
    }

    fn repo_clone_dir(&self, name: &str) -> PathBuf {
        self.repos_dir.join(name)
    }

    /// Register and clone a recipe repo. Clean-or-nothing: the row lands
    /// only after the clone is in place, so a failed clone never burns the
    /// name.
    pub fn add_repo(&self, name: &str, url: &str) -> Result<(), CatalogError> {
        if name.is_empty()
            || name == SOURCES_SUBDIR
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CatalogError::InvalidName(name.to_string()));
        }

        if self.db.get_repo(name)?.is_some() {
            return Err(DbError::RepoExists(name.to_string()).into());
        }

        let clone_dir = self.repo_clone_dir(name);
        if let Err(e) = self.fetcher.clone_or_update_at(url, &clone_dir) {
            std::fs::remove_dir_all(&clone_dir).ok();
            return Err(e.into());
        }

        // A raced duplicate insert keeps the existing registration; the
        // clone dir is shared by name either way.
        self.db.add_repo(name, url, &clone_dir)?;
        self.db
            .touch_refresh(name, chrono::Utc::now().timestamp())?;
        Ok(())
    }

    /// Registered repos, insertion order.
    pub fn list_repos(&self) -> Result<Vec<RepoEntry>, CatalogError> {
        Ok(self.db.list_repos()?)
    }

    /// Refresh every repo clone. Explicit; plans never fetch implicitly.
    pub fn refresh(&self) -> Result<(), CatalogError> {
        for repo in self.db.list_repos()? {
            self.fetcher.clone_or_update_at(&repo.url, &repo.path)?;
            self.db
                .touch_refresh(&repo.name, chrono::Utc::now().timestamp())?;
        }
        Ok(())
    }

    /// Newest recipe for `name` satisfying `constraint`. Version ties break
    /// to the lexicographically first repo name.
    pub fn find(&self, name: &str, constraint: &Constraint) -> Result<Option<Found>, CatalogError> {
        let mut best: Option<Found> = None;
        for candidate in self.candidates(name)? {
            if !constraint.matches(&candidate.recipe.version) {
                continue;
            }
            let better = match &best {
                None => true,
                Some(cur) => {
                    candidate.recipe.version > cur.recipe.version
                        || (candidate.recipe.version == cur.recipe.version
                            && candidate.repo < cur.repo)
                }
            };
            if better {
                best = Some(candidate);
            }
        }
        Ok(best)
    }

    /// Every version of `name` across all repos, newest first. One entry
    /// per version; the preferred repo wins duplicates.
    pub fn candidates(&self, name: &str) -> Result<Vec<Found>, CatalogError> {
        let mut found: Vec<Found> = Vec::new();

        for repo in self.db.list_repos()? {
            for path in yaml_files(&repo.path) {
                let fast_match = path
                    .file_stem()
                    .is_some_and(|stem| stem.to_string_lossy() == name);

                let recipe = match Recipe::load(&path) {
                    Ok(recipe) => recipe,
                    Err(e @ RecipeError::Malformed { .. }) if fast_match => return Err(e.into()),
                    // Unrelated files in a catalog repo are not our problem.
                    Err(_) => continue,
                };
                if recipe.name != name {
                    continue;
                }

                match found
                    .iter_mut()
                    .find(|f| f.recipe.version == recipe.version)
                {
                    Some(existing) => {
                        if repo.name < existing.repo {
                            *existing = Found {
                                recipe,
                                repo: repo.name.clone(),
                                path,
                            };
                        }
                    }
                    None => found.push(Found {
                        recipe,
                        repo: repo.name.clone(),
                        path,
                    }),
                }
            }
        }

        found.sort_by(|a, b| b.recipe.version.cmp(&a.recipe.version));
        Ok(found)
    }
}

fn yaml_files(repo_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(repo_dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

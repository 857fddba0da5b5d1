//! Source fetching.
//!
//! Materializes a source tree from a remote git repository at a named ref
//! and computes its tree fingerprint. Clones are cached per URL and updated
//! incrementally; transport failures retry with exponential backoff.

use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::build::CheckoutBuilder;
use git2::{AutotagOption, FetchOptions, Oid, Repository};
use thiserror::Error;

use crate::core::fingerprint;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(8);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("fetch failed for {url}: {source}")]
    FetchFailed { url: String, source: git2::Error },

    #[error("ref {git_ref:?} not found in {url}")]
    RefNotFound { url: String, git_ref: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

/// A materialized checkout.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Local path of the checked-out tree.
    pub path: PathBuf,
    /// Commit id the ref resolved to.
    pub commit: String,
    /// Canonical fingerprint of the checked-out tree.
    pub tree_fingerprint: String,
}

#[derive(Clone)]
pub struct Fetcher {
    sources_dir: PathBuf,
}

impl Fetcher {
    pub fn new(sources_dir: PathBuf) -> Self {
        Self { sources_dir }
    }

    /// Clone or update `url`, check out `git_ref` (tag, branch, or 40-hex
    /// commit; `None` means the remote default branch), and fingerprint the
    /// resulting tree.
    pub fn fetch(&self, url: &str, git_ref: Option<&str>) -> Result<Fetched, FetchError> {
        let clone_dir = self.clone_dir(url);

        let repo = if clone_dir.join(".git").exists() {
            let repo = Repository::open(&clone_dir)?;
            with_retry(url, || {
                let mut remote = repo.find_remote("origin")?;
                let mut opts = FetchOptions::new();
                opts.download_tags(AutotagOption::All);
                remote.fetch(
                    &[
                        "+refs/heads/*:refs/remotes/origin/*",
                        "+refs/tags/*:refs/tags/*",
                    ],
                    Some(&mut opts),
                    None,
                )
            })?;
            repo
        } else {
            std::fs::create_dir_all(&self.sources_dir)?;
            with_retry(url, || Repository::clone(url, &clone_dir))?
        };

        let commit_id = self.resolve_ref(&repo, url, git_ref)?;

        repo.set_head_detached(commit_id)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.checkout_head(Some(&mut checkout))?;
        drop(repo);

        let tree_fingerprint = fingerprint::tree_fingerprint(&clone_dir)?;

        Ok(Fetched {
            path: clone_dir,
            commit: commit_id.to_string(),
            tree_fingerprint,
        })
    }

    /// Tags shadow branches of the same name; a 40-hex string is tried as a
    /// commit id last.
    fn resolve_ref(
        &self,
        repo: &Repository,
        url: &str,
        git_ref: Option<&str>,
    ) -> Result<Oid, FetchError> {
        let candidates: Vec<String> = match git_ref {
            Some(r) => vec![
                format!("refs/tags/{r}"),
                format!("refs/remotes/origin/{r}"),
            ],
            None => vec![
                "refs/remotes/origin/HEAD".into(),
                "refs/remotes/origin/main".into(),
                "refs/remotes/origin/master".into(),
            ],
        };

        for name in &candidates {
            if let Ok(reference) = repo.find_reference(name) {
                let commit = reference.peel_to_commit()?;
                return Ok(commit.id());
            }
        }

        // Default branches named neither main nor master: the clone's own
        // HEAD already points at them.
        if git_ref.is_none() {
            if let Ok(head) = repo.head() {
                return Ok(head.peel_to_commit()?.id());
            }
        }

        if let Some(r) = git_ref {
            if r.len() == 40 && r.chars().all(|c| c.is_ascii_hexdigit()) {
                if let Ok(oid) = Oid::from_str(r) {
                    if repo.find_commit(oid).is_ok() {
                        return Ok(oid);
                    }
                }
            }
        }

        Err(FetchError::RefNotFound {
            url: url.to_string(),
            git_ref: git_ref.unwrap_or("HEAD").to_string(),
        })
    }

    /// Clone or refresh a repo at an explicit path, leaving it on the
    /// remote default branch. Used for recipe catalog clones, which live
    /// under their registered name rather than a URL digest.
    pub fn clone_or_update_at(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        if dest.join(".git").exists() {
            let repo = Repository::open(dest)?;
            with_retry(url, || {
                let mut remote = repo.find_remote("origin")?;
                let mut opts = FetchOptions::new();
                opts.download_tags(AutotagOption::All);
                remote.fetch(
                    &["+refs/heads/*:refs/remotes/origin/*"],
                    Some(&mut opts),
                    None,
                )
            })?;
            let head = self.resolve_ref(&repo, url, None)?;
            repo.set_head_detached(head)?;
            let mut checkout = CheckoutBuilder::new();
            checkout.force();
            repo.checkout_head(Some(&mut checkout))?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            with_retry(url, || Repository::clone(url, dest))?;
        }
        Ok(())
    }

    /// Cached clone path: `<stem>-<url-digest>` so distinct remotes with the
    /// same repo name never collide.
    pub fn clone_dir(&self, url: &str) -> PathBuf {
        let digest = blake3::hash(url.as_bytes()).to_hex();
        let stem = url
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .rsplit('/')
            .next()
            .unwrap_or("repo");
        self.sources_dir.join(format!("{stem}-{}", &digest[..12]))
    }
}

/// Retry a git transport operation with exponential backoff. Non-transport
/// errors (bad refs, local state) fail immediately.
fn with_retry<T>(url: &str, mut op: impl FnMut() -> Result<T, git2::Error>) -> Result<T, FetchError> {
    let mut delay = RETRY_BASE;
    let mut last = None;

    for attempt in 0..RETRY_ATTEMPTS {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) => {
                tracing::warn!(url, attempt, error = %e, "transport error, retrying");
                last = Some(e);
                if attempt + 1 < RETRY_ATTEMPTS {
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(RETRY_CAP);
                }
            }
            Err(e) => {
                return Err(FetchError::FetchFailed {
                    url: url.to_string(),
                    source: e,
                })
            }
        }
    }

    Err(FetchError::FetchFailed {
        url: url.to_string(),
        source: last.expect("at least one attempt"),
    })
}

fn is_transient(e: &git2::Error) -> bool {
    matches!(
        e.class(),
        git2::ErrorClass::Net | git2::ErrorClass::Http | git2::ErrorClass::Ssh
    )
}

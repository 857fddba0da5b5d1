//! High-level operations behind the CLI: each function performs one
//! transaction against the store and profile.

pub mod context;
pub mod error;
pub mod install;
pub mod remove;
pub mod sync;
pub mod transfer;
pub mod upgrade;

pub use context::OpContext;
pub use error::OpError;

use crate::core::constraint::Constraint;

/// A parsed install argument: `NAME[CONSTRAINT]` or `OWNER/REPO[@REF]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Spec {
    Named {
        name: String,
        constraint: Constraint,
    },
    Remote {
        owner: String,
        repo: String,
        git_ref: Option<String>,
    },
}

impl Spec {
    pub fn parse(raw: &str) -> Result<Self, OpError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(OpError::BadSpec(raw.to_string()));
        }

        if raw.contains('/') {
            let (locator, git_ref) = match raw.split_once('@') {
                Some((l, r)) if !r.is_empty() => (l, Some(r.to_string())),
                Some(_) => return Err(OpError::BadSpec(raw.to_string())),
                None => (raw, None),
            };
            let (owner, repo) = locator
                .split_once('/')
                .ok_or_else(|| OpError::BadSpec(raw.to_string()))?;
            if owner.is_empty() || repo.is_empty() || repo.contains('/') {
                return Err(OpError::BadSpec(raw.to_string()));
            }
            return Ok(Spec::Remote {
                owner: owner.to_string(),
                repo: repo.to_string(),
                git_ref,
            });
        }

        // NAME[CONSTRAINT]: the constraint starts at the first operator.
        let split = raw.find(|c| matches!(c, '<' | '>' | '=' | '!' | '~' | '^'));
        let (name, constraint) = match split {
            Some(idx) if idx > 0 => (
                &raw[..idx],
                Constraint::parse(&raw[idx..]).map_err(|_| OpError::BadSpec(raw.to_string()))?,
            ),
            Some(_) => return Err(OpError::BadSpec(raw.to_string())),
            None => (raw, Constraint::any()),
        };

        Ok(Spec::Named {
            name: name.to_string(),
            constraint,
        })
    }

    pub fn display_name(&self) -> String {
        match self {
            Spec::Named { name, .. } => name.clone(),
            Spec::Remote { owner, repo, .. } => format!("{owner}/{repo}"),
        }
    }
}

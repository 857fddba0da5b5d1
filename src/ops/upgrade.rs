//! Upgrade.
//!
//! Recipe entries re-resolve against the refreshed catalog and move to the
//! newest satisfying version. Remote-repo entries refetch their ref: a
//! moving branch can yield a new tree fingerprint and thus a rebuild, while
//! tags and pinned commits land on the existing store key and fall out as
//! no-ops. System entries belong to the host package manager and are left
//! alone.

use crate::core::constraint::Constraint;
use crate::core::resolver::Request;
use crate::ops::install::{run_pipeline, InstallReport, Routed};
use crate::ops::{OpContext, OpError};
use crate::store::state::Entry;

pub async fn upgrade(ctx: &OpContext, names: &[String]) -> Result<InstallReport, OpError> {
    let entries = ctx.state.read()?;

    let selected: Vec<&Entry> = if names.is_empty() {
        entries.iter().collect()
    } else {
        let mut picked = Vec::new();
        for name in names {
            let found: Vec<&Entry> = entries
                .iter()
                .filter(|e| e.package_name() == name.as_str())
                .collect();
            if found.is_empty() {
                return Err(OpError::NotInstalled(name.clone()));
            }
            picked.extend(found);
        }
        picked
    };

    // Catalog refresh is the explicit pre-plan step; plans never fetch
    // recipe repos implicitly.
    ctx.catalog().refresh()?;

    let mut routed = Routed::default();
    for entry in selected {
        match entry {
            Entry::System { .. } => {}
            Entry::Recipe { name, .. } => routed.requests.push(Request {
                name: name.clone(),
                constraint: Constraint::any(),
            }),
            Entry::RemoteRepo {
                owner,
                repo,
                git_ref,
            } => routed
                .remotes
                .push((owner.clone(), repo.clone(), git_ref.clone())),
        }
    }

    run_pipeline(ctx, routed).await
}

//! State reconciliation: `sync`, `apply`, and `rollback`.

use crate::core::constraint::Constraint;
use crate::core::resolver::Request;
use crate::ops::install::{run_pipeline, InstallReport, Routed};
use crate::ops::{OpContext, OpError};
use crate::registry::system::{SystemPm, SystemPmError};
use crate::store::state::{self, Entry};

/// Rewrite the state file from the current generation's snapshot,
/// preserving `system:` entries the snapshot does not carry (they live
/// outside the store by definition).
pub fn sync_from_current(ctx: &OpContext) -> Result<Vec<Entry>, OpError> {
    let snapshot = ctx
        .profiles
        .current()
        .and_then(|n| ctx.profiles.manifest(n).ok())
        .map(|m| m.state)
        .unwrap_or_default();

    let mut entries = state::parse(&snapshot.join("\n"))?;

    for existing in ctx.state.read()? {
        if matches!(existing, Entry::System { .. })
            && !entries.iter().any(|e| e.key() == existing.key())
        {
            entries.push(existing);
        }
    }

    let _lock = ctx.lock()?;
    ctx.state.write(&entries)?;
    Ok(entries)
}

/// Install every declarative entry, file order preserved. Idempotent:
/// already-satisfied entries stop at the store fast path.
pub async fn apply(ctx: &OpContext) -> Result<InstallReport, OpError> {
    let entries = ctx.state.read()?;
    let mut routed = Routed::default();

    for entry in &entries {
        match entry {
            Entry::System { pm, name } => {
                let pm = SystemPm::from_name(pm)
                    .filter(|pm| which::which(pm.name()).is_ok())
                    .ok_or(SystemPmError::NoManager)?;
                routed.system.push((pm, name.clone()));
            }
            Entry::Recipe { name, version } => routed.requests.push(Request {
                name: name.clone(),
                constraint: Constraint::exact(version.clone()),
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

/// Swap `current` and `previous`, then restore the state file to the
/// reinstated generation's snapshot so `list` matches what is on the path.
pub fn rollback(ctx: &OpContext) -> Result<u64, OpError> {
    let _lock = ctx.lock()?;
    let restored = ctx.profiles.rollback()?;

    let snapshot = ctx.profiles.manifest(restored)?.state;
    let entries = state::parse(&snapshot.join("\n"))?;
    ctx.state.write(&entries)?;

    Ok(restored)
}

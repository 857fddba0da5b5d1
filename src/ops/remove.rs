//! Uninstall.
//!
//! Drops declarative entries and republishes the profile without them.
//! Store artifacts are left in place (content-addressed and unreferenced
//! artifacts are compaction's business); only the generation composition
//! and the state file change.

use std::collections::HashMap;

use crate::ops::{OpContext, OpError};
use crate::store::state::Entry;
use crate::store::{ArtifactManifest, Store};

#[derive(Debug)]
pub struct RemoveReport {
    pub removed: Vec<String>,
    pub generation: u64,
}

pub fn uninstall(ctx: &OpContext, names: &[String]) -> Result<RemoveReport, OpError> {
    let mut entries = ctx.state.read()?;
    let mut removed = Vec::new();

    for name in names {
        let matched: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| entry_matches(e, name))
            .map(|(i, _)| i)
            .collect();
        if matched.is_empty() {
            return Err(OpError::NotInstalled(name.clone()));
        }
        for index in matched.into_iter().rev() {
            removed.push(entries.remove(index).to_string());
        }
    }

    let artifacts = artifacts_for_entries(&ctx.store, &ctx.current_artifacts(), &entries)?;
    let snapshot: Vec<String> = entries.iter().map(|e| e.to_string()).collect();

    let _lock = ctx.lock()?;
    let manifest = ctx.profiles.publish(&ctx.store, &artifacts, snapshot)?;
    ctx.state.write(&entries)?;

    Ok(RemoveReport {
        removed,
        generation: manifest.number,
    })
}

fn entry_matches(entry: &Entry, name: &str) -> bool {
    if entry.package_name() == name {
        return true;
    }
    match entry {
        Entry::RemoteRepo { owner, repo, .. } => format!("{owner}/{repo}") == name,
        _ => false,
    }
}

/// Recompute the artifact set advertising exactly `entries`: each entry's
/// artifact plus its transitive dependency closure, dependencies first.
/// When several available keys carry the entry's name the latest one wins,
/// so freshly built artifacts shadow their predecessors.
pub(crate) fn artifacts_for_entries(
    store: &Store,
    available_keys: &[String],
    entries: &[Entry],
) -> Result<Vec<String>, OpError> {
    let mut manifests: HashMap<String, ArtifactManifest> = HashMap::new();
    for key in available_keys {
        if let Ok(manifest) = store.artifact_manifest(key) {
            manifests.insert(key.clone(), manifest);
        }
    }

    let mut keep: Vec<String> = Vec::new();
    for entry in entries {
        // system entries live outside the store and advertise nothing here
        if matches!(entry, Entry::System { .. }) {
            continue;
        }
        let root_key = available_keys.iter().rev().find(|key| {
            manifests.get(*key).is_some_and(|m| {
                m.name == entry.package_name()
                    && match entry {
                        Entry::Recipe { version, .. } => {
                            m.version.as_deref() == Some(version.to_string().as_str())
                        }
                        _ => true,
                    }
            })
        });
        let Some(root_key) = root_key else {
            // artifact already compacted away
            continue;
        };

        push_closure(root_key, &manifests, &mut keep);
    }

    Ok(keep)
}

fn push_closure(key: &str, manifests: &HashMap<String, ArtifactManifest>, keep: &mut Vec<String>) {
    if keep.iter().any(|k| k == key) {
        return;
    }
    if let Some(manifest) = manifests.get(key) {
        for dep in &manifest.dependencies {
            push_closure(dep, manifests, keep);
        }
    }
    keep.push(key.to_string());
}

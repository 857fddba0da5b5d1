//! Profile generations.
//!
//! A generation is an immutable numbered directory whose `bin/` symlinks
//! into store artifacts. The `current` symlink names the active generation
//! and `previous` the one before it; both are retargeted atomically via
//! symlink-then-rename, so a reader never observes a half-switched profile.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{Store, StoreError};

pub const CURRENT_LINK: &str = "current";
pub const PREVIOUS_LINK: &str = "previous";
const SERIAL_FILE: &str = ".serial";

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("no previous generation to roll back to")]
    NoPreviousGeneration,

    #[error("generation {0} missing or unreadable")]
    Missing(u64),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// What a generation records: its composition and the declarative state at
/// publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationManifest {
    pub number: u64,
    pub created_at: DateTime<Utc>,
    /// Store keys composed into this generation.
    pub artifacts: Vec<String>,
    /// Declarative state snapshot, one grammar line per entry.
    pub state: Vec<String>,
}

pub struct Profiles {
    root: PathBuf,
}

impl Profiles {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn generation_dir(&self, number: u64) -> PathBuf {
        self.root.join(format!("gen-{number}"))
    }

    fn link_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Number the `current` symlink resolves to, if any.
    pub fn current(&self) -> Option<u64> {
        self.link_target(CURRENT_LINK)
    }

    pub fn previous(&self) -> Option<u64> {
        self.link_target(PREVIOUS_LINK)
    }

    fn link_target(&self, name: &str) -> Option<u64> {
        let target = fs::read_link(self.link_path(name)).ok()?;
        parse_gen_number(&target)
    }

    /// Absolute path of the current generation's `bin/`.
    pub fn current_bin_dir(&self) -> Option<PathBuf> {
        let number = self.current()?;
        Some(self.generation_dir(number).join("bin"))
    }

    pub fn manifest(&self, number: u64) -> Result<GenerationManifest, ProfileError> {
        let path = self.generation_dir(number).join("manifest");
        let bytes = fs::read(&path).map_err(|_| ProfileError::Missing(number))?;
        serde_json::from_slice(&bytes).map_err(|_| ProfileError::Missing(number))
    }

    /// All generation numbers on disk, ascending.
    pub fn list(&self) -> Result<Vec<u64>, ProfileError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut numbers = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(n) = parse_gen_number(&entry.path()) {
                numbers.push(n);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Allocate the next generation number. Monotonic for the lifetime of
    /// the root: a high-water mark survives garbage-collected generations.
    fn allocate_number(&self) -> Result<u64, ProfileError> {
        let scanned = self.list()?.last().copied().unwrap_or(0);
        let recorded: u64 = fs::read_to_string(self.root.join(SERIAL_FILE))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let next = scanned.max(recorded) + 1;
        fs::create_dir_all(&self.root)?;
        fs::write(self.root.join(SERIAL_FILE), next.to_string())?;
        Ok(next)
    }

    /// Build and publish the next generation from a set of artifact keys.
    ///
    /// Caller holds the root lock for the allocate -> create -> swap span.
    /// When two artifacts offer the same executable name the one listed
    /// last wins and an overlap line is recorded in the generation's log.
    pub fn publish(
        &self,
        store: &Store,
        artifact_keys: &[String],
        state_snapshot: Vec<String>,
    ) -> Result<GenerationManifest, ProfileError> {
        let number = self.allocate_number()?;
        let gen_dir = self.generation_dir(number);
        let bin_dir = gen_dir.join("bin");
        fs::create_dir_all(&bin_dir)?;

        let mut overlaps = Vec::new();
        let mut owners: std::collections::HashMap<String, String> = std::collections::HashMap::new();

        for key in artifact_keys {
            for exe in store.executables(key)? {
                let name = exe
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let link = bin_dir.join(&name);
                if let Some(loser) = owners.insert(name.clone(), key.clone()) {
                    overlaps.push(format!("overlap {name}: {loser} -> {key}"));
                    fs::remove_file(&link)?;
                }
                #[cfg(unix)]
                std::os::unix::fs::symlink(&exe, &link)?;
            }
        }

        if !overlaps.is_empty() {
            for line in &overlaps {
                tracing::warn!("{line}");
            }
            fs::write(gen_dir.join("log"), overlaps.join("\n") + "\n")?;
        }

        let manifest = GenerationManifest {
            number,
            created_at: Utc::now(),
            artifacts: artifact_keys.to_vec(),
            state: state_snapshot,
        };
        fs::write(
            gen_dir.join("manifest"),
            serde_json::to_vec_pretty(&manifest).map_err(io::Error::other)?,
        )?;

        let prior = self.current();
        self.retarget(CURRENT_LINK, number)?;
        if let Some(prior) = prior {
            self.retarget(PREVIOUS_LINK, prior)?;
        }

        Ok(manifest)
    }

    /// Swap `current` and `previous`.
    pub fn rollback(&self) -> Result<u64, ProfileError> {
        let current = self.current().ok_or(ProfileError::NoPreviousGeneration)?;
        let previous = self.previous().ok_or(ProfileError::NoPreviousGeneration)?;

        self.retarget(CURRENT_LINK, previous)?;
        self.retarget(PREVIOUS_LINK, current)?;
        Ok(previous)
    }

    /// Atomically point the named symlink at `gen-<number>`.
    fn retarget(&self, name: &str, number: u64) -> Result<(), ProfileError> {
        let tmp = self.root.join(format!(".{name}.tmp"));
        let _ = fs::remove_file(&tmp);
        #[cfg(unix)]
        std::os::unix::fs::symlink(format!("gen-{number}"), &tmp)?;
        fs::rename(&tmp, self.link_path(name))?;
        Ok(())
    }
}

fn parse_gen_number(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("gen-")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ArtifactManifest, MANIFEST_FILE};
    use tempfile::tempdir;

    fn seed_artifact(dir: &Path, store: &Store, key: &str, exe: &str) {
        let staging = dir.join(format!("stage-{key}"));
        fs::create_dir_all(staging.join("bin")).unwrap();
        let bin = staging.join("bin").join(exe);
        fs::write(&bin, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
        }
        let manifest = ArtifactManifest {
            name: exe.to_string(),
            version: None,
            dependencies: vec![],
            fetched_ref: None,
            tree_fingerprint: "t".repeat(64),
            built_at: Utc::now(),
        };
        fs::write(
            staging.join(MANIFEST_FILE),
            serde_json::to_vec(&manifest).unwrap(),
        )
        .unwrap();
        store.insert(&staging, key).unwrap();
    }

    fn setup() -> (tempfile::TempDir, Store, Profiles) {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("store"));
        let profiles = Profiles::new(dir.path().join("profiles"));
        (dir, store, profiles)
    }

    #[test]
    fn test_publish_and_current() {
        let (dir, store, profiles) = setup();
        seed_artifact(dir.path(), &store, "key1", "tool");

        let manifest = profiles
            .publish(&store, &["key1".into()], vec!["recipe:tool@1.0".into()])
            .unwrap();
        assert_eq!(manifest.number, 1);
        assert_eq!(profiles.current(), Some(1));
        assert_eq!(profiles.previous(), None);

        let link = profiles.current_bin_dir().unwrap().join("tool");
        assert!(fs::read_link(&link).unwrap().ends_with("bin/tool"));
    }

    #[test]
    fn test_numbers_increase_and_previous_tracks() {
        let (dir, store, profiles) = setup();
        seed_artifact(dir.path(), &store, "key1", "tool");

        profiles.publish(&store, &["key1".into()], vec![]).unwrap();
        profiles.publish(&store, &["key1".into()], vec![]).unwrap();

        assert_eq!(profiles.current(), Some(2));
        assert_eq!(profiles.previous(), Some(1));
    }

    #[test]
    fn test_rollback_swaps_links() {
        let (dir, store, profiles) = setup();
        seed_artifact(dir.path(), &store, "key1", "tool");

        profiles.publish(&store, &["key1".into()], vec![]).unwrap();
        profiles.publish(&store, &["key1".into()], vec![]).unwrap();

        let restored = profiles.rollback().unwrap();
        assert_eq!(restored, 1);
        assert_eq!(profiles.current(), Some(1));
        assert_eq!(profiles.previous(), Some(2));
    }

    #[test]
    fn test_rollback_without_previous() {
        let (dir, store, profiles) = setup();
        seed_artifact(dir.path(), &store, "key1", "tool");
        profiles.publish(&store, &["key1".into()], vec![]).unwrap();

        assert!(matches!(
            profiles.rollback(),
            Err(ProfileError::NoPreviousGeneration)
        ));
    }

    #[test]
    fn test_overlap_last_wins_and_logged() {
        let (dir, store, profiles) = setup();
        seed_artifact(dir.path(), &store, "key1", "tool");
        seed_artifact(dir.path(), &store, "key2", "tool");

        let manifest = profiles
            .publish(&store, &["key1".into(), "key2".into()], vec![])
            .unwrap();

        let link = profiles.current_bin_dir().unwrap().join("tool");
        let target = fs::read_link(&link).unwrap();
        assert!(target.to_string_lossy().contains("key2"), "last wins");

        let log = fs::read_to_string(profiles.generation_dir(manifest.number).join("log")).unwrap();
        assert!(log.contains("overlap tool"));
    }

    #[test]
    fn test_serial_survives_dropped_generations() {
        let (dir, store, profiles) = setup();
        seed_artifact(dir.path(), &store, "key1", "tool");

        profiles.publish(&store, &["key1".into()], vec![]).unwrap();
        profiles.publish(&store, &["key1".into()], vec![]).unwrap();

        // Drop every generation directory, keeping the serial.
        for n in profiles.list().unwrap() {
            fs::remove_dir_all(profiles.generation_dir(n)).unwrap();
        }

        let manifest = profiles.publish(&store, &["key1".into()], vec![]).unwrap();
        assert_eq!(manifest.number, 3, "numbers never reused");
    }

    #[test]
    fn test_generation_manifest_roundtrip() {
        let (dir, store, profiles) = setup();
        seed_artifact(dir.path(), &store, "key1", "tool");

        let published = profiles
            .publish(&store, &["key1".into()], vec!["system:apt:curl".into()])
            .unwrap();
        let loaded = profiles.manifest(published.number).unwrap();
        assert_eq!(loaded.artifacts, vec!["key1"]);
        assert_eq!(loaded.state, vec!["system:apt:curl"]);
    }
}

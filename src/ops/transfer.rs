//! Export, import, and backup of the declarative state.

use std::path::PathBuf;

use crate::ops::{OpContext, OpError};
use crate::store::state;

/// Render the state file in its on-disk grammar.
pub fn export(ctx: &OpContext) -> Result<String, OpError> {
    let entries = ctx.state.read()?;
    let mut out = String::from("# pygr package list\n");
    for entry in &entries {
        out.push_str(&entry.to_string());
        out.push('\n');
    }
    Ok(out)
}

/// Replace the state file with the parsed content. Installation happens on
/// a subsequent `apply`.
pub fn import(ctx: &OpContext, content: &str) -> Result<usize, OpError> {
    let entries = state::parse(content)?;
    let _lock = ctx.lock()?;
    ctx.state.write(&entries)?;
    Ok(entries.len())
}

/// Copy the state file and the current generation manifest into
/// `backups/<timestamp>[-label]/`.
pub fn backup(ctx: &OpContext, label: Option<&str>) -> Result<PathBuf, OpError> {
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let dir_name = match label {
        Some(label) => format!("{timestamp}-{label}"),
        None => timestamp.to_string(),
    };
    let dir = ctx.layout.backups_dir().join(dir_name);
    std::fs::create_dir_all(&dir)?;

    let state_path = ctx.state.path();
    if state_path.is_file() {
        std::fs::copy(state_path, dir.join("packages.conf"))?;
    }

    if let Some(number) = ctx.profiles.current() {
        let manifest = ctx.profiles.generation_dir(number).join("manifest");
        if manifest.is_file() {
            std::fs::copy(&manifest, dir.join("generation-manifest.json"))?;
        }
    }

    Ok(dir)
}

//! Build-system detection.
//!
//! Inspects the root of a source tree and emits a canonical command
//! sequence for the first build system recognized. Each variant is a pure
//! function from the tree to commands; extending the set is additive.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::core::recipe::PREFIX_PLACEHOLDER;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("no recognized build system in {0}")]
    NoBuildSystem(std::path::PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recognized build systems, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSystem {
    Cargo,
    Go,
    CMake,
    Meson,
    Make,
    NodeBin,
    Python,
    RubyBundler,
    Just,
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildSystem::Cargo => "cargo",
            BuildSystem::Go => "go",
            BuildSystem::CMake => "cmake",
            BuildSystem::Meson => "meson",
            BuildSystem::Make => "make",
            BuildSystem::NodeBin => "node-bin",
            BuildSystem::Python => "python",
            BuildSystem::RubyBundler => "ruby-bundler",
            BuildSystem::Just => "just",
        };
        write!(f, "{name}")
    }
}

/// The canonical command sequence for one source tree. Commands reference
/// the install target only through `{{prefix}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub system: BuildSystem,
    pub build: Vec<String>,
    pub install: Vec<String>,
}

impl BuildPlan {
    /// Deterministic one-blob text form; contributes to the build fingerprint.
    pub fn descriptor(&self) -> String {
        let mut out = format!("system {}\n", self.system);
        for command in &self.build {
            out.push_str(&format!("build {command}\n"));
        }
        for command in &self.install {
            out.push_str(&format!("install {command}\n"));
        }
        out
    }
}

/// Detect the build system for a source tree, first match wins.
///
/// Recipe-supplied commands take precedence over detection; callers only
/// reach this when no recipe commands exist.
pub fn detect(tree: &Path) -> Result<BuildPlan, DetectError> {
    if tree.join("Cargo.toml").is_file() {
        return Ok(cargo_plan());
    }
    if tree.join("go.mod").is_file() {
        return Ok(go_plan());
    }
    if tree.join("CMakeLists.txt").is_file() {
        return Ok(cmake_plan());
    }
    if tree.join("meson.build").is_file() {
        return Ok(meson_plan());
    }
    if has_any(tree, &["Makefile", "makefile", "GNUmakefile"]) {
        return Ok(make_plan());
    }
    if let Some(bins) = node_bin_entries(tree) {
        return Ok(node_plan(&bins));
    }
    if has_any(tree, &["pyproject.toml", "setup.py"]) {
        return Ok(python_plan());
    }
    if tree.join("Gemfile").is_file() {
        return Ok(ruby_plan());
    }
    if has_any(tree, &["Justfile", "justfile"]) {
        return Ok(just_plan());
    }

    Err(DetectError::NoBuildSystem(tree.to_path_buf()))
}

fn has_any(tree: &Path, names: &[&str]) -> bool {
    names.iter().any(|n| tree.join(n).is_file())
}

fn cargo_plan() -> BuildPlan {
    BuildPlan {
        system: BuildSystem::Cargo,
        build: vec!["cargo build --release".into()],
        install: vec![format!(
            "cargo install --path . --root {PREFIX_PLACEHOLDER} --locked --offline"
        )],
    }
}

fn go_plan() -> BuildPlan {
    BuildPlan {
        system: BuildSystem::Go,
        build: vec![],
        install: vec![format!("go build -o {PREFIX_PLACEHOLDER}/bin/ ./...")],
    }
}

fn cmake_plan() -> BuildPlan {
    BuildPlan {
        system: BuildSystem::CMake,
        build: vec![
            format!(
                "cmake -S . -B build -DCMAKE_BUILD_TYPE=Release \
                 -DCMAKE_INSTALL_PREFIX={PREFIX_PLACEHOLDER}"
            ),
            "cmake --build build".into(),
        ],
        install: vec!["cmake --install build".into()],
    }
}

fn meson_plan() -> BuildPlan {
    BuildPlan {
        system: BuildSystem::Meson,
        build: vec![
            format!("meson setup build --prefix {PREFIX_PLACEHOLDER}"),
            "ninja -C build".into(),
        ],
        install: vec!["ninja -C build install".into()],
    }
}

fn make_plan() -> BuildPlan {
    BuildPlan {
        system: BuildSystem::Make,
        build: vec!["make".into()],
        install: vec![format!("make install PREFIX={PREFIX_PLACEHOLDER}")],
    }
}

fn node_plan(bins: &[(String, String)]) -> BuildPlan {
    let mut install = vec![format!("mkdir -p {PREFIX_PLACEHOLDER}/bin")];
    for (name, file) in bins {
        install.push(format!("cp {file} {PREFIX_PLACEHOLDER}/bin/{name}"));
        install.push(format!("chmod +x {PREFIX_PLACEHOLDER}/bin/{name}"));
    }
    BuildPlan {
        system: BuildSystem::NodeBin,
        build: vec![],
        install,
    }
}

fn python_plan() -> BuildPlan {
    BuildPlan {
        system: BuildSystem::Python,
        build: vec![],
        install: vec![format!(
            "python3 -m pip install . --prefix {PREFIX_PLACEHOLDER}"
        )],
    }
}

fn ruby_plan() -> BuildPlan {
    BuildPlan {
        system: BuildSystem::RubyBundler,
        build: vec![],
        install: vec![format!(
            "bundle install --path {PREFIX_PLACEHOLDER}/vendor"
        )],
    }
}

fn just_plan() -> BuildPlan {
    BuildPlan {
        system: BuildSystem::Just,
        build: vec![],
        install: vec![format!("just install PREFIX={PREFIX_PLACEHOLDER}")],
    }
}

/// `bin` entries of a node package manifest, sorted by name. A package
/// without a `bin` field is not installable and does not match.
fn node_bin_entries(tree: &Path) -> Option<Vec<(String, String)>> {
    #[derive(Deserialize)]
    struct PackageJson {
        name: Option<String>,
        bin: Option<BinField>,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BinField {
        Single(String),
        Map(std::collections::BTreeMap<String, String>),
    }

    let bytes = std::fs::read(tree.join("package.json")).ok()?;
    let manifest: PackageJson = serde_json::from_slice(&bytes).ok()?;

    let mut entries = match manifest.bin? {
        BinField::Single(file) => {
            let name = manifest.name.unwrap_or_else(|| "main".into());
            vec![(name, file)]
        }
        BinField::Map(map) => map.into_iter().collect(),
    };
    entries.sort();
    Some(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "").unwrap();
    }

    #[test]
    fn test_cargo_detected() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Cargo.toml");
        let plan = detect(dir.path()).unwrap();
        assert_eq!(plan.system, BuildSystem::Cargo);
        assert!(plan.install[0].contains("{{prefix}}"));
    }

    #[test]
    fn test_priority_cargo_beats_make() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Makefile");
        touch(dir.path(), "Cargo.toml");
        assert_eq!(detect(dir.path()).unwrap().system, BuildSystem::Cargo);
    }

    #[test]
    fn test_make_variants() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "GNUmakefile");
        let plan = detect(dir.path()).unwrap();
        assert_eq!(plan.system, BuildSystem::Make);
        assert_eq!(plan.install, vec!["make install PREFIX={{prefix}}"]);
    }

    #[test]
    fn test_node_requires_bin_field() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"name": "x"}"#).unwrap();
        assert!(detect(dir.path()).is_err());

        fs::write(
            dir.path().join("package.json"),
            r#"{"name": "x", "bin": {"x": "./cli.js", "a": "./a.js"}}"#,
        )
        .unwrap();
        let plan = detect(dir.path()).unwrap();
        assert_eq!(plan.system, BuildSystem::NodeBin);
        // Map entries come out sorted for a stable descriptor.
        assert!(plan.install[1].contains("a.js"));
    }

    #[test]
    fn test_no_build_system() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "README.md");
        assert!(matches!(
            detect(dir.path()),
            Err(DetectError::NoBuildSystem(_))
        ));
    }

    #[test]
    fn test_descriptor_deterministic() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "meson.build");
        let a = detect(dir.path()).unwrap().descriptor();
        let b = detect(dir.path()).unwrap().descriptor();
        assert_eq!(a, b);
        assert!(a.starts_with("system meson\n"));
    }
}

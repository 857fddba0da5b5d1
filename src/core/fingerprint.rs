//! Content fingerprints.
//!
//! Two 256-bit digests drive the store addressing scheme: the tree
//! fingerprint over a canonical serialization of a source tree, and the
//! build fingerprint over everything that shapes an installed artifact.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use blake3::Hasher;
use walkdir::WalkDir;

/// Directory names excluded from tree serialization.
const VCS_DIRS: &[&str] = &[".git"];

/// Digest a source tree.
///
/// Every regular file contributes `path\0mode\0size\0content` in sorted
/// relative-path order; symlinks contribute `path\0L\0target`; directories
/// contribute nothing. Modes collapse to 755/644 on the executable bit, the
/// only bit git checkouts preserve, so the digest is stable across clones.
pub fn tree_fingerprint(root: &Path) -> io::Result<String> {
    let mut entries: Vec<(String, std::path::PathBuf)> = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?
            .to_path_buf();
        if rel.as_os_str().is_empty() {
            continue;
        }
        if rel
            .components()
            .any(|c| VCS_DIRS.contains(&c.as_os_str().to_string_lossy().as_ref()))
        {
            continue;
        }
        if entry.file_type().is_dir() {
            continue;
        }
        entries.push((rel.to_string_lossy().into_owned(), entry.path().to_path_buf()));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Hasher::new();
    let mut buffer = [0u8; 65536];

    for (rel, path) in entries {
        let meta = std::fs::symlink_metadata(&path)?;

        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&path)?;
            hasher.update(rel.as_bytes());
            hasher.update(b"\0L\0");
            hasher.update(target.to_string_lossy().as_bytes());
            continue;
        }
        if !meta.is_file() {
            continue;
        }

        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(canonical_mode(&meta).as_bytes());
        hasher.update(b"\0");
        hasher.update(meta.len().to_string().as_bytes());
        hasher.update(b"\0");

        let mut file = File::open(&path)?;
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
    }

    Ok(hasher.finalize().to_hex().to_string())
}

fn canonical_mode(meta: &std::fs::Metadata) -> &'static str {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 != 0 {
            return "755";
        }
    }
    "644"
}

/// Inputs determining the identity of an installed artifact.
#[derive(Debug, Clone)]
pub struct BuildInputs<'a> {
    /// Tree fingerprint of the source checkout.
    pub tree: &'a str,
    /// Canonical recipe text, or the detected-build descriptor.
    pub plan: &'a str,
    /// Store keys of direct dependencies; sorted internally.
    pub dependency_keys: &'a [String],
    /// The prefix template commands were expanded against.
    pub prefix_template: &'a str,
    /// Sandbox policy marker (`sandbox`, `no-sandbox`, `network-on`, ...).
    pub policy: &'a str,
}

/// Digest the build inputs into the store key for the artifact.
pub fn build_fingerprint(inputs: &BuildInputs<'_>) -> String {
    let mut hasher = Hasher::new();
    hasher.update(b"tree\0");
    hasher.update(inputs.tree.as_bytes());
    hasher.update(b"\0plan\0");
    hasher.update(inputs.plan.as_bytes());

    let mut keys: Vec<&String> = inputs.dependency_keys.iter().collect();
    keys.sort();
    for key in keys {
        hasher.update(b"\0dep\0");
        hasher.update(key.as_bytes());
    }

    hasher.update(b"\0prefix\0");
    hasher.update(inputs.prefix_template.as_bytes());
    hasher.update(b"\0policy\0");
    hasher.update(inputs.policy.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_tree(root: &Path) {
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.c"), "int main() {}\n").unwrap();
        fs::write(root.join("README"), "hello\n").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
    }

    #[test]
    fn test_stable_across_copies() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        write_tree(a.path());
        write_tree(b.path());

        assert_eq!(
            tree_fingerprint(a.path()).unwrap(),
            tree_fingerprint(b.path()).unwrap()
        );
    }

    #[test]
    fn test_vcs_metadata_excluded() {
        let a = tempdir().unwrap();
        write_tree(a.path());
        let before = tree_fingerprint(a.path()).unwrap();

        fs::write(a.path().join(".git/HEAD"), "ref: refs/heads/other\n").unwrap();
        assert_eq!(tree_fingerprint(a.path()).unwrap(), before);
    }

    #[test]
    fn test_content_changes_digest() {
        let a = tempdir().unwrap();
        write_tree(a.path());
        let before = tree_fingerprint(a.path()).unwrap();

        fs::write(a.path().join("README"), "howdy\n").unwrap();
        assert_ne!(tree_fingerprint(a.path()).unwrap(), before);
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_bit_changes_digest() {
        use std::os::unix::fs::PermissionsExt;

        let a = tempdir().unwrap();
        write_tree(a.path());
        let before = tree_fingerprint(a.path()).unwrap();

        let script = a.path().join("src/main.c");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        assert_ne!(tree_fingerprint(a.path()).unwrap(), before);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_contributes_target() {
        let a = tempdir().unwrap();
        write_tree(a.path());
        std::os::unix::fs::symlink("README", a.path().join("link")).unwrap();
        let with_link = tree_fingerprint(a.path()).unwrap();

        fs::remove_file(a.path().join("link")).unwrap();
        std::os::unix::fs::symlink("src/main.c", a.path().join("link")).unwrap();
        assert_ne!(tree_fingerprint(a.path()).unwrap(), with_link);
    }

    #[test]
    fn test_build_fingerprint_dep_order_irrelevant() {
        let deps_a = vec!["k1".to_string(), "k2".to_string()];
        let deps_b = vec!["k2".to_string(), "k1".to_string()];

        let fp = |deps: &[String]| {
            build_fingerprint(&BuildInputs {
                tree: "abc",
                plan: "system make\n",
                dependency_keys: deps,
                prefix_template: "{{prefix}}",
                policy: "sandbox",
            })
        };

        assert_eq!(fp(&deps_a), fp(&deps_b));
    }

    #[test]
    fn test_build_fingerprint_sensitive_to_policy() {
        let fp = |policy: &str| {
            build_fingerprint(&BuildInputs {
                tree: "abc",
                plan: "system make\n",
                dependency_keys: &[],
                prefix_template: "{{prefix}}",
                policy,
            })
        };
        assert_ne!(fp("sandbox"), fp("network-on"));
    }
}

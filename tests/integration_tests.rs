//! End-to-end CLI tests against a temporary root and local git origins.
//! Everything runs offline: recipe repos and sources are `file://` remotes.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// Test context with an isolated pygr root.
struct TestContext {
    temp_dir: TempDir,
    root: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let root = temp_dir.path().join("pygr-root");
        Self { temp_dir, root }
    }

    fn pygr(&self, args: &[&str]) -> Output {
        let bin_path = env!("CARGO_BIN_EXE_pygr");
        Command::new(bin_path)
            .arg("-c")
            .arg(&self.root)
            .arg("--no-sandbox")
            .args(args)
            .env("HOME", self.temp_dir.path())
            .env_remove("PYGR_ROOT")
            .env_remove("PYGR_CACHE_URL")
            .output()
            .expect("failed to run pygr")
    }

    fn pygr_ok(&self, args: &[&str]) -> String {
        let output = self.pygr(args);
        assert!(
            output.status.success(),
            "pygr {args:?} failed:\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn state_file(&self) -> PathBuf {
        self.root.join("config/packages.conf")
    }

    fn current_bin(&self) -> PathBuf {
        self.root.join("profiles/current/bin")
    }
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "t")
        .env("GIT_AUTHOR_EMAIL", "t@t")
        .env("GIT_COMMITTER_NAME", "t")
        .env("GIT_COMMITTER_EMAIL", "t@t")
        .output()
        .expect("git available");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// A buildable make project served over file://, tagged v1.0.
fn make_origin(dir: &Path, bin_name: &str) -> String {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("Makefile"),
        format!(
            "all:\n\ttrue\n\ninstall:\n\tmkdir -p $(PREFIX)/bin\n\tprintf '#!/bin/sh\\necho {bin_name}\\n' > $(PREFIX)/bin/{bin_name}\n\tchmod +x $(PREFIX)/bin/{bin_name}\n"
        ),
    )
    .unwrap();
    git(dir, &["init", "-b", "main", "."]);
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "init"]);
    git(dir, &["tag", "v1.0"]);
    format!("file://{}", dir.display())
}

/// A recipe repo (itself a git remote) with a tool depending on a lib.
fn make_recipe_repo(dir: &Path, tool_url: &str, lib_url: &str) -> String {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("pygrtesttool.yaml"),
        format!(
            "name: pygrtesttool\nversion: \"1.0\"\nsource:\n  kind: remote-repo\n  repo: {tool_url}\n  ref: v1.0\ndependencies:\n  - name: pygrtestlib\n    constraint: \">=0.5\"\n"
        ),
    )
    .unwrap();
    std::fs::write(
        dir.join("pygrtestlib.yaml"),
        format!(
            "name: pygrtestlib\nversion: \"0.9\"\nsource:\n  kind: remote-repo\n  repo: {lib_url}\n  ref: v1.0\n"
        ),
    )
    .unwrap();
    git(dir, &["init", "-b", "main", "."]);
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "recipes"]);
    format!("file://{}", dir.display())
}

#[test]
fn test_help_and_version() {
    let ctx = TestContext::new();
    let stdout = ctx.pygr_ok(&["--help"]);
    assert!(stdout.contains("Usage:"));
    ctx.pygr_ok(&["--version"]);
}

#[test]
fn test_fresh_root_list_is_empty() {
    let ctx = TestContext::new();
    let stdout = ctx.pygr_ok(&["list"]);
    assert!(stdout.trim().is_empty());
    assert!(ctx.root.join("store").is_dir());
    assert!(ctx.root.join("profiles").is_dir());
}

#[test]
fn test_path_prints_shell_assignment() {
    let ctx = TestContext::new();
    let stdout = ctx.pygr_ok(&["path"]);
    assert!(stdout.starts_with("export PATH=\""));
    assert!(stdout.contains("profiles/current/bin"));
}

#[test]
fn test_repo_add_and_list() {
    let ctx = TestContext::new();
    let tool_origin = ctx.temp_dir.path().join("tool-origin");
    let lib_origin = ctx.temp_dir.path().join("lib-origin");
    let tool_url = make_origin(&tool_origin, "pygrtesttool");
    let lib_url = make_origin(&lib_origin, "pygrtestlib");
    let recipes = ctx.temp_dir.path().join("recipes");
    let recipes_url = make_recipe_repo(&recipes, &tool_url, &lib_url);

    ctx.pygr_ok(&["repo-add", "core", &recipes_url]);
    let stdout = ctx.pygr_ok(&["repo-list"]);
    assert!(stdout.contains("core"));

    // Re-adding the same name is a user error with exit code 1.
    let output = ctx.pygr(&["repo-add", "core", &recipes_url]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_install_lifecycle_with_dependency() {
    let ctx = TestContext::new();
    let tool_url = make_origin(&ctx.temp_dir.path().join("tool-origin"), "pygrtesttool");
    let lib_url = make_origin(&ctx.temp_dir.path().join("lib-origin"), "pygrtestlib");
    let recipes_url = make_recipe_repo(
        &ctx.temp_dir.path().join("recipes"),
        &tool_url,
        &lib_url,
    );

    ctx.pygr_ok(&["repo-add", "core", &recipes_url]);
    ctx.pygr_ok(&["install", "pygrtesttool"]);

    // Both the tool and its dependency landed on the profile path.
    assert!(ctx.current_bin().join("pygrtesttool").exists());
    assert!(ctx.current_bin().join("pygrtestlib").exists());

    // Only the user-requested package is declarative state.
    let state = std::fs::read_to_string(ctx.state_file()).unwrap();
    assert!(state.contains("recipe:pygrtesttool@1.0"));
    assert!(!state.contains("pygrtestlib"));

    let listed = ctx.pygr_ok(&["list"]);
    assert_eq!(listed.trim(), "recipe:pygrtesttool@1.0");

    // Reinstall is a store no-op but still publishes a generation.
    let rerun = ctx.pygr_ok(&["install", "pygrtesttool"]);
    assert!(rerun.contains("already in store"));

    // Uninstall drops the entry and the executables.
    ctx.pygr_ok(&["uninstall", "pygrtesttool"]);
    assert!(!ctx.current_bin().join("pygrtesttool").exists());
    let listed = ctx.pygr_ok(&["list"]);
    assert!(listed.trim().is_empty());

    // Rollback returns to the generation that had the tool, and list
    // follows the restored snapshot.
    ctx.pygr_ok(&["rollback"]);
    assert!(ctx.current_bin().join("pygrtesttool").exists());
    let listed = ctx.pygr_ok(&["list"]);
    assert_eq!(listed.trim(), "recipe:pygrtesttool@1.0");
}

#[test]
fn test_rollback_without_history_is_user_error() {
    let ctx = TestContext::new();
    let output = ctx.pygr(&["rollback"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("previous"));
}

#[test]
fn test_install_unknown_package_fails() {
    let ctx = TestContext::new();
    let output = ctx.pygr(&["install", "definitely-not-a-package-pygr-test"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_export_import_roundtrip() {
    let ctx = TestContext::new();
    let tool_url = make_origin(&ctx.temp_dir.path().join("tool-origin"), "pygrtesttool");
    let lib_url = make_origin(&ctx.temp_dir.path().join("lib-origin"), "pygrtestlib");
    let recipes_url = make_recipe_repo(
        &ctx.temp_dir.path().join("recipes"),
        &tool_url,
        &lib_url,
    );

    ctx.pygr_ok(&["repo-add", "core", &recipes_url]);
    ctx.pygr_ok(&["install", "pygrtesttool"]);

    let exported = ctx.temp_dir.path().join("packages.exported");
    ctx.pygr_ok(&["export", exported.to_str().unwrap()]);
    let content = std::fs::read_to_string(&exported).unwrap();
    assert!(content.contains("recipe:pygrtesttool@1.0"));

    // Import into a fresh root, then apply rebuilds the same set.
    let fresh = TestContext::new();
    fresh.pygr_ok(&["repo-add", "core", &recipes_url]);
    fresh.pygr_ok(&["import", exported.to_str().unwrap()]);
    let listed = fresh.pygr_ok(&["list"]);
    assert_eq!(listed.trim(), "recipe:pygrtesttool@1.0");

    fresh.pygr_ok(&["apply"]);
    assert!(fresh.current_bin().join("pygrtesttool").exists());
    assert!(fresh.current_bin().join("pygrtestlib").exists());
}

#[test]
fn test_generations_and_status_reporting() {
    let ctx = TestContext::new();
    let tool_url = make_origin(&ctx.temp_dir.path().join("tool-origin"), "pygrtesttool");
    let lib_url = make_origin(&ctx.temp_dir.path().join("lib-origin"), "pygrtestlib");
    let recipes_url = make_recipe_repo(
        &ctx.temp_dir.path().join("recipes"),
        &tool_url,
        &lib_url,
    );

    ctx.pygr_ok(&["repo-add", "core", &recipes_url]);
    ctx.pygr_ok(&["install", "pygrtesttool"]);

    let generations = ctx.pygr_ok(&["generations"]);
    assert!(generations.contains("gen-1"));
    assert!(generations.contains("(current)"));

    let status = ctx.pygr_ok(&["status"]);
    assert!(status.contains("generation: 1"));
    assert!(status.contains("artifacts:  2"));

    let backup = ctx.pygr_ok(&["backup", "pre-change"]);
    assert!(backup.contains("backups"));
    let backups_dir = ctx.root.join("backups");
    let entries: Vec<_> = std::fs::read_dir(&backups_dir).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

//! Build orchestration.
//!
//! Drives one pinned package end-to-end: fetch the source, determine the
//! command plan, compute the store key, and either reuse an existing
//! artifact, import one from the binary cache, or build into a staging
//! prefix and atomically admit it to the store. Any failure leaves the
//! store untouched; staging directories are removed on every exit path.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::core::detect::{self, DetectError};
use crate::core::fingerprint::{self, BuildInputs};
use crate::core::recipe::{Recipe, PREFIX_PLACEHOLDER};
use crate::core::sandbox::{self, Policy, SandboxError};
use crate::core::version::Version;
use crate::io::cache::{CacheClient, Lookup};
use crate::io::fetch::{FetchError, Fetcher};
use crate::paths::Layout;
use crate::store::{ArtifactManifest, Store, StoreError, MANIFEST_FILE};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal task error: {0}")]
    Task(String),
}

/// What to build: a catalog recipe, or an ad-hoc remote repo.
#[derive(Debug, Clone)]
pub enum BuildSource {
    Recipe(Recipe),
    Remote {
        name: String,
        url: String,
        git_ref: Option<String>,
    },
}

impl BuildSource {
    pub fn name(&self) -> &str {
        match self {
            BuildSource::Recipe(recipe) => &recipe.name,
            BuildSource::Remote { name, .. } => name,
        }
    }

    pub fn version(&self) -> Option<&Version> {
        match self {
            BuildSource::Recipe(recipe) => Some(&recipe.version),
            BuildSource::Remote { .. } => None,
        }
    }

    fn url(&self) -> String {
        match self {
            BuildSource::Recipe(recipe) => recipe.source_url(),
            BuildSource::Remote { url, .. } => url.clone(),
        }
    }

    fn git_ref(&self) -> Option<String> {
        match self {
            BuildSource::Recipe(recipe) => recipe.source.git_ref.clone(),
            BuildSource::Remote { git_ref, .. } => git_ref.clone(),
        }
    }
}

/// How an artifact came to be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Identical key already in the store.
    Reused,
    /// Imported from the binary cache.
    Cached,
    /// Built locally.
    Built,
}

#[derive(Debug, Clone)]
pub struct Built {
    pub key: String,
    pub name: String,
    pub version: Option<Version>,
    pub provenance: Provenance,
}

/// Clonable so parallel plan workers can each hold one.
#[derive(Clone)]
pub struct Builder {
    layout: Layout,
    store: Arc<Store>,
    fetcher: Fetcher,
    cache: Option<Arc<CacheClient>>,
    policy: Policy,
}

impl Builder {
    pub fn new(
        layout: Layout,
        store: Arc<Store>,
        fetcher: Fetcher,
        cache: Option<Arc<CacheClient>>,
        policy: Policy,
    ) -> Self {
        Self {
            layout,
            store,
            fetcher,
            cache,
            policy,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Build one pinned package against already-built dependencies.
    ///
    /// Idempotent: a second call with identical inputs stops at the store
    /// fast path.
    pub async fn build(
        &self,
        source: &BuildSource,
        dependency_keys: &[String],
    ) -> Result<Built, BuildError> {
        let name = source.name().to_string();
        let version = source.version().cloned();

        // 1. Materialize the source and fingerprint it.
        let fetched = {
            let fetcher = self.fetcher.clone();
            let url = source.url();
            let git_ref = source.git_ref();
            tokio::task::spawn_blocking(move || fetcher.fetch(&url, git_ref.as_deref()))
                .await
                .map_err(|e| BuildError::Task(e.to_string()))??
        };

        // 2. Command plan: recipe commands win, detection otherwise.
        let (plan_text, build_cmds, install_cmds) = match source {
            BuildSource::Recipe(recipe)
                if !recipe.build.is_empty() || !recipe.install.is_empty() =>
            {
                (
                    recipe.canonical_text(),
                    recipe.build.clone(),
                    recipe.install.clone(),
                )
            }
            _ => {
                let plan = detect::detect(&fetched.path)?;
                (plan.descriptor(), plan.build, plan.install)
            }
        };

        // 3. The store key.
        let key = fingerprint::build_fingerprint(&BuildInputs {
            tree: &fetched.tree_fingerprint,
            plan: &plan_text,
            dependency_keys,
            prefix_template: PREFIX_PLACEHOLDER,
            policy: self.policy.marker(),
        });

        // 4. Fast paths: store, then binary cache.
        if self.store.has(&key) {
            return Ok(Built {
                key,
                name,
                version,
                provenance: Provenance::Reused,
            });
        }
        if self.try_cache_import(&key).await? {
            return Ok(Built {
                key,
                name,
                version,
                provenance: Provenance::Cached,
            });
        }

        // 5-9. Local build into a fresh staging prefix.
        let fetched_ref = source.git_ref().unwrap_or_else(|| fetched.commit.clone());
        let manifest = ArtifactManifest {
            name: name.clone(),
            version: version.as_ref().map(|v| v.to_string()),
            dependencies: dependency_keys.to_vec(),
            fetched_ref: Some(fetched_ref),
            tree_fingerprint: fetched.tree_fingerprint.clone(),
            built_at: chrono::Utc::now(),
        };

        let log_path = self.layout.build_log_path(
            &name,
            version
                .as_ref()
                .map(|v| v.to_string())
                .as_deref()
                .unwrap_or("src"),
        );

        {
            let this = self.clone();
            let source_path = fetched.path.clone();
            let deps = dependency_keys.to_vec();
            let key = key.clone();
            tokio::task::spawn_blocking(move || {
                this.run_local_build(
                    &source_path,
                    &build_cmds,
                    &install_cmds,
                    &deps,
                    &manifest,
                    &key,
                    &log_path,
                )
            })
            .await
            .map_err(|e| BuildError::Task(e.to_string()))??;
        }

        Ok(Built {
            key,
            name,
            version,
            provenance: Provenance::Built,
        })
    }

    /// A cache miss or failure is never fatal; the caller builds locally.
    async fn try_cache_import(&self, key: &str) -> Result<bool, BuildError> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };

        match cache.lookup(key).await {
            Ok(Lookup::Hit) => {}
            Ok(Lookup::Miss) => return Ok(false),
            Err(e) => {
                tracing::warn!(key, error = %e, "binary cache lookup failed");
                return Ok(false);
            }
        }

        let staging = tempfile::Builder::new()
            .prefix("cache-")
            .tempdir_in(self.layout.tmp_dir())?;
        match cache.download_and_extract(key, staging.path()).await {
            Ok(()) => {
                self.store.insert(staging.path(), key)?;
                // The rename consumed the directory; don't let RAII unlink
                // the store copy via a stale path.
                let _ = staging.keep();
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "binary cache import failed, building locally");
                Ok(false)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_local_build(
        &self,
        source_path: &Path,
        build_cmds: &[String],
        install_cmds: &[String],
        dependency_keys: &[String],
        manifest: &ArtifactManifest,
        key: &str,
        log_path: &Path,
    ) -> Result<(), BuildError> {
        let staging = tempfile::Builder::new()
            .prefix("build-")
            .tempdir_in(self.layout.tmp_dir())?;

        // Private copy of the source so commands never dirty the clone.
        let work_dir = staging.path().join("src");
        copy_source_tree(source_path, &work_dir)?;

        let prefix = staging.path().join("prefix");
        std::fs::create_dir_all(&prefix)?;

        let env = self.dependency_env(dependency_keys, &prefix);
        let writable = vec![staging.path().to_path_buf()];

        for command in build_cmds.iter().chain(install_cmds) {
            let expanded = command.replace(PREFIX_PLACEHOLDER, &prefix.to_string_lossy());
            tracing::debug!(package = manifest.name, command = %expanded, "running");
            sandbox::run(
                &self.policy,
                &expanded,
                &work_dir,
                &env,
                &writable,
                log_path,
            )?;
        }

        std::fs::write(
            prefix.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(manifest).map_err(std::io::Error::other)?,
        )?;

        self.store.insert(&prefix, key)?;
        // staging (now just the src copy) is dropped and removed here.
        Ok(())
    }

    /// Expose dependency artifacts to build commands the conventional way:
    /// headers, libraries, pkg-config dirs, and executables.
    fn dependency_env(&self, dependency_keys: &[String], prefix: &Path) -> Vec<(String, String)> {
        let mut cpath = Vec::new();
        let mut library_path = Vec::new();
        let mut pkg_config_path = Vec::new();
        let mut bin_path = Vec::new();

        for key in dependency_keys {
            let dir = self.store.artifact_dir(key);
            if dir.join("include").is_dir() {
                cpath.push(dir.join("include").to_string_lossy().into_owned());
            }
            if dir.join("lib").is_dir() {
                library_path.push(dir.join("lib").to_string_lossy().into_owned());
            }
            if dir.join("lib/pkgconfig").is_dir() {
                pkg_config_path.push(dir.join("lib/pkgconfig").to_string_lossy().into_owned());
            }
            if dir.join("bin").is_dir() {
                bin_path.push(dir.join("bin").to_string_lossy().into_owned());
            }
        }

        let mut env = vec![
            ("PREFIX".to_string(), prefix.to_string_lossy().into_owned()),
            ("JOBS".to_string(), num_cpus::get().to_string()),
        ];
        if !cpath.is_empty() {
            env.push(("CPATH".into(), cpath.join(":")));
        }
        if !library_path.is_empty() {
            env.push(("LIBRARY_PATH".into(), library_path.join(":")));
        }
        if !pkg_config_path.is_empty() {
            env.push(("PKG_CONFIG_PATH".into(), pkg_config_path.join(":")));
        }
        if !bin_path.is_empty() {
            let inherited = std::env::var("PATH").unwrap_or_default();
            env.push(("PATH".into(), format!("{}:{inherited}", bin_path.join(":"))));
        }
        env
    }
}

/// Copy a checkout into the staging work dir, excluding VCS metadata.
fn copy_source_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            crate::store::copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;

    fn make_origin(dir: &Path, files: &[(&str, &str)]) -> String {
        let run = |args: &[&str]| {
            let out = Command::new("git")
                .args(args)
                .current_dir(dir)
                .env("GIT_AUTHOR_NAME", "t")
                .env("GIT_AUTHOR_EMAIL", "t@t")
                .env("GIT_COMMITTER_NAME", "t")
                .env("GIT_COMMITTER_EMAIL", "t@t")
                .output()
                .expect("git available");
            assert!(out.status.success(), "git {args:?} failed");
        };
        run(&["init", "-b", "main", "."]);
        for (name, content) in files {
            std::fs::write(dir.join(name), content).unwrap();
        }
        run(&["add", "."]);
        run(&["commit", "-m", "init"]);
        run(&["tag", "v1.0"]);
        format!("file://{}", dir.display())
    }

    fn test_builder(root: &Path) -> Builder {
        let layout = Layout::at(root.join("pygr")).unwrap();
        let store = Arc::new(Store::new(layout.store_dir()));
        let fetcher = Fetcher::new(layout.sources_dir());
        let policy = Policy {
            enabled: false,
            network: false,
            timeout: Duration::from_secs(60),
        };
        Builder::new(layout, store, fetcher, None, policy)
    }

    fn remote_source(url: &str) -> BuildSource {
        BuildSource::Remote {
            name: "hello".into(),
            url: url.into(),
            git_ref: Some("v1.0".into()),
        }
    }

    #[tokio::test]
    async fn test_build_make_project_end_to_end() {
        let origin = tempfile::tempdir().unwrap();
        let url = make_origin(
            origin.path(),
            &[(
                "Makefile",
                "all:\n\ttrue\n\ninstall:\n\tmkdir -p $(PREFIX)/bin\n\tprintf '#!/bin/sh\\necho hi\\n' > $(PREFIX)/bin/hello\n\tchmod +x $(PREFIX)/bin/hello\n",
            )],
        );

        let root = tempfile::tempdir().unwrap();
        let builder = test_builder(root.path());

        let built = builder.build(&remote_source(&url), &[]).await.unwrap();
        assert_eq!(built.provenance, Provenance::Built);
        assert!(builder.store().has(&built.key));

        let manifest = builder.store().artifact_manifest(&built.key).unwrap();
        assert_eq!(manifest.name, "hello");
        assert_eq!(manifest.fetched_ref.as_deref(), Some("v1.0"));

        let bins = builder.store().executables(&built.key).unwrap();
        assert_eq!(bins.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_is_reused() {
        let origin = tempfile::tempdir().unwrap();
        let url = make_origin(
            origin.path(),
            &[(
                "Makefile",
                "all:\n\ttrue\n\ninstall:\n\tmkdir -p $(PREFIX)/bin\n\ttouch $(PREFIX)/bin/x\n\tchmod +x $(PREFIX)/bin/x\n",
            )],
        );

        let root = tempfile::tempdir().unwrap();
        let builder = test_builder(root.path());

        let first = builder.build(&remote_source(&url), &[]).await.unwrap();
        let second = builder.build(&remote_source(&url), &[]).await.unwrap();
        assert_eq!(first.key, second.key);
        assert_eq!(second.provenance, Provenance::Reused);
    }

    #[tokio::test]
    async fn test_failed_build_leaves_store_unchanged() {
        let origin = tempfile::tempdir().unwrap();
        let url = make_origin(origin.path(), &[("Makefile", "all:\n\texit 9\n")]);

        let root = tempfile::tempdir().unwrap();
        let builder = test_builder(root.path());

        let err = builder.build(&remote_source(&url), &[]).await.unwrap_err();
        assert!(matches!(err, BuildError::Sandbox(_)));
        assert!(builder.store().enumerate().unwrap().is_empty());

        // Staging cleaned up on failure.
        let leftovers: Vec<_> = std::fs::read_dir(builder.layout.tmp_dir())
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_no_build_system_surfaces() {
        let origin = tempfile::tempdir().unwrap();
        let url = make_origin(origin.path(), &[("README", "nothing to build\n")]);

        let root = tempfile::tempdir().unwrap();
        let builder = test_builder(root.path());

        let err = builder.build(&remote_source(&url), &[]).await.unwrap_err();
        assert!(matches!(err, BuildError::Detect(DetectError::NoBuildSystem(_))));
    }

    #[tokio::test]
    async fn test_recipe_commands_and_prefix_expansion() {
        let origin = tempfile::tempdir().unwrap();
        let url = make_origin(origin.path(), &[("data.txt", "payload\n")]);

        let root = tempfile::tempdir().unwrap();
        let builder = test_builder(root.path());

        let yaml = format!(
            "name: datapkg\nversion: '2.1'\nsource:\n  kind: remote-repo\n  repo: {url}\n  ref: v1.0\ninstall:\n  - mkdir -p {{{{prefix}}}}/bin\n  - cp data.txt {{{{prefix}}}}/bin/datapkg\n  - chmod +x {{{{prefix}}}}/bin/datapkg\n"
        );
        let recipe = Recipe::from_slice(yaml.as_bytes(), Path::new("datapkg.yaml")).unwrap();

        let built = builder
            .build(&BuildSource::Recipe(recipe), &[])
            .await
            .unwrap();
        assert_eq!(built.version.unwrap().to_string(), "2.1");

        let manifest = builder.store().artifact_manifest(&built.key).unwrap();
        assert_eq!(manifest.version.as_deref(), Some("2.1"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_local_build() {
        use sha2::Digest;

        let origin = tempfile::tempdir().unwrap();
        let url = make_origin(
            origin.path(),
            &[(
                "Makefile",
                "all:\n\ttrue\n\ninstall:\n\tmkdir -p $(PREFIX)/bin\n\tprintf '#!/bin/sh\\n' > $(PREFIX)/bin/cached-tool\n\tchmod +x $(PREFIX)/bin/cached-tool\n",
            )],
        );

        // First root: build locally to learn the key and produce the tree.
        let seed_root = tempfile::tempdir().unwrap();
        let seed = test_builder(seed_root.path());
        let first = seed.build(&remote_source(&url), &[]).await.unwrap();
        assert_eq!(first.provenance, Provenance::Built);

        // Publish that artifact as a cache archive.
        let mut tar = tar::Builder::new(Vec::new());
        tar.append_dir_all(&first.key, seed.store().artifact_dir(&first.key))
            .unwrap();
        let archive = zstd::stream::encode_all(&tar.into_inner().unwrap()[..], 3).unwrap();
        let digest = hex::encode(sha2::Sha256::digest(&archive));

        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", format!("/{}.tar.zst", first.key).as_str())
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", format!("/{}.tar.zst", first.key).as_str())
            .with_body(archive)
            .create_async()
            .await;
        server
            .mock("GET", format!("/{}.sha256", first.key).as_str())
            .with_body(digest)
            .create_async()
            .await;

        // Second root: same inputs, cache configured; the import path wins.
        let root = tempfile::tempdir().unwrap();
        let layout = Layout::at(root.path().join("pygr")).unwrap();
        let store = Arc::new(Store::new(layout.store_dir()));
        let fetcher = Fetcher::new(layout.sources_dir());
        let cache = Arc::new(CacheClient::new(server.url(), reqwest::Client::new()));
        let policy = Policy {
            enabled: false,
            network: false,
            timeout: Duration::from_secs(60),
        };
        let builder = Builder::new(layout, store, fetcher, Some(cache), policy);

        let second = builder.build(&remote_source(&url), &[]).await.unwrap();
        assert_eq!(second.key, first.key);
        assert_eq!(second.provenance, Provenance::Cached);
        assert!(builder.store().has(&second.key));
        assert_eq!(builder.store().executables(&second.key).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dependency_keys_change_fingerprint() {
        let origin = tempfile::tempdir().unwrap();
        let url = make_origin(
            origin.path(),
            &[(
                "Makefile",
                "all:\n\ttrue\n\ninstall:\n\tmkdir -p $(PREFIX)/bin\n\ttouch $(PREFIX)/bin/x\n\tchmod +x $(PREFIX)/bin/x\n",
            )],
        );

        let root = tempfile::tempdir().unwrap();
        let builder = test_builder(root.path());

        let plain = builder.build(&remote_source(&url), &[]).await.unwrap();
        let with_dep = builder
            .build(&remote_source(&url), &["d".repeat(64)])
            .await
            .unwrap();
        assert_ne!(plain.key, with_dep.key);
    }
}

//! Binary cache client.
//!
//! Probes a remote URL for a prebuilt artifact keyed by build fingerprint
//! and extracts it into a staging directory. The wire format is
//! `<base>/<key>.tar.zst` plus a `<key>.sha256` side-car holding the hex
//! digest of the archive. A cache failure is never fatal to an install; the
//! caller falls back to a local build.

use std::io::Read;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cache returned status {0}")]
    Status(StatusCode),

    #[error("cached archive corrupt: expected sha256 {expected}, got {actual}")]
    CacheCorrupt { expected: String, actual: String },

    #[error("invalid archive: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit,
    Miss,
}

pub struct CacheClient {
    base: String,
    client: Client,
}

impl CacheClient {
    pub fn new(base: impl Into<String>, client: Client) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn archive_url(&self, key: &str) -> String {
        format!("{}/{key}.tar.zst", self.base)
    }

    fn digest_url(&self, key: &str) -> String {
        format!("{}/{key}.sha256", self.base)
    }

    /// HEAD probe for a prebuilt artifact.
    pub async fn lookup(&self, key: &str) -> Result<Lookup, CacheError> {
        let resp = self
            .client
            .head(self.archive_url(key))
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(Lookup::Hit),
            StatusCode::NOT_FOUND => Ok(Lookup::Miss),
            s => Err(CacheError::Status(s)),
        }
    }

    /// Download the archive for `key`, verify its SHA-256 side-car, and
    /// extract the artifact tree into `dest` (a fresh staging directory).
    pub async fn download_and_extract(&self, key: &str, dest: &Path) -> Result<(), CacheError> {
        let expected = self.fetch_digest(key).await?;

        let archive_path = dest.join(".fetch.tar.zst");
        let actual = self.download(key, &archive_path).await?;

        if actual != expected {
            tokio::fs::remove_file(&archive_path).await.ok();
            return Err(CacheError::CacheCorrupt { expected, actual });
        }

        let dest = dest.to_path_buf();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let result = extract_tar_zst(&archive_path, &dest, &key);
            std::fs::remove_file(&archive_path).ok();
            result
        })
        .await
        .map_err(|e| CacheError::Archive(format!("task panic: {e}")))?
    }

    async fn fetch_digest(&self, key: &str) -> Result<String, CacheError> {
        let resp = self
            .client
            .get(self.digest_url(key))
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CacheError::Status(resp.status()));
        }
        let body = resp.text().await?;
        // Accept both a bare digest and the `<digest>  <filename>` form.
        let digest = body.split_whitespace().next().unwrap_or("").to_lowercase();
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CacheError::Archive(format!(
                "malformed digest side-car for {key}"
            )));
        }
        Ok(digest)
    }

    /// Streaming download with the SHA-256 computed on the fly.
    async fn download(&self, key: &str, dest: &Path) -> Result<String, CacheError> {
        let resp = self
            .client
            .get(self.archive_url(key))
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CacheError::Status(resp.status()));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(hex::encode(hasher.finalize()))
    }
}

/// Extract a tar.zst archive into `dest`, stripping the artifact's own key
/// directory when the archive is rooted at it.
fn extract_tar_zst(archive: &Path, dest: &Path, key: &str) -> Result<(), CacheError> {
    let file = std::fs::File::open(archive)?;
    let decoder = zstd::stream::Decoder::new(std::io::BufReader::new(file))?;
    extract_tar(decoder, dest, key)
}

fn extract_tar<R: Read>(reader: R, dest: &Path, key: &str) -> Result<(), CacheError> {
    std::fs::create_dir_all(dest)?;
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);

    for entry in tar.entries()? {
        let mut entry = entry?;
        let raw: PathBuf = entry.path()?.components().collect();

        let relative: PathBuf = match raw.strip_prefix(key) {
            Ok(stripped) => stripped.to_path_buf(),
            Err(_) => raw,
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        // Only plain components survive: `..`, absolute, and prefix parts
        // would let a hostile archive write outside the staging dir
        // (`dest.join` does not resolve them).
        if !relative
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)))
        {
            return Err(CacheError::Archive(format!(
                "archive escapes destination: {}",
                relative.display()
            )));
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }

    Ok(())
}

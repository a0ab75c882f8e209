//! Screenshot storage behind an object-store port.
//!
//! The shipped implementation is filesystem-rooted with HMAC-signed
//! expiring URLs; a bucket-backed store only needs to implement the same
//! two-method port.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::fs;

use crate::error::{CoreError, Result};

type HmacSha256 = Hmac<Sha256>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `path` (slash-separated, relative). Overwrites.
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<()>;

    /// Returns a time-limited URL for `path`.
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String>;
}

/// Filesystem-rooted store. URLs are `{public_base}/screenshots/{path}`
/// signed with HMAC-SHA256 over `path:expires`.
pub struct FsObjectStore {
    root: PathBuf,
    signing_key: Vec<u8>,
    public_base: String,
}

impl std::fmt::Debug for FsObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsObjectStore")
            .field("root", &self.root)
            .field("public_base", &self.public_base)
            .finish_non_exhaustive()
    }
}

impl FsObjectStore {
    pub fn new(
        root: impl Into<PathBuf>,
        signing_key: impl Into<Vec<u8>>,
        public_base: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            signing_key: signing_key.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolves a stored path for serving. Rejects anything that would
    /// escape the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = sanitize(path)?;
        Ok(self.root.join(rel))
    }

    pub fn sign(&self, path: &str, expires_unix: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .expect("HMAC accepts any key length");
        mac.update(path.as_bytes());
        mac.update(b":");
        mac.update(expires_unix.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Validates a presented signature and expiry for `path`.
    pub fn verify(&self, path: &str, expires_unix: i64, sig: &str) -> bool {
        if expires_unix < Utc::now().timestamp() {
            return false;
        }
        let expected = self.sign(path, expires_unix);
        constant_time_eq::constant_time_eq(
            expected.as_bytes(),
            sig.as_bytes(),
        )
    }
}

fn sanitize(path: &str) -> Result<&Path> {
    let p = Path::new(path);
    let ok = !path.is_empty()
        && !p.is_absolute()
        && p.components().all(|c| {
            matches!(c, std::path::Component::Normal(_))
        });
    if !ok {
        return Err(CoreError::Internal(format!(
            "refusing unsafe storage path `{path}`"
        )));
    }
    Ok(p)
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, bytes).await?;
        Ok(())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String> {
        sanitize(path)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let sig = self.sign(path, expires);
        Ok(format!(
            "{}/screenshots/{}?expires={}&sig={}",
            self.public_base, path, expires, sig
        ))
    }
}

/// Builds the conventional screenshot path for a check:
/// `checks/{date}/{client-slug}/{HH-MM-SS}.png`.
pub fn screenshot_path(
    client_slug: &str,
    at: chrono::DateTime<Utc>,
) -> String {
    format!(
        "checks/{}/{}/{}.png",
        at.format("%Y-%m-%d"),
        client_slug,
        at.format("%H-%M-%S")
    )
}

// src/provision/mod.rs

//! Binary provisioning.
//!
//! [`BinaryProvisioner::ensure`] makes a tool's executable available:
//!
//! - operator-supplied binaries are resolved under the tools directory;
//! - release binaries are looked up in the on-disk cache and otherwise
//!   downloaded, verified against a known-good SHA-256, extracted and
//!   recorded with a marker file.
//!
//! Concurrent `ensure` calls for the same tool share one provisioning job
//! (single-flight). The job runs detached, so a caller that gives up waiting
//! does not cancel it for the others.

pub mod cache;
pub mod extract;
pub mod source;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::catalog::{BinarySpec, ReleaseSpec, ToolDefinition};
use crate::errors::ProvisionError;

pub use source::{HttpReleaseSource, ReleaseSource};

const DEFAULT_DOWNLOAD_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Where a provisioned executable came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinarySource {
    Operator,
    Release,
}

/// An executable ready to be launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedBinary {
    pub tool: String,
    /// Absolute path of the executable.
    pub executable: PathBuf,
    pub version: String,
    pub provisioned_at: DateTime<Utc>,
    pub source: BinarySource,
}

type ProvisionResult = Result<ProvisionedBinary, ProvisionError>;

enum Slot {
    Ready(ProvisionedBinary),
    InFlight(watch::Receiver<Option<ProvisionResult>>),
}

struct Inner {
    tools_dir: PathBuf,
    cache_dir: PathBuf,
    source: Arc<dyn ReleaseSource>,
    download_attempts: u32,
    slots: Mutex<HashMap<String, Slot>>,
}

/// Owner of per-tool "installed" state. Cheap to clone.
#[derive(Clone)]
pub struct BinaryProvisioner {
    inner: Arc<Inner>,
}

impl BinaryProvisioner {
    pub fn new(
        tools_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        source: Arc<dyn ReleaseSource>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tools_dir: tools_dir.into(),
                cache_dir: cache_dir.into(),
                source,
                download_attempts: DEFAULT_DOWNLOAD_ATTEMPTS,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of download attempts for retryable failures (minimum 1).
    ///
    /// Must be called before the provisioner is cloned.
    pub fn with_download_attempts(mut self, attempts: u32) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.download_attempts = attempts.max(1);
        }
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    /// Make `def`'s executable available, provisioning it at most once per
    /// tool no matter how many callers ask concurrently.
    pub async fn ensure(&self, def: &Arc<ToolDefinition>) -> ProvisionResult {
        let key = def.name.to_lowercase();

        let mut rx = {
            let mut slots = self.inner.lock_slots();
            match slots.get(&key) {
                Some(Slot::Ready(bin)) if is_current(def, bin) => {
                    debug!(tool = %def.name, "binary already provisioned");
                    return Ok(bin.clone());
                }
                Some(Slot::InFlight(rx)) => {
                    debug!(tool = %def.name, "joining in-flight provisioning");
                    rx.clone()
                }
                _ => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(key.clone(), Slot::InFlight(rx.clone()));

                    let inner = Arc::clone(&self.inner);
                    let def = Arc::clone(def);
                    tokio::spawn(async move {
                        let guard = InFlightGuard {
                            inner: Arc::clone(&inner),
                            key: Some(key.clone()),
                        };
                        let result = inner.provision(&def).await;
                        {
                            let mut slots = inner.lock_slots();
                            match &result {
                                Ok(bin) => {
                                    slots.insert(key, Slot::Ready(bin.clone()));
                                }
                                Err(_) => {
                                    slots.remove(&key);
                                }
                            }
                        }
                        guard.disarm();
                        let _ = tx.send(Some(result));
                    });
                    rx
                }
            }
        };

        let value = rx.wait_for(Option::is_some).await.map_err(|_| {
            ProvisionError::Download(format!("provisioning of '{}' was abandoned", def.name))
        })?;
        let result = (*value).clone();
        result.unwrap_or_else(|| {
            Err(ProvisionError::Download(format!(
                "provisioning of '{}' produced no result",
                def.name
            )))
        })
    }
}

/// Frees an in-flight slot when its job dies without publishing a result
/// (e.g. a panic), so the next `ensure` starts over.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: Option<String>,
}

impl InFlightGuard {
    fn disarm(mut self) {
        self.key = None;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut slots = self.inner.lock_slots();
        if matches!(slots.get(&key), Some(Slot::InFlight(_))) {
            warn!(tool = %key, "provisioning job ended without a result");
            slots.remove(&key);
        }
    }
}

/// A remembered binary is reused only while its file exists and its version
/// still satisfies the definition.
fn is_current(def: &ToolDefinition, bin: &ProvisionedBinary) -> bool {
    let version_ok = match def.version_requirement() {
        Some(required) => bin.version == required,
        None => true,
    };
    version_ok && bin.executable.is_file()
}

impl Inner {
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn provision(&self, def: &ToolDefinition) -> ProvisionResult {
        let result = match &def.binary {
            BinarySpec::Operator { path, version } => self.resolve_operator(def, path, version.as_deref()),
            BinarySpec::Release(spec) => self.provision_release(def, spec).await,
        };

        match &result {
            Ok(bin) => info!(
                tool = %def.name,
                version = %bin.version,
                executable = %bin.executable.display(),
                "binary provisioned"
            ),
            Err(e) => warn!(tool = %def.name, error = %e, retryable = e.is_retryable(), "provisioning failed"),
        }
        result
    }

    fn resolve_operator(
        &self,
        def: &ToolDefinition,
        path: &Path,
        version: Option<&str>,
    ) -> ProvisionResult {
        let exe = self.tools_dir.join(path);
        if !exe.is_file() {
            return Err(ProvisionError::Unavailable(format!(
                "{} not found; place the {} binary under the tools directory",
                exe.display(),
                def.name
            )));
        }

        Ok(ProvisionedBinary {
            tool: def.name.clone(),
            executable: absolute(exe),
            version: version.unwrap_or("operator-supplied").to_string(),
            provisioned_at: Utc::now(),
            source: BinarySource::Operator,
        })
    }

    async fn provision_release(&self, def: &ToolDefinition, spec: &ReleaseSpec) -> ProvisionResult {
        let tool_dir = self.cache_dir.join(&def.name);
        let version_dir = cache::version_dir(&self.cache_dir, &def.name, &spec.version);

        if let Some(bin) = cache::read_marker(&version_dir).await {
            if bin.version == spec.version && bin.executable.is_file() {
                debug!(tool = %def.name, version = %spec.version, "cache hit");
                return Ok(bin);
            }
            debug!(tool = %def.name, "stale cache marker; re-fetching");
        }

        let expected = self.known_good_digest(def, spec).await?;

        fs::create_dir_all(&tool_dir)
            .await
            .map_err(|e| ProvisionError::Download(format!("creating {}: {e}", tool_dir.display())))?;

        let archive = tool_dir.join(format!(".download-{}", spec.version));
        let actual = self.download(def, spec, &archive).await?;

        if !actual.eq_ignore_ascii_case(&expected) {
            let _ = fs::remove_file(&archive).await;
            return Err(ProvisionError::Integrity(format!(
                "{} {}: expected sha256 {expected}, got {actual}",
                def.name, spec.version
            )));
        }

        let staging = tool_dir.join(format!(".staging-{}", spec.version));
        let _ = fs::remove_dir_all(&staging).await;

        let extracted = extract::extract_zip(archive.clone(), staging.clone()).await;
        let _ = fs::remove_file(&archive).await;
        if let Err(e) = extracted {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        if !staging.join(&spec.executable).is_file() {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(ProvisionError::Extraction(format!(
                "archive for {} {} does not contain {}",
                def.name,
                spec.version,
                spec.executable.display()
            )));
        }

        let install_err =
            |e: std::io::Error| ProvisionError::Extraction(format!("installing into {}: {e}", version_dir.display()));

        if fs::metadata(&version_dir).await.is_ok() {
            fs::remove_dir_all(&version_dir).await.map_err(install_err)?;
        }
        fs::rename(&staging, &version_dir).await.map_err(install_err)?;

        let exe = version_dir.join(&spec.executable);
        extract::make_executable(&exe).map_err(install_err)?;

        let bin = ProvisionedBinary {
            tool: def.name.clone(),
            executable: absolute(exe),
            version: spec.version.clone(),
            provisioned_at: Utc::now(),
            source: BinarySource::Release,
        };
        cache::write_marker(&version_dir, &bin).await.map_err(install_err)?;
        cache::prune_other_versions(&tool_dir, &spec.version).await;

        Ok(bin)
    }

    /// The pinned digest, or the one published at `checksum_url`.
    async fn known_good_digest(&self, def: &ToolDefinition, spec: &ReleaseSpec) -> Result<String, ProvisionError> {
        if let Some(sha) = &spec.sha256 {
            return Ok(sha.clone());
        }
        let Some(url) = &spec.checksum_url else {
            return Err(ProvisionError::Integrity(format!(
                "no known-good sha256 for {} {}; set [release.{}] sha256 or checksum_url",
                def.name, spec.version, def.name
            )));
        };

        let doc = self.fetch_checksum_text(url).await?;
        source::parse_checksum_document(&doc).ok_or_else(|| {
            ProvisionError::Integrity(format!("{url} does not contain a sha256 digest"))
        })
    }

    async fn fetch_checksum_text(&self, url: &str) -> Result<String, ProvisionError> {
        let mut attempt = 1;
        loop {
            match self.source.fetch_text(url).await {
                Err(e) if e.is_retryable() && attempt < self.download_attempts => {
                    debug!(url, attempt, error = %e, "checksum fetch failed; retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn download(&self, def: &ToolDefinition, spec: &ReleaseSpec, dest: &Path) -> Result<String, ProvisionError> {
        let mut attempt = 1;
        loop {
            info!(tool = %def.name, version = %spec.version, url = %spec.url, attempt, "downloading release");
            match self.source.fetch(&spec.url, dest).await {
                Err(e) if e.is_retryable() && attempt < self.download_attempts => {
                    warn!(tool = %def.name, attempt, error = %e, "download failed; retrying");
                    let _ = fs::remove_file(dest).await;
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    let _ = fs::remove_file(dest).await;
                    return Err(e);
                }
                Ok(digest) => return Ok(digest),
            }
        }
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

// src/provision/cache.rs

//! On-disk layout of the release cache:
//!
//! ```text
//! <cache_dir>/<tool>/<version>/...            extracted archive
//! <cache_dir>/<tool>/<version>/.provisioned.json
//! ```
//!
//! The marker is written last, so a version directory without one is treated
//! as incomplete.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use super::ProvisionedBinary;

pub const MARKER_FILE: &str = ".provisioned.json";

pub fn version_dir(cache_dir: &Path, tool: &str, version: &str) -> PathBuf {
    cache_dir.join(tool).join(version)
}

/// Read the marker of a version directory. Unreadable or malformed markers
/// count as a miss.
pub async fn read_marker(dir: &Path) -> Option<ProvisionedBinary> {
    let path = dir.join(MARKER_FILE);
    let bytes = fs::read(&path).await.ok()?;
    match serde_json::from_slice::<ProvisionedBinary>(&bytes) {
        Ok(bin) => Some(bin),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed cache marker");
            None
        }
    }
}

pub async fn write_marker(dir: &Path, bin: &ProvisionedBinary) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(bin).map_err(std::io::Error::other)?;
    fs::write(dir.join(MARKER_FILE), json).await
}

/// Remove every version directory of a tool except `keep`.
pub async fn prune_other_versions(tool_dir: &Path, keep: &str) {
    let mut entries = match fs::read_dir(tool_dir).await {
        Ok(entries) => entries,
        Err(_) => return,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        // Staging and download leftovers are dot-prefixed and handled by the
        // provisioner itself.
        if name == keep || name.starts_with('.') {
            continue;
        }
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        match fs::remove_dir_all(entry.path()).await {
            Ok(()) => debug!(path = %entry.path().display(), "removed outdated version"),
            Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to remove outdated version"),
        }
    }
}

// src/provision/source.rs

//! Where release archives come from.
//!
//! The provisioner only needs "bytes for version V" plus an integrity value,
//! so the download side is a small trait. [`HttpReleaseSource`] is the
//! production implementation; tests substitute an in-memory fake.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::errors::{ProvisionError, Result, TriageError};

pub type SourceFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, ProvisionError>> + Send + 'a>>;

/// Abstract download source for release archives.
pub trait ReleaseSource: Send + Sync {
    /// Download `url` into `dest` and return the lowercase hex SHA-256 of the
    /// bytes written.
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> SourceFuture<'a, String>;

    /// Fetch a published checksum document (e.g. a `.sha256` file).
    fn fetch_text<'a>(&'a self, url: &'a str) -> SourceFuture<'a, String>;
}

/// Release source backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpReleaseSource {
    client: reqwest::Client,
}

impl HttpReleaseSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("triagerun/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TriageError::Other(e.into()))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> std::result::Result<reqwest::Response, ProvisionError> {
        self.client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ProvisionError::Download(format!("{url}: {e}")))
    }
}

impl ReleaseSource for HttpReleaseSource {
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> SourceFuture<'a, String> {
        Box::pin(async move {
            let response = self.get(url).await?;
            let io_err =
                |e: std::io::Error| ProvisionError::Download(format!("writing {}: {e}", dest.display()));

            let mut file = fs::File::create(dest).await.map_err(io_err)?;
            let mut stream = response.bytes_stream();
            let mut hasher = Sha256::new();
            let mut total = 0u64;

            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| ProvisionError::Download(format!("{url}: {e}")))?;
                file.write_all(&chunk).await.map_err(io_err)?;
                hasher.update(&chunk);
                total += chunk.len() as u64;
            }

            file.flush().await.map_err(io_err)?;
            debug!(url, bytes = total, "release archive downloaded");
            Ok(format!("{:x}", hasher.finalize()))
        })
    }

    fn fetch_text<'a>(&'a self, url: &'a str) -> SourceFuture<'a, String> {
        Box::pin(async move {
            let response = self.get(url).await?;
            response
                .text()
                .await
                .map_err(|e| ProvisionError::Download(format!("{url}: {e}")))
        })
    }
}

/// Extract the digest from a checksum document.
///
/// Accepts a bare digest or the `sha256sum` format (`<hex>  <file>`); only the
/// first token is considered.
pub fn parse_checksum_document(doc: &str) -> Option<String> {
    let token = doc.split_whitespace().next()?;
    let token = token.to_ascii_lowercase();
    (token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit())).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_documents() {
        let hex = "A".repeat(64);
        assert_eq!(parse_checksum_document(&hex), Some("a".repeat(64)));
        assert_eq!(
            parse_checksum_document(&format!("{hex}  hayabusa-3.2.0-win-x64.zip\n")),
            Some("a".repeat(64))
        );
        assert_eq!(parse_checksum_document("not-a-digest file.zip"), None);
        assert_eq!(parse_checksum_document(""), None);
    }
}

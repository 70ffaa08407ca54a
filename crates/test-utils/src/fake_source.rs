use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use sha2::{Digest, Sha256};
use triagerun::errors::ProvisionError;
use triagerun::provision::source::{ReleaseSource, SourceFuture};
use zip::write::SimpleFileOptions;

/// In-memory release source.
///
/// Serves registered archives and checksum documents, counts fetches and can
/// be slowed down so concurrent callers overlap.
#[derive(Default)]
pub struct FakeReleaseSource {
    archives: Mutex<HashMap<String, Vec<u8>>>,
    texts: Mutex<HashMap<String, String>>,
    failures_left: AtomicUsize,
    panics_left: AtomicUsize,
    delay: Option<Duration>,
    fetches: AtomicUsize,
    text_fetches: AtomicUsize,
}

impl FakeReleaseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The next `n` archive fetches fail with a download error.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// The next `n` archive fetches panic, taking the provisioning job down.
    pub fn panicking_first(self, n: usize) -> Self {
        self.panics_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.archives.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub fn serve_text(&self, url: &str, text: &str) {
        self.texts.lock().unwrap().insert(url.to_string(), text.to_string());
    }

    /// Archive downloads attempted so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn text_fetches(&self) -> usize {
        self.text_fetches.load(Ordering::SeqCst)
    }
}

impl ReleaseSource for FakeReleaseSource {
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> SourceFuture<'a, String> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let should_panic = self
                .panics_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_panic {
                panic!("release source crashed while fetching {url}");
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let should_fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(ProvisionError::Download(format!("{url}: connection reset")));
            }

            let bytes = self
                .archives
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| ProvisionError::Download(format!("{url}: 404 Not Found")))?;

            tokio::fs::write(dest, &bytes)
                .await
                .map_err(|e| ProvisionError::Download(format!("{}: {e}", dest.display())))?;
            Ok(sha256_hex(&bytes))
        })
    }

    fn fetch_text<'a>(&'a self, url: &'a str) -> SourceFuture<'a, String> {
        Box::pin(async move {
            self.text_fetches.fetch_add(1, Ordering::SeqCst);
            self.texts
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| ProvisionError::Download(format!("{url}: 404 Not Found")))
        })
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Build a zip archive in memory. Entries are created with mode 0755.
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().unix_permissions(0o755);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

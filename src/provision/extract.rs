// src/provision/extract.rs

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::ProvisionError;

/// Extract a zip archive into `target` (created if missing).
///
/// Runs the blocking `zip` reader on the blocking pool. Entries whose names
/// would land outside `target` fail the whole extraction.
pub async fn extract_zip(archive: PathBuf, target: PathBuf) -> Result<usize, ProvisionError> {
    tokio::task::spawn_blocking(move || extract_zip_blocking(&archive, &target))
        .await
        .map_err(|e| ProvisionError::Extraction(format!("extraction task failed: {e}")))?
}

fn extract_zip_blocking(archive: &Path, target: &Path) -> Result<usize, ProvisionError> {
    let err = |what: &str, e: &dyn std::fmt::Display| {
        ProvisionError::Extraction(format!("{}: {what}: {e}", archive.display()))
    };

    let file = File::open(archive).map_err(|e| err("open", &e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| err("read", &e))?;
    fs::create_dir_all(target).map_err(|e| err("create target", &e))?;

    let mut files = 0usize;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| err("read entry", &e))?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            ProvisionError::Extraction(format!(
                "{}: entry '{}' escapes the extraction directory",
                archive.display(),
                entry.name()
            ))
        })?;
        let out_path = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| err("create dir", &e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| err("create dir", &e))?;
        }
        let mut out = File::create(&out_path).map_err(|e| err("create file", &e))?;
        io::copy(&mut entry, &mut out).map_err(|e| err("write file", &e))?;

        #[cfg(unix)]
        {
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o777))
                    .map_err(|e| err("set permissions", &e))?;
            }
        }

        files += 1;
    }

    if files == 0 {
        return Err(ProvisionError::Extraction(format!(
            "{}: archive contains no files",
            archive.display()
        )));
    }
    Ok(files)
}

/// Mark a file executable for its owner (no-op off unix).
pub fn make_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn extracts_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("tool-1.0/bin/tool", b"#!/bin/sh\n"), ("tool-1.0/README", b"hi")]);

        let target = dir.path().join("out");
        let n = extract_zip(archive, target.clone()).await.unwrap();
        assert_eq!(n, 2);
        assert!(target.join("tool-1.0").join("bin").join("tool").is_file());
    }

    #[tokio::test]
    async fn garbage_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        let err = extract_zip(archive, dir.path().join("out")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Extraction(_)));
    }

    #[tokio::test]
    async fn zip_slip_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("../evil.txt", b"x")]);

        let err = extract_zip(archive, dir.path().join("out")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Extraction(msg) if msg.contains("escapes")));
        assert!(!dir.path().join("evil.txt").exists());
    }
}

// src/exec/log_sink.rs

//! Per-task execution log.
//!
//! Lines from several pumps (stdout, stderr, runner notes) are funnelled
//! through one channel into a single writer task, which flushes after every
//! line so the log is readable while the tool is still running.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// CSI / OSC terminal control sequences.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("ANSI escape pattern is a valid regex")
});

/// Remove terminal control sequences from a line.
pub fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").into_owned()
}

/// Cheap handle for appending lines to the log.
#[derive(Debug, Clone)]
pub struct LogWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl LogWriter {
    pub fn line(&self, line: impl Into<String>) {
        // The sink only goes away after every writer is dropped.
        let _ = self.tx.send(line.into());
    }

    /// Append raw tool output: split on `\r` progress updates, strip escape
    /// sequences, drop blank fragments.
    pub fn output(&self, raw: &str) {
        for fragment in raw.split(['\r', '\n']) {
            let clean = strip_ansi(fragment);
            if !clean.trim().is_empty() {
                self.line(clean);
            }
        }
    }
}

/// Owner of the log file and its writer task.
#[derive(Debug)]
pub struct LogSink {
    writer: LogWriter,
    handle: JoinHandle<std::io::Result<()>>,
}

impl LogSink {
    /// Create (truncate) the log file and start the writer task.
    pub async fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path).await?;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let handle = tokio::spawn(async move {
            let mut out = BufWriter::new(file);
            while let Some(line) = rx.recv().await {
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                out.flush().await?;
            }
            out.flush().await
        });

        Ok(Self {
            writer: LogWriter { tx },
            handle,
        })
    }

    pub fn writer(&self) -> LogWriter {
        self.writer.clone()
    }

    /// Wait until every line sent so far is on disk.
    ///
    /// Writers cloned from this sink must be dropped first, otherwise this
    /// waits for them.
    pub async fn close(self) -> std::io::Result<()> {
        drop(self.writer);
        self.handle
            .await
            .map_err(|e| std::io::Error::other(format!("log writer task failed: {e}")))?
    }
}

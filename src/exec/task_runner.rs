// src/exec/task_runner.rs

//! Individual task process runner.
//!
//! A task expands into one or more invocations (per user, per module), run
//! one after another in the task's working directory. Everything they print
//! goes to `execution.log` in the task's output directory, except stdout of
//! commands that capture it into a result file.
//!
//! Output directories are stable across batches, so only files this run
//! created or changed count as the tool's output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::batch::TaskInstance;
use crate::catalog::{Invocation, RenderContext, Repeat};
use crate::errors::RunError;
use crate::exec::log_sink::{LogSink, LogWriter};
use crate::provision::ProvisionedBinary;
use crate::types::WorkingDir;

pub const LOG_FILE: &str = "execution.log";

/// Profile directories under `<triage>/Users` that are not real users.
const NON_USER_PROFILES: [&str; 4] = ["Default", "Default User", "Public", "All Users"];

/// How long output pumps may keep reading after the tool process is gone.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings shared by every task of a batch.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Interpreter substituted for `{python}`.
    pub python: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
        }
    }
}

/// Termination request channel for one task. Carries the grace period.
struct Termination {
    rx: oneshot::Receiver<Duration>,
    closed: bool,
    requested: Option<Duration>,
}

impl Termination {
    fn new(rx: oneshot::Receiver<Duration>) -> Self {
        Self {
            rx,
            closed: false,
            requested: None,
        }
    }

    /// Non-blocking check for a termination request.
    fn is_requested(&mut self) -> bool {
        if self.requested.is_some() {
            return true;
        }
        if !self.closed {
            match self.rx.try_recv() {
                Ok(grace) => {
                    self.closed = true;
                    self.requested = Some(grace);
                }
                Err(oneshot::error::TryRecvError::Closed) => self.closed = true,
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        self.requested.is_some()
    }

    /// Resolves once termination is requested; never resolves otherwise.
    async fn wait(&mut self) -> Duration {
        if let Some(grace) = self.requested {
            return grace;
        }
        if !self.closed {
            match (&mut self.rx).await {
                Ok(grace) => {
                    self.closed = true;
                    self.requested = Some(grace);
                    return grace;
                }
                Err(_) => self.closed = true,
            }
        }
        std::future::pending().await
    }
}

/// Run every invocation of `task` with `binary` and classify the result.
pub async fn run_task(
    task: &TaskInstance,
    binary: &ProvisionedBinary,
    settings: &RunnerSettings,
    terminate_rx: oneshot::Receiver<Duration>,
) -> Result<(), RunError> {
    fs::create_dir_all(&task.output_dir).await.map_err(|e| {
        RunError::Launch(format!("creating {}: {e}", task.output_dir.display()))
    })?;

    let log_path = task.output_dir.join(LOG_FILE);
    let sink = LogSink::create(&log_path)
        .await
        .map_err(|e| RunError::Launch(format!("creating {}: {e}", log_path.display())))?;
    let log = sink.writer();
    let before = OutputSnapshot::capture(&task.output_dir);

    let mut termination = Termination::new(terminate_rx);
    let result = run_invocations(task, binary, settings, &log, &mut termination).await;

    match &result {
        Ok(()) => log.line("=== task finished"),
        Err(e) => log.line(format!("=== task failed: {e}")),
    }
    drop(log);
    if let Err(e) = sink.close().await {
        warn!(task = %task.name, error = %e, "failed to finish execution log");
    }

    result?;

    if before.has_new_output(&task.output_dir) {
        Ok(())
    } else {
        Err(RunError::EmptyOutput)
    }
}

async fn run_invocations(
    task: &TaskInstance,
    binary: &ProvisionedBinary,
    settings: &RunnerSettings,
    log: &LogWriter,
    termination: &mut Termination,
) -> Result<(), RunError> {
    let def = &task.definition;

    let needs_users = def.commands.iter().any(|c| c.repeat() == Repeat::PerUser);
    let users = match (&task.triage_root, needs_users) {
        (Some(root), true) => {
            let users = list_users(root).await;
            if users.is_empty() {
                log.line(format!("no user profiles found under {}", root.join("Users").display()));
            }
            users
        }
        _ => Vec::new(),
    };

    let ctx = RenderContext {
        executable: &binary.executable,
        triage_root: task.triage_root.as_deref(),
        memory_image: task.memory_image.as_deref(),
        output_dir: &task.output_dir,
        python: &settings.python,
        timestamp: &task.timestamp,
    };

    let mut invocations = Vec::new();
    for command in &def.commands {
        let rendered = command
            .expand(&ctx, &users, &task.modules)
            .map_err(|e| RunError::Launch(format!("rendering `{command}`: {e}")))?;
        invocations.extend(rendered);
    }

    let working_dir = match def.working_dir {
        WorkingDir::Output => task.output_dir.clone(),
        WorkingDir::Tool => binary
            .executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| task.output_dir.clone()),
    };

    let total = invocations.len();
    for (i, invocation) in invocations.iter().enumerate() {
        if termination.is_requested() {
            log.line("termination requested; remaining commands not started");
            break;
        }

        info!(
            task = %task.name,
            step = i + 1,
            of = total,
            cmd = %invocation.display(),
            "starting tool process"
        );
        log.line(format!("=== [{}/{}] {}", i + 1, total, invocation.display()));

        let status = run_invocation(invocation, &working_dir, log, termination).await?;
        let code = status.code().unwrap_or(-1);
        log.line(format!("=== exit status {code}"));
        info!(task = %task.name, step = i + 1, exit_code = code, "tool process exited");

        if !status.success() {
            return Err(RunError::ProcessExit(code));
        }
    }

    Ok(())
}

async fn run_invocation(
    invocation: &Invocation,
    working_dir: &Path,
    log: &LogWriter,
    termination: &mut Termination,
) -> Result<ExitStatus, RunError> {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| {
        RunError::Launch(format!("{}: {e}", invocation.program.to_string_lossy()))
    })?;

    let stdout_pump = child.stdout.take().map(|out| match &invocation.stdout {
        Some(path) => spawn_capture(out, path.clone(), log.clone()),
        None => spawn_log_pump(out, log.clone()),
    });
    let stderr_pump = child.stderr.take().map(|err| spawn_log_pump(err, log.clone()));

    let status = tokio::select! {
        res = child.wait() => res,
        grace = termination.wait() => {
            log.line(format!("=== terminating (grace period {grace:?})"));
            terminate(&mut child, grace).await
        }
    };

    let pumps: Vec<_> = [stdout_pump, stderr_pump].into_iter().flatten().collect();
    drain_pumps(pumps, log).await;

    status.map_err(|e| RunError::Launch(format!("waiting for process: {e}")))
}

/// Wait for the output pumps to hit end-of-stream.
///
/// A background process the tool left behind keeps the pipes open; after
/// [`PUMP_DRAIN_TIMEOUT`] the pumps are aborted instead of waiting for it.
async fn drain_pumps(mut pumps: Vec<JoinHandle<()>>, log: &LogWriter) {
    let drained = tokio::time::timeout(PUMP_DRAIN_TIMEOUT, async {
        for pump in pumps.iter_mut() {
            if let Err(e) = pump.await {
                debug!(error = %e, "output pump task failed");
            }
        }
    })
    .await;

    if drained.is_err() {
        for pump in &pumps {
            pump.abort();
        }
        log.line("output streams still open after the tool exited; stopped reading them");
    }
}

/// Forward a stream line by line into the log.
fn spawn_log_pump<R>(reader: R, log: LogWriter) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => log.output(&String::from_utf8_lossy(&buf)),
                Err(e) => {
                    log.line(format!("output stream error: {e}"));
                    break;
                }
            }
        }
    })
}

/// Copy a stream into a result file; an empty result file is removed.
fn spawn_capture<R>(mut reader: R, path: PathBuf, log: LogWriter) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let written = async {
            let mut file = fs::File::create(&path).await?;
            let n = tokio::io::copy(&mut reader, &mut file).await?;
            tokio::io::AsyncWriteExt::flush(&mut file).await?;
            Ok::<u64, std::io::Error>(n)
        }
        .await;

        match written {
            Ok(0) => {
                let _ = fs::remove_file(&path).await;
                log.line(format!("no output captured for {}", path.display()));
            }
            Ok(n) => log.line(format!("captured {n} bytes to {}", path.display())),
            Err(e) => log.line(format!("capturing to {} failed: {e}", path.display())),
        }
    })
}

/// Ask the process group to stop, then kill it once the grace period is
/// over.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            signal_group(pid, libc::SIGTERM);
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                return status;
            }
            warn!(pid, "process ignored SIGTERM; killing its process group");
            signal_group(pid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    child.kill().await?;
    child.wait().await
}

/// Send `signal` to the process group led by `pid`.
#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    // SAFETY: `pid` is our own child, spawned as a group leader and not yet
    // reaped, so its group id cannot have been reused.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc != 0 {
        debug!(pid, signal, error = %std::io::Error::last_os_error(), "signalling process group failed");
    }
}

/// User profile directory names under `<triage>/Users`, sorted.
pub async fn list_users(triage_root: &Path) -> Vec<String> {
    let users_dir = triage_root.join("Users");
    let mut entries = match fs::read_dir(&users_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %users_dir.display(), error = %e, "cannot list user profiles");
            return Vec::new();
        }
    };

    let mut users = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_dir && !NON_USER_PROFILES.iter().any(|p| p.eq_ignore_ascii_case(&name)) {
            users.push(name);
        }
    }
    users.sort();
    users
}

/// Size and modification time of every file under an output directory,
/// taken before the tool runs. The execution log is never part of it.
#[derive(Debug, Default)]
pub struct OutputSnapshot {
    files: HashMap<PathBuf, (u64, Option<SystemTime>)>,
}

impl OutputSnapshot {
    pub fn capture(dir: &Path) -> Self {
        let files = output_files(dir)
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                Some((entry.into_path(), (meta.len(), meta.modified().ok())))
            })
            .collect();
        Self { files }
    }

    /// Whether some file under `dir` is new or differs from the snapshot.
    pub fn has_new_output(&self, dir: &Path) -> bool {
        output_files(dir).any(|entry| {
            let stamp = entry.metadata().ok().map(|m| (m.len(), m.modified().ok()));
            match (self.files.get(entry.path()), stamp) {
                (Some(before), Some(now)) => *before != now,
                (None, _) => true,
                (Some(_), None) => false,
            }
        })
    }
}

/// Files at any depth, excluding the execution log.
fn output_files(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| {
            entry.file_type().is_file() && !(entry.depth() == 1 && entry.file_name() == LOG_FILE)
        })
}

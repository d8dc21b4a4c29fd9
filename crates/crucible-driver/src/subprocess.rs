use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use crucible_domain::OutputStream;
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::{Driver, Handle, LogStream, WaitOutcome, WaitReason};
use crate::error::DriverError;
use crate::limits::SandboxLimits;

const LOG_CHANNEL_CAPACITY: usize = 1024;

pub(crate) fn interpreter_for(language: &str) -> Result<(&'static str, &'static str), DriverError> {
    match language {
        "python" | "python3" => Ok(("python3", "py")),
        "javascript" | "node" | "nodejs" => Ok(("node", "js")),
        other => Err(DriverError::UnsupportedLanguage(other.to_string())),
    }
}

fn handle_id(handle: &Handle) -> Result<String, DriverError> {
    handle
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| DriverError::Internal("malformed subprocess driver handle".to_string()))
}

struct ProcessState {
    _workdir: TempDir,
    interpreter: &'static str,
    script_path: PathBuf,
    limits: SandboxLimits,
    child: Option<Child>,
    killed_by_us: Arc<AtomicBool>,
    log_tx: Arc<Mutex<Option<broadcast::Sender<(OutputStream, Bytes)>>>>,
}

/// Builds the concrete `Command` that runs `interpreter script` for one
/// backend flavor — a plain invocation for [`crate::ProcessDriver`], or a
/// `runsc do ...`-wrapped one for [`crate::GvisorDriver`].
pub(crate) type CommandBuilder = Arc<dyn Fn(&str, &Path) -> Command + Send + Sync>;

/// Shared engine behind every subprocess-flavored [`Driver`]: spawn, merge
/// stdout+stderr into a single tagged broadcast log channel, enforce the
/// wait timeout with kill-on-expiry, and guarantee scratch-space cleanup
/// on destroy.
///
/// Grounded directly on the IaC-subprocess pattern: two concurrently
/// spawned line readers feeding a channel, with a hard timeout around
/// collection that kills the child on expiry.
pub(crate) struct SubprocessBackend {
    name: &'static str,
    registry: Arc<RwLock<HashMap<String, ProcessState>>>,
    command_builder: CommandBuilder,
}

impl SubprocessBackend {
    pub(crate) fn new(name: &'static str, command_builder: CommandBuilder) -> Self {
        Self { name, registry: Arc::new(RwLock::new(HashMap::new())), command_builder }
    }

    fn classify_exit(status: ExitStatus, killed_by_us: bool) -> WaitOutcome {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                if sig == 9 {
                    let reason = if killed_by_us { WaitReason::Killed } else { WaitReason::Oom };
                    return WaitOutcome { exit_code: 137, reason };
                }
                return WaitOutcome { exit_code: 128 + sig, reason: WaitReason::Killed };
            }
        }
        let _ = killed_by_us;
        WaitOutcome { exit_code: status.code().unwrap_or(-1), reason: WaitReason::Normal }
    }
}

#[async_trait]
impl Driver for SubprocessBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn create(&self, code: &str, language: &str, limits: &SandboxLimits) -> Result<Handle, DriverError> {
        let (interpreter, ext) = interpreter_for(language)?;

        let workdir = tempfile::Builder::new()
            .prefix("crucible-sbx-")
            .tempdir()
            .map_err(|e| DriverError::Internal(format!("scratch dir: {e}")))?;
        let script_path = workdir.path().join(format!("submission.{ext}"));
        tokio::fs::write(&script_path, code).await.map_err(|e| DriverError::Internal(format!("write code: {e}")))?;

        let id = Uuid::new_v4().to_string();
        let state = ProcessState {
            _workdir: workdir,
            interpreter,
            script_path,
            limits: limits.clone(),
            child: None,
            killed_by_us: Arc::new(AtomicBool::new(false)),
            log_tx: Arc::new(Mutex::new(None)),
        };
        self.registry.write().await.insert(id.clone(), state);

        Ok(json!({ "driver": self.name, "id": id }))
    }

    async fn start(&self, handle: &Handle) -> Result<(), DriverError> {
        let id = handle_id(handle)?;
        let mut guard = self.registry.write().await;
        let state = guard.get_mut(&id).ok_or_else(|| DriverError::Internal(format!("unknown handle {id}")))?;

        let interpreter = state.interpreter;
        let mut cmd = (self.command_builder)(interpreter, &state.script_path);
        cmd.current_dir(state.script_path.parent().expect("script has a parent dir"))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default());

        apply_resource_limits(&mut cmd, &state.limits);

        let mut child =
            cmd.spawn().map_err(|e| DriverError::StartFailed(format!("spawn {interpreter}: {e}")))?;
        info!(id, backend = self.name, interpreter, "sandbox process started");

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let (tx, _rx) = broadcast::channel::<(OutputStream, Bytes)>(LOG_CHANNEL_CAPACITY);

        let tx1 = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "crucible::sandbox", "{line}");
                let _ = tx1.send((OutputStream::Stdout, Bytes::from(format!("{line}\n"))));
            }
        });

        let tx2 = tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "crucible::sandbox", "{line}");
                let _ = tx2.send((OutputStream::Stderr, Bytes::from(format!("{line}\n"))));
            }
        });

        state.log_tx = Arc::new(Mutex::new(Some(tx)));
        let log_tx_cell = state.log_tx.clone();
        tokio::spawn(async move {
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            // Dropping the sender closes the channel; that's how
            // stream_logs' consumers learn the stream is finite.
            *log_tx_cell.lock().await = None;
        });

        state.child = Some(child);
        Ok(())
    }

    async fn wait(&self, handle: &Handle, timeout: Duration) -> Result<WaitOutcome, DriverError> {
        let id = handle_id(handle)?;
        let (mut child, killed_by_us) = {
            let mut guard = self.registry.write().await;
            let state = guard.get_mut(&id).ok_or_else(|| DriverError::Internal(format!("unknown handle {id}")))?;
            let child = state
                .child
                .take()
                .ok_or_else(|| DriverError::Internal("wait called before start or already consumed".to_string()))?;
            (child, state.killed_by_us.clone())
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Ok(Self::classify_exit(status, killed_by_us.load(Ordering::SeqCst))),
            Ok(Err(e)) => Err(DriverError::Internal(format!("wait: {e}"))),
            Err(_) => {
                warn!(id, "sandbox exceeded its wait timeout, killing");
                let _ = child.kill().await;
                Ok(WaitOutcome { exit_code: 124, reason: WaitReason::Timeout })
            }
        }
    }

    async fn stream_logs(&self, handle: &Handle) -> Result<LogStream, DriverError> {
        let id = handle_id(handle)?;
        let log_tx_cell = {
            let guard = self.registry.read().await;
            let state = guard.get(&id).ok_or_else(|| DriverError::Internal(format!("unknown handle {id}")))?;
            state.log_tx.clone()
        };

        let tx = log_tx_cell.lock().await.clone().ok_or_else(|| {
            DriverError::Internal("stream_logs called before start or after completion".to_string())
        })?;
        let rx = tx.subscribe();

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(chunk) => return Some((chunk, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn kill(&self, handle: &Handle) -> Result<(), DriverError> {
        let id = handle_id(handle)?;
        let mut guard = self.registry.write().await;
        if let Some(state) = guard.get_mut(&id) {
            state.killed_by_us.store(true, Ordering::SeqCst);
            if let Some(child) = state.child.as_mut() {
                let _ = child.kill().await;
            }
        }
        Ok(())
    }

    async fn destroy(&self, handle: &Handle) -> Result<(), DriverError> {
        let id = handle_id(handle)?;
        let mut guard = self.registry.write().await;
        if let Some(mut state) = guard.remove(&id) {
            if let Some(mut child) = state.child.take() {
                let _ = child.kill().await;
            }
            // _workdir (TempDir) drops here, discarding the scratch space.
        }
        Ok(())
    }
}

#[cfg(unix)]
fn apply_resource_limits(cmd: &mut Command, limits: &SandboxLimits) {
    use std::os::unix::process::CommandExt;

    let memory_bytes = limits.memory_bytes;
    unsafe {
        cmd.pre_exec(move || {
            rlimit::setrlimit(rlimit::Resource::AS, memory_bytes, memory_bytes)?;
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_resource_limits(_cmd: &mut Command, _limits: &SandboxLimits) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_builder() -> CommandBuilder {
        Arc::new(|interpreter, script| {
            let mut cmd = Command::new(interpreter);
            cmd.arg(script);
            cmd
        })
    }

    #[tokio::test]
    async fn create_rejects_unmapped_language() {
        let backend = SubprocessBackend::new("test", plain_builder());
        let err = backend.create("print(1)", "cobol", &SandboxLimits::default()).await.unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedLanguage(_)));
    }

    #[tokio::test]
    async fn full_lifecycle_runs_a_python_print() {
        let backend = SubprocessBackend::new("test", plain_builder());
        let handle = backend.create("print('hi')", "python", &SandboxLimits::default()).await.unwrap();
        backend.start(&handle).await.unwrap();
        let outcome = backend.wait(&handle, Duration::from_secs(10)).await.unwrap();
        assert_eq!(outcome.reason, WaitReason::Normal);
        assert_eq!(outcome.exit_code, 0);
        backend.destroy(&handle).await.unwrap();
        backend.destroy(&handle).await.unwrap(); // idempotent
    }

    #[tokio::test]
    async fn wait_past_timeout_kills_and_reports_timeout() {
        let backend = SubprocessBackend::new("test", plain_builder());
        let handle = backend
            .create("import time\nwhile True:\n    time.sleep(1)\n", "python", &SandboxLimits::default())
            .await
            .unwrap();
        backend.start(&handle).await.unwrap();
        let outcome = backend.wait(&handle, Duration::from_millis(200)).await.unwrap();
        assert_eq!(outcome.reason, WaitReason::Timeout);
        backend.destroy(&handle).await.unwrap();
    }
}

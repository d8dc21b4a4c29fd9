use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::driver::{Driver, Handle, LogStream, WaitOutcome};
use crate::error::DriverError;
use crate::limits::SandboxLimits;
use crate::subprocess::SubprocessBackend;

fn find_runsc() -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).map(|dir| dir.join("runsc")).find(|candidate| candidate.is_file())
    })
}

/// Same subprocess shape as [`crate::ProcessDriver`], with the interpreter
/// invocation wrapped in `runsc do` so the submission actually runs inside a
/// gVisor sandbox rather than directly on the host kernel.
///
/// Falls back to an unwrapped subprocess, mirroring the stub-beside-real
/// pattern used for backends that need a binary the local environment may
/// not have installed — `runsc` missing degrades to the same isolation
/// [`crate::ProcessDriver`] provides rather than failing every submission.
pub struct GvisorDriver {
    backend: SubprocessBackend,
    runsc_available: bool,
}

impl GvisorDriver {
    pub fn new() -> Self {
        let runsc_path = find_runsc();
        let runsc_available = runsc_path.is_some();

        if !runsc_available {
            warn!("runsc not found on PATH, gvisor driver will fall back to an unwrapped subprocess");
        }

        let builder = match runsc_path {
            Some(path) => {
                let path = Arc::new(path);
                Arc::new(move |interpreter: &str, script: &std::path::Path| {
                    let mut cmd = Command::new(path.as_ref());
                    cmd.args(["do", "--network=none", "--overlay"]).arg(interpreter).arg(script);
                    cmd
                }) as crate::subprocess::CommandBuilder
            }
            None => Arc::new(|interpreter: &str, script: &std::path::Path| {
                let mut cmd = Command::new(interpreter);
                cmd.arg(script);
                cmd
            }) as crate::subprocess::CommandBuilder,
        };

        info!(runsc_available, "gvisor driver initialized");
        Self { backend: SubprocessBackend::new("gvisor", builder), runsc_available }
    }

    /// True when submissions are actually running inside `runsc`, false
    /// when this instance degraded to a bare subprocess.
    pub fn is_sandboxed(&self) -> bool {
        self.runsc_available
    }
}

impl Default for GvisorDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for GvisorDriver {
    fn name(&self) -> &'static str {
        self.backend.name()
    }

    async fn create(&self, code: &str, language: &str, limits: &SandboxLimits) -> Result<Handle, DriverError> {
        self.backend.create(code, language, limits).await
    }

    async fn start(&self, handle: &Handle) -> Result<(), DriverError> {
        self.backend.start(handle).await
    }

    async fn wait(&self, handle: &Handle, timeout: Duration) -> Result<WaitOutcome, DriverError> {
        self.backend.wait(handle, timeout).await
    }

    async fn stream_logs(&self, handle: &Handle) -> Result<LogStream, DriverError> {
        self.backend.stream_logs(handle).await
    }

    async fn kill(&self, handle: &Handle) -> Result<(), DriverError> {
        self.backend.kill(handle).await
    }

    async fn destroy(&self, handle: &Handle) -> Result<(), DriverError> {
        self.backend.destroy(handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_when_runsc_is_not_on_path() {
        // Test environments never have runsc installed, so this should
        // always exercise the fallback branch.
        let driver = GvisorDriver::new();
        assert!(!driver.is_sandboxed());
    }

    #[tokio::test]
    async fn create_rejects_unmapped_language() {
        let driver = GvisorDriver::new();
        let err = driver.create("print(1)", "cobol", &SandboxLimits::default()).await.unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedLanguage(_)));
    }
}

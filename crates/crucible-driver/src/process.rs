use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::driver::{Driver, Handle, LogStream, WaitOutcome};
use crate::error::DriverError;
use crate::limits::SandboxLimits;
use crate::subprocess::SubprocessBackend;

/// Runs a submission as a plain OS subprocess. Stands in for container-runtime
/// isolation in local/dev and CI, where the remaining backends aren't
/// available.
pub struct ProcessDriver(SubprocessBackend);

impl ProcessDriver {
    pub fn new() -> Self {
        Self(SubprocessBackend::new(
            "process",
            Arc::new(|interpreter, script| {
                let mut cmd = Command::new(interpreter);
                cmd.arg(script);
                cmd
            }),
        ))
    }
}

impl Default for ProcessDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for ProcessDriver {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    async fn create(&self, code: &str, language: &str, limits: &SandboxLimits) -> Result<Handle, DriverError> {
        self.0.create(code, language, limits).await
    }

    async fn start(&self, handle: &Handle) -> Result<(), DriverError> {
        self.0.start(handle).await
    }

    async fn wait(&self, handle: &Handle, timeout: Duration) -> Result<WaitOutcome, DriverError> {
        self.0.wait(handle, timeout).await
    }

    async fn stream_logs(&self, handle: &Handle) -> Result<LogStream, DriverError> {
        self.0.stream_logs(handle).await
    }

    async fn kill(&self, handle: &Handle) -> Result<(), DriverError> {
        self.0.kill(handle).await
    }

    async fn destroy(&self, handle: &Handle) -> Result<(), DriverError> {
        self.0.destroy(handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::WaitReason;

    #[tokio::test]
    async fn create_rejects_unmapped_language() {
        let driver = ProcessDriver::new();
        let err = driver.create("print(1)", "cobol", &SandboxLimits::default()).await.unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedLanguage(_)));
    }

    #[tokio::test]
    async fn full_lifecycle_runs_a_python_print() {
        let driver = ProcessDriver::new();
        let handle = driver.create("print('hi')", "python", &SandboxLimits::default()).await.unwrap();
        driver.start(&handle).await.unwrap();
        let outcome = driver.wait(&handle, Duration::from_secs(10)).await.unwrap();
        assert_eq!(outcome.reason, WaitReason::Normal);
        assert_eq!(outcome.exit_code, 0);
        driver.destroy(&handle).await.unwrap();
        driver.destroy(&handle).await.unwrap(); // idempotent
    }

    #[tokio::test]
    async fn wait_past_timeout_kills_and_reports_timeout() {
        let driver = ProcessDriver::new();
        let handle = driver
            .create("import time\nwhile True:\n    time.sleep(1)\n", "python", &SandboxLimits::default())
            .await
            .unwrap();
        driver.start(&handle).await.unwrap();
        let outcome = driver.wait(&handle, Duration::from_millis(200)).await.unwrap();
        assert_eq!(outcome.reason, WaitReason::Timeout);
        driver.destroy(&handle).await.unwrap();
    }
}

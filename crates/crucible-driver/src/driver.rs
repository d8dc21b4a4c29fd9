use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use crucible_domain::OutputStream;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::limits::SandboxLimits;

/// Opaque handle a driver returns from `create` and consumes for every
/// subsequent call. Each backend encodes whatever it needs (a process
/// registry key, a Kubernetes Job name) into the JSON value.
pub type Handle = serde_json::Value;

/// Lazy, finite sequence of tagged chunks: stdout and stderr merged into
/// one arrival-ordered stream, each chunk carrying which of the two it
/// came from, terminating when the sandbox terminates. Not restartable
/// once consumed.
///
/// Backends that can't distinguish the two streams at the source (see
/// [`crate::K8sJobDriver`]) tag every chunk the same way and document it.
pub type LogStream = BoxStream<'static, (OutputStream, Bytes)>;

/// Why `wait` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitReason {
    Normal,
    Timeout,
    Killed,
    Oom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitOutcome {
    pub exit_code: i32,
    pub reason: WaitReason,
}

/// One isolated execution, polymorphic over the backend that actually runs
/// it (process/container-runtime, gVisor, Kubernetes Job).
///
/// Backend-specific error shapes never leak past this trait — every
/// implementation converts into [`DriverError`] before returning.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Allocates, does not start. `resource_exhausted` if host limits are
    /// reached; `unsupported_language` if the language tag has no mapped
    /// runnable image/profile.
    async fn create(&self, code: &str, language: &str, limits: &SandboxLimits) -> Result<Handle, DriverError>;

    /// Begins execution. After this call, `wait` and `stream_logs` are valid.
    async fn start(&self, handle: &Handle) -> Result<(), DriverError>;

    /// Blocks up to `timeout`; if it elapses the driver MUST kill the
    /// sandbox and return `WaitReason::Timeout`.
    async fn wait(&self, handle: &Handle, timeout: Duration) -> Result<WaitOutcome, DriverError>;

    /// Produces stdout+stderr merged in arrival order, each chunk tagged
    /// with its origin stream.
    async fn stream_logs(&self, handle: &Handle) -> Result<LogStream, DriverError>;

    /// Forces termination; idempotent.
    async fn kill(&self, handle: &Handle) -> Result<(), DriverError>;

    /// Releases all resources; MUST succeed even if already destroyed.
    async fn destroy(&self, handle: &Handle) -> Result<(), DriverError>;
}

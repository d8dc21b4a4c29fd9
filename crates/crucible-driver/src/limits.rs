use std::time::Duration;

/// Mandatory isolation properties every backend enforces regardless of
/// which runtime actually executes the code: no network egress by
/// default, read-only root filesystem, bounded memory/CPU, no privilege
/// escalation, bounded wall-clock, ephemeral scratch space.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub memory_bytes: u64,
    pub cpu_millis: u32,
    pub timeout: Duration,
    pub network_egress: bool,
    pub read_only_root: bool,
}

impl SandboxLimits {
    pub fn new(memory_bytes: u64, cpu_millis: u32, timeout: Duration) -> Self {
        Self { memory_bytes, cpu_millis, timeout, network_egress: false, read_only_root: true }
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::new(512 * 1024 * 1024, 1000, Duration::from_secs(30))
    }
}

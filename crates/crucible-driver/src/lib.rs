mod driver;
mod error;
mod gvisor;
mod k8s;
mod limits;
mod process;
mod registry;
mod subprocess;

pub use driver::{Driver, Handle, LogStream, WaitOutcome, WaitReason};
pub use error::DriverError;
pub use gvisor::GvisorDriver;
pub use k8s::K8sJobDriver;
pub use limits::SandboxLimits;
pub use process::ProcessDriver;
pub use registry::DriverRegistry;

mod error;
mod fanout_bus;
mod handle;
mod reconcile;

pub use error::ReconcileError;
pub use fanout_bus::ReconcilingBus;
pub use handle::ReconcilerHandle;
pub use reconcile::{reconcile_event, Reconciler, ReconcileOutcome};

//! opdisco controller: keeps each Operator's status in sync with the
//! resources labeled as its components, and creates Operators on demand for
//! labeled resources.

#![forbid(unsafe_code)]

mod backoff;
mod error;
mod memory;
mod observed;
mod reconciler;
mod runner;
mod store;

pub use backoff::Backoff;
pub use error::{ReconcileError, StoreError};
pub use memory::{MemoryStore, StoreOp};
pub use observed::ObservedSet;
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use runner::{component_requests, error_policy, on_controller_result, reconcile_operator, run, Context, ControllerConfig};
pub use store::{KubeStore, ResourceStore};

//! Fleet domain: the task model, the pending/launched registry, scaling
//! reconciliation, and restart orchestration.

pub mod reconciler;
pub mod registry;
pub mod restart;
pub mod task;

pub use reconciler::{FleetStats, ScaleOutcome, TypeStats};
pub use registry::TaskRegistry;
pub use restart::{FleetEvent, RestartConfig, RestartOrchestrator, RestartOutcome};
pub use task::{InstanceName, RuntimeInfo, TaskDefinition, TaskInstance, TaskState};

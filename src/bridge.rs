//! Contract with the external cluster scheduler.
//!
//! The scheduler library is an external collaborator: this crate only pushes
//! task descriptions onto the pending collection and eventually hears back.
//! The bridge carries the two halves of that conversation:
//!
//! - **Outbound**: [`SchedulerBridge::kill`] enqueues a kill command. The
//!   scheduler drains the channel and makes at least one delivery attempt;
//!   there is no synchronous confirmation of success.
//! - **Inbound**: the scheduler feeds [`SchedulerEvent`]s to the fleet
//!   server. When a launch is applied, the bridge re-broadcasts a
//!   [`LaunchNotice`] scoped to the launched instance's unique id, which is
//!   what the restart orchestrator's wait logic filters on.

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::fleet::task::{InstanceName, RuntimeInfo, TaskState};

const LAUNCH_CHANNEL_CAPACITY: usize = 64;

/// Request to terminate one task, addressed by scheduler identifiers.
#[derive(Debug, Clone)]
pub struct KillCommand {
    pub task_id: String,
    pub agent_id: String,
}

/// Broadcast when a pending instance transitions to launched.
#[derive(Debug, Clone)]
pub struct LaunchNotice {
    /// Unique id of the instance that launched (not its fleet name; the
    /// name is shared with the original during a restart).
    pub instance: Uuid,
    pub name: InstanceName,
}

/// Notifications pushed by the external scheduler into the fleet server.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A pending instance was accepted and is running on an agent.
    TaskLaunched { instance: Uuid, runtime: RuntimeInfo },
    /// Lifecycle or health transition for a launched task.
    StatusUpdate {
        task_id: String,
        state: TaskState,
        healthy: Option<bool>,
    },
    /// Liveness signal; feeds the health endpoint.
    Heartbeat,
}

/// Handle for talking to the external scheduler. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SchedulerBridge {
    kill_tx: mpsc::UnboundedSender<KillCommand>,
    launch_tx: broadcast::Sender<LaunchNotice>,
}

impl SchedulerBridge {
    /// Create a bridge, returning the receiver half of the kill channel for
    /// the scheduler to drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<KillCommand>) {
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let (launch_tx, _) = broadcast::channel(LAUNCH_CHANNEL_CAPACITY);
        (Self { kill_tx, launch_tx }, kill_rx)
    }

    /// Enqueue a kill command for the scheduler.
    pub fn kill(&self, task_id: &str, agent_id: &str) {
        tracing::info!(task_id, agent_id, "Sending kill command");
        if self
            .kill_tx
            .send(KillCommand {
                task_id: task_id.to_string(),
                agent_id: agent_id.to_string(),
            })
            .is_err()
        {
            tracing::warn!(task_id, "Scheduler kill channel closed, command dropped");
        }
    }

    /// Subscribe to launch notices. Subscribers only see notices sent after
    /// the subscription, so subscribe before enqueueing the instance whose
    /// launch is awaited.
    pub fn subscribe_launches(&self) -> broadcast::Receiver<LaunchNotice> {
        self.launch_tx.subscribe()
    }

    /// Re-broadcast a launch that has been applied to the registry.
    pub(crate) fn notify_launched(&self, notice: LaunchNotice) {
        // No subscribers is fine; nobody is waiting on a restart.
        let _ = self.launch_tx.send(notice);
    }
}

//! In-process stand-in for the external cluster scheduler.
//!
//! Real deployments connect the [`SchedulerLink`](crate::server::SchedulerLink)
//! to an actual scheduler client. For local runs and end-to-end tests this
//! driver fills that seat: it launches every pending instance after a short
//! delay and answers kill commands with terminal status updates.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Duration;
use uuid::Uuid;

use crate::bridge::{KillCommand, SchedulerEvent};
use crate::fleet::task::{RuntimeInfo, TaskState};
use crate::fleet::TaskRegistry;
use crate::server::SchedulerLink;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct LocalDriver {
    registry: Arc<RwLock<TaskRegistry>>,
    link: SchedulerLink,
    /// Instances already reported launched, so a notice is only sent once
    /// even while the fleet server has not yet drained the event channel.
    launched: HashSet<Uuid>,
}

impl LocalDriver {
    pub fn new(registry: Arc<RwLock<TaskRegistry>>, link: SchedulerLink) -> Self {
        Self {
            registry,
            link,
            launched: HashSet::new(),
        }
    }

    /// Run the driver loop: poll the pending collection and drain kills.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.launch_pending().await;
                    if self.link.events.send(SchedulerEvent::Heartbeat).await.is_err() {
                        break;
                    }
                }
                kill = self.link.kills.recv() => {
                    let Some(kill) = kill else { break };
                    self.handle_kill(kill).await;
                }
            }
        }
        tracing::debug!("Local driver stopped");
    }

    async fn launch_pending(&mut self) {
        let to_launch: Vec<Uuid> = {
            let registry = self.registry.read().await;
            registry
                .pending()
                .iter()
                .filter(|inst| !self.launched.contains(&inst.id))
                .map(|inst| inst.id)
                .collect()
        };

        for instance in to_launch {
            self.launched.insert(instance);
            let runtime = RuntimeInfo {
                task_id: Uuid::new_v4().to_string(),
                agent_id: "local".to_string(),
                state: TaskState::Running,
                restarting: false,
                healthy: Some(true),
            };
            tracing::debug!(%instance, task_id = %runtime.task_id, "Local driver launching instance");
            if self
                .link
                .events
                .send(SchedulerEvent::TaskLaunched { instance, runtime })
                .await
                .is_err()
            {
                return;
            }
        }
    }

    async fn handle_kill(&mut self, kill: KillCommand) {
        tracing::debug!(task_id = %kill.task_id, "Local driver killing task");
        let _ = self
            .link
            .events
            .send(SchedulerEvent::StatusUpdate {
                task_id: kill.task_id,
                state: TaskState::Killed,
                healthy: None,
            })
            .await;
    }
}

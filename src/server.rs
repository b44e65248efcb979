//! The fleet server: one serialized command loop over the task registry.
//!
//! Every fleet-mutating operation (scale, restart, rolling restart, bulk
//! kill) arrives as a [`FleetMessage`] on a single channel and is processed
//! one at a time, so only one administrative mutation is ever in flight.
//! Scheduler events arrive on a second channel and are applied by the same
//! loop, which keeps registry writes to single critical sections between
//! suspension points.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::bridge::{KillCommand, LaunchNotice, SchedulerBridge, SchedulerEvent};
use crate::error::{FleetError, Result};
use crate::fleet::reconciler::{self, FleetStats, ScaleOutcome, TypeStats};
use crate::fleet::restart::{FleetEvent, RestartConfig, RestartOrchestrator};
use crate::fleet::{TaskDefinition, TaskRegistry};

const COMMAND_CHANNEL_CAPACITY: usize = 100;
const SCHEDULER_EVENT_CHANNEL_CAPACITY: usize = 100;

/// How long after the last scheduler heartbeat the server still reports
/// itself healthy.
const HEARTBEAT_WINDOW: Duration = Duration::from_secs(60);

/// Which launched instances a rolling restart covers.
#[derive(Debug, Clone)]
pub enum RestartScope {
    Fleet,
    Type(String),
}

/// Commands for the fleet server loop.
#[derive(Debug)]
pub enum FleetMessage {
    TypeStats {
        reply: oneshot::Sender<Vec<TypeStats>>,
    },
    FleetStats {
        reply: oneshot::Sender<FleetStats>,
    },
    Scale {
        type_name: String,
        desired: i64,
        reply: oneshot::Sender<ScaleOutcome>,
    },
    /// Fire-and-forget: the restart runs in the background, completion is
    /// observable only through fleet events.
    RestartTask { task_id: String },
    RollingRestart { scope: RestartScope },
    KillAll {
        reply: oneshot::Sender<u32>,
    },
    KillAllOfType {
        type_name: String,
        reply: oneshot::Sender<u32>,
    },
    Healthy {
        reply: oneshot::Sender<bool>,
    },
}

/// Cheap-to-clone handle for talking to the fleet server loop.
#[derive(Debug, Clone)]
pub struct FleetHandle {
    tx: mpsc::Sender<FleetMessage>,
}

impl FleetHandle {
    pub async fn type_stats(&self) -> Result<Vec<TypeStats>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FleetMessage::TypeStats { reply })
            .await
            .map_err(|_| FleetError::ChannelClosed)?;
        rx.await.map_err(|_| FleetError::ChannelClosed)
    }

    pub async fn fleet_stats(&self) -> Result<FleetStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FleetMessage::FleetStats { reply })
            .await
            .map_err(|_| FleetError::ChannelClosed)?;
        rx.await.map_err(|_| FleetError::ChannelClosed)
    }

    pub async fn scale(&self, type_name: &str, desired: i64) -> Result<ScaleOutcome> {
        let (reply, rx) = oneshot::channel();
        let msg = FleetMessage::Scale {
            type_name: type_name.to_string(),
            desired,
            reply,
        };
        self.tx.send(msg).await.map_err(|_| FleetError::ChannelClosed)?;
        rx.await.map_err(|_| FleetError::ChannelClosed)
    }

    /// Ack means enqueued, not restarted; watch fleet events for completion.
    pub async fn restart_task(&self, task_id: &str) -> Result<()> {
        self.tx
            .send(FleetMessage::RestartTask {
                task_id: task_id.to_string(),
            })
            .await
            .map_err(|_| FleetError::ChannelClosed)
    }

    pub async fn rolling_restart(&self, scope: RestartScope) -> Result<()> {
        self.tx
            .send(FleetMessage::RollingRestart { scope })
            .await
            .map_err(|_| FleetError::ChannelClosed)
    }

    pub async fn kill_all(&self) -> Result<u32> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FleetMessage::KillAll { reply })
            .await
            .map_err(|_| FleetError::ChannelClosed)?;
        rx.await.map_err(|_| FleetError::ChannelClosed)
    }

    pub async fn kill_all_of_type(&self, type_name: &str) -> Result<u32> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FleetMessage::KillAllOfType {
                type_name: type_name.to_string(),
                reply,
            })
            .await
            .map_err(|_| FleetError::ChannelClosed)?;
        rx.await.map_err(|_| FleetError::ChannelClosed)
    }

    pub async fn healthy(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FleetMessage::Healthy { reply })
            .await
            .map_err(|_| FleetError::ChannelClosed)?;
        rx.await.map_err(|_| FleetError::ChannelClosed)
    }
}

/// The external scheduler's side of the wiring: where it pushes events and
/// where it drains kill commands.
pub struct SchedulerLink {
    pub events: mpsc::Sender<SchedulerEvent>,
    pub kills: mpsc::UnboundedReceiver<KillCommand>,
}

pub struct FleetServer {
    registry: Arc<RwLock<TaskRegistry>>,
    bridge: SchedulerBridge,
    orchestrator: RestartOrchestrator,
    command_rx: mpsc::Receiver<FleetMessage>,
    event_rx: mpsc::Receiver<SchedulerEvent>,
    last_heartbeat: Instant,
    rolling_cancel: Option<CancellationToken>,
}

impl FleetServer {
    pub fn new(
        catalog: impl IntoIterator<Item = TaskDefinition>,
        restart_config: RestartConfig,
    ) -> (Self, FleetHandle, SchedulerLink) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(SCHEDULER_EVENT_CHANNEL_CAPACITY);
        let (bridge, kill_rx) = SchedulerBridge::new();

        let registry = Arc::new(RwLock::new(TaskRegistry::new(catalog)));
        let orchestrator =
            RestartOrchestrator::new(registry.clone(), bridge.clone(), restart_config);

        let server = Self {
            registry,
            bridge,
            orchestrator,
            command_rx,
            event_rx,
            last_heartbeat: Instant::now(),
            rolling_cancel: None,
        };
        let handle = FleetHandle { tx: command_tx };
        let link = SchedulerLink {
            events: event_tx,
            kills: kill_rx,
        };
        (server, handle, link)
    }

    /// Shared registry, for the local driver and tests.
    pub fn registry(&self) -> Arc<RwLock<TaskRegistry>> {
        self.registry.clone()
    }

    /// Subscribe to restart completion signals.
    pub fn subscribe_events(&self) -> broadcast::Receiver<FleetEvent> {
        self.orchestrator.subscribe_events()
    }

    /// Bring every catalog type up to its configured instance count through
    /// the ordinary scale path.
    async fn populate(&self) {
        let mut registry = self.registry.write().await;
        let targets: Vec<(String, i64)> = registry
            .definitions()
            .filter(|def| def.instances > 0)
            .map(|def| (def.name.clone(), i64::from(def.instances)))
            .collect();
        for (type_name, instances) in targets {
            tracing::info!(task_type = %type_name, instances, "Populating initial instances");
            reconciler::scale(&mut registry, &self.bridge, &type_name, instances);
        }
    }

    /// Run the server loop until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        self.populate().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Some(cancel) = self.rolling_cancel.take() {
                        cancel.cancel();
                    }
                    tracing::info!("Fleet server shutting down");
                    break;
                }
                msg = self.command_rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle_command(msg).await;
                }
                event = self.event_rx.recv() => {
                    let Some(event) = event else { break };
                    self.apply_scheduler_event(event).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, msg: FleetMessage) {
        match msg {
            FleetMessage::TypeStats { reply } => {
                let registry = self.registry.read().await;
                let _ = reply.send(reconciler::type_stats(&registry));
            }
            FleetMessage::FleetStats { reply } => {
                let registry = self.registry.read().await;
                let _ = reply.send(reconciler::fleet_stats(&registry));
            }
            FleetMessage::Scale {
                type_name,
                desired,
                reply,
            } => {
                let mut registry = self.registry.write().await;
                let outcome = reconciler::scale(&mut registry, &self.bridge, &type_name, desired);
                let _ = reply.send(outcome);
            }
            FleetMessage::RestartTask { task_id } => {
                let orchestrator = self.orchestrator.clone();
                tokio::spawn(async move {
                    orchestrator.restart_task(&task_id, false).await;
                });
            }
            FleetMessage::RollingRestart { scope } => {
                let task_ids = self.snapshot_task_ids(&scope).await;
                let token = self.orchestrator.rolling_restart(task_ids);
                // Latest rollout wins the cancellation slot; earlier ones
                // still run to completion on their own.
                self.rolling_cancel = Some(token);
            }
            FleetMessage::KillAll { reply } => {
                let registry = self.registry.read().await;
                let _ = reply.send(reconciler::kill_all(&registry, &self.bridge));
            }
            FleetMessage::KillAllOfType { type_name, reply } => {
                let registry = self.registry.read().await;
                let _ = reply.send(reconciler::kill_all_of_type(
                    &registry,
                    &self.bridge,
                    &type_name,
                ));
            }
            FleetMessage::Healthy { reply } => {
                let _ = reply.send(self.last_heartbeat.elapsed() < HEARTBEAT_WINDOW);
            }
        }
    }

    /// Snapshot the launched task ids a rolling restart will cover.
    async fn snapshot_task_ids(&self, scope: &RestartScope) -> Vec<String> {
        let registry = self.registry.read().await;
        registry
            .launched()
            .iter()
            .filter(|inst| match scope {
                RestartScope::Fleet => true,
                RestartScope::Type(type_name) => inst.type_name() == type_name,
            })
            .filter_map(|inst| inst.runtime.as_ref().map(|rt| rt.task_id.clone()))
            .collect()
    }

    async fn apply_scheduler_event(&mut self, event: SchedulerEvent) {
        self.last_heartbeat = Instant::now();
        match event {
            SchedulerEvent::TaskLaunched { instance, runtime } => {
                let notice = {
                    let mut registry = self.registry.write().await;
                    let Some(mut inst) = registry.remove_pending(instance) else {
                        tracing::warn!(%instance, "Launch notice for an instance not in pending, ignoring");
                        return;
                    };
                    tracing::info!(instance = %inst.name, task_id = %runtime.task_id, "Task launched");
                    inst.is_submitted = true;
                    inst.runtime = Some(runtime);
                    let notice = LaunchNotice {
                        instance: inst.id,
                        name: inst.name.clone(),
                    };
                    registry.add_launched(inst);
                    notice
                };
                self.bridge.notify_launched(notice);
            }
            SchedulerEvent::StatusUpdate {
                task_id,
                state,
                healthy,
            } => {
                let mut registry = self.registry.write().await;
                let Some(inst) = registry.find_launched_by_task_id_mut(&task_id) else {
                    tracing::debug!(task_id = %task_id, "Status update for unknown task, ignoring");
                    return;
                };
                let rt = inst.runtime.as_mut().expect("launched instances have runtime info");
                rt.state = state;
                if healthy.is_some() {
                    rt.healthy = healthy;
                }
                let terminal = state.is_terminal().then(|| (inst.id, inst.name.clone()));
                if let Some((id, name)) = terminal {
                    registry.remove_launched(id);
                    tracing::info!(instance = %name, task_id = %task_id, state = %state, "Task reached terminal state, removed");
                }
            }
            SchedulerEvent::Heartbeat => {}
        }
    }
}

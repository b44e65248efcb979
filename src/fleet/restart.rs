//! Restart orchestration: replace running instances with fresh clones using
//! a launch-before-kill protocol.
//!
//! A single restart enqueues a clone of the target's definition under the
//! same fleet name, waits for the scheduler to confirm the clone launched,
//! polls until the clone reports running (and healthy, when health-check
//! confirmation is enabled), and only then kills the original. If the bounded
//! wait elapses first the restart is abandoned and the original is left
//! untouched: a stale-but-running instance beats a capacity gap.
//!
//! A rolling restart drives single restarts strictly one at a time from a
//! private snapshot, last instance first. A stalled restart stalls the whole
//! sequence; it never skips past a replacement that might not exist.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bridge::SchedulerBridge;
use crate::fleet::registry::TaskRegistry;
use crate::fleet::task::{InstanceName, TaskInstance, TaskState};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Completion signals observable by administrative callers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    /// A single (non-rolling) restart finished: the clone is running and the
    /// kill for the original has been issued.
    TaskRestarted { name: InstanceName },
    /// A restart's bounded wait elapsed; the original was preserved.
    RestartAbandoned { name: InstanceName },
    /// A rolling restart worked through its whole snapshot.
    RollingRestartEnded,
}

/// Tuning for the restart wait loop.
#[derive(Debug, Clone)]
pub struct RestartConfig {
    /// Overall bound on one restart's wait for its clone.
    pub timeout: Duration,
    /// Interval at which the clone's runtime state is polled after its
    /// launch notice arrives.
    pub poll_interval: Duration,
    /// Require the clone to report healthy, not just running, before the
    /// original is killed.
    pub use_healthcheck: bool,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            use_healthcheck: false,
        }
    }
}

/// How a single restart ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// Clone confirmed, original killed.
    Confirmed,
    /// Target was not in the launched collection; nothing was changed. The
    /// target may have been replaced or removed concurrently, so this is a
    /// no-op, not an error.
    NotRunning,
    /// The catalog has no definition for the target's type. Should not
    /// happen while the registry is consistent.
    UnknownType,
    /// The bounded wait elapsed before the clone confirmed.
    TimedOut,
}

#[derive(Clone)]
pub struct RestartOrchestrator {
    registry: Arc<RwLock<TaskRegistry>>,
    bridge: SchedulerBridge,
    events: broadcast::Sender<FleetEvent>,
    config: RestartConfig,
}

impl RestartOrchestrator {
    pub fn new(
        registry: Arc<RwLock<TaskRegistry>>,
        bridge: SchedulerBridge,
        config: RestartConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            bridge,
            events,
            config,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    pub fn set_use_healthcheck(&mut self, use_healthcheck: bool) {
        self.config.use_healthcheck = use_healthcheck;
    }

    /// Restart one launched instance, addressed by scheduler task id.
    ///
    /// Marks the original restarting (excluding it from running counts
    /// immediately), enqueues a clean clone under the same fleet name, and
    /// waits for the clone to confirm before killing the original. The mark
    /// plus enqueue is one registry critical section, so a concurrent scale
    /// never observes the original as healthy capacity alongside its clone.
    pub async fn restart_task(&self, task_id: &str, is_rolling: bool) -> RestartOutcome {
        // Subscribe before the clone is visible to the scheduler so its
        // launch notice cannot be missed.
        let mut launches = self.bridge.subscribe_launches();

        let (clone_id, name, original_agent) = {
            let mut registry = self.registry.write().await;

            let Some(target) = registry.find_launched_by_task_id(task_id) else {
                tracing::debug!(task_id, "Can't restart task that is not running");
                return RestartOutcome::NotRunning;
            };
            let name = target.name.clone();

            let Some(def) = registry.definition(&name.type_name).cloned() else {
                tracing::debug!(task_id, task_type = %name.type_name, "Can't restart task of unknown type");
                return RestartOutcome::UnknownType;
            };

            let target = registry
                .find_launched_by_task_id_mut(task_id)
                .expect("target was present under the same lock");
            let rt = target.runtime.as_mut().expect("launched instances have runtime info");
            rt.restarting = true;
            let original_agent = rt.agent_id.clone();

            // Same fleet name, fresh identity, clean submission state.
            let clone = TaskInstance::from_definition(&def, name.clone());
            let clone_id = clone.id;
            tracing::debug!(instance = %name, "Restarting - enqueueing replacement clone");
            registry.add_pending(clone);

            (clone_id, name, original_agent)
        };

        let confirmed = tokio::time::timeout(
            self.config.timeout,
            self.await_clone_running(clone_id, &mut launches),
        )
        .await
        .is_ok();

        if !confirmed {
            tracing::warn!(
                instance = %name,
                task_id,
                timeout = ?self.config.timeout,
                "Restart abandoned: replacement never confirmed, original preserved"
            );
            let _ = self.events.send(FleetEvent::RestartAbandoned { name });
            return RestartOutcome::TimedOut;
        }

        tracing::debug!(instance = %name, "Replacement clone is running, killing original");
        self.bridge.kill(task_id, &original_agent);

        if is_rolling {
            tracing::debug!(instance = %name, "Rolling restart step complete");
        } else {
            let _ = self.events.send(FleetEvent::TaskRestarted { name });
        }
        RestartOutcome::Confirmed
    }

    /// Wait for the clone's launch notice, then poll its runtime state until
    /// it confirms. Runs under the caller's overall timeout.
    async fn await_clone_running(
        &self,
        clone_id: Uuid,
        launches: &mut broadcast::Receiver<crate::bridge::LaunchNotice>,
    ) {
        loop {
            match launches.recv().await {
                Ok(notice) if notice.instance == clone_id => break,
                Ok(notice) => {
                    tracing::debug!(instance = %notice.name, "Launch notice for an unrelated instance, still waiting");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Dropped notices may have included ours; fall through to
                    // polling, which checks the registry directly.
                    tracing::warn!(skipped, "Launch notice stream lagged");
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Bridge gone; park until the overall timeout fires.
                    std::future::pending::<()>().await;
                }
            }
        }

        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            interval.tick().await;
            if self.clone_confirmed(clone_id).await {
                break;
            }
        }
    }

    /// Confirmation: the clone has left pending, reports a running state,
    /// and, when health-check confirmation is on, reports healthy.
    async fn clone_confirmed(&self, clone_id: Uuid) -> bool {
        let registry = self.registry.read().await;
        if registry.find_pending(clone_id).is_some() {
            return false;
        }
        match registry.find_launched(clone_id).and_then(|inst| inst.runtime.as_ref()) {
            Some(rt) => {
                rt.state == TaskState::Running
                    && (!self.config.use_healthcheck || rt.healthy == Some(true))
            }
            None => false,
        }
    }

    /// Restart every instance in `task_ids`, one at a time, last first.
    ///
    /// The list is the caller's snapshot; scale operations during the rollout
    /// are not reflected. The returned token cancels the rollout, dropping an
    /// in-flight restart at its next wait point. An individual restart that
    /// fails or times out stalls the rollout (no "ended" signal fires) rather
    /// than skipping ahead; an empty snapshot ends immediately.
    pub fn rolling_restart(&self, task_ids: Vec<String>) -> CancellationToken {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let orchestrator = self.clone();

        tokio::spawn(async move {
            tracing::info!(instances = task_ids.len(), "Starting rolling restart");
            let mut remaining = task_ids;
            loop {
                let Some(task_id) = remaining.pop() else {
                    tracing::info!("Rolling restart ended");
                    let _ = orchestrator.events.send(FleetEvent::RollingRestartEnded);
                    break;
                };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(remaining = remaining.len() + 1, "Rolling restart cancelled");
                        break;
                    }
                    outcome = orchestrator.restart_task(&task_id, true) => {
                        if outcome != RestartOutcome::Confirmed {
                            tracing::warn!(
                                task_id = %task_id,
                                ?outcome,
                                remaining = remaining.len(),
                                "Rolling restart stalled, operator intervention required"
                            );
                            break;
                        }
                    }
                }
            }
        });

        token
    }
}

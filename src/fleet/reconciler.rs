//! Scaling reconciliation: converge the live instance count of a task type
//! toward a requested target.
//!
//! Everything here is a plain function over the registry. The fleet server
//! calls these one command at a time, so a whole scale operation is a single
//! atomic step with respect to other fleet mutations.

use std::collections::HashSet;

use serde::Serialize;

use crate::bridge::SchedulerBridge;
use crate::fleet::registry::TaskRegistry;
use crate::fleet::task::{InstanceName, TaskInstance};

/// Per-type running count, as counted for scaling purposes.
#[derive(Debug, Clone, Serialize)]
pub struct TypeStats {
    #[serde(rename = "type")]
    pub type_name: String,
    pub running_instances: u32,
    pub allow_scaling: bool,
}

/// Resource totals over launched instances.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceTotals {
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    pub ports: u64,
    pub instances: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetStats {
    pub by_type: std::collections::BTreeMap<String, ResourceTotals>,
    pub overall: ResourceTotals,
}

/// What a scale request did. Unknown types, types with scaling disabled,
/// and negative targets are deliberate no-ops rather than errors; the
/// outcome records which.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleOutcome {
    Unchanged,
    ScaledUp(u32),
    ScaledDown { pending_withdrawn: u32, killed: u32 },
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownType,
    ScalingDisabled,
    /// Negative or otherwise unrepresentable instance target.
    InvalidTarget,
}

/// Count running instances per catalog type.
///
/// An instance counts as running only if it is launched with runtime info
/// and not marked restarting; a mid-restart instance must not be counted
/// against its own replacement.
pub fn type_stats(registry: &TaskRegistry) -> Vec<TypeStats> {
    registry
        .definitions()
        .map(|def| {
            let running_instances = registry
                .launched()
                .iter()
                .filter(|inst| inst.type_name() == def.name && inst.counts_as_running())
                .count() as u32;
            TypeStats {
                type_name: def.name.clone(),
                running_instances,
                allow_scaling: def.allow_scaling,
            }
        })
        .collect()
}

/// Aggregate resource usage of all launched instances, per type and overall.
pub fn fleet_stats(registry: &TaskRegistry) -> FleetStats {
    let mut stats = FleetStats::default();
    for inst in registry.launched() {
        let res = &inst.spec.resources;
        let entry = stats.by_type.entry(inst.type_name().to_string()).or_default();
        for totals in [entry, &mut stats.overall] {
            totals.cpus += res.cpus;
            totals.mem += res.mem;
            totals.disk += res.disk;
            totals.ports += u64::from(res.ports);
            totals.instances += 1;
        }
    }
    stats
}

/// Converge `type_name` toward `desired` running instances.
///
/// Scale-up enqueues deep-copied clones of the type's definition, named with
/// serials continuing from the current running count. Scale-down retires the
/// highest-numbered serials, withdrawing pending instances first (newest
/// first) so nothing is launched just to be killed, then killing launched
/// instances (newest first) through the bridge. The termination scan is a
/// single reverse pass: asking for more terminations than matching instances
/// exist clamps to "terminate all matches".
pub fn scale(
    registry: &mut TaskRegistry,
    bridge: &SchedulerBridge,
    type_name: &str,
    desired: i64,
) -> ScaleOutcome {
    let Some(def) = registry.definition(type_name) else {
        tracing::debug!(task_type = type_name, "Scale request for unknown type, ignoring");
        return ScaleOutcome::Ignored(IgnoreReason::UnknownType);
    };
    if !def.allow_scaling {
        tracing::debug!(task_type = type_name, "Scaling disabled for type, ignoring");
        return ScaleOutcome::Ignored(IgnoreReason::ScalingDisabled);
    }
    let Ok(desired) = u32::try_from(desired) else {
        tracing::debug!(task_type = type_name, desired, "Scale target out of range, ignoring");
        return ScaleOutcome::Ignored(IgnoreReason::InvalidTarget);
    };

    let running = registry
        .launched()
        .iter()
        .filter(|inst| inst.type_name() == type_name && inst.counts_as_running())
        .count() as u32;

    if desired == running {
        return ScaleOutcome::Unchanged;
    }

    if desired > running {
        let delta_up = desired - running;
        let def = def.clone();
        for k in 1..=delta_up {
            let name = InstanceName::new(type_name, running + k);
            tracing::debug!(instance = %name, "Scale up - enqueueing instance");
            registry.add_pending(TaskInstance::from_definition(&def, name));
        }
        tracing::info!(task_type = type_name, running, desired, "Scaled up");
        return ScaleOutcome::ScaledUp(delta_up);
    }

    // Scale down: retire the highest-numbered serials still counted as
    // running, i.e. everything in (desired, running].
    let mut delta_down = running - desired;
    let candidates: HashSet<InstanceName> = (desired + 1..=running)
        .map(|serial| InstanceName::new(type_name, serial))
        .collect();

    // Phase 1: withdraw matching pending instances in LIFO order.
    let withdraw: Vec<uuid::Uuid> = registry
        .pending()
        .iter()
        .rev()
        .filter(|inst| candidates.contains(&inst.name))
        .take(delta_down as usize)
        .map(|inst| inst.id)
        .collect();
    let mut pending_withdrawn = 0;
    for id in withdraw {
        if let Some(inst) = registry.remove_pending(id) {
            tracing::debug!(instance = %inst.name, "Scale down - withdrew pending instance");
            pending_withdrawn += 1;
            delta_down -= 1;
        }
    }

    // Phase 2: kill matching launched instances in LIFO order. A single
    // reverse pass; exhausting the collection clamps the request.
    let kills: Vec<uuid::Uuid> = registry
        .launched()
        .iter()
        .rev()
        .filter(|inst| candidates.contains(&inst.name) && inst.runtime.is_some())
        .take(delta_down as usize)
        .map(|inst| inst.id)
        .collect();
    let mut killed = 0;
    for id in kills {
        if let Some(inst) = registry.remove_launched(id) {
            let rt = inst.runtime.as_ref().expect("kill candidates have runtime info");
            bridge.kill(&rt.task_id, &rt.agent_id);
            tracing::info!(instance = %inst.name, task_id = %rt.task_id, "Scale down - killing task");
            killed += 1;
        }
    }

    tracing::info!(
        task_type = type_name,
        running,
        desired,
        pending_withdrawn,
        killed,
        "Scaled down"
    );
    ScaleOutcome::ScaledDown {
        pending_withdrawn,
        killed,
    }
}

/// Send a kill for every launched instance. Entries stay in the launched
/// collection; the scheduler's terminal status updates remove them.
pub fn kill_all(registry: &TaskRegistry, bridge: &SchedulerBridge) -> u32 {
    kill_matching(registry, bridge, |_| true)
}

/// Send a kill for every launched instance of one type.
pub fn kill_all_of_type(registry: &TaskRegistry, bridge: &SchedulerBridge, type_name: &str) -> u32 {
    kill_matching(registry, bridge, |inst| inst.type_name() == type_name)
}

fn kill_matching(
    registry: &TaskRegistry,
    bridge: &SchedulerBridge,
    matches: impl Fn(&TaskInstance) -> bool,
) -> u32 {
    let mut killed = 0;
    for inst in registry.launched() {
        if !matches(inst) {
            continue;
        }
        if let Some(rt) = &inst.runtime {
            bridge.kill(&rt.task_id, &rt.agent_id);
            killed += 1;
        }
    }
    killed
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state reported by the external scheduler for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    /// Terminal states remove the instance from the launched collection.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Staging => write!(f, "staging"),
            TaskState::Starting => write!(f, "starting"),
            TaskState::Running => write!(f, "running"),
            TaskState::Finished => write!(f, "finished"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Killed => write!(f, "killed"),
            TaskState::Lost => write!(f, "lost"),
        }
    }
}

/// Identity of a fleet instance: the task type plus a serial assigned at
/// scale-up time. Carried explicitly on every instance so the type is never
/// re-derived by parsing, but the wire form stays `"<type>-<serial>"`.
///
/// Serials are unique among instances of a type at assignment time only.
/// They are not reclaimed, and scale-down does not renumber survivors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceName {
    pub type_name: String,
    pub serial: u32,
}

impl InstanceName {
    pub fn new(type_name: impl Into<String>, serial: u32) -> Self {
        Self {
            type_name: type_name.into(),
            serial,
        }
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.type_name, self.serial)
    }
}

impl FromStr for InstanceName {
    type Err = String;

    /// Parse the wire form by splitting off the trailing `-<digits>` suffix.
    /// Only valid if the remaining type name does not itself end in digits,
    /// which catalog validation rules out.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_name, serial) = s
            .rsplit_once('-')
            .ok_or_else(|| format!("instance name has no serial suffix: {}", s))?;
        if type_name.is_empty() {
            return Err(format!("instance name has no type prefix: {}", s));
        }
        let serial: u32 = serial
            .parse()
            .map_err(|_| format!("instance name has a non-numeric serial: {}", s))?;
        Ok(Self::new(type_name, serial))
    }
}

/// Resource requirements for one instance of a task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub cpus: f64,
    pub mem: f64,
    #[serde(default)]
    pub disk: f64,
    #[serde(default)]
    pub ports: u32,
}

/// Container image and runtime options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub force_pull_image: bool,
    /// Free-form container runtime parameters (key/value).
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Command line and environment for one instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Artifact URIs fetched into the sandbox before launch.
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Run `value` through a shell instead of exec'ing it directly.
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// Health check probed by the scheduler; results arrive as status updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub port: u16,
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_grace_period_secs() -> u64 {
    30
}

fn default_health_interval_secs() -> u64 {
    10
}

/// Template for a task type, read from the catalog at startup and immutable
/// afterwards. Every nested field is owned, so `Clone` produces a deep copy:
/// no two instances ever share environment lists or parameter vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Type name, e.g. "worker". Must not end in `-<digits>`.
    pub name: String,
    /// Instance count the fleet is brought to at startup.
    #[serde(default = "default_instances")]
    pub instances: u32,
    pub resources: ResourceSpec,
    pub container: ContainerSpec,
    #[serde(default)]
    pub command: CommandSpec,
    #[serde(default)]
    pub health_check: Option<HealthCheckSpec>,
    #[serde(default)]
    pub allow_scaling: bool,
}

fn default_instances() -> u32 {
    1
}

/// Scheduler-assigned runtime identifiers and lifecycle state for a
/// launched instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub task_id: String,
    pub agent_id: String,
    pub state: TaskState,
    /// Set while a replacement clone is in flight; excludes the instance
    /// from running counts so it is never double-counted against the clone.
    #[serde(default)]
    pub restarting: bool,
    #[serde(default)]
    pub healthy: Option<bool>,
}

/// A concrete instance of a task type.
///
/// Lives in the pending collection from creation until the scheduler
/// confirms the launch (moved to launched, `runtime` attached) or until a
/// scale-down withdraws it. The `id` is unique per instantiation and is what
/// launch notices are scoped to; the `name` is reused when an instance is
/// replaced in a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: Uuid,
    pub name: InstanceName,
    pub spec: TaskDefinition,
    pub is_submitted: bool,
    pub runtime: Option<RuntimeInfo>,
    pub created_at: DateTime<Utc>,
}

impl TaskInstance {
    /// Instantiate a definition under the given name.
    ///
    /// The definition is deep-copied and the instance starts clean:
    /// unsubmitted, no runtime info. Re-instantiating for a restart therefore
    /// never carries over submission flags or stale runtime identifiers.
    pub fn from_definition(def: &TaskDefinition, name: InstanceName) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            spec: def.clone(),
            is_submitted: false,
            runtime: None,
            created_at: Utc::now(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.name.type_name
    }

    /// Counts toward running capacity: launched with runtime info and not
    /// mid-restart.
    pub fn counts_as_running(&self) -> bool {
        self.runtime.as_ref().is_some_and(|rt| !rt.restarting)
    }
}

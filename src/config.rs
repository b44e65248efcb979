use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FleetError, Result};
use crate::fleet::task::TaskDefinition;
use crate::fleet::RestartConfig;

/// Top-level configuration for one fleet deployment.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Address the HTTP API binds to.
    pub listen_addr: SocketAddr,
    pub restart: RestartConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8080"
                .parse()
                .expect("default listen address is valid"),
            restart: RestartConfig::default(),
        }
    }
}

impl FleetConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_restart_timeout(mut self, timeout: Duration) -> Self {
        self.restart.timeout = timeout;
        self
    }

    pub fn with_healthcheck(mut self, use_healthcheck: bool) -> Self {
        self.restart.use_healthcheck = use_healthcheck;
        self
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    tasks: Vec<TaskDefinition>,
}

/// Load and validate the task-definition catalog from a JSON file.
pub fn load_catalog(path: &Path) -> Result<Vec<TaskDefinition>> {
    let raw = std::fs::read_to_string(path)?;
    let catalog: CatalogFile = serde_json::from_str(&raw)?;
    validate_catalog(&catalog.tasks)?;
    Ok(catalog.tasks)
}

/// Reject type names that would make instance identity ambiguous and
/// duplicate definitions.
///
/// Instance names are `"<type>-<serial>"` on the wire, so a type name ending
/// in `-<digits>` could not be told apart from an instance of a shorter
/// type name.
pub fn validate_catalog(tasks: &[TaskDefinition]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for def in tasks {
        if def.name.trim().is_empty() {
            return Err(FleetError::InvalidTypeName("(empty)".to_string()));
        }
        if let Some((_, suffix)) = def.name.rsplit_once('-') {
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                return Err(FleetError::InvalidTypeName(def.name.clone()));
            }
        }
        if !seen.insert(def.name.as_str()) {
            return Err(FleetError::DuplicateTaskType(def.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::task::{ContainerSpec, ResourceSpec};

    fn definition(name: &str) -> TaskDefinition {
        TaskDefinition {
            name: name.to_string(),
            instances: 1,
            resources: ResourceSpec {
                cpus: 0.1,
                mem: 64.0,
                disk: 0.0,
                ports: 0,
            },
            container: ContainerSpec {
                image: "alpine:latest".to_string(),
                privileged: false,
                force_pull_image: false,
                parameters: Vec::new(),
            },
            command: Default::default(),
            health_check: None,
            allow_scaling: true,
        }
    }

    #[test]
    fn fleet_config_default() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.restart.timeout, Duration::from_secs(300));
        assert_eq!(cfg.restart.poll_interval, Duration::from_secs(1));
        assert!(!cfg.restart.use_healthcheck);
    }

    #[test]
    fn fleet_config_builders() {
        let cfg = FleetConfig::default()
            .with_restart_timeout(Duration::from_secs(30))
            .with_healthcheck(true);
        assert_eq!(cfg.restart.timeout, Duration::from_secs(30));
        assert!(cfg.restart.use_healthcheck);
    }

    #[test]
    fn catalog_accepts_plain_names() {
        let tasks = vec![definition("worker"), definition("jobmanager")];
        assert!(validate_catalog(&tasks).is_ok());
    }

    #[test]
    fn catalog_accepts_inner_dashes_and_trailing_digits_without_dash() {
        // "job-manager" and "worker2" are unambiguous; only "-<digits>" is not.
        let tasks = vec![definition("job-manager"), definition("worker2")];
        assert!(validate_catalog(&tasks).is_ok());
    }

    #[test]
    fn catalog_rejects_numeric_suffix() {
        let tasks = vec![definition("worker-2")];
        assert!(matches!(
            validate_catalog(&tasks),
            Err(FleetError::InvalidTypeName(_))
        ));
    }

    #[test]
    fn catalog_rejects_duplicates() {
        let tasks = vec![definition("worker"), definition("worker")];
        assert!(matches!(
            validate_catalog(&tasks),
            Err(FleetError::DuplicateTaskType(_))
        ));
    }

    #[test]
    fn catalog_rejects_empty_name() {
        let tasks = vec![definition("  ")];
        assert!(matches!(
            validate_catalog(&tasks),
            Err(FleetError::InvalidTypeName(_))
        ));
    }

    #[test]
    fn catalog_file_parses() {
        let raw = r#"{
            "tasks": [
                {
                    "name": "worker",
                    "instances": 3,
                    "allow_scaling": true,
                    "resources": {"cpus": 0.2, "mem": 128},
                    "container": {"image": "registry/worker:1"},
                    "command": {"shell": true, "value": "run-worker"}
                }
            ]
        }"#;
        let catalog: CatalogFile = serde_json::from_str(raw).unwrap();
        assert_eq!(catalog.tasks.len(), 1);
        let def = &catalog.tasks[0];
        assert_eq!(def.name, "worker");
        assert_eq!(def.instances, 3);
        assert!(def.allow_scaling);
        assert_eq!(def.resources.ports, 0);
        assert!(def.health_check.is_none());
    }
}

//! flotilla: a task-fleet manager for cluster schedulers.
//!
//! One deployment manages one fleet: a catalog of task types, each run as a
//! variable number of instances on an external cluster scheduler. The crate
//! owns the reconciliation and restart-orchestration logic: how many
//! instances of each type should exist, how to converge the live fleet
//! toward that target, and how to replace a running instance with a fresh
//! clone without ever leaving the fleet under-capacity. The scheduler itself
//! is an external collaborator reached through [`bridge`].

pub mod api;
pub mod bridge;
pub mod config;
pub mod driver;
pub mod error;
pub mod fleet;
pub mod server;
pub mod shutdown;

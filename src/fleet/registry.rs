use std::collections::BTreeMap;

use uuid::Uuid;

use crate::fleet::task::{TaskDefinition, TaskInstance};

/// Holds the task-definition catalog and the two instance collections.
///
/// Pure storage: lookups and insert/remove only, no I/O and no policy. The
/// reconciler and the restart orchestrator decide what to mutate; the
/// scheduler event loop moves instances from pending to launched. Both
/// collections keep insertion order, which the scale-down logic relies on
/// for its LIFO scans.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    catalog: BTreeMap<String, TaskDefinition>,
    pending: Vec<TaskInstance>,
    launched: Vec<TaskInstance>,
}

impl TaskRegistry {
    pub fn new(catalog: impl IntoIterator<Item = TaskDefinition>) -> Self {
        Self {
            catalog: catalog
                .into_iter()
                .map(|def| (def.name.clone(), def))
                .collect(),
            pending: Vec::new(),
            launched: Vec::new(),
        }
    }

    /// Look up the definition for a task type.
    pub fn definition(&self, type_name: &str) -> Option<&TaskDefinition> {
        self.catalog.get(type_name)
    }

    /// All definitions, ordered by type name.
    pub fn definitions(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.catalog.values()
    }

    pub fn pending(&self) -> &[TaskInstance] {
        &self.pending
    }

    pub fn launched(&self) -> &[TaskInstance] {
        &self.launched
    }

    pub fn add_pending(&mut self, instance: TaskInstance) {
        self.pending.push(instance);
    }

    /// Remove a pending instance by id, returning it if present.
    pub fn remove_pending(&mut self, id: Uuid) -> Option<TaskInstance> {
        let index = self.pending.iter().position(|inst| inst.id == id)?;
        Some(self.pending.remove(index))
    }

    pub fn add_launched(&mut self, instance: TaskInstance) {
        self.launched.push(instance);
    }

    /// Remove a launched instance by id, returning it if present.
    pub fn remove_launched(&mut self, id: Uuid) -> Option<TaskInstance> {
        let index = self.launched.iter().position(|inst| inst.id == id)?;
        Some(self.launched.remove(index))
    }

    pub fn find_pending(&self, id: Uuid) -> Option<&TaskInstance> {
        self.pending.iter().find(|inst| inst.id == id)
    }

    pub fn find_launched(&self, id: Uuid) -> Option<&TaskInstance> {
        self.launched.iter().find(|inst| inst.id == id)
    }

    /// Look up a launched instance by its scheduler task id.
    pub fn find_launched_by_task_id(&self, task_id: &str) -> Option<&TaskInstance> {
        self.launched
            .iter()
            .find(|inst| inst.runtime.as_ref().is_some_and(|rt| rt.task_id == task_id))
    }

    pub fn find_launched_by_task_id_mut(&mut self, task_id: &str) -> Option<&mut TaskInstance> {
        self.launched
            .iter_mut()
            .find(|inst| inst.runtime.as_ref().is_some_and(|rt| rt.task_id == task_id))
    }

    /// Launched instances of one type, in launch order.
    pub fn launched_of_type(&self, type_name: &str) -> Vec<&TaskInstance> {
        self.launched
            .iter()
            .filter(|inst| inst.type_name() == type_name)
            .collect()
    }

    /// Pending instances of one type, in enqueue order.
    pub fn pending_of_type(&self, type_name: &str) -> Vec<&TaskInstance> {
        self.pending
            .iter()
            .filter(|inst| inst.type_name() == type_name)
            .collect()
    }
}

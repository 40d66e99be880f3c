// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory workflow records (legacy mode only).
//!
//! A guarded map, nothing more: no scheduler, no durability, lost on
//! restart.  The tool help says so; persisting these is a non-goal.

use qmcp_error::QmcpError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Lifecycle of a workflow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created; steps not yet walked.
    Pending,
    /// Some steps checked off.
    InProgress,
    /// All steps checked off.
    Completed,
}

/// One bookkeeping record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Record id.
    pub id: Uuid,
    /// Human name.
    pub name: String,
    /// Step labels, in order.
    pub steps: Vec<String>,
    /// Indices of completed steps.
    pub completed_steps: Vec<usize>,
    /// Current status.
    pub status: WorkflowStatus,
}

/// The process-lifetime store.
#[derive(Clone, Default)]
pub struct WorkflowStore {
    records: Arc<Mutex<BTreeMap<Uuid, WorkflowRecord>>>,
}

impl WorkflowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record.
    pub fn create(&self, name: &str, steps: Vec<String>) -> WorkflowRecord {
        let record = WorkflowRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            steps,
            completed_steps: vec![],
            status: WorkflowStatus::Pending,
        };
        self.records
            .lock()
            .expect("workflow store lock poisoned")
            .insert(record.id, record.clone());
        record
    }

    /// Fetch a record.
    pub fn get(&self, id: Uuid) -> Result<WorkflowRecord, QmcpError> {
        self.records
            .lock()
            .expect("workflow store lock poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| QmcpError::not_found(format!("no workflow record '{id}'")))
    }

    /// Mark a step done and advance the status.
    pub fn complete_step(&self, id: Uuid, step: usize) -> Result<WorkflowRecord, QmcpError> {
        let mut records = self.records.lock().expect("workflow store lock poisoned");
        let record = records
            .get_mut(&id)
            .ok_or_else(|| QmcpError::not_found(format!("no workflow record '{id}'")))?;
        if step >= record.steps.len() {
            return Err(QmcpError::validation(format!(
                "step {step} out of range (workflow has {})",
                record.steps.len()
            )));
        }
        if !record.completed_steps.contains(&step) {
            record.completed_steps.push(step);
            record.completed_steps.sort_unstable();
        }
        record.status = if record.completed_steps.len() == record.steps.len() {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::InProgress
        };
        Ok(record.clone())
    }

    /// Every record, ordered by id.
    pub fn list(&self) -> Vec<WorkflowRecord> {
        self.records
            .lock()
            .expect("workflow store lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch() {
        let store = WorkflowStore::new();
        let record = store.create("ship dataset", vec!["stage".into(), "commit".into()]);
        assert_eq!(record.status, WorkflowStatus::Pending);
        let fetched = store.get(record.id).unwrap();
        assert_eq!(fetched.name, "ship dataset");
    }

    #[test]
    fn steps_advance_status() {
        let store = WorkflowStore::new();
        let record = store.create("w", vec!["a".into(), "b".into()]);
        let mid = store.complete_step(record.id, 0).unwrap();
        assert_eq!(mid.status, WorkflowStatus::InProgress);
        let done = store.complete_step(record.id, 1).unwrap();
        assert_eq!(done.status, WorkflowStatus::Completed);
    }

    #[test]
    fn completing_a_step_twice_is_idempotent() {
        let store = WorkflowStore::new();
        let record = store.create("w", vec!["a".into()]);
        store.complete_step(record.id, 0).unwrap();
        let again = store.complete_step(record.id, 0).unwrap();
        assert_eq!(again.completed_steps, vec![0]);
    }

    #[test]
    fn out_of_range_step_rejected() {
        let store = WorkflowStore::new();
        let record = store.create("w", vec!["a".into()]);
        let err = store.complete_step(record.id, 5).unwrap_err();
        assert_eq!(err.kind, qmcp_error::ErrorKind::ValidationFailed);
    }

    #[test]
    fn missing_record_is_not_found() {
        let store = WorkflowStore::new();
        let err = store.get(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind, qmcp_error::ErrorKind::NotFound);
    }

    #[test]
    fn list_returns_everything() {
        let store = WorkflowStore::new();
        store.create("a", vec![]);
        store.create("b", vec![]);
        assert_eq!(store.list().len(), 2);
    }
}

//! Durable per-task local store.
//!
//! Each task gets one config object named after its id. The record body is
//! the YAML serialization of [`TaskRecord`] keyed by the task id; the stop
//! intent and the two stage counters are annotations so that every counter
//! write is a single patch and the body never has to be rewritten.
//!
//! A finalizer on the object blocks deletion while the reconciler still owes
//! work for the task; [`LocalStore::delete_task`] removes the finalizer
//! right before deleting.

use std::str::FromStr;
use std::sync::Arc;

use vetes_core::names::{ANNO_EXECUTOR_STAGE, ANNO_STAGE, ANNO_STOP, FINALIZER_TASK, LABEL_TASK_ID};
use vetes_core::{TaskId, TaskState};

use crate::cluster::{ClusterApi, ConfigObject, ObjectKind, ObjectMeta};
use crate::error::{Error, Result};
use crate::record::{TaskEntry, TaskRecord};

/// Store of per-task records backed by namespaced config objects.
#[derive(Clone)]
pub struct LocalStore {
    cluster: Arc<dyn ClusterApi>,
}

impl LocalStore {
    /// Creates a store over the given cluster.
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// The kind of object this store persists into, for watch registration.
    #[must_use]
    pub const fn store_kind() -> ObjectKind {
        ObjectKind::ConfigObject
    }

    /// Creates the record for a task; fails if one already exists.
    pub async fn store_task(&self, record: &TaskRecord) -> Result<()> {
        let body = serde_yaml::to_string(record)
            .map_err(|e| Error::serialization(format!("failed to serialize task record: {e}")))?;

        let mut object = ConfigObject {
            meta: ObjectMeta::named(record.id.as_str())
                .with_label(LABEL_TASK_ID, record.id.as_str())
                .with_finalizer(FINALIZER_TASK),
            ..ConfigObject::default()
        };
        object.data.insert(record.id.to_string(), body);

        self.cluster.create_config_object(object).await
    }

    /// Reads a task's record and stage counters.
    pub async fn get_task(&self, task_id: &TaskId) -> Result<TaskEntry> {
        let object = self.cluster.get_config_object(task_id.as_str()).await?;
        let body = object
            .data
            .get(task_id.as_str())
            .ok_or_else(|| Error::serialization(format!("empty record body for {task_id}")))?;
        let record: TaskRecord = serde_yaml::from_str(body)
            .map_err(|e| Error::serialization(format!("failed to parse task record: {e}")))?;

        let mut entry = TaskEntry {
            record,
            ..TaskEntry::default()
        };
        if let Some(stop) = object.meta.annotation(ANNO_STOP) {
            match TaskState::from_str(stop) {
                Ok(state) => entry.stop = Some(state),
                Err(err) => tracing::warn!(task = %task_id, %err, "invalid stop annotation"),
            }
        }
        if let Some(stage) = object.meta.annotation(ANNO_STAGE) {
            match stage.parse::<i32>() {
                Ok(value) => entry.stage = Some(value),
                Err(err) => tracing::warn!(task = %task_id, stage, %err, "invalid stage annotation"),
            }
        }
        if let Some(stage) = object.meta.annotation(ANNO_EXECUTOR_STAGE) {
            match stage.parse::<i32>() {
                Ok(value) => entry.executor_stage = Some(value),
                Err(err) => {
                    tracing::warn!(task = %task_id, stage, %err, "invalid executor stage annotation");
                }
            }
        }
        Ok(entry)
    }

    /// Marks the terminal state the task should be stopped with. Idempotent.
    pub async fn stop_task(&self, task_id: &TaskId, state: TaskState) -> Result<()> {
        self.cluster
            .annotate_config_object(task_id.as_str(), ANNO_STOP, state.as_str())
            .await
    }

    /// Removes the record: drops the finalizer, then deletes the object.
    pub async fn delete_task(&self, task_id: &TaskId) -> Result<()> {
        self.cluster
            .remove_finalizer(ObjectKind::ConfigObject, task_id.as_str(), FINALIZER_TASK)
            .await?;
        self.cluster.delete_config_object(task_id.as_str()).await
    }

    /// Persists the coarse stage counter.
    pub async fn record_stage(&self, task_id: &TaskId, stage: i32) -> Result<()> {
        self.cluster
            .annotate_config_object(task_id.as_str(), ANNO_STAGE, &stage.to_string())
            .await
    }

    /// Persists the composite executor stage counter.
    pub async fn record_executor_stage(&self, task_id: &TaskId, stage: i32) -> Result<()> {
        self.cluster
            .annotate_config_object(task_id.as_str(), ANNO_EXECUTOR_STAGE, &stage.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;

    fn store() -> (Arc<InMemoryCluster>, LocalStore) {
        let cluster = Arc::new(InMemoryCluster::new());
        let store = LocalStore::new(cluster.clone());
        (cluster, store)
    }

    fn record(id: &str) -> TaskRecord {
        TaskRecord {
            id: TaskId::new(id),
            name: "demo".into(),
            ..TaskRecord::default()
        }
    }

    #[tokio::test]
    async fn store_and_get_round_trip() {
        let (_, store) = store();
        store.store_task(&record("task-1")).await.unwrap();

        let entry = store.get_task(&TaskId::new("task-1")).await.unwrap();
        assert_eq!(entry.record.id.as_str(), "task-1");
        assert_eq!(entry.record.name, "demo");
        assert!(entry.stop.is_none());
        assert!(entry.stage.is_none());
        assert!(entry.executor_stage.is_none());
    }

    #[tokio::test]
    async fn store_twice_fails() {
        let (_, store) = store();
        store.store_task(&record("task-1")).await.unwrap();
        let err = store.store_task(&record("task-1")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_, store) = store();
        let err = store.get_task(&TaskId::new("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn stage_counters_round_trip() {
        let (_, store) = store();
        let id = TaskId::new("task-1");
        store.store_task(&record("task-1")).await.unwrap();

        store.record_stage(&id, 3).await.unwrap();
        store.record_executor_stage(&id, 21).await.unwrap();
        store.stop_task(&id, TaskState::Canceled).await.unwrap();

        let entry = store.get_task(&id).await.unwrap();
        assert_eq!(entry.stage, Some(3));
        assert_eq!(entry.executor_stage, Some(21));
        assert_eq!(entry.stop, Some(TaskState::Canceled));
    }

    #[tokio::test]
    async fn delete_removes_despite_finalizer() {
        let (cluster, store) = store();
        let id = TaskId::new("task-1");
        store.store_task(&record("task-1")).await.unwrap();

        store.delete_task(&id).await.unwrap();
        assert!(store.get_task(&id).await.unwrap_err().is_not_found());
        assert!(cluster.config_object_names().is_empty());
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let (_, store) = store();
        let err = store.delete_task(&TaskId::new("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}

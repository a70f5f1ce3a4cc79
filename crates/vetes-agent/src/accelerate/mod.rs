//! Input acceleration.
//!
//! Two engines behind one contract: [`NullAccelerator`] does nothing, and
//! [`mount_bucket::MountBucketAccelerator`] replaces object-storage
//! downloads with shared, ref-counted bucket mounts. The syncer consults
//! the engine to rewrite input URLs; the reconciler consults it to inject
//! mounts into pod templates and to manage shared-mount lifetimes on task
//! start and finish.

pub mod mount_bucket;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vetes_core::names::{MOUNT_BUCKET_ACCELERATE_TYPE, NULL_ACCELERATE_TYPE};

use crate::cluster::{ClusterApi, PodTemplate};
use crate::config::AccelerateOptions;
use crate::error::{Error, Reconcile, Result};
use crate::record::TaskRecord;
use crate::tes::models::Task;

/// Acceleration engine contract.
#[async_trait]
pub trait Accelerator: Send + Sync {
    /// How often the periodic sweep should run; `None` when the engine has
    /// no sweep.
    fn clean_interval(&self) -> Option<Duration> {
        None
    }

    /// Periodic resource sweep. Only called when [`Self::clean_interval`]
    /// returns an interval.
    async fn clean(&self) {}

    /// Called by the syncer on a freshly fetched task. May rewrite input
    /// URLs in place; returns the shared-mount names to attach to the task.
    async fn modify_sync_task(&self, task: &mut Task) -> Result<Vec<String>>;

    /// Appends the task's shared mounts to an inputs-stager pod template.
    fn modify_inputs_filer(&self, template: &mut PodTemplate, record: &TaskRecord);

    /// Appends the task's shared mounts to an executor pod template.
    fn modify_executor(&self, template: &mut PodTemplate, record: &TaskRecord);

    /// Appends the task's shared mounts to an outputs-stager pod template.
    fn modify_outputs_filer(&self, template: &mut PodTemplate, record: &TaskRecord);

    /// Called before the task advances past stage-in preparation: makes sure
    /// every claimed shared mount exists and takes a reference on it. A
    /// non-done [`Reconcile`] defers the task (backing object deletion in
    /// flight).
    async fn on_process_task(&self, record: &TaskRecord) -> Result<Reconcile>;

    /// Called when the task reaches stop-and-clean: drops references and
    /// deletes mounts whose reference set became empty.
    async fn on_finish_task(&self, record: &TaskRecord) -> Result<()>;
}

/// Builds the configured acceleration engine.
pub fn new_accelerator(
    cluster: Arc<dyn ClusterApi>,
    namespace: &str,
    options: &AccelerateOptions,
) -> Result<Arc<dyn Accelerator>> {
    match options.accelerate_type.as_str() {
        NULL_ACCELERATE_TYPE => Ok(Arc::new(NullAccelerator)),
        MOUNT_BUCKET_ACCELERATE_TYPE => Ok(Arc::new(
            mount_bucket::MountBucketAccelerator::new(
                cluster,
                namespace,
                options.mount_bucket.clone(),
            ),
        )),
        other => Err(Error::configuration(format!(
            "unsupported accelerate type: {other}"
        ))),
    }
}

/// The no-op engine.
pub struct NullAccelerator;

#[async_trait]
impl Accelerator for NullAccelerator {
    async fn modify_sync_task(&self, _task: &mut Task) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn modify_inputs_filer(&self, _template: &mut PodTemplate, _record: &TaskRecord) {}

    fn modify_executor(&self, _template: &mut PodTemplate, _record: &TaskRecord) {}

    fn modify_outputs_filer(&self, _template: &mut PodTemplate, _record: &TaskRecord) {}

    async fn on_process_task(&self, _record: &TaskRecord) -> Result<Reconcile> {
        Ok(Reconcile::done())
    }

    async fn on_finish_task(&self, _record: &TaskRecord) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vetes_core::TaskId;

    #[tokio::test]
    async fn null_accelerator_is_inert() {
        let engine = NullAccelerator;
        let mut task = Task::default();
        assert!(engine.modify_sync_task(&mut task).await.unwrap().is_empty());

        let record = TaskRecord {
            id: TaskId::new("task-1"),
            ..TaskRecord::default()
        };
        assert!(engine.on_process_task(&record).await.unwrap().is_done());
        engine.on_finish_task(&record).await.unwrap();
        assert!(engine.clean_interval().is_none());
    }
}

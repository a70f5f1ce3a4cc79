//! Shared test harness: an agent wired entirely onto in-memory backends.
#![allow(dead_code)]

use std::sync::Arc;

use vetes_agent::accelerate::NullAccelerator;
use vetes_agent::cluster::memory::InMemoryCluster;
use vetes_agent::config::RunnerOptions;
use vetes_agent::offload::PvcOffload;
use vetes_agent::reconciler::runner::TaskRunner;
use vetes_agent::store::LocalStore;
use vetes_agent::syncer::Syncer;
use vetes_agent::tes::memory::InMemoryTaskService;
use vetes_agent::tes::models::{Executor, Task};
use vetes_core::{TaskId, TaskState};

pub const CLUSTER_ID: &str = "cluster-01";

pub struct Harness {
    pub cluster: Arc<InMemoryCluster>,
    pub service: Arc<InMemoryTaskService>,
    pub store: LocalStore,
    pub runner: Arc<TaskRunner>,
    pub syncer: Arc<Syncer>,
    pub dir: tempfile::TempDir,
}

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let cluster = Arc::new(InMemoryCluster::new());
    let service = Arc::new(InMemoryTaskService::new());
    let store = LocalStore::new(cluster.clone());
    let offload = Arc::new(PvcOffload::new("offload-pvc", dir.path()));

    let mut options = RunnerOptions::default();
    options.task_log.output_dir = dir.path().to_string_lossy().into_owned();
    options.task_log.pvc_name = "log-pvc".into();
    options.filer_image.image = "filer:latest".into();
    options.storage.enable = false;

    let runner = Arc::new(TaskRunner::new(
        service.clone(),
        store.clone(),
        offload.clone(),
        Arc::new(NullAccelerator),
        cluster.clone(),
        CLUSTER_ID,
        options,
    ));
    let syncer = Arc::new(
        Syncer::new(
            service.clone(),
            store.clone(),
            offload,
            Arc::new(NullAccelerator),
            CLUSTER_ID,
            4,
        )
        .with_offload_threshold(512),
    );

    Harness {
        cluster,
        service,
        store,
        runner,
        syncer,
        dir,
    }
}

/// A queued task with `executor_count` trivial executors.
pub fn queued_task(id: &str, executor_count: usize) -> Task {
    Task {
        id: TaskId::new(id),
        name: "demo".into(),
        state: TaskState::Queued,
        cluster_id: CLUSTER_ID.into(),
        executors: (0..executor_count)
            .map(|index| Executor {
                image: "ubuntu:22.04".into(),
                command: vec!["echo".into(), format!("step-{index}")],
                ..Executor::default()
            })
            .collect(),
        ..Task::default()
    }
}

/// The task's stage counter as currently stored, if the record still exists.
pub async fn stored_stage(harness: &Harness, id: &str) -> Option<i32> {
    harness
        .store
        .get_task(&TaskId::new(id))
        .await
        .ok()
        .and_then(|entry| entry.stage)
}

/// True once the local record is gone.
pub async fn record_gone(harness: &Harness, id: &str) -> bool {
    harness
        .store
        .get_task(&TaskId::new(id))
        .await
        .err()
        .is_some_and(|err| err.is_not_found())
}

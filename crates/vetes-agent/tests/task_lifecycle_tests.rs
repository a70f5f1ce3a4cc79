//! End-to-end task lifecycle scenarios against the in-memory backends.
//!
//! The tests stand in for the job controller: whenever a pass leaves a job
//! without a terminal condition, the test flips it according to the
//! scenario, then re-enters the stage machine the way a cluster event would.

mod common;

use common::{harness, queued_task, record_gone, stored_stage, Harness, CLUSTER_ID};

use vetes_agent::cluster::JobPhase;
use vetes_agent::tes::models::TaskInput;
use vetes_core::{TaskId, TaskState};

const MAX_PASSES: usize = 60;

/// Drives one task until its record is gone and the control plane shows a
/// terminal state. `flip_job` decides the fate of each job the moment it is
/// observed running: `JobPhase::Complete` or `JobPhase::Failed`.
async fn drive(
    harness: &Harness,
    id: &str,
    flip_job: impl Fn(&str) -> JobPhase,
) -> Vec<i32> {
    let task_id = TaskId::new(id);
    let mut stages = Vec::new();

    for _ in 0..MAX_PASSES {
        let outcome = harness
            .runner
            .process_task(&task_id)
            .await
            .expect("process task");
        assert!(
            outcome.is_done(),
            "unexpected requeue during drive: {outcome:?}"
        );

        if let Some(stage) = stored_stage(harness, id).await {
            stages.push(stage);
        }

        for job_name in harness.cluster.job_names() {
            let job = harness.cluster.job_snapshot(&job_name).expect("job snapshot");
            if job.phase() == JobPhase::Running && !job.meta.is_deleting() {
                match flip_job(&job_name) {
                    JobPhase::Failed => harness.cluster.set_job_failed(&job_name, "exit 1"),
                    _ => harness.cluster.set_job_complete(&job_name),
                }
            }
        }

        let terminal = harness
            .service
            .task_snapshot(&task_id)
            .is_some_and(|task| task.state.is_terminal());
        if terminal && record_gone(harness, id).await {
            return stages;
        }
    }
    panic!("task {id} did not reach a terminal state in {MAX_PASSES} passes");
}

#[tokio::test]
async fn plain_task_runs_to_complete() {
    let harness = harness();
    harness.service.put_task(queued_task("task-1", 1));
    harness.syncer.sync_tasks().await.unwrap();

    let stages = drive(&harness, "task-1", |_| JobPhase::Complete).await;

    // stage counter is monotonically non-decreasing
    assert!(stages.windows(2).all(|pair| pair[0] <= pair[1]), "{stages:?}");

    let task = harness.service.task_snapshot(&TaskId::new("task-1")).unwrap();
    assert_eq!(task.state, TaskState::Complete);

    // the final update carried the system log and both times
    let log = task.matched_log(CLUSTER_ID).unwrap();
    assert!(log.start_time.is_some());
    assert!(log.end_time.is_some());
    assert!(!log.system_logs.is_empty());

    // nothing is left behind: no jobs, no claims, no record, no log dir
    assert!(harness.cluster.job_names().is_empty());
    assert!(harness.cluster.pvc_names().is_empty());
    assert!(harness.cluster.config_object_names().is_empty());
    assert!(!harness.dir.path().join("task-1").exists());
}

#[tokio::test]
async fn second_executor_failure_is_executor_error() {
    let harness = harness();
    let mut task = queued_task("task-2", 3);
    // an extra volume so the task allocates (and must release) a claim
    task.volumes = vec!["/scratch".into()];
    harness.service.put_task(task);
    harness.syncer.sync_tasks().await.unwrap();

    drive(&harness, "task-2", |job_name| {
        if job_name.ends_with("-ex-01") {
            JobPhase::Failed
        } else {
            JobPhase::Complete
        }
    })
    .await;

    let task = harness.service.task_snapshot(&TaskId::new("task-2")).unwrap();
    assert_eq!(task.state, TaskState::ExecutorError);

    // jobs 00 and 01 were deleted, job 02 was never created
    assert!(harness.cluster.job_names().is_empty());
    assert!(harness.cluster.job_snapshot("task-2-ex-02").is_none());
    assert!(harness.cluster.pvc_names().is_empty());

    // the failure message reached the task log before the record was wiped
    let log = task.matched_log(CLUSTER_ID).unwrap();
    assert!(log.system_logs.iter().any(|blob| blob.contains("task-2-ex-01")));
}

#[tokio::test]
async fn canceling_mid_run_tears_everything_down() {
    let harness = harness();
    let mut task = queued_task("task-3", 1);
    task.volumes = vec!["/scratch".into()];
    harness.service.put_task(task);
    harness.syncer.sync_tasks().await.unwrap();

    // advance until the executor job exists and is running
    let task_id = TaskId::new("task-3");
    for _ in 0..MAX_PASSES {
        harness.runner.process_task(&task_id).await.unwrap();
        if harness.cluster.job_snapshot("task-3-ex-00").is_some() {
            break;
        }
    }
    let job = harness.cluster.job_snapshot("task-3-ex-00").expect("executor job exists");
    assert_eq!(job.phase(), JobPhase::Running);

    // the control plane flips the task to canceling
    {
        let mut snapshot = harness.service.task_snapshot(&task_id).unwrap();
        snapshot.state = TaskState::Canceling;
        harness.service.put_task(snapshot);
    }

    for _ in 0..MAX_PASSES {
        harness.runner.process_task(&task_id).await.unwrap();
        if record_gone(&harness, "task-3").await {
            break;
        }
    }

    let task = harness.service.task_snapshot(&task_id).unwrap();
    assert_eq!(task.state, TaskState::Canceled);
    assert!(harness.cluster.job_names().is_empty());
    assert!(harness.cluster.pvc_names().is_empty());
    assert!(record_gone(&harness, "task-3").await);
}

#[tokio::test]
async fn oversized_manifest_rides_the_offload_volume() {
    let harness = harness();
    let mut task = queued_task("task-4", 1);
    task.inputs = (0..40)
        .map(|index| TaskInput {
            url: format!("s3://bucket/some/rather/long/object/key/number/{index}"),
            path: format!("/data/file-{index}"),
        })
        .collect();
    harness.service.put_task(task);
    harness.syncer.sync_tasks().await.unwrap();

    // the manifest was spilled next to the agent
    let offload_file = harness.dir.path().join("task-4/inputs.json");
    assert!(offload_file.exists());

    let task_id = TaskId::new("task-4");
    for _ in 0..MAX_PASSES {
        harness.runner.process_task(&task_id).await.unwrap();
        if harness.cluster.job_snapshot("task-4-inputs-filer").is_some() {
            break;
        }
    }

    // the stager pod reads the manifest by path: ref annotation, claim
    // mounted read-only under the same path
    let job = harness
        .cluster
        .job_snapshot("task-4-inputs-filer")
        .expect("inputs filer job exists");
    let reference = job
        .spec
        .template
        .annotations
        .get("task-inputs-ref")
        .expect("ref annotation");
    assert_eq!(reference, &offload_file.to_string_lossy().into_owned());
    assert!(job
        .spec
        .template
        .volumes
        .iter()
        .any(|volume| volume.name == "offload-volume"));

    drive(&harness, "task-4", |_| JobPhase::Complete).await;

    // the spilled file went with the task
    assert!(!harness.dir.path().join("task-4").exists());
    let task = harness.service.task_snapshot(&task_id).unwrap();
    assert_eq!(task.state, TaskState::Complete);
}

#[tokio::test]
async fn inputs_filer_failure_is_system_error() {
    let harness = harness();
    let mut task = queued_task("task-5", 1);
    task.inputs = vec![TaskInput {
        url: "s3://bucket/key".into(),
        path: "/data/key".into(),
    }];
    harness.service.put_task(task);
    harness.syncer.sync_tasks().await.unwrap();

    drive(&harness, "task-5", |job_name| {
        if job_name.ends_with("-inputs-filer") {
            JobPhase::Failed
        } else {
            JobPhase::Complete
        }
    })
    .await;

    let task = harness.service.task_snapshot(&TaskId::new("task-5")).unwrap();
    assert_eq!(task.state, TaskState::SystemError);
    assert!(harness.cluster.job_names().is_empty());
}

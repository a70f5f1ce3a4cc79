//! Shared-mount lifecycle: ref-counting, per-submission credentials.

use std::sync::Arc;

use vetes_agent::accelerate::mount_bucket::MountBucketAccelerator;
use vetes_agent::accelerate::Accelerator;
use vetes_agent::cluster::memory::InMemoryCluster;
use vetes_agent::cluster::ClusterApi;
use vetes_agent::config::{MountBucketOptions, StaticSecretOptions};
use vetes_agent::record::{
    BioosInfo, BioosInfoMeta, BucketsAuthInfo, ExternalBucketAuth, TaskRecord,
};
use vetes_core::TaskId;

fn engine(cluster: Arc<InMemoryCluster>) -> MountBucketAccelerator {
    let options = MountBucketOptions {
        endpoint_url: "https://tos.example.com".into(),
        static_secret: StaticSecretOptions {
            enable: true,
            name: "tos-secret".into(),
        },
        ..MountBucketOptions::default()
    };
    MountBucketAccelerator::new(cluster, "vetes", options)
}

fn shared_mount_record(id: &str, mount: &str) -> TaskRecord {
    TaskRecord {
        id: TaskId::new(id),
        bioos_info: Some(BioosInfo {
            submission_id: "sub1".into(),
            meta: Some(BioosInfoMeta {
                mount_bucket: Some(true),
                ..BioosInfoMeta::default()
            }),
            ..BioosInfo::default()
        }),
        accelerate_names: vec![mount.into()],
        ..TaskRecord::default()
    }
}

fn external_record(id: &str, submission: &str, bucket: &str, ak: &str, sk: &str) -> TaskRecord {
    TaskRecord {
        id: TaskId::new(id),
        bioos_info: Some(BioosInfo {
            submission_id: submission.into(),
            meta: Some(BioosInfoMeta {
                mount_bucket: Some(true),
                buckets_auth_info: Some(BucketsAuthInfo {
                    external: vec![ExternalBucketAuth {
                        bucket: bucket.into(),
                        ak: ak.into(),
                        sk: sk.into(),
                    }],
                    ..BucketsAuthInfo::default()
                }),
                ..BioosInfoMeta::default()
            }),
            ..BioosInfo::default()
        }),
        accelerate_names: vec![format!("{submission}-{bucket}")],
        ..TaskRecord::default()
    }
}

#[tokio::test]
async fn mounts_live_exactly_while_referenced() {
    let cluster = Arc::new(InMemoryCluster::new());
    let engine = engine(cluster.clone());

    let records: Vec<TaskRecord> = (0..3)
        .map(|index| shared_mount_record(&format!("task-{index}"), "workflow-b"))
        .collect();

    for record in &records {
        let outcome = engine.on_process_task(record).await.unwrap();
        assert!(outcome.is_done());
    }

    // one claim and one volume, not three
    assert_eq!(cluster.pvc_names(), vec!["workflow-b".to_owned()]);
    assert_eq!(cluster.pv_names(), vec!["workflow-b".to_owned()]);
    assert_eq!(engine.reference_count("workflow-b").await, 3);

    engine.on_finish_task(&records[0]).await.unwrap();
    engine.on_finish_task(&records[1]).await.unwrap();
    assert_eq!(cluster.pvc_names(), vec!["workflow-b".to_owned()]);
    assert_eq!(engine.reference_count("workflow-b").await, 1);

    engine.on_finish_task(&records[2]).await.unwrap();
    assert!(cluster.pvc_names().is_empty());
    assert!(cluster.pv_names().is_empty());
    assert_eq!(engine.reference_count("workflow-b").await, 0);
}

#[tokio::test]
async fn finishing_a_task_twice_is_harmless() {
    let cluster = Arc::new(InMemoryCluster::new());
    let engine = engine(cluster.clone());
    let record = shared_mount_record("task-0", "workflow-b");

    engine.on_process_task(&record).await.unwrap();
    engine.on_finish_task(&record).await.unwrap();
    engine.on_finish_task(&record).await.unwrap();
    assert!(cluster.pvc_names().is_empty());
}

#[tokio::test]
async fn pv_carries_the_csi_attributes() {
    let cluster = Arc::new(InMemoryCluster::new());
    let engine = engine(cluster.clone());
    let record = shared_mount_record("task-0", "workflow-genomes");

    engine.on_process_task(&record).await.unwrap();

    let pv = cluster.get_pv("workflow-genomes").await.unwrap();
    assert_eq!(pv.spec.csi.driver, "tos.csi.volcengine.com");
    assert_eq!(pv.spec.csi.volume_handle, "workflow-genomes");
    let attributes = &pv.spec.csi.volume_attributes;
    assert_eq!(attributes.get("bucket").map(String::as_str), Some("genomes"));
    assert_eq!(attributes.get("path").map(String::as_str), Some("/"));
    assert_eq!(
        attributes.get("url").map(String::as_str),
        Some("https://tos.example.com")
    );
    assert_eq!(
        pv.spec.csi.node_publish_secret.as_ref().map(|s| s.name.as_str()),
        Some("tos-secret")
    );
    assert_eq!(pv.meta.label("bucket-name"), Some("genomes"));

    let pvc = cluster.get_pvc("workflow-genomes").await.unwrap();
    assert_eq!(pvc.spec.volume_name.as_deref(), Some("workflow-genomes"));
}

#[tokio::test]
async fn per_submission_mounts_do_not_share_credentials() {
    let cluster = Arc::new(InMemoryCluster::new());
    let engine = engine(cluster.clone());

    let first = external_record("task-a", "sub1", "x", "AK1", "SK1");
    let second = external_record("task-b", "sub2", "x", "AK2", "SK2");

    engine.on_process_task(&first).await.unwrap();
    engine.on_process_task(&second).await.unwrap();

    assert_eq!(cluster.pvc_names(), vec!["sub1-x".to_owned(), "sub2-x".to_owned()]);
    assert_eq!(cluster.secret_names(), vec!["sub1-x".to_owned(), "sub2-x".to_owned()]);

    let sub1_secret = cluster.get_secret("sub1-x").await.unwrap();
    assert_eq!(sub1_secret.data.get("akId").map(String::as_str), Some("AK1"));
    assert_eq!(sub1_secret.meta.label("managed-by"), Some("vetes-k8s-agent"));
    let sub2_secret = cluster.get_secret("sub2-x").await.unwrap();
    assert_eq!(sub2_secret.data.get("akId").map(String::as_str), Some("AK2"));

    // finishing sub1's only task removes its mount and secret, sub2 stays
    engine.on_finish_task(&first).await.unwrap();
    assert_eq!(cluster.pvc_names(), vec!["sub2-x".to_owned()]);
    assert_eq!(cluster.secret_names(), vec!["sub2-x".to_owned()]);

    engine.on_finish_task(&second).await.unwrap();
    assert!(cluster.pvc_names().is_empty());
    assert!(cluster.secret_names().is_empty());
}

#[tokio::test]
async fn rotated_credentials_update_the_managed_secret() {
    let cluster = Arc::new(InMemoryCluster::new());
    let engine = engine(cluster.clone());

    // a managed secret left over from before a restart, with stale keys
    let mut data = std::collections::BTreeMap::new();
    data.insert("akId".to_owned(), "AK1".to_owned());
    data.insert("akSecret".to_owned(), "SK1".to_owned());
    cluster
        .create_secret(vetes_agent::cluster::Secret {
            meta: vetes_agent::cluster::ObjectMeta::named("sub1-x")
                .with_label("managed-by", "vetes-k8s-agent"),
            data,
        })
        .await
        .unwrap();

    let record = external_record("task-a", "sub1", "x", "AK9", "SK9");
    engine.on_process_task(&record).await.unwrap();

    let secret = cluster.get_secret("sub1-x").await.unwrap();
    assert_eq!(secret.data.get("akId").map(String::as_str), Some("AK9"));
    assert_eq!(secret.data.get("akSecret").map(String::as_str), Some("SK9"));
}

#[tokio::test]
async fn operator_owned_secrets_are_left_alone() {
    let cluster = Arc::new(InMemoryCluster::new());
    let engine = engine(cluster.clone());

    let mut data = std::collections::BTreeMap::new();
    data.insert("akId".to_owned(), "OPERATOR".to_owned());
    cluster
        .create_secret(vetes_agent::cluster::Secret {
            meta: vetes_agent::cluster::ObjectMeta::named("sub1-x"),
            data,
        })
        .await
        .unwrap();

    let record = external_record("task-a", "sub1", "x", "AK9", "SK9");
    engine.on_process_task(&record).await.unwrap();

    let secret = cluster.get_secret("sub1-x").await.unwrap();
    assert_eq!(secret.data.get("akId").map(String::as_str), Some("OPERATOR"));
}

#[tokio::test]
async fn deleting_mount_defers_creation() {
    let cluster = Arc::new(InMemoryCluster::new());
    let engine = engine(cluster.clone());

    // a tombstoned claim from an earlier task still drains
    let mut pvc = vetes_agent::cluster::PersistentVolumeClaim {
        meta: vetes_agent::cluster::ObjectMeta::named("workflow-b"),
        ..vetes_agent::cluster::PersistentVolumeClaim::default()
    };
    pvc.meta = pvc.meta.with_finalizer("kubernetes.io/pvc-protection");
    cluster.create_pvc(pvc).await.unwrap();
    cluster.delete_pvc("workflow-b").await.unwrap();

    let record = shared_mount_record("task-0", "workflow-b");
    let outcome = engine.on_process_task(&record).await.unwrap();
    assert_eq!(
        outcome.requeue_after,
        Some(std::time::Duration::from_secs(5))
    );
    // the mount was not recreated while the tombstone drains
    assert!(cluster.get_pv("workflow-b").await.unwrap_err().is_not_found());
}

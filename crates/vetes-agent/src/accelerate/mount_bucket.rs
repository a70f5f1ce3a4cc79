//! Shared bucket-mount acceleration.
//!
//! Bucket-backed inputs are served from a FUSE mount of the bucket instead
//! of being downloaded: an input `s3://bucket/path/to/file` is rewritten to
//! `/tos-data/bucket/path/to/file`, and every pod of the task mounts the
//! bucket's shared claim read-only at `/tos-data/bucket`. The stager then
//! links workspace paths to the mount instead of transferring data.
//!
//! Mounts are shared across tasks and ref-counted: default-credential
//! buckets use one cluster-wide mount named `workflow-<bucket>`;
//! externally-credentialed buckets get a per-submission mount named
//! `<submissionId>-<bucket>` plus an agent-managed credential secret of the
//! same name. Backing objects exist exactly while the reference set is
//! non-empty.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use vetes_core::names::{
    bucket_mount_path, env, LABEL_BUCKET_NAME, LABEL_MANAGED_BY, MANAGED_BY_VALUE,
};
use vetes_core::TaskId;

use super::Accelerator;
use crate::cluster::{
    ClusterApi, CsiVolumeSource, EnvVar, ObjectMeta, PersistentVolume, PersistentVolumeClaim,
    PodTemplate, PvSpec, PvcSpec, Secret, SecretRef, Volume, VolumeMount, VolumeSource,
};
use crate::config::MountBucketOptions;
use crate::error::{Error, Reconcile, Result};
use crate::record::TaskRecord;
use crate::tes::models::Task;

const SECRET_KEY_AK: &str = "akId";
const SECRET_KEY_SK: &str = "akSecret";
const MOUNT_STORAGE_QUANTITY: &str = "20Gi";

/// Creating a mount defers while its tombstoned predecessor drains; a fresh
/// PV must not bind to a deleting PVC.
const DELETING_WAIT: Duration = Duration::from_secs(5);

/// Bucket-mount acceleration engine.
pub struct MountBucketAccelerator {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    options: MountBucketOptions,
    /// mount name -> task ids referencing it
    refs: Mutex<HashMap<String, HashSet<TaskId>>>,
}

impl MountBucketAccelerator {
    /// Creates the engine.
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        namespace: &str,
        options: MountBucketOptions,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.to_owned(),
            options,
            refs: Mutex::new(HashMap::new()),
        }
    }

    /// Current reference count of a mount (test support).
    pub async fn reference_count(&self, mount_name: &str) -> usize {
        self.refs
            .lock()
            .await
            .get(mount_name)
            .map_or(0, HashSet::len)
    }

    fn select_buckets(&self, task: &Task, external: &HashSet<String>) -> Vec<String> {
        let mut buckets = extract_buckets_ranked(task);
        // without default credentials only externally-credentialed buckets
        // can be mounted
        if self.options.static_secret.name.is_empty() {
            buckets.retain(|bucket| external.contains(bucket));
        }
        buckets.truncate(self.options.bucket_num_per_task);
        buckets
    }

    fn mount_claims(&self, template: &mut PodTemplate, record: &TaskRecord) {
        for mount_name in &record.accelerate_names {
            template.volumes.push(Volume {
                name: mount_name.clone(),
                source: VolumeSource::Pvc {
                    claim_name: mount_name.clone(),
                    read_only: true,
                },
            });
            let mount_path = bucket_mount_path(&parse_bucket_from_mount_name(mount_name));
            for container in &mut template.containers {
                container.volume_mounts.push(VolumeMount {
                    name: mount_name.clone(),
                    mount_path: mount_path.clone(),
                    sub_path: None,
                    read_only: true,
                });
            }
        }
    }

    fn add_mounted_env(template: &mut PodTemplate, record: &TaskRecord) {
        if record.accelerate_names.is_empty() {
            return;
        }
        for container in &mut template.containers {
            container.env.push(EnvVar::new(env::IS_MOUNTED, "true"));
        }
    }

    fn new_pv(&self, mount_name: &str, secret_name: &str) -> PersistentVolume {
        let bucket = parse_bucket_from_mount_name(mount_name);
        let secret_ref = SecretRef {
            name: secret_name.to_owned(),
            namespace: self.namespace.clone(),
        };
        let mut attributes = BTreeMap::new();
        attributes.insert("bucket".to_owned(), bucket.clone());
        attributes.insert("path".to_owned(), "/".to_owned());
        attributes.insert("url".to_owned(), self.options.endpoint_url.clone());
        attributes.insert(
            "fuse_pod_cpu_request".to_owned(),
            self.options.fuse_pod_resources.requests.cpu.clone(),
        );
        attributes.insert(
            "fuse_pod_cpu_limit".to_owned(),
            self.options.fuse_pod_resources.limits.cpu.clone(),
        );
        attributes.insert(
            "fuse_pod_memory_request".to_owned(),
            self.options.fuse_pod_resources.requests.memory.clone(),
        );
        attributes.insert(
            "fuse_pod_memory_limit".to_owned(),
            self.options.fuse_pod_resources.limits.memory.clone(),
        );
        if let Some(extra) = &self.options.additional_args {
            attributes.insert("additional_args".to_owned(), extra.clone());
        }

        PersistentVolume {
            meta: ObjectMeta::named(mount_name).with_label(LABEL_BUCKET_NAME, bucket),
            spec: PvSpec {
                storage: MOUNT_STORAGE_QUANTITY.to_owned(),
                csi: CsiVolumeSource {
                    driver: self.options.csi_driver.clone(),
                    volume_handle: mount_name.to_owned(),
                    node_publish_secret: Some(secret_ref.clone()),
                    node_stage_secret: Some(secret_ref),
                    volume_attributes: attributes,
                },
            },
        }
    }

    fn new_pvc(&self, mount_name: &str) -> PersistentVolumeClaim {
        let bucket = parse_bucket_from_mount_name(mount_name);
        PersistentVolumeClaim {
            meta: ObjectMeta::named(mount_name).with_label(LABEL_BUCKET_NAME, bucket),
            spec: PvcSpec {
                storage: MOUNT_STORAGE_QUANTITY.to_owned(),
                storage_class: None,
                volume_name: Some(mount_name.to_owned()),
            },
        }
    }

    /// Ensures PV and PVC exist. Returns true when either is mid-deletion
    /// and creation must wait.
    async fn create_pv_and_pvc(&self, mount_name: &str, secret_name: &str) -> Result<bool> {
        let pv_exists = match self.cluster.get_pv(mount_name).await {
            Ok(pv) => {
                if pv.meta.is_deleting() {
                    return Ok(true);
                }
                true
            }
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err),
        };
        let pvc_exists = match self.cluster.get_pvc(mount_name).await {
            Ok(pvc) => {
                if pvc.meta.is_deleting() {
                    return Ok(true);
                }
                true
            }
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err),
        };

        if !pv_exists {
            match self.cluster.create_pv(self.new_pv(mount_name, secret_name)).await {
                Ok(()) => {}
                Err(err) if err.is_already_exists() => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        if !pvc_exists {
            match self.cluster.create_pvc(self.new_pvc(mount_name)).await {
                Ok(()) => {}
                Err(err) if err.is_already_exists() => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        Ok(false)
    }

    /// Creates or refreshes an agent-managed credential secret. Returns true
    /// when the existing secret is mid-deletion.
    async fn store_secret(&self, name: &str, ak: &str, sk: &str) -> Result<bool> {
        let existing = match self.cluster.get_secret(name).await {
            Ok(secret) => secret,
            Err(err) if err.is_not_found() => {
                let mut data = BTreeMap::new();
                data.insert(SECRET_KEY_AK.to_owned(), ak.to_owned());
                data.insert(SECRET_KEY_SK.to_owned(), sk.to_owned());
                let secret = Secret {
                    meta: ObjectMeta::named(name).with_label(LABEL_MANAGED_BY, MANAGED_BY_VALUE),
                    data,
                };
                return match self.cluster.create_secret(secret).await {
                    Ok(()) | Err(Error::AlreadyExists { .. }) => Ok(false),
                    Err(err) => Err(err),
                };
            }
            Err(err) => return Err(err),
        };

        // an operator-provided secret of the same name is left alone
        if existing.meta.label(LABEL_MANAGED_BY) != Some(MANAGED_BY_VALUE) {
            return Ok(false);
        }
        if existing.meta.is_deleting() {
            return Ok(true);
        }

        let ak_matches = existing.data.get(SECRET_KEY_AK).is_some_and(|v| v == ak);
        let sk_matches = existing.data.get(SECRET_KEY_SK).is_some_and(|v| v == sk);
        if ak_matches && sk_matches {
            return Ok(false);
        }
        let mut data = existing.data;
        data.insert(SECRET_KEY_AK.to_owned(), ak.to_owned());
        data.insert(SECRET_KEY_SK.to_owned(), sk.to_owned());
        self.cluster.update_secret_data(name, data).await?;
        Ok(false)
    }

    async fn delete_pv_and_pvc(&self, mount_name: &str) -> Result<()> {
        match self.cluster.delete_pvc(mount_name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        match self.cluster.delete_pv(mount_name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        Ok(())
    }
}

#[async_trait]
impl Accelerator for MountBucketAccelerator {
    async fn modify_sync_task(&self, task: &mut Task) -> Result<Vec<String>> {
        let Some(info) = &task.bioos_info else {
            return Ok(Vec::new());
        };
        let wants_mount = info
            .meta
            .as_ref()
            .and_then(|meta| meta.mount_bucket)
            .unwrap_or(false);
        if !wants_mount {
            return Ok(Vec::new());
        }

        let external: HashSet<String> = info
            .meta
            .as_ref()
            .and_then(|meta| meta.buckets_auth_info.as_ref())
            .map(|auth| auth.external.iter().map(|e| e.bucket.clone()).collect())
            .unwrap_or_default();

        let buckets = self.select_buckets(task, &external);
        if buckets.is_empty() {
            return Ok(Vec::new());
        }

        let submission_id = info.submission_id.clone();
        let mut mount_names = Vec::with_capacity(buckets.len());
        let bucket_set: HashSet<&String> = buckets.iter().collect();
        for bucket in &buckets {
            if external.contains(bucket) {
                mount_names.push(mount_name_for_external_bucket(&submission_id, bucket));
            } else {
                mount_names.push(mount_name_for_bucket(bucket));
            }
        }

        for input in &mut task.inputs {
            let Some(bucket) = extract_bucket(&input.url) else {
                continue;
            };
            if !bucket_set.contains(&bucket) {
                continue;
            }
            input.url = input
                .url
                .replacen(&format!("s3://{bucket}"), &bucket_mount_path(&bucket), 1);
        }

        Ok(mount_names)
    }

    fn modify_inputs_filer(&self, template: &mut PodTemplate, record: &TaskRecord) {
        self.mount_claims(template, record);
        Self::add_mounted_env(template, record);
    }

    fn modify_executor(&self, template: &mut PodTemplate, record: &TaskRecord) {
        self.mount_claims(template, record);
    }

    fn modify_outputs_filer(&self, template: &mut PodTemplate, record: &TaskRecord) {
        // outputs occasionally re-upload files that came from inputs (e.g.
        // scripts), so the outputs stager mounts the buckets too
        self.mount_claims(template, record);
        Self::add_mounted_env(template, record);
    }

    async fn on_process_task(&self, record: &TaskRecord) -> Result<Reconcile> {
        let Some(info) = &record.bioos_info else {
            return Ok(Reconcile::done());
        };
        if record.accelerate_names.is_empty() {
            return Ok(Reconcile::done());
        }

        let external_auth: HashMap<&str, (&str, &str)> = info
            .external_auth()
            .iter()
            .map(|auth| (auth.bucket.as_str(), (auth.ak.as_str(), auth.sk.as_str())))
            .collect();

        let mut refs = self.refs.lock().await;
        let mut errors = Vec::new();
        let mut deleting = false;

        for mount_name in &record.accelerate_names {
            if let Some(holders) = refs.get_mut(mount_name) {
                holders.insert(record.id.clone());
                continue;
            }

            let bucket = parse_bucket_from_mount_name(mount_name);
            let mut secret_name = self.options.static_secret.name.clone();
            if let Some(&(ak, sk)) = external_auth.get(bucket.as_str()) {
                secret_name = external_secret_name(&info.submission_id, &bucket);
                match self.store_secret(&secret_name, ak, sk).await {
                    Ok(true) => {
                        deleting = true;
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        errors.push(err);
                        continue;
                    }
                }
            }

            match self.create_pv_and_pvc(mount_name, &secret_name).await {
                Ok(true) => {
                    deleting = true;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            }
            refs.entry(mount_name.clone())
                .or_default()
                .insert(record.id.clone());
        }

        if let Some(err) = Error::aggregate(errors) {
            return Err(err);
        }
        if deleting {
            return Ok(Reconcile::after(DELETING_WAIT));
        }
        Ok(Reconcile::done())
    }

    async fn on_finish_task(&self, record: &TaskRecord) -> Result<()> {
        let Some(info) = &record.bioos_info else {
            return Ok(());
        };
        if record.accelerate_names.is_empty() {
            return Ok(());
        }

        let external: HashSet<&str> = info
            .external_auth()
            .iter()
            .map(|auth| auth.bucket.as_str())
            .collect();

        let mut refs = self.refs.lock().await;
        let mut errors = Vec::new();

        for mount_name in &record.accelerate_names {
            if let Some(holders) = refs.get_mut(mount_name) {
                holders.remove(&record.id);
                if !holders.is_empty() {
                    continue;
                }
            }
            if let Err(err) = self.delete_pv_and_pvc(mount_name).await {
                errors.push(err);
                continue;
            }
            let bucket = parse_bucket_from_mount_name(mount_name);
            if external.contains(bucket.as_str()) {
                let secret_name = external_secret_name(&info.submission_id, &bucket);
                match self.cluster.delete_secret(&secret_name).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => {
                        errors.push(err);
                        continue;
                    }
                }
            }
            refs.remove(mount_name);
        }

        Error::aggregate(errors).map_or(Ok(()), Err)
    }
}

/// Mount name of a default-credential bucket, shared across the cluster.
#[must_use]
pub fn mount_name_for_bucket(bucket: &str) -> String {
    format!("workflow-{bucket}")
}

/// Mount name of an externally-credentialed bucket, shared within one
/// submission.
#[must_use]
pub fn mount_name_for_external_bucket(submission_id: &str, bucket: &str) -> String {
    format!("{submission_id}-{bucket}")
}

/// Name of the agent-managed secret backing an external-bucket mount.
#[must_use]
pub fn external_secret_name(submission_id: &str, bucket: &str) -> String {
    format!("{submission_id}-{bucket}")
}

/// Recovers the bucket from a mount name.
///
/// Mount names are `workflow-<bucket>` or `<submissionId>-<bucket>`; the
/// piece after the first dash is taken as the bucket, which assumes neither
/// prefix contains a dash. The `bucket-name` label on the PV/PVC carries the
/// unambiguous value for operators.
#[must_use]
pub fn parse_bucket_from_mount_name(mount_name: &str) -> String {
    match mount_name.split_once('-') {
        Some((_, bucket)) => bucket.to_owned(),
        None => mount_name.to_owned(),
    }
}

/// Extracts the bucket from an `s3://` URL; `None` for any other shape.
#[must_use]
pub fn extract_bucket(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    if parsed.scheme() != "s3" {
        return None;
    }
    parsed.host_str().map(str::to_owned)
}

/// All buckets referenced by the task's inputs, most-referenced first.
fn extract_buckets_ranked(task: &Task) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for input in &task.inputs {
        if let Some(bucket) = extract_bucket(&input.url) {
            *counts.entry(bucket).or_default() += 1;
        }
    }
    let mut buckets: Vec<(String, usize)> = counts.into_iter().collect();
    buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    buckets.into_iter().map(|(bucket, _)| bucket).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tes::models::{BioosInfo, BioosInfoMeta, TaskInput};

    fn mount_task(inputs: &[&str]) -> Task {
        Task {
            id: TaskId::new("task-1"),
            bioos_info: Some(BioosInfo {
                submission_id: "sub1".into(),
                meta: Some(BioosInfoMeta {
                    mount_bucket: Some(true),
                    ..BioosInfoMeta::default()
                }),
                ..BioosInfo::default()
            }),
            inputs: inputs
                .iter()
                .map(|url| TaskInput {
                    url: (*url).to_owned(),
                    path: "/data/file".into(),
                })
                .collect(),
            ..Task::default()
        }
    }

    fn engine_with_default_secret() -> MountBucketAccelerator {
        let cluster = Arc::new(crate::cluster::memory::InMemoryCluster::new());
        let options = MountBucketOptions {
            endpoint_url: "https://tos.example.com".into(),
            static_secret: crate::config::StaticSecretOptions {
                enable: true,
                name: "tos-secret".into(),
            },
            ..MountBucketOptions::default()
        };
        MountBucketAccelerator::new(cluster, "vetes", options)
    }

    #[test]
    fn bucket_extraction() {
        assert_eq!(extract_bucket("s3://genomes/ref.fa"), Some("genomes".into()));
        assert_eq!(extract_bucket("https://host/file"), None);
        assert_eq!(extract_bucket("/tos-data/genomes/ref.fa"), None);
        assert_eq!(extract_bucket("not a url"), None);
    }

    #[test]
    fn mount_name_round_trip() {
        assert_eq!(mount_name_for_bucket("b1"), "workflow-b1");
        assert_eq!(mount_name_for_external_bucket("sub1", "b1"), "sub1-b1");
        assert_eq!(parse_bucket_from_mount_name("workflow-b1"), "b1");
        assert_eq!(parse_bucket_from_mount_name("sub1-b1"), "b1");
        assert_eq!(parse_bucket_from_mount_name("plain"), "plain");
    }

    #[test]
    fn buckets_ranked_by_reference_count() {
        let task = mount_task(&["s3://b/k1", "s3://c/k", "s3://b/k2"]);
        assert_eq!(extract_buckets_ranked(&task), vec!["b".to_owned(), "c".to_owned()]);
    }

    #[tokio::test]
    async fn sync_rewrites_mountable_urls() {
        let engine = engine_with_default_secret();
        let mut task = mount_task(&["s3://b/k1", "s3://b/k2", "s3://c/k"]);

        let names = engine.modify_sync_task(&mut task).await.unwrap();
        assert_eq!(names, vec!["workflow-b".to_owned(), "workflow-c".to_owned()]);
        assert_eq!(task.inputs[0].url, "/tos-data/b/k1");
        assert_eq!(task.inputs[1].url, "/tos-data/b/k2");
        assert_eq!(task.inputs[2].url, "/tos-data/c/k");
    }

    #[tokio::test]
    async fn sync_without_opt_in_is_a_no_op() {
        let engine = engine_with_default_secret();
        let mut task = mount_task(&["s3://b/k"]);
        task.bioos_info.as_mut().unwrap().meta.as_mut().unwrap().mount_bucket = Some(false);

        let names = engine.modify_sync_task(&mut task).await.unwrap();
        assert!(names.is_empty());
        assert_eq!(task.inputs[0].url, "s3://b/k");
    }

    #[tokio::test]
    async fn bucket_cap_applies_after_ranking() {
        let cluster = Arc::new(crate::cluster::memory::InMemoryCluster::new());
        let options = MountBucketOptions {
            endpoint_url: "https://tos.example.com".into(),
            bucket_num_per_task: 1,
            static_secret: crate::config::StaticSecretOptions {
                enable: true,
                name: "tos-secret".into(),
            },
            ..MountBucketOptions::default()
        };
        let engine = MountBucketAccelerator::new(cluster, "vetes", options);
        let mut task = mount_task(&["s3://b/k1", "s3://c/k", "s3://b/k2"]);

        let names = engine.modify_sync_task(&mut task).await.unwrap();
        assert_eq!(names, vec!["workflow-b".to_owned()]);
        // only the kept bucket is rewritten
        assert_eq!(task.inputs[0].url, "/tos-data/b/k1");
        assert_eq!(task.inputs[1].url, "s3://c/k");
    }

    #[tokio::test]
    async fn without_default_secret_only_external_buckets_mount() {
        let cluster = Arc::new(crate::cluster::memory::InMemoryCluster::new());
        let options = MountBucketOptions {
            endpoint_url: "https://tos.example.com".into(),
            ..MountBucketOptions::default()
        };
        let engine = MountBucketAccelerator::new(cluster, "vetes", options);

        let mut task = mount_task(&["s3://b/k", "s3://x/k"]);
        task.bioos_info
            .as_mut()
            .unwrap()
            .meta
            .as_mut()
            .unwrap()
            .buckets_auth_info = Some(crate::tes::models::BucketsAuthInfo {
            external: vec![crate::tes::models::ExternalBucketAuthInfo {
                bucket: "x".into(),
                ak: "AK".into(),
                sk: "SK".into(),
            }],
            ..crate::tes::models::BucketsAuthInfo::default()
        });

        let names = engine.modify_sync_task(&mut task).await.unwrap();
        assert_eq!(names, vec!["sub1-x".to_owned()]);
        assert_eq!(task.inputs[0].url, "s3://b/k");
        assert_eq!(task.inputs[1].url, "/tos-data/x/k");
    }
}

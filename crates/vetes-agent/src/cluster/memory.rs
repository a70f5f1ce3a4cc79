//! In-memory cluster implementation.
//!
//! Carries the cluster's object semantics (already-exists, not-found,
//! finalizers, deletion timestamps, change events) without a cluster. Used
//! by the test suite and by local development runs.
//!
//! ## Limitations
//!
//! - **Single-process only**: no durability, no cross-process visibility
//! - **No controllers**: nothing stamps pods out of jobs; tests place pods
//!   and flip job conditions through the test-support methods

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use super::objects::{
    BatchJob, ConfigObject, JobCondition, JobConditionType, ObjectMeta, PersistentVolume,
    PersistentVolumeClaim, Pod, PodEventRecord, PodStatus, Secret,
};
use super::{ClusterApi, ClusterEvent, ObjectKind};
use crate::error::{Error, Result};

const EVENT_CAPACITY: usize = 1024;

#[derive(Default)]
struct State {
    config_objects: HashMap<String, ConfigObject>,
    jobs: HashMap<String, BatchJob>,
    pvcs: HashMap<String, PersistentVolumeClaim>,
    pvs: HashMap<String, PersistentVolume>,
    secrets: HashMap<String, Secret>,
    pods: HashMap<String, Pod>,
    pod_logs: HashMap<String, String>,
    pod_events: Vec<PodEventRecord>,
}

/// In-memory [`ClusterApi`] implementation.
pub struct InMemoryCluster {
    state: Mutex<State>,
    events: broadcast::Sender<ClusterEvent>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // Mutex poisoning only happens after a panic in another test thread.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit(&self, kind: ObjectKind, meta: &ObjectMeta) {
        let _ = self.events.send(ClusterEvent {
            kind,
            name: meta.name.clone(),
            labels: meta.labels.clone(),
        });
    }

    /// Marks deletion on `meta`, returning true when the object should be
    /// removed immediately (no finalizers held).
    fn request_delete(meta: &mut ObjectMeta) -> bool {
        if meta.finalizers.is_empty() {
            return true;
        }
        if meta.deletion_timestamp.is_none() {
            meta.deletion_timestamp = Some(Utc::now());
        }
        false
    }

    // --- Test support -----------------------------------------------------

    /// Marks a job complete (test support).
    ///
    /// # Panics
    ///
    /// Panics if the job does not exist.
    pub fn set_job_complete(&self, name: &str) {
        let meta = {
            let mut state = self.lock();
            let job = state.jobs.get_mut(name).expect("job exists");
            job.status.conditions.push(JobCondition {
                condition: JobConditionType::Complete,
                status: true,
                message: None,
            });
            job.meta.clone()
        };
        self.emit(ObjectKind::Job, &meta);
    }

    /// Marks a job failed (test support).
    ///
    /// # Panics
    ///
    /// Panics if the job does not exist.
    pub fn set_job_failed(&self, name: &str, message: &str) {
        let meta = {
            let mut state = self.lock();
            let job = state.jobs.get_mut(name).expect("job exists");
            job.status.conditions.push(JobCondition {
                condition: JobConditionType::Failed,
                status: true,
                message: Some(message.to_owned()),
            });
            job.meta.clone()
        };
        self.emit(ObjectKind::Job, &meta);
    }

    /// Inserts or replaces a pod (test support; stands in for the job
    /// controller).
    pub fn put_pod(&self, pod: Pod) {
        let meta = pod.meta.clone();
        self.lock().pods.insert(meta.name.clone(), pod);
        self.emit(ObjectKind::Pod, &meta);
    }

    /// Replaces a pod's status (test support).
    ///
    /// # Panics
    ///
    /// Panics if the pod does not exist.
    pub fn set_pod_status(&self, name: &str, status: PodStatus) {
        let meta = {
            let mut state = self.lock();
            let pod = state.pods.get_mut(name).expect("pod exists");
            pod.status = status;
            pod.meta.clone()
        };
        self.emit(ObjectKind::Pod, &meta);
    }

    /// Stores a pod's container log (test support).
    pub fn set_pod_log(&self, name: &str, content: &str) {
        self.lock().pod_logs.insert(name.to_owned(), content.to_owned());
    }

    /// Records a pod lifecycle event (test support).
    pub fn push_pod_event(&self, event: PodEventRecord) {
        self.lock().pod_events.push(event);
    }

    /// Names of all live jobs, sorted.
    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().jobs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all live claims, sorted.
    #[must_use]
    pub fn pvc_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().pvcs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all live volumes, sorted.
    #[must_use]
    pub fn pv_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().pvs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all live secrets, sorted.
    #[must_use]
    pub fn secret_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().secrets.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all live config objects, sorted.
    #[must_use]
    pub fn config_object_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().config_objects.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of a job, if present (test support).
    #[must_use]
    pub fn job_snapshot(&self, name: &str) -> Option<BatchJob> {
        self.lock().jobs.get(name).cloned()
    }

    /// Snapshot of a pod, if present (test support).
    #[must_use]
    pub fn pod_snapshot(&self, name: &str) -> Option<Pod> {
        self.lock().pods.get(name).cloned()
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn create_config_object(&self, object: ConfigObject) -> Result<()> {
        let meta = object.meta.clone();
        {
            let mut state = self.lock();
            if state.config_objects.contains_key(&meta.name) {
                return Err(Error::already_exists("configobject", meta.name));
            }
            state.config_objects.insert(meta.name.clone(), object);
        }
        self.emit(ObjectKind::ConfigObject, &meta);
        Ok(())
    }

    async fn get_config_object(&self, name: &str) -> Result<ConfigObject> {
        self.lock()
            .config_objects
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("configobject", name))
    }

    async fn annotate_config_object(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let meta = {
            let mut state = self.lock();
            let object = state
                .config_objects
                .get_mut(name)
                .ok_or_else(|| Error::not_found("configobject", name))?;
            object
                .meta
                .annotations
                .insert(key.to_owned(), value.to_owned());
            object.meta.clone()
        };
        self.emit(ObjectKind::ConfigObject, &meta);
        Ok(())
    }

    async fn delete_config_object(&self, name: &str) -> Result<()> {
        let meta = {
            let mut state = self.lock();
            let object = state
                .config_objects
                .get_mut(name)
                .ok_or_else(|| Error::not_found("configobject", name))?;
            if Self::request_delete(&mut object.meta) {
                state.config_objects.remove(name).map(|o| o.meta)
            } else {
                state.config_objects.get(name).map(|o| o.meta.clone())
            }
        };
        if let Some(meta) = meta {
            self.emit(ObjectKind::ConfigObject, &meta);
        }
        Ok(())
    }

    async fn create_job(&self, job: BatchJob) -> Result<()> {
        let meta = job.meta.clone();
        {
            let mut state = self.lock();
            if state.jobs.contains_key(&meta.name) {
                return Err(Error::already_exists("job", meta.name));
            }
            state.jobs.insert(meta.name.clone(), job);
        }
        self.emit(ObjectKind::Job, &meta);
        Ok(())
    }

    async fn get_job(&self, name: &str) -> Result<BatchJob> {
        self.lock()
            .jobs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("job", name))
    }

    async fn stop_job(&self, name: &str) -> Result<()> {
        let meta = {
            let mut state = self.lock();
            let job = state
                .jobs
                .get_mut(name)
                .ok_or_else(|| Error::not_found("job", name))?;
            job.spec.active_deadline_seconds = Some(0);
            job.meta.clone()
        };
        self.emit(ObjectKind::Job, &meta);
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        let meta = {
            let mut state = self.lock();
            let job = state
                .jobs
                .get_mut(name)
                .ok_or_else(|| Error::not_found("job", name))?;
            if Self::request_delete(&mut job.meta) {
                state.jobs.remove(name).map(|j| j.meta)
            } else {
                state.jobs.get(name).map(|j| j.meta.clone())
            }
        };
        if let Some(meta) = meta {
            self.emit(ObjectKind::Job, &meta);
        }
        Ok(())
    }

    async fn create_pvc(&self, pvc: PersistentVolumeClaim) -> Result<()> {
        let meta = pvc.meta.clone();
        {
            let mut state = self.lock();
            if state.pvcs.contains_key(&meta.name) {
                return Err(Error::already_exists("pvc", meta.name));
            }
            state.pvcs.insert(meta.name.clone(), pvc);
        }
        self.emit(ObjectKind::Pvc, &meta);
        Ok(())
    }

    async fn get_pvc(&self, name: &str) -> Result<PersistentVolumeClaim> {
        self.lock()
            .pvcs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("pvc", name))
    }

    async fn delete_pvc(&self, name: &str) -> Result<()> {
        let meta = {
            let mut state = self.lock();
            let pvc = state
                .pvcs
                .get_mut(name)
                .ok_or_else(|| Error::not_found("pvc", name))?;
            if Self::request_delete(&mut pvc.meta) {
                state.pvcs.remove(name).map(|p| p.meta)
            } else {
                state.pvcs.get(name).map(|p| p.meta.clone())
            }
        };
        if let Some(meta) = meta {
            self.emit(ObjectKind::Pvc, &meta);
        }
        Ok(())
    }

    async fn create_pv(&self, pv: PersistentVolume) -> Result<()> {
        let meta = pv.meta.clone();
        {
            let mut state = self.lock();
            if state.pvs.contains_key(&meta.name) {
                return Err(Error::already_exists("pv", meta.name));
            }
            state.pvs.insert(meta.name.clone(), pv);
        }
        self.emit(ObjectKind::Pv, &meta);
        Ok(())
    }

    async fn get_pv(&self, name: &str) -> Result<PersistentVolume> {
        self.lock()
            .pvs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("pv", name))
    }

    async fn delete_pv(&self, name: &str) -> Result<()> {
        let meta = {
            let mut state = self.lock();
            let pv = state
                .pvs
                .get_mut(name)
                .ok_or_else(|| Error::not_found("pv", name))?;
            if Self::request_delete(&mut pv.meta) {
                state.pvs.remove(name).map(|p| p.meta)
            } else {
                state.pvs.get(name).map(|p| p.meta.clone())
            }
        };
        if let Some(meta) = meta {
            self.emit(ObjectKind::Pv, &meta);
        }
        Ok(())
    }

    async fn create_secret(&self, secret: Secret) -> Result<()> {
        let meta = secret.meta.clone();
        {
            let mut state = self.lock();
            if state.secrets.contains_key(&meta.name) {
                return Err(Error::already_exists("secret", meta.name));
            }
            state.secrets.insert(meta.name.clone(), secret);
        }
        self.emit(ObjectKind::Secret, &meta);
        Ok(())
    }

    async fn get_secret(&self, name: &str) -> Result<Secret> {
        self.lock()
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("secret", name))
    }

    async fn update_secret_data(&self, name: &str, data: BTreeMap<String, String>) -> Result<()> {
        let meta = {
            let mut state = self.lock();
            let secret = state
                .secrets
                .get_mut(name)
                .ok_or_else(|| Error::not_found("secret", name))?;
            secret.data = data;
            secret.meta.clone()
        };
        self.emit(ObjectKind::Secret, &meta);
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        let meta = {
            let mut state = self.lock();
            let secret = state
                .secrets
                .get_mut(name)
                .ok_or_else(|| Error::not_found("secret", name))?;
            if Self::request_delete(&mut secret.meta) {
                state.secrets.remove(name).map(|s| s.meta)
            } else {
                state.secrets.get(name).map(|s| s.meta.clone())
            }
        };
        if let Some(meta) = meta {
            self.emit(ObjectKind::Secret, &meta);
        }
        Ok(())
    }

    async fn get_pod(&self, name: &str) -> Result<Pod> {
        self.lock()
            .pods
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("pod", name))
    }

    async fn list_pods(&self, selector: &[(&str, &str)]) -> Result<Vec<Pod>> {
        let pods = self
            .lock()
            .pods
            .values()
            .filter(|pod| pod.meta.matches_labels(selector))
            .cloned()
            .collect();
        Ok(pods)
    }

    async fn delete_pods(&self, selector: &[(&str, &str)]) -> Result<()> {
        let touched: Vec<ObjectMeta> = {
            let mut state = self.lock();
            let names: Vec<String> = state
                .pods
                .values()
                .filter(|pod| pod.meta.matches_labels(selector))
                .map(|pod| pod.meta.name.clone())
                .collect();
            let mut touched = Vec::with_capacity(names.len());
            for name in names {
                let Some(pod) = state.pods.get_mut(&name) else {
                    continue;
                };
                if Self::request_delete(&mut pod.meta) {
                    if let Some(removed) = state.pods.remove(&name) {
                        touched.push(removed.meta);
                    }
                } else if let Some(pod) = state.pods.get(&name) {
                    touched.push(pod.meta.clone());
                }
            }
            touched
        };
        for meta in &touched {
            self.emit(ObjectKind::Pod, meta);
        }
        Ok(())
    }

    async fn add_pod_finalizer(&self, name: &str, finalizer: &str) -> Result<()> {
        let mut state = self.lock();
        let pod = state
            .pods
            .get_mut(name)
            .ok_or_else(|| Error::not_found("pod", name))?;
        if !pod.meta.finalizers.iter().any(|f| f == finalizer) {
            pod.meta.finalizers.push(finalizer.to_owned());
        }
        Ok(())
    }

    async fn pod_logs(&self, name: &str) -> Result<Option<String>> {
        Ok(self.lock().pod_logs.get(name).cloned())
    }

    async fn pod_events(&self, name: &str) -> Result<Vec<PodEventRecord>> {
        Ok(self
            .lock()
            .pod_events
            .iter()
            .filter(|event| event.pod_name == name)
            .cloned()
            .collect())
    }

    async fn remove_finalizer(&self, kind: ObjectKind, name: &str, finalizer: &str) -> Result<()> {
        let meta = {
            let mut state = self.lock();

            macro_rules! strip_from {
                ($map:expr) => {{
                    match $map.get_mut(name) {
                        None => None,
                        Some(object) => {
                            object.meta.finalizers.retain(|f| f != finalizer);
                            if object.meta.is_deleting() && object.meta.finalizers.is_empty() {
                                $map.remove(name).map(|o| o.meta)
                            } else {
                                $map.get(name).map(|o| o.meta.clone())
                            }
                        }
                    }
                }};
            }

            match kind {
                ObjectKind::ConfigObject => strip_from!(state.config_objects),
                ObjectKind::Job => strip_from!(state.jobs),
                ObjectKind::Pod => strip_from!(state.pods),
                ObjectKind::Pvc => strip_from!(state.pvcs),
                ObjectKind::Pv => strip_from!(state.pvs),
                ObjectKind::Secret => strip_from!(state.secrets),
            }
        };
        if let Some(meta) = meta {
            self.emit(kind, &meta);
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }
}

//! Manifest offload to a shared volume.
//!
//! Inputs/outputs manifests above the offload threshold are written to
//! `<base>/<taskId>/{inputs,outputs}.json` on a claim shared with the
//! staging containers and referenced by path; the stager mounts the same
//! claim read-only under the same path and is told where to look through
//! environment variables.

use std::path::{Path, PathBuf};

use vetes_core::names::{env, PVC_OFFLOAD_TYPE};
use vetes_core::TaskId;

use crate::cluster::{EnvVar, PodTemplate, Volume, VolumeMount, VolumeSource};
use crate::config::OffloadOptions;
use crate::error::{Error, Result};

const OFFLOAD_VOLUME_NAME: &str = "offload-volume";
const INPUTS_FILE_NAME: &str = "inputs.json";
const OUTPUTS_FILE_NAME: &str = "outputs.json";

/// Spills oversized manifests to shared storage and wires the mount into
/// stager pods.
pub trait OffloadHelper: Send + Sync {
    /// Writes the inputs manifest, returning the path the stager should read.
    fn offload_inputs(&self, task_id: &TaskId, inputs_json: &[u8]) -> Result<String>;

    /// Writes the outputs manifest, returning the path the stager should read.
    fn offload_outputs(&self, task_id: &TaskId, outputs_json: &[u8]) -> Result<String>;

    /// Removes the task's offload directory. Best-effort.
    fn delete_offload_file(&self, task_id: &TaskId);

    /// Mounts the offload claim into an inputs-stager pod template.
    fn modify_inputs_filer(&self, task_id: &TaskId, template: &mut PodTemplate);

    /// Mounts the offload claim into an outputs-stager pod template.
    fn modify_outputs_filer(&self, task_id: &TaskId, template: &mut PodTemplate);
}

/// Builds the configured offload helper.
pub fn new_helper(options: &OffloadOptions) -> Result<std::sync::Arc<dyn OffloadHelper>> {
    match options.offload_type.as_str() {
        PVC_OFFLOAD_TYPE => Ok(std::sync::Arc::new(PvcOffload::new(
            &options.pvc.pvc_name,
            &options.pvc.path,
        ))),
        other => Err(Error::configuration(format!(
            "unsupported offload type: {other}"
        ))),
    }
}

/// Offload helper backed by a shared persistent volume claim mounted into
/// both the agent and the stagers.
pub struct PvcOffload {
    pvc_name: String,
    base: PathBuf,
}

impl PvcOffload {
    /// Creates a helper writing under `base`, referencing claim `pvc_name`.
    #[must_use]
    pub fn new(pvc_name: &str, base: impl Into<PathBuf>) -> Self {
        Self {
            pvc_name: pvc_name.to_owned(),
            base: base.into(),
        }
    }

    fn task_dir(&self, task_id: &TaskId) -> PathBuf {
        self.base.join(task_id.as_str())
    }

    fn write(&self, task_id: &TaskId, content: &[u8], file_name: &str) -> Result<String> {
        let dir = self.task_dir(task_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))?;
        let path = dir.join(file_name);
        std::fs::write(&path, content)
            .map_err(|e| Error::io(format!("failed to write {}", path.display()), e))?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn mount(&self, task_id: &TaskId, template: &mut PodTemplate) {
        template.volumes.push(Volume {
            name: OFFLOAD_VOLUME_NAME.to_owned(),
            source: VolumeSource::Pvc {
                claim_name: self.pvc_name.clone(),
                read_only: true,
            },
        });
        let mount_path = self.task_dir(task_id).to_string_lossy().into_owned();
        for container in &mut template.containers {
            container.volume_mounts.push(VolumeMount {
                name: OFFLOAD_VOLUME_NAME.to_owned(),
                mount_path: mount_path.clone(),
                sub_path: Some(task_id.to_string()),
                read_only: true,
            });
            container.env.push(EnvVar::new(env::OFFLOAD_TYPE, PVC_OFFLOAD_TYPE));
            container
                .env
                .push(EnvVar::new(env::OFFLOAD_PVC_NAME, self.pvc_name.clone()));
            container.env.push(EnvVar::new(
                env::OFFLOAD_PATH,
                self.base.to_string_lossy().into_owned(),
            ));
        }
    }
}

impl OffloadHelper for PvcOffload {
    fn offload_inputs(&self, task_id: &TaskId, inputs_json: &[u8]) -> Result<String> {
        self.write(task_id, inputs_json, INPUTS_FILE_NAME)
    }

    fn offload_outputs(&self, task_id: &TaskId, outputs_json: &[u8]) -> Result<String> {
        self.write(task_id, outputs_json, OUTPUTS_FILE_NAME)
    }

    fn delete_offload_file(&self, task_id: &TaskId) {
        let dir = self.task_dir(task_id);
        if let Err(err) = std::fs::remove_dir_all(&dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(task = %task_id, path = %dir.display(), %err, "failed to remove offload dir");
            }
        }
    }

    fn modify_inputs_filer(&self, task_id: &TaskId, template: &mut PodTemplate) {
        self.mount(task_id, template);
    }

    fn modify_outputs_filer(&self, task_id: &TaskId, template: &mut PodTemplate) {
        self.mount(task_id, template);
    }
}

/// Returns true if the base directory looks usable (absolute and existing).
pub(crate) fn validate_base(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(Error::configuration(format!(
            "offload pvc path {} should be an absolute path",
            path.display()
        )));
    }
    let stat = std::fs::metadata(path)
        .map_err(|e| Error::io(format!("invalid offload pvc path {}", path.display()), e))?;
    if !stat.is_dir() {
        return Err(Error::configuration(format!(
            "offload pvc path {} should be a directory",
            path.display()
        )));
    }
    Ok(())
}

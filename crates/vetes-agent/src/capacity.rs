//! Cluster capacity heartbeat.
//!
//! The capacity and limits of the cluster are operator-maintained in a
//! separate YAML file; the agent reads it once at startup and PUTs it to the
//! control plane on every heartbeat so schedulers see the cluster as alive.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tes::models::{Capacity, ClusterUpdate, Limits};
use crate::tes::TaskService;

/// Contents of the cluster config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Capacity section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Capacity>,
    /// Limits section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
}

impl ClusterConfig {
    /// Loads the cluster config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::configuration(format!("invalid cluster config: {e}")))
    }
}

/// Periodic reporter of cluster capacity.
pub struct CapacityReporter {
    service: Arc<dyn TaskService>,
    cluster_id: String,
    config: ClusterConfig,
}

impl CapacityReporter {
    /// Creates a reporter for the given cluster.
    #[must_use]
    pub fn new(service: Arc<dyn TaskService>, cluster_id: &str, config: ClusterConfig) -> Self {
        Self {
            service,
            cluster_id: cluster_id.to_owned(),
            config,
        }
    }

    /// Sends one heartbeat. Failures are logged, not propagated; the next
    /// tick retries.
    pub async fn report(&self) {
        let update = ClusterUpdate {
            id: self.cluster_id.clone(),
            capacity: self.config.capacity.clone(),
            limits: self.config.limits.clone(),
        };
        if let Err(err) = self.service.put_cluster(&update).await {
            tracing::error!(cluster = %self.cluster_id, %err, "put cluster failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tes::memory::InMemoryTaskService;

    #[test]
    fn cluster_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yaml");
        std::fs::write(
            &path,
            "capacity:\n  count: 5\n  cpu_cores: 320\n  ram_gb: 1280.0\nlimits:\n  cpu_cores: 64\n",
        )
        .unwrap();

        let config = ClusterConfig::load(&path).unwrap();
        let capacity = config.capacity.unwrap();
        assert_eq!(capacity.count, Some(5));
        assert_eq!(capacity.cpu_cores, Some(320));
        assert_eq!(config.limits.unwrap().cpu_cores, Some(64));
    }

    #[tokio::test]
    async fn report_puts_cluster() {
        let service = Arc::new(InMemoryTaskService::new());
        let reporter = CapacityReporter::new(
            service.clone(),
            "cluster-01",
            ClusterConfig {
                capacity: Some(Capacity {
                    count: Some(3),
                    ..Capacity::default()
                }),
                limits: None,
            },
        );
        reporter.report().await;

        let updates = service.recorded_cluster_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].id, "cluster-01");
        assert_eq!(updates[0].capacity.as_ref().unwrap().count, Some(3));
    }
}

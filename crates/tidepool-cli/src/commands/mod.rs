pub mod pools;
pub mod rpc;
pub mod schedule;

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tidepool_scheduler::{HostManager, SHARE_SERVICE, SchedulerConfig};
use tidepool_state::{Capabilities, ServiceRecord, StateStore, epoch_secs};

/// One backend's capability report, as read from a reports file.
#[derive(Debug, Deserialize)]
pub struct BackendReport {
    /// Backend identity, `host@backend`.
    pub host: String,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default)]
    pub disabled: bool,
    pub capabilities: Capabilities,
}

fn default_service() -> String {
    SHARE_SERVICE.to_string()
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    match path {
        Some(path) => SchedulerConfig::from_file(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(SchedulerConfig::default()),
    }
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Load reports into a fresh in-memory store and host manager. Every
/// service heartbeats now.
pub fn load_backends(config: &SchedulerConfig, path: &Path) -> anyhow::Result<(StateStore, HostManager)> {
    let reports: Vec<BackendReport> = read_json(path)?;
    let store = StateStore::open_in_memory()?;
    let manager = HostManager::new(config, store.clone());
    let now = epoch_secs();

    for report in reports {
        store.put_service(&ServiceRecord {
            host: report.host.clone(),
            topic: config.topic.clone(),
            disabled: report.disabled,
            updated_at: now,
        })?;
        manager.update_service_capabilities_at(&report.service, &report.host, report.capabilities, now);
    }
    Ok((store, manager))
}

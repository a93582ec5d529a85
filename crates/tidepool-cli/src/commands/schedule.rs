use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tidepool_scheduler::{ChannelDispatcher, RequestContext, Scheduler, ShareCommand, build_strategy};
use tidepool_state::{FilterProperties, HostId, RequestSpec, ShareRecord, ShareStatus, epoch_secs};
use tracing::info;

use super::{load_backends, load_config, read_json};

/// Contents of a request file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScheduleRequest {
    pub request_spec: RequestSpec,
    pub filter_properties: FilterProperties,
}

#[derive(Debug, Serialize)]
pub struct ScheduleOutput {
    pub strategy: &'static str,
    pub hosts: Vec<HostId>,
    pub commands: Vec<ShareCommand>,
}

pub fn run(config: Option<&Path>, backends: &Path, request: &Path, count: usize) -> anyhow::Result<()> {
    let output = schedule(config, backends, request, count)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

pub fn schedule(config: Option<&Path>, backends: &Path, request: &Path, count: usize) -> anyhow::Result<ScheduleOutput> {
    anyhow::ensure!(count >= 1, "--count must be at least 1");

    let config = load_config(config)?;
    let (store, manager) = load_backends(&config, backends)?;
    let ScheduleRequest {
        request_spec,
        mut filter_properties,
    } = read_json(request)?;

    let (dispatcher, mut rx) = ChannelDispatcher::channel(count.max(16));
    let scheduler = Scheduler::new(
        &config,
        build_strategy(&config)?,
        Arc::new(manager),
        Arc::new(store.clone()),
        Arc::new(dispatcher),
    );
    let ctx = RequestContext::new(format!("cli-{}", epoch_secs()));

    let hosts = if count == 1 {
        store.put_share(&ShareRecord {
            id: request_spec.share_id.clone(),
            host: None,
            status: ShareStatus::Creating,
            size_gb: request_spec.size_gb,
            scheduled_at: None,
            updated_at: epoch_secs(),
        })?;
        vec![scheduler.create_share_instance(&ctx, &request_spec, &mut filter_properties)?]
    } else {
        scheduler
            .select_destinations(&ctx, scheduler.topic(), &request_spec, &mut filter_properties, count)?
            .into_iter()
            .map(|b| b.host)
            .collect()
    };
    info!(share_id = %request_spec.share_id, hosts = ?hosts, "scheduling complete");

    let mut commands = Vec::new();
    while let Ok(command) = rx.try_recv() {
        commands.push(command);
    }

    Ok(ScheduleOutput {
        strategy: scheduler.strategy_name(),
        hosts,
        commands,
    })
}

//! HostManager: capability-report ingestion and live candidate discovery.
//!
//! Backends periodically report their capabilities. The manager keeps the
//! latest report per backend and, on demand, joins the reports with the
//! service heartbeats in the state store to produce pool-level candidates.
//!
//! ```text
//! report (host@backend) ──► HostManager ──► list_live_backends(topic)
//!                               │               ├── skip disabled / stale services
//!                               │               └── expand pools ──► host@backend#pool
//!                               └── get_pools(regex filters)
//! ```

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use tidepool_state::{
    BackendState, Capabilities, Capacity, DEFAULT_POOL_NAME, HostId, HostLevel, StateStore,
    ThinProvisioning, append_pool, epoch_secs, extract_host, parse_bool_strict,
};

use crate::config::SchedulerConfig;
use crate::context::RequestContext;
use crate::error::{SchedulerError, SchedulerResult};

/// Service name whose reports are accepted.
pub const SHARE_SERVICE: &str = "share";

/// Keys copied from the backend level into each pool that does not set them.
const INHERITED_KEYS: &[&str] = &[
    "share_backend_name",
    "storage_protocol",
    "vendor_name",
    "driver_version",
    "driver_handles_share_servers",
    "snapshot_support",
    "consistency_group_support",
    "dedupe",
    "compression",
    "replication_domain",
    "availability_zone",
    "filter_function",
    "goodness_function",
];

#[derive(Debug, Clone)]
struct StoredReport {
    capabilities: Capabilities,
    timestamp: u64,
}

/// One pool as exposed by [`HostManager::get_pools`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSummary {
    /// Full identity, `host@backend#pool`.
    pub name: HostId,
    pub host: String,
    pub backend: Option<String>,
    pub pool: String,
    pub capabilities: Capabilities,
}

impl PoolSummary {
    fn field(&self, key: &str) -> Option<&str> {
        match key {
            "name" => Some(&self.name),
            "host" => Some(&self.host),
            "backend" => self.backend.as_deref(),
            "pool" => Some(&self.pool),
            _ => None,
        }
    }
}

pub struct HostManager {
    store: StateStore,
    service_down_time_secs: u64,
    default_ratio: f64,
    /// Latest report per backend identity (`host@backend`).
    reports: RwLock<BTreeMap<HostId, StoredReport>>,
}

impl HostManager {
    pub fn new(config: &SchedulerConfig, store: StateStore) -> Self {
        Self {
            store,
            service_down_time_secs: config.service_down_time_secs,
            default_ratio: config.max_over_subscription_ratio,
            reports: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record a capability report received now.
    pub fn update_service_capabilities(&self, service_name: &str, host: &str, capabilities: Capabilities) {
        self.update_service_capabilities_at(service_name, host, capabilities, epoch_secs());
    }

    /// Record a capability report stamped with `timestamp`.
    ///
    /// Reports from services other than `share` are ignored, as are reports
    /// older than the one already held.
    pub fn update_service_capabilities_at(
        &self,
        service_name: &str,
        host: &str,
        capabilities: Capabilities,
        timestamp: u64,
    ) {
        if service_name != SHARE_SERVICE {
            debug!(%service_name, %host, "ignoring service update");
            return;
        }

        let mut reports = self.reports.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = reports.get(host) {
            if existing.timestamp > timestamp {
                debug!(%host, "ignoring stale capability report");
                return;
            }
        }
        debug!(%host, keys = capabilities.len(), "received share service update");
        reports.insert(
            host.to_string(),
            StoredReport {
                capabilities,
                timestamp,
            },
        );
    }

    /// Forget a backend's report.
    pub fn remove_backend(&self, host: &str) -> bool {
        let mut reports = self.reports.write().unwrap_or_else(PoisonError::into_inner);
        let removed = reports.remove(host).is_some();
        if removed {
            info!(%host, "removing backend from scheduler cache");
        }
        removed
    }

    /// Pool-level candidates of every live service on `topic`.
    pub fn list_live_backends(&self, ctx: &RequestContext, topic: &str) -> SchedulerResult<Vec<BackendState>> {
        self.list_live_backends_at(ctx, topic, epoch_secs())
    }

    pub fn list_live_backends_at(
        &self,
        ctx: &RequestContext,
        topic: &str,
        now: u64,
    ) -> SchedulerResult<Vec<BackendState>> {
        let mut services = self.store.list_services_by_topic(topic)?;
        services.sort_by(|a, b| a.host.cmp(&b.host));

        let reports = self.reports.read().unwrap_or_else(PoisonError::into_inner);
        let mut candidates = Vec::new();
        for service in services {
            let stale = now.saturating_sub(service.updated_at) > self.service_down_time_secs;
            if service.disabled || stale {
                warn!(
                    request_id = %ctx.request_id,
                    host = %service.host,
                    disabled = service.disabled,
                    stale,
                    "share service is down"
                );
                continue;
            }
            let Some(report) = reports.get(&service.host) else {
                debug!(host = %service.host, "no capability report yet");
                continue;
            };
            candidates.extend(self.expand_pools(&service.host, report));
        }
        debug!(request_id = %ctx.request_id, %topic, candidates = candidates.len(), "live backends listed");
        Ok(candidates)
    }

    /// Summaries of live pools whose fields match every regex in `filters`.
    ///
    /// Each pattern must match at the start of the field; a filter on a
    /// field the pool lacks excludes the pool.
    pub fn get_pools(
        &self,
        ctx: &RequestContext,
        topic: &str,
        filters: &BTreeMap<String, String>,
    ) -> SchedulerResult<Vec<PoolSummary>> {
        self.get_pools_at(ctx, topic, filters, epoch_secs())
    }

    pub fn get_pools_at(
        &self,
        ctx: &RequestContext,
        topic: &str,
        filters: &BTreeMap<String, String>,
        now: u64,
    ) -> SchedulerResult<Vec<PoolSummary>> {
        let compiled = filters
            .iter()
            .map(|(key, pattern)| {
                Regex::new(&format!("^(?:{pattern})"))
                    .map(|re| (key.as_str(), re))
                    .map_err(|e| SchedulerError::InvalidPoolFilter {
                        key: key.clone(),
                        message: e.to_string(),
                    })
            })
            .collect::<SchedulerResult<Vec<_>>>()?;

        let pools = self
            .list_live_backends_at(ctx, topic, now)?
            .into_iter()
            .map(pool_summary)
            .filter(|summary| {
                compiled
                    .iter()
                    .all(|(key, re)| summary.field(key).is_some_and(|v| re.is_match(v)))
            })
            .collect();
        Ok(pools)
    }

    fn expand_pools(&self, host: &str, report: &StoredReport) -> Vec<BackendState> {
        let caps = &report.capabilities;
        match caps.get("pools") {
            Some(Value::Array(pools)) => pools
                .iter()
                .filter_map(|pool| match pool {
                    Value::Object(pool_caps) => {
                        let merged = inherit_backend_keys(pool_caps, caps);
                        let Some(name) = merged.get("pool_name").and_then(Value::as_str) else {
                            warn!(%host, "pool reported without a pool_name");
                            return None;
                        };
                        let name = name.to_string();
                        Some(self.pool_state(host, &name, merged, report.timestamp))
                    }
                    _ => {
                        warn!(%host, "ignoring malformed pool entry");
                        None
                    }
                })
                .collect(),
            None => {
                // Legacy report without pools: the backend is its own pool.
                let name = caps
                    .get("share_backend_name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| extract_host(host, HostLevel::Pool, true))
                    .unwrap_or_else(|| DEFAULT_POOL_NAME.to_string());
                let mut single = caps.clone();
                single.remove("pools");
                vec![self.pool_state(host, &name, single, report.timestamp)]
            }
            Some(_) => {
                warn!(%host, "ignoring report with malformed pools");
                Vec::new()
            }
        }
    }

    fn pool_state(&self, host: &str, pool_name: &str, caps: Capabilities, timestamp: u64) -> BackendState {
        let id = append_pool(host, pool_name);
        let mut state = BackendState::new(id.clone());

        state.backend_name = text(&caps, "share_backend_name");
        state.pool_name = Some(pool_name.to_string());
        state.vendor_name = text(&caps, "vendor_name");
        state.driver_version = text(&caps, "driver_version");
        state.storage_protocol = text(&caps, "storage_protocol");

        state.total_capacity_gb = match caps.get("total_capacity_gb") {
            None => Capacity::default(),
            Some(v) => Capacity::from_value(v).unwrap_or_else(|| {
                warn!(host = %id, value = %v, "unparseable total capacity, treating as unknown");
                Capacity::Unknown
            }),
        };
        state.free_capacity_gb = caps.get("free_capacity_gb").and_then(|v| {
            let parsed = Capacity::from_value(v);
            if parsed.is_none() {
                warn!(host = %id, value = %v, "unparseable free capacity");
            }
            parsed
        });
        state.allocated_capacity_gb = number(&caps, "allocated_capacity_gb").unwrap_or(0.0);
        state.provisioned_capacity_gb =
            number(&caps, "provisioned_capacity_gb").unwrap_or(state.allocated_capacity_gb);
        state.reserved_percentage = number(&caps, "reserved_percentage").unwrap_or(0.0);
        state.max_over_subscription_ratio =
            number(&caps, "max_over_subscription_ratio").unwrap_or(self.default_ratio);

        state.thin_provisioning = caps
            .get("thin_provisioning")
            .map(ThinProvisioning::from_value)
            .unwrap_or_default();
        state.dedupe = flag(&caps, "dedupe").unwrap_or(false);
        state.compression = flag(&caps, "compression").unwrap_or(false);
        state.snapshot_support = flag(&caps, "snapshot_support").unwrap_or(true);
        state.driver_handles_share_servers = flag(&caps, "driver_handles_share_servers").unwrap_or(false);
        state.qos = flag(&caps, "qos").unwrap_or(false);

        state.replication_type = text(&caps, "replication_type");
        state.replication_domain = text(&caps, "replication_domain");
        state.availability_zone = text(&caps, "availability_zone");
        state.consistency_group_support = text(&caps, "consistency_group_support");

        state.updated = Some(timestamp);
        state.capabilities = caps;
        state
    }
}

fn inherit_backend_keys(pool: &Capabilities, backend: &Capabilities) -> Capabilities {
    let mut merged = pool.clone();
    for key in INHERITED_KEYS {
        let missing = merged.get(*key).is_none_or(Value::is_null);
        if missing {
            if let Some(v) = backend.get(*key) {
                merged.insert((*key).to_string(), v.clone());
            }
        }
    }
    merged
}

fn pool_summary(state: BackendState) -> PoolSummary {
    let backend = extract_host(&state.host, HostLevel::Backend, false)
        .and_then(|b| b.split_once('@').map(|(_, name)| name.to_string()));
    PoolSummary {
        host: extract_host(&state.host, HostLevel::Host, false).unwrap_or_default(),
        backend,
        pool: extract_host(&state.host, HostLevel::Pool, true).unwrap_or_default(),
        name: state.host,
        capabilities: state.capabilities,
    }
}

fn text(caps: &Capabilities, key: &str) -> Option<String> {
    match caps.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(caps: &Capabilities, key: &str) -> Option<f64> {
    match caps.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A reported boolean; a per-pool list counts as true if any entry is.
fn flag(caps: &Capabilities, key: &str) -> Option<bool> {
    match caps.get(key)? {
        Value::Array(items) => Some(items.iter().any(|v| parse_bool_strict(v) == Some(true))),
        other => parse_bool_strict(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidepool_state::ServiceRecord;

    const NOW: u64 = 10_000;

    fn caps(v: Value) -> Capabilities {
        match v {
            Value::Object(map) => map,
            _ => panic!("capabilities must be an object"),
        }
    }

    fn manager_with_services(services: &[(&str, bool, u64)]) -> HostManager {
        let store = StateStore::open_in_memory().unwrap();
        for (host, disabled, updated_at) in services {
            store
                .put_service(&ServiceRecord {
                    host: host.to_string(),
                    topic: "tidepool-share".into(),
                    disabled: *disabled,
                    updated_at: *updated_at,
                })
                .unwrap();
        }
        HostManager::new(&SchedulerConfig::default(), store)
    }

    fn pooled_report() -> Capabilities {
        caps(json!({
            "share_backend_name": "lvm",
            "vendor_name": "Open Source",
            "driver_version": "1.0",
            "storage_protocol": "NFS_CIFS",
            "snapshot_support": false,
            "pools": [
                {"pool_name": "vg0", "total_capacity_gb": 500, "free_capacity_gb": 230,
                 "allocated_capacity_gb": 270, "reserved_percentage": 0, "dying_disks": 100},
                {"pool_name": "vg1", "total_capacity_gb": 1024, "free_capacity_gb": 1024,
                 "reserved_percentage": 0, "snapshot_support": true,
                 "thin_provisioning": [true, false], "max_over_subscription_ratio": "1.5"}
            ]
        }))
    }

    fn hosts(v: &[BackendState]) -> Vec<&str> {
        v.iter().map(|b| b.host.as_str()).collect()
    }

    #[test]
    fn non_share_services_are_ignored() {
        let mgr = manager_with_services(&[("node1@lvm", false, NOW)]);
        mgr.update_service_capabilities_at("data", "node1@lvm", pooled_report(), NOW);
        let live = mgr.list_live_backends_at(&RequestContext::default(), "tidepool-share", NOW).unwrap();
        assert!(live.is_empty());
    }

    #[test]
    fn pools_expand_with_backend_defaults() {
        let mgr = manager_with_services(&[("node1@lvm", false, NOW)]);
        mgr.update_service_capabilities_at("share", "node1@lvm", pooled_report(), NOW);
        let live = mgr.list_live_backends_at(&RequestContext::default(), "tidepool-share", NOW).unwrap();

        assert_eq!(hosts(&live), vec!["node1@lvm#vg0", "node1@lvm#vg1"]);
        let vg0 = &live[0];
        assert_eq!(vg0.backend_name.as_deref(), Some("lvm"));
        assert_eq!(vg0.vendor_name.as_deref(), Some("Open Source"));
        assert_eq!(vg0.free_capacity_gb, Some(Capacity::Known(230.0)));
        assert_eq!(vg0.provisioned_capacity_gb, 270.0);
        assert!(!vg0.snapshot_support);
        assert_eq!(vg0.max_over_subscription_ratio, 20.0);
        assert_eq!(vg0.capabilities.get("dying_disks"), Some(&json!(100)));
        assert_eq!(vg0.updated, Some(NOW));

        let vg1 = &live[1];
        assert!(vg1.snapshot_support);
        assert_eq!(vg1.allocated_capacity_gb, 0.0);
        assert_eq!(vg1.max_over_subscription_ratio, 1.5);
        assert!(vg1.thin_provisioning.supports_thin());
    }

    #[test]
    fn pools_inherit_backend_functions() {
        let mut report = pooled_report();
        report.insert("filter_function".into(), json!("share.size < 100"));
        report.insert("goodness_function".into(), json!("50"));
        if let Some(Value::Array(pools)) = report.get_mut("pools") {
            pools[1]["goodness_function"] = json!("90");
        }

        let mgr = manager_with_services(&[("node1@lvm", false, NOW)]);
        mgr.update_service_capabilities_at("share", "node1@lvm", report, NOW);
        let live = mgr.list_live_backends_at(&RequestContext::default(), "tidepool-share", NOW).unwrap();

        for pool in &live {
            assert_eq!(pool.capabilities.get("filter_function"), Some(&json!("share.size < 100")));
        }
        assert_eq!(live[0].capabilities.get("goodness_function"), Some(&json!("50")));
        assert_eq!(live[1].capabilities.get("goodness_function"), Some(&json!("90")));
    }

    #[test]
    fn legacy_report_becomes_single_pool() {
        let mgr = manager_with_services(&[("node2@generic", false, NOW)]);
        let report = caps(json!({
            "share_backend_name": "generic",
            "total_capacity_gb": "infinite",
            "free_capacity_gb": "unknown",
        }));
        mgr.update_service_capabilities_at("share", "node2@generic", report, NOW);
        let live = mgr.list_live_backends_at(&RequestContext::default(), "tidepool-share", NOW).unwrap();

        assert_eq!(hosts(&live), vec!["node2@generic#generic"]);
        assert_eq!(live[0].total_capacity_gb, Capacity::Unlimited);
        assert_eq!(live[0].free_capacity_gb, Some(Capacity::Unknown));
    }

    #[test]
    fn legacy_report_without_name_uses_default_pool() {
        let mgr = manager_with_services(&[("node3@x", false, NOW)]);
        mgr.update_service_capabilities_at("share", "node3@x", caps(json!({"free_capacity_gb": 10})), NOW);
        let live = mgr.list_live_backends_at(&RequestContext::default(), "tidepool-share", NOW).unwrap();
        assert_eq!(hosts(&live), vec!["node3@x#_pool0"]);
    }

    #[test]
    fn down_and_disabled_services_are_skipped() {
        let mgr = manager_with_services(&[
            ("up@lvm", false, NOW - 10),
            ("stale@lvm", false, NOW - 61),
            ("off@lvm", true, NOW),
        ]);
        for host in ["up@lvm", "stale@lvm", "off@lvm"] {
            mgr.update_service_capabilities_at("share", host, caps(json!({"free_capacity_gb": 1})), NOW);
        }
        let live = mgr.list_live_backends_at(&RequestContext::default(), "tidepool-share", NOW).unwrap();
        assert_eq!(hosts(&live), vec!["up@lvm#_pool0"]);
    }

    #[test]
    fn services_without_reports_have_no_candidates() {
        let mgr = manager_with_services(&[("silent@lvm", false, NOW)]);
        let live = mgr.list_live_backends_at(&RequestContext::default(), "tidepool-share", NOW).unwrap();
        assert!(live.is_empty());
    }

    #[test]
    fn older_reports_do_not_replace_newer() {
        let mgr = manager_with_services(&[("node1@lvm", false, NOW)]);
        mgr.update_service_capabilities_at("share", "node1@lvm", caps(json!({"free_capacity_gb": 50})), NOW);
        mgr.update_service_capabilities_at("share", "node1@lvm", caps(json!({"free_capacity_gb": 5})), NOW - 5);
        let live = mgr.list_live_backends_at(&RequestContext::default(), "tidepool-share", NOW).unwrap();
        assert_eq!(live[0].free_capacity_gb, Some(Capacity::Known(50.0)));
    }

    #[test]
    fn removed_backend_disappears() {
        let mgr = manager_with_services(&[("node1@lvm", false, NOW)]);
        mgr.update_service_capabilities_at("share", "node1@lvm", pooled_report(), NOW);
        assert!(mgr.remove_backend("node1@lvm"));
        assert!(!mgr.remove_backend("node1@lvm"));
        let live = mgr.list_live_backends_at(&RequestContext::default(), "tidepool-share", NOW).unwrap();
        assert!(live.is_empty());
    }

    #[test]
    fn get_pools_applies_regex_filters() {
        let mgr = manager_with_services(&[("node1@lvm", false, NOW), ("node2@nfs", false, NOW)]);
        mgr.update_service_capabilities_at("share", "node1@lvm", pooled_report(), NOW);
        mgr.update_service_capabilities_at("share", "node2@nfs", caps(json!({"free_capacity_gb": 1})), NOW);
        let ctx = RequestContext::default();

        let all = mgr.get_pools_at(&ctx, "tidepool-share", &BTreeMap::new(), NOW).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].host, "node1");
        assert_eq!(all[0].backend.as_deref(), Some("lvm"));
        assert_eq!(all[0].pool, "vg0");

        let filters = BTreeMap::from([("pool".to_string(), "vg".to_string())]);
        let names: Vec<String> = mgr
            .get_pools_at(&ctx, "tidepool-share", &filters, NOW)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["node1@lvm#vg0", "node1@lvm#vg1"]);

        let filters = BTreeMap::from([("host".to_string(), "node2".to_string()), ("backend".to_string(), "nf.".to_string())]);
        assert_eq!(mgr.get_pools_at(&ctx, "tidepool-share", &filters, NOW).unwrap().len(), 1);

        let filters = BTreeMap::from([("capabilities".to_string(), ".*".to_string())]);
        assert!(mgr.get_pools_at(&ctx, "tidepool-share", &filters, NOW).unwrap().is_empty());
    }

    #[test]
    fn get_pools_match_is_anchored_at_start() {
        let mgr = manager_with_services(&[("node1@lvm", false, NOW)]);
        mgr.update_service_capabilities_at("share", "node1@lvm", pooled_report(), NOW);
        let filters = BTreeMap::from([("pool".to_string(), "0".to_string())]);
        let pools = mgr
            .get_pools_at(&RequestContext::default(), "tidepool-share", &filters, NOW)
            .unwrap();
        assert!(pools.is_empty());
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let mgr = manager_with_services(&[]);
        let filters = BTreeMap::from([("pool".to_string(), "(".to_string())]);
        let err = mgr
            .get_pools_at(&RequestContext::default(), "tidepool-share", &filters, NOW)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidPoolFilter { .. }));
    }
}

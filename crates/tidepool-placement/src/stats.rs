//! Normalized per-candidate statistics.
//!
//! [`generate_stats`] flattens a backend snapshot and the request into one
//! immutable record that filters and weighers read from. It never fails:
//! missing optional fields stay `None` or empty.

use serde::Serialize;
use serde_json::Value;
use tidepool_state::{
    BackendState, Capabilities, Capacity, ExtraSpecs, RequestSpec, ShareType, ThinProvisioning,
    parse_bool_strict,
};

use crate::matcher::match_requirement;

/// Flat copy of the typed fields of a [`BackendState`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostStats {
    pub host: String,
    pub share_backend_name: Option<String>,
    pub pool_name: Option<String>,
    pub vendor_name: Option<String>,
    pub driver_version: Option<String>,
    pub storage_protocol: Option<String>,
    pub qos: bool,
    pub total_capacity_gb: Capacity,
    pub allocated_capacity_gb: f64,
    pub free_capacity_gb: Option<Capacity>,
    pub reserved_percentage: f64,
    pub provisioned_capacity_gb: f64,
    pub max_over_subscription_ratio: f64,
    pub driver_handles_share_servers: bool,
    pub thin_provisioning: ThinProvisioning,
    pub dedupe: bool,
    pub compression: bool,
    pub snapshot_support: bool,
    pub replication_type: Option<String>,
    pub replication_domain: Option<String>,
    pub availability_zone: Option<String>,
    pub consistency_group_support: Option<String>,
    pub updated: Option<u64>,
    /// Names of the pools under this backend, if it is a backend-level record.
    pub pools: Vec<String>,
}

/// Everything a filter or weigher may look at for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedStats {
    pub host_stats: HostStats,
    /// Raw capability mapping, including keys not lifted into `host_stats`.
    pub host_caps: Capabilities,
    pub extra_specs: ExtraSpecs,
    /// Properties of the share being placed.
    pub share_stats: serde_json::Map<String, Value>,
    pub share_type: ShareType,
}

impl NormalizedStats {
    /// Look up a capability by a scope path (`["a", "b"]` for `a:b`).
    ///
    /// Raw capabilities win; a single-segment path falls back to the typed
    /// host stats so `snapshot_support` and friends resolve even when the
    /// report only carried them as typed fields.
    pub fn capability(&self, path: &[&str]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        if let Some(mut cap) = self.host_caps.get(*first) {
            for key in rest {
                cap = cap.as_object()?.get(*key)?;
            }
            return Some(cap.clone());
        }
        if !rest.is_empty() {
            return None;
        }
        match serde_json::to_value(&self.host_stats) {
            Ok(Value::Object(map)) => map.get(*first).filter(|v| !v.is_null()).cloned(),
            _ => None,
        }
    }
}

/// Build the normalized record for one candidate and one request.
pub fn generate_stats(backend: &BackendState, request: &RequestSpec) -> NormalizedStats {
    let host_stats = HostStats {
        host: backend.host.clone(),
        share_backend_name: backend.backend_name.clone(),
        pool_name: backend.pool_name.clone(),
        vendor_name: backend.vendor_name.clone(),
        driver_version: backend.driver_version.clone(),
        storage_protocol: backend.storage_protocol.clone(),
        qos: backend.qos,
        total_capacity_gb: backend.total_capacity_gb,
        allocated_capacity_gb: backend.allocated_capacity_gb,
        free_capacity_gb: backend.free_capacity_gb,
        reserved_percentage: backend.reserved_percentage,
        provisioned_capacity_gb: backend.provisioned_capacity_gb,
        max_over_subscription_ratio: backend.max_over_subscription_ratio,
        driver_handles_share_servers: backend.driver_handles_share_servers,
        thin_provisioning: backend.thin_provisioning.clone(),
        dedupe: backend.dedupe,
        compression: backend.compression,
        snapshot_support: backend.snapshot_support,
        replication_type: backend.replication_type.clone(),
        replication_domain: backend.replication_domain.clone(),
        availability_zone: backend.availability_zone.clone(),
        consistency_group_support: backend.consistency_group_support.clone(),
        updated: backend.updated,
        pools: backend
            .pools
            .iter()
            .filter_map(|p| p.pool_name.clone())
            .collect(),
    };

    NormalizedStats {
        host_stats,
        host_caps: backend.capabilities.clone(),
        extra_specs: request.share_type.extra_specs.clone(),
        share_stats: request.resource_properties.clone(),
        share_type: request.share_type.clone(),
    }
}

/// Whether capacity checks for this share type should use thin-provisioning
/// math.
///
/// Reads `thin_provisioning`, then `capabilities:thin_provisioning`. No key
/// means yes. A strict boolean literal is taken as is; anything else is
/// evaluated as an expression against `true`.
pub fn use_thin_logic(share_type: &ShareType) -> bool {
    let spec = share_type
        .extra_specs
        .get("thin_provisioning")
        .or_else(|| share_type.extra_specs.get("capabilities:thin_provisioning"));

    let Some(spec) = spec else {
        return true;
    };
    if let Some(flag) = parse_bool_strict(spec) {
        return flag;
    }
    match spec {
        Value::String(expr) => match_requirement(&Value::Bool(true), expr),
        _ => false,
    }
}

/// Whether a backend's reported thin-provisioning value means any of its
/// pools supports thin provisioning.
pub fn thin_provisioning(reported: &ThinProvisioning) -> bool {
    reported.supports_thin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn share_type(specs: Value) -> ShareType {
        serde_json::from_value(json!({ "extra_specs": specs })).unwrap()
    }

    #[test]
    fn thin_logic_defaults_to_true_without_key() {
        assert!(use_thin_logic(&ShareType::default()));
        assert!(use_thin_logic(&share_type(json!({"dedupe": "<is> True"}))));
    }

    #[test]
    fn thin_logic_honours_strict_literals() {
        assert!(!use_thin_logic(&share_type(json!({"thin_provisioning": "False"}))));
        assert!(use_thin_logic(&share_type(json!({"thin_provisioning": "true"}))));
        assert!(!use_thin_logic(&share_type(json!({"thin_provisioning": "0"}))));
        assert!(!use_thin_logic(&share_type(json!({"thin_provisioning": false}))));
    }

    #[test]
    fn thin_logic_evaluates_expressions() {
        assert!(use_thin_logic(&share_type(json!({"thin_provisioning": "<is> True"}))));
        assert!(!use_thin_logic(&share_type(json!({"thin_provisioning": "<is> False"}))));
        assert!(!use_thin_logic(&share_type(json!({"thin_provisioning": "maybe"}))));
    }

    #[test]
    fn thin_logic_falls_back_to_scoped_key() {
        let st = share_type(json!({"capabilities:thin_provisioning": "<is> False"}));
        assert!(!use_thin_logic(&st));
        let st = share_type(json!({
            "thin_provisioning": "True",
            "capabilities:thin_provisioning": "False",
        }));
        assert!(use_thin_logic(&st));
    }

    #[test]
    fn thin_capability_aggregation() {
        assert!(!thin_provisioning(&ThinProvisioning::Flag(false)));
        assert!(thin_provisioning(&ThinProvisioning::PerPool(vec![true, false])));
        assert!(!thin_provisioning(&ThinProvisioning::PerPool(vec![false])));
    }

    #[test]
    fn stats_copy_backend_and_request() {
        let mut backend = BackendState::new("node1@lvm#vg0");
        backend.backend_name = Some("lvm".into());
        backend.free_capacity_gb = Some(Capacity::Known(42.0));
        backend.capabilities.insert("fancy".into(), json!("yes"));

        let request: RequestSpec = serde_json::from_value(json!({
            "share_id": "s1",
            "size_gb": 5,
            "resource_properties": {"share_proto": "NFS"},
            "share_type": {"name": "gold", "extra_specs": {"fancy": "yes"}},
        }))
        .unwrap();

        let stats = generate_stats(&backend, &request);
        assert_eq!(stats.host_stats.host, "node1@lvm#vg0");
        assert_eq!(stats.host_stats.share_backend_name.as_deref(), Some("lvm"));
        assert_eq!(stats.host_stats.free_capacity_gb, Some(Capacity::Known(42.0)));
        assert_eq!(stats.host_caps.get("fancy"), Some(&json!("yes")));
        assert_eq!(stats.extra_specs.get("fancy"), Some(&json!("yes")));
        assert_eq!(stats.share_stats.get("share_proto"), Some(&json!("NFS")));
        assert_eq!(stats.share_type.name.as_deref(), Some("gold"));
    }

    #[test]
    fn stats_tolerate_empty_request() {
        let stats = generate_stats(&BackendState::new("h"), &RequestSpec::default());
        assert!(stats.extra_specs.is_empty());
        assert!(stats.share_stats.is_empty());
        assert_eq!(stats.host_stats.free_capacity_gb, None);
    }

    #[test]
    fn capability_lookup_prefers_raw_caps_then_typed_fields() {
        let mut backend = BackendState::new("h@b#p");
        backend.capabilities.insert("nested".into(), json!({"inner": {"leaf": 3}}));
        backend.capabilities.insert("dedupe".into(), json!("<raw>"));
        backend.compression = true;
        let stats = generate_stats(&backend, &RequestSpec::default());

        assert_eq!(stats.capability(&["nested", "inner", "leaf"]), Some(json!(3)));
        assert_eq!(stats.capability(&["dedupe"]), Some(json!("<raw>")));
        assert_eq!(stats.capability(&["compression"]), Some(json!(true)));
        assert_eq!(stats.capability(&["replication_type"]), None);
        assert_eq!(stats.capability(&["nested", "missing"]), None);
    }
}

//! Domain types for the tidepool scheduler.
//!
//! Backend snapshots arrive from periodic capability reports; request specs
//! and filter properties arrive with each scheduling request. Everything is
//! serde-serializable so reports and requests can be read from JSON.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a backend or pool (`host@backend#pool`).
pub type HostId = String;

/// Identifier of a share (the provisioned resource).
pub type ShareId = String;

/// Free-form capability mapping as reported by a backend.
pub type Capabilities = serde_json::Map<String, Value>;

/// Extra specs attached to a share type. Keys may be scoped (`capabilities:foo`).
pub type ExtraSpecs = BTreeMap<String, Value>;

/// Default oversubscription ratio when neither report nor config provide one.
pub const DEFAULT_MAX_OVER_SUBSCRIPTION_RATIO: f64 = 20.0;

// ── Capacity ───────────────────────────────────────────────────────

/// A capacity figure in GiB, or one of the sentinels a backend may report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CapacityRepr", into = "CapacityRepr")]
pub enum Capacity {
    Known(f64),
    /// The backend cannot report this figure.
    Unknown,
    /// The backend has no practical limit.
    Unlimited,
}

impl Capacity {
    /// The numeric value, if known.
    pub fn known(&self) -> Option<f64> {
        match self {
            Capacity::Known(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Capacity::Unknown)
    }

    /// Parse a capability value leniently. Returns `None` for unparseable input.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(|v| Capacity::Known(v.max(0.0))),
            Value::String(s) => Capacity::try_from(CapacityRepr::Text(s.clone())).ok(),
            _ => None,
        }
    }

    /// Subtract `amount`, never going below zero. Sentinels are unchanged.
    pub fn saturating_sub(self, amount: f64) -> Self {
        match self {
            Capacity::Known(v) => Capacity::Known((v - amount).max(0.0)),
            other => other,
        }
    }
}

impl Default for Capacity {
    fn default() -> Self {
        Capacity::Known(0.0)
    }
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capacity::Known(v) => write!(f, "{v}"),
            Capacity::Unknown => f.write_str("unknown"),
            Capacity::Unlimited => f.write_str("infinite"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CapacityRepr {
    Number(f64),
    Text(String),
}

impl TryFrom<CapacityRepr> for Capacity {
    type Error = String;

    fn try_from(repr: CapacityRepr) -> Result<Self, Self::Error> {
        match repr {
            CapacityRepr::Number(v) if v.is_finite() => Ok(Capacity::Known(v.max(0.0))),
            CapacityRepr::Number(v) => Err(format!("invalid capacity: {v}")),
            CapacityRepr::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "unknown" => Ok(Capacity::Unknown),
                "infinite" | "unlimited" => Ok(Capacity::Unlimited),
                other => other
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| Capacity::Known(v.max(0.0)))
                    .ok_or_else(|| format!("invalid capacity: {s}")),
            },
        }
    }
}

impl From<Capacity> for CapacityRepr {
    fn from(capacity: Capacity) -> Self {
        match capacity {
            Capacity::Known(v) => CapacityRepr::Number(v),
            Capacity::Unknown => CapacityRepr::Text("unknown".to_string()),
            Capacity::Unlimited => CapacityRepr::Text("infinite".to_string()),
        }
    }
}

// ── Thin provisioning ──────────────────────────────────────────────

/// Thin-provisioning support as reported: one flag, or one flag per pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThinProvisioning {
    Flag(bool),
    PerPool(Vec<bool>),
}

impl ThinProvisioning {
    /// True if any pool under the backend advertises thin provisioning.
    pub fn supports_thin(&self) -> bool {
        match self {
            ThinProvisioning::Flag(flag) => *flag,
            ThinProvisioning::PerPool(flags) => flags.contains(&true),
        }
    }

    /// Lenient parse from a capability value; anything unrecognized is `false`.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(b) => ThinProvisioning::Flag(*b),
            Value::Array(items) => ThinProvisioning::PerPool(
                items.iter().map(|v| parse_bool_strict(v).unwrap_or(false)).collect(),
            ),
            other => ThinProvisioning::Flag(parse_bool_strict(other).unwrap_or(false)),
        }
    }
}

impl Default for ThinProvisioning {
    fn default() -> Self {
        ThinProvisioning::Flag(false)
    }
}

/// Strict boolean literal parsing: `true/false`, `t/f`, `yes/no`, `y/n`,
/// `on/off`, `1/0` (case-insensitive), or a JSON bool.
pub fn parse_bool_strict(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => parse_bool_str(s),
        _ => None,
    }
}

/// Parse a boolean literal from text. See [`parse_bool_strict`].
pub fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "on" | "y" | "yes" => Some(true),
        "0" | "f" | "false" | "off" | "n" | "no" => Some(false),
        _ => None,
    }
}

// ── Backend ────────────────────────────────────────────────────────

/// Read snapshot of one backend, or of one pool under a backend.
///
/// Pool-level snapshots have `pool_name` set and an empty `pools` list.
/// The scheduler only ever considers pool-level snapshots as candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendState {
    pub host: HostId,
    pub backend_name: Option<String>,
    pub pool_name: Option<String>,
    pub vendor_name: Option<String>,
    pub driver_version: Option<String>,
    pub storage_protocol: Option<String>,
    /// Raw capability mapping, including keys not lifted into typed fields.
    pub capabilities: Capabilities,
    pub total_capacity_gb: Capacity,
    /// `None` means the backend never reported it.
    pub free_capacity_gb: Option<Capacity>,
    pub allocated_capacity_gb: f64,
    /// Apparent provisioned size of all shares; at least `allocated_capacity_gb`.
    pub provisioned_capacity_gb: f64,
    pub reserved_percentage: f64,
    pub max_over_subscription_ratio: f64,
    pub thin_provisioning: ThinProvisioning,
    pub dedupe: bool,
    pub compression: bool,
    pub snapshot_support: bool,
    pub driver_handles_share_servers: bool,
    pub replication_type: Option<String>,
    pub replication_domain: Option<String>,
    pub availability_zone: Option<String>,
    /// `"pool"`, `"host"`, or absent when groups are unsupported.
    pub consistency_group_support: Option<String>,
    pub qos: bool,
    /// Unix timestamp (seconds) of the report this snapshot came from.
    pub updated: Option<u64>,
    pub pools: Vec<BackendState>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            host: String::new(),
            backend_name: None,
            pool_name: None,
            vendor_name: None,
            driver_version: None,
            storage_protocol: None,
            capabilities: Capabilities::new(),
            total_capacity_gb: Capacity::default(),
            free_capacity_gb: None,
            allocated_capacity_gb: 0.0,
            provisioned_capacity_gb: 0.0,
            reserved_percentage: 0.0,
            max_over_subscription_ratio: 1.0,
            thin_provisioning: ThinProvisioning::default(),
            dedupe: false,
            compression: false,
            snapshot_support: true,
            driver_handles_share_servers: false,
            replication_type: None,
            replication_domain: None,
            availability_zone: None,
            consistency_group_support: None,
            qos: false,
            updated: None,
            pools: Vec::new(),
        }
    }
}

impl BackendState {
    /// An empty snapshot for `host`.
    pub fn new(host: impl Into<HostId>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Virtually consume `size_gb` after this backend was picked, so later
    /// picks within the same request see the reduced capacity.
    pub fn consume_from_share(&mut self, size_gb: u64, now: u64) {
        let size = size_gb as f64;
        if let Some(free) = self.free_capacity_gb {
            self.free_capacity_gb = Some(free.saturating_sub(size));
        }
        self.allocated_capacity_gb += size;
        self.provisioned_capacity_gb += size;
        self.updated = Some(now);
    }
}

// ── Request ────────────────────────────────────────────────────────

/// The share type requested: a name and the extra specs it carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareType {
    pub name: Option<String>,
    pub extra_specs: ExtraSpecs,
}

/// Request-scoped description of the share being placed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSpec {
    pub share_id: ShareId,
    /// Snapshot the share is created from, if any.
    pub snapshot_id: Option<String>,
    pub size_gb: u64,
    /// Desired traits of the share itself.
    pub resource_properties: serde_json::Map<String, Value>,
    pub share_type: ShareType,
    pub availability_zone: Option<String>,
    /// Host of the active replica, when scheduling a new replica.
    pub active_replica_host: Option<HostId>,
    /// Hosts already holding a replica of this share.
    pub all_replica_hosts: Vec<HostId>,
}

/// One previously tried host and why it was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriedHost {
    pub host: HostId,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Retry history carried across scheduling attempts of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryInfo {
    pub num_attempts: u32,
    pub hosts: Vec<TriedHost>,
}

impl RetryInfo {
    pub fn contains(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h.host == host)
    }
}

/// Request-scoped scheduling hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterProperties {
    /// Identities excluded from this attempt.
    pub ignore_hosts: BTreeSet<HostId>,
    pub retry: Option<RetryInfo>,
    pub scheduler_hints: serde_json::Map<String, Value>,
    /// Replication domain of the active replica's host, filled in by the scheduler.
    pub replication_domain: Option<String>,
}

// ── Persisted records ──────────────────────────────────────────────

/// Lifecycle status of a share record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareStatus {
    Creating,
    Available,
    Error,
}

/// Persisted share record. The scheduler only writes `host`, `scheduled_at`
/// and `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: ShareId,
    pub host: Option<HostId>,
    pub status: ShareStatus,
    pub size_gb: u64,
    /// Unix timestamp (seconds) of the last scheduling decision.
    pub scheduled_at: Option<u64>,
    pub updated_at: u64,
}

/// Heartbeat record of a backend service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Backend-level identity (`host@backend`).
    pub host: HostId,
    pub topic: String,
    pub disabled: bool,
    /// Unix timestamp of the last heartbeat.
    pub updated_at: u64,
}

impl ServiceRecord {
    /// Composite table key: `{topic}:{host}`.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.topic, self.host)
    }
}

//! Scheduler configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tidepool_placement::WeigherMultipliers;
use tidepool_state::DEFAULT_MAX_OVER_SUBSCRIPTION_RATIO;

use crate::error::{SchedulerError, SchedulerResult};

/// Which scheduling strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Filter, weigh, take the best.
    #[default]
    FilterWeigh,
    /// Pick uniformly among live, non-excluded backends.
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Service topic whose backends are candidates.
    pub topic: String,
    pub strategy: StrategyKind,
    /// Scheduling attempts per request, including the first. 1 disables
    /// rescheduling.
    pub max_attempts: u32,
    pub default_filters: Vec<String>,
    pub default_weighers: Vec<String>,
    pub capacity_weight_multiplier: f64,
    pub allocated_capacity_weight_multiplier: f64,
    pub goodness_weight_multiplier: f64,
    /// Seconds without a heartbeat before a service counts as down.
    pub service_down_time_secs: u64,
    /// Used when a backend report omits its own ratio.
    pub max_over_subscription_ratio: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            topic: "tidepool-share".to_string(),
            strategy: StrategyKind::default(),
            max_attempts: 3,
            default_filters: [
                "RetryFilter",
                "IgnoredHostsFilter",
                "AvailabilityZoneFilter",
                "CapacityFilter",
                "CapabilitiesFilter",
                "ShareReplicationFilter",
                "DriverFilter",
            ]
            .map(String::from)
            .to_vec(),
            default_weighers: vec!["CapacityWeigher".to_string(), "GoodnessWeigher".to_string()],
            capacity_weight_multiplier: 1.0,
            allocated_capacity_weight_multiplier: -1.0,
            goodness_weight_multiplier: 1.0,
            service_down_time_secs: 60,
            max_over_subscription_ratio: DEFAULT_MAX_OVER_SUBSCRIPTION_RATIO,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> SchedulerResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::InvalidConfig(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> SchedulerResult<Self> {
        let config: SchedulerConfig =
            toml::from_str(content).map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> SchedulerResult<String> {
        toml::to_string_pretty(self).map_err(|e| SchedulerError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_attempts < 1 {
            return Err(SchedulerError::InvalidConfig(
                "invalid value for 'max_attempts', must be >= 1".to_string(),
            ));
        }
        if self.max_over_subscription_ratio < 1.0 {
            return Err(SchedulerError::InvalidConfig(
                "invalid value for 'max_over_subscription_ratio', must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn weigher_multipliers(&self) -> WeigherMultipliers {
        WeigherMultipliers {
            capacity: self.capacity_weight_multiplier,
            allocated_capacity: self.allocated_capacity_weight_multiplier,
            goodness: self.goodness_weight_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = SchedulerConfig::from_toml_str("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.topic, "tidepool-share");
        assert_eq!(config.strategy, StrategyKind::FilterWeigh);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.default_filters.len(), 7);
        assert_eq!(config.default_weighers, ["CapacityWeigher", "GoodnessWeigher"]);
    }

    #[test]
    fn parses_overrides() {
        let config = SchedulerConfig::from_toml_str(
            r#"
topic = "shares-east"
strategy = "random"
max_attempts = 1
default_weighers = ["CapacityWeigher", "AllocatedCapacityWeigher"]
capacity_weight_multiplier = -1.0
"#,
        )
        .unwrap();
        assert_eq!(config.topic, "shares-east");
        assert_eq!(config.strategy, StrategyKind::Random);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.default_weighers.len(), 2);
        assert_eq!(config.weigher_multipliers().capacity, -1.0);
        assert_eq!(config.service_down_time_secs, 60);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = SchedulerConfig::from_toml_str("max_attempts = 0").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(SchedulerConfig::from_toml_str(r#"strategy = "chance""#).is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let config = SchedulerConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(SchedulerConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.toml");
        std::fs::write(&path, "service_down_time_secs = 120\n").unwrap();
        let config = SchedulerConfig::from_file(&path).unwrap();
        assert_eq!(config.service_down_time_secs, 120);
    }
}

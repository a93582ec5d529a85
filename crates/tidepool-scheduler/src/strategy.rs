//! Scheduling strategies: how a host is chosen among live candidates.
//!
//! The concrete strategy is picked once from configuration by
//! [`build_strategy`]. Both strategies fail with `NoValidHost` rather than
//! fall back to an arbitrary host.

use serde_json::Value;
use tidepool_state::{BackendState, FilterProperties, RequestSpec, identity_matches};

use crate::config::{SchedulerConfig, StrategyKind};
use crate::context::RequestContext;
use crate::error::{NoValidHostReason, SchedulerError, SchedulerResult};
use crate::filter_scheduler::FilterWeighStrategy;
use crate::random::RandomStrategy;

/// Extra specs whose values are booleans and are matched with `<is>`.
pub const BOOLEAN_EXTRA_SPECS: &[&str] = &["snapshot_support", "dedupe", "compression"];

pub trait SchedulingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Choose one host among `candidates`.
    ///
    /// May record the attempt in `props.retry`.
    fn select_host(
        &self,
        ctx: &RequestContext,
        candidates: &[BackendState],
        request: &RequestSpec,
        props: &mut FilterProperties,
    ) -> SchedulerResult<BackendState>;

    /// Choose `count` distinct hosts, best first.
    fn select_hosts(
        &self,
        ctx: &RequestContext,
        candidates: &[BackendState],
        request: &RequestSpec,
        props: &mut FilterProperties,
        count: usize,
    ) -> SchedulerResult<Vec<BackendState>>;
}

/// Build the configured strategy.
pub fn build_strategy(config: &SchedulerConfig) -> SchedulerResult<Box<dyn SchedulingStrategy>> {
    config.validate()?;
    Ok(match config.strategy {
        StrategyKind::FilterWeigh => Box::new(FilterWeighStrategy::from_config(config)?),
        StrategyKind::Random => Box::new(RandomStrategy::new()),
    })
}

/// Fail with `NoBackends` when nothing is live.
pub(crate) fn require_candidates(candidates: &[BackendState]) -> SchedulerResult<()> {
    if candidates.is_empty() {
        return Err(SchedulerError::no_valid_host(NoValidHostReason::NoBackends));
    }
    Ok(())
}

/// Whether `ignore_hosts` or retry history rules the candidate out.
pub(crate) fn is_excluded(candidate: &BackendState, props: &FilterProperties) -> bool {
    props
        .ignore_hosts
        .iter()
        .any(|pattern| identity_matches(&candidate.host, pattern))
        || props.retry.as_ref().is_some_and(|r| r.contains(&candidate.host))
}

/// Copy of `request` with boolean extra specs rewritten to `<is> value`.
pub fn with_boolean_specs(request: &RequestSpec) -> RequestSpec {
    let mut prepared = request.clone();
    for name in BOOLEAN_EXTRA_SPECS {
        let Some(spec) = prepared.share_type.extra_specs.get_mut(*name) else {
            continue;
        };
        let text = match &*spec {
            Value::String(s) => s.clone(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Null => continue,
            other => other.to_string(),
        };
        if !text.starts_with("<is>") {
            *spec = Value::String(format!("<is> {text}"));
        }
    }
    prepared
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidepool_state::{RetryInfo, TriedHost};

    #[test]
    fn boolean_specs_gain_is_prefix() {
        let mut request = RequestSpec::default();
        let specs = &mut request.share_type.extra_specs;
        specs.insert("snapshot_support".into(), json!("True"));
        specs.insert("dedupe".into(), json!("<is> False"));
        specs.insert("compression".into(), json!(true));
        specs.insert("driver_handles_share_servers".into(), json!("False"));

        let prepared = with_boolean_specs(&request);
        let specs = &prepared.share_type.extra_specs;
        assert_eq!(specs["snapshot_support"], json!("<is> True"));
        assert_eq!(specs["dedupe"], json!("<is> False"));
        assert_eq!(specs["compression"], json!("<is> True"));
        assert_eq!(specs["driver_handles_share_servers"], json!("False"));
        // The caller's request is untouched.
        assert_eq!(request.share_type.extra_specs["snapshot_support"], json!("True"));
    }

    #[test]
    fn exclusion_covers_ignore_list_and_retry() {
        let candidate = BackendState::new("a@lvm#p");
        let mut props = FilterProperties::default();
        assert!(!is_excluded(&candidate, &props));

        props.ignore_hosts.insert("a".into());
        assert!(is_excluded(&candidate, &props));

        let props = FilterProperties {
            retry: Some(RetryInfo {
                num_attempts: 1,
                hosts: vec![TriedHost { host: "a@lvm#p".into(), reason: None }],
            }),
            ..FilterProperties::default()
        };
        assert!(is_excluded(&candidate, &props));
    }

    #[test]
    fn build_strategy_follows_config() {
        let config = SchedulerConfig::default();
        assert_eq!(build_strategy(&config).unwrap().name(), "filter_weigh");

        let config = SchedulerConfig {
            strategy: StrategyKind::Random,
            ..SchedulerConfig::default()
        };
        assert_eq!(build_strategy(&config).unwrap().name(), "random");
    }

    #[test]
    fn build_strategy_rejects_unknown_filters() {
        let config = SchedulerConfig {
            default_filters: vec!["CapacityFilter".into(), "JsonFilter".into()],
            default_weighers: vec!["PoolWeigher".into()],
            ..SchedulerConfig::default()
        };
        let err = build_strategy(&config).err().unwrap();
        assert!(matches!(err, SchedulerError::FilterNotFound(names) if names == vec!["JsonFilter"]));
    }

    #[test]
    fn build_strategy_rejects_unknown_weighers() {
        let config = SchedulerConfig {
            default_weighers: vec!["PoolWeigher".into()],
            ..SchedulerConfig::default()
        };
        let err = build_strategy(&config).err().unwrap();
        assert!(matches!(err, SchedulerError::WeigherNotFound(_)));
    }
}

//! Filter-and-weigh strategy.
//!
//! ```text
//! candidates ──► retry bookkeeping ──► exclusion ──► FilterChain ──► WeigherChain ──► best
//! ```
//!
//! Ignored hosts, hosts tried by earlier attempts and hosts already picked
//! for this request are dropped before the configured filters run, so the
//! exclusion holds whatever the filter list contains.
//!
//! Every attempt is recorded in `props.retry` (when rescheduling is enabled)
//! so a later attempt for the same request skips hosts that already failed.

use tidepool_placement::{FilterChain, WeighedHost, WeigherChain};
use tidepool_state::{
    BackendState, FilterProperties, RequestSpec, RetryInfo, TriedHost, epoch_secs, identity_matches,
};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::context::RequestContext;
use crate::error::{NoValidHostReason, SchedulerError, SchedulerResult};
use crate::strategy::{SchedulingStrategy, is_excluded, require_candidates, with_boolean_specs};

pub struct FilterWeighStrategy {
    filters: FilterChain,
    weighers: WeigherChain,
    max_attempts: u32,
}

impl FilterWeighStrategy {
    pub fn new(filters: FilterChain, weighers: WeigherChain, max_attempts: u32) -> Self {
        Self {
            filters,
            weighers,
            max_attempts,
        }
    }

    /// Resolve the configured filter and weigher names.
    pub fn from_config(config: &SchedulerConfig) -> SchedulerResult<Self> {
        let filters = FilterChain::from_names(&config.default_filters)?;
        let weighers = WeigherChain::from_names(&config.default_weighers, config.weigher_multipliers())?;
        debug!(
            filters = ?filters.names(),
            weighers = ?weighers.names(),
            max_attempts = config.max_attempts,
            "filter/weigh strategy configured"
        );
        Ok(Self::new(filters, weighers, config.max_attempts))
    }

    /// Check whether one named host can take the request, without retry
    /// bookkeeping. Used when the caller pins a destination.
    pub fn host_passes_filters(
        &self,
        ctx: &RequestContext,
        host: &str,
        candidates: &[BackendState],
        request: &RequestSpec,
        props: &mut FilterProperties,
    ) -> SchedulerResult<BackendState> {
        let cannot_place = || {
            SchedulerError::no_valid_host(NoValidHostReason::CannotPlace {
                share_id: request.share_id.clone(),
                host: host.to_string(),
            })
        };

        let Some(target) = candidates.iter().find(|c| c.host == host) else {
            warn!(request_id = %ctx.request_id, %host, "requested host is not live");
            return Err(cannot_place());
        };

        let prepared = with_boolean_specs(request);
        self.populate_replication_domain(candidates, &prepared, props);
        if self.filters.filter(std::slice::from_ref(target), &prepared, props).is_empty() {
            return Err(cannot_place());
        }
        debug!(request_id = %ctx.request_id, %host, "host passes filters");
        Ok(target.clone())
    }

    /// Bump the attempt counter and fail once the limit is passed.
    ///
    /// With `max_attempts == 1` rescheduling is disabled and nothing is
    /// recorded.
    fn populate_retry(&self, request: &RequestSpec, props: &mut FilterProperties) -> SchedulerResult<()> {
        if self.max_attempts <= 1 {
            return Ok(());
        }

        let retry = props.retry.get_or_insert_with(RetryInfo::default);
        retry.num_attempts += 1;

        if retry.num_attempts > 1 {
            if let Some(last) = retry.hosts.last() {
                warn!(
                    share_id = %request.share_id,
                    host = %last.host,
                    reason = last.reason.as_deref().unwrap_or("unknown"),
                    "previous scheduling attempt failed"
                );
            }
        }

        if retry.num_attempts > self.max_attempts {
            return Err(SchedulerError::no_valid_host(NoValidHostReason::MaxAttemptsExceeded {
                max_attempts: self.max_attempts,
                share_id: request.share_id.clone(),
            }));
        }
        Ok(())
    }

    fn record_attempt(props: &mut FilterProperties, host: &str) {
        if let Some(retry) = props.retry.as_mut() {
            retry.hosts.push(TriedHost {
                host: host.to_string(),
                reason: None,
            });
        }
    }

    /// Fill `props.replication_domain` from the active replica's host.
    fn populate_replication_domain(
        &self,
        candidates: &[BackendState],
        request: &RequestSpec,
        props: &mut FilterProperties,
    ) {
        let Some(active) = request.active_replica_host.as_deref() else {
            return;
        };
        if let Some(backend) = candidates.iter().find(|c| identity_matches(&c.host, active)) {
            props.replication_domain = backend.replication_domain.clone();
        }
    }

    /// Exclude, filter, then weigh, best first. Fails when nothing
    /// survives.
    fn weighed_candidates(
        &self,
        candidates: &[BackendState],
        request: &RequestSpec,
        props: &FilterProperties,
    ) -> SchedulerResult<Vec<WeighedHost>> {
        let eligible: Vec<BackendState> = candidates
            .iter()
            .filter(|c| !is_excluded(c, props))
            .cloned()
            .collect();
        if eligible.is_empty() {
            return Err(SchedulerError::no_valid_host(NoValidHostReason::AllExcluded));
        }

        let survivors = self.filters.filter(&eligible, request, props);
        if survivors.is_empty() {
            return Err(SchedulerError::no_valid_host(NoValidHostReason::NoneSatisfy {
                share_id: request.share_id.clone(),
            }));
        }
        Ok(self.weighers.weigh(&survivors, request))
    }
}

impl SchedulingStrategy for FilterWeighStrategy {
    fn name(&self) -> &'static str {
        "filter_weigh"
    }

    fn select_host(
        &self,
        ctx: &RequestContext,
        candidates: &[BackendState],
        request: &RequestSpec,
        props: &mut FilterProperties,
    ) -> SchedulerResult<BackendState> {
        self.select_hosts(ctx, candidates, request, props, 1)?
            .into_iter()
            .next()
            .ok_or(SchedulerError::no_valid_host(NoValidHostReason::NoBackends))
    }

    /// Picks are made one at a time. Each pick is excluded from the next
    /// round and has the request's size consumed from its snapshot.
    fn select_hosts(
        &self,
        ctx: &RequestContext,
        candidates: &[BackendState],
        request: &RequestSpec,
        props: &mut FilterProperties,
        count: usize,
    ) -> SchedulerResult<Vec<BackendState>> {
        self.populate_retry(request, props)?;
        require_candidates(candidates)?;

        let prepared = with_boolean_specs(request);
        self.populate_replication_domain(candidates, &prepared, props);

        let mut round_props = props.clone();
        let mut chosen: Vec<BackendState> = Vec::with_capacity(count);
        while chosen.len() < count {
            let weighed = match self.weighed_candidates(candidates, &prepared, &round_props) {
                Ok(weighed) => weighed,
                Err(err) if chosen.is_empty() => return Err(err),
                Err(_) => {
                    return Err(SchedulerError::no_valid_host(NoValidHostReason::InsufficientHosts {
                        requested: count,
                        available: chosen.len(),
                    }));
                }
            };
            let Some(best) = weighed.into_iter().next() else {
                break;
            };

            let mut state = best.state;
            info!(
                request_id = %ctx.request_id,
                share_id = %request.share_id,
                host = %state.host,
                weight = best.weight,
                "choosing host"
            );
            state.consume_from_share(request.size_gb, epoch_secs());
            round_props.ignore_hosts.insert(state.host.clone());
            Self::record_attempt(props, &state.host);
            chosen.push(state);
        }
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidepool_state::Capacity;

    fn pool(host: &str, free: f64) -> BackendState {
        BackendState {
            total_capacity_gb: Capacity::Known(100.0),
            free_capacity_gb: Some(Capacity::Known(free)),
            ..BackendState::new(host)
        }
    }

    fn request(size_gb: u64) -> RequestSpec {
        RequestSpec {
            share_id: "share-1".into(),
            size_gb,
            ..RequestSpec::default()
        }
    }

    /// Capacity filtering only: no ignore or retry filter in the chain.
    fn capacity_only(max_attempts: u32) -> FilterWeighStrategy {
        FilterWeighStrategy::new(
            FilterChain::from_names(&["CapacityFilter"]).unwrap(),
            WeigherChain::from_names(&["CapacityWeigher"], Default::default()).unwrap(),
            max_attempts,
        )
    }

    fn strategy(max_attempts: u32) -> FilterWeighStrategy {
        let config = SchedulerConfig {
            max_attempts,
            ..SchedulerConfig::default()
        };
        FilterWeighStrategy::from_config(&config).unwrap()
    }

    #[test]
    fn picks_host_with_room() {
        let candidates = vec![pool("a@lvm#p", 100.0), pool("b@lvm#p", 5.0)];
        let mut props = FilterProperties::default();
        let chosen = strategy(3)
            .select_host(&RequestContext::default(), &candidates, &request(50), &mut props)
            .unwrap();
        assert_eq!(chosen.host, "a@lvm#p");
        assert_eq!(chosen.free_capacity_gb, Some(Capacity::Known(50.0)));

        let retry = props.retry.unwrap();
        assert_eq!(retry.num_attempts, 1);
        assert!(retry.contains("a@lvm#p"));
    }

    #[test]
    fn no_candidates_is_no_backends() {
        let err = strategy(3)
            .select_host(
                &RequestContext::default(),
                &[],
                &request(1),
                &mut FilterProperties::default(),
            )
            .unwrap_err();
        assert_eq!(err.no_valid_host_reason(), Some(&NoValidHostReason::NoBackends));
    }

    #[test]
    fn too_small_everywhere_is_none_satisfy() {
        let candidates = vec![pool("a@lvm#p", 10.0), pool("b@lvm#p", 5.0)];
        let err = strategy(3)
            .select_host(
                &RequestContext::default(),
                &candidates,
                &request(50),
                &mut FilterProperties::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err.no_valid_host_reason(),
            Some(NoValidHostReason::NoneSatisfy { share_id }) if share_id == "share-1"
        ));
    }

    #[test]
    fn retry_skips_tried_hosts_then_runs_out() {
        let candidates = vec![pool("a@lvm#p", 100.0), pool("b@lvm#p", 90.0)];
        let s = strategy(2);
        let mut props = FilterProperties::default();

        let first = s
            .select_host(&RequestContext::default(), &candidates, &request(10), &mut props)
            .unwrap();
        assert_eq!(first.host, "a@lvm#p");

        let second = s
            .select_host(&RequestContext::default(), &candidates, &request(10), &mut props)
            .unwrap();
        assert_eq!(second.host, "b@lvm#p");

        let err = s
            .select_host(&RequestContext::default(), &candidates, &request(10), &mut props)
            .unwrap_err();
        assert!(matches!(
            err.no_valid_host_reason(),
            Some(NoValidHostReason::MaxAttemptsExceeded { max_attempts: 2, .. })
        ));
    }

    #[test]
    fn single_attempt_records_nothing() {
        let candidates = vec![pool("a@lvm#p", 100.0)];
        let mut props = FilterProperties::default();
        strategy(1)
            .select_host(&RequestContext::default(), &candidates, &request(10), &mut props)
            .unwrap();
        assert!(props.retry.is_none());
    }

    #[test]
    fn all_tried_is_all_excluded() {
        let candidates = vec![pool("a@lvm#p", 100.0)];
        let mut props = FilterProperties {
            retry: Some(RetryInfo {
                num_attempts: 1,
                hosts: vec![TriedHost {
                    host: "a@lvm#p".into(),
                    reason: Some("driver error".into()),
                }],
            }),
            ..FilterProperties::default()
        };
        let err = strategy(3)
            .select_host(&RequestContext::default(), &candidates, &request(10), &mut props)
            .unwrap_err();
        assert_eq!(err.no_valid_host_reason(), Some(&NoValidHostReason::AllExcluded));
    }

    #[test]
    fn boolean_specs_are_matched_as_booleans() {
        let mut no_snapshots = pool("a@lvm#p", 100.0);
        no_snapshots.snapshot_support = false;
        let candidates = vec![no_snapshots, pool("b@lvm#p", 50.0)];

        let mut req = request(10);
        req.share_type.extra_specs.insert("snapshot_support".into(), json!("True"));
        let chosen = strategy(1)
            .select_host(&RequestContext::default(), &candidates, &req, &mut FilterProperties::default())
            .unwrap();
        assert_eq!(chosen.host, "b@lvm#p");
    }

    #[test]
    fn multi_pick_is_distinct_and_ordered() {
        let candidates = vec![pool("a@lvm#p", 60.0), pool("b@lvm#p", 100.0), pool("c@lvm#p", 80.0)];
        let mut props = FilterProperties::default();
        let chosen = strategy(3)
            .select_hosts(&RequestContext::default(), &candidates, &request(10), &mut props, 2)
            .unwrap();
        let hosts: Vec<&str> = chosen.iter().map(|b| b.host.as_str()).collect();
        assert_eq!(hosts, ["b@lvm#p", "c@lvm#p"]);
        assert_eq!(props.retry.unwrap().hosts.len(), 2);
    }

    #[test]
    fn multi_pick_short_of_hosts() {
        let candidates = vec![pool("a@lvm#p", 60.0), pool("b@lvm#p", 5.0)];
        let err = strategy(3)
            .select_hosts(
                &RequestContext::default(),
                &candidates,
                &request(10),
                &mut FilterProperties::default(),
                2,
            )
            .unwrap_err();
        assert!(matches!(
            err.no_valid_host_reason(),
            Some(NoValidHostReason::InsufficientHosts { requested: 2, available: 1 })
        ));
    }

    #[test]
    fn replica_domain_comes_from_active_host() {
        let mut active = pool("a@lvm#p", 100.0);
        active.replication_domain = Some("east".into());
        let mut same_domain = pool("b@lvm#p", 50.0);
        same_domain.replication_domain = Some("east".into());

        let req = RequestSpec {
            active_replica_host: Some("a@lvm#p".into()),
            ..request(10)
        };
        let mut props = FilterProperties::default();
        strategy(1)
            .select_host(&RequestContext::default(), &[active, same_domain], &req, &mut props)
            .unwrap();
        assert_eq!(props.replication_domain.as_deref(), Some("east"));
    }

    #[test]
    fn host_passes_filters_checks_one_host() {
        let candidates = vec![pool("a@lvm#p", 100.0), pool("b@lvm#p", 5.0)];
        let s = strategy(3);
        let ctx = RequestContext::default();

        let ok = s
            .host_passes_filters(&ctx, "a@lvm#p", &candidates, &request(50), &mut FilterProperties::default())
            .unwrap();
        assert_eq!(ok.host, "a@lvm#p");

        let err = s
            .host_passes_filters(&ctx, "b@lvm#p", &candidates, &request(50), &mut FilterProperties::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "no valid host was found: Cannot place share share-1 on b@lvm#p");

        let err = s
            .host_passes_filters(&ctx, "z@lvm#p", &candidates, &request(50), &mut FilterProperties::default())
            .unwrap_err();
        assert!(matches!(err.no_valid_host_reason(), Some(NoValidHostReason::CannotPlace { .. })));
    }

    #[test]
    fn multi_pick_never_repeats_without_ignore_filter() {
        let candidates = vec![pool("a@lvm#p", 100.0), pool("b@lvm#p", 50.0)];
        let chosen = capacity_only(1)
            .select_hosts(
                &RequestContext::default(),
                &candidates,
                &request(10),
                &mut FilterProperties::default(),
                2,
            )
            .unwrap();
        let hosts: Vec<&str> = chosen.iter().map(|b| b.host.as_str()).collect();
        assert_eq!(hosts, ["a@lvm#p", "b@lvm#p"]);

        let err = capacity_only(1)
            .select_hosts(
                &RequestContext::default(),
                &candidates,
                &request(10),
                &mut FilterProperties::default(),
                3,
            )
            .unwrap_err();
        assert!(matches!(
            err.no_valid_host_reason(),
            Some(NoValidHostReason::InsufficientHosts { requested: 3, available: 2 })
        ));
    }

    #[test]
    fn ignored_hosts_excluded_without_ignore_filter() {
        let candidates = vec![pool("a@lvm#p", 100.0), pool("b@lvm#p", 50.0)];
        let s = capacity_only(1);

        let mut props = FilterProperties {
            ignore_hosts: ["a@lvm".to_string()].into(),
            ..FilterProperties::default()
        };
        let chosen = s
            .select_host(&RequestContext::default(), &candidates, &request(10), &mut props)
            .unwrap();
        assert_eq!(chosen.host, "b@lvm#p");

        props.ignore_hosts.insert("b".to_string());
        let err = s
            .select_host(&RequestContext::default(), &candidates, &request(10), &mut props)
            .unwrap_err();
        assert_eq!(err.no_valid_host_reason(), Some(&NoValidHostReason::AllExcluded));
    }

    #[test]
    fn retry_history_excluded_without_retry_filter() {
        let candidates = vec![pool("a@lvm#p", 100.0), pool("b@lvm#p", 50.0)];
        let s = capacity_only(3);
        let mut props = FilterProperties::default();

        let first = s
            .select_host(&RequestContext::default(), &candidates, &request(10), &mut props)
            .unwrap();
        let second = s
            .select_host(&RequestContext::default(), &candidates, &request(10), &mut props)
            .unwrap();
        assert_eq!([first.host.as_str(), second.host.as_str()], ["a@lvm#p", "b@lvm#p"]);

        let err = s
            .select_host(&RequestContext::default(), &candidates, &request(10), &mut props)
            .unwrap_err();
        assert_eq!(err.no_valid_host_reason(), Some(&NoValidHostReason::AllExcluded));
    }
}

//! Host filtering.
//!
//! A [`FilterChain`] holds an ordered list of [`HostFilter`]s. A candidate
//! survives only if every filter accepts it. Filters look at one candidate at
//! a time, so the surviving set never depends on which siblings were passed
//! in or on the order of the filters.

use tidepool_state::{BackendState, FilterProperties, RequestSpec, identity_matches};
use tracing::debug;

use crate::capabilities::CapabilitiesFilter;
use crate::capacity::CapacityFilter;
use crate::driver::DriverFilter;
use crate::error::{PlacementError, PlacementResult};
use crate::replication::ShareReplicationFilter;
use crate::stats::{NormalizedStats, generate_stats};

/// A pass/fail predicate over one candidate.
pub trait HostFilter: Send + Sync {
    /// Registry name, as used in configuration.
    fn name(&self) -> &'static str;

    /// Return true if the candidate may host the request.
    fn host_passes(
        &self,
        stats: &NormalizedStats,
        request: &RequestSpec,
        props: &FilterProperties,
    ) -> bool;
}

/// Names of all built-in filters.
pub const BUILTIN_FILTERS: &[&str] = &[
    "AvailabilityZoneFilter",
    "CapabilitiesFilter",
    "CapacityFilter",
    "DriverFilter",
    "IgnoredHostsFilter",
    "RetryFilter",
    "ShareReplicationFilter",
];

fn builtin_filter(name: &str) -> Option<Box<dyn HostFilter>> {
    Some(match name {
        "AvailabilityZoneFilter" => Box::new(AvailabilityZoneFilter),
        "CapabilitiesFilter" => Box::new(CapabilitiesFilter),
        "CapacityFilter" => Box::new(CapacityFilter),
        "DriverFilter" => Box::new(DriverFilter),
        "IgnoredHostsFilter" => Box::new(IgnoredHostsFilter),
        "RetryFilter" => Box::new(RetryFilter),
        "ShareReplicationFilter" => Box::new(ShareReplicationFilter),
        _ => return None,
    })
}

/// Ordered set of filters applied to every candidate.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn HostFilter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn HostFilter>>) -> Self {
        Self { filters }
    }

    /// Resolve filter names against the built-in registry.
    ///
    /// Fails with every unknown name, not just the first.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> PlacementResult<Self> {
        let mut filters = Vec::with_capacity(names.len());
        let mut unknown = Vec::new();
        for name in names {
            match builtin_filter(name.as_ref()) {
                Some(filter) => filters.push(filter),
                None => unknown.push(name.as_ref().to_string()),
            }
        }
        if !unknown.is_empty() {
            return Err(PlacementError::UnknownFilters(unknown));
        }
        Ok(Self::new(filters))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Whether one candidate passes every filter.
    pub fn passes(
        &self,
        stats: &NormalizedStats,
        request: &RequestSpec,
        props: &FilterProperties,
    ) -> bool {
        self.filters.iter().all(|filter| {
            let ok = filter.host_passes(stats, request, props);
            if !ok {
                debug!(
                    host = %stats.host_stats.host,
                    filter = filter.name(),
                    "host rejected"
                );
            }
            ok
        })
    }

    /// Return the candidates that pass every filter, in input order.
    pub fn filter(
        &self,
        candidates: &[BackendState],
        request: &RequestSpec,
        props: &FilterProperties,
    ) -> Vec<BackendState> {
        let survivors: Vec<BackendState> = candidates
            .iter()
            .filter(|backend| self.passes(&generate_stats(backend, request), request, props))
            .cloned()
            .collect();
        debug!(
            candidates = candidates.len(),
            survivors = survivors.len(),
            "filter pass complete"
        );
        survivors
    }
}

// ── Simple filters ─────────────────────────────────────────────────

/// Rejects candidates named in `ignore_hosts`, at any identity level.
pub struct IgnoredHostsFilter;

impl HostFilter for IgnoredHostsFilter {
    fn name(&self) -> &'static str {
        "IgnoredHostsFilter"
    }

    fn host_passes(&self, stats: &NormalizedStats, _: &RequestSpec, props: &FilterProperties) -> bool {
        !props
            .ignore_hosts
            .iter()
            .any(|pattern| identity_matches(&stats.host_stats.host, pattern))
    }
}

/// Rejects candidates already tried by an earlier attempt of this request.
pub struct RetryFilter;

impl HostFilter for RetryFilter {
    fn name(&self) -> &'static str {
        "RetryFilter"
    }

    fn host_passes(&self, stats: &NormalizedStats, _: &RequestSpec, props: &FilterProperties) -> bool {
        match &props.retry {
            // Rescheduling disabled.
            None => true,
            Some(retry) => !retry.contains(&stats.host_stats.host),
        }
    }
}

/// Rejects candidates outside the requested availability zone.
pub struct AvailabilityZoneFilter;

impl HostFilter for AvailabilityZoneFilter {
    fn name(&self) -> &'static str {
        "AvailabilityZoneFilter"
    }

    fn host_passes(&self, stats: &NormalizedStats, request: &RequestSpec, _: &FilterProperties) -> bool {
        match &request.availability_zone {
            None => true,
            Some(zone) => stats.host_stats.availability_zone.as_deref() == Some(zone.as_str()),
        }
    }
}

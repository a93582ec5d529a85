//! Random strategy: uniform choice among live, eligible backends.
//!
//! Hosts named in `ignore_hosts` or already tried are dropped first. The
//! remainder must still have room and capabilities for the share; no weighers
//! run.

use std::sync::{Mutex, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use tidepool_placement::{CapabilitiesFilter, CapacityFilter, FilterChain};
use tidepool_state::{BackendState, FilterProperties, RequestSpec};
use tracing::{debug, info};

use crate::context::RequestContext;
use crate::error::{NoValidHostReason, SchedulerError, SchedulerResult};
use crate::strategy::{SchedulingStrategy, is_excluded, require_candidates, with_boolean_specs};

pub struct RandomStrategy {
    rng: Mutex<StdRng>,
    /// Hard requirements every pick must meet.
    requirements: FilterChain,
}

impl RandomStrategy {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic choices, for tests and replays.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            requirements: FilterChain::new(vec![Box::new(CapacityFilter), Box::new(CapabilitiesFilter)]),
        }
    }

    fn eligible(
        &self,
        candidates: &[BackendState],
        request: &RequestSpec,
        props: &FilterProperties,
    ) -> SchedulerResult<Vec<BackendState>> {
        require_candidates(candidates)?;
        let remaining: Vec<BackendState> = candidates
            .iter()
            .filter(|c| !is_excluded(c, props))
            .cloned()
            .collect();
        if remaining.is_empty() {
            return Err(SchedulerError::no_valid_host(NoValidHostReason::AllExcluded));
        }

        let eligible = self
            .requirements
            .filter(&remaining, &with_boolean_specs(request), props);
        if eligible.is_empty() {
            return Err(SchedulerError::no_valid_host(NoValidHostReason::NoneSatisfy {
                share_id: request.share_id.clone(),
            }));
        }
        debug!(
            candidates = candidates.len(),
            eligible = eligible.len(),
            "random strategy pool"
        );
        Ok(eligible)
    }
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingStrategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select_host(
        &self,
        ctx: &RequestContext,
        candidates: &[BackendState],
        request: &RequestSpec,
        props: &mut FilterProperties,
    ) -> SchedulerResult<BackendState> {
        let eligible = self.eligible(candidates, request, props)?;
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let chosen = eligible
            .choose(&mut *rng)
            .cloned()
            .ok_or(SchedulerError::no_valid_host(NoValidHostReason::AllExcluded))?;
        info!(
            request_id = %ctx.request_id,
            share_id = %request.share_id,
            host = %chosen.host,
            "random strategy chose host"
        );
        Ok(chosen)
    }

    fn select_hosts(
        &self,
        ctx: &RequestContext,
        candidates: &[BackendState],
        request: &RequestSpec,
        props: &mut FilterProperties,
        count: usize,
    ) -> SchedulerResult<Vec<BackendState>> {
        let eligible = self.eligible(candidates, request, props)?;
        if eligible.len() < count {
            return Err(SchedulerError::no_valid_host(NoValidHostReason::InsufficientHosts {
                requested: count,
                available: eligible.len(),
            }));
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let chosen: Vec<BackendState> = eligible
            .into_iter()
            .choose_multiple(&mut *rng, count);
        info!(
            request_id = %ctx.request_id,
            share_id = %request.share_id,
            count,
            "random strategy chose hosts"
        );
        Ok(chosen)
    }
}

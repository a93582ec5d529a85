//! Host weighing.
//!
//! Each [`HostWeigher`] produces one raw score per surviving candidate. The
//! chain normalizes every weigher's scores to `[0, 1]`, scales them by the
//! weigher's signed multiplier and sums them per candidate. Candidates come
//! back best first; ties keep input order.

use serde::Serialize;
use tidepool_state::{BackendState, Capacity, RequestSpec};
use tracing::{debug, info, warn};

use crate::driver::{GOODNESS_FUNCTION, reported_function};
use crate::error::{PlacementError, PlacementResult};
use crate::evaluator::{Operand, evaluate};
use crate::stats::{NormalizedStats, generate_stats, thin_provisioning, use_thin_logic};

/// A scoring function over surviving candidates. Higher wins.
pub trait HostWeigher: Send + Sync {
    /// Registry name, as used in configuration.
    fn name(&self) -> &'static str;

    /// Signed scale applied after normalization.
    fn multiplier(&self) -> f64 {
        1.0
    }

    /// Raw score of one candidate.
    fn weigh_object(&self, stats: &NormalizedStats) -> f64;

    /// Raw scores of all candidates, in input order.
    fn weigh_objects(&self, candidates: &[NormalizedStats]) -> Vec<f64> {
        candidates.iter().map(|s| self.weigh_object(s)).collect()
    }
}

/// A candidate with its combined weight.
#[derive(Debug, Clone, Serialize)]
pub struct WeighedHost {
    pub state: BackendState,
    pub weight: f64,
}

impl WeighedHost {
    pub fn host(&self) -> &str {
        &self.state.host
    }
}

/// Multipliers for the built-in weighers.
#[derive(Debug, Clone, Copy)]
pub struct WeigherMultipliers {
    pub capacity: f64,
    pub allocated_capacity: f64,
    pub goodness: f64,
}

impl Default for WeigherMultipliers {
    fn default() -> Self {
        Self {
            capacity: 1.0,
            allocated_capacity: -1.0,
            goodness: 1.0,
        }
    }
}

/// Names of all built-in weighers.
pub const BUILTIN_WEIGHERS: &[&str] = &["AllocatedCapacityWeigher", "CapacityWeigher", "GoodnessWeigher"];

/// Scale `weights` into `[0, 1]`. All-equal input maps to all zeros.
pub fn normalize(weights: &[f64]) -> Vec<f64> {
    let min = weights.iter().copied().fold(f64::INFINITY, f64::min);
    let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if weights.is_empty() || range == 0.0 || !range.is_finite() {
        return vec![0.0; weights.len()];
    }
    weights.iter().map(|w| (w - min) / range).collect()
}

/// Ordered set of weighers.
#[derive(Default)]
pub struct WeigherChain {
    weighers: Vec<Box<dyn HostWeigher>>,
}

impl WeigherChain {
    pub fn new(weighers: Vec<Box<dyn HostWeigher>>) -> Self {
        Self { weighers }
    }

    /// Resolve weigher names against the built-in registry.
    pub fn from_names<S: AsRef<str>>(
        names: &[S],
        multipliers: WeigherMultipliers,
    ) -> PlacementResult<Self> {
        let mut weighers: Vec<Box<dyn HostWeigher>> = Vec::with_capacity(names.len());
        let mut unknown = Vec::new();
        for name in names {
            match name.as_ref() {
                "CapacityWeigher" => weighers.push(Box::new(CapacityWeigher::new(multipliers.capacity))),
                "AllocatedCapacityWeigher" => weighers.push(Box::new(AllocatedCapacityWeigher::new(
                    multipliers.allocated_capacity,
                ))),
                "GoodnessWeigher" => weighers.push(Box::new(GoodnessWeigher::new(multipliers.goodness))),
                other => unknown.push(other.to_string()),
            }
        }
        if !unknown.is_empty() {
            return Err(PlacementError::UnknownWeighers(unknown));
        }
        Ok(Self::new(weighers))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.weighers.iter().map(|w| w.name()).collect()
    }

    /// Weigh candidates and return them best first.
    pub fn weigh(&self, candidates: &[BackendState], request: &RequestSpec) -> Vec<WeighedHost> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let stats: Vec<NormalizedStats> = candidates
            .iter()
            .map(|b| generate_stats(b, request))
            .collect();
        let mut totals = vec![0.0; candidates.len()];

        for weigher in &self.weighers {
            let raw = weigher.weigh_objects(&stats);
            let multiplier = weigher.multiplier();
            for (total, norm) in totals.iter_mut().zip(normalize(&raw)) {
                *total += multiplier * norm;
            }
        }

        let mut weighed: Vec<WeighedHost> = candidates
            .iter()
            .zip(totals)
            .map(|(state, weight)| WeighedHost {
                state: state.clone(),
                weight,
            })
            .collect();
        // Stable sort: equal weights keep input order.
        weighed.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));

        for w in &weighed {
            debug!(host = %w.host(), weight = w.weight, "weighed host");
        }
        weighed
    }
}

// ── Built-in weighers ──────────────────────────────────────────────

/// Prefers candidates with more free capacity (virtual free capacity for
/// thin-provisioned candidates). A negative multiplier stacks instead of
/// spreading.
///
/// Unknown capacity ranks last. With a negative multiplier unlimited
/// capacity also lands at the bottom, tied with unknown, and input order
/// decides between them.
pub struct CapacityWeigher {
    multiplier: f64,
}

impl CapacityWeigher {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }

    fn free_capacity(stats: &NormalizedStats) -> Option<f64> {
        let host = &stats.host_stats;
        let reserved = host.reserved_percentage / 100.0;
        let total = match host.total_capacity_gb {
            Capacity::Known(total) => total,
            Capacity::Unlimited => return Some(f64::MAX),
            Capacity::Unknown => return None,
        };
        let free_space = match host.free_capacity_gb {
            Some(Capacity::Known(free)) => free,
            Some(Capacity::Unlimited) => return Some(f64::MAX),
            Some(Capacity::Unknown) | None => return None,
        };

        let free = if use_thin_logic(&stats.share_type) && thin_provisioning(&host.thin_provisioning) {
            total * host.max_over_subscription_ratio - host.provisioned_capacity_gb - total * reserved
        } else {
            free_space - total * reserved
        };
        Some(free.floor())
    }
}

impl HostWeigher for CapacityWeigher {
    fn name(&self) -> &'static str {
        "CapacityWeigher"
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn weigh_object(&self, stats: &NormalizedStats) -> f64 {
        Self::free_capacity(stats).unwrap_or(f64::NAN)
    }

    fn weigh_objects(&self, candidates: &[NormalizedStats]) -> Vec<f64> {
        let raw: Vec<Option<f64>> = candidates.iter().map(Self::free_capacity).collect();
        let known = raw.iter().flatten().copied();
        // Unknown capacity goes just past the end that loses after scaling.
        let sentinel = if self.multiplier > 0.0 {
            known.fold(f64::INFINITY, f64::min) - 1.0
        } else {
            known.fold(f64::NEG_INFINITY, f64::max) + 1.0
        };
        let sentinel = if sentinel.is_finite() { sentinel } else { 0.0 };
        raw.into_iter().map(|w| w.unwrap_or(sentinel)).collect()
    }
}

/// Scores candidates by allocated capacity. With the default negative
/// multiplier the least-allocated candidate wins.
pub struct AllocatedCapacityWeigher {
    multiplier: f64,
}

impl AllocatedCapacityWeigher {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }
}

impl HostWeigher for AllocatedCapacityWeigher {
    fn name(&self) -> &'static str {
        "AllocatedCapacityWeigher"
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn weigh_object(&self, stats: &NormalizedStats) -> f64 {
        stats.host_stats.allocated_capacity_gb
    }
}

/// Scores candidates with their own `goodness_function`, a rating from 0
/// (poor) to 100 (perfect).
///
/// A missing or broken function rates 0, as does a number outside 0..=100.
/// `true` rates 100 and `false` 0.
pub struct GoodnessWeigher {
    multiplier: f64,
}

impl GoodnessWeigher {
    pub const MAX_RATING: f64 = 100.0;

    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }
}

impl HostWeigher for GoodnessWeigher {
    fn name(&self) -> &'static str {
        "GoodnessWeigher"
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn weigh_object(&self, stats: &NormalizedStats) -> f64 {
        let host = &stats.host_stats.host;
        let Some(function) = reported_function(stats, GOODNESS_FUNCTION) else {
            debug!(%host, "no goodness function, rating 0");
            return 0.0;
        };

        let rating = match evaluate(&function, stats) {
            Ok(Operand::Bool(b)) => {
                if b {
                    Self::MAX_RATING
                } else {
                    0.0
                }
            }
            Ok(result) => match result.as_number() {
                Some(n) if (0.0..=Self::MAX_RATING).contains(&n) => n,
                _ => {
                    warn!(%host, %function, %result, "goodness must be between 0 and 100, rating 0");
                    0.0
                }
            },
            Err(e) => {
                warn!(%host, %function, error = %e, "error in goodness function, rating 0");
                0.0
            }
        };
        info!(%host, rating, "goodness function evaluated");
        rating
    }
}

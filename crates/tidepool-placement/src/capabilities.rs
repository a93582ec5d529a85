//! Capabilities filter: every extra spec of the share type must be matched by
//! the corresponding capability of the candidate.
//!
//! Spec keys may be scoped with `:`. Keys scoped to anything other than
//! `capabilities` belong to other consumers and are skipped. The
//! `capabilities:` prefix is stripped and any remaining scopes descend into
//! nested capability maps.

use serde_json::Value;
use tidepool_state::{FilterProperties, RequestSpec};
use tracing::debug;

use crate::filter::HostFilter;
use crate::matcher::{match_requirement, value_text};
use crate::stats::NormalizedStats;

pub struct CapabilitiesFilter;

impl CapabilitiesFilter {
    fn satisfies_extra_specs(stats: &NormalizedStats) -> bool {
        for (key, req) in &stats.extra_specs {
            let mut scope: Vec<&str> = key.split(':').collect();
            if scope.len() > 1 {
                if scope[0] != "capabilities" {
                    continue;
                }
                scope.remove(0);
            }

            let Some(cap) = stats.capability(&scope) else {
                debug!(host = %stats.host_stats.host, key = %key, "capability not reported");
                return false;
            };

            let Some(req) = requirement_text(req) else {
                continue;
            };
            let matched = match &cap {
                Value::Array(values) => values.iter().any(|v| match_requirement(v, &req)),
                single => match_requirement(single, &req),
            };
            if !matched {
                debug!(
                    host = %stats.host_stats.host,
                    key = %key,
                    requirement = %req,
                    "capability does not match"
                );
                return false;
            }
        }
        true
    }
}

/// Extra-spec values are usually strings; typed scalars are matched by their
/// text form.
fn requirement_text(req: &Value) -> Option<String> {
    match req {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => value_text(other),
    }
}

impl HostFilter for CapabilitiesFilter {
    fn name(&self) -> &'static str {
        "CapabilitiesFilter"
    }

    fn host_passes(&self, stats: &NormalizedStats, _: &RequestSpec, _: &FilterProperties) -> bool {
        Self::satisfies_extra_specs(stats)
    }
}

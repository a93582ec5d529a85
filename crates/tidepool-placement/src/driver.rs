//! Backend-defined filtering.

use tidepool_state::{FilterProperties, RequestSpec};
use tracing::{debug, info, warn};

use crate::evaluator::evaluate;
use crate::filter::HostFilter;
use crate::matcher::value_text;
use crate::stats::NormalizedStats;

/// Capability key holding a backend's filter function.
pub const FILTER_FUNCTION: &str = "filter_function";

/// Capability key holding a backend's goodness function.
pub const GOODNESS_FUNCTION: &str = "goodness_function";

/// The reported function named `key`, if the backend set one.
pub(crate) fn reported_function(stats: &NormalizedStats, key: &str) -> Option<String> {
    stats.host_caps.get(key).and_then(value_text)
}

/// Lets each backend veto requests with its own `filter_function`.
///
/// A share type naming a different `share_backend_name` is rejected first.
/// A backend without a function accepts everything; a function that fails
/// to parse or evaluate rejects the backend.
pub struct DriverFilter;

impl HostFilter for DriverFilter {
    fn name(&self) -> &'static str {
        "DriverFilter"
    }

    fn host_passes(&self, stats: &NormalizedStats, _: &RequestSpec, _: &FilterProperties) -> bool {
        let host = &stats.host_stats.host;

        if let Some(wanted) = stats.extra_specs.get("share_backend_name").and_then(value_text) {
            if stats.host_stats.share_backend_name.as_deref() != Some(wanted.as_str()) {
                debug!(%host, %wanted, "share backend name does not match");
                return false;
            }
        }

        let Some(function) = reported_function(stats, FILTER_FUNCTION) else {
            debug!(%host, "no filter function, passing host");
            return true;
        };

        match evaluate(&function, stats) {
            Ok(result) => {
                info!(%host, %function, %result, "filter function evaluated");
                result.truthy()
            }
            Err(e) => {
                warn!(%host, %function, error = %e, "error in filter function, failing host");
                false
            }
        }
    }
}

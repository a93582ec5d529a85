//! Capacity filter: does the candidate have room for the requested size?
//!
//! Thick-provisioned candidates need real free space after the reserved
//! percentage is set aside. Thin-provisioned candidates (when the share type
//! asks for thin logic) are bounded by their oversubscription ratio instead.

use tidepool_state::{Capacity, FilterProperties, RequestSpec};
use tracing::{debug, error, warn};

use crate::filter::HostFilter;
use crate::stats::{NormalizedStats, thin_provisioning, use_thin_logic};

pub struct CapacityFilter;

impl HostFilter for CapacityFilter {
    fn name(&self) -> &'static str {
        "CapacityFilter"
    }

    fn host_passes(&self, stats: &NormalizedStats, request: &RequestSpec, _: &FilterProperties) -> bool {
        let host = &stats.host_stats;
        let size = request.size_gb as f64;
        let reserved = host.reserved_percentage / 100.0;

        let free_space = match host.free_capacity_gb {
            None => {
                error!(host = %host.host, "free capacity not set: capability reporting is broken");
                return false;
            }
            // Backends that cannot report free space are assumed able to
            // serve; a failed create is rescheduled.
            Some(Capacity::Unknown | Capacity::Unlimited) => return true,
            Some(Capacity::Known(free)) => free,
        };

        let total = match host.total_capacity_gb {
            // Reserved space cannot be computed without a total.
            Capacity::Unknown | Capacity::Unlimited => return reserved == 0.0 && size <= free_space,
            Capacity::Known(total) => total,
        };
        if total <= 0.0 {
            warn!(host = %host.host, total, "insufficient free space: total capacity is zero");
            return false;
        }

        let free = (free_space - total * reserved).floor();
        debug!(host = %host.host, requested = size, available = free, "space information for share creation");

        if use_thin_logic(&stats.share_type) && thin_provisioning(&host.thin_provisioning) {
            let ratio = host.max_over_subscription_ratio;
            if ratio < 1.0 {
                error!(host = %host.host, ratio, "invalid max_over_subscription_ratio, must be >= 1");
                return false;
            }
            let provisioned_ratio = (host.provisioned_capacity_gb + size) / total;
            if provisioned_ratio > ratio {
                warn!(
                    host = %host.host,
                    provisioned_ratio,
                    oversub_ratio = ratio,
                    "insufficient free space for thin provisioning"
                );
                return false;
            }
            return free * ratio >= size;
        }

        if free < size {
            warn!(host = %host.host, requested = size, available = free, "insufficient free space for share creation");
            return false;
        }
        true
    }
}

//! Share replication filter.
//!
//! Backends that can replicate to each other share a `replication_domain`.
//! A share whose type asks for replication needs a backend with a domain; a
//! new replica additionally needs the active replica's domain and a backend
//! that does not already hold a replica.

use tidepool_state::{FilterProperties, RequestSpec};
use tracing::debug;

use crate::filter::HostFilter;
use crate::stats::NormalizedStats;

pub struct ShareReplicationFilter;

impl HostFilter for ShareReplicationFilter {
    fn name(&self) -> &'static str {
        "ShareReplicationFilter"
    }

    fn host_passes(&self, stats: &NormalizedStats, request: &RequestSpec, props: &FilterProperties) -> bool {
        let host = &stats.host_stats.host;

        if !stats.extra_specs.contains_key("replication_type") {
            return true;
        }
        let Some(host_domain) = stats.host_stats.replication_domain.as_deref() else {
            debug!(%host, "replication is not enabled on host");
            return false;
        };
        let Some(active_replica_host) = request.active_replica_host.as_deref() else {
            // First instance of a replicated share; the replication type
            // itself is matched by the capabilities filter.
            return true;
        };

        if props.replication_domain.as_deref() != Some(host_domain) {
            debug!(
                %host,
                host_domain,
                active_replica_host,
                active_domain = ?props.replication_domain,
                "replication domain does not match the active replica's"
            );
            return false;
        }
        if request.all_replica_hosts.iter().any(|h| h == host) {
            debug!(%host, "host already holds a replica of this share");
            return false;
        }
        true
    }
}

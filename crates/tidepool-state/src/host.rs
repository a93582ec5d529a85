//! Host identity strings.
//!
//! A backend identity has the shape `host@backend#pool`, where the backend
//! and pool parts are optional. Pool-level candidates always carry a pool.

/// Pool name used when a legacy backend does not report pools.
pub const DEFAULT_POOL_NAME: &str = "_pool0";

/// Which component of an identity to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostLevel {
    /// `host`
    Host,
    /// `host@backend`
    Backend,
    /// `pool`
    Pool,
}

/// Extract one component of a `host@backend#pool` identity.
///
/// Returns `None` only for [`HostLevel::Pool`] when the identity carries no
/// pool and `default_pool` is false.
pub fn extract_host(id: &str, level: HostLevel, default_pool: bool) -> Option<String> {
    let (backend, pool) = match id.split_once('#') {
        Some((backend, pool)) => (backend, Some(pool)),
        None => (id, None),
    };

    match level {
        HostLevel::Host => Some(backend.split('@').next().unwrap_or(backend).to_string()),
        HostLevel::Backend => Some(backend.to_string()),
        HostLevel::Pool => match pool {
            Some(p) => Some(p.to_string()),
            None if default_pool => Some(DEFAULT_POOL_NAME.to_string()),
            None => None,
        },
    }
}

/// Build a pool identity by appending `#pool` to a backend identity.
///
/// An identity that already names a pool is returned unchanged.
pub fn append_pool(host: &str, pool: &str) -> String {
    if host.contains('#') || pool.is_empty() {
        host.to_string()
    } else {
        format!("{host}#{pool}")
    }
}

/// Whether `candidate` is named by `pattern` at any level.
///
/// `pattern` may be a bare host, a `host@backend`, or a full pool identity.
pub fn identity_matches(candidate: &str, pattern: &str) -> bool {
    if candidate == pattern {
        return true;
    }
    let backend = extract_host(candidate, HostLevel::Backend, false);
    if backend.as_deref() == Some(pattern) {
        return true;
    }
    !pattern.contains('@')
        && !pattern.contains('#')
        && extract_host(candidate, HostLevel::Host, false).as_deref() == Some(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_each_level() {
        let id = "node1@lvm#vg0";
        assert_eq!(extract_host(id, HostLevel::Host, false).as_deref(), Some("node1"));
        assert_eq!(extract_host(id, HostLevel::Backend, false).as_deref(), Some("node1@lvm"));
        assert_eq!(extract_host(id, HostLevel::Pool, false).as_deref(), Some("vg0"));
    }

    #[test]
    fn pool_defaults_only_when_asked() {
        assert_eq!(extract_host("node1@lvm", HostLevel::Pool, false), None);
        assert_eq!(
            extract_host("node1@lvm", HostLevel::Pool, true).as_deref(),
            Some(DEFAULT_POOL_NAME)
        );
    }

    #[test]
    fn append_pool_is_idempotent() {
        assert_eq!(append_pool("node1@lvm", "vg0"), "node1@lvm#vg0");
        assert_eq!(append_pool("node1@lvm#vg0", "vg1"), "node1@lvm#vg0");
    }

    #[test]
    fn identity_matches_any_level() {
        let id = "node1@lvm#vg0";
        assert!(identity_matches(id, "node1@lvm#vg0"));
        assert!(identity_matches(id, "node1@lvm"));
        assert!(identity_matches(id, "node1"));
        assert!(!identity_matches(id, "node1@nfs"));
        assert!(!identity_matches(id, "node2"));
    }
}

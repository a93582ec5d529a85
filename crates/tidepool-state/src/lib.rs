//! tidepool-state: data model and record store for the tidepool scheduler.
//!
//! Holds the types every other crate speaks:
//!
//! - [`BackendState`]: a read snapshot of one backend (or pool) as last
//!   reported, with capacity figures and free-form capabilities
//! - [`RequestSpec`] / [`FilterProperties`]: the request-scoped inputs of a
//!   scheduling attempt
//! - [`ShareRecord`] / [`ServiceRecord`]: persisted records, stored in a
//!   redb-backed [`StateStore`]
//!
//! Host identities follow the `host@backend#pool` convention; see [`host`].

pub mod error;
pub mod host;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use host::{DEFAULT_POOL_NAME, HostLevel, append_pool, extract_host, identity_matches};
pub use store::{StateStore, epoch_secs};
pub use types::*;

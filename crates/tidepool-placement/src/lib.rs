//! tidepool placement core: pick storage pools for shares.
//!
//! Pure computation over a snapshot of backend state. Nothing here performs
//! I/O or mutates shared state; the scheduler crate feeds candidates in and
//! acts on the result.
//!
//! # Components
//!
//! - **`stats`**: per-candidate [`NormalizedStats`] and the thin-provisioning
//!   predicates
//! - **`matcher`**: the extra-spec expression language
//! - **`filter`**: [`FilterChain`] plus the simple built-in filters
//! - **`capacity`**, **`capabilities`**, **`replication`**, **`driver`**: the
//!   remaining built-in filters
//! - **`evaluator`**: backend-reported filter and goodness functions
//! - **`weigher`**: [`WeigherChain`] and the built-in weighers

pub mod capabilities;
pub mod capacity;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod filter;
pub mod matcher;
pub mod replication;
pub mod stats;
pub mod weigher;

pub use capabilities::CapabilitiesFilter;
pub use capacity::CapacityFilter;
pub use driver::{DriverFilter, FILTER_FUNCTION, GOODNESS_FUNCTION};
pub use error::{EvaluatorError, EvaluatorResult, PlacementError, PlacementResult};
pub use evaluator::{Operand, evaluate};
pub use filter::{
    AvailabilityZoneFilter, BUILTIN_FILTERS, FilterChain, HostFilter, IgnoredHostsFilter, RetryFilter,
};
pub use matcher::match_requirement;
pub use replication::ShareReplicationFilter;
pub use stats::{HostStats, NormalizedStats, generate_stats, thin_provisioning, use_thin_logic};
pub use weigher::{
    AllocatedCapacityWeigher, BUILTIN_WEIGHERS, CapacityWeigher, GoodnessWeigher, HostWeigher, WeighedHost,
    WeigherChain, WeigherMultipliers,
};

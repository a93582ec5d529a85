//! tidepool-scheduler: choose a backend pool for each new share.
//!
//! Wraps the pure placement core with everything a running scheduler needs:
//!
//! - Ingests backend capability reports and joins them with service
//!   heartbeats ([`HostManager`])
//! - Picks a host with a configured [`SchedulingStrategy`]
//! - Records the decision, then hands the share to its backend ([`Scheduler`])
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── BackendSource (HostManager: reports + StateStore heartbeats)
//!   ├── SchedulingStrategy
//!   │     ├── FilterWeighStrategy (FilterChain → WeigherChain → best)
//!   │     └── RandomStrategy (uniform among eligible)
//!   ├── ShareRepository (StateStore: persist chosen host)
//!   └── Dispatcher (ChannelDispatcher: create_share_instance commands)
//! ```

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod filter_scheduler;
pub mod host_manager;
pub mod random;
pub mod scheduler;
pub mod strategy;

pub use config::{SchedulerConfig, StrategyKind};
pub use context::RequestContext;
pub use dispatch::{CREATE_SHARE_INSTANCE, ChannelDispatcher, CreateShareInstance, ShareCommand};
pub use error::{NoValidHostReason, SchedulerError, SchedulerResult};
pub use filter_scheduler::FilterWeighStrategy;
pub use host_manager::{HostManager, PoolSummary, SHARE_SERVICE};
pub use random::RandomStrategy;
pub use scheduler::{BackendSource, Dispatcher, Scheduler, ShareRepository};
pub use strategy::{BOOLEAN_EXTRA_SPECS, SchedulingStrategy, build_strategy, with_boolean_specs};

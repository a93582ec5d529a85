//! Scheduler: the driver that turns a placement request into a committed
//! decision.
//!
//! ```text
//! schedule(ctx, topic, request, props)
//!   ├── BackendSource::list_live_backends(topic)
//!   ├── SchedulingStrategy::select_host
//!   ├── ShareRepository::persist_chosen_host   (record the destination)
//!   └── Dispatcher::dispatch_to_backend        (then hand off)
//! ```
//!
//! The share record names its destination before the backend is asked to
//! act, so a crash between the two steps leaves a record pointing at the
//! intended host.

use std::sync::Arc;

use tracing::{error, info, warn};

use tidepool_state::{
    BackendState, FilterProperties, HostId, RequestSpec, ShareRecord, ShareStatus, StateStore,
};

use crate::config::SchedulerConfig;
use crate::context::RequestContext;
use crate::error::{SchedulerError, SchedulerResult};
use crate::host_manager::HostManager;
use crate::strategy::SchedulingStrategy;

// ── Collaborators ──────────────────────────────────────────────────

/// Where live candidates come from.
pub trait BackendSource: Send + Sync {
    fn list_live_backends(&self, ctx: &RequestContext, topic: &str) -> SchedulerResult<Vec<BackendState>>;
}

/// Persistence of share records.
pub trait ShareRepository: Send + Sync {
    /// Record `host` as the share's destination. Must be atomic with respect
    /// to concurrent readers of the record.
    fn persist_chosen_host(&self, ctx: &RequestContext, share_id: &str, host: &str) -> SchedulerResult<ShareRecord>;

    fn set_share_status(&self, ctx: &RequestContext, share_id: &str, status: ShareStatus) -> SchedulerResult<()>;
}

/// Hand-off of a decided share to its backend. Failures are reported, not
/// retried.
pub trait Dispatcher: Send + Sync {
    fn dispatch_to_backend(
        &self,
        ctx: &RequestContext,
        share: &ShareRecord,
        host: &str,
        request: &RequestSpec,
        props: &FilterProperties,
        snapshot_id: Option<&str>,
    ) -> SchedulerResult<()>;
}

impl BackendSource for HostManager {
    fn list_live_backends(&self, ctx: &RequestContext, topic: &str) -> SchedulerResult<Vec<BackendState>> {
        HostManager::list_live_backends(self, ctx, topic)
    }
}

impl ShareRepository for StateStore {
    fn persist_chosen_host(&self, _ctx: &RequestContext, share_id: &str, host: &str) -> SchedulerResult<ShareRecord> {
        Ok(self.update_share_host(share_id, host)?)
    }

    fn set_share_status(&self, _ctx: &RequestContext, share_id: &str, status: ShareStatus) -> SchedulerResult<()> {
        StateStore::set_share_status(self, share_id, status)?;
        Ok(())
    }
}

// ── Driver ─────────────────────────────────────────────────────────

pub struct Scheduler {
    topic: String,
    strategy: Box<dyn SchedulingStrategy>,
    source: Arc<dyn BackendSource>,
    repository: Arc<dyn ShareRepository>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Scheduler {
    pub fn new(
        config: &SchedulerConfig,
        strategy: Box<dyn SchedulingStrategy>,
        source: Arc<dyn BackendSource>,
        repository: Arc<dyn ShareRepository>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        info!(topic = %config.topic, strategy = strategy.name(), "scheduler created");
        Self {
            topic: config.topic.clone(),
            strategy,
            source,
            repository,
            dispatcher,
        }
    }

    /// Topic used by [`Scheduler::create_share_instance`].
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Choose a host, persist it, then dispatch. Returns the chosen identity.
    pub fn schedule(
        &self,
        ctx: &RequestContext,
        topic: &str,
        request: &RequestSpec,
        props: &mut FilterProperties,
    ) -> SchedulerResult<HostId> {
        let candidates = self.source.list_live_backends(ctx, topic)?;
        let chosen = self.strategy.select_host(ctx, &candidates, request, props)?;

        let share = self
            .repository
            .persist_chosen_host(ctx, &request.share_id, &chosen.host)?;
        self.dispatcher.dispatch_to_backend(
            ctx,
            &share,
            &chosen.host,
            request,
            props,
            request.snapshot_id.as_deref(),
        )?;

        info!(
            request_id = %ctx.request_id,
            share_id = %request.share_id,
            host = %chosen.host,
            "share scheduled"
        );
        Ok(chosen.host)
    }

    /// Choose `count` distinct destinations without persisting anything.
    pub fn select_destinations(
        &self,
        ctx: &RequestContext,
        topic: &str,
        request: &RequestSpec,
        props: &mut FilterProperties,
        count: usize,
    ) -> SchedulerResult<Vec<BackendState>> {
        let candidates = self.source.list_live_backends(ctx, topic)?;
        self.strategy.select_hosts(ctx, &candidates, request, props, count)
    }

    /// Schedule a new share instance on the configured topic.
    ///
    /// When no host qualifies the share is marked `error` before the
    /// failure is returned.
    pub fn create_share_instance(
        &self,
        ctx: &RequestContext,
        request: &RequestSpec,
        props: &mut FilterProperties,
    ) -> SchedulerResult<HostId> {
        match self.schedule(ctx, &self.topic, request, props) {
            Err(err @ SchedulerError::NoValidHost(_)) => {
                error!(
                    request_id = %ctx.request_id,
                    share_id = %request.share_id,
                    error = %err,
                    "failed to schedule share"
                );
                if let Err(status_err) = self
                    .repository
                    .set_share_status(ctx, &request.share_id, ShareStatus::Error)
                {
                    warn!(share_id = %request.share_id, error = %status_err, "could not mark share as error");
                }
                Err(err)
            }
            other => other,
        }
    }
}

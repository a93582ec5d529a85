//! Backend hand-off: turn a scheduling decision into a command for the
//! chosen backend's share service.
//!
//! Commands are pushed onto a bounded channel and never awaited. Whatever
//! drains the channel owns delivery; the scheduler does not retry.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use tidepool_state::{FilterProperties, HostId, RequestSpec, ShareRecord};

use crate::context::RequestContext;
use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::Dispatcher;

pub const CREATE_SHARE_INSTANCE: &str = "create_share_instance";

/// A command addressed to one backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareCommand {
    pub host: HostId,
    pub command_type: String,
    pub payload: String,
}

/// Payload of a `create_share_instance` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateShareInstance {
    pub request_id: String,
    pub share: ShareRecord,
    pub request_spec: RequestSpec,
    pub filter_properties: FilterProperties,
    pub snapshot_id: Option<String>,
}

impl ShareCommand {
    pub fn create_share_instance(host: &str, payload: &CreateShareInstance) -> SchedulerResult<Self> {
        let payload = serde_json::to_string(payload)
            .map_err(|e| SchedulerError::Dispatch(format!("encode {CREATE_SHARE_INSTANCE}: {e}")))?;
        Ok(Self {
            host: host.to_string(),
            command_type: CREATE_SHARE_INSTANCE.to_string(),
            payload,
        })
    }

    /// Decode a `create_share_instance` payload.
    pub fn decode_create(&self) -> SchedulerResult<CreateShareInstance> {
        if self.command_type != CREATE_SHARE_INSTANCE {
            return Err(SchedulerError::Dispatch(format!(
                "expected {CREATE_SHARE_INSTANCE}, got {}",
                self.command_type
            )));
        }
        serde_json::from_str(&self.payload)
            .map_err(|e| SchedulerError::Dispatch(format!("decode {CREATE_SHARE_INSTANCE}: {e}")))
    }
}

/// Dispatcher that queues commands on a tokio channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<ShareCommand>,
}

impl ChannelDispatcher {
    pub fn new(tx: mpsc::Sender<ShareCommand>) -> Self {
        Self { tx }
    }

    /// A dispatcher and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ShareCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch_to_backend(
        &self,
        ctx: &RequestContext,
        share: &ShareRecord,
        host: &str,
        request: &RequestSpec,
        props: &FilterProperties,
        snapshot_id: Option<&str>,
    ) -> SchedulerResult<()> {
        let command = ShareCommand::create_share_instance(
            host,
            &CreateShareInstance {
                request_id: ctx.request_id.clone(),
                share: share.clone(),
                request_spec: request.clone(),
                filter_properties: props.clone(),
                snapshot_id: snapshot_id.map(str::to_string),
            },
        )?;

        match self.tx.try_send(command) {
            Ok(()) => {
                debug!(request_id = %ctx.request_id, share_id = %share.id, %host, "dispatched create_share_instance");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(%host, "dispatch queue full");
                Err(SchedulerError::Dispatch(format!("queue full for {host}")))
            }
            Err(TrySendError::Closed(_)) => Err(SchedulerError::Dispatch("dispatch queue closed".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidepool_state::ShareStatus;

    fn share() -> ShareRecord {
        ShareRecord {
            id: "share-1".into(),
            host: Some("a@lvm#p".into()),
            status: ShareStatus::Creating,
            size_gb: 10,
            scheduled_at: Some(100),
            updated_at: 100,
        }
    }

    #[tokio::test]
    async fn queues_create_command() {
        let (dispatcher, mut rx) = ChannelDispatcher::channel(4);
        dispatcher
            .dispatch_to_backend(
                &RequestContext::new("req-1"),
                &share(),
                "a@lvm#p",
                &RequestSpec::default(),
                &FilterProperties::default(),
                Some("snap-1"),
            )
            .unwrap();

        let command = rx.recv().await.unwrap();
        assert_eq!(command.host, "a@lvm#p");
        assert_eq!(command.command_type, CREATE_SHARE_INSTANCE);
        let payload = command.decode_create().unwrap();
        assert_eq!(payload.request_id, "req-1");
        assert_eq!(payload.share.id, "share-1");
        assert_eq!(payload.snapshot_id.as_deref(), Some("snap-1"));
    }

    #[test]
    fn full_queue_is_dispatch_error() {
        let (dispatcher, _rx) = ChannelDispatcher::channel(1);
        let send = || {
            dispatcher.dispatch_to_backend(
                &RequestContext::default(),
                &share(),
                "a@lvm#p",
                &RequestSpec::default(),
                &FilterProperties::default(),
                None,
            )
        };
        send().unwrap();
        assert!(matches!(send(), Err(SchedulerError::Dispatch(_))));
    }

    #[test]
    fn closed_queue_is_dispatch_error() {
        let (dispatcher, rx) = ChannelDispatcher::channel(1);
        drop(rx);
        let err = dispatcher
            .dispatch_to_backend(
                &RequestContext::default(),
                &share(),
                "a@lvm#p",
                &RequestSpec::default(),
                &FilterProperties::default(),
                None,
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "dispatch failed: dispatch queue closed");
    }

    #[test]
    fn decode_rejects_other_commands() {
        let command = ShareCommand {
            host: "a@lvm#p".into(),
            command_type: "delete_share".into(),
            payload: "{}".into(),
        };
        assert!(command.decode_create().is_err());
    }
}

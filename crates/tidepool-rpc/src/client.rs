//! Authenticated JSON-RPC client.
//!
//! ```text
//! client.request("volume", "get_child_props").call(params)
//!   └── POST {"object", "method", "params", "id"}   (Authorization: Basic ...)
//!         ├── connection failure ──► back off, retry (bounded)
//!         ├── HTTP 401/403/>=300 ──► RpcError::Http
//!         ├── {"error": {...}}   ──► RpcError::Backend
//!         └── {"result": ...}    ──► Ok(result)
//! ```
//!
//! Only connection-level failures are retried. Anything the backend said is
//! returned as is.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{RpcError, RpcResult, TransportError};
use crate::transport::{HttpTransport, Transport, TransportResponse};

/// Bounded exponential backoff for connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given `attempt` failures so far.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Debug, Serialize)]
struct CallBody<'a> {
    object: &'a str,
    method: &'a str,
    params: &'a Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Value,
}

pub struct JsonRpcClient<T = HttpTransport> {
    transport: T,
    authorization: String,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl JsonRpcClient<HttpTransport> {
    /// Client for an HTTP endpoint.
    pub fn http(url: &str, user: &str, password: &str) -> RpcResult<Self> {
        Ok(Self::new(HttpTransport::new(url)?, user, password))
    }
}

impl<T: Transport> JsonRpcClient<T> {
    pub fn new(transport: T, user: &str, password: &str) -> Self {
        let token = general_purpose::STANDARD.encode(format!("{user}:{password}"));
        Self {
            transport,
            authorization: format!("Basic {token}"),
            retry: RetryPolicy::default(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Address `method` on `object`.
    pub fn request<'a>(&'a self, object: &'a str, method: &'a str) -> RpcRequest<'a, T> {
        RpcRequest {
            client: self,
            object,
            method,
        }
    }

    async fn execute(&self, object: &str, method: &str, params: &Value) -> RpcResult<Value> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last: Option<TransportError> = None;

        for attempt in 1..=max_attempts {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let body = serde_json::to_vec(&CallBody {
                object,
                method,
                params,
                id,
            })
            .map_err(|e| RpcError::Decode(format!("encode request: {e}")))?;
            debug!(%object, %method, id, attempt, "sending json-rpc request");

            match self.transport.send(&self.authorization, Bytes::from(body)).await {
                Ok(response) => return Self::check_response(object, method, response),
                Err(err) if err.is_retryable() => {
                    if attempt < max_attempts {
                        let delay = self.retry.backoff(attempt);
                        warn!(
                            %object,
                            %method,
                            attempt,
                            max_attempts,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "connection failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last = Some(err);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(RpcError::RetriesExhausted {
            attempts: max_attempts,
            last: last.unwrap_or_else(|| TransportError::Connection("no attempt made".to_string())),
        })
    }

    fn check_response(object: &str, method: &str, response: TransportResponse) -> RpcResult<Value> {
        if response.status == 401 || response.status == 403 {
            return Err(RpcError::Http {
                status: response.status,
                reason: format!("unauthorized user {}", response.reason),
            });
        }
        if response.status >= 300 {
            return Err(RpcError::Http {
                status: response.status,
                reason: response.reason,
            });
        }

        let parsed: CallResponse =
            serde_json::from_slice(&response.body).map_err(|e| RpcError::Decode(e.to_string()))?;
        match parsed.error {
            Value::Null => {
                debug!(%object, %method, "json-rpc call succeeded");
                Ok(parsed.result)
            }
            Value::Object(err) => Err(RpcError::Backend {
                code: err.get("code").and_then(Value::as_i64),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(err.clone()).to_string()),
            }),
            other => Err(RpcError::Backend {
                code: None,
                message: match other {
                    Value::String(s) => s,
                    v => v.to_string(),
                },
            }),
        }
    }
}

/// One addressable remote method.
pub struct RpcRequest<'a, T> {
    client: &'a JsonRpcClient<T>,
    object: &'a str,
    method: &'a str,
}

impl<T: Transport> RpcRequest<'_, T> {
    pub async fn call(&self, params: Value) -> RpcResult<Value> {
        self.client.execute(self.object, self.method, &params).await
    }
}

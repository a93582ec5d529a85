//! Transport: how a JSON-RPC body reaches the backend.
//!
//! [`HttpTransport`] posts over a fresh HTTP/1.1 connection per call. Only
//! failures to connect are reported as retryable; once the request may have
//! been written, a failure is a protocol error. Tests substitute their own
//! [`Transport`].

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http::Uri;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::SendRequest;
use tracing::debug;

use crate::error::TransportError;

/// Raw HTTP answer: status line and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub reason: String,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            reason: "OK".to_string(),
            body: body.into(),
        }
    }
}

pub trait Transport: Send + Sync {
    /// Post one JSON body with the given `Authorization` header value.
    fn send(
        &self,
        authorization: &str,
        body: Bytes,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

/// HTTP/1.1 transport over plain TCP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    uri: Uri,
    authority: String,
    timeout: Duration,
}

impl HttpTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(url: &str) -> Result<Self, TransportError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(TransportError::InvalidUrl(format!(
                    "{url}: unsupported scheme {other}"
                )));
            }
            None => return Err(TransportError::InvalidUrl(format!("{url}: missing scheme"))),
        }
        let authority = uri
            .authority()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{url}: missing host")))?;
        let authority = match authority.port_u16() {
            Some(_) => authority.to_string(),
            None => format!("{}:80", authority.host()),
        };
        Ok(Self {
            uri,
            authority,
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> String {
        self.uri.to_string()
    }

    /// Open a connection. Failures here happen before any byte of the
    /// request is written.
    async fn connect(&self) -> Result<SendRequest<Full<Bytes>>, TransportError> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| TransportError::Connection(format!("{}: {e}", self.authority)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TransportError::Connection(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "rpc connection closed with error");
            }
        });
        Ok(sender)
    }

    async fn exchange(
        &self,
        mut sender: SendRequest<Full<Bytes>>,
        authorization: &str,
        body: Bytes,
    ) -> Result<TransportResponse, TransportError> {
        let path = self.uri.path_and_query().map_or("/", |p| p.as_str());
        let req = http::Request::builder()
            .method("POST")
            .uri(path)
            .header("host", &self.authority)
            .header("content-type", "application/json")
            .header("authorization", authorization)
            .header("user-agent", "tidepool-rpc/0.1")
            .body(Full::new(body))
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| TransportError::Protocol(format!("send: {e}")))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Protocol(format!("read body: {e}")))?
            .to_bytes();

        Ok(TransportResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            body,
        })
    }
}

impl Transport for HttpTransport {
    async fn send(&self, authorization: &str, body: Bytes) -> Result<TransportResponse, TransportError> {
        let sender = match tokio::time::timeout(self.timeout, self.connect()).await {
            Ok(sender) => sender?,
            Err(_) => {
                return Err(TransportError::Connection(format!(
                    "connecting to {} timed out after {:?}",
                    self.authority, self.timeout
                )));
            }
        };
        match tokio::time::timeout(self.timeout, self.exchange(sender, authorization, body)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Protocol(format!(
                "no response from {} within {:?}",
                self.authority, self.timeout
            ))),
        }
    }
}

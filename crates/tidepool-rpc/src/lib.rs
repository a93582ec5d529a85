//! tidepool-rpc: authenticated JSON-RPC client for storage backends.
//!
//! A typed request builder over a pluggable [`Transport`]:
//!
//! ```text
//! JsonRpcClient
//!   ├── request(object, method) ──► RpcRequest::call(params)
//!   ├── RetryPolicy (connection failures only, exponential backoff)
//!   └── Transport (HttpTransport: hyper HTTP/1.1)
//! ```

pub mod client;
pub mod error;
pub mod transport;

pub use client::{JsonRpcClient, RetryPolicy, RpcRequest};
pub use error::{RpcError, RpcResult, TransportError};
pub use transport::{HttpTransport, Transport, TransportResponse};

//! Per-request context threaded through scheduling calls.

/// Identity of the request being scheduled, carried into logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub project_id: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            project_id: None,
        }
    }
}

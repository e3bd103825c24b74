use std::{
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use async_trait::async_trait;

use crate::{
    protocol::error::SkillError,
    transport::{Transport, TransportRequest, TransportResponse},
};

/// Mock transport for internal testing
///
/// Answers every request with a canned handler and records what it was asked to send.
#[derive(Clone)]
pub(crate) struct MockTransport {
    handler: Arc<dyn Fn(&TransportRequest) -> TransportResponse + Send + Sync>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl MockTransport {
    /// Create a new mock transport with a custom request handler
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&TransportRequest) -> TransportResponse + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock transport that always returns the given status and body
    pub fn respond(status: u16, body: &'static str) -> Self {
        Self::new(move |_| TransportResponse::new(status).body(bytes::Bytes::from_static(body.as_bytes())))
    }

    /// Every request executed so far
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), SkillError>> {
        Poll::Ready(Ok(()))
    }

    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, SkillError> {
        let response = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        Ok(response)
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").finish()
    }
}

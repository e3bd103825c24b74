//! Transport abstraction layer for skill traffic

pub mod http;
#[cfg(test)]
pub mod mock;
pub mod websocket;

use std::{
    collections::HashMap,
    task::{Context, Poll},
};

pub use http::HttpTransport;
pub use websocket::{ConnectionState, RequestHandler, StreamingConnection, StreamingSender};

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::protocol::error::SkillError;

/// An outbound call to a skill endpoint
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Skill messaging endpoint
    pub url: Url,

    pub method: String,

    /// Content type and signing headers
    pub headers: HashMap<String, String>,

    /// Encoded activity
    pub body: Bytes,
}

impl TransportRequest {
    pub fn new(url: Url, method: impl Into<String>) -> Self {
        Self {
            url,
            method: method.into(),
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

/// What a skill answered
#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,

    pub headers: HashMap<String, String>,

    /// Encoded activities, possibly empty
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Whether the skill accepted the activity (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, for error reporting
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Transport used by a parent bot to reach a skill
#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    /// Wait for capacity before a request is issued
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), SkillError>>;

    /// Send one request
    ///
    /// Non-2xx statuses are returned as responses, not errors; only failures to get a
    /// response at all are errors.
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, SkillError>;
}

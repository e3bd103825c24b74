//! HTTP transport used to POST activities to a skill

use std::{
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;

use crate::protocol::error::SkillError;

use super::{Transport, TransportRequest, TransportResponse};

/// HTTP transport implementation using reqwest
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a transport whose requests fail after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self, SkillError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Create a new HTTP transport with a custom reqwest client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), SkillError>> {
        // HTTP client is always ready
        Poll::Ready(Ok(()))
    }

    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, SkillError> {
        let url = request.url.clone();

        let mut req_builder = match request.method.as_str() {
            "POST" => self.client.post(url),
            "GET" => self.client.get(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            _ => {
                return Err(SkillError::Transport(format!(
                    "Unsupported HTTP method: {}",
                    request.method
                )))
            }
        };

        for (key, value) in request.headers {
            req_builder = req_builder.header(key, value);
        }

        if !request.body.is_empty() {
            req_builder = req_builder.body(request.body);
        }

        let response = req_builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body = response.bytes().await?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

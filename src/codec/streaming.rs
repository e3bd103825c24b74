//! Frame envelope for the WebSocket binding
//!
//! Each WebSocket text message carries exactly one [`Frame`]: either a request
//! (`verb` + `path` + content streams) or the response to one, paired through
//! `requestId`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{codec::JSON_CONTENT_TYPE, protocol::error::SkillError};

/// One payload stream attached to a request or response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentStream {
    pub id: String,

    /// Declared payload type, e.g. `application/json; charset=utf-8`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default)]
    pub content: String,
}

impl ContentStream {
    /// Create a JSON content stream
    pub fn json(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            content: content.into(),
        }
    }

    /// Whether the declared payload type is the JSON content type
    pub fn is_json(&self) -> bool {
        self.content_type.as_deref() == Some(JSON_CONTENT_TYPE)
    }
}

/// A request travelling over the socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamingRequest {
    pub request_id: String,

    /// HTTP-style verb: `POST`, `PUT`, `DELETE`, ...
    pub verb: String,

    pub path: String,

    #[serde(default)]
    pub streams: Vec<ContentStream>,
}

impl StreamingRequest {
    /// Create a request without a body
    pub fn new(verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::now_v7().to_string(),
            verb: verb.into(),
            path: path.into(),
            streams: Vec::new(),
        }
    }

    pub fn post(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new("POST", path).with_stream(ContentStream::json(body))
    }

    pub fn put(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new("PUT", path).with_stream(ContentStream::json(body))
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new("DELETE", path)
    }

    /// Attach a content stream
    pub fn with_stream(mut self, stream: ContentStream) -> Self {
        self.streams.push(stream);
        self
    }

    /// Reassemble the body from every content stream, in order
    pub fn read_body_as_string(&self) -> String {
        self.streams.iter().map(|s| s.content.as_str()).collect()
    }
}

/// The answer to a [`StreamingRequest`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamingResponse {
    pub request_id: String,

    pub status_code: u16,

    #[serde(default)]
    pub streams: Vec<ContentStream>,
}

impl StreamingResponse {
    /// Create an empty response with the given status
    ///
    /// The request id is filled in by the connection when the response is sent.
    pub fn new(status_code: u16) -> Self {
        Self {
            request_id: String::new(),
            status_code,
            streams: Vec::new(),
        }
    }

    /// Attach a JSON body
    pub fn with_json_body(mut self, body: &Value) -> Self {
        self.streams.push(ContentStream::json(body.to_string()));
        self
    }

    pub fn read_body_as_string(&self) -> String {
        self.streams.iter().map(|s| s.content.as_str()).collect()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// A single WebSocket message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Frame {
    Request(StreamingRequest),
    Response(StreamingResponse),
}

/// Codec turning frames into WebSocket text payloads
#[derive(Debug, Clone, Default)]
pub struct StreamingCodec;

impl StreamingCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode_frame(&self, frame: &Frame) -> Result<String, SkillError> {
        Ok(serde_json::to_string(frame)?)
    }

    pub fn decode_frame(&self, text: &str) -> Result<Frame, SkillError> {
        Ok(serde_json::from_str(text)?)
    }
}

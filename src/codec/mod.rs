//! Serialization codecs for activities and WebSocket frames

pub mod json;
pub mod streaming;

pub use json::JsonCodec;
pub use streaming::{ContentStream, Frame, StreamingCodec, StreamingRequest, StreamingResponse};

use crate::protocol::{activity::Activity, error::SkillError};
use bytes::Bytes;

/// Content type every activity payload must declare
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Codec trait for encoding and decoding activities on the wire
pub trait Codec: Send + Sync {
    /// Deserialize a request body into an activity
    ///
    /// # Arguments
    ///
    /// * `body` - The raw request body bytes
    ///
    /// # Returns
    ///
    /// The decoded activity, or a malformed-request error if the body is not an
    /// object with a string `type`
    fn decode_activity(&self, body: &[u8]) -> Result<Activity, SkillError>;

    /// Deserialize a response body carrying zero or more activities
    fn decode_activities(&self, body: &[u8]) -> Result<Vec<Activity>, SkillError>;

    /// Serialize a single activity
    fn encode_activity(&self, activity: &Activity) -> Result<Bytes, SkillError>;

    /// Serialize a batch of activities as one array body
    fn encode_activities(&self, activities: &[Activity]) -> Result<Bytes, SkillError>;

    /// Get the content type for this codec
    fn content_type(&self) -> &str;
}

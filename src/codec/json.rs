//! JSON codec for activities

use bytes::Bytes;
use serde_json::Value;

use crate::{
    codec::{Codec, JSON_CONTENT_TYPE},
    protocol::{activity::Activity, error::SkillError},
};

/// JSON codec for the activity wire format
///
/// Date fields (`timestamp`, `localTimestamp`, `expiration`) arriving as ISO-8601 strings
/// are converted to native dates on decode and written back as RFC 3339 strings.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec
    pub fn new() -> Self {
        Self
    }

    /// Check the shape every activity must have before typed decoding
    fn validate_shape(value: &Value) -> Result<(), SkillError> {
        let object = value
            .as_object()
            .ok_or_else(|| SkillError::MalformedRequest("Activity must be a JSON object".into()))?;

        match object.get("type") {
            Some(Value::String(_)) => Ok(()),
            Some(_) => Err(SkillError::MalformedRequest(
                "Activity type must be a string".into(),
            )),
            None => Err(SkillError::MalformedRequest(
                "Activity is missing a type".into(),
            )),
        }
    }
}

impl Codec for JsonCodec {
    fn decode_activity(&self, body: &[u8]) -> Result<Activity, SkillError> {
        if body.is_empty() {
            return Err(SkillError::MalformedRequest("Request body is empty".into()));
        }

        let value: Value = serde_json::from_slice(body)?;
        Self::validate_shape(&value)?;

        Ok(serde_json::from_value(value)?)
    }

    fn decode_activities(&self, body: &[u8]) -> Result<Vec<Activity>, SkillError> {
        // Skills with nothing to say may answer with an empty body
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let value: Value = serde_json::from_slice(body)?;
        let items = match value {
            Value::Array(items) => items,
            Value::Null => return Ok(Vec::new()),
            other => vec![other],
        };

        items
            .into_iter()
            .map(|item| {
                Self::validate_shape(&item)?;
                Ok(serde_json::from_value(item)?)
            })
            .collect()
    }

    fn encode_activity(&self, activity: &Activity) -> Result<Bytes, SkillError> {
        Ok(Bytes::from(serde_json::to_vec(activity)?))
    }

    fn encode_activities(&self, activities: &[Activity]) -> Result<Bytes, SkillError> {
        Ok(Bytes::from(serde_json::to_vec(activities)?))
    }

    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }
}

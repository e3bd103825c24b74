//! Error types for skill transport operations

use thiserror::Error;

/// Main error type for skill transport operations
#[derive(Debug, Error)]
pub enum SkillError {
    /// The authentication provider rejected the request
    #[error("Authentication failed")]
    Authentication,

    /// The request body is not a structurally valid activity
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// A content stream declared a payload type other than JSON
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// The adapter capability is not available on this transport
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A skill answered a forwarded activity with a non-2xx status
    #[error("Skill responded with status {status}: {message}")]
    DownstreamTransport { status: u16, message: String },

    /// The in-process skill bot could not be constructed
    #[error("Failed to activate skill '{skill}': {source}")]
    SkillActivation {
        skill: String,
        #[source]
        source: anyhow::Error,
    },

    /// Transport-level error (network, connection, closed socket, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// State storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Request timeout error
    #[error("Request timeout")]
    Timeout,

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

impl SkillError {
    /// Wrap a constructor failure with the name of the skill being activated
    pub fn activation(skill: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        SkillError::SkillActivation {
            skill: skill.into(),
            source: source.into(),
        }
    }

    /// Status code used when this error is turned into a wire response
    pub fn status_code(&self) -> u16 {
        match self {
            SkillError::Authentication => 401,
            SkillError::MalformedRequest(_) => 400,
            SkillError::UnsupportedContentType(_) => 406,
            SkillError::UnsupportedOperation(_) => 501,
            SkillError::Timeout => 504,
            _ => 500,
        }
    }
}

/// Result type alias for skill transport operations
pub type SkillResult<T> = Result<T, SkillError>;

impl From<reqwest::Error> for SkillError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SkillError::Timeout
        } else if err.is_connect() {
            SkillError::Transport(format!("Connection error: {}", err))
        } else {
            SkillError::Transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SkillError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SkillError::Transport(format!("WebSocket error: {}", err))
    }
}

impl From<&str> for SkillError {
    fn from(s: &str) -> Self {
        SkillError::Other(s.to_string())
    }
}

impl From<String> for SkillError {
    fn from(s: String) -> Self {
        SkillError::Other(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(SkillError::Authentication.status_code(), 401);
        assert_eq!(SkillError::MalformedRequest("x".into()).status_code(), 400);
        assert_eq!(
            SkillError::UnsupportedContentType("text/plain".into()).status_code(),
            406
        );
        assert_eq!(
            SkillError::UnsupportedOperation("delete".into()).status_code(),
            501
        );
        assert_eq!(SkillError::Other("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_activation_error_keeps_context() {
        let err = SkillError::activation("calendar", anyhow::anyhow!("no such type"));
        assert_eq!(
            err.to_string(),
            "Failed to activate skill 'calendar': no such type"
        );
    }
}

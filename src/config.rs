//! Configuration for skill hosting and forwarding

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    layer::auth::AuthCredentials,
    protocol::{
        error::{SkillError, SkillResult},
        skill::{SkillManifest, SkillRegistration},
    },
    router::SkillRouter,
};

/// Configuration for a parent forwarding activities to skills
#[derive(Debug, Clone)]
pub struct SkillClientConfig {
    /// App id of the parent bot
    pub app_id: String,

    /// Credentials used to sign every forwarded request
    pub credentials: Option<AuthCredentials>,

    /// Request timeout
    pub timeout: Duration,
}

impl SkillClientConfig {
    /// Create a new client configuration
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            credentials: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the signing credentials
    pub fn with_credentials(mut self, credentials: AuthCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SkillClientConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Skills known to a parent bot
///
/// ```json
/// {
///   "skills": [
///     { "id": "calendar", "name": "Calendar", "msaAppId": "...", "endpoint": "https://calendar.example.com/api/skill/messages" }
///   ],
///   "registrations": [
///     { "name": "todo", "dispatcherModelName": "l_Todo", "typeName": "todo-skill", "parameters": ["timezone"] }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkillsConfig {
    /// Skills reached over the network
    #[serde(default)]
    pub skills: Vec<SkillManifest>,

    /// Skills hosted in-process
    #[serde(default)]
    pub registrations: Vec<SkillRegistration>,
}

impl SkillsConfig {
    pub fn from_json_str(json: &str) -> SkillResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SkillResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SkillError::Other(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Manifest of the remote skill with the given id
    pub fn manifest(&self, id: &str) -> Option<&SkillManifest> {
        self.skills.iter().find(|skill| skill.id == id)
    }

    /// Router over the in-process registrations
    pub fn router(&self) -> SkillRouter {
        SkillRouter::new(self.registrations.clone())
    }
}

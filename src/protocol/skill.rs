//! Skill descriptions: in-process registrations and remote manifests

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// Static description of a skill that runs inside the parent process
///
/// Immutable after load. The router looks registrations up by exact
/// `dispatcher_model_name` match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkillRegistration {
    /// Skill name, also the storage partition key
    pub name: String,

    /// Routing key produced by the parent's dispatcher model
    pub dispatcher_model_name: String,

    /// Key into the skill factory that constructs the skill's bot
    pub type_name: String,

    /// Remote endpoint, when the skill is also reachable over the network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Url>,

    /// OAuth connection used to answer the skill's token requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_connection_name: Option<String>,

    /// Names of the parent values the skill accepts on begin
    #[serde(default)]
    pub parameters: Vec<String>,

    /// Arbitrary key/value configuration handed to the skill's constructor
    #[serde(default)]
    pub configuration: HashMap<String, String>,
}

impl SkillRegistration {
    /// Create a registration with no auth connection, parameters, or configuration
    pub fn new(
        name: impl Into<String>,
        dispatcher_model_name: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            dispatcher_model_name: dispatcher_model_name.into(),
            type_name: type_name.into(),
            endpoint: None,
            auth_connection_name: None,
            parameters: Vec::new(),
            configuration: HashMap::new(),
        }
    }

    pub fn with_auth_connection(mut self, connection_name: impl Into<String>) -> Self {
        self.auth_connection_name = Some(connection_name.into());
        self
    }

    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameters.push(parameter.into());
        self
    }

    pub fn with_configuration(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    /// Keep only the entries of `values` this skill declares as parameters
    pub fn filter_parameters(&self, values: &Map<String, Value>) -> Map<String, Value> {
        values
            .iter()
            .filter(|(key, _)| self.parameters.iter().any(|p| p == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Description of a skill reachable over the network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkillManifest {
    pub id: String,

    pub name: String,

    /// App id of the skill, used as the audience when signing requests
    pub msa_app_id: String,

    /// Where activities are POSTed
    pub endpoint: Url,

    /// Service URL the skill calls back on; trusted before every forward
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<Url>,
}

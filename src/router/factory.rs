//! Construction of in-process skill bots by type name

use std::{collections::HashMap, sync::Arc};

use crate::{
    protocol::{
        error::{SkillError, SkillResult},
        skill::SkillRegistration,
    },
    router::storage::Storage,
    turn::Bot,
};

/// Constructor for one skill type
pub type SkillConstructor =
    Arc<dyn Fn(&SkillActivation) -> anyhow::Result<Arc<dyn Bot>> + Send + Sync>;

/// Everything a skill constructor receives
#[derive(Clone)]
pub struct SkillActivation {
    pub registration: SkillRegistration,

    /// Storage partition reserved for this skill
    pub storage: Arc<dyn Storage>,

    pub configuration: HashMap<String, String>,
}

impl SkillActivation {
    pub fn new(registration: SkillRegistration, storage: Arc<dyn Storage>) -> Self {
        let configuration = registration.configuration.clone();
        Self {
            registration,
            storage,
            configuration,
        }
    }
}

impl std::fmt::Debug for SkillActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillActivation")
            .field("registration", &self.registration)
            .field("configuration", &self.configuration)
            .finish()
    }
}

/// Registry from type name to skill constructor, filled at startup
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tower_skill::prelude::*;
///
/// struct Calendar;
///
/// #[async_trait::async_trait]
/// impl Bot for Calendar {
///     async fn on_turn(&self, ctx: &TurnContext) -> SkillResult<()> {
///         ctx.send_text("What day?").await?;
///         Ok(())
///     }
/// }
///
/// let factory = SkillFactory::new().register("calendar-skill", |_activation| {
///     Ok(Arc::new(Calendar) as Arc<dyn Bot>)
/// });
/// assert!(factory.contains("calendar-skill"));
/// ```
#[derive(Clone, Default)]
pub struct SkillFactory {
    constructors: HashMap<String, SkillConstructor>,
}

impl SkillFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the constructor for `type_name`, replacing any previous one
    pub fn register<F>(mut self, type_name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&SkillActivation) -> anyhow::Result<Arc<dyn Bot>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(type_name.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Build the bot for a registration
    ///
    /// An unknown type name and a failing constructor are both activation errors.
    pub fn activate(&self, activation: &SkillActivation) -> SkillResult<Arc<dyn Bot>> {
        let registration = &activation.registration;
        let constructor = self
            .constructors
            .get(&registration.type_name)
            .ok_or_else(|| {
                SkillError::activation(
                    registration.name.clone(),
                    anyhow::anyhow!("no skill type registered as '{}'", registration.type_name),
                )
            })?;

        constructor(activation).map_err(|e| SkillError::activation(registration.name.clone(), e))
    }
}

impl std::fmt::Debug for SkillFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.constructors.keys().collect();
        types.sort();
        f.debug_struct("SkillFactory").field("types", &types).finish()
    }
}

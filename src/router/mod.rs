//! In-process skill routing
//!
//! A parent bot that hosts skills in its own process looks the target skill up with
//! [`SkillRouter`] and runs it through a [`SkillDialog`].

pub mod dialog;
pub mod factory;
pub mod storage;

pub use dialog::{DialogTurnResult, SkillDialog, SkillDialogState, SkillDialogStatus, TokenProvider};
pub use factory::{SkillActivation, SkillConstructor, SkillFactory};
pub use storage::{MemoryStorage, PartitionedStorage, Storage};

use crate::protocol::skill::SkillRegistration;

/// Resolves the dispatcher's intent to a skill registration
#[derive(Debug, Clone, Default)]
pub struct SkillRouter {
    registrations: Vec<SkillRegistration>,
}

impl SkillRouter {
    pub fn new(registrations: Vec<SkillRegistration>) -> Self {
        Self { registrations }
    }

    /// First registration whose dispatcher model name matches exactly
    pub fn identify(&self, dispatcher_model_name: &str) -> Option<&SkillRegistration> {
        self.registrations
            .iter()
            .find(|registration| registration.dispatcher_model_name == dispatcher_model_name)
    }

    pub fn registrations(&self) -> &[SkillRegistration] {
        &self.registrations
    }
}

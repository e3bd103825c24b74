//! Core skill protocol types and definitions

pub mod activity;
pub mod error;
pub mod skill;

pub use activity::{
    Activity, ActivityType, ChannelAccount, ConversationAccount, ConversationReference,
    InvokeResponse, ResourceResponse, TokenResponse,
};
pub use error::{SkillError, SkillResult};
pub use skill::{SkillManifest, SkillRegistration};

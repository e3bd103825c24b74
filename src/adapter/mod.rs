//! Bot adapter shims translating the turn contract onto each transport

pub mod http;
pub mod in_process;
pub mod websocket;

pub use http::{HttpTurnResult, SkillHttpBotAdapter};
pub use in_process::InProcessAdapter;
pub use websocket::SkillWebSocketBotAdapter;

use crate::protocol::activity::{Activity, ActivityType};

/// Channel on which trace activities are delivered
pub const EMULATOR_CHANNEL: &str = "emulator";

/// Channel on which typing activities are delivered
pub const TEST_CHANNEL: &str = "test";

/// Whether an outbound activity is delivered at all
///
/// Traces only reach the emulator and typing indicators only reach the test channel.
/// These rules are fixed.
pub(crate) fn is_deliverable(activity: &Activity) -> bool {
    match activity.activity_type {
        ActivityType::Trace => activity.channel_id.as_deref() == Some(EMULATOR_CHANNEL),
        ActivityType::Typing => activity.channel_id.as_deref() == Some(TEST_CHANNEL),
        _ => true,
    }
}

//! Dialog that hosts an in-process skill for the lifetime of its conversation
//!
//! Each parent turn is pumped through the skill's bot on an [`InProcessAdapter`]. The
//! replies are then drained: an `endOfConversation` ends the dialog, a `tokens/request`
//! event is answered locally with a `tokens/response` event fed back into the skill, and
//! everything else is handed back to the parent.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{
    adapter::in_process::InProcessAdapter,
    middleware::MiddlewareSet,
    protocol::{
        activity::{Activity, ActivityType, TokenResponse, TOKEN_REQUEST_EVENT, TOKEN_RESPONSE_EVENT},
        error::{SkillError, SkillResult},
        skill::SkillRegistration,
    },
    router::{
        factory::{SkillActivation, SkillFactory},
        storage::{PartitionedStorage, Storage},
    },
    turn::Bot,
};

/// Source of OAuth tokens requested by skills
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Token for `connection_name`, or `None` when the user has not signed in yet
    async fn get_token(
        &self,
        connection_name: String,
        activity: Activity,
    ) -> SkillResult<Option<TokenResponse>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkillDialogStatus {
    #[default]
    Uninitialized,
    Active,
    Terminated,
}

/// Per-conversation state of a [`SkillDialog`], owned by the parent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDialogState {
    pub status: SkillDialogStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_skill: Option<SkillRegistration>,

    /// The skill asked for a token the provider could not supply yet
    #[serde(default)]
    pub pending_token_request: bool,
}

impl SkillDialogState {
    pub fn is_active(&self) -> bool {
        self.status == SkillDialogStatus::Active
    }

    fn terminate(&mut self) {
        self.status = SkillDialogStatus::Terminated;
        self.active_skill = None;
        self.pending_token_request = false;
    }
}

/// Outcome of one dialog turn
#[derive(Debug, Clone, PartialEq)]
pub enum DialogTurnResult {
    /// The skill is still running and expects more input
    Waiting { replies: Vec<Activity> },

    /// The skill ended the conversation; `result` is its end-of-conversation value
    Complete {
        replies: Vec<Activity>,
        result: Option<Value>,
    },
}

impl DialogTurnResult {
    pub fn replies(&self) -> &[Activity] {
        match self {
            DialogTurnResult::Waiting { replies } | DialogTurnResult::Complete { replies, .. } => {
                replies
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, DialogTurnResult::Complete { .. })
    }
}

/// Runs in-process skills on behalf of a parent bot
pub struct SkillDialog {
    factory: Arc<SkillFactory>,
    storage: Arc<dyn Storage>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    adapter: Arc<InProcessAdapter>,
    /// Activated skills, keyed by skill name
    skills: RwLock<HashMap<String, Arc<dyn Bot>>>,
}

impl SkillDialog {
    pub fn new(factory: Arc<SkillFactory>, storage: Arc<dyn Storage>) -> Self {
        Self {
            factory,
            storage,
            token_provider: None,
            adapter: Arc::new(InProcessAdapter::new()),
            skills: RwLock::new(HashMap::new()),
        }
    }

    /// Answer skills' `tokens/request` events with `provider`
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Run every skill turn through `middleware`
    pub fn with_middleware(mut self, middleware: MiddlewareSet) -> Self {
        self.adapter = Arc::new(InProcessAdapter::new().with_middleware(middleware));
        self
    }

    /// Start `registration` and hand it the parent's activity
    ///
    /// An object `value` on the activity is reduced to the skill's declared parameters.
    pub async fn begin(
        &self,
        state: &mut SkillDialogState,
        registration: &SkillRegistration,
        mut activity: Activity,
    ) -> SkillResult<DialogTurnResult> {
        if state.is_active() {
            return Err(SkillError::Other(format!(
                "Skill dialog is already running '{}'",
                state
                    .active_skill
                    .as_ref()
                    .map(|s| s.name.as_str())
                    .unwrap_or_default()
            )));
        }

        if let Some(Value::Object(values)) = &activity.value {
            activity.value = Some(Value::Object(registration.filter_parameters(values)));
        }

        let bot = self.activate(registration).await?;

        state.status = SkillDialogStatus::Active;
        state.active_skill = Some(registration.clone());
        state.pending_token_request = false;
        debug!(skill = %registration.name, "Skill dialog started");

        match self.pump(state, registration, bot, activity).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(skill = %registration.name, "Skill failed on its first turn: {}", e);
                state.terminate();
                Err(e)
            }
        }
    }

    /// Forward the next parent activity to the active skill
    pub async fn continue_dialog(
        &self,
        state: &mut SkillDialogState,
        activity: Activity,
    ) -> SkillResult<DialogTurnResult> {
        let registration = match (&state.status, &state.active_skill) {
            (SkillDialogStatus::Active, Some(registration)) => registration.clone(),
            _ => return Err(SkillError::Other("No active skill to continue".into())),
        };
        let bot = self.activate(&registration).await?;

        let inbound = if state.pending_token_request {
            match self.request_token(&registration, &activity).await? {
                Some(token_event) => {
                    state.pending_token_request = false;
                    token_event
                }
                None => return Ok(DialogTurnResult::Waiting { replies: Vec::new() }),
            }
        } else {
            activity
        };

        self.pump(state, &registration, bot, inbound).await
    }

    /// Get the cached bot for a skill, constructing it on first use
    async fn activate(&self, registration: &SkillRegistration) -> SkillResult<Arc<dyn Bot>> {
        if let Some(bot) = self.skills.read().await.get(&registration.name) {
            return Ok(bot.clone());
        }

        let mut skills = self.skills.write().await;
        if let Some(bot) = skills.get(&registration.name) {
            return Ok(bot.clone());
        }

        let storage = PartitionedStorage::new(self.storage.clone(), registration.name.clone());
        let activation = SkillActivation::new(registration.clone(), Arc::new(storage));
        let bot = self.factory.activate(&activation)?;
        debug!(skill = %registration.name, "Activated in-process skill");

        skills.insert(registration.name.clone(), bot.clone());
        Ok(bot)
    }

    /// Run `activity` through the skill and drain its replies
    async fn pump(
        &self,
        state: &mut SkillDialogState,
        registration: &SkillRegistration,
        bot: Arc<dyn Bot>,
        activity: Activity,
    ) -> SkillResult<DialogTurnResult> {
        let mut replies = Vec::new();
        let mut next = Some(activity);

        while let Some(inbound) = next.take() {
            let outbound = self
                .adapter
                .process_activity(inbound.clone(), bot.as_ref())
                .await?;

            for reply in outbound {
                if reply.activity_type == ActivityType::EndOfConversation {
                    debug!(skill = %registration.name, "Skill ended the conversation");
                    state.terminate();
                    return Ok(DialogTurnResult::Complete {
                        replies,
                        result: reply.value,
                    });
                }

                if reply.is_event(TOKEN_REQUEST_EVENT) {
                    match self.request_token(registration, &inbound).await? {
                        Some(token_event) => next = Some(token_event),
                        None => state.pending_token_request = true,
                    }
                    continue;
                }

                if reply.is_event(TOKEN_RESPONSE_EVENT) {
                    continue;
                }

                replies.push(reply);
            }
        }

        Ok(DialogTurnResult::Waiting { replies })
    }

    /// Build the `tokens/response` event for a skill, if a token is available
    async fn request_token(
        &self,
        registration: &SkillRegistration,
        trigger: &Activity,
    ) -> SkillResult<Option<Activity>> {
        let Some(provider) = &self.token_provider else {
            warn!(skill = %registration.name, "Skill requested a token but no token provider is configured");
            return Ok(None);
        };
        let Some(connection_name) = registration.auth_connection_name.clone() else {
            warn!(skill = %registration.name, "Skill requested a token but has no auth connection");
            return Ok(None);
        };

        let Some(token) = provider.get_token(connection_name, trigger.clone()).await? else {
            debug!(skill = %registration.name, "No token available yet");
            return Ok(None);
        };

        let mut reference = trigger.conversation_reference();
        reference.activity_id = None;

        let mut event = Activity::event(TOKEN_RESPONSE_EVENT, Some(serde_json::to_value(token)?));
        event.apply_conversation_reference(&reference, true);
        Ok(Some(event))
    }
}

impl std::fmt::Debug for SkillDialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillDialog")
            .field("factory", &self.factory)
            .field("has_token_provider", &self.token_provider.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::{router::storage::MemoryStorage, turn::TurnContext};

    /// Echoes messages and counts its turns in its own storage
    struct Echo {
        storage: Arc<dyn Storage>,
    }

    #[async_trait]
    impl Bot for Echo {
        async fn on_turn(&self, ctx: &TurnContext) -> SkillResult<()> {
            let turns = self
                .storage
                .read("turns")
                .await?
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            self.storage.write("turns", json!(turns + 1)).await?;

            let activity = ctx.activity();
            let mut reply = Activity::message(activity.text.clone().unwrap_or_default());
            reply.value = activity.value.clone();
            ctx.send_activity(reply).await?;
            Ok(())
        }
    }

    /// Says goodbye and ends the conversation with a result
    struct Goodbye;

    #[async_trait]
    impl Bot for Goodbye {
        async fn on_turn(&self, ctx: &TurnContext) -> SkillResult<()> {
            ctx.send_text("bye").await?;
            let mut end = Activity::end_of_conversation();
            end.value = Some(json!({"booked": true}));
            ctx.send_activity(end).await?;
            ctx.send_text("never delivered").await?;
            Ok(())
        }
    }

    /// Fails every turn
    struct Broken;

    #[async_trait]
    impl Bot for Broken {
        async fn on_turn(&self, _ctx: &TurnContext) -> SkillResult<()> {
            Err(SkillError::Other("calendar backend unavailable".into()))
        }
    }

    /// Asks for a token on any message and reports it once received
    struct NeedsToken;

    #[async_trait]
    impl Bot for NeedsToken {
        async fn on_turn(&self, ctx: &TurnContext) -> SkillResult<()> {
            let activity = ctx.activity();
            if activity.is_event(TOKEN_RESPONSE_EVENT) {
                let token = activity
                    .value
                    .as_ref()
                    .and_then(|v| v.get("token"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                ctx.send_text(format!("signed in with {}", token)).await?;
            } else {
                ctx.send_text("one moment").await?;
                ctx.send_activity(Activity::event(TOKEN_REQUEST_EVENT, None))
                    .await?;
            }
            Ok(())
        }
    }

    fn token(value: &str) -> TokenResponse {
        TokenResponse {
            connection_name: "outlook".into(),
            token: value.into(),
            expiration: None,
        }
    }

    fn texts(result: &DialogTurnResult) -> Vec<String> {
        result
            .replies()
            .iter()
            .map(|a| a.text.clone().unwrap_or_default())
            .collect()
    }

    fn factory(activations: Arc<AtomicUsize>) -> Arc<SkillFactory> {
        Arc::new(
            SkillFactory::new()
                .register("echo", move |activation| {
                    activations.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(Echo {
                        storage: activation.storage.clone(),
                    }) as Arc<dyn Bot>)
                })
                .register("goodbye", |_| Ok(Arc::new(Goodbye) as Arc<dyn Bot>))
                .register("broken", |_| Ok(Arc::new(Broken) as Arc<dyn Bot>))
                .register("needs-token", |_| Ok(Arc::new(NeedsToken) as Arc<dyn Bot>)),
        )
    }

    #[tokio::test]
    async fn test_end_of_conversation_terminates() {
        let dialog = SkillDialog::new(factory(Default::default()), Arc::new(MemoryStorage::new()));
        let registration = SkillRegistration::new("booking", "l_Booking", "goodbye");
        let mut state = SkillDialogState::default();

        let result = dialog
            .begin(&mut state, &registration, Activity::message("book it"))
            .await
            .unwrap();

        assert_eq!(texts(&result), vec!["bye"]);
        match result {
            DialogTurnResult::Complete { result, .. } => {
                assert_eq!(result, Some(json!({"booked": true})))
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(state.status, SkillDialogStatus::Terminated);
        assert!(state.active_skill.is_none());

        let err = dialog
            .continue_dialog(&mut state, Activity::message("again"))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_skill_is_activated_once_and_state_is_partitioned() {
        let activations = Arc::new(AtomicUsize::new(0));
        let storage = Arc::new(MemoryStorage::new());
        let dialog = SkillDialog::new(factory(activations.clone()), storage.clone());
        let registration = SkillRegistration::new("echo", "l_Echo", "echo");
        let mut state = SkillDialogState::default();

        let first = dialog
            .begin(&mut state, &registration, Activity::message("one"))
            .await
            .unwrap();
        let second = dialog
            .continue_dialog(&mut state, Activity::message("two"))
            .await
            .unwrap();

        assert!(!first.is_complete());
        assert_eq!(texts(&second), vec!["two"]);
        assert!(state.is_active());
        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert_eq!(storage.read("echo/turns").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_begin_passes_only_declared_parameters() {
        let dialog = SkillDialog::new(factory(Default::default()), Arc::new(MemoryStorage::new()));
        let registration =
            SkillRegistration::new("echo", "l_Echo", "echo").with_parameter("timezone");
        let mut state = SkillDialogState::default();

        let mut activity = Activity::message("hi");
        activity.value = Some(json!({"timezone": "UTC", "password": "secret"}));
        let result = dialog.begin(&mut state, &registration, activity).await.unwrap();

        assert_eq!(result.replies()[0].value, Some(json!({"timezone": "UTC"})));
    }

    #[tokio::test]
    async fn test_begin_twice_fails() {
        let dialog = SkillDialog::new(factory(Default::default()), Arc::new(MemoryStorage::new()));
        let registration = SkillRegistration::new("echo", "l_Echo", "echo");
        let mut state = SkillDialogState::default();

        dialog
            .begin(&mut state, &registration, Activity::message("one"))
            .await
            .unwrap();
        assert!(dialog
            .begin(&mut state, &registration, Activity::message("two"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_first_turn_leaves_dialog_restartable() {
        let dialog = SkillDialog::new(factory(Default::default()), Arc::new(MemoryStorage::new()));
        let registration = SkillRegistration::new("broken", "l_Broken", "broken");
        let mut state = SkillDialogState::default();

        let first = dialog
            .begin(&mut state, &registration, Activity::message("hi"))
            .await;
        assert!(first.is_err());
        assert!(!state.is_active());
        assert!(state.active_skill.is_none());

        assert!(dialog
            .continue_dialog(&mut state, Activity::message("still there?"))
            .await
            .is_err());

        // A second attempt runs the skill again rather than reporting it as running
        let retry = dialog
            .begin(&mut state, &registration, Activity::message("hi again"))
            .await;
        match retry {
            Err(SkillError::Other(message)) => {
                assert_eq!(message, "calendar backend unavailable")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_skill_type_is_fatal() {
        let dialog = SkillDialog::new(factory(Default::default()), Arc::new(MemoryStorage::new()));
        let registration = SkillRegistration::new("ghost", "l_Ghost", "missing");
        let mut state = SkillDialogState::default();

        let result = dialog
            .begin(&mut state, &registration, Activity::message("hi"))
            .await;

        assert!(matches!(result, Err(SkillError::SkillActivation { .. })));
        assert_eq!(state.status, SkillDialogStatus::Uninitialized);
    }

    #[tokio::test]
    async fn test_token_request_is_answered_locally() {
        let mut provider = MockTokenProvider::new();
        provider
            .expect_get_token()
            .withf(|connection, _| connection == "outlook")
            .times(1)
            .returning(|_, _| Ok(Some(token("abc"))));

        let dialog = SkillDialog::new(factory(Default::default()), Arc::new(MemoryStorage::new()))
            .with_token_provider(Arc::new(provider));
        let registration = SkillRegistration::new("mail", "l_Mail", "needs-token")
            .with_auth_connection("outlook");
        let mut state = SkillDialogState::default();

        let result = dialog
            .begin(&mut state, &registration, Activity::message("read my mail"))
            .await
            .unwrap();

        assert_eq!(texts(&result), vec!["one moment", "signed in with abc"]);
        assert!(result
            .replies()
            .iter()
            .all(|a| a.activity_type == ActivityType::Message));
        assert!(!state.pending_token_request);
    }

    #[tokio::test]
    async fn test_missing_token_waits_for_next_turn() {
        let mut provider = MockTokenProvider::new();
        let mut calls = 0;
        provider.expect_get_token().times(2).returning(move |_, _| {
            calls += 1;
            Ok(if calls == 1 { None } else { Some(token("xyz")) })
        });

        let dialog = SkillDialog::new(factory(Default::default()), Arc::new(MemoryStorage::new()))
            .with_token_provider(Arc::new(provider));
        let registration = SkillRegistration::new("mail", "l_Mail", "needs-token")
            .with_auth_connection("outlook");
        let mut state = SkillDialogState::default();

        let first = dialog
            .begin(&mut state, &registration, Activity::message("read my mail"))
            .await
            .unwrap();
        assert_eq!(texts(&first), vec!["one moment"]);
        assert!(state.pending_token_request);

        let second = dialog
            .continue_dialog(&mut state, Activity::message("123456"))
            .await
            .unwrap();
        assert_eq!(texts(&second), vec!["signed in with xyz"]);
        assert!(!state.pending_token_request);
    }
}

//! Turn context and the bot/adapter contracts a transport plugs into

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::protocol::{
    activity::{Activity, ActivityType, ConversationReference, InvokeResponse, ResourceResponse},
    error::SkillResult,
};

/// Dialog logic run once per turn
#[async_trait]
pub trait Bot: Send + Sync {
    async fn on_turn(&self, ctx: &TurnContext) -> SkillResult<()>;
}

#[async_trait]
impl<B: Bot + ?Sized> Bot for Arc<B> {
    async fn on_turn(&self, ctx: &TurnContext) -> SkillResult<()> {
        (**self).on_turn(ctx).await
    }
}

/// Capabilities a transport offers to the bot during a turn
#[async_trait]
pub trait BotAdapter: Send + Sync {
    /// Deliver activities in order, returning one acknowledgement per activity
    async fn send_activities(
        &self,
        ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> SkillResult<Vec<ResourceResponse>>;

    /// Replace a previously sent activity
    async fn update_activity(
        &self,
        ctx: &TurnContext,
        activity: Activity,
    ) -> SkillResult<ResourceResponse>;

    /// Delete the activity identified by `reference.activity_id`
    async fn delete_activity(
        &self,
        ctx: &TurnContext,
        reference: ConversationReference,
    ) -> SkillResult<()>;

    /// Run a proactive turn for a stored conversation
    async fn continue_conversation(
        &self,
        reference: ConversationReference,
        bot: &dyn Bot,
    ) -> SkillResult<()>;
}

/// Per-turn state shared between the bot and the adapter
pub struct TurnContext {
    activity: Activity,
    adapter: Arc<dyn BotAdapter>,
    responded: AtomicBool,
    /// Replies held back by adapters that answer the whole turn at once
    buffered_replies: Mutex<Vec<Activity>>,
    invoke_response: Mutex<Option<InvokeResponse>>,
}

impl TurnContext {
    pub fn new(adapter: Arc<dyn BotAdapter>, activity: Activity) -> Self {
        Self {
            activity,
            adapter,
            responded: AtomicBool::new(false),
            buffered_replies: Mutex::new(Vec::new()),
            invoke_response: Mutex::new(None),
        }
    }

    /// The inbound activity of this turn
    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn adapter(&self) -> &Arc<dyn BotAdapter> {
        &self.adapter
    }

    /// Whether anything other than a trace has been sent this turn
    pub fn responded(&self) -> bool {
        self.responded.load(Ordering::SeqCst)
    }

    /// Send one activity
    pub async fn send_activity(&self, activity: Activity) -> SkillResult<ResourceResponse> {
        let mut responses = self.send_activities(vec![activity]).await?;
        Ok(responses.pop().unwrap_or_default())
    }

    /// Send a message with the given text
    pub async fn send_text(&self, text: impl Into<String>) -> SkillResult<ResourceResponse> {
        self.send_activity(Activity::message(text)).await
    }

    /// Send activities in order, addressed as replies to the inbound activity
    pub async fn send_activities(
        &self,
        activities: Vec<Activity>,
    ) -> SkillResult<Vec<ResourceResponse>> {
        let reference = self.activity.conversation_reference();
        let outgoing: Vec<Activity> = activities
            .into_iter()
            .map(|mut activity| {
                activity.apply_conversation_reference(&reference, false);
                activity
            })
            .collect();

        if outgoing
            .iter()
            .any(|a| a.activity_type != ActivityType::Trace)
        {
            self.responded.store(true, Ordering::SeqCst);
        }

        self.adapter.send_activities(self, outgoing).await
    }

    /// Send a trace activity
    pub async fn send_trace_activity(
        &self,
        name: impl Into<String>,
        value: Option<Value>,
    ) -> SkillResult<ResourceResponse> {
        self.send_activity(Activity::trace(name, value)).await
    }

    /// Replace a previously sent activity
    pub async fn update_activity(&self, mut activity: Activity) -> SkillResult<ResourceResponse> {
        let id = activity.id.clone();
        activity.apply_conversation_reference(&self.activity.conversation_reference(), false);
        activity.id = id;
        self.adapter.update_activity(self, activity).await
    }

    /// Delete a previously sent activity
    pub async fn delete_activity(&self, activity_id: impl Into<String>) -> SkillResult<()> {
        let mut reference = self.activity.conversation_reference();
        reference.activity_id = Some(activity_id.into());
        self.adapter.delete_activity(self, reference).await
    }

    pub(crate) async fn buffer_reply(&self, activity: Activity) {
        self.buffered_replies.lock().await.push(activity);
    }

    pub(crate) async fn take_buffered_replies(&self) -> Vec<Activity> {
        std::mem::take(&mut *self.buffered_replies.lock().await)
    }

    pub(crate) async fn with_buffered_replies<R>(&self, f: impl FnOnce(&mut Vec<Activity>) -> R) -> R {
        f(&mut *self.buffered_replies.lock().await)
    }

    pub(crate) async fn set_invoke_response(&self, response: InvokeResponse) {
        *self.invoke_response.lock().await = Some(response);
    }

    pub(crate) async fn take_invoke_response(&self) -> Option<InvokeResponse> {
        self.invoke_response.lock().await.take()
    }
}

impl std::fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnContext")
            .field("activity", &self.activity)
            .field("responded", &self.responded())
            .finish()
    }
}

/// Read the invoke response a bot attached to an `invokeResponse` activity
pub(crate) fn invoke_response_of(activity: &Activity) -> InvokeResponse {
    activity
        .value
        .clone()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_else(InvokeResponse::ok)
}

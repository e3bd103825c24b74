//! In-memory adapter for skills hosted inside the parent process

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    middleware::MiddlewareSet,
    protocol::{
        activity::{Activity, ActivityType, ConversationReference, ResourceResponse},
        error::{SkillError, SkillResult},
    },
    turn::{Bot, BotAdapter, TurnContext},
};

/// Adapter that runs a skill's bot directly and hands back everything it sent
///
/// Unlike the network adapters nothing is filtered: control activities such as
/// `endOfConversation` or `tokens/request` are returned to the caller to act on.
#[derive(Debug, Default)]
pub struct InProcessAdapter {
    middleware: MiddlewareSet,
}

impl InProcessAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_middleware(mut self, middleware: MiddlewareSet) -> Self {
        self.middleware = middleware;
        self
    }

    /// Run one turn and return the bot's replies in send order
    pub async fn process_activity(
        self: &Arc<Self>,
        mut activity: Activity,
        bot: &dyn Bot,
    ) -> SkillResult<Vec<Activity>> {
        activity.ensure_id();

        let adapter: Arc<dyn BotAdapter> = self.clone();
        let ctx = TurnContext::new(adapter, activity);
        self.middleware.run(&ctx, bot).await?;

        Ok(ctx.take_buffered_replies().await)
    }

    /// Run a proactive turn for `reference` and return what the bot sent during it
    pub async fn continue_conversation_with_replies(
        &self,
        reference: ConversationReference,
        bot: &dyn Bot,
    ) -> SkillResult<Vec<Activity>> {
        let adapter = Arc::new(Self {
            middleware: self.middleware.clone(),
        });
        let ctx = TurnContext::new(adapter, reference.continuation_activity());
        self.middleware.run(&ctx, bot).await?;

        Ok(ctx.take_buffered_replies().await)
    }
}

#[async_trait]
impl BotAdapter for InProcessAdapter {
    async fn send_activities(
        &self,
        ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> SkillResult<Vec<ResourceResponse>> {
        let mut responses = Vec::with_capacity(activities.len());

        for mut activity in activities {
            if activity.activity_type == ActivityType::Delay {
                tokio::time::sleep(activity.delay_duration()).await;
                responses.push(ResourceResponse::default());
                continue;
            }

            let id = activity.ensure_id();
            ctx.buffer_reply(activity).await;
            responses.push(ResourceResponse::new(id));
        }

        Ok(responses)
    }

    async fn update_activity(
        &self,
        ctx: &TurnContext,
        activity: Activity,
    ) -> SkillResult<ResourceResponse> {
        let id = activity.id.clone().unwrap_or_default();

        ctx.with_buffered_replies(|replies| {
            let slot = replies
                .iter_mut()
                .find(|reply| reply.id.as_deref() == Some(id.as_str()))
                .ok_or_else(|| SkillError::Other(format!("No activity with id '{}' to update", id)))?;
            *slot = activity;
            Ok(ResourceResponse::new(id.clone()))
        })
        .await
    }

    async fn delete_activity(
        &self,
        ctx: &TurnContext,
        reference: ConversationReference,
    ) -> SkillResult<()> {
        let id = reference.activity_id.unwrap_or_default();

        ctx.with_buffered_replies(|replies| {
            let before = replies.len();
            replies.retain(|reply| reply.id.as_deref() != Some(id.as_str()));
            if replies.len() == before {
                Err(SkillError::Other(format!("No activity with id '{}' to delete", id)))
            } else {
                Ok(())
            }
        })
        .await
    }

    async fn continue_conversation(
        &self,
        reference: ConversationReference,
        bot: &dyn Bot,
    ) -> SkillResult<()> {
        let replies = self.continue_conversation_with_replies(reference, bot).await?;
        debug!(count = replies.len(), "Proactive turn finished");
        Ok(())
    }
}

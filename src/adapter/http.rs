//! Bot adapter for the HTTP binding
//!
//! HTTP is strictly one request, one response: everything the bot sends during the
//! turn is queued and returned as a single body once the turn completes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    adapter::is_deliverable,
    middleware::MiddlewareSet,
    protocol::{
        activity::{Activity, ActivityType, ConversationReference, ResourceResponse},
        error::{SkillError, SkillResult},
    },
    telemetry::{self, BotTelemetryClient, TracingTelemetryClient},
    turn::{invoke_response_of, Bot, BotAdapter, TurnContext},
};

/// Outcome of one HTTP turn
#[derive(Debug, Clone, PartialEq)]
pub struct HttpTurnResult {
    /// Status for the HTTP response
    pub status: u16,

    /// Activities the bot sent, in the order it sent them
    pub activities: Vec<Activity>,
}

/// Adapter that queues outbound activities for the HTTP response
pub struct SkillHttpBotAdapter {
    middleware: MiddlewareSet,
    telemetry: Arc<dyn BotTelemetryClient>,
}

impl SkillHttpBotAdapter {
    pub fn new() -> Self {
        Self {
            middleware: MiddlewareSet::new(),
            telemetry: Arc::new(TracingTelemetryClient),
        }
    }

    /// Use a custom middleware pipeline
    pub fn with_middleware(mut self, middleware: MiddlewareSet) -> Self {
        self.middleware = middleware;
        self
    }

    /// Use a custom telemetry client
    pub fn with_telemetry(mut self, telemetry: Arc<dyn BotTelemetryClient>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Run one turn and collect everything the bot sent
    ///
    /// The status is taken from the invoke response the bot attached, if any, and is
    /// 200 otherwise.
    pub async fn process_activity(
        self: &Arc<Self>,
        mut activity: Activity,
        bot: &dyn Bot,
    ) -> SkillResult<HttpTurnResult> {
        let activity_id = activity.ensure_id();
        self.telemetry.track_event(
            telemetry::INCOMING_ACTIVITY_EVENT,
            telemetry::properties([
                ("activityId", Some(activity_id.as_str())),
                ("activityType", Some(activity.activity_type.as_str())),
                ("channelId", activity.channel_id.as_deref()),
            ]),
            Default::default(),
        );

        let adapter: Arc<dyn BotAdapter> = self.clone();
        let ctx = TurnContext::new(adapter, activity);
        self.middleware.run(&ctx, bot).await?;

        let status = ctx
            .take_invoke_response()
            .await
            .map(|response| response.status)
            .unwrap_or(200);
        let activities = ctx.take_buffered_replies().await;

        self.telemetry.track_event(
            telemetry::OUTGOING_ACTIVITIES_BATCHED_EVENT,
            telemetry::properties([("activityId", Some(activity_id.as_str()))]),
            [("count".to_string(), activities.len() as f64)].into(),
        );

        Ok(HttpTurnResult { status, activities })
    }
}

impl Default for SkillHttpBotAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BotAdapter for SkillHttpBotAdapter {
    async fn send_activities(
        &self,
        ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> SkillResult<Vec<ResourceResponse>> {
        let mut responses = Vec::with_capacity(activities.len());

        for mut activity in activities {
            match activity.activity_type {
                ActivityType::Delay => {
                    tokio::time::sleep(activity.delay_duration()).await;
                    responses.push(ResourceResponse::default());
                }
                ActivityType::InvokeResponse => {
                    ctx.set_invoke_response(invoke_response_of(&activity)).await;
                    responses.push(ResourceResponse::default());
                }
                _ => {
                    let id = activity.ensure_id();
                    if is_deliverable(&activity) {
                        ctx.buffer_reply(activity).await;
                    } else {
                        debug!(activity_id = %id, activity_type = %activity.activity_type, "Dropping undeliverable activity");
                    }
                    responses.push(ResourceResponse::new(id));
                }
            }
        }

        Ok(responses)
    }

    async fn update_activity(
        &self,
        _ctx: &TurnContext,
        _activity: Activity,
    ) -> SkillResult<ResourceResponse> {
        Err(SkillError::UnsupportedOperation(
            "updateActivity is not supported over HTTP".into(),
        ))
    }

    async fn delete_activity(
        &self,
        _ctx: &TurnContext,
        _reference: ConversationReference,
    ) -> SkillResult<()> {
        Err(SkillError::UnsupportedOperation(
            "deleteActivity is not supported over HTTP".into(),
        ))
    }

    async fn continue_conversation(
        &self,
        _reference: ConversationReference,
        _bot: &dyn Bot,
    ) -> SkillResult<()> {
        Err(SkillError::UnsupportedOperation(
            "continueConversation is not supported over HTTP".into(),
        ))
    }
}

//! Bot adapter for the WebSocket binding
//!
//! Every outbound send becomes its own framed request on the connection and is awaited
//! before the next one goes out, so wire order equals send order.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    adapter::is_deliverable,
    codec::streaming::{StreamingRequest, StreamingResponse},
    middleware::MiddlewareSet,
    protocol::{
        activity::{
            Activity, ActivityType, ConversationReference, InvokeResponse, ResourceResponse,
        },
        error::{SkillError, SkillResult},
    },
    telemetry::{self, BotTelemetryClient, TracingTelemetryClient},
    transport::websocket::StreamingSender,
    turn::{Bot, BotAdapter, TurnContext},
};

/// Adapter forwarding each outbound activity over a streaming connection
pub struct SkillWebSocketBotAdapter {
    sender: Arc<dyn StreamingSender>,
    middleware: MiddlewareSet,
    telemetry: Arc<dyn BotTelemetryClient>,
}

impl SkillWebSocketBotAdapter {
    pub fn new(sender: Arc<dyn StreamingSender>) -> Self {
        Self {
            sender,
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

    /// Run one inbound activity through the pipeline and the bot
    ///
    /// Invoke activities are not supported over this transport and are answered with
    /// 501 without reaching the bot.
    pub async fn process_activity(
        self: &Arc<Self>,
        mut activity: Activity,
        bot: &dyn Bot,
    ) -> SkillResult<InvokeResponse> {
        if activity.activity_type == ActivityType::Invoke {
            warn!(name = ?activity.name, "Invoke activities are not supported over WebSocket");
            return Ok(InvokeResponse::not_implemented());
        }

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

        Ok(InvokeResponse::ok())
    }

    /// Send activities in order, aborting between sends once `cancel` fires
    pub async fn send_activities_with_cancel(
        &self,
        activities: Vec<Activity>,
        cancel: CancellationToken,
    ) -> SkillResult<Vec<ResourceResponse>> {
        let mut responses = Vec::with_capacity(activities.len());

        for mut activity in activities {
            if cancel.is_cancelled() {
                return Err(SkillError::Cancelled);
            }

            match activity.activity_type {
                ActivityType::Delay => {
                    tokio::select! {
                        _ = tokio::time::sleep(activity.delay_duration()) => {}
                        _ = cancel.cancelled() => return Err(SkillError::Cancelled),
                    }
                    responses.push(ResourceResponse::default());
                }
                ActivityType::InvokeResponse => {
                    debug!("Ignoring invoke response on WebSocket transport");
                    responses.push(ResourceResponse::default());
                }
                _ => {
                    let id = activity.ensure_id();
                    if !is_deliverable(&activity) {
                        debug!(activity_id = %id, activity_type = %activity.activity_type, "Dropping undeliverable activity");
                        responses.push(ResourceResponse::new(id));
                        continue;
                    }

                    let body = serde_json::to_string(&activity)?;
                    let request = StreamingRequest::post(format!("/activities/{}", id), body);
                    let response = self.round_trip(request, &id, cancel.clone()).await?;
                    responses.push(resource_response_or(response, &id));
                }
            }
        }

        Ok(responses)
    }

    /// Send one request and time it; transport failures come back as `None`
    async fn round_trip(
        &self,
        request: StreamingRequest,
        activity_id: &str,
        cancel: CancellationToken,
    ) -> SkillResult<Option<StreamingResponse>> {
        let verb = request.verb.clone();
        let started = Instant::now();
        let result = self.sender.send_request(request, cancel).await;

        self.telemetry.track_event(
            telemetry::WEBSOCKET_SEND_ACTIVITY_EVENT,
            telemetry::properties([
                ("activityId", Some(activity_id)),
                ("verb", Some(verb.as_str())),
            ]),
            telemetry::latency(started.elapsed()),
        );

        match result {
            Ok(response) => Ok(Some(response)),
            Err(SkillError::Cancelled) => Err(SkillError::Cancelled),
            Err(e) => {
                warn!(activity_id, "WebSocket round trip failed: {}", e);
                Ok(None)
            }
        }
    }
}

/// Read the acknowledgement from a response, falling back to the activity id
fn resource_response_or(response: Option<StreamingResponse>, id: &str) -> ResourceResponse {
    let parsed = response.and_then(|response| {
        if !response.is_success() {
            warn!(
                activity_id = id,
                status = response.status_code,
                "Peer rejected activity"
            );
            return None;
        }
        serde_json::from_str::<ResourceResponse>(&response.read_body_as_string()).ok()
    });

    match parsed {
        Some(resource) if !resource.id.is_empty() => resource,
        _ => ResourceResponse::new(id),
    }
}

#[async_trait]
impl BotAdapter for SkillWebSocketBotAdapter {
    async fn send_activities(
        &self,
        _ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> SkillResult<Vec<ResourceResponse>> {
        self.send_activities_with_cancel(activities, CancellationToken::new())
            .await
    }

    async fn update_activity(
        &self,
        _ctx: &TurnContext,
        activity: Activity,
    ) -> SkillResult<ResourceResponse> {
        let id = activity
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SkillError::MalformedRequest("Cannot update an activity without an id".into()))?;

        let body = serde_json::to_string(&activity)?;
        let request = StreamingRequest::put(format!("/activities/{}", id), body);
        let response = self.round_trip(request, &id, CancellationToken::new()).await?;
        Ok(resource_response_or(response, &id))
    }

    async fn delete_activity(
        &self,
        _ctx: &TurnContext,
        reference: ConversationReference,
    ) -> SkillResult<()> {
        let id = reference
            .activity_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SkillError::MalformedRequest("Cannot delete an activity without an id".into()))?;

        let request = StreamingRequest::delete(format!("/activities/{}", id));
        self.round_trip(request, &id, CancellationToken::new()).await?;
        Ok(())
    }

    async fn continue_conversation(
        &self,
        reference: ConversationReference,
        bot: &dyn Bot,
    ) -> SkillResult<()> {
        let adapter = Arc::new(Self {
            sender: self.sender.clone(),
            middleware: self.middleware.clone(),
            telemetry: self.telemetry.clone(),
        });
        let ctx = TurnContext::new(adapter, reference.continuation_activity());
        self.middleware.run(&ctx, bot).await
    }
}

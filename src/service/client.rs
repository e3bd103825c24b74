//! Parent side of the HTTP binding: forwarding activities to a remote skill

use std::{collections::HashSet, future::poll_fn, sync::Arc, time::Instant};

use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::{
    codec::{Codec, JsonCodec},
    config::SkillClientConfig,
    protocol::{
        activity::Activity,
        error::{SkillError, SkillResult},
        skill::SkillManifest,
    },
    telemetry::{self, BotTelemetryClient, TracingTelemetryClient},
    transport::{http::HttpTransport, Transport, TransportRequest},
    turn::TurnContext,
};

/// Name of the trace sent to the parent conversation when a skill rejects an activity
pub const FORWARD_ERROR_TRACE: &str = "SkillHttpForwardError";

/// Client a parent bot uses to hand activities to skills over HTTP
///
/// # Example
///
/// ```rust,no_run
/// use tower_skill::prelude::*;
///
/// # async fn example(ctx: &TurnContext, manifest: &SkillManifest) -> Result<(), SkillError> {
/// let config = SkillClientConfig::new("parent-app-id")
///     .with_credentials(AuthCredentials::bearer("token"));
/// let client = SkillHttpClient::http(config)?;
///
/// let replies = client
///     .forward_activity(ctx, manifest, ctx.activity().clone())
///     .await?;
/// for reply in replies {
///     ctx.send_activity(reply).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct SkillHttpClient<T> {
    transport: T,
    codec: Arc<dyn Codec>,
    config: SkillClientConfig,
    /// Service URLs skills are allowed to call back on
    trusted: Arc<RwLock<HashSet<String>>>,
    telemetry: Arc<dyn BotTelemetryClient>,
}

impl SkillHttpClient<HttpTransport> {
    /// Create a client over reqwest honouring the configured timeout
    pub fn http(config: SkillClientConfig) -> SkillResult<Self> {
        let transport = HttpTransport::with_timeout(config.timeout)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> SkillHttpClient<T> {
    pub fn new(transport: T, config: SkillClientConfig) -> Self {
        Self {
            transport,
            codec: Arc::new(JsonCodec),
            config,
            trusted: Arc::new(RwLock::new(HashSet::new())),
            telemetry: Arc::new(TracingTelemetryClient),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn BotTelemetryClient>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &SkillClientConfig {
        &self.config
    }

    /// Whether `url` has been registered as a trusted service URL
    pub async fn is_trusted(&self, url: &Url) -> bool {
        self.trusted.read().await.contains(url.as_str())
    }

    /// POST `activity` to the skill and return the activities it answered with
    ///
    /// The skill's service URL is trusted before the call. A non-2xx answer is reported
    /// to the conversation as a trace activity and returned as
    /// [`SkillError::DownstreamTransport`]. Nothing is retried.
    pub async fn forward_activity(
        &self,
        ctx: &TurnContext,
        manifest: &SkillManifest,
        mut activity: Activity,
    ) -> SkillResult<Vec<Activity>> {
        self.trust_service_url(manifest, &activity).await;

        let activity_id = activity.ensure_id();
        let body = self.codec.encode_activity(&activity)?;

        let mut request = TransportRequest::new(manifest.endpoint.clone(), "POST")
            .header("Content-Type", self.codec.content_type())
            .body(body);
        if let Some(credentials) = &self.config.credentials {
            let (name, value) = credentials.to_header();
            request = request.header(name, value);
        }

        let mut transport = self.transport.clone();
        poll_fn(|cx| transport.poll_ready(cx)).await?;

        debug!(skill = %manifest.id, endpoint = %manifest.endpoint, "Forwarding activity to skill");
        let started = Instant::now();
        let response = transport.execute(request).await?;

        let status = response.status.to_string();
        self.telemetry.track_event(
            telemetry::HTTP_FORWARD_EVENT,
            telemetry::properties([
                ("skillId", Some(manifest.id.as_str())),
                ("activityId", Some(activity_id.as_str())),
                ("statusCode", Some(status.as_str())),
            ]),
            telemetry::latency(started.elapsed()),
        );

        if !response.is_success() {
            let message = response.body_text();
            warn!(skill = %manifest.id, status = response.status, "Skill rejected forwarded activity");

            let detail = json!({
                "skillId": manifest.id,
                "statusCode": response.status,
                "body": message,
            });
            if let Err(e) = ctx.send_trace_activity(FORWARD_ERROR_TRACE, Some(detail)).await {
                warn!("Failed to report forwarding error: {}", e);
            }

            return Err(SkillError::DownstreamTransport {
                status: response.status,
                message,
            });
        }

        self.codec.decode_activities(&response.body)
    }

    async fn trust_service_url(&self, manifest: &SkillManifest, activity: &Activity) {
        let service_url = manifest.service_url.clone().or_else(|| {
            activity
                .service_url
                .as_deref()
                .and_then(|url| Url::parse(url).ok())
        });

        if let Some(url) = service_url {
            self.trusted.write().await.insert(url.to_string());
        }
    }
}

impl<T> std::fmt::Debug for SkillHttpClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillHttpClient")
            .field("config", &self.config)
            .finish()
    }
}

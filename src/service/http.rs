//! Server side of the HTTP binding
//!
//! A skill receives one activity per POST and answers with every activity its bot
//! produced during the turn, as a single JSON array.

use std::{
    convert::Infallible,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use hyper::{header::CONTENT_TYPE, Request, Response};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, error};

use crate::{
    adapter::http::SkillHttpBotAdapter,
    codec::{Codec, JsonCodec},
    layer::auth::{AuthGate, AuthLayer, AuthService, Authenticator},
    protocol::error::{SkillError, SkillResult},
    turn::Bot,
};

/// Entry point for activities POSTed to a skill
pub struct SkillHttpAdapter {
    auth: AuthGate,
    bot_adapter: Arc<SkillHttpBotAdapter>,
    codec: Arc<dyn Codec>,
}

impl SkillHttpAdapter {
    /// Create an adapter that accepts every request
    pub fn new(bot_adapter: SkillHttpBotAdapter) -> Self {
        Self {
            auth: AuthGate::open(),
            bot_adapter: Arc::new(bot_adapter),
            codec: Arc::new(JsonCodec),
        }
    }

    /// Require requests to pass `authenticator`
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.auth = AuthGate::new(authenticator);
        self
    }

    /// Use a custom codec
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Handle one POSTed activity
    ///
    /// Unauthenticated requests get 401 with an empty body and never reach `bot`.
    /// A body that does not decode into an activity is returned as `Err`; turning that
    /// into a status is the caller's job (see [`SkillHttpService`]).
    pub async fn forward(
        &self,
        request: Request<Bytes>,
        bot: Arc<dyn Bot>,
    ) -> SkillResult<Response<Bytes>> {
        self.stack(bot).oneshot(request).await
    }

    /// Wrap this adapter and `bot` as a Tower service suitable for a hyper server
    pub fn into_service(self, bot: Arc<dyn Bot>) -> SkillHttpService {
        SkillHttpService {
            inner: self.stack(bot),
        }
    }

    fn stack(&self, bot: Arc<dyn Bot>) -> AuthService<ForwardService> {
        AuthLayer::new(self.auth.clone()).layer(ForwardService {
            bot_adapter: self.bot_adapter.clone(),
            codec: self.codec.clone(),
            bot,
        })
    }
}

/// Decodes the activity, runs the turn and encodes the queued replies
#[derive(Clone)]
pub struct ForwardService {
    bot_adapter: Arc<SkillHttpBotAdapter>,
    codec: Arc<dyn Codec>,
    bot: Arc<dyn Bot>,
}

impl Service<Request<Bytes>> for ForwardService {
    type Response = Response<Bytes>;
    type Error = SkillError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Bytes>) -> Self::Future {
        let bot_adapter = self.bot_adapter.clone();
        let codec = self.codec.clone();
        let bot = self.bot.clone();

        Box::pin(async move {
            let activity = codec.decode_activity(req.body())?;
            debug!(activity_type = %activity.activity_type, "Received skill activity over HTTP");

            let result = bot_adapter.process_activity(activity, bot.as_ref()).await?;
            let body = codec.encode_activities(&result.activities)?;

            Response::builder()
                .status(result.status)
                .header(CONTENT_TYPE, codec.content_type())
                .body(body)
                .map_err(|e| SkillError::Other(format!("Failed to build response: {}", e)))
        })
    }
}

/// Tower service answering every request, mapping failures to status codes
#[derive(Clone)]
pub struct SkillHttpService {
    inner: AuthService<ForwardService>,
}

impl Service<Request<Bytes>> for SkillHttpService {
    type Response = Response<Bytes>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Bytes>) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            match inner.oneshot(req).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    error!("Skill HTTP request failed: {}", e);
                    let mut response = Response::new(Bytes::new());
                    *response.status_mut() = hyper::StatusCode::from_u16(e.status_code())
                        .unwrap_or(hyper::StatusCode::INTERNAL_SERVER_ERROR);
                    Ok(response)
                }
            }
        })
    }
}

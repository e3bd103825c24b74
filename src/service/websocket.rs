//! Server side of the WebSocket binding
//!
//! The parent opens one long-lived socket per conversation. Each inbound request
//! carries one activity; the skill's replies travel back as requests of their own on
//! the same socket.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        protocol::{frame::coding::CloseCode, CloseFrame},
    },
    WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::{
    adapter::websocket::SkillWebSocketBotAdapter,
    codec::{
        streaming::{StreamingRequest, StreamingResponse},
        Codec, JsonCodec,
    },
    layer::auth::{AuthGate, Authenticator},
    middleware::MiddlewareSet,
    protocol::error::SkillResult,
    telemetry::{self, BotTelemetryClient, TracingTelemetryClient},
    transport::websocket::{RequestHandler, StreamingConnection},
    turn::Bot,
};

/// Answers activity requests arriving on a skill's socket
pub struct SkillWebSocketRequestHandler {
    adapter: Arc<SkillWebSocketBotAdapter>,
    bot: Arc<dyn Bot>,
    codec: Arc<dyn Codec>,
    telemetry: Arc<dyn BotTelemetryClient>,
}

impl SkillWebSocketRequestHandler {
    pub fn new(adapter: Arc<SkillWebSocketBotAdapter>, bot: Arc<dyn Bot>) -> Self {
        Self {
            adapter,
            bot,
            codec: Arc::new(JsonCodec),
            telemetry: Arc::new(TracingTelemetryClient),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn BotTelemetryClient>) -> Self {
        self.telemetry = telemetry;
        self
    }

    async fn handle(&self, request: &StreamingRequest) -> StreamingResponse {
        if request.streams.is_empty() {
            warn!(path = %request.path, "Rejecting request without a body");
            return StreamingResponse::new(400);
        }

        if let Some(stream) = request.streams.iter().find(|s| !s.is_json()) {
            warn!(content_type = ?stream.content_type, "Rejecting request with unsupported content type");
            return StreamingResponse::new(406);
        }

        let body = request.read_body_as_string();
        if body.trim().is_empty() {
            warn!(path = %request.path, "Rejecting request with an empty body");
            return StreamingResponse::new(400);
        }

        let activity = match self.codec.decode_activity(body.as_bytes()) {
            Ok(activity) => activity,
            Err(e) => {
                error!("Failed to decode activity: {}", e);
                return StreamingResponse::new(500);
            }
        };

        match self.adapter.process_activity(activity, self.bot.as_ref()).await {
            Ok(invoke) => {
                let response = StreamingResponse::new(invoke.status);
                match invoke.body {
                    Some(body) => response.with_json_body(&body),
                    None => response,
                }
            }
            Err(e) => {
                error!("Skill turn failed: {}", e);
                StreamingResponse::new(500)
            }
        }
    }
}

#[async_trait]
impl RequestHandler for SkillWebSocketRequestHandler {
    async fn process_request(&self, request: StreamingRequest) -> StreamingResponse {
        let started = Instant::now();
        let response = self.handle(&request).await;

        let status = response.status_code.to_string();
        self.telemetry.track_event(
            telemetry::WEBSOCKET_PROCESS_REQUEST_EVENT,
            telemetry::properties([
                ("requestId", Some(request.request_id.as_str())),
                ("path", Some(request.path.as_str())),
                ("statusCode", Some(status.as_str())),
            ]),
            telemetry::latency(started.elapsed()),
        );

        response
    }
}

/// Accepts parent connections and binds each one to a bot
pub struct SkillWebSocketAdapter {
    auth: AuthGate,
    middleware: MiddlewareSet,
    telemetry: Arc<dyn BotTelemetryClient>,
}

impl SkillWebSocketAdapter {
    /// Create an adapter that accepts every connection
    pub fn new() -> Self {
        Self {
            auth: AuthGate::open(),
            middleware: MiddlewareSet::new(),
            telemetry: Arc::new(TracingTelemetryClient),
        }
    }

    /// Require the upgrade request to pass `authenticator`
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.auth = AuthGate::new(authenticator);
        self
    }

    pub fn with_middleware(mut self, middleware: MiddlewareSet) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn BotTelemetryClient>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Perform the server handshake on `stream` and start serving `bot`
    ///
    /// The Authorization header of the upgrade request is checked once. A rejected
    /// connection is closed with a policy-violation frame.
    pub async fn accept<S>(&self, stream: S, bot: Arc<dyn Bot>) -> SkillResult<StreamingConnection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut auth_header: Option<String> = None;
        let mut ws = accept_hdr_async(stream, |request: &Request, response: Response| {
            auth_header = request
                .headers()
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            Ok::<_, ErrorResponse>(response)
        })
        .await?;

        if let Err(e) = self.auth.check(auth_header.as_deref()).await {
            warn!("Rejecting WebSocket connection: {}", e);
            let frame = CloseFrame {
                code: CloseCode::Policy,
                reason: "Unauthorized".into(),
            };
            if let Err(close_error) = ws.close(Some(frame)).await {
                debug!("Failed to close rejected socket: {}", close_error);
            }
            return Err(e);
        }

        self.process_socket(ws, bot).await
    }

    /// Serve `bot` over an already upgraded socket
    pub async fn process_socket<S>(
        &self,
        ws: WebSocketStream<S>,
        bot: Arc<dyn Bot>,
    ) -> SkillResult<StreamingConnection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connection = StreamingConnection::new(ws);

        let bot_adapter = Arc::new(
            SkillWebSocketBotAdapter::new(Arc::new(connection.clone()))
                .with_middleware(self.middleware.clone())
                .with_telemetry(self.telemetry.clone()),
        );
        let handler = SkillWebSocketRequestHandler::new(bot_adapter, bot)
            .with_telemetry(self.telemetry.clone());

        connection.listen(Arc::new(handler)).await?;
        debug!("Skill WebSocket connection is listening");

        Ok(connection)
    }
}

impl Default for SkillWebSocketAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SkillWebSocketAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillWebSocketAdapter")
            .field("auth", &self.auth)
            .field("middleware", &self.middleware)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tokio::{net::TcpListener, sync::Mutex};
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    use super::*;
    use crate::{
        codec::streaming::ContentStream,
        protocol::{activity::Activity, error::SkillError},
        transport::websocket::StreamingSender,
        turn::TurnContext,
    };

    struct Echo;

    #[async_trait]
    impl Bot for Echo {
        async fn on_turn(&self, ctx: &TurnContext) -> SkillResult<()> {
            let text = ctx.activity().text.clone().unwrap_or_default();
            ctx.send_text(format!("echo: {}", text)).await?;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Bot for Failing {
        async fn on_turn(&self, _ctx: &TurnContext) -> SkillResult<()> {
            Err(SkillError::Other("boom".into()))
        }
    }

    /// Accepts every outbound request
    struct Sink;

    #[async_trait]
    impl StreamingSender for Sink {
        async fn send_request(
            &self,
            _request: StreamingRequest,
            _cancel: CancellationToken,
        ) -> Result<StreamingResponse, SkillError> {
            Ok(StreamingResponse::new(200))
        }
    }

    fn handler(bot: Arc<dyn Bot>) -> SkillWebSocketRequestHandler {
        let adapter = Arc::new(SkillWebSocketBotAdapter::new(Arc::new(Sink)));
        SkillWebSocketRequestHandler::new(adapter, bot)
    }

    fn activity_request(body: &str) -> StreamingRequest {
        StreamingRequest::post("/api/messages", body)
    }

    #[tokio::test]
    async fn test_request_without_streams_is_bad_request() {
        let response = handler(Arc::new(Echo))
            .process_request(StreamingRequest::new("POST", "/api/messages"))
            .await;
        assert_eq!(response.status_code, 400);
    }

    #[tokio::test]
    async fn test_empty_body_is_bad_request() {
        let response = handler(Arc::new(Echo))
            .process_request(activity_request("  "))
            .await;
        assert_eq!(response.status_code, 400);
    }

    #[tokio::test]
    async fn test_non_json_stream_is_not_acceptable() {
        let request = StreamingRequest::new("POST", "/api/messages").with_stream(ContentStream {
            id: "1".into(),
            content_type: Some("text/plain".into()),
            content: r#"{"type":"message"}"#.into(),
        });

        let response = handler(Arc::new(Echo)).process_request(request).await;
        assert_eq!(response.status_code, 406);
    }

    #[tokio::test]
    async fn test_unparseable_body_is_server_error() {
        let response = handler(Arc::new(Echo))
            .process_request(activity_request("{not json"))
            .await;
        assert_eq!(response.status_code, 500);
    }

    #[tokio::test]
    async fn test_failing_bot_is_server_error() {
        let response = handler(Arc::new(Failing))
            .process_request(activity_request(r#"{"type":"message","text":"hi"}"#))
            .await;
        assert_eq!(response.status_code, 500);
    }

    #[tokio::test]
    async fn test_invoke_is_not_implemented() {
        let response = handler(Arc::new(Echo))
            .process_request(activity_request(r#"{"type":"invoke","name":"x"}"#))
            .await;
        assert_eq!(response.status_code, 501);
    }

    #[tokio::test]
    async fn test_message_is_ok() {
        let response = handler(Arc::new(Echo))
            .process_request(activity_request(r#"{"type":"message","text":"hi"}"#))
            .await;
        assert_eq!(response.status_code, 200);
        assert!(response.streams.is_empty());
    }

    /// Collects requests the skill sends back to the parent
    struct Parent {
        seen: Mutex<Vec<StreamingRequest>>,
    }

    #[async_trait]
    impl RequestHandler for Parent {
        async fn process_request(&self, request: StreamingRequest) -> StreamingResponse {
            self.seen.lock().await.push(request);
            StreamingResponse::new(200).with_json_body(&json!({ "id": "ack" }))
        }
    }

    struct AcceptToken;

    #[async_trait]
    impl Authenticator for AcceptToken {
        async fn authenticate(&self, auth_header: Option<&str>) -> bool {
            auth_header == Some("Bearer parent")
        }
    }

    #[tokio::test]
    async fn test_loopback_replies_flow_back_to_parent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}", listener.local_addr().unwrap())).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            SkillWebSocketAdapter::new()
                .accept(stream, Arc::new(Echo))
                .await
                .unwrap()
        });

        let client = StreamingConnection::connect(&url).await.unwrap();
        let parent = Arc::new(Parent {
            seen: Mutex::new(Vec::new()),
        });
        client.listen(parent.clone()).await.unwrap();
        let _server = server.await.unwrap();

        let activity = Activity::message("hi").with_channel_id("test");
        let body = serde_json::to_string(&activity).unwrap();
        let response = client
            .send_request(activity_request(&body), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status_code, 200);

        let seen = parent.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].verb, "POST");
        assert!(seen[0].path.starts_with("/activities/"));
        let reply: Value = serde_json::from_str(&seen[0].read_body_as_string()).unwrap();
        assert_eq!(reply["text"], "echo: hi");
    }

    #[tokio::test]
    async fn test_unauthenticated_upgrade_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            SkillWebSocketAdapter::new()
                .with_authenticator(Arc::new(AcceptToken))
                .accept(stream, Arc::new(Echo))
                .await
        });

        let (_client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let result = server.await.unwrap();
        assert!(matches!(result, Err(SkillError::Authentication)));
    }

    #[tokio::test]
    async fn test_authenticated_upgrade_is_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            SkillWebSocketAdapter::new()
                .with_authenticator(Arc::new(AcceptToken))
                .accept(stream, Arc::new(Echo))
                .await
        });

        let mut request = url.into_client_request().unwrap();
        request
            .headers_mut()
            .insert("authorization", "Bearer parent".parse().unwrap());
        let (_client, _) = tokio_tungstenite::connect_async(request).await.unwrap();

        let connection = server.await.unwrap().unwrap();
        assert_eq!(
            connection.state(),
            crate::transport::websocket::ConnectionState::Listening
        );
    }
}

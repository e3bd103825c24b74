//! End-to-end behaviour of the skill transports
//!
//! These tests drive the public API the way a hosting application would: HTTP requests
//! through the adapter, WebSocket frames over a real loopback socket, and in-process
//! skills through the router and dialog.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::Mutex};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_skill::{
    codec::{Codec, ContentStream, JsonCodec, StreamingRequest, StreamingResponse},
    prelude::*,
    router::SkillDialogStatus,
    transport::{RequestHandler, StreamingSender},
};
use url::Url;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Replies with the inbound text
struct Echo;

#[async_trait]
impl Bot for Echo {
    async fn on_turn(&self, ctx: &TurnContext) -> SkillResult<()> {
        let text = ctx.activity().text.clone().unwrap_or_default();
        ctx.send_text(format!("echo: {}", text)).await?;
        Ok(())
    }
}

/// Sends a fixed list of activities every turn
struct Scripted(Vec<Activity>);

#[async_trait]
impl Bot for Scripted {
    async fn on_turn(&self, ctx: &TurnContext) -> SkillResult<()> {
        ctx.send_activities(self.0.clone()).await?;
        Ok(())
    }
}

fn post(body: &str) -> hyper::Request<Bytes> {
    hyper::Request::post("/api/skill/messages")
        .body(Bytes::from(body.to_string()))
        .unwrap()
}

fn body_json(response: &hyper::Response<Bytes>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
}

#[tokio::test]
async fn http_message_gets_generated_id_and_reply() {
    init_tracing();
    let adapter = SkillHttpAdapter::new(SkillHttpBotAdapter::new());

    let response = tokio_test::assert_ok!(
        adapter
            .forward(post(r#"{"type":"message","text":"hi"}"#), Arc::new(Echo))
            .await
    );

    assert_eq!(response.status(), 200);
    let body = body_json(&response);
    let replies = body.as_array().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["type"], "message");
    assert_eq!(replies[0]["text"], "echo: hi");
    assert!(!replies[0]["id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn http_rejected_credentials_never_reach_the_bot() {
    struct DenyAll;

    #[async_trait]
    impl Authenticator for DenyAll {
        async fn authenticate(&self, _auth_header: Option<&str>) -> bool {
            false
        }
    }

    struct Flag(Arc<AtomicBool>);

    #[async_trait]
    impl Bot for Flag {
        async fn on_turn(&self, _ctx: &TurnContext) -> SkillResult<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    let invoked = Arc::new(AtomicBool::new(false));
    let adapter =
        SkillHttpAdapter::new(SkillHttpBotAdapter::new()).with_authenticator(Arc::new(DenyAll));

    let mut request = post(r#"{"type":"message","text":"hi"}"#);
    request
        .headers_mut()
        .insert("authorization", "Bearer nope".parse().unwrap());
    let response = adapter
        .forward(request, Arc::new(Flag(invoked.clone())))
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert!(response.body().is_empty());
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn http_delay_pauses_the_turn() {
    let adapter = SkillHttpAdapter::new(SkillHttpBotAdapter::new());
    let bot = Scripted(vec![
        Activity::message("before"),
        Activity::delay(300),
        Activity::message("after"),
    ]);

    let started = Instant::now();
    let response = adapter
        .forward(post(r#"{"type":"message","text":"go"}"#), Arc::new(bot))
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    let body = body_json(&response);
    let texts: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["before", "after"]);
}

#[tokio::test]
async fn http_filters_trace_and_typing_by_channel() {
    let adapter = SkillHttpAdapter::new(SkillHttpBotAdapter::new());
    let bot = Arc::new(Scripted(vec![
        Activity::trace("debug", None),
        Activity::typing(),
        Activity::message("done"),
    ]));

    let types = |response: &hyper::Response<Bytes>| -> Vec<String> {
        body_json(response)
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["type"].as_str().unwrap().to_string())
            .collect()
    };

    let teams = adapter
        .forward(
            post(r#"{"type":"message","text":"x","channelId":"msteams"}"#),
            bot.clone(),
        )
        .await
        .unwrap();
    assert_eq!(types(&teams), vec!["message"]);

    let emulator = adapter
        .forward(
            post(r#"{"type":"message","text":"x","channelId":"emulator"}"#),
            bot.clone(),
        )
        .await
        .unwrap();
    assert_eq!(types(&emulator), vec!["trace", "message"]);

    let test = adapter
        .forward(
            post(r#"{"type":"message","text":"x","channelId":"test"}"#),
            bot,
        )
        .await
        .unwrap();
    assert_eq!(types(&test), vec!["typing", "message"]);
}

#[tokio::test]
async fn http_service_maps_malformed_body_to_bad_request() {
    let service = SkillHttpAdapter::new(SkillHttpBotAdapter::new()).into_service(Arc::new(Echo));

    let response = service.oneshot(post("")).await.unwrap();

    assert_eq!(response.status(), 400);
}

/// Parent side of a WebSocket conversation; acknowledges every activity it receives
struct Parent {
    received: Mutex<Vec<Activity>>,
}

#[async_trait]
impl RequestHandler for Parent {
    async fn process_request(&self, request: StreamingRequest) -> StreamingResponse {
        if let Ok(activity) = serde_json::from_str::<Activity>(&request.read_body_as_string()) {
            self.received.lock().await.push(activity);
        }
        StreamingResponse::new(200)
    }
}

async fn websocket_pair() -> (StreamingConnection, StreamingConnection, Arc<Parent>) {
    init_tracing();
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
        received: Mutex::new(Vec::new()),
    });
    client.listen(parent.clone()).await.unwrap();

    (server.await.unwrap(), client, parent)
}

async fn send(client: &StreamingConnection, request: StreamingRequest) -> u16 {
    client
        .send_request(request, CancellationToken::new())
        .await
        .unwrap()
        .status_code
}

#[tokio::test]
async fn websocket_frame_status_codes() {
    let (_server, client, parent) = websocket_pair().await;

    assert_eq!(send(&client, StreamingRequest::new("POST", "/api/messages")).await, 400);

    let plain = StreamingRequest::new("POST", "/api/messages").with_stream(ContentStream {
        id: "s1".into(),
        content_type: Some("text/plain".into()),
        content: r#"{"type":"message"}"#.into(),
    });
    assert_eq!(send(&client, plain).await, 406);

    assert_eq!(
        send(&client, StreamingRequest::post("/api/messages", "{broken")).await,
        500
    );
    assert_eq!(
        send(
            &client,
            StreamingRequest::post("/api/messages", r#"{"type":"invoke","name":"x"}"#)
        )
        .await,
        501
    );
    assert!(parent.received.lock().await.is_empty());

    assert_eq!(
        send(
            &client,
            StreamingRequest::post("/api/messages", r#"{"type":"message","text":"hi"}"#)
        )
        .await,
        200
    );

    let received = parent.received.lock().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text.as_deref(), Some("echo: hi"));
    assert!(received[0].id.as_deref().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn websocket_close_is_observed_by_the_parent() {
    let (server, client, _parent) = websocket_pair().await;

    let _ = server.close().await;
    client.closed().await;

    let result = client
        .send_request(
            StreamingRequest::post("/api/messages", r#"{"type":"message"}"#),
            CancellationToken::new(),
        )
        .await;
    tokio_test::assert_err!(result);
}

#[tokio::test]
async fn router_identifies_registered_skills() {
    let config = SkillsConfig::from_json_str(
        r#"{
            "registrations": [
                { "name": "todo", "dispatcherModelName": "l_Todo", "typeName": "todo-skill" },
                { "name": "pointOfInterest", "dispatcherModelName": "l_PointOfInterest", "typeName": "poi-skill" }
            ]
        }"#,
    )
    .unwrap();
    let router = config.router();

    assert_eq!(router.identify("l_Todo").map(|s| s.name.as_str()), Some("todo"));
    assert_eq!(
        router.identify("l_PointOfInterest").map(|s| s.name.as_str()),
        Some("pointOfInterest")
    );
    assert!(router.identify("l_Weather").is_none());
}

#[tokio::test]
async fn in_process_skill_end_of_conversation_terminates_dialog() {
    struct Farewell;

    #[async_trait]
    impl Bot for Farewell {
        async fn on_turn(&self, ctx: &TurnContext) -> SkillResult<()> {
            ctx.send_text("All done").await?;
            ctx.send_activity(Activity::end_of_conversation()).await?;
            Ok(())
        }
    }

    let factory = SkillFactory::new().register("farewell", |_| Ok(Arc::new(Farewell) as Arc<dyn Bot>));
    let dialog = SkillDialog::new(Arc::new(factory), Arc::new(MemoryStorage::new()));
    let router = SkillRouter::new(vec![SkillRegistration::new(
        "farewell",
        "l_Farewell",
        "farewell",
    )]);
    let registration = router.identify("l_Farewell").unwrap();
    let mut state = SkillDialogState::default();

    let result = dialog
        .begin(&mut state, registration, Activity::message("bye"))
        .await
        .unwrap();

    assert!(result.is_complete());
    assert_eq!(result.replies().len(), 1);
    assert_eq!(result.replies()[0].text.as_deref(), Some("All done"));
    assert_eq!(state.status, SkillDialogStatus::Terminated);
    assert!(state.active_skill.is_none());
}

#[test]
fn activity_dates_survive_a_round_trip() {
    let codec = JsonCodec::new();
    let body = br#"{
        "type": "message",
        "timestamp": "2019-07-03T12:34:56.789Z",
        "localTimestamp": "2019-07-03T05:34:56.789-07:00",
        "expiration": "not a date",
        "attachments": [{"contentType": "text/plain", "content": "x"}]
    }"#;

    let activity = codec.decode_activity(body).unwrap();
    assert!(activity.expiration.is_none());
    assert_eq!(activity.local_timestamp.unwrap().offset().local_minus_utc(), -7 * 3600);

    let encoded: Value = serde_json::from_slice(&codec.encode_activity(&activity).unwrap()).unwrap();
    let timestamp = DateTime::parse_from_rfc3339(encoded["timestamp"].as_str().unwrap()).unwrap();
    let local = DateTime::parse_from_rfc3339(encoded["localTimestamp"].as_str().unwrap()).unwrap();

    assert_eq!(
        timestamp,
        DateTime::parse_from_rfc3339("2019-07-03T12:34:56.789Z").unwrap()
    );
    assert_eq!(local.offset().local_minus_utc(), -7 * 3600);
    assert_eq!(local, timestamp);
    assert_eq!(encoded["attachments"], json!([{"contentType": "text/plain", "content": "x"}]));
}

//! Telemetry hooks emitted by the adapters
//!
//! Events are observability only; nothing in the transport reads them back.

use std::collections::HashMap;

/// Activity received by a skill adapter
pub const INCOMING_ACTIVITY_EVENT: &str = "SkillIncomingActivity";

/// Activities queued during an HTTP turn and returned in one body
pub const OUTGOING_ACTIVITIES_BATCHED_EVENT: &str = "SkillOutgoingActivitiesBatched";

/// One activity sent over a WebSocket, with its round-trip latency
pub const WEBSOCKET_SEND_ACTIVITY_EVENT: &str = "SkillWebSocketSendActivity";

/// One inbound WebSocket request processed, with its latency
pub const WEBSOCKET_PROCESS_REQUEST_EVENT: &str = "SkillWebSocketProcessRequest";

/// An activity forwarded from a parent bot to a skill over HTTP
pub const HTTP_FORWARD_EVENT: &str = "SkillHttpForward";

/// Sink for telemetry events
#[cfg_attr(test, mockall::automock)]
pub trait BotTelemetryClient: Send + Sync {
    fn track_event(
        &self,
        name: &str,
        properties: HashMap<String, String>,
        metrics: HashMap<String, f64>,
    );
}

/// Telemetry client that writes every event to `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingTelemetryClient;

impl BotTelemetryClient for TracingTelemetryClient {
    fn track_event(
        &self,
        name: &str,
        properties: HashMap<String, String>,
        metrics: HashMap<String, f64>,
    ) {
        tracing::info!(
            target: "tower_skill::telemetry",
            event = name,
            ?properties,
            ?metrics,
            "telemetry"
        );
    }
}

/// Telemetry client that drops every event
#[derive(Debug, Clone, Default)]
pub struct NullTelemetryClient;

impl BotTelemetryClient for NullTelemetryClient {
    fn track_event(
        &self,
        _name: &str,
        _properties: HashMap<String, String>,
        _metrics: HashMap<String, f64>,
    ) {
    }
}

/// Build an event property map from string pairs
pub(crate) fn properties<const N: usize>(pairs: [(&str, Option<&str>); N]) -> HashMap<String, String> {
    pairs
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v.to_string())))
        .collect()
}

/// Build a single-entry latency metric map
pub(crate) fn latency(elapsed: std::time::Duration) -> HashMap<String, f64> {
    HashMap::from([("latency_ms".to_string(), elapsed.as_secs_f64() * 1000.0)])
}

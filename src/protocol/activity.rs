//! Activity types exchanged between a parent bot and its skills

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Delay applied when a `delay` activity does not carry a numeric value
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// Name of the event a skill sends to ask its parent for an OAuth token
pub const TOKEN_REQUEST_EVENT: &str = "tokens/request";

/// Name of the event carrying a token back into a skill
pub const TOKEN_RESPONSE_EVENT: &str = "tokens/response";

/// Name of the event built from a conversation reference for proactive turns
pub const CONTINUE_CONVERSATION_EVENT: &str = "ContinueConversation";

/// The kind of an activity
///
/// Unknown wire types are kept verbatim in [`ActivityType::Other`] so they survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
    Message,
    Event,
    Trace,
    Typing,
    Delay,
    Invoke,
    /// Adapter-internal reply used by bots to answer an invoke
    InvokeResponse,
    EndOfConversation,
    Handoff,
    Other(String),
}

impl ActivityType {
    /// The wire name of this activity type
    pub fn as_str(&self) -> &str {
        match self {
            ActivityType::Message => "message",
            ActivityType::Event => "event",
            ActivityType::Trace => "trace",
            ActivityType::Typing => "typing",
            ActivityType::Delay => "delay",
            ActivityType::Invoke => "invoke",
            ActivityType::InvokeResponse => "invokeResponse",
            ActivityType::EndOfConversation => "endOfConversation",
            ActivityType::Handoff => "handoff",
            ActivityType::Other(other) => other,
        }
    }
}

impl From<String> for ActivityType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "message" => ActivityType::Message,
            "event" => ActivityType::Event,
            "trace" => ActivityType::Trace,
            "typing" => ActivityType::Typing,
            "delay" => ActivityType::Delay,
            "invoke" => ActivityType::Invoke,
            "invokeResponse" => ActivityType::InvokeResponse,
            "endOfConversation" => ActivityType::EndOfConversation,
            "handoff" => ActivityType::Handoff,
            _ => ActivityType::Other(value),
        }
    }
}

impl From<ActivityType> for String {
    fn from(value: ActivityType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user or bot taking part in a conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelAccount {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ChannelAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            role: None,
        }
    }
}

/// The conversation an activity belongs to
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_group: Option<bool>,
}

impl ConversationAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            is_group: None,
        }
    }
}

/// The unit of conversation exchange
///
/// Only the properties the transport inspects are typed. Everything else on the wire
/// (attachments, entities, channel data, ...) is kept in `properties` untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub activity_type: ActivityType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Name of an event or invoke
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Opaque payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_utc",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(
        default,
        deserialize_with = "lenient_fixed",
        skip_serializing_if = "Option::is_none"
    )]
    pub local_timestamp: Option<DateTime<FixedOffset>>,

    #[serde(
        default,
        deserialize_with = "lenient_utc",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration: Option<DateTime<Utc>>,

    /// Every other wire property
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Activity {
    /// Create an empty activity of the given type
    pub fn new(activity_type: ActivityType) -> Self {
        Self {
            id: None,
            activity_type,
            text: None,
            name: None,
            value: None,
            channel_id: None,
            service_url: None,
            from: None,
            recipient: None,
            conversation: None,
            reply_to_id: None,
            timestamp: None,
            local_timestamp: None,
            expiration: None,
            properties: Map::new(),
        }
    }

    /// Create a message activity with text content
    pub fn message(text: impl Into<String>) -> Self {
        let mut activity = Self::new(ActivityType::Message);
        activity.text = Some(text.into());
        activity
    }

    /// Create a named event activity
    pub fn event(name: impl Into<String>, value: Option<Value>) -> Self {
        let mut activity = Self::new(ActivityType::Event);
        activity.name = Some(name.into());
        activity.value = value;
        activity
    }

    /// Create a named invoke activity
    pub fn invoke(name: impl Into<String>, value: Option<Value>) -> Self {
        let mut activity = Self::new(ActivityType::Invoke);
        activity.name = Some(name.into());
        activity.value = value;
        activity
    }

    /// Create a trace activity
    pub fn trace(name: impl Into<String>, value: Option<Value>) -> Self {
        let mut activity = Self::new(ActivityType::Trace);
        activity.name = Some(name.into());
        activity.value = value;
        activity
    }

    pub fn typing() -> Self {
        Self::new(ActivityType::Typing)
    }

    /// Create a delay activity pausing the outbound stream for `ms` milliseconds
    pub fn delay(ms: u64) -> Self {
        let mut activity = Self::new(ActivityType::Delay);
        activity.value = Some(Value::from(ms));
        activity
    }

    pub fn end_of_conversation() -> Self {
        Self::new(ActivityType::EndOfConversation)
    }

    /// Wrap an invoke response so a bot can hand it to the adapter
    pub fn invoke_response(response: InvokeResponse) -> Self {
        let mut activity = Self::new(ActivityType::InvokeResponse);
        activity.value = serde_json::to_value(response).ok();
        activity
    }

    /// Set the channel id
    pub fn with_channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// Set the conversation
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation = Some(ConversationAccount::new(conversation_id));
        self
    }

    /// Set the activity id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Check the activity type
    pub fn is_type(&self, activity_type: &ActivityType) -> bool {
        &self.activity_type == activity_type
    }

    /// Check whether this is an event with the given name
    pub fn is_event(&self, name: &str) -> bool {
        self.activity_type == ActivityType::Event && self.name.as_deref() == Some(name)
    }

    /// How long a delay activity pauses the outbound stream
    pub fn delay_duration(&self) -> Duration {
        let ms = self
            .value
            .as_ref()
            .and_then(Value::as_f64)
            .map(|ms| ms.max(0.0) as u64)
            .unwrap_or(DEFAULT_DELAY_MS);
        Duration::from_millis(ms)
    }

    /// Backfill the id and timestamp required before transmission
    ///
    /// Returns the id the activity carries afterwards.
    pub fn ensure_id(&mut self) -> String {
        let id = match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::now_v7().to_string(),
        };
        self.id = Some(id.clone());
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
        }
        id
    }

    /// Extract a reference that can address replies to this activity's conversation
    pub fn conversation_reference(&self) -> ConversationReference {
        ConversationReference {
            activity_id: self.id.clone(),
            user: self.from.clone(),
            bot: self.recipient.clone(),
            conversation: self.conversation.clone(),
            channel_id: self.channel_id.clone(),
            service_url: self.service_url.clone(),
        }
    }

    /// Address this activity with a conversation reference
    ///
    /// Incoming activities come from the user; outgoing ones from the bot and reply to the
    /// referenced activity.
    pub fn apply_conversation_reference(
        &mut self,
        reference: &ConversationReference,
        is_incoming: bool,
    ) {
        self.channel_id = reference.channel_id.clone();
        self.service_url = reference.service_url.clone();
        self.conversation = reference.conversation.clone();

        if is_incoming {
            self.from = reference.user.clone();
            self.recipient = reference.bot.clone();
            if let Some(id) = &reference.activity_id {
                self.id = Some(id.clone());
            }
        } else {
            self.from = reference.bot.clone();
            self.recipient = reference.user.clone();
            if let Some(id) = &reference.activity_id {
                self.reply_to_id = Some(id.clone());
            }
        }
    }

    /// Create a message replying to this activity
    pub fn create_reply(&self, text: impl Into<String>) -> Activity {
        let mut reply = Activity::message(text);
        reply.apply_conversation_reference(&self.conversation_reference(), false);
        reply
    }
}

/// Everything needed to address a conversation outside of its turn
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ChannelAccount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<ChannelAccount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
}

impl ConversationReference {
    /// Build the event activity that starts a proactive turn for this conversation
    pub fn continuation_activity(&self) -> Activity {
        let mut activity = Activity::event(CONTINUE_CONVERSATION_EVENT, None);
        activity.id = Some(Uuid::now_v7().to_string());
        activity.apply_conversation_reference(self, true);
        activity
    }
}

/// Acknowledgement returned for each sent activity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceResponse {
    pub id: String,
}

impl ResourceResponse {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Status and body answering an invoke activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvokeResponse {
    pub status: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl InvokeResponse {
    pub fn new(status: u16) -> Self {
        Self { status, body: None }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn not_implemented() -> Self {
        Self::new(501)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// OAuth token handed back to a skill in a `tokens/response` event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub connection_name: String,

    pub token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

fn lenient_fixed<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => parse_date(&text),
        Some(other) => {
            tracing::warn!(value = %other, "Ignoring non-string date field");
            None
        }
    })
}

fn lenient_utc<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_fixed(deserializer)?.map(|date| date.with_timezone(&Utc)))
}

/// Parse an ISO-8601 date, treating values without an offset as UTC
fn parse_date(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date);
    }
    if let Ok(date) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(date);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().fixed_offset());
    }
    if let Some(midnight) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
    {
        return Some(midnight.and_utc().fixed_offset());
    }
    tracing::warn!(value = text, "Dropping unparsable date field");
    None
}

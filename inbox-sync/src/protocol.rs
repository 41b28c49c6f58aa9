//! JSON wire protocol for the inbox push channel.
//!
//! Client → server:
//! ```text
//! { "tid": "…", "action": "subscribe" | "unsubscribe" | "ping" | "pong" | "get-config",
//!   "data"?: {…}, "stats"?: {…} }
//! ```
//!
//! Server → client, distinguished by which key is present:
//! ```text
//! { "tid", "response": "ack" | "pong" | "config", "data"? }     → Response
//! { "tid", "action": "ping" }                                    → Action
//! { "event": "reconnect", "message", "retryAfter", "code" }     → Reconnect
//! { "event": "<message event>", "messageId"?, "data"? }         → Event
//! ```

use std::time::Duration;

use inbox_core::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Close code for an orderly shutdown; never followed by a retry.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code used when the heartbeat gives up on the server.
pub const PING_TIMEOUT_CLOSURE: u16 = 4000;

/// Wire protocol version sent as the `iwpv` query parameter.
pub const PROTOCOL_VERSION: &str = "v1";

/// Fresh transaction id.
pub fn new_tid() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientAction {
    Subscribe,
    Unsubscribe,
    Ping,
    Pong,
    GetConfig,
}

/// Request envelope sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    pub tid: String,
    pub action: ClientAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
}

impl ClientEnvelope {
    pub fn new(action: ClientAction) -> Self {
        Self {
            tid: new_tid(),
            action,
            data: None,
            stats: None,
        }
    }

    pub fn ping() -> Self {
        Self::new(ClientAction::Ping)
    }

    /// Reply to a server ping, echoing its transaction id.
    pub fn pong(tid: impl Into<String>) -> Self {
        Self {
            tid: tid.into(),
            ..Self::new(ClientAction::Pong)
        }
    }

    pub fn get_config() -> Self {
        Self::new(ClientAction::GetConfig)
    }

    /// Subscribe to every event on `channel`.
    pub fn subscribe(channel: &str) -> Self {
        Self::new(ClientAction::Subscribe).with_data(serde_json::json!({
            "channel": channel,
            "event": "*",
        }))
    }

    pub fn unsubscribe(channel: &str) -> Self {
        Self::new(ClientAction::Unsubscribe).with_data(serde_json::json!({
            "channel": channel,
        }))
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_stats(mut self, stats: Value) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Ack,
    Pong,
    Config,
}

/// Server reply correlated to a client request by `tid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResponse {
    pub tid: String,
    pub response: ResponseKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ServerResponse {
    /// Heartbeat settings carried by a `config` response.
    pub fn heartbeat_config(&self) -> Option<HeartbeatConfig> {
        if self.response != ResponseKind::Config {
            return None;
        }
        serde_json::from_value(self.data.clone()?).ok()
    }
}

/// Server-supplied heartbeat settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    /// Seconds between pings
    pub ping_interval: f64,
    pub max_outstanding_pings: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerActionKind {
    Ping,
}

/// Server-initiated request; the client must answer a ping with a pong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAction {
    pub tid: String,
    pub action: ServerActionKind,
}

/// Instruction to drop the connection and come back later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectDirective {
    #[serde(default)]
    pub message: String,
    /// Seconds to wait before reconnecting
    pub retry_after: f64,
    #[serde(default)]
    pub code: Option<u16>,
}

impl ReconnectDirective {
    pub fn retry_after(&self) -> Duration {
        seconds(self.retry_after).unwrap_or(Duration::ZERO)
    }
}

/// Message events pushed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Message,
    Archive,
    ArchiveAll,
    ArchiveRead,
    Clicked,
    MarkAllRead,
    Opened,
    Read,
    Unarchive,
    Unopened,
    Unread,
    /// Any event this client does not understand
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Message>,
}

/// A decoded server → client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Response(ServerResponse),
    Action(ServerAction),
    Reconnect(ReconnectDirective),
    Event(MessageEvent),
}

impl ServerFrame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))?;

        let frame = match value.get("event").map(Value::as_str) {
            Some(Some("reconnect")) => Self::Reconnect(from_value(value)?),
            Some(_) => Self::Event(from_value(value)?),
            None if value.get("response").is_some() => Self::Response(from_value(value)?),
            None if value.get("action").is_some() => Self::Action(from_value(value)?),
            None => return Err(ProtocolError::UnrecognizedFrame),
        };
        Ok(frame)
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// `None` for negative, non-finite or unrepresentable values.
fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}

/// Extract a `Retry-After` hint from a close reason such as
/// `{"Retry-After": "30"}`. Anything else yields `None`.
pub fn parse_retry_after(reason: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(reason).ok()?;
    match value.get("Retry-After")? {
        Value::String(s) => seconds(s.trim().parse().ok()?),
        Value::Number(n) => seconds(n.as_f64()?),
        _ => None,
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Encode(String),
    #[error("Deserialization error: {0}")]
    Decode(String),
    #[error("Unrecognized frame")]
    UnrecognizedFrame,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_envelope_shape() {
        let ping = ClientEnvelope::ping();
        let value: Value = serde_json::from_str(&ping.encode().unwrap()).unwrap();

        assert_eq!(value["action"], "ping");
        assert_eq!(value["tid"], ping.tid.as_str());
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_pong_echoes_tid() {
        let pong = ClientEnvelope::pong("server-tid-7");
        assert_eq!(pong.tid, "server-tid-7");
        assert_eq!(pong.action, ClientAction::Pong);
    }

    #[test]
    fn test_get_config_is_kebab_case() {
        let encoded = ClientEnvelope::get_config().encode().unwrap();
        assert!(encoded.contains(r#""action":"get-config""#));
    }

    #[test]
    fn test_subscribe_carries_channel() {
        let sub = ClientEnvelope::subscribe("user-1");
        let data = sub.data.unwrap();
        assert_eq!(data["channel"], "user-1");
        assert_eq!(data["event"], "*");
    }

    #[test]
    fn test_unique_tids() {
        assert_ne!(ClientEnvelope::ping().tid, ClientEnvelope::ping().tid);
    }

    #[test]
    fn test_decode_config_response() {
        let frame = ServerFrame::decode(
            r#"{"tid":"t1","response":"config","data":{"pingInterval":45,"maxOutstandingPings":2}}"#,
        )
        .unwrap();

        let ServerFrame::Response(response) = frame else {
            panic!("Expected response, got {frame:?}");
        };
        assert_eq!(
            response.heartbeat_config(),
            Some(HeartbeatConfig {
                ping_interval: 45.0,
                max_outstanding_pings: 2,
            })
        );
    }

    #[test]
    fn test_decode_pong_and_ack() {
        let pong = ServerFrame::decode(r#"{"tid":"p1","response":"pong"}"#).unwrap();
        assert!(matches!(pong, ServerFrame::Response(ServerResponse { response: ResponseKind::Pong, .. })));

        let ack = ServerFrame::decode(r#"{"tid":"s1","response":"ack","data":{}}"#).unwrap();
        match ack {
            ServerFrame::Response(r) => {
                assert_eq!(r.response, ResponseKind::Ack);
                assert!(r.heartbeat_config().is_none());
            }
            other => panic!("Expected ack, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_server_ping() {
        let frame = ServerFrame::decode(r#"{"tid":"srv-1","action":"ping"}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Action(ServerAction {
                tid: "srv-1".into(),
                action: ServerActionKind::Ping,
            })
        );
    }

    #[test]
    fn test_decode_reconnect_directive() {
        let frame = ServerFrame::decode(
            r#"{"event":"reconnect","message":"deploy","retryAfter":10,"code":1012}"#,
        )
        .unwrap();

        let ServerFrame::Reconnect(directive) = frame else {
            panic!("Expected reconnect, got {frame:?}");
        };
        assert_eq!(directive.retry_after(), Duration::from_secs(10));
        assert_eq!(directive.code, Some(1012));
        assert_eq!(directive.message, "deploy");
    }

    #[test]
    fn test_decode_message_event_with_payload() {
        let frame = ServerFrame::decode(
            r#"{"event":"message","data":{"messageId":"m1","created":"2024-05-01T10:00:00Z","tags":["ops"]}}"#,
        )
        .unwrap();

        let ServerFrame::Event(event) = frame else {
            panic!("Expected event, got {frame:?}");
        };
        assert_eq!(event.event, EventKind::Message);
        let message = event.data.unwrap();
        assert_eq!(message.message_id, "m1");
        assert!(message.has_tag("ops"));
    }

    #[test]
    fn test_decode_bulk_and_unknown_events() {
        let bulk = ServerFrame::decode(r#"{"event":"mark-all-read"}"#).unwrap();
        assert!(matches!(bulk, ServerFrame::Event(MessageEvent { event: EventKind::MarkAllRead, .. })));

        let read = ServerFrame::decode(r#"{"event":"read","messageId":"m9"}"#).unwrap();
        match read {
            ServerFrame::Event(e) => assert_eq!(e.message_id.as_deref(), Some("m9")),
            other => panic!("Expected event, got {other:?}"),
        }

        let unknown = ServerFrame::decode(r#"{"event":"typing"}"#).unwrap();
        assert!(matches!(unknown, ServerFrame::Event(MessageEvent { event: EventKind::Unknown, .. })));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(ServerFrame::decode("not json"), Err(ProtocolError::Decode(_))));
        assert_eq!(ServerFrame::decode(r#"{"hello":1}"#), Err(ProtocolError::UnrecognizedFrame));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(r#"{"Retry-After":"30"}"#), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(r#"{"Retry-After":5}"#), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(r#"{"Retry-After":"soon"}"#), None);
        assert_eq!(parse_retry_after("going away"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_out_of_range_delays_do_not_panic() {
        assert_eq!(parse_retry_after(r#"{"Retry-After":"1e30"}"#), None);
        assert_eq!(parse_retry_after(r#"{"Retry-After":1e30}"#), None);
        assert_eq!(parse_retry_after(r#"{"Retry-After":"-5"}"#), None);

        let directive = ReconnectDirective {
            message: String::new(),
            retry_after: 1e30,
            code: None,
        };
        assert_eq!(directive.retry_after(), Duration::ZERO);
    }
}

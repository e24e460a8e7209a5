//! SignalR JSON hub protocol, version 1.
//!
//! Every message is a JSON object terminated by the ASCII record separator
//! (`0x1e`). A WebSocket text frame may carry several messages.

use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::error::{HubError, HubResult};

/// Message terminator.
pub const RECORD_SEPARATOR: char = '\u{1e}';

pub const MSG_INVOCATION: u64 = 1;
pub const MSG_STREAM_ITEM: u64 = 2;
pub const MSG_COMPLETION: u64 = 3;
pub const MSG_STREAM_INVOCATION: u64 = 4;
pub const MSG_CANCEL_INVOCATION: u64 = 5;
pub const MSG_PING: u64 = 6;
pub const MSG_CLOSE: u64 = 7;

/// A decoded hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<JsonValue>,
    },
    Completion {
        invocation_id: String,
        result: Option<JsonValue>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// A message type this client does not act on.
    Other(u64),
}

/// Body of the negotiate response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    pub connection_id: Option<String>,
    pub connection_token: Option<String>,
    pub negotiate_version: Option<u32>,
    /// Redirect to another endpoint (e.g. a managed service).
    pub url: Option<String>,
    pub access_token: Option<String>,
    pub error: Option<String>,
}

impl NegotiateResponse {
    /// Id to put on the WebSocket URL: the token for version 1, the
    /// connection id otherwise.
    pub fn transport_id(&self) -> Option<&str> {
        match self.negotiate_version {
            Some(v) if v >= 1 => self
                .connection_token
                .as_deref()
                .or(self.connection_id.as_deref()),
            _ => self.connection_id.as_deref(),
        }
    }
}

/// The client handshake request.
pub fn handshake_request() -> String {
    format!("{}{}", json!({"protocol": "json", "version": 1}), RECORD_SEPARATOR)
}

/// Check the server handshake response (`{}` on success).
pub fn parse_handshake_response(frame: &str) -> HubResult<()> {
    let value: JsonValue = serde_json::from_str(frame.trim_end_matches(RECORD_SEPARATOR))?;
    match value.get("error").and_then(JsonValue::as_str) {
        Some(error) => Err(HubError::Handshake(error.to_string())),
        None => Ok(()),
    }
}

/// Split a text frame into its messages, dropping empty segments.
pub fn split_frames(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR).filter(|s| !s.trim().is_empty())
}

/// Decode one message (without the separator).
pub fn decode(message: &str) -> HubResult<HubMessage> {
    let value: JsonValue = serde_json::from_str(message)?;
    let kind = value
        .get("type")
        .and_then(JsonValue::as_u64)
        .ok_or_else(|| HubError::InvalidMessage("missing message type".to_string()))?;

    let text = |field: &str| value.get(field).and_then(JsonValue::as_str).map(str::to_string);

    let message = match kind {
        MSG_INVOCATION => HubMessage::Invocation {
            invocation_id: text("invocationId"),
            target: text("target")
                .ok_or_else(|| HubError::InvalidMessage("invocation without target".to_string()))?,
            arguments: value
                .get("arguments")
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default(),
        },
        MSG_COMPLETION => HubMessage::Completion {
            invocation_id: text("invocationId").ok_or_else(|| {
                HubError::InvalidMessage("completion without invocationId".to_string())
            })?,
            result: value.get("result").cloned(),
            error: text("error"),
        },
        MSG_PING => HubMessage::Ping,
        MSG_CLOSE => HubMessage::Close {
            error: text("error"),
            allow_reconnect: value
                .get("allowReconnect")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
        },
        other => HubMessage::Other(other),
    };
    Ok(message)
}

/// Encode a non-blocking invocation expecting a completion.
pub fn encode_invocation(invocation_id: &str, target: &str, arguments: &[JsonValue]) -> String {
    format!(
        "{}{}",
        json!({
            "type": MSG_INVOCATION,
            "invocationId": invocation_id,
            "target": target,
            "arguments": arguments,
        }),
        RECORD_SEPARATOR
    )
}

pub fn encode_ping() -> String {
    format!("{}{}", json!({"type": MSG_PING}), RECORD_SEPARATOR)
}

pub fn encode_close() -> String {
    format!("{}{}", json!({"type": MSG_CLOSE}), RECORD_SEPARATOR)
}

/// Parse and check a hub URL.
pub fn parse_hub_url(url: &str) -> HubResult<Url> {
    let parsed = Url::parse(url).map_err(|e| HubError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(parsed),
        other => Err(HubError::InvalidUrl(format!("unsupported scheme {}", other))),
    }
}

/// `{base}/negotiate?negotiateVersion=1`, keeping any existing query.
pub fn negotiate_url(base: &Url) -> Url {
    let mut url = base.clone();
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().append_pair("negotiateVersion", "1");
    url
}

/// WebSocket endpoint for a hub URL, with the transport id if negotiated.
pub fn websocket_url(base: &Url, transport_id: Option<&str>) -> HubResult<Url> {
    let mut url = base.clone();
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(HubError::InvalidUrl(format!("unsupported scheme {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| HubError::InvalidUrl(format!("cannot use scheme {}", scheme)))?;
    if let Some(id) = transport_id {
        url.query_pairs_mut().append_pair("id", id);
    }
    Ok(url)
}

/// Console rendering of an event argument: strings bare, anything else as JSON.
pub fn render_payload(arguments: &[JsonValue]) -> String {
    match arguments {
        [] => String::new(),
        [JsonValue::String(s)] => s.clone(),
        [single] => single.to_string(),
        many => many
            .iter()
            .map(|v| match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake() {
        assert_eq!(handshake_request(), "{\"protocol\":\"json\",\"version\":1}\u{1e}");
        assert!(parse_handshake_response("{}\u{1e}").is_ok());
        let err = parse_handshake_response("{\"error\":\"Requested protocol 'json' is not available.\"}\u{1e}")
            .unwrap_err();
        assert!(matches!(err, HubError::Handshake(_)));
    }

    #[test]
    fn test_split_frames() {
        let text = "{\"type\":6}\u{1e}{\"type\":1,\"target\":\"StatusUpdate\",\"arguments\":[\"ok\"]}\u{1e}";
        let frames: Vec<_> = split_frames(text).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(decode(frames[0]).unwrap(), HubMessage::Ping);
    }

    #[test]
    fn test_decode_invocation() {
        let msg = decode(r#"{"type":1,"target":"StatusUpdate","arguments":[{"status":"alive","seq":3}]}"#)
            .unwrap();
        match msg {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                assert!(invocation_id.is_none());
                assert_eq!(target, "StatusUpdate");
                assert_eq!(arguments[0]["seq"], 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_completion_and_close() {
        assert_eq!(
            decode(r#"{"type":3,"invocationId":"0","error":"Method does not exist."}"#).unwrap(),
            HubMessage::Completion {
                invocation_id: "0".to_string(),
                result: None,
                error: Some("Method does not exist.".to_string()),
            }
        );
        assert_eq!(
            decode(r#"{"type":7,"error":"Server shutting down","allowReconnect":true}"#).unwrap(),
            HubMessage::Close {
                error: Some("Server shutting down".to_string()),
                allow_reconnect: true,
            }
        );
        assert_eq!(decode(r#"{"type":2,"invocationId":"1","item":5}"#).unwrap(), HubMessage::Other(2));
    }

    #[test]
    fn test_decode_rejects_untyped() {
        assert!(matches!(decode(r#"{"target":"x"}"#), Err(HubError::InvalidMessage(_))));
        assert!(matches!(decode("not json"), Err(HubError::Json(_))));
    }

    #[test]
    fn test_encode_invocation() {
        let text = encode_invocation("7", "SubscribeToStatus", &[]);
        assert!(text.ends_with(RECORD_SEPARATOR));
        let value: JsonValue = serde_json::from_str(text.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["invocationId"], "7");
        assert_eq!(value["target"], "SubscribeToStatus");
        assert_eq!(value["arguments"], json!([]));
    }

    #[test]
    fn test_urls() {
        let base = parse_hub_url("http://localhost:5000/status-keepalive-hub").unwrap();
        assert_eq!(
            negotiate_url(&base).as_str(),
            "http://localhost:5000/status-keepalive-hub/negotiate?negotiateVersion=1"
        );
        assert_eq!(
            websocket_url(&base, Some("abc")).unwrap().as_str(),
            "ws://localhost:5000/status-keepalive-hub?id=abc"
        );

        let secure = parse_hub_url("https://example.com/hub").unwrap();
        assert_eq!(websocket_url(&secure, None).unwrap().as_str(), "wss://example.com/hub");
        assert!(parse_hub_url("ftp://example.com/hub").is_err());
    }

    #[test]
    fn test_negotiate_transport_id() {
        let v1: NegotiateResponse = serde_json::from_str(
            r#"{"connectionId":"cid","connectionToken":"tok","negotiateVersion":1,"availableTransports":[]}"#,
        )
        .unwrap();
        assert_eq!(v1.transport_id(), Some("tok"));

        let v0: NegotiateResponse =
            serde_json::from_str(r#"{"connectionId":"cid","availableTransports":[]}"#).unwrap();
        assert_eq!(v0.transport_id(), Some("cid"));
    }

    #[test]
    fn test_render_payload() {
        assert_eq!(render_payload(&[json!("alive")]), "alive");
        assert_eq!(render_payload(&[json!({"a":1})]), "{\"a\":1}");
        assert_eq!(render_payload(&[]), "");
        assert_eq!(render_payload(&[json!("a"), json!(2)]), "a, 2");
    }
}

//! Inbound message routing.
//!
//! Binary frames are audio for the arbiter. Text frames are decoded once into
//! `{type, data, source}`; anything that does not decode is shown verbatim.
//! Nothing is dropped without a log line.

use crate::transport::InboundMessage;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Source tag for text that did not carry one.
pub const DEFAULT_SOURCE: &str = "server";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    data: Option<String>,
    source: Option<String>,
}

/// Result of a single decode attempt on a text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TextPayload {
    Structured {
        kind: Option<String>,
        data: Option<String>,
        source: Option<String>,
    },
    Fallback {
        text: String,
    },
}

/// Only a JSON object is structured; arrays and scalars are shown as text.
pub fn decode_text(text: &str) -> TextPayload {
    let envelope = match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => serde_json::from_value::<Envelope>(value),
        Ok(other) => {
            warn!(kind = json_kind(&other), "Received JSON is not an object, treating as plain text");
            return fallback(text);
        }
        Err(e) => Err(e),
    };
    match envelope {
        Ok(envelope) => TextPayload::Structured {
            kind: envelope.kind,
            data: envelope.data,
            source: envelope.source,
        },
        Err(e) => {
            warn!(error = %e, "Received message is not valid JSON, treating as plain text");
            fallback(text)
        }
    }
}

fn fallback(text: &str) -> TextPayload {
    TextPayload::Fallback {
        text: text.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Where an inbound message goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Audio for the duplex arbiter.
    Play(Vec<u8>),
    /// Transcript line for the display.
    Display { text: String, source: String },
    /// Nothing to show; `reason` is logged.
    Ignore { reason: &'static str },
}

/// Route one inbound message.
pub fn route(message: InboundMessage) -> Route {
    match message {
        InboundMessage::Binary(bytes) => {
            debug!(bytes = bytes.len(), "Routing audio response to playback");
            Route::Play(bytes)
        }
        InboundMessage::Text(text) => {
            if text.is_empty() {
                debug!("Ignoring empty text message");
                return Route::Ignore {
                    reason: "empty text message",
                };
            }
            match decode_text(&text) {
                TextPayload::Structured { kind, data, source } => match data {
                    Some(data) if !data.is_empty() => Route::Display {
                        text: data,
                        source: source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                    },
                    _ => {
                        debug!(kind = kind.as_deref().unwrap_or("-"), "Message carried no transcript");
                        Route::Ignore {
                            reason: "structured message without data",
                        }
                    }
                },
                TextPayload::Fallback { text } => Route::Display {
                    text,
                    source: DEFAULT_SOURCE.to_string(),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_goes_to_playback_verbatim() {
        let routed = route(InboundMessage::Binary(vec![0x52, 0x49, 0x46, 0x46]));
        assert_eq!(routed, Route::Play(vec![0x52, 0x49, 0x46, 0x46]));
    }

    #[test]
    fn structured_transcript_is_displayed_with_source() {
        let routed = route(InboundMessage::Text(
            r#"{"type":"transcript","data":"hello there","source":"user"}"#.to_string(),
        ));
        assert_eq!(
            routed,
            Route::Display {
                text: "hello there".to_string(),
                source: "user".to_string()
            }
        );
    }

    #[test]
    fn missing_source_uses_default() {
        let routed = route(InboundMessage::Text(r#"{"data":"hi"}"#.to_string()));
        assert_eq!(
            routed,
            Route::Display {
                text: "hi".to_string(),
                source: DEFAULT_SOURCE.to_string()
            }
        );
    }

    #[test]
    fn malformed_text_falls_back_to_raw() {
        let routed = route(InboundMessage::Text("not json".to_string()));
        assert_eq!(
            routed,
            Route::Display {
                text: "not json".to_string(),
                source: DEFAULT_SOURCE.to_string()
            }
        );
    }

    #[test]
    fn non_object_json_falls_back_to_raw() {
        assert_eq!(
            decode_text("42"),
            TextPayload::Fallback {
                text: "42".to_string()
            }
        );
    }

    #[test]
    fn array_json_is_not_an_envelope() {
        let text = r#"[null,"hello","user"]"#;
        assert_eq!(
            decode_text(text),
            TextPayload::Fallback {
                text: text.to_string()
            }
        );
        let routed = route(InboundMessage::Text(text.to_string()));
        assert_eq!(
            routed,
            Route::Display {
                text: text.to_string(),
                source: DEFAULT_SOURCE.to_string()
            }
        );
    }

    #[test]
    fn object_with_wrong_field_types_falls_back() {
        let text = r#"{"data":42}"#;
        assert_eq!(
            decode_text(text),
            TextPayload::Fallback {
                text: text.to_string()
            }
        );
    }

    #[test]
    fn control_without_data_is_ignored_not_displayed() {
        let routed = route(InboundMessage::Text(r#"{"type":"ack"}"#.to_string()));
        assert!(matches!(routed, Route::Ignore { .. }));
        let routed = route(InboundMessage::Text(r#"{"type":"ack","data":""}"#.to_string()));
        assert!(matches!(routed, Route::Ignore { .. }));
    }

    #[test]
    fn decode_keeps_type_field() {
        let payload = decode_text(r#"{"type":"status","data":"thinking"}"#);
        assert_eq!(
            payload,
            TextPayload::Structured {
                kind: Some("status".to_string()),
                data: Some("thinking".to_string()),
                source: None
            }
        );
    }
}

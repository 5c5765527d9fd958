//! Agent event decoder.
//!
//! Turns one complete output line into exactly one [`DecodedEvent`]. The
//! event schema belongs to the agent: fields beyond the ones listed below
//! are ignored and no line ever fails hard.
//!
//! # Known event kinds
//!
//! | `type`       | Maps to                                            |
//! |--------------|----------------------------------------------------|
//! | `assistant`  | [`DecodedEvent::AssistantText`]                    |
//! | `result`     | [`DecodedEvent::Result`] (when `result` is a string) |
//! | *(other)*    | [`DecodedEvent::Other`]                            |
//! | *(missing)*  | [`DecodedEvent::Other`] with an empty kind         |
//!
//! Lines that do not start with `{` (after leading whitespace) or that are
//! not valid JSON become [`DecodedEvent::Unparseable`] and are shown as-is.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

// ── Decoded events ────────────────────────────────────────────────────────────

/// One decoded unit of the agent's output protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// Streamed assistant text, in wire order. May be empty.
    AssistantText {
        /// Text fragments found in `message.content[*].text`.
        fragments: Vec<String>,
    },
    /// The terminal result for the job.
    Result {
        /// Authoritative final answer.
        text: String,
    },
    /// Valid protocol chatter the relay does not render.
    Other {
        /// Value of the `type` discriminator; empty when absent.
        raw_type: String,
    },
    /// Diagnostic or banner text that is not a protocol object.
    Unparseable {
        /// The line exactly as received.
        raw_line: String,
    },
}

impl DecodedEvent {
    /// `true` for [`DecodedEvent::Result`].
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. })
    }
}

// ── Wire shapes ───────────────────────────────────────────────────────────────

/// Top-level event envelope; only the discriminator is typed.
#[derive(Debug, Deserialize)]
struct Envelope {
    /// Original field name in the wire format is `type`.
    #[serde(rename = "type")]
    kind: Option<Value>,
    #[serde(flatten)]
    body: Map<String, Value>,
}

/// Payload of an `assistant` event.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AssistantPayload {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AssistantMessage {
    content: Option<Vec<Value>>,
}

/// Payload of a `result` event.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResultPayload {
    result: Option<Value>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decode a single complete line into a [`DecodedEvent`].
///
/// This is a total function: every input, including the empty string,
/// maps to exactly one variant.
#[must_use]
pub fn decode_line(line: &str) -> DecodedEvent {
    if !line.trim_start().starts_with('{') {
        return unparseable(line);
    }

    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(error = %err, "decoder: brace-prefixed line is not valid json");
            return unparseable(line);
        }
    };

    let Some(Value::String(kind)) = envelope.kind else {
        return DecodedEvent::Other {
            raw_type: String::new(),
        };
    };

    match kind.as_str() {
        "result" => decode_result(kind, envelope.body),
        "assistant" => decode_assistant(envelope.body),
        _ => DecodedEvent::Other { raw_type: kind },
    }
}

/// Extract the answer from a complete non-streaming (`json`) output document.
///
/// Returns the `result` field when it is a string, otherwise an empty
/// string (missing field, malformed document, or non-object JSON).
#[must_use]
pub fn decode_result_document(output: &str) -> String {
    match serde_json::from_str::<Value>(output.trim()) {
        Ok(Value::Object(mut fields)) => match fields.remove("result") {
            Some(Value::String(text)) => text,
            _ => String::new(),
        },
        Ok(_) => String::new(),
        Err(err) => {
            debug!(error = %err, "decoder: json output is not a result document");
            String::new()
        }
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn unparseable(line: &str) -> DecodedEvent {
    DecodedEvent::Unparseable {
        raw_line: line.to_owned(),
    }
}

/// Decode a `result` body; without a string `result` field it is chatter.
fn decode_result(kind: String, body: Map<String, Value>) -> DecodedEvent {
    match serde_json::from_value::<ResultPayload>(Value::Object(body)) {
        Ok(ResultPayload {
            result: Some(Value::String(text)),
        }) => DecodedEvent::Result { text },
        _ => DecodedEvent::Other { raw_type: kind },
    }
}

/// Walk `message.content[*].text`, keeping string fragments in order.
fn decode_assistant(body: Map<String, Value>) -> DecodedEvent {
    let payload = serde_json::from_value::<AssistantPayload>(Value::Object(body))
        .unwrap_or_else(|err| {
            debug!(error = %err, "decoder: assistant event has an unexpected shape");
            AssistantPayload::default()
        });

    let fragments = payload
        .message
        .and_then(|message| message.content)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(mut fields) => match fields.remove("text") {
                Some(Value::String(text)) => Some(text),
                _ => None,
            },
            _ => None,
        })
        .collect();

    DecodedEvent::AssistantText { fragments }
}

//! Tolerant inbound frame parser.
//!
//! The upstream envelope shape is not documented and has changed over time,
//! so the parser works on an untyped [`serde_json::Value`] and looks for the
//! fields it understands instead of deserialising into a strict struct.
//! Unknown frame types and unknown fields are ignored; only a frame that is
//! not JSON at all is an error.

use serde_json::Value;
use tracing::trace;

use super::ProtocolError;

/// What a single inbound frame means to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// One line (or block) of console output.
    ConsoleLine(String),
    /// `connection_ack`: the upstream accepted the session.
    Ack,
    /// `ka`: upstream keep-alive.
    KeepAlive,
    /// Reply to a `sendConsoleMessage` mutation.
    CommandAck { ok: bool },
    /// The upstream reported an error for the session or an operation.
    UpstreamError(String),
    /// The upstream ended the subscription.
    Complete,
    /// Valid JSON the relay has no use for.
    Ignored,
}

/// Parses one text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedFrame`] if `text` is not valid JSON.
pub fn parse_inbound(text: &str) -> Result<InboundFrame, ProtocolError> {
    let root: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

    let obj = match &root {
        Value::Object(obj) => obj,
        Value::String(line) => return Ok(console_line(line)),
        _ => return Ok(InboundFrame::Ignored),
    };

    match obj.get("type").and_then(Value::as_str) {
        Some("ka") => Ok(InboundFrame::KeepAlive),
        Some("connection_ack") => Ok(InboundFrame::Ack),
        Some("complete") => Ok(InboundFrame::Complete),
        Some("error") | Some("connection_error") => Ok(InboundFrame::UpstreamError(
            error_text(obj.get("payload").unwrap_or(&Value::Null)),
        )),
        Some("data") | Some("next") | None => Ok(extract_payload(&root)),
        Some(other) => {
            trace!(frame_type = other, "ignoring unrecognised frame type");
            Ok(InboundFrame::Ignored)
        }
    }
}

/// Digs the interesting part out of a data-carrying frame.
fn extract_payload(root: &Value) -> InboundFrame {
    let payload = root.get("payload").unwrap_or(root);

    if let Some(errors) = payload.get("errors").filter(|e| !e.is_null()) {
        return InboundFrame::UpstreamError(error_text(errors));
    }

    let data = payload.get("data").unwrap_or(payload);

    if let Some(line) = data
        .get("consoleMessages")
        .and_then(|cm| cm.get("message"))
        .and_then(Value::as_str)
    {
        return console_line(line);
    }

    if let Some(ack) = data.get("sendConsoleMessage") {
        return InboundFrame::CommandAck {
            ok: ack.get("ok").and_then(Value::as_bool).unwrap_or(false),
        };
    }

    match data.get("message").and_then(Value::as_str) {
        Some(line) => console_line(line),
        None => InboundFrame::Ignored,
    }
}

fn console_line(raw: &str) -> InboundFrame {
    let line = raw.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        InboundFrame::Ignored
    } else {
        InboundFrame::ConsoleLine(line.to_string())
    }
}

/// Renders an upstream error payload as a single human-readable string.
fn error_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(error_text)
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        Value::Null => "unspecified upstream error".to_string(),
        other => other.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

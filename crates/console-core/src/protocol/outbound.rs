//! Outbound frame builders.
//!
//! # Command envelope
//!
//! Every operator command travels as one text frame, byte for byte:
//!
//! ```text
//! {"operationName":"sendConsoleMessage",
//!  "variables":{"sid":<int>,"region":"US|EU|AS","message":"<string>"},
//!  "query":"mutation sendConsoleMessage(...) { ... }"}
//! ```
//!
//! (shown wrapped; the real frame has no whitespace between members).  Field
//! order is fixed by the struct declaration order, which `serde_json` follows.

use serde::Serialize;
use serde_json::json;

use super::ProtocolError;
use crate::domain::server::{Region, ServerId};

/// GraphQL document for the command mutation.
pub const SEND_CONSOLE_MESSAGE_QUERY: &str = "mutation sendConsoleMessage($sid: Int!, $region: REGION!, $message: String!) { sendConsoleMessage(rsid:{id:$sid,region:$region}, message:$message){ok __typename} }";

/// GraphQL document for the console output subscription.
pub const CONSOLE_MESSAGES_SUBSCRIPTION: &str = "subscription consoleMessages($sid: Int!, $region: REGION!) { consoleMessages(rsid:{id:$sid,region:$region}) { stream channel message __typename } }";

/// Operation id used for the single subscription of a session.
pub const SUBSCRIPTION_ID: &str = "1";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandEnvelope<'a> {
    operation_name: &'static str,
    variables: CommandVariables<'a>,
    query: &'static str,
}

#[derive(Serialize)]
struct CommandVariables<'a> {
    sid: ServerId,
    region: Region,
    message: &'a str,
}

/// Builds the `sendConsoleMessage` frame for `message`.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialisation fails.
///
/// # Example
///
/// ```rust
/// use console_core::protocol::command_frame;
/// use console_core::Region;
///
/// let frame = command_frame(42, Region::Us, "serverinfo").unwrap();
/// assert!(frame.starts_with(r#"{"operationName":"sendConsoleMessage","variables":{"sid":42,"region":"US","message":"serverinfo"}"#));
/// ```
pub fn command_frame(sid: ServerId, region: Region, message: &str) -> Result<String, ProtocolError> {
    let envelope = CommandEnvelope {
        operation_name: "sendConsoleMessage",
        variables: CommandVariables {
            sid,
            region,
            message,
        },
        query: SEND_CONSOLE_MESSAGE_QUERY,
    };
    serde_json::to_string(&envelope).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Builds the `connection_init` frame that opens a GraphQL-over-WebSocket
/// session.  `token`, when present, is sent as the `authorization` payload.
pub fn connection_init_frame(token: Option<&str>) -> String {
    let payload = match token {
        Some(t) => json!({ "authorization": format!("Bearer {t}") }),
        None => json!({}),
    };
    json!({ "type": "connection_init", "payload": payload }).to_string()
}

/// Builds the `start` frame subscribing to console output of one server.
pub fn subscribe_frame(sid: ServerId, region: Region) -> String {
    json!({
        "id": SUBSCRIPTION_ID,
        "type": "start",
        "payload": {
            "variables": { "sid": sid, "region": region },
            "extensions": {},
            "operationName": "consoleMessages",
            "query": CONSOLE_MESSAGES_SUBSCRIPTION,
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame_escapes_message_text() {
        let frame = command_frame(1, Region::Eu, "say \"hi\"\nthere").unwrap();
        assert!(frame.contains(r#""message":"say \"hi\"\nthere""#));
    }

    #[test]
    fn test_connection_init_without_token_has_empty_payload() {
        let v: serde_json::Value = serde_json::from_str(&connection_init_frame(None)).unwrap();
        assert_eq!(v["type"], "connection_init");
        assert!(v["payload"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_connection_init_with_token_sets_bearer() {
        let v: serde_json::Value =
            serde_json::from_str(&connection_init_frame(Some("abc"))).unwrap();
        assert_eq!(v["payload"]["authorization"], "Bearer abc");
    }

    #[test]
    fn test_subscribe_frame_carries_server_and_region() {
        let v: serde_json::Value = serde_json::from_str(&subscribe_frame(42, Region::As)).unwrap();
        assert_eq!(v["type"], "start");
        assert_eq!(v["id"], SUBSCRIPTION_ID);
        assert_eq!(v["payload"]["variables"]["sid"], 42);
        assert_eq!(v["payload"]["variables"]["region"], "AS");
        assert_eq!(v["payload"]["operationName"], "consoleMessages");
    }
}

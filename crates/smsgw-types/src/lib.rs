use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Delimiter joining the fields of an incoming-message event.
pub const EVENT_FIELD_DELIMITER: char = '+';

/// One text message as reported by the device's `sms_list` endpoint.
///
/// `index` is `None` when the record carried no usable `index` field; such a
/// message can be displayed but never acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub index: Option<u32>,
    pub date: String,
    pub sender: String,
    pub text: String,
    pub status: String,
}

impl Message {
    /// Render the message as an incoming-event payload:
    /// `date+sender+text+status`.
    pub fn to_event_payload(&self) -> String {
        [
            self.date.as_str(),
            self.sender.as_str(),
            self.text.as_str(),
            self.status.as_str(),
        ]
        .join(&EVENT_FIELD_DELIMITER.to_string())
    }
}

/// A command received on the inbound command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `get_sms_message_list`
    ListMessages,
    /// `read_sms_message_<id>`
    ReadMessage(u32),
    /// `send_sms_message:<number>+<text>`
    SendMessage { number: String, text: String },
    /// `send_sms_message_to_group:<group>+<text>`
    SendGroupMessage { group: String, text: String },
    /// `read_sms_totalmsg`
    TotalMessages,
    /// `delete_sms_message_<id>`
    DeleteMessage(u32),
    /// Anything else, carried verbatim.
    Unknown(String),
}

impl Command {
    /// Short, stable label used in logs and spans.
    pub fn name(&self) -> &'static str {
        match self {
            Command::ListMessages => "list_messages",
            Command::ReadMessage(_) => "read_message",
            Command::SendMessage { .. } => "send_message",
            Command::SendGroupMessage { .. } => "send_group_message",
            Command::TotalMessages => "total_messages",
            Command::DeleteMessage(_) => "delete_message",
            Command::Unknown(_) => "unknown",
        }
    }
}

/// A command string that names a known command but whose arguments do not
/// follow the grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{command} requires an argument of the form <destination>+<text>")]
    MissingArgument { command: String },

    #[error("{command} argument has no '+' between destination and text")]
    MissingSeparator { command: String },

    #[error("{command} has an empty destination")]
    EmptyDestination { command: String },
}

/// The three logical bus channels the gateway talks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Inbound command strings.
    Command,
    /// JSON responses, one per inbound command.
    Response,
    /// Newly arrived text messages.
    Incoming,
}

/// How successful device responses are written to the response channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseEncoding {
    /// The device text as a JSON string literal.
    #[default]
    Json,
    /// The device text verbatim.
    Raw,
}

/// Outcome of a dispatched command, ready for the response channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Raw text returned by the device.
    Device(String),
    /// A failure of any kind, rendered as `{"error": "..."}`.
    Error(String),
}

impl Response {
    /// The reply for a command the gateway does not recognise.
    pub fn unknown_command() -> Self {
        Response::Error("Unknown command".to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Render the payload published on the response channel.
    pub fn to_payload(&self, encoding: ResponseEncoding) -> String {
        match (self, encoding) {
            (Response::Device(text), ResponseEncoding::Raw) => text.clone(),
            (Response::Device(text), ResponseEncoding::Json) => {
                serde_json::Value::String(text.clone()).to_string()
            }
            (Response::Error(message), _) => {
                serde_json::json!({ "error": message }).to_string()
            }
        }
    }
}

/// Envelope for everything carried on the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub channel: Channel,
    /// e.g., "smsgw-runtime::ingester"
    pub source: String,
    pub payload: String,
}

impl Event {
    pub fn new(channel: Channel, source: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            channel,
            source: source.into(),
            payload: payload.into(),
        }
    }
}

/// Workspace-wide error type covering device, bus and configuration failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SmsError {
    #[error("Device request failed: {0}")]
    Device(String),

    #[error("Malformed command: {0}")]
    MalformedCommand(#[from] CommandError),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            index: Some(4),
            date: "Mon Jan  8 10:21:03 2024".to_string(),
            sender: "+491701234567".to_string(),
            text: "Hello".to_string(),
            status: "read".to_string(),
        }
    }

    #[test]
    fn event_payload_joins_fields_in_order() {
        assert_eq!(
            sample().to_event_payload(),
            "Mon Jan  8 10:21:03 2024++491701234567+Hello+read"
        );
    }

    #[test]
    fn event_payload_keeps_empty_fields() {
        let message = Message {
            text: "ping".to_string(),
            ..Message::default()
        };
        assert_eq!(message.to_event_payload(), "++ping+");
    }

    #[test]
    fn unknown_command_payload_is_error_object() {
        let payload = Response::unknown_command().to_payload(ResponseEncoding::Json);
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value, serde_json::json!({ "error": "Unknown command" }));
    }

    #[test]
    fn device_text_is_json_string_by_default() {
        let payload = Response::Device("OK\n".to_string()).to_payload(ResponseEncoding::default());
        assert_eq!(payload, r#""OK\n""#);
    }

    #[test]
    fn raw_encoding_passes_text_through() {
        let payload = Response::Device("Used: 3".to_string()).to_payload(ResponseEncoding::Raw);
        assert_eq!(payload, "Used: 3");
    }

    #[test]
    fn error_encoding_ignores_response_mode() {
        let response = Response::Error("timeout".to_string());
        assert_eq!(
            response.to_payload(ResponseEncoding::Raw),
            response.to_payload(ResponseEncoding::Json)
        );
        assert!(response.is_error());
    }

    #[test]
    fn sms_error_display() {
        let err = SmsError::from(CommandError::MissingSeparator {
            command: "send_sms_message".to_string(),
        });
        assert!(err.to_string().starts_with("Malformed command:"));
        assert!(err.to_string().contains("send_sms_message"));
    }

    #[test]
    fn command_names_ignore_arguments() {
        let send = Command::SendMessage {
            number: "491701234567".to_string(),
            text: "Hello".to_string(),
        };
        assert_eq!(send.name(), "send_message");
        assert_eq!(Command::DeleteMessage(7).name(), "delete_message");
        assert_eq!(Command::Unknown("reboot".to_string()).name(), "unknown");
    }
}

//! [`CommandDispatcher`] – bus command strings in, device calls out.
//!
//! # Grammar
//!
//! ```text
//! payload      = base_command *( ":" arg )
//! base_command = "get_sms_message_list"
//!              / "send_sms_message" / "send_sms_message_to_group"
//!              / "read_sms_totalmsg"
//!              / "read_sms_message_" id / "delete_sms_message_" id
//! send arg     = [ "+" ] destination "+" text
//! ```
//!
//! The id of a prefixed command is whatever follows the last underscore;
//! if it is not a number the command is [`Command::Unknown`].  Send
//! arguments are re-joined on `:` before splitting, so message text may
//! contain colons.  The first `+` after the optional leading one separates
//! destination from text, so text may contain `+` as well.
//!
//! Every inbound payload produces exactly one [`Response`] on the response
//! channel.  Device failures, malformed commands and unknown commands all
//! come back as `{"error": "..."}`; nothing is raised to the caller.

use std::sync::Arc;

use futures_util::stream::{BoxStream, StreamExt};
use smsgw_middleware::BusAdapter;
use smsgw_types::{Channel, Command, CommandError, Response, ResponseEncoding, SmsError};
use tracing::{debug, error, info, instrument, warn};

use crate::session::DeviceSession;
use crate::shutdown::ShutdownListener;

const LIST_MESSAGES: &str = "get_sms_message_list";
const SEND_MESSAGE: &str = "send_sms_message";
const SEND_GROUP_MESSAGE: &str = "send_sms_message_to_group";
const TOTAL_MESSAGES: &str = "read_sms_totalmsg";
const READ_MESSAGE_PREFIX: &str = "read_sms_message_";
const DELETE_MESSAGE_PREFIX: &str = "delete_sms_message_";

/// Parse one inbound payload.
///
/// # Errors
///
/// [`CommandError`] when a send command's argument is missing or has no
/// destination/text separator.  Unrecognised commands are not errors; they
/// parse to [`Command::Unknown`].
pub fn parse_command(raw: &str) -> Result<Command, CommandError> {
    let raw = raw.trim();
    let (base, args) = match raw.split_once(':') {
        Some((base, args)) => (base, Some(args)),
        None => (raw, None),
    };

    match base {
        LIST_MESSAGES => Ok(Command::ListMessages),
        TOTAL_MESSAGES => Ok(Command::TotalMessages),
        SEND_MESSAGE => {
            let (number, text) = destination_and_text(base, args)?;
            Ok(Command::SendMessage { number, text })
        }
        SEND_GROUP_MESSAGE => {
            let (group, text) = destination_and_text(base, args)?;
            Ok(Command::SendGroupMessage { group, text })
        }
        _ => Ok(parse_prefixed(base).unwrap_or_else(|| Command::Unknown(raw.to_string()))),
    }
}

fn parse_prefixed(base: &str) -> Option<Command> {
    let id = || base.rsplit_once('_').and_then(|(_, id)| id.parse::<u32>().ok());
    if base.starts_with(READ_MESSAGE_PREFIX) {
        id().map(Command::ReadMessage)
    } else if base.starts_with(DELETE_MESSAGE_PREFIX) {
        id().map(Command::DeleteMessage)
    } else {
        None
    }
}

fn destination_and_text(
    command: &str,
    args: Option<&str>,
) -> Result<(String, String), CommandError> {
    let arg = args
        .filter(|a| !a.is_empty())
        .ok_or_else(|| CommandError::MissingArgument {
            command: command.to_string(),
        })?;
    let arg = arg.strip_prefix('+').unwrap_or(arg);
    let (destination, text) = arg
        .split_once('+')
        .ok_or_else(|| CommandError::MissingSeparator {
            command: command.to_string(),
        })?;
    let destination = destination.trim();
    if destination.is_empty() {
        return Err(CommandError::EmptyDestination {
            command: command.to_string(),
        });
    }
    Ok((destination.to_string(), text.to_string()))
}

/// Stateless command handler over the shared [`DeviceSession`].
pub struct CommandDispatcher {
    session: DeviceSession,
    bus: Arc<dyn BusAdapter>,
    encoding: ResponseEncoding,
}

impl CommandDispatcher {
    pub fn new(session: DeviceSession, bus: Arc<dyn BusAdapter>, encoding: ResponseEncoding) -> Self {
        Self {
            session,
            bus,
            encoding,
        }
    }

    /// Turn a raw payload into a [`Response`] without publishing it.
    pub async fn respond(&self, raw: &str) -> Response {
        match parse_command(raw) {
            Ok(command) => self.execute(command).await,
            Err(e) => {
                warn!(payload = %raw, error = %e, "malformed command");
                Response::Error(SmsError::from(e).to_string())
            }
        }
    }

    /// Issue the single device call that `command` maps to.
    pub async fn execute(&self, command: Command) -> Response {
        let name = command.name();
        let result = match command {
            Command::ListMessages => self.session.list_messages().await,
            Command::ReadMessage(index) => self.session.read_message(index).await,
            Command::SendMessage { number, text } => self.session.send_message(number, text).await,
            Command::SendGroupMessage { group, text } => {
                self.session.send_group_message(group, text).await
            }
            Command::TotalMessages => self.session.total_messages().await,
            Command::DeleteMessage(index) => self.session.delete_message(index).await,
            Command::Unknown(raw) => {
                warn!(command = %raw, "unknown command");
                return Response::unknown_command();
            }
        };
        match result {
            Ok(text) => Response::Device(text),
            Err(e) => {
                warn!(command = name, error = %e, "device call failed");
                Response::Error(e.to_string())
            }
        }
    }

    /// Handle one inbound payload and publish its response.
    ///
    /// # Errors
    ///
    /// [`SmsError::Bus`] if the response could not be published.  The
    /// device call, if any, has already happened.
    #[instrument(skip_all, fields(payload = %raw))]
    pub async fn dispatch(&self, raw: &str) -> Result<Response, SmsError> {
        let response = self.respond(raw).await;
        self.bus
            .publish(Channel::Response, response.to_payload(self.encoding))
            .await?;
        debug!(error = response.is_error(), "response published");
        Ok(response)
    }

    /// Dispatch commands from `commands` one at a time until shutdown or
    /// until the stream ends.
    pub async fn serve(&self, mut commands: BoxStream<'static, String>, mut shutdown: ShutdownListener) {
        loop {
            let raw = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = commands.next() => match next {
                    Some(raw) => raw,
                    None => {
                        info!("command stream ended");
                        break;
                    }
                },
            };
            if let Err(e) = self.dispatch(&raw).await {
                error!(payload = %raw, error = %e, "failed to publish command response");
            }
        }
        info!("command dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smsgw_device::{Endpoint, SimDevice};
    use smsgw_middleware::EventBus;
    use smsgw_types::Message;

    fn dispatcher_with(sim: Arc<SimDevice>) -> (EventBus, CommandDispatcher) {
        let bus = EventBus::default();
        let dispatcher = CommandDispatcher::new(
            DeviceSession::new(sim),
            Arc::new(bus.clone()),
            ResponseEncoding::Json,
        );
        (bus, dispatcher)
    }

    // -----------------------------------------------------------------------
    // Grammar
    // -----------------------------------------------------------------------

    #[test]
    fn parses_exact_names() {
        assert_eq!(parse_command("get_sms_message_list"), Ok(Command::ListMessages));
        assert_eq!(parse_command("read_sms_totalmsg"), Ok(Command::TotalMessages));
    }

    #[test]
    fn parses_send_with_leading_plus() {
        assert_eq!(
            parse_command("send_sms_message:+491701234567+Hello"),
            Ok(Command::SendMessage {
                number: "491701234567".to_string(),
                text: "Hello".to_string(),
            })
        );
    }

    #[test]
    fn send_text_may_contain_plus_and_colon() {
        assert_eq!(
            parse_command("send_sms_message:123+Meet at 10:30, bring 1+1"),
            Ok(Command::SendMessage {
                number: "123".to_string(),
                text: "Meet at 10:30, bring 1+1".to_string(),
            })
        );
    }

    #[test]
    fn parses_group_send() {
        assert_eq!(
            parse_command("send_sms_message_to_group:staff+Meeting moved"),
            Ok(Command::SendGroupMessage {
                group: "staff".to_string(),
                text: "Meeting moved".to_string(),
            })
        );
    }

    #[test]
    fn parses_prefixed_ids() {
        assert_eq!(parse_command("read_sms_message_3"), Ok(Command::ReadMessage(3)));
        assert_eq!(parse_command("delete_sms_message_12"), Ok(Command::DeleteMessage(12)));
    }

    #[test]
    fn id_is_suffix_after_last_underscore() {
        assert_eq!(parse_command("read_sms_message_x_4"), Ok(Command::ReadMessage(4)));
    }

    #[test]
    fn non_numeric_suffix_is_unknown() {
        assert_eq!(
            parse_command("read_sms_message_abc"),
            Ok(Command::Unknown("read_sms_message_abc".to_string()))
        );
        assert_eq!(
            parse_command("delete_sms_message_-1"),
            Ok(Command::Unknown("delete_sms_message_-1".to_string()))
        );
    }

    #[test]
    fn unrecognised_name_is_unknown() {
        assert_eq!(
            parse_command("frobnicate"),
            Ok(Command::Unknown("frobnicate".to_string()))
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(parse_command("  read_sms_totalmsg\n"), Ok(Command::TotalMessages));
    }

    #[test]
    fn malformed_sends_are_errors() {
        assert!(matches!(
            parse_command("send_sms_message"),
            Err(CommandError::MissingArgument { .. })
        ));
        assert!(matches!(
            parse_command("send_sms_message:"),
            Err(CommandError::MissingArgument { .. })
        ));
        assert!(matches!(
            parse_command("send_sms_message:491701234567"),
            Err(CommandError::MissingSeparator { .. })
        ));
        assert!(matches!(
            parse_command("send_sms_message_to_group:+ +hi"),
            Err(CommandError::EmptyDestination { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn send_reaches_device_with_parsed_arguments() -> Result<(), Box<dyn std::error::Error>> {
        let sim = Arc::new(SimDevice::new());
        let (bus, dispatcher) = dispatcher_with(sim.clone());
        let mut responses = bus.subscribe_to(Channel::Response);

        let response = dispatcher.dispatch("send_sms_message:+491701234567+Hello").await?;

        assert_eq!(response, Response::Device("OK".to_string()));
        let sent = sim.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, "491701234567");
        assert_eq!(sent[0].text, "Hello");
        assert_eq!(responses.recv().await?.payload, r#""OK""#);
        Ok(())
    }

    #[tokio::test]
    async fn read_dispatches_to_read_endpoint() -> Result<(), Box<dyn std::error::Error>> {
        let sim = Arc::new(SimDevice::new().with_message(Message {
            index: Some(3),
            text: "three".to_string(),
            ..Message::default()
        }));
        let (bus, dispatcher) = dispatcher_with(sim.clone());
        let _responses = bus.subscribe_to(Channel::Response);

        let response = dispatcher.dispatch("read_sms_message_3").await?;

        assert!(matches!(response, Response::Device(ref text) if text.contains("Text: three")));
        assert_eq!(sim.calls(), vec![Endpoint::Read]);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_command_publishes_error_without_device_call() -> Result<(), Box<dyn std::error::Error>> {
        let sim = Arc::new(SimDevice::new());
        let (bus, dispatcher) = dispatcher_with(sim.clone());
        let mut responses = bus.subscribe_to(Channel::Response);

        dispatcher.dispatch("frobnicate").await?;

        let payload: serde_json::Value = serde_json::from_str(&responses.recv().await?.payload)?;
        assert_eq!(payload, serde_json::json!({ "error": "Unknown command" }));
        assert!(sim.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_command_publishes_error() -> Result<(), Box<dyn std::error::Error>> {
        let sim = Arc::new(SimDevice::new());
        let (bus, dispatcher) = dispatcher_with(sim.clone());
        let mut responses = bus.subscribe_to(Channel::Response);

        dispatcher.dispatch("send_sms_message:nobody").await?;

        let payload: serde_json::Value = serde_json::from_str(&responses.recv().await?.payload)?;
        let message = payload["error"].as_str().unwrap_or_default();
        assert!(message.starts_with("Malformed command"), "got {message}");
        assert!(sim.sent().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn device_failure_is_forwarded_as_error() -> Result<(), Box<dyn std::error::Error>> {
        let sim = Arc::new(SimDevice::new());
        sim.set_list_fails(true);
        let (bus, dispatcher) = dispatcher_with(sim);
        let mut responses = bus.subscribe_to(Channel::Response);

        let response = dispatcher.dispatch("get_sms_message_list").await?;

        assert!(response.is_error());
        let payload: serde_json::Value = serde_json::from_str(&responses.recv().await?.payload)?;
        assert!(payload["error"].as_str().unwrap_or_default().contains("503"));
        Ok(())
    }

    #[tokio::test]
    async fn dispatch_without_listener_reports_bus_error() {
        let (_bus, dispatcher) = dispatcher_with(Arc::new(SimDevice::new()));
        let result = dispatcher.dispatch("read_sms_totalmsg").await;
        assert!(matches!(result, Err(SmsError::Bus(_))));
    }

    #[tokio::test]
    async fn serve_answers_each_command_once_until_shutdown() -> Result<(), Box<dyn std::error::Error>> {
        let sim = Arc::new(SimDevice::new());
        let (bus, dispatcher) = dispatcher_with(sim);
        let dispatcher = Arc::new(dispatcher);
        let mut responses = bus.subscribe_to(Channel::Response);
        let shutdown = crate::shutdown::Shutdown::new();

        let commands = bus.command_stream().await;
        let server = {
            let dispatcher = Arc::clone(&dispatcher);
            let listener = shutdown.listener();
            tokio::spawn(async move { dispatcher.serve(commands, listener).await })
        };

        bus.send_command("read_sms_totalmsg")?;
        bus.send_command("frobnicate")?;

        assert!(responses.recv().await?.payload.contains("Used: 0"));
        assert!(responses.recv().await?.payload.contains("Unknown command"));

        shutdown.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), server).await??;
        assert!(responses.try_recv().is_none());
        Ok(())
    }
}

//! MQTT transport for the gateway.
//!
//! [`MqttAdapter::new`] returns two halves:
//!
//! * the [`MqttAdapter`] itself – a cheap handle implementing
//!   [`BusAdapter`], used by the gateway core to publish responses and
//!   incoming messages and to read inbound commands;
//! * an [`MqttConnection`] – owns the `rumqttc` event loop and must be driven
//!   by [`MqttConnection::run`] on its own task.  It (re)subscribes to the
//!   command topic on every `ConnAck` and forwards command publishes to the
//!   adapter's command stream.
//!
//! Publications use QoS 1 and are never retained.  The adapter only accepts
//! a publication while the broker connection is up: `rumqttc` would
//! otherwise queue it and report success, and the ingester would then
//! acknowledge a message the broker never saw.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS};
use smsgw_types::{Channel, SmsError};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::adapter::BusAdapter;

/// Capacity of the request queue between [`AsyncClient`] and the event loop.
const CLIENT_QUEUE_CAPACITY: usize = 100;

/// Capacity of the inbound command queue.
const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Pause between reconnect attempts once the first connection succeeded.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum BusError {
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

impl From<BusError> for SmsError {
    fn from(e: BusError) -> Self {
        SmsError::Bus(e.to_string())
    }
}

/// Topic names for the three logical channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMap {
    pub command: String,
    pub response: String,
    pub incoming: String,
}

impl TopicMap {
    /// All three topics under `prefix` (`<prefix>/command`, ...).
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            command: format!("{prefix}/command"),
            response: format!("{prefix}/response"),
            incoming: format!("{prefix}/incoming"),
        }
    }

    pub fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Command => &self.command,
            Channel::Response => &self.response,
            Channel::Incoming => &self.incoming,
        }
    }
}

impl Default for TopicMap {
    fn default() -> Self {
        Self::with_prefix("smsgw01")
    }
}

/// Broker connection settings.
#[derive(Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub topics: TopicMap,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "smsgw".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            topics: TopicMap::default(),
        }
    }
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .field("keep_alive", &self.keep_alive)
            .field("topics", &self.topics)
            .finish()
    }
}

impl MqttConfig {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(user) = &self.username {
            options.set_credentials(user, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

/// [`BusAdapter`] over an MQTT broker.
pub struct MqttAdapter {
    client: AsyncClient,
    topics: TopicMap,
    commands: Mutex<Option<mpsc::Receiver<String>>>,
    connected: watch::Receiver<bool>,
}

impl MqttAdapter {
    /// Build the adapter and its connection.  Nothing touches the network
    /// until [`MqttConnection::run`] is polled.
    pub fn new(config: &MqttConfig) -> (Self, MqttConnection) {
        let (client, eventloop) = AsyncClient::new(config.options(), CLIENT_QUEUE_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(false);
        let adapter = Self {
            client: client.clone(),
            topics: config.topics.clone(),
            commands: Mutex::new(Some(command_rx)),
            connected: connected_rx,
        };
        let connection = MqttConnection {
            client,
            eventloop,
            topics: config.topics.clone(),
            command_tx,
            connected: connected_tx,
        };
        (adapter, connection)
    }

    /// Whether the broker has acknowledged the current connection.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Resolve once the broker has acknowledged a connection.  Returns
    /// `false` if the connection half was dropped first.
    pub async fn wait_connected(&self) -> bool {
        let mut connected = self.connected.clone();
        connected.wait_for(|up| *up).await.is_ok()
    }

    /// Ask the broker connection to close.  [`MqttConnection::run`] returns
    /// once the disconnect has been sent, after any queued publications.
    pub async fn disconnect(&self) -> Result<(), BusError> {
        self.client.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl BusAdapter for MqttAdapter {
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), SmsError> {
        let topic = self.topics.topic(channel);
        if !self.is_connected() {
            return Err(SmsError::Bus(format!("not connected to broker; {topic} publish refused")));
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(BusError::from)?;
        debug!(%topic, "queued mqtt publish");
        Ok(())
    }

    async fn command_stream(&self) -> BoxStream<'static, String> {
        match self.commands.lock().await.take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|cmd| (cmd, rx))
            })
            .boxed(),
            None => {
                warn!("mqtt command stream already taken");
                stream::empty().boxed()
            }
        }
    }
}

/// The event-loop half of an [`MqttAdapter`].
pub struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: TopicMap,
    command_tx: mpsc::Sender<String>,
    connected: watch::Sender<bool>,
}

impl MqttConnection {
    /// Drive the MQTT event loop until the adapter disconnects.
    ///
    /// # Errors
    ///
    /// Fails with [`BusError::Connection`] if the very first connection
    /// attempt fails.  Later connection errors are logged and retried every
    /// few seconds.
    pub async fn run(mut self) -> Result<(), BusError> {
        let mut connected_once = false;
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    connected_once = true;
                    self.connected.send_replace(true);
                    info!(code = ?ack.code, "connected to mqtt broker");
                    // try_subscribe: the event loop is the queue's consumer.
                    if let Err(e) = self
                        .client
                        .try_subscribe(self.topics.command.as_str(), QoS::AtLeastOnce)
                    {
                        error!(error = %e, "failed to subscribe to command topic");
                    } else {
                        info!(topic = %self.topics.command, "subscribed to command topic");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(command) = command_from_publish(&self.topics, &publish) {
                        debug!(%command, "command received");
                        forward_command(&self.command_tx, command);
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.connected.send_replace(false);
                    info!("mqtt connection closed");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.send_replace(false);
                    if !connected_once {
                        return Err(e.into());
                    }
                    error!(error = %e, "mqtt connection error; retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

/// Hand `command` to the dispatcher without blocking the event loop.
/// Returns `false` if the command was dropped.
fn forward_command(tx: &mpsc::Sender<String>, command: String) -> bool {
    match tx.try_send(command) {
        Ok(()) => true,
        Err(TrySendError::Full(command)) => {
            warn!(%command, capacity = COMMAND_QUEUE_CAPACITY, "command queue full; dropping command");
            false
        }
        Err(TrySendError::Closed(_)) => {
            warn!("command receiver dropped; ignoring command");
            false
        }
    }
}

/// Extract the command string from a publish on the command topic.
fn command_from_publish(topics: &TopicMap, publish: &Publish) -> Option<String> {
    if publish.topic != topics.command {
        return None;
    }
    Some(String::from_utf8_lossy(&publish.payload).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topics_match_gateway_prefix() {
        let topics = TopicMap::default();
        assert_eq!(topics.topic(Channel::Command), "smsgw01/command");
        assert_eq!(topics.topic(Channel::Response), "smsgw01/response");
        assert_eq!(topics.topic(Channel::Incoming), "smsgw01/incoming");
    }

    #[test]
    fn prefix_trailing_slash_is_ignored() {
        assert_eq!(TopicMap::with_prefix("site/a/").incoming, "site/a/incoming");
    }

    #[test]
    fn config_debug_redacts_password() {
        let config = MqttConfig {
            username: Some("bridge".to_string()),
            password: Some("s3cret".to_string()),
            ..MqttConfig::default()
        };
        let debug_str = format!("{config:?}");
        assert!(!debug_str.contains("s3cret"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn options_carry_broker_and_credentials() {
        let config = MqttConfig {
            host: "broker.lan".to_string(),
            port: 1884,
            client_id: "smsgw-test".to_string(),
            username: Some("bridge".to_string()),
            password: Some("s3cret".to_string()),
            keep_alive: Duration::from_secs(30),
            topics: TopicMap::default(),
        };
        let options = config.options();
        assert_eq!(options.broker_address(), ("broker.lan".to_string(), 1884));
        assert_eq!(options.client_id(), "smsgw-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.credentials().is_some());
    }

    #[test]
    fn only_command_topic_publishes_become_commands() {
        let topics = TopicMap::default();
        let command = Publish::new("smsgw01/command", QoS::AtLeastOnce, "read_sms_message_3");
        let other = Publish::new("smsgw01/response", QoS::AtLeastOnce, "\"OK\"");

        assert_eq!(
            command_from_publish(&topics, &command).as_deref(),
            Some("read_sms_message_3")
        );
        assert_eq!(command_from_publish(&topics, &other), None);
    }

    #[tokio::test]
    async fn command_stream_is_handed_out_once() {
        let (adapter, connection) = MqttAdapter::new(&MqttConfig::default());
        connection.command_tx.send("read_sms_totalmsg".to_string()).await.unwrap();

        let mut first = adapter.command_stream().await;
        assert_eq!(first.next().await.as_deref(), Some("read_sms_totalmsg"));

        let mut second = adapter.command_stream().await;
        assert_eq!(second.next().await, None);
    }

    #[tokio::test]
    async fn publish_is_refused_while_disconnected() {
        let (adapter, connection) = MqttAdapter::new(&MqttConfig::default());
        assert!(!adapter.is_connected());
        let refused = adapter.publish(Channel::Incoming, "d+s+t+u".to_string()).await;
        assert!(matches!(refused, Err(SmsError::Bus(_))));

        connection.connected.send_replace(true);
        assert!(adapter.publish(Channel::Incoming, "d+s+t+u".to_string()).await.is_ok());

        // A dropped connection closes the gate again.
        connection.connected.send_replace(false);
        let refused = adapter.publish(Channel::Response, "\"OK\"".to_string()).await;
        assert!(matches!(refused, Err(SmsError::Bus(_))));
    }

    #[tokio::test]
    async fn wait_connected_follows_the_connection() {
        let (adapter, connection) = MqttAdapter::new(&MqttConfig::default());
        connection.connected.send_replace(true);
        assert!(adapter.wait_connected().await);

        let (adapter, connection) = MqttAdapter::new(&MqttConfig::default());
        drop(connection);
        assert!(!adapter.wait_connected().await);
    }

    #[tokio::test]
    async fn full_command_queue_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(forward_command(&tx, "read_sms_totalmsg".to_string()));
        assert!(!forward_command(&tx, "get_sms_message_list".to_string()));
        assert_eq!(rx.recv().await.as_deref(), Some("read_sms_totalmsg"));

        drop(rx);
        assert!(!forward_command(&tx, "read_sms_totalmsg".to_string()));
    }
}

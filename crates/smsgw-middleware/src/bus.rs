//! In-process [`EventBus`]: the gateway's bus without a broker.
//!
//! One broadcast lane per [`Channel`].  Every subscriber of a lane sees every
//! event published after it subscribed; a slow subscriber loses the oldest
//! events rather than holding up publishers.
//!
//! # Channels
//!
//! Traffic is partitioned into three [`Channel`] lanes:
//!
//! | Channel | Traffic |
//! |---|---|
//! | [`Channel::Command`] | Raw command strings from clients |
//! | [`Channel::Response`] | One JSON response per command |
//! | [`Channel::Incoming`] | `date+sender+text+status` for each new message |

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use smsgw_types::{Channel, Event, SmsError};
use tokio::sync::broadcast;
use tracing::warn;

use crate::adapter::BusAdapter;

/// Events buffered per lane before lagging subscribers start losing them.
const DEFAULT_CAPACITY: usize = 256;

/// `source` stamped on events published through [`BusAdapter::publish`].
const ADAPTER_SOURCE: &str = "smsgw-middleware::bus";

/// Clones share the same lanes.
#[derive(Clone, Debug)]
pub struct EventBus {
    command: broadcast::Sender<Event>,
    response: broadcast::Sender<Event>,
    incoming: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is per lane.
    pub fn new(capacity: usize) -> Self {
        let (command, _) = broadcast::channel(capacity);
        let (response, _) = broadcast::channel(capacity);
        let (incoming, _) = broadcast::channel(capacity);
        Self {
            command,
            response,
            incoming,
        }
    }

    /// Publish `event` to the given [`Channel`].
    ///
    /// Returns how many subscribers the event reached.
    ///
    /// # Errors
    ///
    /// Returns [`SmsError::Bus`] when nobody is subscribed to the channel:
    /// an event nobody received counts as not delivered.
    pub fn publish_to(&self, channel: Channel, event: Event) -> Result<usize, SmsError> {
        self.sender(channel)
            .send(event)
            .map_err(|_| SmsError::Bus(format!("no subscribers for channel {channel:?}")))
    }

    /// Subscribe to a specific [`Channel`].
    pub fn subscribe_to(&self, channel: Channel) -> TopicReceiver {
        TopicReceiver {
            channel,
            receiver: self.sender(channel).subscribe(),
        }
    }

    /// Inject a raw command string as if a client had sent it.
    pub fn send_command(&self, raw: impl Into<String>) -> Result<usize, SmsError> {
        self.publish_to(
            Channel::Command,
            Event::new(Channel::Command, "smsgw-middleware::client", raw),
        )
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<Event> {
        match channel {
            Channel::Command => &self.command,
            Channel::Response => &self.response,
            Channel::Incoming => &self.incoming,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl BusAdapter for EventBus {
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), SmsError> {
        self.publish_to(channel, Event::new(channel, ADAPTER_SOURCE, payload))
            .map(|_| ())
    }

    /// Every call subscribes afresh, so each caller sees every command
    /// published after the call.
    async fn command_stream(&self) -> BoxStream<'static, String> {
        let receiver = self.subscribe_to(Channel::Command);
        stream::unfold(receiver, |mut rx| async move {
            rx.next_event().await.map(|event| (event.payload, rx))
        })
        .boxed()
    }
}

/// Receiver for one lane, from [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    channel: Channel,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Next event on this lane.  `Lagged(n)` means `n` events were lost
    /// because this receiver fell behind; `Closed` means every sender is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Like [`recv`][Self::recv] but skips over lag, returning `None` only
    /// once the bus is closed.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(channel = ?self.channel, lagged_by = n, "bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// The [`Channel`] this receiver is bound to.
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

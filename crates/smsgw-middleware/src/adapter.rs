//! The Universal Adapter Pattern.
//!
//! The gateway core never speaks MQTT directly.  It hands payloads to a
//! [`BusAdapter`] tagged with a logical [`Channel`], and pulls inbound command
//! strings from the adapter's command stream.  Each adapter maps channels onto
//! its own addressing (MQTT topics, broadcast lanes, ...).
//!
//! - [`EventBus`][crate::bus::EventBus] – in-process broadcast bus.
//! - [`MqttAdapter`][crate::mqtt::MqttAdapter] – MQTT broker.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use smsgw_types::{Channel, SmsError};

/// Every bus transport must implement this trait.
///
/// # Contract
///
/// * `publish` – resolves once the transport has accepted the payload for
///   delivery on `channel`.  An `Err` means the payload was *not* accepted;
///   the ingester relies on this to decide whether a message may be
///   acknowledged on the device.
///
/// * `command_stream` – returns the live stream of raw command strings
///   received on the command channel.  Adapters backed by a single queue
///   hand the stream out once; later calls receive an empty stream.
#[async_trait]
pub trait BusAdapter: Send + Sync {
    /// Publish `payload` on the given logical channel.
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), SmsError>;

    /// Take the stream of inbound command payloads.
    async fn command_stream(&self) -> BoxStream<'static, String>;
}

//! `smsgw-middleware` – The Bus Edge
//!
//! Moves command, response and incoming-message payloads between the gateway
//! core and the outside world without caring what they mean.
//!
//! # Modules
//!
//! - [`adapter`] – the [`BusAdapter`] trait every transport implements.
//! - [`bus`] – [`EventBus`], an in-process publish/subscribe bus built on
//!   Tokio broadcast channels.  Used for tests and local wiring.
//! - [`mqtt`] – [`MqttAdapter`], the production transport over an MQTT
//!   broker (via `rumqttc`).

pub mod adapter;
pub mod bus;
pub mod mqtt;

pub use adapter::BusAdapter;
pub use bus::{EventBus, TopicReceiver};
pub use mqtt::{BusError, MqttAdapter, MqttConfig, MqttConnection, TopicMap};

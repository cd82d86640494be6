//! `smsgw-device` – The Device Edge
//!
//! Everything that talks to, or stands in for, the router's SMS API.
//!
//! # Modules
//!
//! - [`client`] – the [`DeviceClient`][client::DeviceClient] trait and its
//!   blocking HTTP implementation [`HttpDeviceClient`][client::HttpDeviceClient]
//!   for the `cgi-bin/sms_*` endpoints.
//! - [`parser`] – turns the record-separated `sms_list` text into
//!   [`Message`][smsgw_types::Message] values, dropping malformed records.
//! - [`sim`] – [`SimDevice`][sim::SimDevice], an in-memory device used by
//!   tests and dry runs.  It records every call and reports overlapping
//!   (re-entrant) calls.

pub mod client;
pub mod parser;
pub mod sim;

pub use client::{DeviceClient, DeviceCredentials, DeviceError, Endpoint, HttpDeviceClient};
pub use parser::{parse_message_list, RECORD_SEPARATOR};
pub use sim::SimDevice;

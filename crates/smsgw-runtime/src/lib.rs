//! `smsgw-runtime` – the gateway core.
//!
//! Bridges the router's request/response SMS API to the message bus.
//!
//! # Modules
//!
//! - [`session`] – [`DeviceSession`]: the one serialised path to the
//!   router.  Every device call holds its async lock for the full blocking
//!   request.
//! - [`dispatcher`] – [`CommandDispatcher`] and [`parse_command`]: command
//!   strings from the bus become device calls, and every command gets
//!   exactly one response.
//! - [`ingester`] – [`PollingIngester`]: lists the inbox on a fixed
//!   interval, publishes unseen messages and acknowledges them by deletion.
//! - [`processed`] – [`ProcessedSet`]: identifiers already forwarded and
//!   acknowledged.
//! - [`bridge`] – [`Bridge`]: owns all of the above and runs the command
//!   and poll tasks until shutdown.
//! - [`shutdown`] – [`Shutdown`]/[`ShutdownListener`].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP export.

pub mod bridge;
pub mod dispatcher;
pub mod ingester;
pub mod processed;
pub mod session;
pub mod shutdown;
pub mod telemetry;

pub use bridge::{Bridge, BridgeConfig};
pub use dispatcher::{CommandDispatcher, parse_command};
pub use ingester::{AckMode, CycleReport, DEFAULT_POLL_INTERVAL, IngesterConfig, PollingIngester};
pub use processed::ProcessedSet;
pub use session::DeviceSession;
pub use shutdown::{Shutdown, ShutdownListener};

//! [`PollingIngester`] – forwards newly arrived messages to the bus.
//!
//! Each cycle lists the inbox, publishes every message not yet in the
//! [`ProcessedSet`] on [`Channel::Incoming`], and acknowledges it by
//! deleting it from the router.  An identifier enters the set only after
//! the publish went through **and** the router confirmed the delete, so a
//! message whose acknowledgment fails is published again on a later cycle.
//! Delivery is at-least-once.

use std::sync::Arc;
use std::time::Duration;

use smsgw_device::parse_message_list;
use smsgw_middleware::BusAdapter;
use smsgw_types::{Channel, Message, SmsError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::processed::ProcessedSet;
use crate::session::DeviceSession;
use crate::shutdown::ShutdownListener;

/// Default period between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Marker the router puts in a successful `sms_delete` response.
const DELETE_CONFIRMATION: &str = "OK";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Which identifier a message is acknowledged (deleted and recorded) under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Delete each message by its own index and record that index.
    #[default]
    PerMessage,
    /// Delete and record the given fixed identifier for every message,
    /// whatever its index.  Kept for deployments that rely on the legacy
    /// gateway behaviour.
    Placeholder(u32),
}

impl AckMode {
    fn target(self, index: u32) -> u32 {
        match self {
            AckMode::PerMessage => index,
            AckMode::Placeholder(id) => id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngesterConfig {
    pub interval: Duration,
    pub ack_mode: AckMode,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            ack_mode: AckMode::default(),
        }
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records parsed from the list response.
    pub listed: usize,
    /// Events published on the incoming channel.
    pub published: usize,
    /// Deletes the router confirmed.
    pub acknowledged: usize,
    /// Messages skipped because their index was already processed.
    pub already_processed: usize,
    /// Messages whose publish failed; not deleted.
    pub unpublished: usize,
    /// Published messages whose delete failed or was not confirmed.
    pub unacknowledged: usize,
    /// Records without a usable index.
    pub unindexed: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// PollingIngester
// ─────────────────────────────────────────────────────────────────────────────

pub struct PollingIngester {
    session: DeviceSession,
    bus: Arc<dyn BusAdapter>,
    processed: ProcessedSet,
    config: IngesterConfig,
}

impl PollingIngester {
    pub fn new(
        session: DeviceSession,
        bus: Arc<dyn BusAdapter>,
        processed: ProcessedSet,
        config: IngesterConfig,
    ) -> Self {
        Self {
            session,
            bus,
            processed,
            config,
        }
    }

    /// Read-only handle on the identifiers this ingester has acknowledged.
    pub fn processed(&self) -> ProcessedSet {
        self.processed.clone()
    }

    /// Run one cycle.
    ///
    /// # Errors
    ///
    /// [`SmsError::Device`] if the list could not be fetched.  Nothing was
    /// published and the processed set is unchanged.  Failures on individual
    /// messages are counted in the report, not returned.
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<CycleReport, SmsError> {
        let raw = self
            .session
            .list_messages()
            .await
            .map_err(|e| SmsError::Device(e.to_string()))?;
        let messages = parse_message_list(&raw);

        let mut report = CycleReport {
            listed: messages.len(),
            ..CycleReport::default()
        };
        for message in &messages {
            self.forward(message, &mut report).await;
        }
        Ok(report)
    }

    async fn forward(&self, message: &Message, report: &mut CycleReport) {
        let Some(index) = message.index else {
            warn!(sender = %message.sender, date = %message.date, "message without index; skipping");
            report.unindexed += 1;
            return;
        };
        if self.processed.contains(index) {
            report.already_processed += 1;
            return;
        }

        if let Err(e) = self
            .bus
            .publish(Channel::Incoming, message.to_event_payload())
            .await
        {
            warn!(index, error = %e, "failed to publish incoming message");
            report.unpublished += 1;
            return;
        }
        report.published += 1;

        let target = self.config.ack_mode.target(index);
        match self.session.delete_message(target).await {
            Ok(body) if body.contains(DELETE_CONFIRMATION) => {
                self.processed.insert(target);
                report.acknowledged += 1;
                debug!(index, target, "message acknowledged");
            }
            Ok(body) => {
                warn!(index, target, response = %body.trim(), "delete not confirmed");
                report.unacknowledged += 1;
            }
            Err(e) => {
                warn!(index, target, error = %e, "delete failed");
                report.unacknowledged += 1;
            }
        }
    }

    /// Poll every `interval` until shutdown.  Shutdown is only observed
    /// between cycles.
    pub async fn run(self, mut shutdown: ShutdownListener) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.config.interval, ack_mode = ?self.config.ack_mode, "polling ingester started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.poll_once().await {
                Ok(report) if report.published > 0 || report.unacknowledged > 0 => {
                    info!(?report, "poll cycle complete");
                }
                Ok(report) => debug!(?report, "poll cycle complete"),
                Err(e) => warn!(error = %e, "poll cycle skipped"),
            }
        }
        info!(processed = self.processed.len(), "polling ingester stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

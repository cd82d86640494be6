//! [`Bridge`] – the gateway as one explicit value.
//!
//! Owns the shared [`DeviceSession`], the [`ProcessedSet`] and the bus
//! adapter, and runs two tasks over them until shutdown:
//!
//! * the **command task** feeds the adapter's command stream through the
//!   [`CommandDispatcher`], one command at a time;
//! * the **poll task** drives the [`PollingIngester`] on its timer.
//!
//! Both reach the router only through the session lock, so a command and a
//! poll cycle never talk to the device at the same time.

use std::sync::Arc;
use std::time::Duration;

use smsgw_device::DeviceClient;
use smsgw_middleware::BusAdapter;
use smsgw_types::ResponseEncoding;
use tracing::{error, info};

use crate::dispatcher::CommandDispatcher;
use crate::ingester::{AckMode, DEFAULT_POLL_INTERVAL, IngesterConfig, PollingIngester};
use crate::processed::ProcessedSet;
use crate::session::DeviceSession;
use crate::shutdown::ShutdownListener;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub poll_interval: Duration,
    pub ack_mode: AckMode,
    pub response_encoding: ResponseEncoding,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            ack_mode: AckMode::default(),
            response_encoding: ResponseEncoding::default(),
        }
    }
}

pub struct Bridge {
    bus: Arc<dyn BusAdapter>,
    processed: ProcessedSet,
    dispatcher: Arc<CommandDispatcher>,
    ingester: PollingIngester,
}

impl Bridge {
    pub fn new(device: Arc<dyn DeviceClient>, bus: Arc<dyn BusAdapter>, config: BridgeConfig) -> Self {
        let session = DeviceSession::new(device);
        let processed = ProcessedSet::new();
        let dispatcher = Arc::new(CommandDispatcher::new(
            session.clone(),
            Arc::clone(&bus),
            config.response_encoding,
        ));
        let ingester = PollingIngester::new(
            session,
            Arc::clone(&bus),
            processed.clone(),
            IngesterConfig {
                interval: config.poll_interval,
                ack_mode: config.ack_mode,
            },
        );
        Self {
            bus,
            processed,
            dispatcher,
            ingester,
        }
    }

    /// Read-only view of the acknowledged identifiers.
    pub fn processed(&self) -> ProcessedSet {
        self.processed.clone()
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn ingester(&self) -> &PollingIngester {
        &self.ingester
    }

    /// Run both tasks until `shutdown` fires, then wait for each to finish
    /// its in-flight work.
    pub async fn run(self, shutdown: ShutdownListener) {
        let commands = self.bus.command_stream().await;

        let command_task = {
            let dispatcher = Arc::clone(&self.dispatcher);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { dispatcher.serve(commands, shutdown).await })
        };
        let poll_task = tokio::spawn(self.ingester.run(shutdown));
        info!("bridge running");

        let (commands, polling) = tokio::join!(command_task, poll_task);
        for (task, result) in [("command", commands), ("poll", polling)] {
            if let Err(e) = result {
                error!(task, error = %e, "bridge task failed");
            }
        }
        info!(processed = self.processed.len(), "bridge stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use smsgw_device::SimDevice;
    use smsgw_middleware::EventBus;
    use smsgw_types::{Channel, Message};

    fn message(index: u32, text: &str) -> Message {
        Message {
            index: Some(index),
            date: "Tue Jan  9 08:00:00 2024".to_string(),
            sender: "+15550100".to_string(),
            text: text.to_string(),
            status: "unread".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn command_and_poll_never_overlap_on_device() -> Result<(), Box<dyn std::error::Error>> {
        let sim = Arc::new(
            SimDevice::new()
                .with_message(message(1, "one"))
                .with_message(message(2, "two"))
                .with_latency(Duration::from_millis(20)),
        );
        let bus = EventBus::default();
        let mut responses = bus.subscribe_to(Channel::Response);
        let mut incoming = bus.subscribe_to(Channel::Incoming);
        let bridge = Bridge::new(
            sim.clone(),
            Arc::new(bus.clone()),
            BridgeConfig {
                poll_interval: Duration::from_millis(5),
                ..BridgeConfig::default()
            },
        );
        let processed = bridge.processed();
        let shutdown = Shutdown::new();
        let running = tokio::spawn(bridge.run(shutdown.listener()));

        // The first command goes through once the command task has subscribed.
        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.send_command("read_sms_totalmsg").is_err() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await?;
        for _ in 0..4 {
            bus.send_command("read_sms_totalmsg")?;
        }
        for _ in 0..5 {
            bus.send_command("send_sms_message:+15550199+ping")?;
        }

        for _ in 0..10 {
            let response = tokio::time::timeout(Duration::from_secs(5), responses.recv()).await??;
            assert!(!response.payload.contains("error"), "got {}", response.payload);
        }
        for expected in ["+one+", "+two+"] {
            let event = tokio::time::timeout(Duration::from_secs(5), incoming.recv()).await??;
            assert!(event.payload.contains(expected));
        }

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), running).await??;

        assert_eq!(sim.overlaps(), 0);
        assert_eq!(sim.sent().len(), 5);
        assert!(processed.contains(1) && processed.contains(2));
        Ok(())
    }

    #[tokio::test]
    async fn accessors_share_state_with_running_parts() -> Result<(), Box<dyn std::error::Error>> {
        let sim = Arc::new(SimDevice::new().with_message(message(9, "nine")));
        let bus = EventBus::default();
        let _incoming = bus.subscribe_to(Channel::Incoming);
        let _responses = bus.subscribe_to(Channel::Response);
        let bridge = Bridge::new(sim, Arc::new(bus), BridgeConfig::default());

        bridge.ingester().poll_once().await?;
        assert!(bridge.processed().contains(9));

        let response = bridge.dispatcher().dispatch("read_sms_totalmsg").await?;
        assert!(!response.is_error());
        Ok(())
    }
}

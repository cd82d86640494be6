//! `smsgw` – SMS to MQTT gateway for Teltonika routers.
//!
//! 1. Initialises tracing (see `smsgw_runtime::telemetry`).
//! 2. Loads `~/.smsgw/config.toml` (or `$SMSGW_CONFIG`) plus `SMSGW_*`
//!    overrides.
//! 3. Connects to the broker and runs the [`Bridge`] until **Ctrl-C**, then
//!    lets the in-flight command and poll cycle finish and disconnects.
//!
//! Exits non-zero on bad configuration or when the broker cannot be reached
//! at startup.

mod config;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use smsgw_device::{DeviceClient, HttpDeviceClient};
use smsgw_middleware::{BusAdapter, BusError, MqttAdapter};
use smsgw_runtime::{Bridge, Shutdown, telemetry};
use smsgw_types::SmsError;
use tracing::{error, info, warn};

/// Upper bound on the broker disconnect at shutdown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    let _guard = telemetry::init_tracing("smsgw");

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gateway stopped");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), SmsError> {
    let cfg = config::load()?;
    cfg.validate()?;
    info!(path = %config::config_path().display(), config = ?cfg, "configuration loaded");

    // Built, and finally dropped, outside the async runtime: the blocking
    // HTTP client owns a runtime of its own.
    let device: Arc<dyn DeviceClient> = Arc::new(
        HttpDeviceClient::new(&cfg.device.address, cfg.device_credentials(), cfg.device_timeout())
            .map_err(|e| SmsError::Device(e.to_string()))?,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| SmsError::Config(format!("failed to start async runtime: {e}")))?;

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Ctrl-C received; shutting down");
            shutdown.trigger();
        }) {
            warn!(error = %e, "failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
        }
    }

    runtime.block_on(serve(Arc::clone(&device), &cfg, shutdown))
}

async fn serve(
    device: Arc<dyn DeviceClient>,
    cfg: &config::Config,
    shutdown: Shutdown,
) -> Result<(), SmsError> {
    let mqtt = cfg.mqtt_config();
    info!(host = %mqtt.host, port = mqtt.port, client_id = %mqtt.client_id, "connecting to mqtt broker");
    let (adapter, connection) = MqttAdapter::new(&mqtt);
    let adapter = Arc::new(adapter);
    let mut connection_task = tokio::spawn(connection.run());

    // Nothing touches the router until the broker has accepted us.
    let mut startup = shutdown.listener();
    let connected = tokio::select! {
        connected = adapter.wait_connected() => connected,
        _ = startup.cancelled() => {
            info!("shutdown requested before the broker connected");
            return Ok(());
        }
    };
    if !connected {
        return connection_outcome(connection_task.await);
    }

    let bus: Arc<dyn BusAdapter> = adapter.clone();
    let bridge = Bridge::new(device, bus, cfg.bridge_config());
    let mut bridge_task = tokio::spawn(bridge.run(shutdown.listener()));

    tokio::select! {
        ended = &mut connection_task => {
            shutdown.trigger();
            if let Err(e) = bridge_task.await {
                error!(error = %e, "bridge task failed");
            }
            return connection_outcome(ended);
        }
        finished = &mut bridge_task => {
            if let Err(e) = finished {
                error!(error = %e, "bridge task failed");
            }
        }
    }

    match tokio::time::timeout(DISCONNECT_TIMEOUT, adapter.disconnect()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "mqtt disconnect failed"),
        Err(_) => warn!("mqtt disconnect timed out"),
    }
    match tokio::time::timeout(DISCONNECT_TIMEOUT, connection_task).await {
        Ok(Ok(Err(e))) => warn!(error = %e, "mqtt connection closed with error"),
        Ok(Err(e)) => warn!(error = %e, "mqtt connection task failed"),
        Err(_) => warn!("mqtt connection did not close in time"),
        Ok(Ok(Ok(()))) => {}
    }
    info!("gateway stopped");
    Ok(())
}

/// Map a finished connection task to the process result.
fn connection_outcome(
    ended: Result<Result<(), BusError>, tokio::task::JoinError>,
) -> Result<(), SmsError> {
    match ended {
        Ok(Ok(())) => Err(SmsError::Bus("mqtt connection closed unexpectedly".to_string())),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(SmsError::Bus(e.to_string())),
    }
}

//! [`DeviceSession`] – the single, serialised path to the router.
//!
//! The router serves one request at a time and keeps per-session state, so
//! the command task and the poll task must never talk to it concurrently.
//! The session owns the [`DeviceClient`] behind an async mutex; the only way
//! to reach the client is [`DeviceSession::call`], which holds the lock for
//! the whole blocking request and runs it on Tokio's blocking pool.
//!
//! Waiting for the lock suspends only the calling task.

use std::sync::Arc;

use smsgw_device::{DeviceClient, DeviceError, Endpoint};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Cloneable handle; all clones share one lock and one client.
#[derive(Clone)]
pub struct DeviceSession {
    device: Arc<Mutex<Arc<dyn DeviceClient>>>,
}

impl DeviceSession {
    pub fn new(device: Arc<dyn DeviceClient>) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
        }
    }

    /// Run `op` against the client while holding the session exclusively.
    ///
    /// # Errors
    ///
    /// Whatever `op` returns, or [`DeviceError::Session`] if the blocking
    /// task panicked.
    #[instrument(level = "debug", skip_all, fields(%endpoint))]
    pub async fn call<T, F>(&self, endpoint: Endpoint, op: F) -> Result<T, DeviceError>
    where
        F: FnOnce(&dyn DeviceClient) -> Result<T, DeviceError> + Send + 'static,
        T: Send + 'static,
    {
        let guard = Arc::clone(&self.device).lock_owned().await;
        debug!("device session acquired");
        // The guard moves into the blocking task so the lock is released only
        // once the request has finished, even if this future is dropped.
        tokio::task::spawn_blocking(move || op(&**guard))
            .await
            .map_err(|e| DeviceError::Session(format!("{endpoint} task failed: {e}")))?
    }

    pub async fn list_messages(&self) -> Result<String, DeviceError> {
        self.call(Endpoint::List, |d| d.list_messages()).await
    }

    pub async fn read_message(&self, index: u32) -> Result<String, DeviceError> {
        self.call(Endpoint::Read, move |d| d.read_message(index)).await
    }

    pub async fn send_message(&self, number: String, text: String) -> Result<String, DeviceError> {
        self.call(Endpoint::Send, move |d| d.send_message(&number, &text))
            .await
    }

    pub async fn send_group_message(
        &self,
        group: String,
        text: String,
    ) -> Result<String, DeviceError> {
        self.call(Endpoint::Send, move |d| d.send_group_message(&group, &text))
            .await
    }

    pub async fn total_messages(&self) -> Result<String, DeviceError> {
        self.call(Endpoint::Total, |d| d.total_messages()).await
    }

    pub async fn delete_message(&self, index: u32) -> Result<String, DeviceError> {
        self.call(Endpoint::Delete, move |d| d.delete_message(index))
            .await
    }
}

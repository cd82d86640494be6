//! Process-wide shutdown signal shared by the poll and command tasks.
//!
//! [`Shutdown::trigger`] is synchronous so it can be called from a Ctrl-C
//! handler.  Tasks hold a [`ShutdownListener`] and check it between units
//! of work, never in the middle of one, so an in-flight poll cycle or
//! command finishes (acknowledgments included) before the task exits.

use std::sync::Arc;

use tokio::sync::watch;

/// The triggering side.  Clones share the same signal.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal every listener.  Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// The waiting side.
#[derive(Clone, Debug)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolve once shutdown has been triggered, or once every [`Shutdown`]
    /// handle is gone.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn listener_wakes_on_trigger() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();
        assert!(!listener.is_cancelled());

        let waiter = tokio::spawn(async move {
            listener.cancelled().await;
        });
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("listener must wake")
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn late_listener_sees_earlier_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut listener = shutdown.listener();
        assert!(listener.is_cancelled());
        tokio::time::timeout(Duration::from_millis(100), listener.cancelled())
            .await
            .expect("already-triggered listener resolves immediately");
    }

    #[tokio::test]
    async fn dropping_every_trigger_releases_listeners() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();
        drop(shutdown);
        tokio::time::timeout(Duration::from_millis(100), listener.cancelled())
            .await
            .expect("listener resolves once the signal is gone");
    }
}

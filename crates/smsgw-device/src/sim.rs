//! In-memory router simulation for tests and dry runs.
//!
//! [`SimDevice`] keeps an inbox of [`Message`] values and answers the
//! [`DeviceClient`] calls the way the router does: `sms_list` renders the
//! inbox as record-separated text, `sms_delete` answers `OK`, and so on.
//!
//! It is also instrumented.  Every call marks the device busy for the
//! configured latency; a call that arrives while another is still in flight
//! is counted as an overlap and rejected, which is how tests prove the
//! gateway serialises device access.
//!
//! # Example
//!
//! ```rust
//! use smsgw_device::{DeviceClient, SimDevice};
//! use smsgw_types::Message;
//!
//! let device = SimDevice::new().with_message(Message {
//!     index: Some(1),
//!     text: "Hello".into(),
//!     ..Message::default()
//! });
//!
//! assert!(device.list_messages().unwrap().contains("Text: Hello"));
//! assert_eq!(device.delete_message(1).unwrap(), "OK");
//! assert_eq!(device.inbox_len(), 0);
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use smsgw_types::Message;

use crate::client::{DeviceClient, DeviceError, Endpoint};
use crate::parser::RECORD_SEPARATOR;

/// Inbox capacity reported by `sms_total`.
const SIM_CAPACITY: usize = 30;

/// A message handed to `sms_send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Phone number or group name.
    pub destination: String,
    pub to_group: bool,
    pub text: String,
}

#[derive(Default)]
struct SimState {
    inbox: BTreeMap<u32, Message>,
    sent: Vec<SentMessage>,
    deleted: Vec<u32>,
    calls: Vec<Endpoint>,
    list_fails: bool,
    failing_deletes: HashSet<u32>,
    retain_deleted: bool,
}

/// Simulated router.  See the module docs.
#[derive(Default)]
pub struct SimDevice {
    state: Mutex<SimState>,
    latency: Duration,
    in_flight: AtomicBool,
    overlaps: AtomicUsize,
}

impl SimDevice {
    /// An empty, always-succeeding device with zero latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `message` to the inbox (builder-style).  Messages without an index
    /// are stored under the next free one.
    pub fn with_message(self, message: Message) -> Self {
        self.push_message(message);
        self
    }

    /// Hold each call for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make `sms_delete` for `index` fail with a transport error.
    pub fn with_failing_delete(self, index: u32) -> Self {
        self.state().failing_deletes.insert(index);
        self
    }

    /// Keep messages listed after a successful delete, as a router with a
    /// lagging inbox would.
    pub fn with_retained_deletes(self) -> Self {
        self.state().retain_deleted = true;
        self
    }

    /// Toggle `sms_list` failures at runtime.
    pub fn set_list_fails(&self, fails: bool) {
        self.state().list_fails = fails;
    }

    /// Deliver a new message into the inbox.
    pub fn push_message(&self, mut message: Message) {
        let mut state = self.state();
        let index = message.index.unwrap_or_else(|| {
            state.inbox.keys().next_back().map_or(0, |last| last + 1)
        });
        message.index = Some(index);
        state.inbox.insert(index, message);
    }

    pub fn inbox_len(&self) -> usize {
        self.state().inbox.len()
    }

    /// Everything handed to `sms_send`, oldest first.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.state().sent.clone()
    }

    /// Indices passed to successful `sms_delete` calls, oldest first.
    pub fn deleted(&self) -> Vec<u32> {
        self.state().deleted.clone()
    }

    /// Endpoints hit so far, oldest first.
    pub fn calls(&self) -> Vec<Endpoint> {
        self.state().calls.clone()
    }

    /// Number of calls that arrived while another call was in flight.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` as one device call, enforcing the single-request contract.
    fn call<F>(&self, endpoint: Endpoint, op: F) -> Result<String, DeviceError>
    where
        F: FnOnce(&mut SimState) -> Result<String, DeviceError>,
    {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
            return Err(DeviceError::Session(format!(
                "{endpoint} entered while another request was in flight"
            )));
        }
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        let result = {
            let mut state = self.state();
            state.calls.push(endpoint);
            op(&mut state)
        };
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }
}

fn render_record(message: &Message) -> String {
    format!(
        "Index: {}\nDate: {}\nSender: {}\nText: {}\nStatus: {}\n",
        message.index.unwrap_or_default(),
        message.date,
        message.sender,
        message.text,
        message.status
    )
}

impl DeviceClient for SimDevice {
    fn list_messages(&self) -> Result<String, DeviceError> {
        self.call(Endpoint::List, |state| {
            if state.list_fails {
                return Err(DeviceError::Status {
                    endpoint: Endpoint::List.to_string(),
                    status: 503,
                });
            }
            Ok(state
                .inbox
                .values()
                .map(|m| format!("{}{RECORD_SEPARATOR}\n", render_record(m)))
                .collect())
        })
    }

    fn read_message(&self, index: u32) -> Result<String, DeviceError> {
        self.call(Endpoint::Read, |state| {
            Ok(state
                .inbox
                .get(&index)
                .map(render_record)
                .unwrap_or_else(|| "Message not found".to_string()))
        })
    }

    fn send_message(&self, number: &str, text: &str) -> Result<String, DeviceError> {
        self.call(Endpoint::Send, |state| {
            state.sent.push(SentMessage {
                destination: number.to_string(),
                to_group: false,
                text: text.to_string(),
            });
            Ok("OK".to_string())
        })
    }

    fn send_group_message(&self, group: &str, text: &str) -> Result<String, DeviceError> {
        self.call(Endpoint::Send, |state| {
            state.sent.push(SentMessage {
                destination: group.to_string(),
                to_group: true,
                text: text.to_string(),
            });
            Ok("OK".to_string())
        })
    }

    fn total_messages(&self) -> Result<String, DeviceError> {
        self.call(Endpoint::Total, |state| {
            Ok(format!("Used: {}\nTotal: {SIM_CAPACITY}", state.inbox.len()))
        })
    }

    fn delete_message(&self, index: u32) -> Result<String, DeviceError> {
        self.call(Endpoint::Delete, |state| {
            if state.failing_deletes.contains(&index) {
                return Err(DeviceError::Transport {
                    endpoint: Endpoint::Delete.to_string(),
                    details: "simulated connection reset".to_string(),
                });
            }
            if !state.inbox.contains_key(&index) {
                return Ok("ERROR".to_string());
            }
            if !state.retain_deleted {
                state.inbox.remove(&index);
            }
            state.deleted.push(index);
            Ok("OK".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_message_list;
    use std::sync::Arc;

    fn message(index: u32, text: &str) -> Message {
        Message {
            index: Some(index),
            date: "Mon Jan  8 10:21:03 2024".to_string(),
            sender: "+491701234567".to_string(),
            text: text.to_string(),
            status: "unread".to_string(),
        }
    }

    #[test]
    fn list_output_parses_back_to_inbox() {
        let device = SimDevice::new()
            .with_message(message(1, "first"))
            .with_message(message(2, "second"));
        let parsed = parse_message_list(&device.list_messages().unwrap());
        assert_eq!(parsed, vec![message(1, "first"), message(2, "second")]);
    }

    #[test]
    fn delete_removes_and_records() {
        let device = SimDevice::new().with_message(message(4, "bye"));
        assert_eq!(device.delete_message(4).unwrap(), "OK");
        assert_eq!(device.inbox_len(), 0);
        assert_eq!(device.deleted(), vec![4]);
        // Second delete finds nothing.
        assert_eq!(device.delete_message(4).unwrap(), "ERROR");
    }

    #[test]
    fn retained_deletes_stay_listed() {
        let device = SimDevice::new()
            .with_message(message(7, "sticky"))
            .with_retained_deletes();
        assert_eq!(device.delete_message(7).unwrap(), "OK");
        assert_eq!(device.inbox_len(), 1);
    }

    #[test]
    fn failing_delete_is_transport_error() {
        let device = SimDevice::new()
            .with_message(message(7, "stuck"))
            .with_failing_delete(7);
        assert!(matches!(
            device.delete_message(7),
            Err(DeviceError::Transport { .. })
        ));
        assert_eq!(device.inbox_len(), 1);
        assert!(device.deleted().is_empty());
    }

    #[test]
    fn list_failure_can_be_toggled() {
        let device = SimDevice::new();
        device.set_list_fails(true);
        assert!(device.list_messages().is_err());
        device.set_list_fails(false);
        assert!(device.list_messages().is_ok());
    }

    #[test]
    fn sends_are_recorded() {
        let device = SimDevice::new();
        device.send_message("491701234567", "Hello").unwrap();
        device.send_group_message("staff", "Meeting").unwrap();
        let sent = device.sent();
        assert_eq!(sent.len(), 2);
        assert!(!sent[0].to_group);
        assert_eq!(sent[1].destination, "staff");
        assert!(sent[1].to_group);
    }

    #[test]
    fn push_without_index_takes_next_free_slot() {
        let device = SimDevice::new().with_message(message(3, "three"));
        device.push_message(Message {
            text: "auto".to_string(),
            ..Message::default()
        });
        let parsed = parse_message_list(&device.list_messages().unwrap());
        assert_eq!(parsed.last().and_then(|m| m.index), Some(4));
    }

    #[test]
    fn overlapping_calls_are_detected() {
        let device = Arc::new(SimDevice::new().with_latency(Duration::from_millis(100)));
        let other = Arc::clone(&device);
        let handle = thread::spawn(move || other.total_messages());
        thread::sleep(Duration::from_millis(20));
        let second = device.list_messages();
        let first = handle.join().unwrap();

        assert!(first.is_ok());
        assert!(matches!(second, Err(DeviceError::Session(_))));
        assert_eq!(device.overlaps(), 1);
    }
}

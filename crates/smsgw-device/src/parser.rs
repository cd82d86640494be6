//! `sms_list` response parser.
//!
//! The router reports its inbox as blocks of `Key: value` lines separated by
//! a line of thirty dashes:
//!
//! ```text
//! Index: 1
//! Date: Mon Jan  8 10:21:03 2024
//! Sender: +491701234567
//! Text: Hello
//! Status: read
//! ------------------------------
//! Index: 2
//! ...
//! ```
//!
//! Keys are lower-cased and trimmed, values trimmed.  A block containing a
//! line without a colon is dropped on its own; the rest of the list still
//! parses.

use std::collections::BTreeMap;

use smsgw_types::Message;
use thiserror::Error;
use tracing::warn;

/// Separator between records in the `sms_list` output.
pub const RECORD_SEPARATOR: &str = "------------------------------";

/// A single record as `lower-cased key -> trimmed value`.
pub type Record = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("line {line:?} has no ':' separator")]
    MissingColon { line: String },
}

/// Parse the whole `sms_list` body into messages, in device order.
///
/// Blank blocks are skipped and malformed blocks are dropped with a warning.
pub fn parse_message_list(raw: &str) -> Vec<Message> {
    parse_records(raw).iter().map(message_from_record).collect()
}

/// Split `raw` into records without interpreting any field.
pub fn parse_records(raw: &str) -> Vec<Record> {
    raw.split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .filter_map(|block| match parse_record(block) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "dropping malformed sms_list record");
                None
            }
        })
        .collect()
}

/// Parse one record block.
///
/// # Errors
///
/// Returns [`RecordError::MissingColon`] for the first non-blank line that
/// has no `:`.
pub fn parse_record(block: &str) -> Result<Record, RecordError> {
    let mut record = Record::new();
    for line in block.lines().filter(|l| !l.trim().is_empty()) {
        let (key, value) = line.split_once(':').ok_or_else(|| RecordError::MissingColon {
            line: line.to_string(),
        })?;
        record.insert(key.trim().to_lowercase(), value.trim().to_string());
    }
    Ok(record)
}

/// Build a [`Message`] from a record.  Missing fields become empty strings;
/// an absent or non-numeric `index` becomes `None`.
pub fn message_from_record(record: &Record) -> Message {
    let field = |name: &str| record.get(name).cloned().unwrap_or_default();
    Message {
        index: record.get("index").and_then(|v| v.parse().ok()),
        date: field("date"),
        sender: field("sender"),
        text: field("text"),
        status: field("status"),
    }
}

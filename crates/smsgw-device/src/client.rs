//! Blocking client for the router's `cgi-bin/sms_*` HTTP API.
//!
//! Every endpoint is a plain `GET` that takes `username`/`password` query
//! parameters plus operation-specific ones, and answers with free text.  The
//! client hands that text back verbatim; it never retries and never interprets
//! the body.  A non-2xx status or any transport failure becomes a
//! [`DeviceError`].
//!
//! The client is not internally synchronised.  The router handles one request
//! at a time, so callers must serialise access (see `smsgw-runtime`'s
//! `DeviceSession`).

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by a [`DeviceClient`] call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The request never produced a response (DNS, connect, timeout, ...).
    #[error("transport error on {endpoint}: {details}")]
    Transport { endpoint: String, details: String },

    /// The device answered with a non-success status code.
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    /// The call could not be run on the serialised device session.
    #[error("device session unavailable: {0}")]
    Session(String),
}

/// The router endpoints used by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    List,
    Read,
    Send,
    Total,
    Delete,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::List => "sms_list",
            Endpoint::Read => "sms_read",
            Endpoint::Send => "sms_send",
            Endpoint::Total => "sms_total",
            Endpoint::Delete => "sms_delete",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One method per device capability.
///
/// Implementations block the calling thread until the device answers.
pub trait DeviceClient: Send + Sync {
    /// `sms_list` – every stored message, record-separated.
    fn list_messages(&self) -> Result<String, DeviceError>;

    /// `sms_read` – a single message by index.
    fn read_message(&self, index: u32) -> Result<String, DeviceError>;

    /// `sms_send` to a phone number.
    fn send_message(&self, number: &str, text: &str) -> Result<String, DeviceError>;

    /// `sms_send` to a phone-book group.
    fn send_group_message(&self, group: &str, text: &str) -> Result<String, DeviceError>;

    /// `sms_total` – storage usage counters.
    fn total_messages(&self) -> Result<String, DeviceError>;

    /// `sms_delete` – remove a message by index.
    fn delete_message(&self, index: u32) -> Result<String, DeviceError>;
}

/// Login used for every request.
#[derive(Clone)]
pub struct DeviceCredentials {
    pub username: String,
    pub password: Zeroizing<String>,
}

impl DeviceCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl fmt::Debug for DeviceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredentials")
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

/// [`DeviceClient`] over the router's HTTP API.
pub struct HttpDeviceClient {
    base_url: String,
    credentials: DeviceCredentials,
    client: reqwest::blocking::Client,
}

impl HttpDeviceClient {
    /// Create a client for the router at `address` (`"192.168.1.1"`,
    /// `"router.lan:8080"` or a full `http(s)://` URL).
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        address: &str,
        credentials: DeviceCredentials,
        timeout: Duration,
    ) -> Result<Self, DeviceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeviceError::Transport {
                endpoint: "client".to_string(),
                details: e.to_string(),
            })?;
        Ok(Self {
            base_url: base_url_for(address),
            credentials,
            client,
        })
    }

    /// `http://<address>/cgi-bin/`
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, endpoint: Endpoint, params: &[(&str, &str)]) -> Result<String, DeviceError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%endpoint, params = ?params, "device request");

        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("username", self.credentials.username.as_str()));
        query.push(("password", self.credentials.password.as_str()));

        let transport = |e: reqwest::Error| DeviceError::Transport {
            endpoint: endpoint.to_string(),
            details: e.without_url().to_string(),
        };

        let response = self.client.get(&url).query(&query).send().map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().map_err(transport)?;
        debug!(%endpoint, status = status.as_u16(), bytes = body.len(), "device response");
        Ok(body)
    }
}

impl DeviceClient for HttpDeviceClient {
    fn list_messages(&self) -> Result<String, DeviceError> {
        self.request(Endpoint::List, &[])
    }

    fn read_message(&self, index: u32) -> Result<String, DeviceError> {
        let index = index.to_string();
        self.request(Endpoint::Read, &[("number", index.as_str())])
    }

    fn send_message(&self, number: &str, text: &str) -> Result<String, DeviceError> {
        self.request(Endpoint::Send, &[("number", number), ("text", text)])
    }

    fn send_group_message(&self, group: &str, text: &str) -> Result<String, DeviceError> {
        self.request(Endpoint::Send, &[("group", group), ("text", text)])
    }

    fn total_messages(&self) -> Result<String, DeviceError> {
        self.request(Endpoint::Total, &[])
    }

    fn delete_message(&self, index: u32) -> Result<String, DeviceError> {
        let index = index.to_string();
        self.request(Endpoint::Delete, &[("number", index.as_str())])
    }
}

fn base_url_for(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{address}/cgi-bin/")
    } else {
        format!("http://{address}/cgi-bin/")
    }
}

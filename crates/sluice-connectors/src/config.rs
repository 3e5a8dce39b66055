//! Adapter kinds, option maps and per-adapter typed options.
//!
//! Options arrive as a flat `KEY = 'value'` list. Keys are
//! case-insensitive; each adapter kind parses the keys it understands
//! into a typed struct and rejects missing or malformed values.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// Built-in adapter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterKind {
    /// In-process queue fed by `push` or drained by `pop`.
    InMemoryQueue,
    /// TCP listener receiving JSON lines.
    NetServer,
    /// TCP client sending JSON lines.
    NetClient,
}

impl AdapterKind {
    /// SQL spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InMemoryQueue => "IN_MEMORY_QUEUE",
            Self::NetServer => "NET_SERVER",
            Self::NetClient => "NET_CLIENT",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN_MEMORY_QUEUE" => Ok(Self::InMemoryQueue),
            "NET_SERVER" => Ok(Self::NetServer),
            "NET_CLIENT" => Ok(Self::NetClient),
            other => Err(ConnectorError::ConfigurationError(format!(
                "unknown adapter type '{other}'"
            ))),
        }
    }
}

/// Lifecycle state of a reader or writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// Constructed, not yet opened.
    Created,
    /// Open and moving rows.
    Running,
    /// Closed normally.
    Closed,
    /// Stopped after an unrecoverable error.
    Failed,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "Created",
            Self::Running => "Running",
            Self::Closed => "Closed",
            Self::Failed => "Failed",
        })
    }
}

/// Case-insensitive `KEY -> value` options of an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AHashMap<String, String>", into = "AHashMap<String, String>")]
pub struct ConnectorOptions {
    properties: AHashMap<String, String>,
}

impl From<AHashMap<String, String>> for ConnectorOptions {
    fn from(map: AHashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<ConnectorOptions> for AHashMap<String, String> {
    fn from(options: ConnectorOptions) -> Self {
        options.properties
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ConnectorOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Self::default();
        for (k, v) in iter {
            options.set(k.as_ref(), v);
        }
        options
    }
}

impl ConnectorOptions {
    /// Empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, builder style.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets `key`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.properties
            .insert(key.trim().to_ascii_uppercase(), value.into());
    }

    /// Value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .get(&key.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Value of a required key.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::MissingConfig`] if absent.
    pub fn require(&self, key: &str) -> Result<&str, ConnectorError> {
        self.get(key)
            .ok_or_else(|| ConnectorError::MissingConfig(key.to_ascii_uppercase()))
    }

    /// Parses an optional key.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::ConfigurationError`] if present but unparsable.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConnectorError> {
        self.get(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|_| {
                    ConnectorError::ConfigurationError(format!(
                        "invalid value '{raw}' for {}",
                        key.to_ascii_uppercase()
                    ))
                })
            })
            .transpose()
    }

    /// Parses a required key.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::MissingConfig`] or
    /// [`ConnectorError::ConfigurationError`].
    pub fn parse_required<T: FromStr>(&self, key: &str) -> Result<T, ConnectorError> {
        self.parse(key)?
            .ok_or_else(|| ConnectorError::MissingConfig(key.to_ascii_uppercase()))
    }

    /// Number of options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// True when no option is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Options of an `IN_MEMORY_QUEUE` adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryQueueOptions {
    /// Queue name used by `push` / `pop`.
    pub name: String,
    /// Optional capacity override.
    pub capacity: Option<usize>,
}

impl InMemoryQueueOptions {
    /// Reads `NAME` and optional `CAPACITY`.
    ///
    /// # Errors
    ///
    /// Missing `NAME`, empty name, or non-numeric `CAPACITY`.
    pub fn from_options(options: &ConnectorOptions) -> Result<Self, ConnectorError> {
        let name = options.require("NAME")?.trim().to_owned();
        if name.is_empty() {
            return Err(ConnectorError::ConfigurationError(
                "NAME must not be empty".into(),
            ));
        }
        Ok(Self {
            name,
            capacity: options.parse("CAPACITY")?,
        })
    }
}

/// Transport protocol of the `NET_*` adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetProtocol {
    /// Newline-delimited JSON over TCP.
    Tcp,
}

impl FromStr for NetProtocol {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("TCP") {
            Ok(Self::Tcp)
        } else {
            Err(ConnectorError::ConfigurationError(format!(
                "unsupported PROTOCOL '{s}'"
            )))
        }
    }
}

/// Options of a `NET_SERVER` source reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetServerOptions {
    /// Protocol.
    pub protocol: NetProtocol,
    /// Bind host, `0.0.0.0` by default.
    pub host: String,
    /// Bind port; `0` lets the OS choose.
    pub port: u16,
    /// Concurrent client limit.
    pub max_connections: usize,
}

impl NetServerOptions {
    /// Reads `PROTOCOL`, `PORT` and optional `HOST`, `MAX_CONNECTIONS`.
    ///
    /// # Errors
    ///
    /// Missing or malformed option.
    pub fn from_options(options: &ConnectorOptions) -> Result<Self, ConnectorError> {
        Ok(Self {
            protocol: options.parse_required("PROTOCOL")?,
            host: options.get("HOST").unwrap_or("0.0.0.0").to_owned(),
            port: options.parse_required("PORT")?,
            max_connections: options.parse("MAX_CONNECTIONS")?.unwrap_or(64),
        })
    }

    /// `host:port` bind address.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Options of a `NET_CLIENT` sink writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetClientOptions {
    /// Protocol.
    pub protocol: NetProtocol,
    /// Remote host.
    pub remote_host: String,
    /// Remote port.
    pub remote_port: u16,
}

impl NetClientOptions {
    /// Reads `PROTOCOL`, `REMOTE_HOST` and `REMOTE_PORT`.
    ///
    /// # Errors
    ///
    /// Missing or malformed option.
    pub fn from_options(options: &ConnectorOptions) -> Result<Self, ConnectorError> {
        Ok(Self {
            protocol: options.parse_required("PROTOCOL")?,
            remote_host: options.require("REMOTE_HOST")?.trim().to_owned(),
            remote_port: options.parse_required("REMOTE_PORT")?,
        })
    }

    /// `host:port` of the remote server.
    #[must_use]
    pub fn remote_address(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}

/// Timeouts applied by the network adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetTimeouts {
    /// Connect timeout.
    pub connect: Duration,
    /// Per-write timeout.
    pub io: Duration,
}

impl Default for NetTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(1_000),
            io: Duration::from_millis(100),
        }
    }
}

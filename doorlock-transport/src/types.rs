//! Common types for transport layer

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Backend-specific device identifier (BLE address, simulator id, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Device reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Device identifier for `connect`
    pub id: DeviceId,
    /// Advertised local name (if any)
    pub name: Option<String>,
    /// Signal strength (RSSI)
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Exact advertised-name match (named targets)
    pub fn has_name(&self, target: &str) -> bool {
        self.name.as_deref() == Some(target)
    }

    /// Case-insensitive prefix match (generic discovery)
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        match &self.name {
            Some(name) => name
                .to_lowercase()
                .starts_with(prefix.to_lowercase().as_str()),
            None => false,
        }
    }
}

/// An established link
///
/// `id` is unique per transport instance, so a handle taken before a
/// reconnect never compares equal to the new link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    pub id: u64,
    pub device: DeviceId,
}

/// A GATT characteristic used as a byte channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub Uuid);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Write/notify channel pair of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPair {
    /// Command characteristic (byte writes)
    pub write: ChannelId,
    /// Notify characteristic (responses)
    pub notify: ChannelId,
}

impl ChannelPair {
    /// Build a pair, reusing the write channel when no notify channel exists
    pub fn new(write: ChannelId, notify: Option<ChannelId>) -> Self {
        Self {
            write,
            notify: notify.unwrap_or(write),
        }
    }

    /// True when notifications arrive on the write characteristic
    pub fn is_shared(&self) -> bool {
        self.write == self.notify
    }
}

/// Logical connection state exposed by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Events produced for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    /// One byte was accepted by the transport
    Progress {
        /// Byte that was written
        byte: u8,
        /// Bytes still queued
        remaining: usize,
    },
    /// Every byte of the packet was written
    Complete,
    /// Human-readable failure
    Error(String),
    /// The session changed connection state
    ConnectionStateChanged(ConnectionState),
}

//! Transport abstraction layer for OASYSS BLE door locks
//!
//! This crate provides everything below the session layer:
//!
//! - the `LockTransport` port every radio backend implements
//! - the wire codec (`command`) that turns operator intents into checksummed frames
//! - the `TransmissionEngine` that paces a frame across the link one byte at a time
//! - backends: BLE via btleplug (feature `bluetooth`) and an in-process simulator
//! - `MonitorTransport` middleware for printing link traffic

pub mod command;
pub mod error;
pub mod flow_control;
pub mod monitor;
pub mod protocol;
pub mod sim;
pub mod types;

#[cfg(feature = "bluetooth")]
pub mod bluetooth;

pub use command::{
    build_packet, describe_packet, parse_hex_input, parse_number_text, ClockReading,
    ClockSource, CommandCode, CommandError, CommandParams, EnrollmentParams, FixedClock, FrameShape,
    LockCommand, Packet, PacketSummary, RevokeParams, SystemClock,
};
pub use error::TransportError;
pub use flow_control::{SendOutcome, SendQueueItem, SendTiming, TransmissionEngine};
pub use monitor::{MonitorConfig, MonitorTransport};
pub use sim::SimulatedTransport;
pub use types::{
    ChannelId, ChannelPair, ConnectionState, DeviceId, DiscoveredDevice, LinkHandle, LockEvent,
};

#[cfg(feature = "bluetooth")]
pub use bluetooth::BleTransport;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

/// The radio port - every backend implements this
///
/// The port has no protocol logic of its own. Scan results and notifications
/// are delivered as channels; the session layer decides what to do with them.
#[async_trait]
pub trait LockTransport: Send + Sync {
    /// Check that the radio is usable (adapter present, powered)
    async fn initialize(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Start device discovery
    ///
    /// Every advertisement is forwarded to the returned receiver until
    /// `stop_scan` is called or the receiver is dropped.
    async fn start_scan(&self) -> Result<mpsc::Receiver<DiscoveredDevice>, TransportError>;

    /// Stop device discovery (no-op when not scanning)
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Establish a link to a discovered device
    ///
    /// # Arguments
    /// * `device` - Id reported by discovery
    /// * `timeout` - Upper bound for link establishment
    async fn connect(
        &self,
        device: &DeviceId,
        timeout: Duration,
    ) -> Result<LinkHandle, TransportError>;

    /// Resolve the write and notify channels of an established link
    ///
    /// Fails with `WriteChannelMissing` when the command characteristic is
    /// absent. A missing notify characteristic falls back to the write one.
    async fn resolve_channels(&self, link: &LinkHandle) -> Result<ChannelPair, TransportError>;

    /// Write a single byte to the write channel
    async fn write_byte(&self, channel: &ChannelId, byte: u8) -> Result<(), TransportError>;

    /// Subscribe to notifications on the notify channel
    ///
    /// Each received buffer is delivered as one `Vec<u8>`.
    async fn subscribe(&self, channel: &ChannelId)
        -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;

    /// Tear down a link
    async fn disconnect(&self, link: &LinkHandle) -> Result<(), TransportError>;

    /// Check if the transport still holds a live link
    async fn is_connected(&self) -> bool;
}

/// Type alias for a shared transport
pub type BoxedTransport = Arc<dyn LockTransport>;

/// Bring a radio link up and finish its setup
///
/// `connect` is bounded by `timeout`. If it times out, or `setup` fails
/// afterwards, `teardown` runs before the error is returned so the lock is
/// not left holding a half-open link. A teardown failure is only logged.
pub(crate) async fn establish_link<C, S, T>(
    timeout: Duration,
    connect: C,
    setup: S,
    teardown: T,
) -> Result<(), TransportError>
where
    C: Future<Output = Result<(), TransportError>>,
    S: Future<Output = Result<(), TransportError>>,
    T: Future<Output = Result<(), TransportError>>,
{
    let result = match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(())) => setup.await,
        Ok(Err(e)) => return Err(e),
        // The link may still come up after we stop waiting
        Err(_) => Err(TransportError::Timeout),
    };

    if let Err(e) = &result {
        if let Err(teardown_err) = teardown.await {
            warn!("Teardown after failed link setup ({}): {}", e, teardown_err);
        }
    }
    result
}

//! In-process lock simulator
//!
//! Implements `LockTransport` without a radio. Used as the `--simulate`
//! backend of the CLI and as the test double for the session layer.
//!
//! Simulated locks reassemble the bytes they receive into frames and, once a
//! complete frame with a valid checksum arrives, answer with the hang-up
//! notification `CC 81 <code> 00`. Devices added with `with_silent_device`
//! never answer, like the entrance door.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::protocol::{self, uuids, HANGUP_SIGNAL, HEADER};
use crate::types::{ChannelId, ChannelPair, DeviceId, DiscoveredDevice, LinkHandle};
use crate::{establish_link, LockTransport};

const NOTIFY_BUFFER: usize = 32;

#[derive(Debug, Clone)]
struct SimDevice {
    id: DeviceId,
    name: String,
    rssi: i16,
    replies: bool,
}

#[derive(Default)]
struct SimState {
    devices: Vec<SimDevice>,
    scan_tx: Option<mpsc::Sender<DiscoveredDevice>>,
    link: Option<LinkHandle>,
    notify_tx: Option<mpsc::Sender<Vec<u8>>>,
    rx_frame: Vec<u8>,
    written: Vec<u8>,
    write_attempts: usize,
    scripted_writes: VecDeque<bool>,
    failing_bytes: HashSet<u8>,
    connect_calls: usize,
    disconnect_calls: usize,
}

#[derive(Debug, Clone, Copy)]
struct SimOptions {
    adapter_available: bool,
    has_write_channel: bool,
    has_notify_channel: bool,
    subscribe_fails: bool,
    services_fail: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            adapter_available: true,
            has_write_channel: true,
            has_notify_channel: true,
            subscribe_fails: false,
            services_fail: false,
        }
    }
}

/// Simulated radio with a configurable set of locks
pub struct SimulatedTransport {
    state: Mutex<SimState>,
    options: SimOptions,
    next_link: AtomicU64,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    /// Empty radio: scans find nothing
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            options: SimOptions::default(),
            next_link: AtomicU64::new(1),
        }
    }

    /// Add a lock that acknowledges every complete frame
    pub fn with_device(self, name: &str) -> Self {
        self.add_device(name, true)
    }

    /// Add a lock that never sends notifications
    pub fn with_silent_device(self, name: &str) -> Self {
        self.add_device(name, false)
    }

    fn add_device(mut self, name: &str, replies: bool) -> Self {
        let state = self.state.get_mut();
        let index = state.devices.len();
        state.devices.push(SimDevice {
            id: DeviceId::new(format!("SIM-{index:02}")),
            name: name.to_string(),
            rssi: -40 - (index as i16 * 5),
            replies,
        });
        self
    }

    /// `initialize` fails as if no adapter were present
    pub fn without_adapter(mut self) -> Self {
        self.options.adapter_available = false;
        self
    }

    /// Links expose no command characteristic
    pub fn without_write_channel(mut self) -> Self {
        self.options.has_write_channel = false;
        self
    }

    /// Links expose no notify characteristic (notifications share the write one)
    pub fn without_notify_channel(mut self) -> Self {
        self.options.has_notify_channel = false;
        self
    }

    /// `subscribe` always fails
    pub fn with_subscribe_failure(mut self) -> Self {
        self.options.subscribe_fails = true;
        self
    }

    /// Links come up but service discovery fails
    pub fn with_service_discovery_failure(mut self) -> Self {
        self.options.services_fail = true;
        self
    }

    /// Script the outcome of the next write attempts (`false` = rejected);
    /// writes past the script succeed
    pub fn script_writes(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.state.lock().scripted_writes.extend(outcomes);
    }

    /// Reject every write of `byte`
    pub fn fail_byte(&self, byte: u8) {
        self.state.lock().failing_bytes.insert(byte);
    }

    /// Deliver a notification on the current subscription
    ///
    /// Returns false when nothing is subscribed.
    pub fn push_notification(&self, data: &[u8]) -> bool {
        let state = self.state.lock();
        match &state.notify_tx {
            Some(tx) => tx.try_send(data.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Drop the link from the lock's side
    pub fn drop_link(&self) {
        let mut state = self.state.lock();
        state.link = None;
        state.notify_tx = None;
        state.rx_frame.clear();
    }

    /// Bytes accepted so far, across all links
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Write attempts including rejected ones
    pub fn write_attempts(&self) -> usize {
        self.state.lock().write_attempts
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.lock().disconnect_calls
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scan_tx.is_some()
    }

    /// Link currently held, if any
    pub fn current_link(&self) -> Option<LinkHandle> {
        self.state.lock().link.clone()
    }

    fn channels(&self) -> (ChannelId, ChannelId) {
        (ChannelId(uuids::COMMAND), ChannelId(uuids::NOTIFY))
    }
}

/// Feed one accepted byte to the lock's frame reassembly; returns the reply to
/// send once a complete valid frame has arrived
fn absorb(frame: &mut Vec<u8>, byte: u8) -> Option<Vec<u8>> {
    if frame.is_empty() && byte != HEADER {
        return None;
    }
    frame.push(byte);
    if frame.len() < 2 || frame.len() < protocol::frame_len(frame[1]) {
        return None;
    }
    let complete = std::mem::take(frame);
    let (&sum, body) = complete.split_last()?;
    if protocol::checksum(body) != sum {
        return None;
    }
    Some(vec![HEADER, HANGUP_SIGNAL, complete[1], 0x00])
}

#[async_trait]
impl LockTransport for SimulatedTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        if self.options.adapter_available {
            Ok(())
        } else {
            Err(TransportError::AdapterUnavailable(
                "simulated adapter disabled".into(),
            ))
        }
    }

    async fn start_scan(&self) -> Result<mpsc::Receiver<DiscoveredDevice>, TransportError> {
        let mut state = self.state.lock();
        let (tx, rx) = mpsc::channel(state.devices.len().max(1));
        for device in &state.devices {
            // Capacity covers every device
            let _ = tx.try_send(DiscoveredDevice {
                id: device.id.clone(),
                name: Some(device.name.clone()),
                rssi: Some(device.rssi),
            });
        }
        // Keep the sender so the scan stays open until stop_scan
        state.scan_tx = Some(tx);
        debug!("Simulated scan started ({} devices)", state.devices.len());
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.state.lock().scan_tx = None;
        Ok(())
    }

    async fn connect(
        &self,
        device: &DeviceId,
        timeout: Duration,
    ) -> Result<LinkHandle, TransportError> {
        let link = LinkHandle {
            id: self.next_link.fetch_add(1, Ordering::Relaxed),
            device: device.clone(),
        };
        let radio_connect = async {
            let mut state = self.state.lock();
            state.connect_calls += 1;
            if !state.devices.iter().any(|d| &d.id == device) {
                return Err(TransportError::DeviceNotFound(device.to_string()));
            }
            state.link = Some(link.clone());
            state.notify_tx = None;
            state.rx_frame.clear();
            Ok(())
        };
        let discover_services = async {
            if self.options.services_fail {
                Err(TransportError::BluetoothError(
                    "simulated service discovery failure".into(),
                ))
            } else {
                Ok(())
            }
        };

        establish_link(
            timeout,
            radio_connect,
            discover_services,
            self.disconnect(&link),
        )
        .await?;
        debug!("Simulated link {} to {}", link.id, device);
        Ok(link)
    }

    async fn resolve_channels(&self, link: &LinkHandle) -> Result<ChannelPair, TransportError> {
        if self.state.lock().link.as_ref() != Some(link) {
            return Err(TransportError::NotConnected);
        }
        if !self.options.has_write_channel {
            return Err(TransportError::WriteChannelMissing);
        }
        let (write, notify) = self.channels();
        Ok(ChannelPair::new(
            write,
            self.options.has_notify_channel.then_some(notify),
        ))
    }

    async fn write_byte(&self, _channel: &ChannelId, byte: u8) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let Some(link) = state.link.clone() else {
            return Err(TransportError::NotConnected);
        };
        state.write_attempts += 1;

        let scripted_ok = state.scripted_writes.pop_front().unwrap_or(true);
        if !scripted_ok || state.failing_bytes.contains(&byte) {
            trace!("Simulated write of 0x{byte:02X} rejected");
            return Err(TransportError::WriteFailed(format!(
                "simulated rejection of 0x{byte:02X}"
            )));
        }
        state.written.push(byte);

        let replies = state
            .devices
            .iter()
            .any(|d| d.id == link.device && d.replies);
        if let Some(reply) = absorb(&mut state.rx_frame, byte) {
            if replies {
                if let Some(tx) = &state.notify_tx {
                    let _ = tx.try_send(reply);
                }
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _channel: &ChannelId,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        if self.options.subscribe_fails {
            return Err(TransportError::SubscribeFailed(
                "simulated CCCD write failure".into(),
            ));
        }
        let mut state = self.state.lock();
        if state.link.is_none() {
            return Err(TransportError::NotConnected);
        }
        let (tx, rx) = mpsc::channel(NOTIFY_BUFFER);
        state.notify_tx = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self, link: &LinkHandle) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.disconnect_calls += 1;
        if state.link.as_ref() == Some(link) {
            state.link = None;
            state.notify_tx = None;
            state.rx_frame.clear();
            debug!("Simulated link {} closed", link.id);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().link.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_replies_to_valid_frame() {
        let mut frame = Vec::new();
        let packet = [0xCC, 0x02, 0, 0, 0, 0, 0, 0, 0, 0xCE];
        let mut reply = None;
        for byte in packet {
            reply = absorb(&mut frame, byte);
        }
        assert_eq!(reply, Some(vec![0xCC, 0x81, 0x02, 0x00]));
        assert!(frame.is_empty());
    }

    #[test]
    fn test_absorb_ignores_bad_checksum_and_noise() {
        let mut frame = Vec::new();
        assert_eq!(absorb(&mut frame, 0x00), None);
        assert!(frame.is_empty());

        let mut reply = None;
        for byte in [0xCC, 0x02, 0, 0, 0, 0, 0, 0, 0, 0x00] {
            reply = absorb(&mut frame, byte);
        }
        assert_eq!(reply, None);
        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn test_scan_lists_devices_until_stopped() {
        let sim = SimulatedTransport::new()
            .with_device("unist_101")
            .with_silent_device("oasyss_0009999");
        let mut rx = sim.start_scan().await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.id.as_str(), "SIM-00");
        assert!(first.has_name("unist_101"));
        assert!(rx.recv().await.unwrap().has_name("oasyss_0009999"));
        assert!(sim.is_scanning());

        sim.stop_scan().await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_notify_channel_falls_back_to_write() {
        let sim = SimulatedTransport::new()
            .with_device("lock")
            .without_notify_channel();
        let link = sim
            .connect(&DeviceId::new("SIM-00"), Duration::from_secs(1))
            .await
            .unwrap();
        let channels = sim.resolve_channels(&link).await.unwrap();
        assert!(channels.is_shared());
    }

    #[tokio::test]
    async fn test_connect_unknown_device() {
        let sim = SimulatedTransport::new();
        let err = sim
            .connect(&DeviceId::new("nope"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::DeviceNotFound(_)));
        assert_eq!(sim.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_service_discovery_closes_link() {
        let sim = SimulatedTransport::new()
            .with_device("lock")
            .with_service_discovery_failure();
        let err = sim
            .connect(&DeviceId::new("SIM-00"), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::BluetoothError(_)));
        assert_eq!(sim.connect_calls(), 1);
        assert_eq!(sim.disconnect_calls(), 1);
        assert_eq!(sim.current_link(), None);
        assert!(!sim.is_connected().await);
    }
}

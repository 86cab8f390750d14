//! MonitorTransport middleware for watching link traffic
//!
//! Wraps any `LockTransport` and prints what passes through it to stderr:
//! outgoing bytes are reassembled into frames and decoded, incoming
//! notifications are printed as they arrive.
//!
//! # Example
//!
//! ```ignore
//! use doorlock_transport::{MonitorConfig, MonitorTransport, SimulatedTransport};
//!
//! let sim = Arc::new(SimulatedTransport::new().with_device("unist_101"));
//! let monitored = MonitorTransport::wrap(sim, MonitorConfig::default().with_hex(true));
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossterm::style::Stylize;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::command::describe_packet;
use crate::protocol::{self, cmd, HEADER};
use crate::types::{ChannelId, ChannelPair, DeviceId, DiscoveredDevice, LinkHandle};
use crate::{BoxedTransport, LockTransport, TransportError};

/// Configuration for the MonitorTransport
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorConfig {
    /// Show raw hex dump alongside decoded output
    pub show_hex: bool,
}

impl MonitorConfig {
    pub fn with_hex(mut self, show: bool) -> Self {
        self.show_hex = show;
        self
    }
}

/// Transport middleware that prints all frames and notifications
pub struct MonitorTransport {
    inner: BoxedTransport,
    config: MonitorConfig,
    tx_frame: Mutex<Vec<u8>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorTransport {
    /// Wrap a transport with printing middleware
    pub fn wrap(transport: BoxedTransport, config: MonitorConfig) -> BoxedTransport {
        Arc::new(Self {
            inner: transport,
            config,
            tx_frame: Mutex::new(Vec::new()),
            forwarder: Mutex::new(None),
        })
    }

    /// Track an accepted byte; returns the frame once it is complete
    fn track_tx(&self, byte: u8) -> Option<Vec<u8>> {
        let mut frame = self.tx_frame.lock();
        if frame.is_empty() && byte != HEADER {
            return Some(vec![byte]);
        }
        frame.push(byte);
        if frame.len() >= 2 && frame.len() >= protocol::frame_len(frame[1]) {
            Some(std::mem::take(&mut *frame))
        } else {
            None
        }
    }

    fn print_frame(config: &MonitorConfig, frame: &[u8]) {
        match describe_packet(frame) {
            Some(s) => {
                let check = if s.checksum_valid {
                    "ok".green()
                } else {
                    "BAD".red().bold()
                };
                eprintln!(
                    "{} {}  0x{:02X} {} sum={:02X} {}",
                    ">>>".cyan(),
                    "TX".cyan().bold(),
                    s.code,
                    s.name.yellow(),
                    s.checksum,
                    check
                );
            }
            None => {
                eprintln!(
                    "{} {}  {} {}",
                    ">>>".cyan(),
                    "TX".cyan().bold(),
                    "UNFRAMED".red().bold(),
                    protocol::hex_string(frame)
                );
            }
        }
        if config.show_hex {
            eprintln!("    {}  {}", "HEX".dim(), protocol::hex_string(frame));
        }
    }

    fn print_notification(data: &[u8]) {
        let code = data.get(2).copied().map(cmd::name).unwrap_or("-");
        if protocol::is_hangup_signal(data) {
            eprintln!(
                "{} {}  {} {} {}",
                "<<<".green(),
                "RX".green().bold(),
                "HANGUP".magenta().bold(),
                code.yellow(),
                protocol::hex_string(data)
            );
        } else {
            eprintln!(
                "{} {}  {}",
                "<<<".green(),
                "RX".green().bold(),
                protocol::hex_string(data)
            );
        }
    }
}

#[async_trait]
impl LockTransport for MonitorTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        self.inner.initialize().await
    }

    async fn start_scan(&self) -> Result<mpsc::Receiver<DiscoveredDevice>, TransportError> {
        self.inner.start_scan().await
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.inner.stop_scan().await
    }

    async fn connect(
        &self,
        device: &DeviceId,
        timeout: Duration,
    ) -> Result<LinkHandle, TransportError> {
        self.tx_frame.lock().clear();
        let link = self.inner.connect(device, timeout).await?;
        eprintln!("{} link {} to {}", "---".dim(), link.id, link.device);
        Ok(link)
    }

    async fn resolve_channels(&self, link: &LinkHandle) -> Result<ChannelPair, TransportError> {
        self.inner.resolve_channels(link).await
    }

    async fn write_byte(&self, channel: &ChannelId, byte: u8) -> Result<(), TransportError> {
        self.inner.write_byte(channel, byte).await?;
        if let Some(frame) = self.track_tx(byte) {
            Self::print_frame(&self.config, &frame);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &ChannelId,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let mut inner_rx = self.inner.subscribe(channel).await?;
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            while let Some(data) = inner_rx.recv().await {
                Self::print_notification(&data);
                if tx.send(data).await.is_err() {
                    break;
                }
            }
        });
        if let Some(old) = self.forwarder.lock().replace(task) {
            old.abort();
        }
        Ok(rx)
    }

    async fn disconnect(&self, link: &LinkHandle) -> Result<(), TransportError> {
        if let Some(task) = self.forwarder.lock().take() {
            task.abort();
        }
        self.inner.disconnect(link).await
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedTransport;

    #[test]
    fn test_tracks_frames_across_writes() {
        let monitor = MonitorTransport {
            inner: Arc::new(SimulatedTransport::new()),
            config: MonitorConfig::default(),
            tx_frame: Mutex::new(Vec::new()),
            forwarder: Mutex::new(None),
        };
        let packet = [0xCC, 0x02, 0, 0, 0, 0, 0, 0, 0, 0xCE];
        for &byte in &packet[..9] {
            assert_eq!(monitor.track_tx(byte), None);
        }
        assert_eq!(monitor.track_tx(packet[9]), Some(packet.to_vec()));
        // Stray bytes outside a frame are reported on their own
        assert_eq!(monitor.track_tx(0x42), Some(vec![0x42]));
    }

    #[tokio::test]
    async fn test_forwards_notifications() {
        let sim = Arc::new(SimulatedTransport::new().with_device("lock"));
        let monitored = MonitorTransport::wrap(sim.clone(), MonitorConfig::default());
        let link = monitored
            .connect(&DeviceId::new("SIM-00"), Duration::from_secs(1))
            .await
            .unwrap();
        let channels = monitored.resolve_channels(&link).await.unwrap();
        let mut rx = monitored.subscribe(&channels.notify).await.unwrap();

        assert!(sim.push_notification(&[0xCC, 0x81, 0x01, 0x00]));
        assert_eq!(rx.recv().await, Some(vec![0xCC, 0x81, 0x01, 0x00]));
    }

    #[tokio::test]
    async fn test_disconnect_stops_forwarding() {
        let sim = Arc::new(SimulatedTransport::new().with_device("lock"));
        let monitor = MonitorTransport {
            inner: sim.clone(),
            config: MonitorConfig::default(),
            tx_frame: Mutex::new(Vec::new()),
            forwarder: Mutex::new(None),
        };
        let link = monitor
            .connect(&DeviceId::new("SIM-00"), Duration::from_secs(1))
            .await
            .unwrap();
        let channels = monitor.resolve_channels(&link).await.unwrap();
        let mut rx = monitor.subscribe(&channels.notify).await.unwrap();
        assert!(monitor.forwarder.lock().is_some());

        // A stale handle leaves the inner link and its stream alone
        let stale = LinkHandle {
            id: link.id + 100,
            device: link.device.clone(),
        };
        monitor.disconnect(&stale).await.unwrap();

        assert!(monitor.forwarder.lock().is_none());
        assert!(sim.current_link().is_some());
        assert_eq!(rx.recv().await, None);
    }
}

//! Bluetooth LE GATT transport (btleplug)
//!
//! The lock exposes one custom service with a command characteristic (write
//! without response, one byte per write) and a notify characteristic. Older
//! firmware only has the command characteristic and notifies on it.
//!
//! Devices are keyed by their Bluetooth address as reported during scanning;
//! `connect` only works for devices seen by a scan on this transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::protocol::uuids;
use crate::types::{ChannelId, ChannelPair, DeviceId, DiscoveredDevice, LinkHandle};
use crate::{establish_link, LockTransport};

const SCAN_BUFFER: usize = 64;
const NOTIFY_BUFFER: usize = 32;

struct ActiveLink {
    handle: LinkHandle,
    peripheral: Peripheral,
    notify_task: Option<JoinHandle<()>>,
}

/// BLE central backed by the first system adapter
pub struct BleTransport {
    adapter: Adapter,
    peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    active: Mutex<Option<ActiveLink>>,
    next_link: AtomicU64,
}

impl BleTransport {
    /// Open the first Bluetooth adapter
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::AdapterUnavailable("no Bluetooth adapter".into()))?;

        Ok(Self {
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            scan_task: Mutex::new(None),
            active: Mutex::new(None),
            next_link: AtomicU64::new(1),
        })
    }

    fn current_peripheral(&self, link: Option<&LinkHandle>) -> Result<Peripheral, TransportError> {
        let active = self.active.lock();
        match active.as_ref() {
            Some(a) if link.map_or(true, |l| *l == a.handle) => Ok(a.peripheral.clone()),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        channel: &ChannelId,
    ) -> Result<Characteristic, TransportError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == channel.0)
            .ok_or(TransportError::WriteChannelMissing)
    }
}

#[async_trait]
impl LockTransport for BleTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        let info = self
            .adapter
            .adapter_info()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
        debug!("Using adapter {}", info);
        Ok(())
    }

    async fn start_scan(&self) -> Result<mpsc::Receiver<DiscoveredDevice>, TransportError> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let (tx, rx) = mpsc::channel(SCAN_BUFFER);
        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let properties = peripheral.properties().await.ok().flatten();
                let address = peripheral.address().to_string();
                let device = DiscoveredDevice {
                    id: DeviceId::new(address.clone()),
                    name: properties.as_ref().and_then(|p| p.local_name.clone()),
                    rssi: properties.as_ref().and_then(|p| p.rssi),
                };
                peripherals.lock().insert(address, peripheral);
                if tx.send(device).await.is_err() {
                    break;
                }
            }
        });

        if let Some(old) = self.scan_task.lock().replace(task) {
            old.abort();
        }
        info!("BLE scan started");
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let Some(task) = self.scan_task.lock().take() else {
            return Ok(());
        };
        task.abort();
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan: {}", e);
        }
        Ok(())
    }

    async fn connect(
        &self,
        device: &DeviceId,
        timeout: Duration,
    ) -> Result<LinkHandle, TransportError> {
        let peripheral = self
            .peripherals
            .lock()
            .get(device.as_str())
            .cloned()
            .ok_or_else(|| TransportError::DeviceNotFound(device.to_string()))?;

        let link_up = establish_link(
            timeout,
            async { peripheral.connect().await.map_err(TransportError::from) },
            async { peripheral.discover_services().await.map_err(TransportError::from) },
            async { peripheral.disconnect().await.map_err(TransportError::from) },
        )
        .await;
        if let Err(e) = link_up {
            warn!("Connect to {} failed: {}", device, e);
            return Err(e);
        }

        let handle = LinkHandle {
            id: self.next_link.fetch_add(1, Ordering::Relaxed),
            device: device.clone(),
        };
        let previous = self.active.lock().replace(ActiveLink {
            handle: handle.clone(),
            peripheral,
            notify_task: None,
        });
        if let Some(task) = previous.and_then(|p| p.notify_task) {
            task.abort();
        }
        info!("Connected to {} (link {})", device, handle.id);
        Ok(handle)
    }

    async fn resolve_channels(&self, link: &LinkHandle) -> Result<ChannelPair, TransportError> {
        let peripheral = self.current_peripheral(Some(link))?;
        let characteristics = peripheral.characteristics();

        let write = characteristics
            .iter()
            .find(|c| c.uuid == uuids::COMMAND)
            .map(|c| ChannelId(c.uuid))
            .ok_or(TransportError::WriteChannelMissing)?;
        let notify = characteristics
            .iter()
            .find(|c| c.uuid == uuids::NOTIFY)
            .map(|c| ChannelId(c.uuid));
        if notify.is_none() {
            debug!("No notify characteristic, using command characteristic");
        }
        Ok(ChannelPair::new(write, notify))
    }

    async fn write_byte(&self, channel: &ChannelId, byte: u8) -> Result<(), TransportError> {
        let peripheral = self.current_peripheral(None)?;
        let characteristic = Self::find_characteristic(&peripheral, channel)?;
        peripheral
            .write(&characteristic, &[byte], WriteType::WithoutResponse)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn subscribe(
        &self,
        channel: &ChannelId,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let peripheral = self.current_peripheral(None)?;
        let characteristic = Self::find_characteristic(&peripheral, channel)
            .map_err(|_| TransportError::SubscribeFailed(format!("{} not found", channel)))?;
        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        let mut stream = peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(NOTIFY_BUFFER);
        let uuid = channel.0;
        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                if tx.send(notification.value).await.is_err() {
                    break;
                }
            }
        });

        let mut active = self.active.lock();
        match active.as_mut() {
            Some(link) => {
                if let Some(old) = link.notify_task.replace(task) {
                    old.abort();
                }
            }
            None => {
                task.abort();
                return Err(TransportError::Disconnected);
            }
        }
        Ok(rx)
    }

    async fn disconnect(&self, link: &LinkHandle) -> Result<(), TransportError> {
        let taken = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(a) if a.handle == *link => active.take(),
                _ => None,
            }
        };
        let Some(active) = taken else {
            return Ok(());
        };
        if let Some(task) = active.notify_task {
            task.abort();
        }
        if let Err(e) = active.peripheral.disconnect().await {
            warn!("Disconnect from {} failed: {}", link.device, e);
            return Err(e.into());
        }
        info!("Disconnected from {}", link.device);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        let Ok(peripheral) = self.current_peripheral(None) else {
            return false;
        };
        peripheral.is_connected().await.unwrap_or(false)
    }
}

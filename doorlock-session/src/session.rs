//! Connection orchestration
//!
//! `LockSession` owns one transport, one transmission engine, and at most one
//! link. It is a cheap clonable handle; background tasks (notification
//! listener, disconnect timers) hold weak references so dropping the last
//! handle tears everything down.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use doorlock_transport::protocol::{self, cmd};
use doorlock_transport::{
    BoxedTransport, ChannelPair, ClockSource, ConnectionState, DeviceId, DiscoveredDevice,
    LinkHandle, LockCommand, LockEvent, Packet, SendOutcome, SystemClock, TransmissionEngine,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::LockError;

/// Capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 256;

struct Link {
    handle: LinkHandle,
    channels: ChannelPair,
    listener: Option<JoinHandle<()>>,
}

struct SessionInner {
    transport: BoxedTransport,
    engine: TransmissionEngine,
    events: broadcast::Sender<LockEvent>,
    config: SessionConfig,
    clock: Arc<dyn ClockSource>,
    state: Mutex<ConnectionState>,
    link: Mutex<Option<Link>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(listener) = self.link.get_mut().take().and_then(|l| l.listener) {
            listener.abort();
        }
    }
}

/// One door lock session
#[derive(Clone)]
pub struct LockSession {
    inner: Arc<SessionInner>,
}

impl LockSession {
    /// Create a session using the system clock for time-sync commands
    pub fn new(transport: BoxedTransport, config: SessionConfig) -> Self {
        Self::with_clock(transport, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        transport: BoxedTransport,
        config: SessionConfig,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = TransmissionEngine::new(transport.clone(), events.clone(), config.send);
        Self {
            inner: Arc::new(SessionInner {
                transport,
                engine,
                events,
                config,
                clock,
                state: Mutex::new(ConnectionState::Disconnected),
                link: Mutex::new(None),
            }),
        }
    }

    fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// Subscribe to progress, completion, error and state events
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &dyn ClockSource {
        self.inner.clock.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_sending(&self) -> bool {
        self.inner.engine.is_sending()
    }

    /// Handle of the current link
    pub fn link(&self) -> Option<LinkHandle> {
        self.inner.link.lock().as_ref().map(|l| l.handle.clone())
    }

    /// Channels of the current link
    pub fn channels(&self) -> Option<ChannelPair> {
        self.inner.link.lock().as_ref().map(|l| l.channels)
    }

    fn set_state(&self, state: ConnectionState) {
        {
            let mut current = self.inner.state.lock();
            if *current == state {
                return;
            }
            *current = state;
        }
        debug!("Connection state: {}", state);
        let _ = self
            .inner
            .events
            .send(LockEvent::ConnectionStateChanged(state));
    }

    /// Check that the radio is usable
    pub async fn initialize(&self) -> Result<(), LockError> {
        self.inner.transport.initialize().await?;
        Ok(())
    }

    /// Find the device advertising exactly `target` and connect to it
    ///
    /// Succeeds immediately when a link already exists and the transport
    /// still reports it live. A link dropped from the lock's side is torn
    /// down locally before scanning again.
    pub async fn scan_and_connect(&self, target: &str) -> Result<LinkHandle, LockError> {
        if let Some(link) = self.link() {
            if self.inner.transport.is_connected().await {
                debug!("Already connected to {}", link.device);
                return Ok(link);
            }
            warn!("Link {} to {} was lost", link.id, link.device);
            self.disconnect_link(Some(link.id)).await;
        }

        // A scan left over from an earlier attempt would swallow events
        if let Err(e) = self.inner.transport.stop_scan().await {
            debug!("stop_scan before scanning: {}", e);
        }

        self.set_state(ConnectionState::Scanning);
        info!("Scanning for {}", target);

        let rx = match self.inner.transport.start_scan().await {
            Ok(rx) => rx,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        let found = tokio::time::timeout(
            self.inner.config.scan_timeout,
            first_named(rx, target),
        )
        .await
        .ok()
        .flatten();

        if let Err(e) = self.inner.transport.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        let Some(device) = found else {
            warn!("{} not found within {:?}", target, self.inner.config.scan_timeout);
            self.set_state(ConnectionState::Disconnected);
            return Err(LockError::TargetNotFound(target.to_string()));
        };

        info!("Found {} ({})", target, device.id);
        self.connect(&device.id).await
    }

    /// Establish a link, resolve its channels and listen for notifications
    ///
    /// A missing command characteristic fails the whole operation; a failed
    /// notification subscription only loses the hang-up signal.
    pub async fn connect(&self, device: &DeviceId) -> Result<LinkHandle, LockError> {
        if self.link().is_some() {
            self.disconnect().await;
        }

        self.set_state(ConnectionState::Connecting);
        let transport = &self.inner.transport;

        let handle = match transport
            .connect(device, self.inner.config.connect_timeout)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Connect to {} failed: {}", device, e);
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        let channels = match transport.resolve_channels(&handle).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!("Channel resolution failed: {}", e);
                if let Err(e) = transport.disconnect(&handle).await {
                    warn!("Teardown after failed resolution: {}", e);
                }
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };
        if channels.is_shared() {
            debug!("Notifications share the write channel");
        }

        let listener = match transport.subscribe(&channels.notify).await {
            Ok(rx) => Some(self.spawn_listener(handle.clone(), rx)),
            Err(e) => {
                warn!("Notifications unavailable: {}", e);
                None
            }
        };

        *self.inner.link.lock() = Some(Link {
            handle: handle.clone(),
            channels,
            listener,
        });
        self.set_state(ConnectionState::Connected);
        info!("Connected to {} (link {})", device, handle.id);
        Ok(handle)
    }

    fn spawn_listener(&self, link: LinkHandle, mut rx: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                debug!("Notification: {}", protocol::hex_string(&data));
                if !protocol::is_hangup_signal(&data) {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let session = LockSession::from_inner(inner);
                let delay = session.inner.config.auto_disconnect_delay;
                info!("Lock hung up, disconnecting in {:?}", delay);
                session.schedule_disconnect_for(link.clone(), delay);
            }
            debug!("Notification stream for link {} closed", link.id);
        })
    }

    /// Disconnect the current link after `delay`
    ///
    /// The timer is bound to the link that exists now. Returns false when
    /// there is no link.
    pub fn schedule_disconnect(&self, delay: Duration) -> bool {
        match self.link() {
            Some(link) => {
                self.schedule_disconnect_for(link, delay);
                true
            }
            None => false,
        }
    }

    fn schedule_disconnect_for(&self, link: LinkHandle, delay: Duration) {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                LockSession::from_inner(inner)
                    .disconnect_link(Some(link.id))
                    .await;
            }
        });
    }

    /// Tear down the current link; no-op without one
    ///
    /// Teardown errors are logged, not returned.
    pub async fn disconnect(&self) {
        self.disconnect_link(None).await;
    }

    async fn disconnect_link(&self, expected: Option<u64>) {
        let taken = {
            let mut guard = self.inner.link.lock();
            match guard.as_ref() {
                Some(l) if expected.map_or(true, |id| id == l.handle.id) => guard.take(),
                _ => None,
            }
        };
        let Some(link) = taken else {
            debug!("Nothing to disconnect");
            return;
        };

        self.inner.engine.cancel();
        if let Some(listener) = link.listener {
            listener.abort();
        }
        if let Err(e) = self.inner.transport.disconnect(&link.handle).await {
            warn!("Disconnect from {} failed: {}", link.handle.device, e);
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected from {}", link.handle.device);
    }

    /// Encode and transmit a command on the current link
    pub async fn send_command(&self, command: &LockCommand) -> Result<SendOutcome, LockError> {
        let packet = command.packet(self.inner.clock.as_ref());
        self.send_packet(&packet).await
    }

    /// Transmit a prepared frame on the current link
    ///
    /// After an entrance-open frame completes, the link is torn down on a
    /// timer since the entrance device never hangs up on its own.
    pub async fn send_packet(&self, packet: &Packet) -> Result<SendOutcome, LockError> {
        let channel = self
            .inner
            .link
            .lock()
            .as_ref()
            .map(|l| l.channels.write)
            .ok_or(LockError::NotConnected)?;

        info!("Sending {}", packet.code());
        let outcome = self.inner.engine.send(&channel, packet).await?;

        if outcome == SendOutcome::Completed && packet.code().value() == cmd::ENTRANCE_OPEN {
            let delay = self.inner.config.entrance_disconnect_delay;
            debug!("Entrance open sent, disconnecting in {:?}", delay);
            self.schedule_disconnect(delay);
        }
        Ok(outcome)
    }

    /// Abandon the frame being sent, if any
    pub fn cancel_sending(&self) {
        self.inner.engine.cancel();
    }

    /// Collect every device whose name starts with `prefix` (case-insensitive)
    /// until `timeout` elapses
    pub async fn discover(
        &self,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredDevice>, LockError> {
        if let Err(e) = self.inner.transport.stop_scan().await {
            debug!("stop_scan before discovery: {}", e);
        }
        let mut rx = self.inner.transport.start_scan().await?;
        info!("Discovering devices with prefix {:?}", prefix);

        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        while let Ok(Some(device)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            if device.matches_prefix(prefix) && seen.insert(device.id.clone()) {
                debug!("Discovered {:?} ({})", device.name, device.id);
                devices.push(device);
            }
        }

        if let Err(e) = self.inner.transport.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        Ok(devices)
    }
}

async fn first_named(
    mut rx: mpsc::Receiver<DiscoveredDevice>,
    target: &str,
) -> Option<DiscoveredDevice> {
    while let Some(device) = rx.recv().await {
        if device.has_name(target) {
            return Some(device);
        }
    }
    None
}

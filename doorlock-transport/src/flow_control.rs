//! Flow-control layer: byte-paced transmission with per-byte retries
//!
//! The lock firmware only accepts one byte per characteristic write, so every
//! frame is queued and written a byte at a time with a fixed pause between
//! writes.
//!
//! ```text
//! [LockSession]
//!       |  send(channel, packet) / cancel()
//! [TransmissionEngine]   <- queue, pacing, retries, progress events
//!       |  write_byte
//! [BleTransport / SimulatedTransport / MonitorTransport]
//! ```
//!
//! Only one frame is in flight at a time. A second `send` while one is running
//! is rejected rather than queued behind it.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, warn};

use crate::command::Packet;
use crate::error::TransportError;
use crate::protocol::timing;
use crate::types::{ChannelId, LockEvent};
use crate::BoxedTransport;

/// Pacing and retry parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendTiming {
    /// Pause after each accepted byte
    pub byte_delay: Duration,
    /// Pause before retrying a rejected byte
    pub retry_delay: Duration,
    /// Retries per byte before the frame is abandoned
    pub max_retries: u32,
}

impl Default for SendTiming {
    fn default() -> Self {
        Self {
            byte_delay: Duration::from_millis(timing::BYTE_SEND_DELAY_MS),
            retry_delay: Duration::from_millis(timing::RETRY_DELAY_MS),
            max_retries: timing::MAX_RETRY_COUNT,
        }
    }
}

/// One pending byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendQueueItem {
    pub byte: u8,
    pub retries: u32,
}

/// How a transmission that did not fail ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Every byte was written
    Completed,
    /// `cancel` was called before the queue drained
    Cancelled,
}

struct QueueState {
    items: VecDeque<SendQueueItem>,
    /// Bumped by `cancel`; a loop that sees a different value stops
    generation: u64,
    sending: bool,
}

/// Serializes frames onto a write channel one byte at a time
pub struct TransmissionEngine {
    transport: BoxedTransport,
    events: broadcast::Sender<LockEvent>,
    timing: SendTiming,
    state: Mutex<QueueState>,
    wake: Notify,
}

impl TransmissionEngine {
    pub fn new(
        transport: BoxedTransport,
        events: broadcast::Sender<LockEvent>,
        timing: SendTiming,
    ) -> Self {
        Self {
            transport,
            events,
            timing,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                generation: 0,
                sending: false,
            }),
            wake: Notify::new(),
        }
    }

    pub fn timing(&self) -> SendTiming {
        self.timing
    }

    /// Whether a frame is currently being transmitted
    pub fn is_sending(&self) -> bool {
        self.state.lock().sending
    }

    /// Snapshot of the bytes still waiting to be written
    pub fn queued(&self) -> Vec<SendQueueItem> {
        self.state.lock().items.iter().copied().collect()
    }

    /// Transmit a frame, resolving when it has been fully written, abandoned,
    /// or cancelled
    ///
    /// Emits `Progress` per accepted byte and exactly one `Complete` or
    /// `Error` per transmission. Cancellation is silent.
    pub async fn send(
        &self,
        channel: &ChannelId,
        packet: &Packet,
    ) -> Result<SendOutcome, TransportError> {
        let generation = {
            let mut state = self.state.lock();
            if state.sending {
                return Err(TransportError::SendBusy);
            }
            state.items = packet
                .as_bytes()
                .iter()
                .map(|&byte| SendQueueItem { byte, retries: 0 })
                .collect();
            state.sending = true;
            state.generation
        };

        debug!(
            "Sending {} ({} bytes): {}",
            packet.code(),
            packet.len(),
            packet.to_hex()
        );

        loop {
            let item = {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return Ok(SendOutcome::Cancelled);
                }
                match state.items.pop_front() {
                    Some(item) => item,
                    None => {
                        state.sending = false;
                        drop(state);
                        debug!("Transmission complete");
                        self.emit(LockEvent::Complete);
                        return Ok(SendOutcome::Completed);
                    }
                }
            };

            match self.transport.write_byte(channel, item.byte).await {
                Ok(()) => {
                    let remaining = {
                        let state = self.state.lock();
                        if state.generation != generation {
                            return Ok(SendOutcome::Cancelled);
                        }
                        state.items.len()
                    };
                    self.emit(LockEvent::Progress {
                        byte: item.byte,
                        remaining,
                    });
                    if !self.pause(self.timing.byte_delay, generation).await {
                        return Ok(SendOutcome::Cancelled);
                    }
                }
                Err(e) => {
                    let retry = {
                        let mut state = self.state.lock();
                        if state.generation != generation {
                            return Ok(SendOutcome::Cancelled);
                        }
                        if item.retries < self.timing.max_retries {
                            state.items.push_front(SendQueueItem {
                                byte: item.byte,
                                retries: item.retries + 1,
                            });
                            true
                        } else {
                            state.items.clear();
                            state.sending = false;
                            false
                        }
                    };

                    if retry {
                        warn!(
                            "Write of 0x{:02X} failed ({}), retry {}/{}",
                            item.byte,
                            e,
                            item.retries + 1,
                            self.timing.max_retries
                        );
                        if !self.pause(self.timing.retry_delay, generation).await {
                            return Ok(SendOutcome::Cancelled);
                        }
                    } else {
                        let err = TransportError::ByteSendFailed { byte: item.byte };
                        error!("{err} after {} retries ({e})", item.retries);
                        self.emit(LockEvent::Error(err.to_string()));
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Abandon the in-flight frame
    ///
    /// Clears the queue and wakes the sending loop if it is pausing. Safe to
    /// call when nothing is being sent.
    pub fn cancel(&self) {
        let was_sending = {
            let mut state = self.state.lock();
            let was_sending = state.sending;
            state.items.clear();
            state.sending = false;
            state.generation = state.generation.wrapping_add(1);
            was_sending
        };
        self.wake.notify_waiters();
        if was_sending {
            debug!("Transmission cancelled");
        }
    }

    /// Sleep unless cancelled first; returns false when cancelled
    async fn pause(&self, delay: Duration, generation: u64) -> bool {
        // Registered before the generation check so a concurrent cancel can't slip between
        let notified = self.wake.notified();
        if self.state.lock().generation != generation {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = notified => false,
        }
    }

    fn emit(&self, event: LockEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{FixedClock, LockCommand, ClockReading};
    use crate::sim::SimulatedTransport;
    use crate::types::DeviceId;
    use crate::LockTransport;
    use std::sync::Arc;

    const CLOCK: FixedClock = FixedClock(ClockReading {
        year: 25,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
    });

    async fn setup(
        sim: SimulatedTransport,
    ) -> (
        Arc<SimulatedTransport>,
        Arc<TransmissionEngine>,
        ChannelId,
        broadcast::Receiver<LockEvent>,
    ) {
        let sim = Arc::new(sim);
        let link = sim
            .connect(&DeviceId::new("SIM-00"), Duration::from_secs(1))
            .await
            .unwrap();
        let channels = sim.resolve_channels(&link).await.unwrap();
        let (tx, rx) = broadcast::channel(64);
        let engine = Arc::new(TransmissionEngine::new(
            sim.clone(),
            tx,
            SendTiming::default(),
        ));
        (sim, engine, channels.write, rx)
    }

    fn drain(rx: &mut broadcast::Receiver<LockEvent>) -> Vec<LockEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_keeps_order() {
        let sim = SimulatedTransport::new().with_silent_device("lock");
        sim.script_writes([true, false, false]);
        let (sim, engine, channel, mut rx) = setup(sim).await;

        let packet = LockCommand::Open.packet(&CLOCK);
        let outcome = engine.send(&channel, &packet).await.unwrap();

        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(sim.written(), packet.as_bytes());
        assert_eq!(sim.write_attempts(), packet.len() + 2);
        assert!(!engine.is_sending());

        let events = drain(&mut rx);
        let progress: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                LockEvent::Progress { byte, .. } => Some(*byte),
                _ => None,
            })
            .collect();
        assert_eq!(progress, packet.as_bytes());
        assert_eq!(
            events.iter().filter(|e| **e == LockEvent::Complete).count(),
            1
        );
        assert!(!events.iter().any(|e| matches!(e, LockEvent::Error(_))));
        assert_eq!(
            events.iter().rev().nth(1),
            Some(&LockEvent::Progress {
                byte: packet.checksum(),
                remaining: 0
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_abandons_frame() {
        let sim = SimulatedTransport::new().with_silent_device("lock");
        sim.fail_byte(0x01);
        let (sim, engine, channel, mut rx) = setup(sim).await;

        let packet = LockCommand::Open.packet(&CLOCK);
        let err = engine.send(&channel, &packet).await.unwrap_err();

        assert_eq!(err, TransportError::ByteSendFailed { byte: 0x01 });
        assert_eq!(sim.written(), vec![0xCC]);
        // header + first attempt and three retries of 0x01
        assert_eq!(sim.write_attempts(), 5);
        assert!(!engine.is_sending());
        assert!(engine.queued().is_empty());

        let events = drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&LockEvent::Error("Failed to send byte: 0x01".into()))
        );
        assert!(!events.contains(&LockEvent::Complete));

        // The engine is usable again
        let status = LockCommand::Status.packet(&CLOCK);
        assert_eq!(
            engine.send(&channel, &status).await,
            Ok(SendOutcome::Completed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_busy_is_rejected() {
        let sim = SimulatedTransport::new().with_silent_device("lock");
        let (_sim, engine, channel, _rx) = setup(sim).await;

        let first = LockCommand::Open.packet(&CLOCK);
        let task = {
            let engine = engine.clone();
            let first = first.clone();
            tokio::spawn(async move { engine.send(&channel, &first).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.is_sending());
        let before = engine.queued();

        let second = LockCommand::Status.packet(&CLOCK);
        assert_eq!(
            engine.send(&channel, &second).await,
            Err(TransportError::SendBusy)
        );
        assert_eq!(engine.queued(), before);

        assert_eq!(task.await.unwrap(), Ok(SendOutcome::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_silent() {
        let sim = SimulatedTransport::new().with_silent_device("lock");
        let (sim, engine, channel, mut rx) = setup(sim).await;

        let packet = LockCommand::Open.packet(&CLOCK);
        let task = {
            let engine = engine.clone();
            let packet = packet.clone();
            tokio::spawn(async move { engine.send(&channel, &packet).await })
        };
        tokio::time::sleep(Duration::from_millis(120)).await;
        engine.cancel();

        assert_eq!(task.await.unwrap(), Ok(SendOutcome::Cancelled));
        assert!(!engine.is_sending());
        assert!(engine.queued().is_empty());
        let written = sim.written().len();
        assert!(written > 0 && written < packet.len());

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .all(|e| matches!(e, LockEvent::Progress { .. })));

        // Cancelling an idle engine is harmless
        engine.cancel();
        assert_eq!(
            engine.send(&channel, &packet).await,
            Ok(SendOutcome::Completed)
        );
    }
}

//! Session timing configuration

use std::time::Duration;

use doorlock_transport::protocol::timing;
use doorlock_transport::SendTiming;

/// Every delay and timeout the session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long `scan_and_connect` looks for its target
    pub scan_timeout: Duration,
    /// Bound for link establishment
    pub connect_timeout: Duration,
    /// Wait between connecting and the first send (Auto-Open)
    pub settle_delay: Duration,
    /// Teardown delay after the lock's hang-up notification
    pub auto_disconnect_delay: Duration,
    /// Teardown delay after an entrance-open send
    pub entrance_disconnect_delay: Duration,
    /// Byte pacing and retries
    pub send: SendTiming,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_millis(timing::SCAN_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(timing::CONNECT_TIMEOUT_MS),
            settle_delay: Duration::from_millis(timing::SETTLE_DELAY_MS),
            auto_disconnect_delay: Duration::from_millis(timing::AUTO_DISCONNECT_DELAY_MS),
            entrance_disconnect_delay: Duration::from_millis(
                timing::ENTRANCE_DISCONNECT_DELAY_MS,
            ),
            send: SendTiming::default(),
        }
    }
}

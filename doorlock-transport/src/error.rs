//! Transport error types

use thiserror::Error;

/// Errors that can occur during transport operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    // Link errors
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Device not connected")]
    NotConnected,

    #[error("Communication timeout")]
    Timeout,

    // Channel resolution
    #[error("Command characteristic not found")]
    WriteChannelMissing,

    #[error("Notification subscribe failed: {0}")]
    SubscribeFailed(String),

    // Transmission
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Another command is already being sent")]
    SendBusy,

    #[error("Failed to send byte: 0x{byte:02X}")]
    ByteSendFailed { byte: u8 },

    // Backend-specific
    #[error("Bluetooth error: {0}")]
    BluetoothError(String),
}

#[cfg(feature = "bluetooth")]
impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::DeviceNotFound => TransportError::DeviceNotFound(e.to_string()),
            btleplug::Error::NotConnected => TransportError::NotConnected,
            btleplug::Error::TimedOut(_) => TransportError::Timeout,
            btleplug::Error::PermissionDenied => {
                TransportError::AdapterUnavailable("permission denied".into())
            }
            other => TransportError::BluetoothError(other.to_string()),
        }
    }
}

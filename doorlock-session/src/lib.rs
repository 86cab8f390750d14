//! Session layer for OASYSS BLE door locks
//!
//! `LockSession` drives one transport through scan, connect, send and
//! disconnect, and reacts to the lock's hang-up notification. `AutoOpen`
//! strings those steps together for the "open my door" flows.

pub mod config;
pub mod error;
pub mod session;
pub mod workflow;

pub use config::SessionConfig;
pub use error::{LockError, WorkflowError};
pub use session::LockSession;
pub use workflow::{AutoOpen, DoorKind, WorkflowStage};

// Re-export transport types that appear in this crate's API
pub use doorlock_transport::{
    ConnectionState, DeviceId, DiscoveredDevice, LinkHandle, LockCommand, LockEvent, SendOutcome,
};

// CLI definitions using clap

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "door_driver")]
#[command(author, version, about = "OASYSS BLE door lock driver")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: ~/.config/doorlock/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Advertised name to connect to (overrides the configured target)
    #[arg(long, global = true)]
    pub target: Option<String>,

    /// Name prefix for discovery (overrides the configured prefix)
    #[arg(long, global = true)]
    pub prefix: Option<String>,

    /// Use simulated locks instead of the Bluetooth adapter
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Print all link traffic to stderr
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Show raw hex dump alongside decoded traffic
    #[arg(long, global = true)]
    pub hex: bool,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Operator fields for card enrollment/revocation (hex text)
#[derive(Args, Debug, Clone, Default)]
pub struct CardFields {
    /// Slot number (hex)
    #[arg(long, default_value = "")]
    pub order: String,
    /// Card identifier (hex pairs, up to 7 bytes)
    #[arg(long, default_value = "")]
    pub number: String,
    /// Issue cycle (hex)
    #[arg(long, default_value = "")]
    pub cycle: String,
}

#[derive(Subcommand)]
pub enum Commands {
    // === Discovery ===
    /// List nearby locks whose name starts with the prefix
    #[command(visible_alias = "ls")]
    Scan {
        /// How long to listen for advertisements
        #[arg(long, default_value = "8000")]
        timeout_ms: u64,
    },

    // === Auto-Open ===
    /// Open the room lock (scan, connect, send REMOTE_OPEN)
    Open,

    /// Open the shared entrance door
    #[command(visible_alias = "gate")]
    Entrance,

    // === Single commands to the room lock ===
    /// Send any command code (hex)
    Send {
        /// Command code, e.g. 02 or 0x1D
        code: String,
        #[command(flatten)]
        fields: CardFields,
    },

    /// Lock the door
    Close,

    /// Query lock status
    Status,

    /// Sync the lock clock to local time
    SetTime,

    /// Query battery level
    #[command(visible_alias = "bat")]
    Battery,

    /// Enroll a card
    Enroll {
        #[command(flatten)]
        fields: CardFields,
    },

    /// Revoke one card slot
    Revoke {
        /// Slot number (hex)
        #[arg(long)]
        order: String,
    },

    /// Revoke every enrolled card
    RevokeAll,

    // === Offline ===
    /// Print the frame a command encodes to, without any I/O
    Packet {
        /// Command code, e.g. 01 or 0x1D
        code: String,
        #[command(flatten)]
        fields: CardFields,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List every command code
    Commands,

    /// Print the advertised name of a room
    DeviceName {
        /// Building label (digits are used)
        #[arg(long)]
        building: String,
        /// Room label (digits are used)
        #[arg(long)]
        room: String,
    },
}

// OASYSS door lock driver - shared library
// Config file, activity log, and offline packet reports used by the CLI

pub mod activity;
pub mod config;
pub mod report;

pub use activity::{ActivityLog, LogEvent, LogLevel, SendProgress};
pub use config::{ConfigError, DriverConfig, TimingConfig};
pub use report::{parse_code, ParseCodeError};

//! Command handlers for the CLI application.
//!
//! This module organizes command handlers by category:
//! - `door`: commands that talk to a lock (scan, open, entrance, send, ...)
//! - `utility`: offline commands (packet, commands, device-name)

pub mod door;
pub mod utility;

use std::future::Future;
use std::sync::Arc;

use crossterm::style::Stylize;
use door_driver::{ActivityLog, DriverConfig, LogEvent, LogLevel, SendProgress};
use doorlock_session::LockSession;
use doorlock_transport::protocol::device;
use doorlock_transport::{
    BoxedTransport, CommandCode, LockEvent, MonitorConfig, MonitorTransport, SimulatedTransport,
};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::cli::Cli;

/// Result type for command handlers
pub type CommandResult = anyhow::Result<()>;

/// Resolved settings for one invocation: config file plus CLI overrides
pub struct Context {
    pub config: DriverConfig,
    target: Option<String>,
    prefix: Option<String>,
    simulate: bool,
    monitor: bool,
    hex: bool,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let path = cli.config.clone().unwrap_or_else(DriverConfig::default_path);
        let config = DriverConfig::load(&path)?;
        debug!("Config loaded from {}", path.display());
        Ok(Self {
            config,
            target: cli.target.clone(),
            prefix: cli.prefix.clone(),
            simulate: cli.simulate,
            monitor: cli.monitor,
            hex: cli.hex,
        })
    }

    pub fn room_target(&self) -> String {
        self.target
            .clone()
            .unwrap_or_else(|| self.config.room_target.clone())
    }

    pub fn entrance_target(&self) -> String {
        self.target
            .clone()
            .unwrap_or_else(|| self.config.entrance_target.clone())
    }

    pub fn prefix(&self) -> String {
        self.prefix
            .clone()
            .unwrap_or_else(|| self.config.prefix.clone())
    }

    /// Open the radio backend, wrapped with the monitor when requested
    pub async fn open_transport(&self) -> anyhow::Result<BoxedTransport> {
        let transport: BoxedTransport = if self.simulate {
            Arc::new(simulated_locks(&self.config))
        } else {
            bluetooth_transport().await?
        };

        if self.monitor {
            let config = MonitorConfig::default().with_hex(self.hex);
            Ok(MonitorTransport::wrap(transport, config))
        } else {
            Ok(transport)
        }
    }

    pub async fn session(&self) -> anyhow::Result<LockSession> {
        let transport = self.open_transport().await?;
        Ok(LockSession::new(transport, self.config.session_config()))
    }
}

/// The simulated neighbourhood used by `--simulate`
///
/// The room lock hangs up after each frame like the real one; the entrance
/// device stays silent.
pub fn simulated_locks(config: &DriverConfig) -> SimulatedTransport {
    SimulatedTransport::new()
        .with_device(&config.room_target)
        .with_silent_device(&config.entrance_target)
        .with_device(&device::name_for("301", "101"))
        .with_device(&device::name_for("301", "102"))
}

#[cfg(feature = "bluetooth")]
async fn bluetooth_transport() -> anyhow::Result<BoxedTransport> {
    let transport = doorlock_transport::BleTransport::new().await?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "bluetooth"))]
async fn bluetooth_transport() -> anyhow::Result<BoxedTransport> {
    anyhow::bail!("built without Bluetooth support (enable feature `bluetooth`) - use --simulate")
}

/// Ctrl-C cancels an in-flight frame; otherwise it exits
pub fn install_cancel_handler(session: &LockSession) {
    let session = session.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if session.is_sending() {
            eprintln!("\nCancelling...");
            session.cancel_sending();
        } else {
            std::process::exit(130);
        }
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }
}

/// Print one activity entry to stdout
pub fn print_entry(entry: &LogEvent) {
    let line = entry.render();
    match entry.level {
        LogLevel::Info => println!("{line}"),
        LogLevel::Success => println!("{}", line.green()),
        LogLevel::Warning => println!("{}", line.yellow()),
        LogLevel::Error => println!("{}", line.red().bold()),
    }
}

/// Shared handle for adding milestones from inside a running operation
#[derive(Clone)]
pub struct ActivityHandle(Arc<Mutex<ActivityLog>>);

impl ActivityHandle {
    pub fn note(&self, level: LogLevel, message: impl Into<String>) {
        let mut log = self.0.lock();
        print_entry(log.push(LogEvent::new(level, message)));
    }

    /// Start tracking a frame of `code`'s size
    pub fn begin_send(&self, code: CommandCode) {
        let mut log = self.0.lock();
        print_entry(log.begin_send(code));
    }

    pub fn progress(&self) -> SendProgress {
        self.0.lock().progress()
    }
}

/// Activity log fed by session events, printed as it grows
pub struct ActivityConsole {
    rx: broadcast::Receiver<LockEvent>,
    log: ActivityHandle,
}

impl ActivityConsole {
    pub fn new(session: &LockSession) -> Self {
        Self {
            rx: session.subscribe(),
            log: ActivityHandle(Arc::new(Mutex::new(ActivityLog::new()))),
        }
    }

    pub fn handle(&self) -> ActivityHandle {
        self.log.clone()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log.note(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log.note(LogLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log.note(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log.note(LogLevel::Error, message);
    }

    pub fn begin_send(&self, code: CommandCode) {
        self.log.begin_send(code);
    }

    /// Bytes of the current frame written so far
    pub fn progress(&self) -> SendProgress {
        self.log.progress()
    }

    fn record(&self, event: &LockEvent) {
        let mut log = self.log.0.lock();
        print_entry(log.record(event));
    }

    /// Record whatever events are already queued
    pub fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.record(&event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Activity log skipped {} events", n);
                }
                Err(_) => break,
            }
        }
    }

    /// Drive `fut` to completion while recording events as they arrive
    pub async fn run_while<F: Future>(&mut self, fut: F) -> F::Output {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => {
                    self.drain();
                    return out;
                }
                event = self.rx.recv() => match event {
                    Ok(event) => self.record(&event),
                    Err(RecvError::Lagged(n)) => warn!("Activity log skipped {} events", n),
                    Err(RecvError::Closed) => return (&mut fut).await,
                },
            }
        }
    }
}

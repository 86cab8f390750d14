//! OASYSS Door Lock Driver CLI
//!
//! A command-line interface for opening and managing OASYSS BLE door locks.

use clap::Parser;
use doorlock_session::DoorKind;
use doorlock_transport::LockCommand;
use tracing_subscriber::EnvFilter;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;
use commands::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // === Offline commands ===
    match &cli.command {
        Commands::Packet { code, fields, json } => {
            return commands::utility::packet(code, fields, *json);
        }
        Commands::Commands => return commands::utility::commands(),
        Commands::DeviceName { building, room } => {
            return commands::utility::device_name(building, room);
        }
        _ => {}
    }

    let ctx = Context::from_cli(&cli)?;

    match cli.command {
        Commands::Scan { timeout_ms } => commands::door::scan(&ctx, timeout_ms).await?,

        // === Auto-Open ===
        Commands::Open => commands::door::auto_open(&ctx, DoorKind::Room).await?,
        Commands::Entrance => commands::door::auto_open(&ctx, DoorKind::Entrance).await?,

        // === Single commands ===
        Commands::Send { code, fields } => {
            let code = door_driver::parse_code(&code)?;
            let params = doorlock_transport::CommandParams::from_text(
                code,
                &fields.order,
                &fields.number,
                &fields.cycle,
            );
            commands::door::single(&ctx, LockCommand::Raw(code, params)).await?;
        }
        Commands::Close => commands::door::single(&ctx, LockCommand::Close).await?,
        Commands::Status => commands::door::single(&ctx, LockCommand::Status).await?,
        Commands::SetTime => commands::door::single(&ctx, LockCommand::SetTime).await?,
        Commands::Battery => commands::door::single(&ctx, LockCommand::Battery).await?,
        Commands::Enroll { fields } => {
            let command = LockCommand::enroll(&fields.order, &fields.number, &fields.cycle)?;
            commands::door::single(&ctx, command).await?;
        }
        Commands::Revoke { order } => {
            commands::door::single(&ctx, LockCommand::revoke(&order)?).await?;
        }
        Commands::RevokeAll => commands::door::single(&ctx, LockCommand::RevokeAll).await?,

        Commands::Packet { .. } | Commands::Commands | Commands::DeviceName { .. } => {}
    }

    Ok(())
}

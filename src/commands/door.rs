//! Door lock command handlers.

use std::time::Duration;

use door_driver::LogLevel;
use doorlock_session::{
    AutoOpen, ConnectionState, DoorKind, LockError, LockEvent, LockSession, SendOutcome,
    WorkflowStage,
};
use doorlock_transport::LockCommand;
use tokio::sync::broadcast::error::RecvError;

use super::{install_cancel_handler, ActivityConsole, CommandResult, Context};

/// How long to wait for the lock to hang up after a command
const HANGUP_WAIT: Duration = Duration::from_secs(2);

/// Generic prefix discovery
pub async fn scan(ctx: &Context, timeout_ms: u64) -> CommandResult {
    let session = ctx.session().await?;
    session.initialize().await?;

    let prefix = ctx.prefix();
    println!("Scanning for devices named {prefix}* ...");
    let devices = session
        .discover(&prefix, Duration::from_millis(timeout_ms))
        .await?;

    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }
    println!("Found {} device(s):", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<24} {:<20} {}",
            device.name.as_deref().unwrap_or("-"),
            device.id.as_str(),
            rssi
        );
    }
    Ok(())
}

fn stage_message(stage: WorkflowStage, target: &str) -> String {
    match stage {
        WorkflowStage::Initialize => "Initializing Bluetooth".to_string(),
        WorkflowStage::Connect => format!("Looking for {target}"),
        WorkflowStage::Settle => "Waiting for services".to_string(),
        WorkflowStage::Send => "Sending open command".to_string(),
    }
}

/// Auto-Open for the room lock or the entrance door
pub async fn auto_open(ctx: &Context, kind: DoorKind) -> CommandResult {
    let session = ctx.session().await?;
    install_cancel_handler(&session);
    let mut console = ActivityConsole::new(&session);

    let workflow = match kind {
        DoorKind::Room => AutoOpen::room(ctx.room_target()),
        DoorKind::Entrance => AutoOpen::entrance(ctx.entrance_target()),
    };
    console.info(format!("Auto-open of {} started", workflow.target()));

    let result = {
        let log = console.handle();
        let target = workflow.target().to_string();
        let code = workflow.command().code();
        console
            .run_while(workflow.run_observed(&session, move |stage| {
                log.note(LogLevel::Info, stage_message(stage, &target));
                if stage == WorkflowStage::Send {
                    log.begin_send(code);
                }
            }))
            .await
    };

    match result {
        Ok(SendOutcome::Completed) => {
            console.success("Door opened");
            let bound = match kind {
                DoorKind::Room => session.config().auto_disconnect_delay + HANGUP_WAIT,
                DoorKind::Entrance => session.config().entrance_disconnect_delay + HANGUP_WAIT,
            };
            console.run_while(wait_for_disconnect(&session, bound)).await;
        }
        Ok(SendOutcome::Cancelled) => {
            console.warning(format!("Cancelled after {} bytes", console.progress()));
        }
        Err(e) => {
            console.error(e.to_string());
            session.disconnect().await;
            console.drain();
            return Err(e.into());
        }
    }

    session.disconnect().await;
    console.drain();
    Ok(())
}

/// Connect to the room lock, send one command, wait for the hang-up
pub async fn single(ctx: &Context, command: LockCommand) -> CommandResult {
    let session = ctx.session().await?;
    install_cancel_handler(&session);
    let mut console = ActivityConsole::new(&session);
    let target = ctx.room_target();

    console.info(format!("Connecting to {target}"));
    let connected = console
        .run_while(async {
            session.initialize().await?;
            session.scan_and_connect(&target).await?;
            tokio::time::sleep(session.config().settle_delay).await;
            Ok::<_, LockError>(())
        })
        .await;
    if let Err(e) = connected {
        console.error(e.to_string());
        session.disconnect().await;
        return Err(e.into());
    }

    console.begin_send(command.code());
    let outcome = console.run_while(session.send_command(&command)).await;
    match outcome {
        Ok(SendOutcome::Completed) => {
            console
                .run_while(wait_for_disconnect(&session, HANGUP_WAIT))
                .await;
        }
        Ok(SendOutcome::Cancelled) => {
            console.warning(format!("Cancelled after {} bytes", console.progress()));
        }
        Err(e) => {
            console.error(e.to_string());
            session.disconnect().await;
            console.drain();
            return Err(e.into());
        }
    }

    session.disconnect().await;
    console.drain();
    Ok(())
}

/// Resolve once the session reports Disconnected, or after `bound`
async fn wait_for_disconnect(session: &LockSession, bound: Duration) {
    let mut rx = session.subscribe();
    if session.connection_state() == ConnectionState::Disconnected {
        return;
    }
    let _ = tokio::time::timeout(bound, async {
        loop {
            match rx.recv().await {
                Ok(LockEvent::ConnectionStateChanged(ConnectionState::Disconnected))
                | Err(RecvError::Closed) => break,
                _ => {}
            }
        }
    })
    .await;
}

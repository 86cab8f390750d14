//! Offline command handlers.

use door_driver::report::{command_table, packet_json, packet_text};
use door_driver::parse_code;
use doorlock_transport::protocol::device;
use doorlock_transport::{CommandParams, LockCommand, SystemClock};

use super::CommandResult;
use crate::cli::CardFields;

/// Print the frame a command encodes to
pub fn packet(code: &str, fields: &CardFields, json: bool) -> CommandResult {
    let code = parse_code(code)?;
    let params = CommandParams::from_text(code, &fields.order, &fields.number, &fields.cycle);
    let packet = LockCommand::Raw(code, params).packet(&SystemClock);

    if json {
        println!("{}", serde_json::to_string_pretty(&packet_json(&packet))?);
    } else {
        println!("{}", packet_text(&packet));
    }
    Ok(())
}

/// List every command code
pub fn commands() -> CommandResult {
    println!("{}", command_table());
    Ok(())
}

/// Print the advertised name of a room
pub fn device_name(building: &str, room: &str) -> CommandResult {
    println!("{}", device::name_for(building, room));
    Ok(())
}

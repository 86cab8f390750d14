//! Integration tests for the driver library.
//!
//! These exercise the pieces the CLI stitches together: loading a config
//! file into session timing, rendering offline packet reports, and turning
//! session events into activity log lines.

use std::path::PathBuf;
use std::time::Duration;

use door_driver::report::{command_table, packet_json, packet_text};
use door_driver::{parse_code, ActivityLog, ConfigError, DriverConfig, LogLevel};
use doorlock_transport::{
    CommandCode, CommandParams, ConnectionState, LockCommand, LockEvent, SystemClock,
};

fn temp_config(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "door_driver_{}_{}.toml",
        name,
        std::process::id()
    ));
    std::fs::write(&path, contents).unwrap();
    path
}

// ── Config file → session timing ──

#[test]
fn config_missing_file_gives_defaults() {
    let path = std::env::temp_dir().join("door_driver_does_not_exist.toml");
    let config = DriverConfig::load(&path).unwrap();
    assert_eq!(config, DriverConfig::default());
    assert_eq!(config.room_target, "oasyss_000201");
    assert_eq!(config.entrance_target, "oasyss_0009999");

    let session = config.session_config();
    assert_eq!(session.scan_timeout, Duration::from_millis(8000));
    assert_eq!(session.send.byte_delay, Duration::from_millis(50));
    assert_eq!(session.send.max_retries, 3);
}

#[test]
fn config_file_overrides_targets_and_timing() {
    let path = temp_config(
        "overrides",
        r#"
room_target = "oasyss_000305"
prefix = "oasyss"

[timing]
byte_delay_ms = 80
max_retries = 5
entrance_disconnect_delay_ms = 3000
"#,
    );
    let config = DriverConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(config.room_target, "oasyss_000305");
    assert_eq!(config.prefix, "oasyss");
    // Unset fields keep their defaults
    assert_eq!(config.entrance_target, "oasyss_0009999");

    let session = config.session_config();
    assert_eq!(session.send.byte_delay, Duration::from_millis(80));
    assert_eq!(session.send.max_retries, 5);
    assert_eq!(session.entrance_disconnect_delay, Duration::from_millis(3000));
    assert_eq!(session.auto_disconnect_delay, Duration::from_millis(500));
}

#[test]
fn config_rejects_unknown_keys() {
    let path = temp_config("unknown", "room = \"oasyss_000201\"\n");
    let result = DriverConfig::load(&path);
    std::fs::remove_file(&path).ok();
    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

#[test]
fn config_rejects_malformed_toml() {
    let path = temp_config("malformed", "room_target = \n[timing\n");
    let result = DriverConfig::load(&path);
    std::fs::remove_file(&path).ok();
    let err = result.unwrap_err();
    assert!(err.to_string().starts_with("Invalid config"));
}

// ── Offline reports ──

#[test]
fn packet_report_for_remote_open() {
    let code = parse_code("0x01").unwrap();
    let packet =
        LockCommand::Raw(code, CommandParams::from_text(code, "", "", "")).packet(&SystemClock);

    let text = packet_text(&packet);
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("0x01 REMOTE_OPEN (10 bytes)"));
    assert!(lines.next().unwrap().starts_with("CC 01 00 00 00 01 02 03 04"));

    let json = packet_json(&packet);
    assert_eq!(json["bytes"].as_array().unwrap().len(), 10);
    assert_eq!(json["hex"], packet.to_hex());
}

#[test]
fn packet_report_flags_unknown_codes() {
    let code = parse_code("7F").unwrap();
    let packet = LockCommand::Raw(code, CommandParams::None).packet(&SystemClock);
    assert!(packet_text(&packet).ends_with("unknown code: payload left empty"));
}

#[test]
fn command_table_lists_every_code() {
    let table = command_table();
    assert_eq!(table.lines().count(), 33);
    assert!(table.lines().next().unwrap().starts_with("0x00"));
    assert!(table.lines().last().unwrap().starts_with("0x21"));
}

// ── Session events → activity log ──

#[test]
fn activity_log_follows_a_send() {
    let mut log = ActivityLog::new();
    log.begin_send(CommandCode(0x01));
    assert_eq!(log.progress().total, 10);

    log.record(&LockEvent::Progress {
        byte: 0xCC,
        remaining: 9,
    });
    log.record(&LockEvent::Progress {
        byte: 0x01,
        remaining: 8,
    });
    assert_eq!(log.progress().sent, 2);
    assert_eq!(log.progress().to_string(), "2/10");

    log.record(&LockEvent::Complete);
    log.record(&LockEvent::ConnectionStateChanged(
        ConnectionState::Disconnected,
    ));

    let levels: Vec<LogLevel> = log.entries().iter().map(|e| e.level).collect();
    assert_eq!(
        levels,
        vec![
            LogLevel::Info,
            LogLevel::Info,
            LogLevel::Info,
            LogLevel::Success,
            LogLevel::Info,
        ]
    );
    let rendered = log.render();
    assert!(rendered.contains("Sent 0xCC"));
    assert!(rendered.contains("All bytes sent"));
    assert!(rendered.ends_with("Link disconnected"));
}

#[test]
fn activity_log_reports_failures() {
    let mut log = ActivityLog::new();
    log.begin_send(CommandCode(0x1D));
    let entry = log.record(&LockEvent::Error("Failed to send byte: 0x01".into()));
    assert_eq!(entry.level, LogLevel::Error);
    assert_eq!(entry.message, "Send failed: Failed to send byte: 0x01");
    assert_eq!(log.progress().total, 0);
}

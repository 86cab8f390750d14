//! Protocol constants and utilities for OASYSS door lock communication

use uuid::Uuid;

/// Frame header byte
pub const HEADER: u8 = 0xCC;

/// Standard frame: header, command, bytes 2..=8, checksum
pub const STANDARD_FRAME_LEN: usize = 10;

/// Extended frame used by card enrollment/revocation: header, command,
/// sub-field, 9 payload bytes, checksum
pub const EXTENDED_FRAME_LEN: usize = 13;

/// Identifier bytes carried by an enrollment frame
pub const IDENTIFIER_LEN: usize = 7;

/// Fill value for blank or unparseable operator input
pub const FIELD_DEFAULT: u8 = 0xFF;

/// Fixed administrator credential carried by remote open/close (aPW1..aPW4)
pub const ADMIN_CREDENTIAL: [u8; 4] = [0x01, 0x02, 0x03, 0x04];

/// Sub-type marker at byte 2 of the entrance-open frame
pub const ENTRANCE_SUBTYPE: u8 = 0x01;

/// Second byte of a notification that tells us the lock is hanging up
pub const HANGUP_SIGNAL: u8 = 0x81;

/// Door lock commands
pub mod cmd {
    pub const REMOTE_CLOSE: u8 = 0x00;
    pub const REMOTE_OPEN: u8 = 0x01;
    pub const STATUS: u8 = 0x02;
    pub const RESERVED_03: u8 = 0x03;
    pub const RESERVED_04: u8 = 0x04;
    pub const SET_TIME: u8 = 0x05;
    pub const USE_CONTROL_SET: u8 = 0x06;
    pub const USE_CONTROL_RELEASE: u8 = 0x07;
    pub const MANUAL_LOCK_MODE: u8 = 0x08;
    pub const AUTO_LOCK_MODE: u8 = 0x09;
    pub const BLE_OPEN: u8 = 0x0A;
    pub const BLE_AUTH_CHANGE: u8 = 0x0B;
    pub const KEYPAD_TIME_WINDOW: u8 = 0x0C;
    pub const FACTORY_RESET: u8 = 0x0D;
    pub const SUPER_ADMIN_CHANGE: u8 = 0x0E;
    pub const TOUCH_PASSWORD_4: u8 = 0x0F;
    pub const BLE_CLOSE: u8 = 0x10;
    pub const RECENT_EVENT: u8 = 0x11;
    pub const MUTE_SET: u8 = 0x12;
    pub const MUTE_RELEASE: u8 = 0x13;
    pub const DOOR_OPEN_EVENT: u8 = 0x14;
    pub const CARD_SETTING: u8 = 0x15;
    pub const CARD_SETTING_VIEW: u8 = 0x16;
    pub const MANAGER_PASSWORD: u8 = 0x17;
    pub const MAID_PASSWORD: u8 = 0x18;
    pub const PASSWORD_USER_CHECK: u8 = 0x19;
    pub const TOUCH_PASSWORD_8: u8 = 0x1A;
    pub const PASSWORD_MODE_CHECK: u8 = 0x1B;
    pub const BATTERY_CHECK: u8 = 0x1C;

    // Extended (13-byte) frames
    pub const CARD_ENROLL: u8 = 0x1D;
    pub const CARD_REVOKE: u8 = 0x1E;
    pub const CARD_REVOKE_ALL: u8 = 0x1F;

    /// Shared entrance door, no in-band response
    pub const ENTRANCE_OPEN: u8 = 0x21;

    /// Commands that use the 13-byte frame
    pub const EXTENDED: [u8; 3] = [CARD_ENROLL, CARD_REVOKE, CARD_REVOKE_ALL];

    /// Commands whose payload carries the current date and time
    pub const TIME_SYNC: [u8; 2] = [SET_TIME, KEYPAD_TIME_WINDOW];

    /// Get human-readable name for command byte
    pub fn name(cmd: u8) -> &'static str {
        match cmd {
            REMOTE_CLOSE => "REMOTE_CLOSE",
            REMOTE_OPEN => "REMOTE_OPEN",
            STATUS => "STATUS",
            RESERVED_03 => "RESERVED_03",
            RESERVED_04 => "RESERVED_04",
            SET_TIME => "SET_TIME",
            USE_CONTROL_SET => "USE_CONTROL_SET",
            USE_CONTROL_RELEASE => "USE_CONTROL_RELEASE",
            MANUAL_LOCK_MODE => "MANUAL_LOCK_MODE",
            AUTO_LOCK_MODE => "AUTO_LOCK_MODE",
            BLE_OPEN => "BLE_OPEN",
            BLE_AUTH_CHANGE => "BLE_AUTH_CHANGE",
            KEYPAD_TIME_WINDOW => "KEYPAD_TIME_WINDOW",
            FACTORY_RESET => "FACTORY_RESET",
            SUPER_ADMIN_CHANGE => "SUPER_ADMIN_CHANGE",
            TOUCH_PASSWORD_4 => "TOUCH_PASSWORD_4",
            BLE_CLOSE => "BLE_CLOSE",
            RECENT_EVENT => "RECENT_EVENT",
            MUTE_SET => "MUTE_SET",
            MUTE_RELEASE => "MUTE_RELEASE",
            DOOR_OPEN_EVENT => "DOOR_OPEN_EVENT",
            CARD_SETTING => "CARD_SETTING",
            CARD_SETTING_VIEW => "CARD_SETTING_VIEW",
            MANAGER_PASSWORD => "MANAGER_PASSWORD",
            MAID_PASSWORD => "MAID_PASSWORD",
            PASSWORD_USER_CHECK => "PASSWORD_USER_CHECK",
            TOUCH_PASSWORD_8 => "TOUCH_PASSWORD_8",
            PASSWORD_MODE_CHECK => "PASSWORD_MODE_CHECK",
            BATTERY_CHECK => "BATTERY_CHECK",
            CARD_ENROLL => "CARD_ENROLL",
            CARD_REVOKE => "CARD_REVOKE",
            CARD_REVOKE_ALL => "CARD_REVOKE_ALL",
            ENTRANCE_OPEN => "ENTRANCE_OPEN",
            _ => "UNKNOWN",
        }
    }

    /// Check if a command uses the 13-byte frame
    pub fn is_extended(cmd: u8) -> bool {
        EXTENDED.contains(&cmd)
    }
}

/// Frame length for a command code
pub fn frame_len(cmd: u8) -> usize {
    if cmd::is_extended(cmd) {
        EXTENDED_FRAME_LEN
    } else {
        STANDARD_FRAME_LEN
    }
}

/// Sum of bytes modulo 256
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Check whether a notification buffer carries the hang-up signal
pub fn is_hangup_signal(buf: &[u8]) -> bool {
    buf.get(1) == Some(&HANGUP_SIGNAL)
}

/// Format bytes as upper-case, space-separated hex
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// GATT service and characteristic UUIDs
pub mod uuids {
    use super::Uuid;

    /// Main data service
    pub const MAIN_SERVICE: Uuid = Uuid::from_u128(0x8c2e1f04_37b3_4e4e_8c1a_f2d57ab8c3b6);

    /// Notify characteristic (lock -> app)
    pub const NOTIFY: Uuid = Uuid::from_u128(0xa7c384d0_5fc2_41a1_bf3a_1a8d0fc167be);

    /// Command characteristic (app -> lock)
    pub const COMMAND: Uuid = Uuid::from_u128(0xc5bd6ef7_94ab_4ac6_a2dc_9235d7aa22cd);
}

/// Advertised names of the deployment's devices
pub mod device {
    /// Prefix used by generic discovery
    pub const NAME_PREFIX: &str = "unist";

    /// Per-room lock
    pub const ROOM_LOCK: &str = "oasyss_000201";

    /// Shared entrance door
    pub const ENTRANCE: &str = "oasyss_0009999";

    /// Build a room's advertised name from building and room labels
    ///
    /// Non-digits are dropped: ("301동", "101") -> "unist_301101"
    pub fn name_for(building: &str, room: &str) -> String {
        let digits = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();
        format!("{}_{}{}", NAME_PREFIX, digits(building), digits(room))
    }
}

/// Link timing constants
pub mod timing {
    /// Delay between two successful byte writes (ms)
    pub const BYTE_SEND_DELAY_MS: u64 = 50;
    /// Delay before retrying a failed byte write (ms)
    pub const RETRY_DELAY_MS: u64 = 100;
    /// Retries per byte before the packet is abandoned
    pub const MAX_RETRY_COUNT: u32 = 3;
    /// Named-target discovery window (ms)
    pub const SCAN_TIMEOUT_MS: u64 = 8000;
    /// Link establishment bound (ms)
    pub const CONNECT_TIMEOUT_MS: u64 = 8000;
    /// Wait after connecting before the first send (ms)
    pub const SETTLE_DELAY_MS: u64 = 1000;
    /// Teardown delay after the hang-up signal (ms)
    pub const AUTO_DISCONNECT_DELAY_MS: u64 = 500;
    /// Teardown delay after an entrance-open send (ms)
    pub const ENTRANCE_DISCONNECT_DELAY_MS: u64 = 2000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0xCC, 0x01]), 0xCD);
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
    }

    #[test]
    fn test_hangup_signal_position() {
        assert!(is_hangup_signal(&[0xCC, 0x81]));
        assert!(is_hangup_signal(&[0x00, 0x81, 0x01, 0x02]));
        assert!(!is_hangup_signal(&[0x81]));
        assert!(!is_hangup_signal(&[0x81, 0x00]));
        assert!(!is_hangup_signal(&[]));
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(frame_len(cmd::REMOTE_OPEN), STANDARD_FRAME_LEN);
        assert_eq!(frame_len(cmd::ENTRANCE_OPEN), STANDARD_FRAME_LEN);
        for code in cmd::EXTENDED {
            assert_eq!(frame_len(code), EXTENDED_FRAME_LEN);
        }
    }

    #[test]
    fn test_device_name_for() {
        assert_eq!(device::name_for("301동", "101"), "unist_301101");
        assert_eq!(device::name_for("B-2", "room 7"), "unist_27");
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0xCC, 0x01, 0x0a]), "CC 01 0A");
    }
}

//! Command vocabulary shared with the firmware.
//!
//! The numeric value is what crosses the wire. Ids are never reordered or
//! reused once assigned.

use std::fmt;

/// Protocol command identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub u16);

impl CommandId {
    /// Request device status. The device answers with [`CommandId::INFO`].
    pub const STATUS: Self = Self(0);
    /// Device info reply: board type, firmware version, max modules.
    pub const INFO: Self = Self(1);
    /// Set complete configuration (reserved, unused by current firmware).
    pub const SET_CONFIG: Self = Self(2);
    /// Request the stored configuration.
    pub const GET_CONFIG: Self = Self(3);
    /// One module of a configuration dump: id, type, pin, pin2.
    pub const CONFIG_INFO: Self = Self(4);
    /// Set module pins: id, type, pin, pin2.
    pub const SET_PIN: Self = Self(5);
    /// Set module key command: id, key command.
    pub const SET_KEY: Self = Self(6);
    /// Input trigger event from the device: id, value.
    pub const TRIGGER: Self = Self(7);
    /// Drop all module configuration.
    pub const RESET_CONFIG: Self = Self(8);
    /// Persist configuration to EEPROM and reload modules.
    pub const SAVE_CONFIG: Self = Self(9);
    /// Generic acknowledgment.
    pub const ACK: Self = Self(10);
    /// Error report.
    pub const ERROR: Self = Self(11);
    /// Debug text.
    pub const DEBUG: Self = Self(12);

    /// Raw wire value.
    pub fn value(self) -> u16 {
        self.0
    }

    /// Whether the id belongs to the known vocabulary.
    pub fn is_known(self) -> bool {
        self.0 <= Self::DEBUG.0
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::STATUS => "STATUS",
            Self::INFO => "INFO",
            Self::SET_CONFIG => "SET_CONFIG",
            Self::GET_CONFIG => "GET_CONFIG",
            Self::CONFIG_INFO => "CONFIG_INFO",
            Self::SET_PIN => "SET_PIN",
            Self::SET_KEY => "SET_KEY",
            Self::TRIGGER => "TRIGGER",
            Self::RESET_CONFIG => "RESET_CONFIG",
            Self::SAVE_CONFIG => "SAVE_CONFIG",
            Self::ACK => "ACK",
            Self::ERROR => "ERROR",
            Self::DEBUG => "DEBUG",
            _ => "UNKNOWN",
        }
    }
}

impl From<u16> for CommandId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_stable() {
        let expected = [
            (CommandId::STATUS, 0),
            (CommandId::INFO, 1),
            (CommandId::SET_CONFIG, 2),
            (CommandId::GET_CONFIG, 3),
            (CommandId::CONFIG_INFO, 4),
            (CommandId::SET_PIN, 5),
            (CommandId::SET_KEY, 6),
            (CommandId::TRIGGER, 7),
            (CommandId::RESET_CONFIG, 8),
            (CommandId::SAVE_CONFIG, 9),
            (CommandId::ACK, 10),
            (CommandId::ERROR, 11),
            (CommandId::DEBUG, 12),
        ];
        for (id, value) in expected {
            assert_eq!(id.value(), value, "{id}");
            assert!(id.is_known());
        }
    }

    #[test]
    fn unknown_ids_keep_their_value() {
        let id = CommandId::from(42);
        assert!(!id.is_known());
        assert_eq!(id.name(), "UNKNOWN");
        assert_eq!(id.to_string(), "UNKNOWN(42)");
    }
}

//! Input module data model.
//!
//! A [`DeviceConfiguration`] is the in-memory snapshot the upload sequencer
//! turns into commands. Persisting it is left to the caller.

use std::fmt;
use std::str::FromStr;

use keyflight_frame::{COMMAND_SEPARATOR, FIELD_SEPARATOR};
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Maximum number of modules a device accepts.
pub const MAX_MODULES: usize = 40;

/// Highest usable pin number.
pub const MAX_PIN: u8 = 69;

/// Kind of physical input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputKind {
    /// Momentary push button.
    Button = 1,
    /// Rotary encoder with detents.
    Encoder = 2,
    /// Toggle switch (ON/OFF).
    Switch = 3,
    /// Analog input (potentiometer, slider).
    Analog = 4,
}

impl InputKind {
    /// Upper-case name used on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Button => "BUTTON",
            Self::Encoder => "ENCODER",
            Self::Switch => "SWITCH",
            Self::Analog => "ANALOG",
        }
    }

    /// Whether the secondary pin carries meaning.
    pub fn uses_pin2(self) -> bool {
        self == Self::Encoder
    }

    /// Whether a secondary key command is uploaded (encoder CCW, switch OFF).
    pub fn uses_key2(self) -> bool {
        matches!(self, Self::Encoder | Self::Switch)
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Button => "Button",
            Self::Encoder => "Encoder",
            Self::Switch => "Switch",
            Self::Analog => "Analog",
        })
    }
}

impl FromStr for InputKind {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUTTON" => Ok(Self::Button),
            "ENCODER" => Ok(Self::Encoder),
            "SWITCH" => Ok(Self::Switch),
            "ANALOG" => Ok(Self::Analog),
            _ => Err(LinkError::InvalidModule(format!("unknown input type '{s}'"))),
        }
    }
}

/// One configured input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputModule {
    /// Unique module id.
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: InputKind,
    /// Display name.
    pub name: String,
    /// Primary pin.
    pub pin: u8,
    /// Secondary pin. Only encoders use it; other kinds still send it.
    pub pin2: u8,
    /// Key command, e.g. `CTRL+F`.
    pub key_command: String,
    /// Secondary key command (encoder CCW, switch OFF).
    pub key_command2: String,
    /// Encoder sensitivity (1, 10, 100, 1000).
    pub sensitivity: u16,
    pub enabled: bool,
}

impl InputModule {
    /// Create an enabled module with no secondary pin or key.
    pub fn new(id: u32, kind: InputKind, pin: u8, key_command: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: format!("{kind} {id}"),
            pin,
            pin2: 0,
            key_command: key_command.into(),
            key_command2: String::new(),
            sensitivity: 1,
            enabled: true,
        }
    }

    /// Set the secondary pin.
    pub fn with_pin2(mut self, pin2: u8) -> Self {
        self.pin2 = pin2;
        self
    }

    /// Set the secondary key command.
    pub fn with_key2(mut self, key_command2: impl Into<String>) -> Self {
        self.key_command2 = key_command2.into();
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark the module disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check the descriptor against what the firmware accepts.
    pub fn validate(&self) -> Result<()> {
        if self.pin > MAX_PIN {
            return Err(invalid(format!("pin {} is out of range (0-{MAX_PIN})", self.pin)));
        }
        if self.kind.uses_pin2() && self.pin2 > MAX_PIN {
            return Err(invalid(format!(
                "encoder pin2 {} is out of range (0-{MAX_PIN})",
                self.pin2
            )));
        }
        if self.key_command.trim().is_empty() {
            return Err(invalid("key command cannot be empty"));
        }
        if self.kind == InputKind::Encoder && self.key_command2.trim().is_empty() {
            return Err(invalid("encoder requires both key commands (CW and CCW)"));
        }
        for key in [&self.key_command, &self.key_command2] {
            if key.contains([FIELD_SEPARATOR, COMMAND_SEPARATOR]) {
                return Err(invalid(format!(
                    "key command '{key}' contains '{FIELD_SEPARATOR}' or '{COMMAND_SEPARATOR}'"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for InputModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) - Pin {}", self.name, self.kind, self.pin)
    }
}

fn invalid(message: impl Into<String>) -> LinkError {
    LinkError::InvalidModule(message.into())
}

/// Complete device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfiguration {
    pub version: String,
    pub device_name: String,
    pub modules: Vec<InputModule>,
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            device_name: "KeyFlight Controller".to_string(),
            modules: Vec::new(),
        }
    }
}

impl DeviceConfiguration {
    /// Add a module after checking capacity, validity, id and pin uniqueness.
    pub fn add_module(&mut self, module: InputModule) -> Result<()> {
        if self.modules.len() >= MAX_MODULES {
            return Err(invalid(format!("maximum {MAX_MODULES} modules reached")));
        }
        module.validate()?;
        if self.modules.iter().any(|m| m.id == module.id) {
            return Err(invalid(format!("module id {} already exists", module.id)));
        }
        if let Some(other) = self.modules.iter().find(|m| m.pin == module.pin) {
            return Err(invalid(format!(
                "pin {} already used by {}",
                module.pin, other.name
            )));
        }
        self.modules.push(module);
        Ok(())
    }

    /// Remove the module with `id`. Returns whether one was removed.
    pub fn remove_module(&mut self, id: u32) -> bool {
        let before = self.modules.len();
        self.modules.retain(|m| m.id != id);
        self.modules.len() != before
    }

    /// Highest id plus one, or 0 when empty.
    pub fn next_module_id(&self) -> u32 {
        self.modules
            .iter()
            .map(|m| m.id)
            .max()
            .map_or(0, |id| id.saturating_add(1))
    }

    /// Modules that will be uploaded, in order.
    pub fn enabled_modules(&self) -> impl Iterator<Item = &InputModule> {
        self.modules.iter().filter(|m| m.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> InputModule {
        InputModule::new(3, InputKind::Encoder, 5, "A")
            .with_pin2(6)
            .with_key2("B")
    }

    #[test]
    fn wire_names_are_upper_case() {
        assert_eq!(InputKind::Button.wire_name(), "BUTTON");
        assert_eq!(InputKind::Encoder.wire_name(), "ENCODER");
        assert_eq!(InputKind::Switch.wire_name(), "SWITCH");
        assert_eq!(InputKind::Analog.wire_name(), "ANALOG");
        assert_eq!(InputKind::Encoder as u8, 2);
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("encoder".parse::<InputKind>().unwrap(), InputKind::Encoder);
        assert_eq!(" Switch ".parse::<InputKind>().unwrap(), InputKind::Switch);
        assert!("slider".parse::<InputKind>().is_err());
    }

    #[test]
    fn valid_encoder_passes() {
        encoder().validate().expect("encoder should validate");
    }

    #[test]
    fn pin_out_of_range() {
        let err = InputModule::new(0, InputKind::Button, 70, "F1")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("pin 70"), "{err}");
    }

    #[test]
    fn encoder_pin2_out_of_range() {
        let err = encoder().with_pin2(99).validate().unwrap_err();
        assert!(err.to_string().contains("pin2"), "{err}");
    }

    #[test]
    fn button_pin2_is_not_checked() {
        InputModule::new(0, InputKind::Button, 2, "F1")
            .with_pin2(200)
            .validate()
            .expect("button ignores pin2");
    }

    #[test]
    fn blank_key_rejected() {
        assert!(InputModule::new(0, InputKind::Button, 2, "  ")
            .validate()
            .is_err());
    }

    #[test]
    fn encoder_needs_second_key() {
        let module = InputModule::new(1, InputKind::Encoder, 2, "UP").with_pin2(3);
        assert!(module.validate().is_err());
    }

    #[test]
    fn separators_in_keys_rejected() {
        assert!(InputModule::new(0, InputKind::Button, 2, "A,B")
            .validate()
            .is_err());
        assert!(InputModule::new(0, InputKind::Switch, 2, "A")
            .with_key2("B;")
            .validate()
            .is_err());
    }

    #[test]
    fn add_module_enforces_uniqueness() {
        let mut config = DeviceConfiguration::default();
        config.add_module(encoder()).expect("first module");

        let dup_id = InputModule::new(3, InputKind::Button, 10, "F1");
        assert!(config.add_module(dup_id).unwrap_err().to_string().contains("id 3"));

        let dup_pin = InputModule::new(4, InputKind::Button, 5, "F1");
        assert!(config.add_module(dup_pin).unwrap_err().to_string().contains("pin 5"));

        assert_eq!(config.modules.len(), 1);
    }

    #[test]
    fn add_module_enforces_capacity() {
        let mut config = DeviceConfiguration::default();
        for id in 0..MAX_MODULES as u32 {
            config
                .add_module(InputModule::new(id, InputKind::Button, id as u8, "F1"))
                .expect("module within capacity");
        }
        let err = config
            .add_module(InputModule::new(99, InputKind::Button, 60, "F1"))
            .unwrap_err();
        assert!(err.to_string().contains("maximum 40"), "{err}");
    }

    #[test]
    fn remove_and_next_id() {
        let mut config = DeviceConfiguration::default();
        assert_eq!(config.next_module_id(), 0);

        config.add_module(encoder()).unwrap();
        config
            .add_module(InputModule::new(7, InputKind::Button, 8, "F7"))
            .unwrap();
        assert_eq!(config.next_module_id(), 8);

        assert!(config.remove_module(7));
        assert!(!config.remove_module(7));
        assert_eq!(config.next_module_id(), 4);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let mut config = DeviceConfiguration::default();
        config.add_module(encoder()).unwrap();

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["deviceName"], "KeyFlight Controller");
        assert_eq!(json["modules"][0]["type"], "Encoder");
        assert_eq!(json["modules"][0]["keyCommand2"], "B");

        let back: DeviceConfiguration = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}

//! # Outbound Command Encoder
//!
//! Encodes bridge-to-device commands as single protocol lines.

/// A command the bridge can send to the device
///
/// Value-carrying commands encode as `PREFIX:value`; the two requests are
/// bare words. The transport appends the trailing newline delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `DRIVE:<value>` - drive motor state (stop/forward/backward)
    Drive(String),

    /// `STEER:<value>` - steering position
    Steer(String),

    /// `LIGHTS:<value>` - headlight state (on/off)
    Lights(String),

    /// `LCD:<text>` - free text for the device's LCD
    Lcd(String),

    /// `GET_ALL` - request a full state report
    GetAll,

    /// `GET_SENSORS` - request a sensor report
    GetSensors,
}

impl Command {
    /// Encode the command as a protocol line (without the trailing newline)
    ///
    /// # Examples
    ///
    /// ```
    /// use drone_bridge::protocol::Command;
    ///
    /// assert_eq!(Command::Drive("forward".to_string()).encode(), "DRIVE:forward");
    /// assert_eq!(Command::GetSensors.encode(), "GET_SENSORS");
    /// ```
    pub fn encode(&self) -> String {
        match self {
            Command::Drive(value) => format!("DRIVE:{}", value),
            Command::Steer(value) => format!("STEER:{}", value),
            Command::Lights(value) => format!("LIGHTS:{}", value),
            Command::Lcd(text) => format!("LCD:{}", text),
            Command::GetAll => "GET_ALL".to_string(),
            Command::GetSensors => "GET_SENSORS".to_string(),
        }
    }
}

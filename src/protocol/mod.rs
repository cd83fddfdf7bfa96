//! # Device Protocol Module
//!
//! Implementation of the drone's line-oriented serial protocol.
//!
//! This module handles:
//! - Parsing inbound `SENSORS:` / `STATUS:` / `REQUEST:` messages
//! - Tolerating echoed debug noise before the message prefix
//! - Dropping malformed `key=value` segments without failing the line
//! - Encoding outbound device commands (`DRIVE:`, `STEER:`, `LIGHTS:`, `LCD:`, requests)

pub mod message;
pub mod command;

pub use command::Command;
pub use message::{parse_line, DeviceMessage};

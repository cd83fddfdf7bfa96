//! # Inbound Message Parser
//!
//! Decodes single-line device messages into a closed sum type.
//!
//! A device message is a type prefix followed by `key=value` pairs
//! separated by `;`, e.g. `SENSORS:DIST=20;LIGHT=300`. The device echoes
//! debug text on the same serial line, so the prefix may appear anywhere
//! in the line, not just at the start.

use crate::error::{BridgeError, Result};

/// Sensor report prefix
pub const SENSORS_PREFIX: &str = "SENSORS:";

/// Device-authoritative state report prefix
pub const STATUS_PREFIX: &str = "STATUS:";

/// Device-initiated request prefix
pub const REQUEST_PREFIX: &str = "REQUEST:";

/// A parsed device message
///
/// Pair values stay as raw strings at this layer; numeric conversion (and
/// its zero-substitution fallback) belongs to telemetry ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMessage {
    /// `SENSORS:<k>=<v>;...` - sensor observations
    Sensors(Vec<(String, String)>),

    /// `STATUS:<k>=<v>;...` - device-reported actuator state
    Status(Vec<(String, String)>),

    /// `REQUEST:<name>` - device asking the bridge for data
    Request(String),
}

/// Parse a single line of device output
///
/// Locates the earliest recognized prefix anywhere in the line (leading
/// noise such as echoed debug text is tolerated and discarded), then
/// splits the remainder into `key=value` pairs. Segments without a `=`
/// are dropped, not fatal.
///
/// # Arguments
///
/// * `line` - One complete line of device output, newline already stripped
///
/// # Returns
///
/// * `Result<DeviceMessage>` - Parsed message
///
/// # Errors
///
/// Returns [`BridgeError::Protocol`] if the line contains no recognized
/// prefix. The caller logs and drops such lines; they are never fatal.
///
/// # Examples
///
/// ```
/// use drone_bridge::protocol::{parse_line, DeviceMessage};
///
/// let msg = parse_line("SENSORS:DIST=20;LIGHT=300").unwrap();
/// match msg {
///     DeviceMessage::Sensors(pairs) => assert_eq!(pairs.len(), 2),
///     _ => panic!("expected sensors message"),
/// }
/// ```
pub fn parse_line(line: &str) -> Result<DeviceMessage> {
    let candidates = [
        (SENSORS_PREFIX, line.find(SENSORS_PREFIX)),
        (STATUS_PREFIX, line.find(STATUS_PREFIX)),
        (REQUEST_PREFIX, line.find(REQUEST_PREFIX)),
    ];

    let earliest = candidates
        .iter()
        .filter_map(|(prefix, pos)| pos.map(|p| (*prefix, p)))
        .min_by_key(|(_, pos)| *pos);

    let Some((prefix, pos)) = earliest else {
        return Err(BridgeError::Protocol(format!(
            "unrecognized device line: {:?}",
            line
        )));
    };

    let body = &line[pos + prefix.len()..];

    match prefix {
        SENSORS_PREFIX => Ok(DeviceMessage::Sensors(parse_pairs(body))),
        STATUS_PREFIX => Ok(DeviceMessage::Status(parse_pairs(body))),
        _ => Ok(DeviceMessage::Request(body.trim().to_string())),
    }
}

/// Split a message body into `key=value` pairs
///
/// Segments are separated by `;`; each segment splits on the first `=`
/// (values may themselves contain `=`). Malformed segments are dropped.
fn parse_pairs(body: &str) -> Vec<(String, String)> {
    body.split(';')
        .filter_map(|segment| {
            let segment = segment.trim();
            let (key, value) = segment.split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

//! Line codec for the ASCII command protocol.
//!
//! ```text
//! command: %<class><CMD> <PARAM>\r
//! reply:   %<class><CMD>=<VALUE>\r
//!          %<class><CMD>=ERR1..ERR4\r
//! ```

use crate::error::{ControlError, DeviceErrorCode};

/// Every line on the wire ends with a carriage return.
pub const TERMINATOR: u8 = b'\r';

/// Longest command or reply line, terminator included.
pub const MAX_LINE_LEN: usize = 136;

/// A well-formed reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The device acknowledged a set command.
    Ok,
    /// The device answered a query.
    Value(String),
}

impl Reply {
    /// Expect an acknowledgement.
    pub fn into_ack(self, command: &str) -> Result<(), ControlError> {
        match self {
            Reply::Ok => Ok(()),
            Reply::Value(v) => Err(ControlError::protocol(format!(
                "expected OK for {command}, got {v:?}"
            ))),
        }
    }

    /// Expect a value.
    pub fn into_value(self, command: &str) -> Result<String, ControlError> {
        match self {
            Reply::Value(v) => Ok(v),
            Reply::Ok => Err(ControlError::protocol(format!(
                "expected a value for {command}, got OK"
            ))),
        }
    }
}

/// Encode one command line.
pub fn encode(class: u8, name: &str, param: &str) -> String {
    format!("%{class}{name} {param}\r")
}

/// Strip the terminator and any stray line feed.
pub fn trim_line(raw: &str) -> &str {
    raw.trim_start_matches('\n')
        .trim_end_matches(['\r', '\n'])
}

/// Decode one reply line for the command `name` sent with `class`.
///
/// Error codes come back as `Err`: `ERR1`/`ERR2` as protocol errors carrying
/// the code, `ERR3`/`ERR4` as state errors.
pub fn decode_reply(class: u8, name: &str, line: &str) -> Result<Reply, ControlError> {
    let line = trim_line(line);
    let malformed = || ControlError::protocol(format!("malformed reply {line:?} to {name}"));

    let rest = line.strip_prefix('%').ok_or_else(malformed)?;
    let mut chars = rest.chars();
    let reply_class = chars.next().and_then(|c| c.to_digit(10)).ok_or_else(malformed)?;
    if reply_class != u32::from(class) {
        return Err(ControlError::protocol(format!(
            "reply class {reply_class} does not match request class {class} for {name}"
        )));
    }

    let body = chars.as_str();
    let (reply_name, value) = body.split_once('=').ok_or_else(malformed)?;
    if !reply_name.eq_ignore_ascii_case(name) {
        return Err(ControlError::protocol(format!(
            "reply for {reply_name:?} does not match request {name}"
        )));
    }

    if value == "OK" {
        return Ok(Reply::Ok);
    }
    if let Some(code) = DeviceErrorCode::from_reply(value) {
        return Err(ControlError::from_device_code(code, name));
    }
    if value.starts_with("ERR") {
        return Err(ControlError::protocol(format!(
            "unrecognised error code {value:?} for {name}"
        )));
    }

    Ok(Reply::Value(value.to_string()))
}

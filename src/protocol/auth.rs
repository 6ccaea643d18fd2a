//! Session greeting and challenge-response authentication.
//!
//! ```text
//! device → PJLINK 0\r                 no authentication
//! device → PJLINK 1 <8 hex nonce>\r   authentication required
//! client → <md5_hex(nonce + secret)>%1POWR ?\r
//! device → PJLINK ERRA\r              digest rejected, session closed
//! ```

use crate::error::ControlError;

const GREETING_PREFIX: &str = "PJLINK";
const AUTH_FAILURE: &str = "PJLINK ERRA";
const NONCE_LEN: usize = 8;

/// Length of the hex digest prepended to the first command.
pub const DIGEST_LEN: usize = 32;

/// What the device asked for when the session opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Greeting {
    /// No authentication required.
    Open,
    /// Authentication required with this nonce.
    Challenge { nonce: String },
}

impl Greeting {
    pub fn requires_auth(&self) -> bool {
        matches!(self, Greeting::Challenge { .. })
    }
}

/// Parse the first line a device sends after accepting a connection.
pub fn parse_greeting(line: &str) -> Result<Greeting, ControlError> {
    let mut parts = line.split(' ');
    if parts.next() != Some(GREETING_PREFIX) {
        return Err(ControlError::protocol(format!(
            "unexpected greeting {:?}",
            truncate(line)
        )));
    }

    match (parts.next(), parts.next(), parts.next()) {
        (Some("0"), None, None) => Ok(Greeting::Open),
        (Some("1"), Some(nonce), None) if is_valid_nonce(nonce) => Ok(Greeting::Challenge {
            nonce: nonce.to_string(),
        }),
        (Some("1"), Some(nonce), None) => Err(ControlError::protocol(format!(
            "malformed authentication nonce {:?}",
            truncate(nonce)
        ))),
        _ => Err(ControlError::protocol(format!(
            "unexpected greeting {:?}",
            truncate(line)
        ))),
    }
}

fn is_valid_nonce(nonce: &str) -> bool {
    nonce.len() == NONCE_LEN && nonce.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compute the lowercase hex MD5 digest of `nonce + secret`.
pub fn digest(nonce: &str, secret: &str) -> String {
    let mut input = String::with_capacity(nonce.len() + secret.len());
    input.push_str(nonce);
    input.push_str(secret);
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// True if the line is the device's authentication rejection.
pub fn is_auth_failure(line: &str) -> bool {
    line.eq_ignore_ascii_case(AUTH_FAILURE)
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(40) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

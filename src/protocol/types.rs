//! Typed values carried in replies.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ControlError;
use crate::protocol::commands::DeviceFamily;

/// Power status as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerStatus {
    Off,
    On,
    Cooling,
    Warming,
}

impl PowerStatus {
    pub fn parse(value: &str) -> Result<Self, ControlError> {
        match value {
            "0" => Ok(Self::Off),
            "1" => Ok(Self::On),
            "2" => Ok(Self::Cooling),
            "3" => Ok(Self::Warming),
            other => Err(ControlError::protocol(format!(
                "unknown power status {other:?}"
            ))),
        }
    }
}

/// Input terminal group (first digit of an input code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputGroup {
    Rgb,
    Video,
    Digital,
    Storage,
    Network,
    Internal,
}

impl InputGroup {
    fn from_digit(d: char) -> Option<Self> {
        match d {
            '1' => Some(Self::Rgb),
            '2' => Some(Self::Video),
            '3' => Some(Self::Digital),
            '4' => Some(Self::Storage),
            '5' => Some(Self::Network),
            '6' => Some(Self::Internal),
            _ => None,
        }
    }

    fn digit(&self) -> char {
        match self {
            Self::Rgb => '1',
            Self::Video => '2',
            Self::Digital => '3',
            Self::Storage => '4',
            Self::Network => '5',
            Self::Internal => '6',
        }
    }
}

/// An input source such as `31` (first digital input).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSource {
    pub group: InputGroup,
    pub index: char,
}

impl InputSource {
    /// True if a device of this family can address the input.
    pub fn supported_by(&self, family: DeviceFamily) -> bool {
        match family {
            DeviceFamily::Class1 => {
                self.group != InputGroup::Internal && ('1'..='9').contains(&self.index)
            }
            DeviceFamily::Class2 => {
                ('1'..='9').contains(&self.index) || self.index.is_ascii_uppercase()
            }
        }
    }
}

impl FromStr for InputSource {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let parsed = match (chars.next(), chars.next(), chars.next()) {
            (Some(g), Some(i), None) => InputGroup::from_digit(g)
                .filter(|_| ('1'..='9').contains(&i) || i.is_ascii_uppercase())
                .map(|group| InputSource { group, index: i }),
            _ => None,
        };
        parsed.ok_or_else(|| ControlError::protocol(format!("invalid input source {s:?}")))
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.group.digit(), self.index)
    }
}

impl Serialize for InputSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parse a space-separated input list (INST reply).
pub fn parse_input_list(value: &str) -> Result<Vec<InputSource>, ControlError> {
    value.split_whitespace().map(str::parse).collect()
}

/// Usage counter and state for one lamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LampStatus {
    pub hours: u32,
    pub lit: bool,
}

/// Parse a LAMP reply: `<hours> <0|1>` pairs, one per lamp.
pub fn parse_lamps(value: &str) -> Result<Vec<LampStatus>, ControlError> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.is_empty() || fields.len() % 2 != 0 {
        return Err(ControlError::protocol(format!("malformed lamp reply {value:?}")));
    }

    fields
        .chunks(2)
        .map(|pair| {
            let hours = pair[0]
                .parse::<u32>()
                .map_err(|_| ControlError::protocol(format!("invalid lamp hours {:?}", pair[0])))?;
            let lit = match pair[1] {
                "0" => false,
                "1" => true,
                other => {
                    return Err(ControlError::protocol(format!(
                        "invalid lamp state {other:?}"
                    )))
                }
            };
            Ok(LampStatus { hours, lit })
        })
        .collect()
}

/// Parse a FREZ reply: `1` frozen, `0` live.
pub fn parse_freeze(value: &str) -> Result<bool, ControlError> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(ControlError::protocol(format!(
            "unknown freeze state {other:?}"
        ))),
    }
}

/// Parse a FILT reply: filter usage in hours.
pub fn parse_filter_hours(value: &str) -> Result<u32, ControlError> {
    value
        .parse()
        .map_err(|_| ControlError::protocol(format!("invalid filter hours {value:?}")))
}

/// Severity of one error-status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Ok,
    Warning,
    Error,
}

/// Error status report (ERST reply).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorStatus {
    pub fan: Severity,
    pub lamp: Severity,
    pub temperature: Severity,
    pub cover: Severity,
    pub filter: Severity,
    pub other: Severity,
}

impl ErrorStatus {
    pub fn parse(value: &str) -> Result<Self, ControlError> {
        let levels = value
            .chars()
            .map(|c| match c {
                '0' => Some(Severity::Ok),
                '1' => Some(Severity::Warning),
                '2' => Some(Severity::Error),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .filter(|v| v.len() == 6)
            .ok_or_else(|| ControlError::protocol(format!("malformed error status {value:?}")))?;

        Ok(Self {
            fan: levels[0],
            lamp: levels[1],
            temperature: levels[2],
            cover: levels[3],
            filter: levels[4],
            other: levels[5],
        })
    }

    pub fn is_clear(&self) -> bool {
        [
            self.fan,
            self.lamp,
            self.temperature,
            self.cover,
            self.filter,
            self.other,
        ]
        .iter()
        .all(|s| *s == Severity::Ok)
    }
}

/// Audio/video mute state (AVMT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MuteState {
    pub video: bool,
    pub audio: bool,
}

impl MuteState {
    pub fn parse(value: &str) -> Result<Self, ControlError> {
        let state = match value {
            "10" | "20" | "30" => MuteState {
                video: false,
                audio: false,
            },
            "11" => MuteState {
                video: true,
                audio: false,
            },
            "21" => MuteState {
                video: false,
                audio: true,
            },
            "31" => MuteState {
                video: true,
                audio: true,
            },
            other => {
                return Err(ControlError::protocol(format!(
                    "unknown mute state {other:?}"
                )))
            }
        };
        Ok(state)
    }

    /// Parameter that mutes or unmutes audio and video together.
    pub fn set_param(muted: bool) -> &'static str {
        if muted {
            "31"
        } else {
            "30"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_power_status() {
        assert_eq!(PowerStatus::parse("3").unwrap(), PowerStatus::Warming);
        assert!(PowerStatus::parse("7").is_err());
    }

    #[test]
    fn input_sources_respect_family() {
        let hdmi: InputSource = "31".parse().unwrap();
        assert!(hdmi.supported_by(DeviceFamily::Class1));
        assert_eq!(hdmi.to_string(), "31");

        let extended: InputSource = "3A".parse().unwrap();
        assert!(!extended.supported_by(DeviceFamily::Class1));
        assert!(extended.supported_by(DeviceFamily::Class2));

        let internal: InputSource = "61".parse().unwrap();
        assert!(!internal.supported_by(DeviceFamily::Class1));

        assert!("71".parse::<InputSource>().is_err());
        assert!("3".parse::<InputSource>().is_err());
        assert!("30".parse::<InputSource>().is_err());
    }

    #[test]
    fn parses_lamp_pairs() {
        let lamps = parse_lamps("1200 1 35 0").unwrap();
        assert_eq!(
            lamps,
            vec![
                LampStatus { hours: 1200, lit: true },
                LampStatus { hours: 35, lit: false },
            ]
        );
        assert!(parse_lamps("1200").is_err());
        assert!(parse_lamps("x 1").is_err());
    }

    #[test]
    fn parses_error_status() {
        let status = ErrorStatus::parse("000000").unwrap();
        assert!(status.is_clear());

        let status = ErrorStatus::parse("020001").unwrap();
        assert_eq!(status.lamp, Severity::Error);
        assert_eq!(status.other, Severity::Warning);
        assert!(ErrorStatus::parse("0200").is_err());
        assert!(ErrorStatus::parse("02000x").is_err());
    }

    #[test]
    fn parses_mute_state() {
        assert_eq!(
            MuteState::parse("31").unwrap(),
            MuteState { video: true, audio: true }
        );
        assert_eq!(MuteState::set_param(false), "30");
        assert!(MuteState::parse("41").is_err());
    }
}

//! Allowlisted command tables per device family.
//!
//! A command that is not in the family's table is rejected as a protocol
//! error before anything is written to the wire. Vendor deviations get a new
//! table revision, not a special case in the client.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::error::ControlError;
use crate::protocol::codec::{self, MAX_LINE_LEN};

pub const POWR: &str = "POWR";
pub const INPT: &str = "INPT";
pub const AVMT: &str = "AVMT";
pub const ERST: &str = "ERST";
pub const LAMP: &str = "LAMP";
pub const INST: &str = "INST";
pub const NAME: &str = "NAME";
pub const INF1: &str = "INF1";
pub const INF2: &str = "INF2";
pub const INFO: &str = "INFO";
pub const CLSS: &str = "CLSS";
pub const SNUM: &str = "SNUM";
pub const SVER: &str = "SVER";
pub const INNM: &str = "INNM";
pub const FILT: &str = "FILT";
pub const RLMP: &str = "RLMP";
pub const RFIL: &str = "RFIL";
pub const FREZ: &str = "FREZ";

/// Protocol class implemented by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    #[default]
    Class1,
    Class2,
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFamily::Class1 => write!(f, "class1"),
            DeviceFamily::Class2 => write!(f, "class2"),
        }
    }
}

/// Whether a command may be queried, set, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Query,
    Set,
    Both,
}

impl Access {
    fn allows(&self, param: &Param) -> bool {
        match (self, param) {
            (Access::Both, _) => true,
            (Access::Query, Param::Query | Param::QueryFor(_)) => true,
            (Access::Set, Param::Value(_)) => true,
            _ => false,
        }
    }
}

/// One row of a command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    /// Class digit used in the `%<class>` prefix.
    pub class: u8,
    pub access: Access,
}

const fn spec(name: &'static str, class: u8, access: Access) -> CommandSpec {
    CommandSpec {
        name,
        class,
        access,
    }
}

const CLASS1_TABLE: &[CommandSpec] = &[
    spec(POWR, 1, Access::Both),
    spec(INPT, 1, Access::Both),
    spec(AVMT, 1, Access::Both),
    spec(ERST, 1, Access::Query),
    spec(LAMP, 1, Access::Query),
    spec(INST, 1, Access::Query),
    spec(NAME, 1, Access::Query),
    spec(INF1, 1, Access::Query),
    spec(INF2, 1, Access::Query),
    spec(INFO, 1, Access::Query),
    spec(CLSS, 1, Access::Query),
];

// Class 2 devices answer INPT and INST with the extended input set under the
// class 2 prefix.
const CLASS2_TABLE: &[CommandSpec] = &[
    spec(POWR, 1, Access::Both),
    spec(INPT, 2, Access::Both),
    spec(AVMT, 1, Access::Both),
    spec(ERST, 1, Access::Query),
    spec(LAMP, 1, Access::Query),
    spec(INST, 2, Access::Query),
    spec(NAME, 1, Access::Query),
    spec(INF1, 1, Access::Query),
    spec(INF2, 1, Access::Query),
    spec(INFO, 1, Access::Query),
    spec(CLSS, 1, Access::Query),
    spec(SNUM, 2, Access::Query),
    spec(SVER, 2, Access::Query),
    spec(INNM, 2, Access::Query),
    spec(FILT, 2, Access::Query),
    spec(RLMP, 2, Access::Query),
    spec(RFIL, 2, Access::Query),
    spec(FREZ, 2, Access::Both),
];

/// Command parameter: a query (`?`), a query about one item (`?31`) or a
/// value to set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Query,
    QueryFor(String),
    Value(String),
}

/// A command before it is resolved against a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    param: Param,
}

impl Command {
    pub fn query(name: &'static str) -> Self {
        Self {
            name,
            param: Param::Query,
        }
    }

    /// Query about one item, e.g. the name of input `31`.
    pub fn query_for(name: &'static str, item: impl Into<String>) -> Self {
        Self {
            name,
            param: Param::QueryFor(item.into()),
        }
    }

    pub fn set(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            param: Param::Value(value.into()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn param(&self) -> &Param {
        &self.param
    }

    fn param_str(&self) -> Cow<'_, str> {
        match &self.param {
            Param::Query => Cow::Borrowed("?"),
            Param::QueryFor(item) => Cow::Owned(format!("?{item}")),
            Param::Value(v) => Cow::Borrowed(v),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.param_str())
    }
}

/// A command resolved against a table and ready to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    pub class: u8,
    pub name: &'static str,
    pub line: String,
}

/// Versioned command table for one device family.
#[derive(Debug, Clone, Copy)]
pub struct CommandTable {
    family: DeviceFamily,
    revision: u16,
    specs: &'static [CommandSpec],
}

impl CommandTable {
    pub fn for_family(family: DeviceFamily) -> Self {
        match family {
            DeviceFamily::Class1 => Self {
                family,
                revision: 1,
                specs: CLASS1_TABLE,
            },
            DeviceFamily::Class2 => Self {
                family,
                revision: 1,
                specs: CLASS2_TABLE,
            },
        }
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn revision(&self) -> u16 {
        self.revision
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Resolve and encode a command, rejecting anything the table does not list.
    pub fn encode(&self, command: &Command) -> Result<EncodedCommand, ControlError> {
        let spec = self.lookup(command.name).ok_or_else(|| {
            ControlError::protocol(format!(
                "command {} is not supported by {} devices",
                command.name, self.family
            ))
        })?;

        if !spec.access.allows(&command.param) {
            return Err(ControlError::protocol(format!(
                "command {} does not accept {:?} on {} devices",
                command.name, command.param, self.family
            )));
        }

        let param = command.param_str();
        if param.is_empty() || !param.bytes().all(|b| (0x20..0x7f).contains(&b)) {
            return Err(ControlError::protocol(format!(
                "invalid parameter for {}",
                command.name
            )));
        }

        let line = codec::encode(spec.class, spec.name, &param);
        if line.len() > MAX_LINE_LEN {
            return Err(ControlError::protocol(format!(
                "command line for {} exceeds {} bytes",
                command.name, MAX_LINE_LEN
            )));
        }

        Ok(EncodedCommand {
            class: spec.class,
            name: spec.name,
            line,
        })
    }
}

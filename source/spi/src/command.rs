//! # Commands
//!
//! The first element of a request payload selects one of five commands:
//!
//! ```text
//! {read_at, Device, Address, Len}
//! {write_at, Device, Address, Len, Data}
//! {write, Device, Fields}
//! {write_read, Device, Fields}
//! close
//! ```
//!
//! Arguments are only split out here. Their contents are checked by the
//! dispatcher after the device has been looked up, so an unknown device is
//! always reported as such regardless of the other arguments.

use core::fmt;

use crate::Value;

/// The command selected by a request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    ReadAt {
        device: &'a Value,
        address: &'a Value,
        len: &'a Value,
    },
    WriteAt {
        device: &'a Value,
        address: &'a Value,
        len: &'a Value,
        data: &'a Value,
    },
    Write {
        device: &'a Value,
        fields: &'a Value,
    },
    WriteRead {
        device: &'a Value,
        fields: &'a Value,
    },
    Close,
    /// A known command with the wrong number of arguments.
    Malformed(Tag),
    /// Anything else.
    Unknown,
}

/// Command names.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tag {
    ReadAt,
    WriteAt,
    Write,
    WriteRead,
    Close,
}

impl Tag {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "read_at" => Tag::ReadAt,
            "write_at" => Tag::WriteAt,
            "write" => Tag::Write,
            "write_read" => Tag::WriteRead,
            "close" => Tag::Close,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tag::ReadAt => "read_at",
            Tag::WriteAt => "write_at",
            Tag::Write => "write",
            Tag::WriteRead => "write_read",
            Tag::Close => "close",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<'a> Command<'a> {
    pub fn parse(payload: &'a Value) -> Self {
        let (tag, args) = match payload {
            Value::Atom(name) => (name.as_str(), &[][..]),
            Value::Tuple(elems) => match elems.split_first() {
                Some((Value::Atom(name), args)) => (name.as_str(), args),
                _ => return Command::Unknown,
            },
            _ => return Command::Unknown,
        };
        let Some(tag) = Tag::from_name(tag) else {
            return Command::Unknown;
        };

        match (tag, args) {
            (Tag::ReadAt, [device, address, len]) => Command::ReadAt {
                device,
                address,
                len,
            },
            (Tag::WriteAt, [device, address, len, data]) => Command::WriteAt {
                device,
                address,
                len,
                data,
            },
            (Tag::Write, [device, fields]) => Command::Write { device, fields },
            (Tag::WriteRead, [device, fields]) => Command::WriteRead { device, fields },
            (Tag::Close, _) => Command::Close,
            (tag, _) => Command::Malformed(tag),
        }
    }

    pub fn tag(&self) -> Option<Tag> {
        match self {
            Command::ReadAt { .. } => Some(Tag::ReadAt),
            Command::WriteAt { .. } => Some(Tag::WriteAt),
            Command::Write { .. } => Some(Tag::Write),
            Command::WriteRead { .. } => Some(Tag::WriteRead),
            Command::Close => Some(Tag::Close),
            Command::Malformed(tag) => Some(*tag),
            Command::Unknown => None,
        }
    }
}

/// Build a `read_at` payload.
pub fn read_at(device: Value, address: u64, len: u32) -> Value {
    Value::Tuple(vec![
        Value::atom("read_at"),
        device,
        Value::integer(address as i64),
        len.into(),
    ])
}

/// Build a `write_at` payload.
pub fn write_at(device: Value, address: u64, len: u32, data: u32) -> Value {
    Value::Tuple(vec![
        Value::atom("write_at"),
        device,
        Value::integer(address as i64),
        len.into(),
        data.into(),
    ])
}

/// Build a `write` payload.
pub fn write(device: Value, fields: Value) -> Value {
    Value::Tuple(vec![Value::atom("write"), device, fields])
}

/// Build a `write_read` payload.
pub fn write_read(device: Value, fields: Value) -> Value {
    Value::Tuple(vec![Value::atom("write_read"), device, fields])
}

/// Build a `close` payload.
pub fn close() -> Value {
    Value::atom("close")
}

//! # Responses
//!
//! Every request produces exactly one of:
//!
//! | result                         | value                       |
//! | :---                           | :---                        |
//! | `Ok(Payload::Done)`            | `ok`                        |
//! | `Ok(Payload::Integer(n))`      | `{ok, n}`                   |
//! | `Ok(Payload::Bytes(b))`        | `{ok, <<b>>}`               |
//! | `Err(SpiError::Failed)`        | `error`                     |
//! | `Err(SpiError::DeviceNotFound)`| `{error, device_not_found}` |
//! | `Err(SpiError::BadArgument)`   | `{error, bad_argument}`     |
//! | `Err(SpiError::Transport(e))`  | `{error, code}`             |
//! | `Err(SpiError::OutOfMemory)`   | `out_of_memory`             |

use core::fmt;

use crate::{
    bus::TransportError,
    heap::{binary_words, BOXED_INT_WORDS, PAIR_WORDS},
    Value,
};

const DEVICE_NOT_FOUND: &str = "device_not_found";
const BAD_ARGUMENT: &str = "bad_argument";
const OUT_OF_MEMORY: &str = "out_of_memory";

/// A successful result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Done,
    Integer(u32),
    Bytes(Vec<u8>),
}

/// Errors returned by the SPI driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpiError {
    /// Unrecognized command.
    Failed,
    /// No device with that name is attached.
    DeviceNotFound,
    /// The request arguments were malformed.
    BadArgument,
    /// The bus reported an error.
    Transport(TransportError),
    /// There was no room to build the reply.
    OutOfMemory,
}

impl fmt::Display for SpiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => f.write_str("request failed"),
            Self::DeviceNotFound => f.write_str("device not found"),
            Self::BadArgument => f.write_str("bad argument"),
            Self::Transport(e) => fmt::Display::fmt(e, f),
            Self::OutOfMemory => f.write_str("out of memory"),
        }
    }
}

impl Payload {
    /// Heap words needed to represent this payload as a reply value.
    pub fn words(&self) -> usize {
        match self {
            Payload::Done => 0,
            Payload::Integer(n) => match Value::integer((*n).into()) {
                Value::BigInt(_) => PAIR_WORDS + BOXED_INT_WORDS,
                _ => PAIR_WORDS,
            },
            Payload::Bytes(b) => PAIR_WORDS + binary_words(b.len()),
        }
    }
}

impl SpiError {
    /// Heap words needed to represent this error as a reply value.
    pub fn words(&self) -> usize {
        match self {
            SpiError::Failed | SpiError::OutOfMemory => 0,
            _ => PAIR_WORDS,
        }
    }
}

/// Encode a result as a reply value.
pub fn encode(res: Result<Payload, SpiError>) -> Value {
    match res {
        Ok(Payload::Done) => Value::ok(),
        Ok(Payload::Integer(n)) => Value::pair(Value::ok(), Value::integer(n.into())),
        Ok(Payload::Bytes(b)) => Value::pair(Value::ok(), Value::Binary(b)),
        Err(SpiError::Failed) => Value::error(),
        Err(SpiError::DeviceNotFound) => Value::pair(Value::error(), Value::atom(DEVICE_NOT_FOUND)),
        Err(SpiError::BadArgument) => Value::pair(Value::error(), Value::atom(BAD_ARGUMENT)),
        Err(SpiError::Transport(TransportError(code))) => {
            Value::pair(Value::error(), Value::integer(code.into()))
        }
        Err(SpiError::OutOfMemory) => Value::atom(OUT_OF_MEMORY),
    }
}

/// Decode a reply value.
///
/// Returns `None` if the value isn't something the driver would send.
pub fn decode(value: &Value) -> Option<Result<Payload, SpiError>> {
    match value {
        Value::Atom(a) => match a.as_str() {
            "ok" => Some(Ok(Payload::Done)),
            "error" => Some(Err(SpiError::Failed)),
            OUT_OF_MEMORY => Some(Err(SpiError::OutOfMemory)),
            _ => None,
        },
        Value::Tuple(t) => match t.as_slice() {
            [tag, Value::Binary(b)] if tag.is_atom("ok") => Some(Ok(Payload::Bytes(b.clone()))),
            [tag, n] if tag.is_atom("ok") => {
                let n = n.as_integer().and_then(|n| u32::try_from(n).ok())?;
                Some(Ok(Payload::Integer(n)))
            }
            [tag, reason] if tag.is_atom("error") => {
                let err = match reason {
                    Value::Atom(a) if a == DEVICE_NOT_FOUND => SpiError::DeviceNotFound,
                    Value::Atom(a) if a == BAD_ARGUMENT => SpiError::BadArgument,
                    Value::Atom(a) if a == OUT_OF_MEMORY => SpiError::OutOfMemory,
                    other => {
                        let code = other.as_integer().and_then(|c| i32::try_from(c).ok())?;
                        SpiError::Transport(TransportError(code))
                    }
                };
                Some(Err(err))
            }
            _ => None,
        },
        _ => None,
    }
}

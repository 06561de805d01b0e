//! # Values
//!
//! Requests and responses are exchanged with the host runtime as
//! dynamically-typed values. [`Value`] is the crate's view of that tagged
//! value system: just enough structure to decode command payloads and to
//! build replies.

use core::fmt;

use serde::{Deserialize, Serialize};

/// The largest integer that is stored unboxed.
///
/// Integers outside of `SMALL_INT_MIN..=SMALL_INT_MAX` are represented as
/// [`Value::BigInt`], which costs extra heap words when building a reply.
pub const SMALL_INT_MAX: i64 = (1 << 27) - 1;
/// The smallest integer that is stored unboxed.
pub const SMALL_INT_MIN: i64 = -(1 << 27);

/// A dynamically-typed value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// A named constant, such as `ok` or `read_at`.
    Atom(String),
    /// An integer in the compact range.
    Int(i64),
    /// An integer outside of the compact range.
    BigInt(i64),
    /// A byte buffer.
    Binary(Vec<u8>),
    /// A fixed-size sequence of values.
    Tuple(Vec<Value>),
    /// An association list of keys to values, in insertion order.
    Map(Vec<(Value, Value)>),
    /// A reference to a process (or port) in the host runtime.
    Pid(u32),
}

impl Value {
    pub fn atom(name: &str) -> Self {
        Value::Atom(name.into())
    }

    /// Make an integer value, choosing the compact or boxed representation
    /// based on its magnitude.
    pub fn integer(val: i64) -> Self {
        if (SMALL_INT_MIN..=SMALL_INT_MAX).contains(&val) {
            Value::Int(val)
        } else {
            Value::BigInt(val)
        }
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Binary(bytes.into())
    }

    pub fn pair(a: Value, b: Value) -> Self {
        Value::Tuple(vec![a, b])
    }

    pub fn ok() -> Self {
        Value::atom("ok")
    }

    pub fn error() -> Self {
        Value::atom("error")
    }

    pub fn is_atom(&self, name: &str) -> bool {
        matches!(self, Value::Atom(a) if a == name)
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Value::Atom(a) => Some(a.as_str()),
            _ => None,
        }
    }

    /// Returns the integer value, regardless of representation.
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Value::Int(i) | Value::BigInt(i) => Some(i),
            _ => None,
        }
    }

    /// Returns the integer value only if it is stored unboxed.
    pub fn as_small_integer(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(t) => Some(t.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m.as_slice()),
            _ => None,
        }
    }

    /// Look up `key` in a map value whose keys are atoms.
    ///
    /// Returns `None` if `self` is not a map, or if the key is absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.is_atom(key))
            .map(|(_, v)| v)
    }
}

impl From<&str> for Value {
    fn from(atom: &str) -> Self {
        Value::atom(atom)
    }
}

impl From<i64> for Value {
    fn from(val: i64) -> Self {
        Value::integer(val)
    }
}

impl From<u32> for Value {
    fn from(val: u32) -> Self {
        Value::integer(val.into())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Binary(bytes)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Atom(a) => f.write_str(a),
            Value::Int(i) | Value::BigInt(i) => write!(f, "{i}"),
            Value::Binary(b) => {
                f.write_str("<<")?;
                for (i, byte) in b.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{byte}")?;
                }
                f.write_str(">>")
            }
            Value::Tuple(t) => {
                f.write_str("{")?;
                for (i, v) in t.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("}")
            }
            Value::Map(m) => {
                f.write_str("#{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} => {v}")?;
                }
                f.write_str("}")
            }
            Value::Pid(p) => write!(f, "<0.{p}.0>"),
        }
    }
}

/// Build a map [`Value`] from `key => value` pairs, with atom keys.
///
/// ```
/// let fields = spi::map! { "write_data" => spi::Value::binary([0xAB]), "read_bits" => 8i64 };
/// assert_eq!(fields.get("read_bits").and_then(spi::Value::as_integer), Some(8));
/// ```
#[macro_export]
macro_rules! map {
    ($($key:literal => $val:expr),* $(,)?) => {
        $crate::Value::Map(vec![$(($crate::Value::atom($key), $crate::Value::from($val))),*])
    };
}

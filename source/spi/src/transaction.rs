//! # Transaction builder
//!
//! Turns the field map of a `write` or `write_read` request into a
//! [`Descriptor`]: how many command, address, write and read bits go on the
//! wire.
//!
//! Every field is optional. The defaults are chosen so the common full-duplex
//! case (shift out N bits, shift in N bits) needs nothing but `write_data`:
//!
//! | field        | default                                   |
//! | :---         | :---                                      |
//! | `command`    | `0`                                       |
//! | `address`    | `0`                                       |
//! | `write_data` | no write phase                            |
//! | `write_bits` | `8 * byte_size(write_data)`, or `0`       |
//! | `read_bits`  | the effective `write_bits`                |

use core::fmt;

use crate::Value;

/// Whether the transaction has a read phase.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// `write`: nothing is read back.
    WriteOnly,
    /// `write_read`: data is read back into a fresh buffer.
    Duplex,
}

/// A validated transaction, ready to be put on the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor<'a> {
    pub command: u16,
    pub address: u64,
    /// Bytes to shift out. Empty when there is no write phase.
    pub write_data: &'a [u8],
    pub write_bits: usize,
    /// Always `0` for [`Mode::WriteOnly`].
    pub read_bits: usize,
}

/// Why a transaction field map was rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BuildError {
    /// The field map is not a map at all.
    NotAMap,
    /// `command` is not an integer in `0..=65535`.
    InvalidCommand,
    /// `address` is not an integer.
    InvalidAddress,
    /// `write_data` is not a binary.
    InvalidWriteData,
    /// `write_bits` is not a non-negative integer.
    InvalidWriteBits,
    /// `write_bits` asks for more bits than `write_data` holds.
    WriteBitsExceedAvailable { requested: usize, available: usize },
    /// `read_bits` is not a non-negative integer.
    InvalidReadBits,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAMap => f.write_str("transaction is not a map"),
            Self::InvalidCommand => {
                f.write_str("command transaction entry is not an integer between 0 and 2^16")
            }
            Self::InvalidAddress => f.write_str("address transaction entry is not an integer"),
            Self::InvalidWriteData => f.write_str("write_data transaction entry is not a binary"),
            Self::InvalidWriteBits => {
                f.write_str("write_bits transaction entry is not a non-negative integer")
            }
            Self::WriteBitsExceedAvailable {
                requested,
                available,
            } => write!(
                f,
                "more write bits specified ({requested}) than are available ({available})"
            ),
            Self::InvalidReadBits => {
                f.write_str("read_bits transaction entry is not a non-negative integer")
            }
        }
    }
}

impl<'a> Descriptor<'a> {
    /// Validate `fields` and resolve every default.
    pub fn build(fields: &'a Value, mode: Mode) -> Result<Self, BuildError> {
        if fields.as_map().is_none() {
            return Err(BuildError::NotAMap);
        }

        let command = match fields.get("command") {
            None => 0,
            Some(v) => v
                .as_small_integer()
                .and_then(|c| u16::try_from(c).ok())
                .ok_or(BuildError::InvalidCommand)?,
        };

        let address = match fields.get("address") {
            None => 0,
            // negative addresses wrap, the same way the bus would see them
            Some(v) => v.as_integer().ok_or(BuildError::InvalidAddress)? as u64,
        };

        let write_data = match fields.get("write_data") {
            None => &[][..],
            Some(v) => v.as_binary().ok_or(BuildError::InvalidWriteData)?,
        };
        let available = write_data.len() * 8;

        let write_bits = match fields.get("write_bits") {
            None => available,
            Some(v) => bit_count(v).ok_or(BuildError::InvalidWriteBits)?,
        };
        if write_bits > available {
            return Err(BuildError::WriteBitsExceedAvailable {
                requested: write_bits,
                available,
            });
        }

        let read_bits = match mode {
            Mode::WriteOnly => 0,
            Mode::Duplex => match fields.get("read_bits") {
                None => write_bits,
                Some(v) => bit_count(v).ok_or(BuildError::InvalidReadBits)?,
            },
        };

        Ok(Self {
            command,
            address,
            write_data,
            write_bits,
            read_bits,
        })
    }

    /// Size of the receive buffer, in bytes.
    pub fn read_len(&self) -> usize {
        bytes_for_bits(self.read_bits)
    }
}

/// The number of bytes needed to hold `bits` bits.
pub const fn bytes_for_bits(bits: usize) -> usize {
    if bits % 8 == 0 {
        bits / 8
    } else {
        bits / 8 + 1
    }
}

fn bit_count(v: &Value) -> Option<usize> {
    v.as_small_integer().and_then(|b| usize::try_from(b).ok())
}

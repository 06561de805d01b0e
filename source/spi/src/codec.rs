//! # Fixed-width transfers
//!
//! `read_at` and `write_at` move at most one 32-bit word. The transport
//! shifts bytes out starting at `tx[0]`, most significant bit first, so a
//! `len`-bit value has to be left-aligned in the word and byte-swapped before
//! it is laid out little-endian in the transmit buffer. Received words come
//! back in the same order and go through the inverse.
//!
//! For a 32-bit transfer, `0x11223344` goes out as `[0x11, 0x22, 0x33, 0x44]`;
//! for a 16-bit transfer, `0x1122` goes out as `[0x11, 0x22, 0x00, 0x00]`.

use crate::bus::{SpiBus, Transfer, TransportError};

/// Longest fixed-width transfer, in bits.
pub const MAX_BITS: u32 = 32;

/// Left-align `data` to `len` bits and swap it into wire order.
///
/// `len` must be in `1..=32`.
pub fn encode(data: u32, len: u32) -> u32 {
    debug_assert!((1..=MAX_BITS).contains(&len));
    (data << (MAX_BITS - len)).swap_bytes()
}

/// Swap a received word out of wire order and right-align it.
///
/// `len` must be in `1..=32`.
pub fn decode(raw: u32, len: u32) -> u32 {
    debug_assert!((1..=MAX_BITS).contains(&len));
    raw.swap_bytes() >> (MAX_BITS - len)
}

/// Shift `data` out to `address` on `device`, reading the same number of
/// bits back, and return the decoded result.
pub fn transfer_at<B: SpiBus>(
    bus: &mut B,
    device: &B::Device,
    address: u64,
    len: u32,
    data: u32,
) -> Result<u32, TransportError> {
    tracing::trace!(address, tx = data, len, "SPI transfer");

    let tx = encode(data, len).to_le_bytes();
    let mut rx = [0u8; 4];
    let mut xfer = Transfer {
        command: 0,
        address,
        write: &tx,
        write_bits: len as usize,
        read: &mut rx,
        read_bits: len as usize,
    };
    bus.transmit(device, &mut xfer)?;

    let read = decode(u32::from_le_bytes(rx), len);
    tracing::trace!(rx = read, "SPI transfer done");
    Ok(read)
}

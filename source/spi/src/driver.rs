//! # Command dispatch
//!
//! [`SpiDriver`] executes one decoded [`Command`] against the attached
//! devices and produces its reply value. It knows nothing about mailboxes or
//! who asked; see [`server`](crate::server) for that.

use crate::{
    bus::{SpiBus, Transfer},
    codec,
    command::{Command, Tag},
    devices::Devices,
    heap::{binary_words, Heap, PAIR_WORDS},
    response::{self, Payload, SpiError},
    transaction::{Descriptor, Mode},
    Value,
};

/// The result of dispatching one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatched {
    pub value: Value,
    /// Set after `close`: the port must stop once it has replied.
    pub terminate: bool,
}

/// The bus, its devices, and the heap replies are built on.
pub struct SpiDriver<B: SpiBus, H> {
    devices: Devices<B>,
    heap: H,
}

impl<B: SpiBus, H: Heap> SpiDriver<B, H> {
    pub fn new(devices: Devices<B>, heap: H) -> Self {
        Self { devices, heap }
    }

    pub fn devices(&self) -> &Devices<B> {
        &self.devices
    }

    pub fn heap_mut(&mut self) -> &mut H {
        &mut self.heap
    }

    /// Detach every device and free the bus, if that hasn't happened yet.
    pub fn shutdown(&mut self) {
        self.devices.detach_all();
    }

    /// Decode and execute one request payload.
    pub fn dispatch(&mut self, payload: &Value) -> Dispatched {
        let cmd = Command::parse(payload);
        let res = match cmd {
            Command::ReadAt {
                device,
                address,
                len,
            } => {
                tracing::debug!(%device, "spi: read at.");
                self.read_at(device, address, len)
            }
            Command::WriteAt {
                device,
                address,
                len,
                data,
            } => {
                tracing::debug!(%device, "spi: write at.");
                self.write_at(device, address, len, data)
            }
            Command::Write { device, fields } => {
                tracing::debug!(%device, "spi: write.");
                self.transact(device, fields, Mode::WriteOnly)
            }
            Command::WriteRead { device, fields } => {
                tracing::debug!(%device, "spi: write_read.");
                self.transact(device, fields, Mode::Duplex)
            }
            Command::Close => {
                tracing::debug!("spi: close.");
                self.devices.detach_all();
                Ok(Payload::Done)
            }
            Command::Malformed(tag) => {
                tracing::warn!(%tag, %payload, "spi: wrong number of arguments.");
                self.error(SpiError::BadArgument)
            }
            Command::Unknown => {
                tracing::warn!(%payload, "spi: error: unrecognized command.");
                Err(SpiError::Failed)
            }
        };

        Dispatched {
            value: response::encode(res),
            terminate: cmd.tag() == Some(Tag::Close),
        }
    }

    fn read_at(&mut self, device: &Value, address: &Value, len: &Value) -> Result<Payload, SpiError> {
        self.transfer_at(device, address, len, None)
    }

    fn write_at(
        &mut self,
        device: &Value,
        address: &Value,
        len: &Value,
        data: &Value,
    ) -> Result<Payload, SpiError> {
        self.transfer_at(device, address, len, Some(data))
    }

    fn transfer_at(
        &mut self,
        device: &Value,
        address: &Value,
        len: &Value,
        data: Option<&Value>,
    ) -> Result<Payload, SpiError> {
        if self.devices.find(device).is_none() {
            return self.error(SpiError::DeviceNotFound);
        }

        let Some(address) = address.as_integer() else {
            tracing::error!(%address, "address is not an integer");
            return self.error(SpiError::BadArgument);
        };
        let len = match len.as_small_integer().and_then(|l| u32::try_from(l).ok()) {
            Some(len @ 1..=codec::MAX_BITS) => len,
            _ => {
                tracing::error!(%len, "length must be an integer between 1 and 32");
                return self.error(SpiError::BadArgument);
            }
        };
        let data = match data {
            None => 0,
            // the low 32 bits are sent; sign-extended words are fine.
            Some(d) => match d.as_integer() {
                Some(d) if i64::from(i32::MIN) <= d && d <= i64::from(u32::MAX) => d as u32,
                _ => {
                    tracing::error!(data = %d, "data is not a 32-bit integer");
                    return self.error(SpiError::BadArgument);
                }
            },
        };

        let res = self
            .devices
            .with_device(device, |bus, dev| {
                codec::transfer_at(bus, dev, address as u64, len, data)
            })
            .ok_or(SpiError::DeviceNotFound)?;

        match res {
            Ok(read) => self.reply(Payload::Integer(read)),
            Err(error) => {
                tracing::error!(%error, "spi: transfer failed");
                self.error(SpiError::Transport(error))
            }
        }
    }

    fn transact(&mut self, device: &Value, fields: &Value, mode: Mode) -> Result<Payload, SpiError> {
        if self.devices.find(device).is_none() {
            return self.error(SpiError::DeviceNotFound);
        }

        let desc = match Descriptor::build(fields, mode) {
            Ok(desc) => desc,
            Err(error) => {
                tracing::error!(%error, "Invalid transaction");
                return self.error(SpiError::BadArgument);
            }
        };
        tracing::trace!(
            command = desc.command,
            address = desc.address,
            write_bits = desc.write_bits,
            read_bits = desc.read_bits,
            "transaction"
        );

        // the read buffer is part of the reply, so make room for the whole
        // reply before anything goes out on the bus.
        if mode == Mode::Duplex {
            let words = PAIR_WORDS + binary_words(desc.read_len());
            if let Err(oom) = self.heap.ensure_free(words) {
                tracing::warn!(%oom, "no room for the read buffer");
                return Err(SpiError::OutOfMemory);
            }
        }
        let mut read = vec![0u8; desc.read_len()];

        let res = self
            .devices
            .with_device(device, |bus, dev| {
                let mut xfer = Transfer {
                    command: desc.command,
                    address: desc.address,
                    write: desc.write_data,
                    write_bits: desc.write_bits,
                    read: &mut read,
                    read_bits: desc.read_bits,
                };
                bus.transmit(dev, &mut xfer)
            })
            .ok_or(SpiError::DeviceNotFound)?;

        match (res, mode) {
            (Ok(()), Mode::WriteOnly) => Ok(Payload::Done),
            (Ok(()), Mode::Duplex) => Ok(Payload::Bytes(read)),
            (Err(error), _) => {
                tracing::error!(%error, ?mode, "spi: transaction failed");
                // headroom for the duplex case was already reserved above.
                match mode {
                    Mode::Duplex => Err(SpiError::Transport(error)),
                    Mode::WriteOnly => self.error(SpiError::Transport(error)),
                }
            }
        }
    }

    /// Reserve room for a successful payload.
    fn reply(&mut self, payload: Payload) -> Result<Payload, SpiError> {
        match self.heap.ensure_free(payload.words()) {
            Ok(()) => Ok(payload),
            Err(oom) => {
                tracing::warn!(%oom, "no room for the result");
                Err(SpiError::OutOfMemory)
            }
        }
    }

    /// Reserve room for an error.
    fn error(&mut self, error: SpiError) -> Result<Payload, SpiError> {
        match self.heap.ensure_free(error.words()) {
            Ok(()) => Err(error),
            Err(oom) => {
                tracing::warn!(%oom, %error, "no room for the error");
                Err(SpiError::OutOfMemory)
            }
        }
    }
}

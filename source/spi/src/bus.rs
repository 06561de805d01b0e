//! # SPI bus transport
//!
//! The driver does not talk to hardware directly. Instead, the platform
//! provides an implementation of [`SpiBus`], which knows how to bring up a
//! bus, attach and detach devices, and perform one blocking transfer.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Which SPI host peripheral a bus is driven by.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Peripheral {
    #[default]
    Hspi,
    Vspi,
}

impl Peripheral {
    /// Parse a peripheral selector.
    ///
    /// Unknown selectors fall back to [`Peripheral::Hspi`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "hspi" => Peripheral::Hspi,
            "vspi" => Peripheral::Vspi,
            other => {
                tracing::warn!(
                    peripheral = other,
                    "Unrecognized SPI peripheral. Must be either hspi or vspi. Defaulting to hspi."
                );
                Peripheral::Hspi
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Peripheral::Hspi => "hspi",
            Peripheral::Vspi => "vspi",
        }
    }
}

impl fmt::Display for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pin assignment for the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    pub miso_io_num: i32,
    pub mosi_io_num: i32,
    pub sclk_io_num: i32,
    #[serde(default, rename = "spi_peripheral")]
    pub peripheral: Peripheral,
}

/// Per-device parameters handed to the transport when attaching.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(rename = "spi_clock_hz")]
    pub clock_speed_hz: i32,
    /// SPI mode, 0 through 3 (CPOL/CPHA).
    #[serde(rename = "spi_mode")]
    pub mode: u8,
    #[serde(rename = "spi_cs_io_num")]
    pub cs_io_num: i32,
    /// Width of the address phase, in bits.
    #[serde(rename = "address_len_bits")]
    pub address_bits: u8,
    /// Width of the command phase, in bits.
    #[serde(rename = "command_len_bits")]
    pub command_bits: u8,
    /// How many transactions the transport may queue for this device.
    #[serde(default = "DeviceConfig::default_queue_size")]
    pub queue_size: usize,
}

impl DeviceConfig {
    pub const DEFAULT_QUEUE_SIZE: usize = 4;

    const fn default_queue_size() -> usize {
        Self::DEFAULT_QUEUE_SIZE
    }
}

/// A status code reported by the transport.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportError(pub i32);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SPI transport error (code {})", self.0)
    }
}

/// One fully-resolved bus transfer.
///
/// `write_bits` bits are shifted out of `write` after the command and
/// address phases, and `read_bits` bits are shifted into `read`. Both buffers
/// are always large enough for their bit counts.
#[derive(Debug)]
pub struct Transfer<'a> {
    pub command: u16,
    pub address: u64,
    pub write: &'a [u8],
    pub write_bits: usize,
    pub read: &'a mut [u8],
    pub read_bits: usize,
}

/// The hardware capability the driver is built on.
pub trait SpiBus {
    /// A handle to a device attached to this bus.
    type Device;

    /// Bring up the bus on the given peripheral.
    fn initialize(&mut self, config: &BusConfig) -> Result<(), TransportError>;

    /// Attach a device to an initialized bus.
    fn add_device(
        &mut self,
        peripheral: Peripheral,
        config: &DeviceConfig,
    ) -> Result<Self::Device, TransportError>;

    /// Detach a device previously returned by [`SpiBus::add_device`].
    fn remove_device(&mut self, device: Self::Device) -> Result<(), TransportError>;

    /// Release the bus. All devices must have been removed first.
    fn free(&mut self, peripheral: Peripheral) -> Result<(), TransportError>;

    /// Perform one blocking transfer with `device`.
    fn transmit(
        &mut self,
        device: &Self::Device,
        transfer: &mut Transfer<'_>,
    ) -> Result<(), TransportError>;
}

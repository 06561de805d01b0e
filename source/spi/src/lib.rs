//! # mnemOS SPI port
//!
//! An actor-style SPI driver. One port owns one SPI bus and a fixed set of
//! named devices attached to it, and serves requests from a mailbox one at a
//! time:
//!
//! - `{read_at, Device, Address, Len}` and `{write_at, Device, Address, Len, Data}`
//!   move a single word of up to 32 bits.
//! - `{write, Device, Fields}` and `{write_read, Device, Fields}` run an
//!   arbitrary transaction described by a field map (see [`transaction`]).
//! - `close` detaches everything and stops the port.
//!
//! The physical bus is abstracted by [`SpiBus`]; [`sim::SimBus`] is a
//! host-side implementation that records traffic for tests.
//!
//! ```
//! use futures::executor::LocalPool;
//! use futures::task::LocalSpawnExt;
//! use spi::{client::Fields, heap::Unbounded, registry::PortRegistry, sim::SimBus};
//!
//! let cfg = spi::config::from_toml(r#"
//!     [bus_config]
//!     miso_io_num = 19
//!     mosi_io_num = 27
//!     sclk_io_num = 5
//!
//!     [device_config.dev_a]
//!     spi_clock_hz = 1000000
//!     spi_mode = 0
//!     spi_cs_io_num = 18
//!     address_len_bits = 0
//!     command_len_bits = 0
//! "#).unwrap();
//!
//! let mut registry = PortRegistry::new();
//! let (server, mut client) = spi::server::start(&cfg, SimBus::new(), Unbounded, &mut registry).unwrap();
//!
//! let mut pool = LocalPool::new();
//! pool.spawner().spawn_local(server.run()).unwrap();
//! let read = pool.run_until(async move {
//!     let fields = Fields::new().write_data([0xAB, 0xCD]).read_bits(8);
//!     client.write_read("dev_a", &fields).await
//! });
//! assert_eq!(read, Ok(vec![0xAB]));
//! ```

pub mod bus;
pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod devices;
pub mod driver;
pub mod heap;
pub mod registry;
pub mod response;
pub mod server;
pub mod sim;
pub mod transaction;
pub mod value;

#[cfg(test)]
pub(crate) mod test_util;

pub use bus::{Peripheral, SpiBus, TransportError};
pub use response::{Payload, SpiError};
pub use server::{SpiServer, SpiService};
pub use value::Value;

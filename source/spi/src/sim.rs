//! # Simulated SPI bus
//!
//! A host-side [`SpiBus`] for running the driver without hardware. Every bus
//! operation is recorded as an [`Event`], reads are answered from a queue of
//! scripted responses (falling back to MOSI→MISO loopback), and failures can
//! be injected for each kind of operation.
//!
//! A [`SimBus`] is a cheap handle to shared state, so a clone can be kept
//! around to inspect the bus after the first handle has been moved into a
//! driver.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::bus::{BusConfig, DeviceConfig, Peripheral, SpiBus, Transfer, TransportError};

#[derive(Clone, Default)]
pub struct SimBus {
    state: Arc<Mutex<State>>,
}

/// A device attached to a [`SimBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimDevice {
    pub id: usize,
    pub cs_io_num: i32,
}

/// Something that happened on the simulated bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Initialize { peripheral: Peripheral },
    AddDevice { id: usize, config: DeviceConfig },
    RemoveDevice { id: usize },
    Free { peripheral: Peripheral },
    Transfer(TransferRecord),
}

/// A transfer as it was seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub device: usize,
    pub command: u16,
    pub address: u64,
    /// The bytes covering `write_bits`.
    pub mosi: Vec<u8>,
    pub write_bits: usize,
    pub read_bits: usize,
    /// Size of the receive buffer the driver supplied.
    pub read_len: usize,
}

#[derive(Default)]
struct State {
    peripheral: Option<Peripheral>,
    next_id: usize,
    add_calls: usize,
    attached: Vec<usize>,
    events: Vec<Event>,
    responses: VecDeque<Vec<u8>>,
    fail_initialize: Option<TransportError>,
    fail_add_device: Option<(usize, TransportError)>,
    fail_remove_device: Option<TransportError>,
    fail_free: Option<TransportError>,
    fail_transfers: VecDeque<TransportError>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue bytes to be returned on MISO by the next transfer that reads.
    pub fn push_response(&self, bytes: impl Into<Vec<u8>>) {
        self.state().responses.push_back(bytes.into());
    }

    pub fn fail_initialize(&self, error: TransportError) {
        self.state().fail_initialize = Some(error);
    }

    /// Fail the `nth` (zero-based) call to `add_device`.
    pub fn fail_add_device(&self, nth: usize, error: TransportError) {
        self.state().fail_add_device = Some((nth, error));
    }

    /// Fail every subsequent call to `remove_device`.
    pub fn fail_remove_device(&self, error: TransportError) {
        self.state().fail_remove_device = Some(error);
    }

    pub fn fail_free(&self, error: TransportError) {
        self.state().fail_free = Some(error);
    }

    /// Fail the next transfer.
    pub fn fail_next_transfer(&self, error: TransportError) {
        self.state().fail_transfers.push_back(error);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Transfer(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    /// Ids of the devices currently attached.
    pub fn attached(&self) -> Vec<usize> {
        self.state().attached.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.state().peripheral.is_some()
    }
}

impl SpiBus for SimBus {
    type Device = SimDevice;

    fn initialize(&mut self, config: &BusConfig) -> Result<(), TransportError> {
        let mut state = self.state();
        if let Some(error) = state.fail_initialize.take() {
            return Err(error);
        }
        if state.peripheral.is_some() {
            // ESP_ERR_INVALID_STATE
            return Err(TransportError(0x103));
        }
        state.peripheral = Some(config.peripheral);
        state.events.push(Event::Initialize {
            peripheral: config.peripheral,
        });
        Ok(())
    }

    fn add_device(
        &mut self,
        peripheral: Peripheral,
        config: &DeviceConfig,
    ) -> Result<SimDevice, TransportError> {
        let mut state = self.state();
        let call = state.add_calls;
        state.add_calls += 1;
        match state.fail_add_device {
            Some((nth, error)) if nth == call => return Err(error),
            _ => {}
        }
        if state.peripheral != Some(peripheral) {
            return Err(TransportError(0x103));
        }

        let id = state.next_id;
        state.next_id += 1;
        state.attached.push(id);
        state.events.push(Event::AddDevice {
            id,
            config: *config,
        });
        Ok(SimDevice {
            id,
            cs_io_num: config.cs_io_num,
        })
    }

    fn remove_device(&mut self, device: SimDevice) -> Result<(), TransportError> {
        let mut state = self.state();
        state.events.push(Event::RemoveDevice { id: device.id });
        if let Some(error) = state.fail_remove_device {
            return Err(error);
        }
        state.attached.retain(|&id| id != device.id);
        Ok(())
    }

    fn free(&mut self, peripheral: Peripheral) -> Result<(), TransportError> {
        let mut state = self.state();
        state.events.push(Event::Free { peripheral });
        if let Some(error) = state.fail_free {
            return Err(error);
        }
        if !state.attached.is_empty() {
            return Err(TransportError(0x103));
        }
        state.peripheral = None;
        Ok(())
    }

    fn transmit(
        &mut self,
        device: &SimDevice,
        transfer: &mut Transfer<'_>,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.attached.contains(&device.id) {
            // ESP_ERR_INVALID_ARG
            return Err(TransportError(0x102));
        }

        let mosi_len = (transfer.write_bits + 7) / 8;
        let mosi = transfer.write[..mosi_len].to_vec();
        state.events.push(Event::Transfer(TransferRecord {
            device: device.id,
            command: transfer.command,
            address: transfer.address,
            mosi: mosi.clone(),
            write_bits: transfer.write_bits,
            read_bits: transfer.read_bits,
            read_len: transfer.read.len(),
        }));

        if let Some(error) = state.fail_transfers.pop_front() {
            return Err(error);
        }

        if transfer.read_bits > 0 {
            let miso = state.responses.pop_front().unwrap_or(mosi);
            let n = miso.len().min(transfer.read.len());
            transfer.read[..n].copy_from_slice(&miso[..n]);
            transfer.read[n..].fill(0);
        }

        Ok(())
    }
}

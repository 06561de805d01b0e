//! # Device registry
//!
//! [`Devices`] owns the initialized bus and every device attached to it.
//! It is built once when the port starts, consulted by every device-scoped
//! command, and torn down by `close`.

use crate::{
    bus::{BusConfig, DeviceConfig, Peripheral, SpiBus, TransportError},
    Value,
};

/// A named device attached to the bus.
pub struct Device<D> {
    name: Value,
    handle: D,
}

/// The bus and the devices attached to it.
pub struct Devices<B: SpiBus> {
    bus: B,
    peripheral: Peripheral,
    devices: Vec<Device<B::Device>>,
    /// Set once the bus has been torn down.
    freed: bool,
}

/// Why attaching the configured devices failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// The bus itself could not be initialized.
    Bus(TransportError),
    /// The named device could not be added to the bus.
    Device { name: Value, error: TransportError },
    /// The same device name was configured twice.
    DuplicateDevice(Value),
}

impl<D> Device<D> {
    pub fn name(&self) -> &Value {
        &self.name
    }

    pub fn handle(&self) -> &D {
        &self.handle
    }
}

impl<B: SpiBus> Devices<B> {
    /// Initialize the bus and attach every configured device, in order.
    ///
    /// If any device fails to attach, the devices attached so far are
    /// detached and the bus is freed before the error is returned.
    #[tracing::instrument(name = "Devices::attach", level = "debug", skip_all, fields(peripheral = %config.peripheral))]
    pub fn attach(
        mut bus: B,
        config: &BusConfig,
        devices: &[(Value, DeviceConfig)],
    ) -> Result<Self, AttachError> {
        tracing::trace!(
            miso_io_num = config.miso_io_num,
            mosi_io_num = config.mosi_io_num,
            sclk_io_num = config.sclk_io_num,
            "bus config"
        );
        if let Err(error) = bus.initialize(config) {
            tracing::error!(%error, "SPI Bus initialization failed");
            return Err(AttachError::Bus(error));
        }
        tracing::info!("SPI Bus initialized.");

        let mut this = Self {
            bus,
            peripheral: config.peripheral,
            devices: Vec::with_capacity(devices.len()),
            freed: false,
        };

        for (name, dev_cfg) in devices {
            if this.find(name).is_some() {
                tracing::error!(%name, "Duplicate SPI device name");
                this.detach_all();
                return Err(AttachError::DuplicateDevice(name.clone()));
            }

            match this.bus.add_device(this.peripheral, dev_cfg) {
                Ok(handle) => {
                    tracing::trace!(
                        clock_speed_hz = dev_cfg.clock_speed_hz,
                        mode = dev_cfg.mode,
                        cs_io_num = dev_cfg.cs_io_num,
                        queue_size = dev_cfg.queue_size,
                        address_bits = dev_cfg.address_bits,
                        command_bits = dev_cfg.command_bits,
                        "device config"
                    );
                    tracing::info!(%name, "SPI device added.");
                    this.devices.push(Device {
                        name: name.clone(),
                        handle,
                    });
                }
                Err(error) => {
                    tracing::error!(%name, %error, "Failed to add SPI device.");
                    this.detach_all();
                    return Err(AttachError::Device {
                        name: name.clone(),
                        error,
                    });
                }
            }
        }

        Ok(this)
    }

    /// Look up a device by exact name.
    pub fn find(&self, name: &Value) -> Option<&Device<B::Device>> {
        self.devices.iter().find(|d| &d.name == name)
    }

    pub fn peripheral(&self) -> Peripheral {
        self.peripheral
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Perform one transfer with the named device.
    ///
    /// Split out so the caller can hold a device reference and a mutable
    /// bus at the same time.
    pub(crate) fn with_device<R>(
        &mut self,
        name: &Value,
        f: impl FnOnce(&mut B, &B::Device) -> R,
    ) -> Option<R> {
        let device = self.devices.iter().find(|d| &d.name == name)?;
        Some(f(&mut self.bus, &device.handle))
    }

    /// Detach every device, then free the bus.
    ///
    /// Failures are logged and otherwise ignored. Once the bus has been
    /// freed, further calls do nothing.
    #[tracing::instrument(name = "Devices::detach_all", level = "debug", skip(self))]
    pub fn detach_all(&mut self) {
        if self.freed {
            tracing::debug!("SPI Bus already stopped.");
            return;
        }
        self.freed = true;

        for Device { name, handle } in self.devices.drain(..) {
            match self.bus.remove_device(handle) {
                Ok(()) => tracing::info!(%name, "Removed SPI device."),
                Err(error) => tracing::warn!(%name, %error, "Error removing device."),
            }
        }

        match self.bus.free(self.peripheral) {
            Ok(()) => tracing::info!("Stopped SPI Bus."),
            Err(error) => tracing::warn!(%error, "Error freeing bus."),
        }
    }

    /// Access the underlying bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Whether the bus has been torn down.
    pub fn is_freed(&self) -> bool {
        self.freed
    }
}

impl<B: SpiBus> Drop for Devices<B> {
    fn drop(&mut self) {
        self.detach_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sim::{Event, SimBus},
        test_util::{bus_config, device_config, trace_init},
    };

    fn named(names: &[&str]) -> Vec<(Value, DeviceConfig)> {
        names
            .iter()
            .map(|n| (Value::atom(n), device_config()))
            .collect()
    }

    #[test]
    fn find_configured_devices() {
        trace_init();
        let devices = Devices::attach(SimBus::new(), &bus_config(), &named(&["dev_a", "dev_b"]))
            .expect("attach should succeed");

        assert_eq!(devices.len(), 2);
        assert_eq!(
            devices.find(&Value::atom("dev_a")).map(Device::name),
            Some(&Value::atom("dev_a"))
        );
        assert!(devices.find(&Value::atom("dev_b")).is_some());
        assert!(devices.find(&Value::atom("dev_c")).is_none());
        assert!(devices.find(&Value::Int(0)).is_none());
    }

    #[test]
    fn bus_init_failure() {
        trace_init();
        let bus = SimBus::new();
        bus.fail_initialize(TransportError(-1));
        let res = Devices::attach(bus.clone(), &bus_config(), &named(&["dev_a"]));
        assert_eq!(res.err(), Some(AttachError::Bus(TransportError(-1))));
        assert!(bus.attached().is_empty());
    }

    #[test]
    fn partial_attach_rolls_back() {
        trace_init();
        let bus = SimBus::new();
        bus.fail_add_device(2, TransportError(0x103));

        let res = Devices::attach(
            bus.clone(),
            &bus_config(),
            &named(&["dev_a", "dev_b", "dev_c"]),
        );
        assert_eq!(
            res.err(),
            Some(AttachError::Device {
                name: Value::atom("dev_c"),
                error: TransportError(0x103),
            })
        );

        // the first two devices were removed, and the bus was freed.
        assert!(bus.attached().is_empty());
        assert!(!bus.is_initialized());
        let events = bus.events();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, Event::RemoveDevice { .. }))
                .count(),
            2
        );
        assert!(matches!(events.last(), Some(Event::Free { .. })));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        trace_init();
        let bus = SimBus::new();
        let res = Devices::attach(bus.clone(), &bus_config(), &named(&["dev_a", "dev_a"]));
        assert_eq!(
            res.err(),
            Some(AttachError::DuplicateDevice(Value::atom("dev_a")))
        );
        assert!(bus.attached().is_empty());
    }

    #[test]
    fn detach_all_is_best_effort() {
        trace_init();
        let bus = SimBus::new();
        let mut devices = Devices::attach(bus.clone(), &bus_config(), &named(&["dev_a", "dev_b"]))
            .expect("attach should succeed");

        bus.fail_remove_device(TransportError(7));
        bus.fail_free(TransportError(8));
        devices.detach_all();

        assert!(devices.is_empty());
        let removes = bus
            .events()
            .iter()
            .filter(|e| matches!(e, Event::RemoveDevice { .. }))
            .count();
        assert_eq!(removes, 2, "every device should get a remove attempt");
    }

    #[test]
    fn detach_all_only_frees_once() {
        trace_init();
        let bus = SimBus::new();
        let mut devices = Devices::attach(bus.clone(), &bus_config(), &named(&["dev_a"]))
            .expect("attach should succeed");

        devices.detach_all();
        assert!(devices.is_freed());
        devices.detach_all();
        drop(devices);

        let frees = bus
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Free { .. }))
            .count();
        assert_eq!(frees, 1);
        assert!(!bus.is_initialized());
    }

    #[test]
    fn dropping_releases_the_bus() {
        trace_init();
        let bus = SimBus::new();
        let devices = Devices::attach(bus.clone(), &bus_config(), &named(&["dev_a", "dev_b"]))
            .expect("attach should succeed");
        assert_eq!(bus.attached().len(), 2);

        drop(devices);
        assert!(bus.attached().is_empty());
        assert!(!bus.is_initialized());

        // the bus can be brought up again
        let again = Devices::attach(bus.clone(), &bus_config(), &named(&["dev_a"]));
        assert!(again.is_ok());
    }

    #[test]
    fn failed_attach_frees_once() {
        trace_init();
        let bus = SimBus::new();
        bus.fail_add_device(1, TransportError(0x103));
        let res = Devices::attach(bus.clone(), &bus_config(), &named(&["dev_a", "dev_b"]));
        assert!(res.is_err());
        drop(res);

        let frees = bus
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Free { .. }))
            .count();
        assert_eq!(frees, 1);
    }
}

//! # Port configuration
//!
//! An SPI port is configured once, when it is started, with the bus pin
//! assignment and the set of devices to attach:
//!
//! ```toml
//! [bus_config]
//! miso_io_num = 19
//! mosi_io_num = 27
//! sclk_io_num = 5
//! spi_peripheral = "hspi"
//!
//! [device_config.dev_a]
//! spi_clock_hz = 1000000
//! spi_mode = 0
//! spi_cs_io_num = 18
//! address_len_bits = 8
//! command_len_bits = 0
//!
//! [port]
//! mailbox_depth = 8
//! ```
//!
//! The same structure can be passed as a [`Value`] map, which is how the
//! host runtime hands over port options.

use std::{collections::BTreeMap, fmt, path::Path};

use miette::{Context, IntoDiagnostic};
use serde::{Deserialize, Serialize};

use crate::{
    bus::{BusConfig, DeviceConfig, Peripheral},
    Value,
};

/// Everything needed to start a port.
#[derive(Clone, Debug, PartialEq)]
pub struct SpiConfig {
    pub bus: BusConfig,
    /// Devices to attach, in attach order.
    pub devices: Vec<(Value, DeviceConfig)>,
    pub settings: PortSettings,
}

/// Settings for the driver itself, rather than the hardware.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    /// How many requests may wait in the driver's mailbox.
    pub mailbox_depth: usize,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettingsOverrides {
    /// How many requests may wait in the driver's mailbox.
    pub mailbox_depth: Option<usize>,
}

/// Why a port configuration was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required field is missing.
    Missing(&'static str),
    /// A field that must be a map isn't.
    NotAMap(&'static str),
    /// A field that must be an integer isn't.
    NotAnInteger(&'static str),
    /// An integer field is outside of its allowed range.
    OutOfRange { field: &'static str, value: i64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(field) => write!(f, "missing required field '{field}'"),
            Self::NotAMap(field) => write!(f, "'{field}' must be a map"),
            Self::NotAnInteger(field) => write!(f, "'{field}' must be an integer"),
            Self::OutOfRange { field, value } => write!(f, "'{field}' is out of range ({value})"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl PortSettings {
    pub const DEFAULT_MAILBOX_DEPTH: usize = 4;
}

impl Default for PortSettings {
    fn default() -> Self {
        PortSettingsOverrides::default().into_settings()
    }
}

impl PortSettingsOverrides {
    pub fn into_settings(self) -> PortSettings {
        PortSettings {
            mailbox_depth: self
                .mailbox_depth
                .unwrap_or(PortSettings::DEFAULT_MAILBOX_DEPTH)
                .max(1),
        }
    }
}

impl SpiConfig {
    /// Parse port options handed over by the host runtime.
    pub fn from_value(opts: &Value) -> Result<Self, ConfigError> {
        let bus_config = map_field(opts, "bus_config")?;
        let peripheral = match bus_config.get("spi_peripheral") {
            None => Peripheral::default(),
            Some(Value::Atom(name)) => Peripheral::from_name(name),
            Some(other) => {
                tracing::warn!(peripheral = %other, "SPI peripheral is not an atom. Defaulting to hspi.");
                Peripheral::default()
            }
        };
        let bus = BusConfig {
            miso_io_num: int_field(bus_config, "miso_io_num")?,
            mosi_io_num: int_field(bus_config, "mosi_io_num")?,
            sclk_io_num: int_field(bus_config, "sclk_io_num")?,
            peripheral,
        };

        let device_config = map_field(opts, "device_config")?;
        let devices = device_config
            .as_map()
            .unwrap_or_default()
            .iter()
            .map(|(name, cfg)| -> Result<(Value, DeviceConfig), ConfigError> {
                if cfg.as_map().is_none() {
                    return Err(ConfigError::NotAMap("device_config"));
                }
                let dev = DeviceConfig {
                    clock_speed_hz: int_field(cfg, "spi_clock_hz")?,
                    mode: int_field(cfg, "spi_mode")?,
                    cs_io_num: int_field(cfg, "spi_cs_io_num")?,
                    address_bits: int_field(cfg, "address_len_bits")?,
                    command_bits: int_field(cfg, "command_len_bits")?,
                    queue_size: DeviceConfig::DEFAULT_QUEUE_SIZE,
                };
                validate_device(&dev)?;
                Ok((name.clone(), dev))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            bus,
            devices,
            settings: PortSettings::default(),
        })
    }
}

/// The on-disk form of [`SpiConfig`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    bus_config: BusConfig,
    #[serde(default)]
    device_config: BTreeMap<String, DeviceConfig>,
    #[serde(default)]
    port: PortSettingsOverrides,
}

/// Parse a TOML port configuration.
///
/// Device names become atoms, and devices are attached in name order.
pub fn from_toml(s: &str) -> miette::Result<SpiConfig> {
    let file: ConfigFile = toml::from_str(s).into_diagnostic()?;
    let devices = file
        .device_config
        .into_iter()
        .map(|(name, dev)| -> miette::Result<(Value, DeviceConfig)> {
            validate_device(&dev)
                .into_diagnostic()
                .wrap_err_with(|| format!("Invalid configuration for device '{name}'"))?;
            Ok((Value::Atom(name), dev))
        })
        .collect::<miette::Result<Vec<_>>>()?;

    Ok(SpiConfig {
        bus: file.bus_config,
        devices,
        settings: file.port.into_settings(),
    })
}

/// Load a TOML port configuration from `path`.
pub fn from_toml_file(path: impl AsRef<Path>) -> miette::Result<SpiConfig> {
    let path = path.as_ref();
    let path_disp = path.display();
    (|| -> miette::Result<SpiConfig> {
        let cfg = std::fs::read_to_string(path).into_diagnostic()?;
        from_toml(&cfg)
    })()
    .wrap_err_with(|| format!("Failed to load SPI config file '{path_disp}'"))
}

fn validate_device(dev: &DeviceConfig) -> Result<(), ConfigError> {
    if dev.mode > 3 {
        return Err(ConfigError::OutOfRange {
            field: "spi_mode",
            value: dev.mode.into(),
        });
    }
    if dev.address_bits > 64 {
        return Err(ConfigError::OutOfRange {
            field: "address_len_bits",
            value: dev.address_bits.into(),
        });
    }
    if dev.command_bits > 16 {
        return Err(ConfigError::OutOfRange {
            field: "command_len_bits",
            value: dev.command_bits.into(),
        });
    }
    Ok(())
}

fn map_field<'a>(map: &'a Value, field: &'static str) -> Result<&'a Value, ConfigError> {
    let val = map.get(field).ok_or(ConfigError::Missing(field))?;
    if val.as_map().is_none() {
        return Err(ConfigError::NotAMap(field));
    }
    Ok(val)
}

fn int_field<T: TryFrom<i64>>(map: &Value, field: &'static str) -> Result<T, ConfigError> {
    let val = map
        .get(field)
        .ok_or(ConfigError::Missing(field))?
        .as_integer()
        .ok_or(ConfigError::NotAnInteger(field))?;
    T::try_from(val).map_err(|_| ConfigError::OutOfRange { field, value: val })
}

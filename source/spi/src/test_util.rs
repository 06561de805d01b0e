use crate::{
    bus::{BusConfig, DeviceConfig, Peripheral},
    config::{PortSettings, SpiConfig},
    heap::{Heap, OutOfMemory},
    Value,
};

pub(crate) fn trace_init() {
    use tracing_subscriber::{
        filter::{EnvFilter, LevelFilter},
        prelude::*,
    };
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    let filter = if env.is_empty() {
        builder.parse("spi=debug").unwrap()
    } else {
        builder.parse_lossy(env)
    };

    let _res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .without_time()
        .finish()
        .try_init();
}

pub(crate) fn bus_config() -> BusConfig {
    BusConfig {
        miso_io_num: 19,
        mosi_io_num: 27,
        sclk_io_num: 5,
        peripheral: Peripheral::Hspi,
    }
}

pub(crate) fn device_config() -> DeviceConfig {
    DeviceConfig {
        clock_speed_hz: 1_000_000,
        mode: 0,
        cs_io_num: 18,
        address_bits: 8,
        command_bits: 0,
        queue_size: DeviceConfig::DEFAULT_QUEUE_SIZE,
    }
}

/// A port with devices `dev_a` and `dev_b`.
pub(crate) fn spi_config() -> SpiConfig {
    SpiConfig {
        bus: bus_config(),
        devices: vec![
            (Value::atom("dev_a"), device_config()),
            (
                Value::atom("dev_b"),
                DeviceConfig {
                    cs_io_num: 15,
                    ..device_config()
                },
            ),
        ],
        settings: PortSettings::default(),
    }
}

/// A heap that records every headroom request, and refuses any request once
/// `fail_after` requests have been granted.
#[derive(Debug, Default)]
pub(crate) struct RecordingHeap {
    pub requests: Vec<usize>,
    pub fail_after: Option<usize>,
}

impl RecordingHeap {
    pub(crate) fn failing_after(n: usize) -> Self {
        Self {
            requests: Vec::new(),
            fail_after: Some(n),
        }
    }
}

impl Heap for RecordingHeap {
    fn ensure_free(&mut self, words: usize) -> Result<(), OutOfMemory> {
        let granted = self.requests.len();
        self.requests.push(words);
        match self.fail_after {
            Some(n) if granted >= n => Err(OutOfMemory { requested: words }),
            _ => Ok(()),
        }
    }
}

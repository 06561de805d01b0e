//! # SPI port server
//!
//! The mailbox side of the driver. [`start`] brings up the bus and devices,
//! registers the port, and hands back an [`SpiServer`] to be spawned plus an
//! [`SpiClient`] for talking to it.
//!
//! Each [`Request`] carries a correlation token, a command payload, and a
//! [`ReplyTo`]. The server handles requests one at a time, in the order they
//! were delivered, and sends exactly one [`Reply`] per request. After `close`
//! has been answered the server stops.

use futures::{
    channel::{mpsc, oneshot},
    StreamExt,
};
use serde::{Deserialize, Serialize};

use crate::{
    bus::{Peripheral, SpiBus},
    client::SpiClient,
    config::{ConfigError, SpiConfig},
    devices::{AttachError, Devices},
    driver::{Dispatched, SpiDriver},
    heap::{Heap, PAIR_WORDS},
    registry::{uuid, Liveness, PortId, PortRegistry, RegisteredDriver, Uuid},
    response::SpiError,
    Value,
};

////////////////////////////////////////////////////////////////////////////////
// Service Definition
////////////////////////////////////////////////////////////////////////////////

/// Registry identity for SPI ports.
pub struct SpiService;

impl RegisteredDriver for SpiService {
    /// The peripheral a live port owns.
    type Info = Peripheral;

    const UUID: Uuid = uuid!("b5fd3487-08c4-4547-8aa2-84d3b4a8a6e1");
}

////////////////////////////////////////////////////////////////////////////////
// Message and Error Types
////////////////////////////////////////////////////////////////////////////////

/// One inbound request.
#[derive(Debug)]
pub struct Request {
    pub token: Value,
    pub payload: Value,
    pub reply: ReplyTo,
}

/// The answer to one [`Request`], keyed by its token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub token: Value,
    pub body: Value,
}

/// Where to send a [`Reply`].
#[derive(Debug)]
pub enum ReplyTo {
    /// Reply once, directly.
    OneShot(oneshot::Sender<Reply>),
    /// Reply into a long-lived mailbox shared by many requests.
    Mailbox(mpsc::UnboundedSender<Reply>),
    /// Reply with a postcard-encoded [`UserResponse`].
    Userspace(mpsc::UnboundedSender<Vec<u8>>),
}

/// A request as it arrives over a serialized channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRequest {
    pub token: Value,
    pub payload: Value,
}

/// A reply as it leaves over a serialized channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub token: Value,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyError {
    /// The requester stopped listening.
    ReplyClosed,
    /// The reply could not be encoded.
    Serialize,
}

/// Why a port could not be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    Config(ConfigError),
    Attach(AttachError),
}

/// Whether the server keeps going after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

impl Request {
    /// Decode a postcard [`UserRequest`], answering to `outgoing`.
    pub fn from_user_bytes(
        bytes: &[u8],
        outgoing: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<Self, postcard::Error> {
        let UserRequest { token, payload } = postcard::from_bytes(bytes)?;
        Ok(Self {
            token,
            payload,
            reply: ReplyTo::Userspace(outgoing),
        })
    }
}

impl ReplyTo {
    pub fn send(self, reply: Reply) -> Result<(), ReplyError> {
        match self {
            ReplyTo::OneShot(tx) => tx.send(reply).map_err(|_| ReplyError::ReplyClosed),
            ReplyTo::Mailbox(tx) => tx
                .unbounded_send(reply)
                .map_err(|_| ReplyError::ReplyClosed),
            ReplyTo::Userspace(tx) => {
                let Reply { token, body } = reply;
                let bytes = postcard::to_stdvec(&UserResponse { token, body })
                    .map_err(|_| ReplyError::Serialize)?;
                tx.unbounded_send(bytes).map_err(|_| ReplyError::ReplyClosed)
            }
        }
    }
}

impl core::fmt::Display for StartError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StartError::Config(e) => write!(f, "invalid SPI port options: {e}"),
            StartError::Attach(AttachError::Bus(e)) => write!(f, "SPI bus init failed: {e}"),
            StartError::Attach(AttachError::Device { name, error }) => {
                write!(f, "SPI device {name} could not be added: {error}")
            }
            StartError::Attach(AttachError::DuplicateDevice(name)) => {
                write!(f, "SPI device {name} configured twice")
            }
        }
    }
}

impl std::error::Error for StartError {}

////////////////////////////////////////////////////////////////////////////////
// Server
////////////////////////////////////////////////////////////////////////////////

/// A running SPI port.
pub struct SpiServer<B: SpiBus, H> {
    driver: SpiDriver<B, H>,
    rx: mpsc::Receiver<Request>,
    port: PortId,
    live: Liveness,
}

/// Bring up the bus and devices described by `config` and register the port.
///
/// On failure everything acquired so far has already been released.
#[tracing::instrument(name = "SpiServer::start", level = "debug", skip_all, fields(peripheral = %config.bus.peripheral))]
pub fn start<B: SpiBus, H: Heap>(
    config: &SpiConfig,
    bus: B,
    heap: H,
    registry: &mut PortRegistry,
) -> Result<(SpiServer<B, H>, SpiClient), StartError> {
    let devices = Devices::attach(bus, &config.bus, &config.devices).map_err(StartError::Attach)?;
    let (tx, rx) = mpsc::channel(config.settings.mailbox_depth);
    let (port, live) = registry.register::<SpiService>(devices.peripheral());
    tracing::info!(?port, devices = devices.len(), "SPI port started.");

    let server = SpiServer {
        driver: SpiDriver::new(devices, heap),
        rx,
        port,
        live,
    };
    Ok((server, SpiClient::new(tx, port)))
}

/// Parse the port options handed over by the host runtime, then [`start`].
pub fn open<B: SpiBus, H: Heap>(
    opts: &Value,
    bus: B,
    heap: H,
    registry: &mut PortRegistry,
) -> Result<(SpiServer<B, H>, SpiClient), StartError> {
    let config = SpiConfig::from_value(opts).map_err(|error| {
        tracing::error!(%error, "Invalid SPI port options");
        StartError::Config(error)
    })?;
    start(&config, bus, heap, registry)
}

/// Look up the peripheral owned by a live SPI port.
///
/// Returns `None` unless `port` references a running SPI port.
pub fn peripheral(registry: &PortRegistry, port: &Value) -> Option<Peripheral> {
    registry.get::<SpiService>(port)
}

impl<B: SpiBus, H: Heap> SpiServer<B, H> {
    pub fn port(&self) -> PortId {
        self.port
    }

    pub fn driver(&self) -> &SpiDriver<B, H> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut SpiDriver<B, H> {
        &mut self.driver
    }

    /// Serve requests until `close` or until every client has gone away.
    pub async fn run(mut self) {
        while let Some(req) = self.rx.next().await {
            if self.handle(req) == Flow::Terminate {
                break;
            }
        }
        // every client went away without closing
        self.driver.shutdown();
        self.live.close();
        tracing::info!(port = ?self.port, "SPI port stopped.");
    }

    /// Handle a single request, sending its reply.
    pub fn handle(&mut self, req: Request) -> Flow {
        let Request {
            token,
            payload,
            reply,
        } = req;
        let span = tracing::debug_span!("spi request", port = ?self.port, %token);
        let _enter = span.enter();

        let Dispatched { value, terminate } = self.driver.dispatch(&payload);

        // the {Token, Body} pair itself
        let body = match self.driver.heap_mut().ensure_free(PAIR_WORDS) {
            Ok(()) => value,
            Err(oom) => {
                tracing::warn!(%oom, "no room for the reply");
                crate::response::encode(Err(SpiError::OutOfMemory))
            }
        };
        tracing::trace!(%body, "reply");

        if let Err(error) = reply.send(Reply { token, body }) {
            tracing::warn!(?error, "spi: failed to send reply");
        }

        if terminate {
            self.live.close();
            Flow::Terminate
        } else {
            Flow::Continue
        }
    }
}

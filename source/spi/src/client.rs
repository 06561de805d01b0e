//! # SPI client
//!
//! A typed handle for talking to a running [`SpiServer`](crate::server::SpiServer).
//! Builds the request payloads, assigns correlation tokens, and decodes the
//! replies.

use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};

use crate::{
    command,
    registry::PortId,
    response::{self, Payload, SpiError},
    server::{Reply, ReplyTo, Request},
    Value,
};

/// A client handle to an SPI port.
#[derive(Clone)]
pub struct SpiClient {
    tx: mpsc::Sender<Request>,
    port: PortId,
    next_token: u32,
}

/// Why a call did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The port has stopped.
    Disconnected,
    /// The port answered with an error.
    Spi(SpiError),
    /// The port answered with something this client doesn't understand.
    UnexpectedReply(Value),
}

impl core::fmt::Display for CallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CallError::Disconnected => f.write_str("SPI port is closed"),
            CallError::Spi(e) => write!(f, "SPI error: {e}"),
            CallError::UnexpectedReply(v) => write!(f, "unexpected reply: {v}"),
        }
    }
}

impl std::error::Error for CallError {}

impl From<SpiError> for CallError {
    fn from(e: SpiError) -> Self {
        CallError::Spi(e)
    }
}

/// Transaction fields for [`SpiClient::write`] and [`SpiClient::write_read`].
///
/// Fields left unset take the driver's defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fields {
    pub command: Option<u16>,
    pub address: Option<u64>,
    pub write_data: Option<Vec<u8>>,
    pub write_bits: Option<usize>,
    pub read_bits: Option<usize>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, command: u16) -> Self {
        self.command = Some(command);
        self
    }

    pub fn address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    pub fn write_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.write_data = Some(data.into());
        self
    }

    pub fn write_bits(mut self, bits: usize) -> Self {
        self.write_bits = Some(bits);
        self
    }

    pub fn read_bits(mut self, bits: usize) -> Self {
        self.read_bits = Some(bits);
        self
    }

    /// The field map as sent on the wire.
    pub fn to_value(&self) -> Value {
        let mut map = Vec::new();
        if let Some(c) = self.command {
            map.push((Value::atom("command"), Value::Int(c.into())));
        }
        if let Some(a) = self.address {
            map.push((Value::atom("address"), Value::integer(a as i64)));
        }
        if let Some(d) = &self.write_data {
            map.push((Value::atom("write_data"), Value::Binary(d.clone())));
        }
        if let Some(b) = self.write_bits {
            map.push((Value::atom("write_bits"), Value::integer(b as i64)));
        }
        if let Some(b) = self.read_bits {
            map.push((Value::atom("read_bits"), Value::integer(b as i64)));
        }
        Value::Map(map)
    }
}

impl SpiClient {
    pub(crate) fn new(tx: mpsc::Sender<Request>, port: PortId) -> Self {
        Self {
            tx,
            port,
            next_token: 0,
        }
    }

    /// The port this client talks to.
    pub fn port(&self) -> PortId {
        self.port
    }

    /// Send a raw payload and wait for the reply.
    pub async fn request(&mut self, payload: Value) -> Result<Reply, CallError> {
        let token = Value::integer(self.next_token.into());
        self.next_token = self.next_token.wrapping_add(1);

        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Request {
                token: token.clone(),
                payload,
                reply: ReplyTo::OneShot(tx),
            })
            .await
            .map_err(|_| CallError::Disconnected)?;
        let reply = rx.await.map_err(|_| CallError::Disconnected)?;

        if reply.token != token {
            tracing::warn!(expected = %token, got = %reply.token, "reply token mismatch");
            return Err(CallError::UnexpectedReply(reply.body));
        }
        Ok(reply)
    }

    async fn call(&mut self, payload: Value) -> Result<Payload, CallError> {
        let Reply { body, .. } = self.request(payload).await?;
        match response::decode(&body) {
            Some(res) => res.map_err(CallError::Spi),
            None => Err(CallError::UnexpectedReply(body)),
        }
    }

    /// Read `len` bits from `address`.
    pub async fn read_at(&mut self, device: &str, address: u64, len: u32) -> Result<u32, CallError> {
        let payload = command::read_at(Value::atom(device), address, len);
        match self.call(payload).await? {
            Payload::Integer(n) => Ok(n),
            other => Err(CallError::UnexpectedReply(response::encode(Ok(other)))),
        }
    }

    /// Write the low `len` bits of `data` to `address`, returning what was
    /// shifted in meanwhile.
    pub async fn write_at(
        &mut self,
        device: &str,
        address: u64,
        len: u32,
        data: u32,
    ) -> Result<u32, CallError> {
        let payload = command::write_at(Value::atom(device), address, len, data);
        match self.call(payload).await? {
            Payload::Integer(n) => Ok(n),
            other => Err(CallError::UnexpectedReply(response::encode(Ok(other)))),
        }
    }

    pub async fn write(&mut self, device: &str, fields: &Fields) -> Result<(), CallError> {
        let payload = command::write(Value::atom(device), fields.to_value());
        match self.call(payload).await? {
            Payload::Done => Ok(()),
            other => Err(CallError::UnexpectedReply(response::encode(Ok(other)))),
        }
    }

    pub async fn write_read(&mut self, device: &str, fields: &Fields) -> Result<Vec<u8>, CallError> {
        let payload = command::write_read(Value::atom(device), fields.to_value());
        match self.call(payload).await? {
            Payload::Bytes(b) => Ok(b),
            other => Err(CallError::UnexpectedReply(response::encode(Ok(other)))),
        }
    }

    /// Detach every device and stop the port.
    pub async fn close(&mut self) -> Result<(), CallError> {
        match self.call(command::close()).await? {
            Payload::Done => Ok(()),
            other => Err(CallError::UnexpectedReply(response::encode(Ok(other)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_only_carry_what_was_set() {
        assert_eq!(Fields::new().to_value(), Value::Map(vec![]));

        let f = Fields::new().write_data([0xAB, 0xCD]).read_bits(8);
        let v = f.to_value();
        assert_eq!(v.get("write_data"), Some(&Value::Binary(vec![0xAB, 0xCD])));
        assert_eq!(v.get("read_bits"), Some(&Value::Int(8)));
        assert_eq!(v.get("write_bits"), None);
        assert_eq!(v.get("command"), None);
    }
}

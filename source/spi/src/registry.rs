//! # Port registry
//!
//! Drivers that share hardware with a running port need a way to go from an
//! opaque port reference (a [`Value::Pid`]) back to that port's details. The
//! [`PortRegistry`] keeps one entry per started port, tagged with the
//! [`RegisteredDriver`] that owns it, so a lookup only succeeds when the
//! reference names a live port of the expected kind.

use core::any::Any;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
pub use uuid::{uuid, Uuid};

use crate::Value;

/// A driver kind that can be stored in a [`PortRegistry`].
pub trait RegisteredDriver {
    /// Details published about each live port of this kind.
    type Info: Clone + Send + Sync + 'static;

    /// Identifies this kind of driver.
    const UUID: Uuid;
}

/// Identifies one started port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(u32);

/// Tracks whether a port is still running.
///
/// Held by the port's server; the port is considered closed once this is
/// marked closed or dropped.
#[derive(Debug)]
pub struct Liveness {
    live: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct PortRegistry {
    next_id: u32,
    items: Vec<RegistryItem>,
}

struct RegistryItem {
    id: PortId,
    uuid: Uuid,
    info: Box<dyn Any + Send + Sync>,
    live: Arc<AtomicBool>,
}

impl PortId {
    pub fn to_value(self) -> Value {
        Value::Pid(self.0)
    }

    pub fn from_value(val: &Value) -> Option<Self> {
        match *val {
            Value::Pid(p) => Some(PortId(p)),
            _ => None,
        }
    }
}

impl Liveness {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl Drop for Liveness {
    fn drop(&mut self) {
        self.close();
    }
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new live port of kind `D`.
    pub fn register<D: RegisteredDriver>(&mut self, info: D::Info) -> (PortId, Liveness) {
        self.reap();
        let id = PortId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        let live = Arc::new(AtomicBool::new(true));
        self.items.push(RegistryItem {
            id,
            uuid: D::UUID,
            info: Box::new(info),
            live: live.clone(),
        });
        let uuid = D::UUID;
        tracing::debug!(port = ?id, %uuid, "registered port");
        (id, Liveness { live })
    }

    /// Look up the details of a live port of kind `D`.
    ///
    /// Returns `None` if `port` is not a port reference, names a port that
    /// has closed, or names a port of a different kind.
    pub fn get<D: RegisteredDriver>(&self, port: &Value) -> Option<D::Info> {
        let Some(id) = PortId::from_value(port) else {
            tracing::warn!(%port, "Given term is not a port reference.");
            return None;
        };
        let item = self.items.iter().find(|i| i.id == id)?;
        if item.uuid != D::UUID || !item.live.load(Ordering::Acquire) {
            tracing::warn!(%port, "Given term is not a live port of the requested kind.");
            return None;
        }
        item.info.downcast_ref::<D::Info>().cloned()
    }

    /// Drop the entries of ports that have closed.
    pub fn reap(&mut self) {
        self.items.retain(|i| i.live.load(Ordering::Acquire));
    }

    /// The number of registered ports, including ones that have closed but
    /// not yet been reaped.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;
    impl RegisteredDriver for Widget {
        type Info = u8;
        const UUID: Uuid = uuid!("05bcd4b7-dd81-434a-a958-f18ee84f8635");
    }

    struct Gadget;
    impl RegisteredDriver for Gadget {
        type Info = u8;
        const UUID: Uuid = uuid!("8fcb8f6e-47dc-4f68-b3b3-2ab3a3c3c1a2");
    }

    #[test]
    fn lookups_are_typed_and_live() {
        let mut reg = PortRegistry::new();
        let (w, w_live) = reg.register::<Widget>(1);
        let (g, _g_live) = reg.register::<Gadget>(2);

        assert_eq!(reg.get::<Widget>(&w.to_value()), Some(1));
        assert_eq!(reg.get::<Gadget>(&g.to_value()), Some(2));
        // wrong kind
        assert_eq!(reg.get::<Gadget>(&w.to_value()), None);
        // not a port at all
        assert_eq!(reg.get::<Widget>(&Value::atom("spi")), None);
        assert_eq!(reg.get::<Widget>(&Value::Pid(99)), None);

        w_live.close();
        assert_eq!(reg.get::<Widget>(&w.to_value()), None);
        assert_eq!(reg.len(), 2);
        reg.reap();
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn dropping_liveness_closes() {
        let mut reg = PortRegistry::new();
        let (w, live) = reg.register::<Widget>(1);
        assert!(live.is_live());
        drop(live);
        assert_eq!(reg.get::<Widget>(&w.to_value()), None);
    }
}

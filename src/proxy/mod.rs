pub mod bus;
pub mod local;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::rpc::wire::WireRecord;
use crate::util::id::ActorName;

/// Delivery seam between actors. A proxy hands a wire record to a peer —
/// by enqueueing onto its kernel queue when the peer is in-process, or by
/// marshalling onto the bus when it is remote. Proxies never call into a
/// peer's in-memory objects.
pub trait ActorProxy: Send + Sync {
    fn name(&self) -> &ActorName;

    fn deliver(&self, record: WireRecord) -> Result<()>;
}

/// Name → proxy directory shared by the kernels and the RPC engine of one
/// process.
#[derive(Clone, Default)]
pub struct ProxyRegistry {
    directory: Arc<RwLock<HashMap<ActorName, Arc<dyn ActorProxy>>>>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        ProxyRegistry::default()
    }

    pub fn register(&self, proxy: Arc<dyn ActorProxy>) {
        let mut map = self.directory.write().unwrap();
        map.insert(proxy.name().clone(), proxy);
    }

    pub fn unregister(&self, name: &ActorName) {
        let mut map = self.directory.write().unwrap();
        map.remove(name);
    }

    pub fn lookup(&self, name: &ActorName) -> Result<Arc<dyn ActorProxy>> {
        let map = self.directory.read().unwrap();
        map.get(name).cloned().ok_or_else(|| Error::NoSuchActor(name.to_string()))
    }

    pub fn names(&self) -> Vec<ActorName> {
        self.directory.read().unwrap().keys().cloned().collect()
    }
}

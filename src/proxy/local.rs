use crate::error::Result;
use crate::kernel::event::KernelEvent;
use crate::kernel::queue::QueueHandle;
use crate::proxy::ActorProxy;
use crate::rpc::wire::WireRecord;
use crate::util::id::ActorName;

/// Proxy to an actor living in the same process. Delivery still goes
/// through the peer's kernel queue so ordering, sequence and gate semantics
/// are identical to the remote path.
pub struct LocalProxy {
    name: ActorName,
    queue: QueueHandle,
}

impl LocalProxy {
    pub fn new(name: ActorName, queue: QueueHandle) -> Self {
        LocalProxy { name, queue }
    }
}

impl ActorProxy for LocalProxy {
    fn name(&self) -> &ActorName {
        &self.name
    }

    fn deliver(&self, record: WireRecord) -> Result<()> {
        self.queue.post(KernelEvent::Incoming(record))
    }
}

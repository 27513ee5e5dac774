use std::sync::mpsc;

use crate::error::Error;
use crate::manage::{ManageOp, ManageResponse};
use crate::rpc::wire::{FailedRpcBody, WireRecord};
use crate::security::AuthToken;
use crate::time::clock::Cycle;

/// Everything the kernel thread reacts to. External stimuli are enqueued on
/// the per-actor work queue and drained in strict arrival order.
pub enum KernelEvent {
    /// Timer advanced the actor clock.
    Tick { cycle: Cycle },
    /// Record arriving from a peer (local proxy or bus).
    Incoming(WireRecord),
    /// Failure synthesized by the RPC engine: timeout or exhausted retries.
    FailedOutbound(FailedRpcBody),
    /// Management command with its synchronous reply channel.
    Manage {
        token: AuthToken,
        op: ManageOp,
        reply: mpsc::Sender<Result<ManageResponse, Error>>,
    },
    /// Drain and shut down.
    Stop,
}

impl std::fmt::Debug for KernelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelEvent::Tick { cycle } => write!(f, "Tick({})", cycle),
            KernelEvent::Incoming(record) => write!(f, "Incoming({:?})", record.kind()),
            KernelEvent::FailedOutbound(body) => write!(f, "FailedOutbound({:?})", body.kind),
            KernelEvent::Manage { op, .. } => write!(f, "Manage({:?})", std::mem::discriminant(op)),
            KernelEvent::Stop => write!(f, "Stop"),
        }
    }
}

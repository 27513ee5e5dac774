pub mod engine;
pub mod wire;

pub use engine::{Outbound, RemoteDisposition, RetryPolicy, RpcEngine};
pub use wire::{FailedRpcBody, FailureCode, RequestBody, RequestKind, WireRecord};

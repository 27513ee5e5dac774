use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::kernel::event::KernelEvent;
use crate::kernel::queue::QueueHandle;
use crate::proxy::ProxyRegistry;
use crate::rpc::wire::{FailedRpcBody, FailureCode, RequestKind, WireRecord};
use crate::util::id::{ActorName, DelegationId, Guid, ReservationId};
use crate::util::timer::{KernelTimer, TimerId};

/// Tunables for outbound delivery. The per-call deadline applies only to
/// claim, reclaim and query; other requests are answered by asynchronous
/// updates and carry no deadline.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub claim_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(250),
            claim_timeout: Duration::from_secs(120),
            query_timeout: Duration::from_secs(120),
        }
    }
}

/// One outbound request: where it goes and where failure reports come back.
pub struct Outbound {
    pub from: ActorName,
    pub reply_queue: QueueHandle,
    pub target: ActorName,
    pub record: WireRecord,
}

struct PendingRequest {
    from: ActorName,
    reply_queue: QueueHandle,
    target: ActorName,
    record: WireRecord,
    retry_count: u32,
    deadline: Option<TimerId>,
}

impl PendingRequest {
    fn failed_body(&self, code: FailureCode, message: String) -> FailedRpcBody {
        FailedRpcBody {
            request_id: self.record.message_id,
            kind: self.record.kind(),
            rid: self.record.body.rid(),
            delegation_id: self.record.body.delegation_id().cloned(),
            code,
            message,
        }
    }
}

/// What the kernel should do after the engine correlated a remote failure.
#[derive(Debug, PartialEq, Eq)]
pub enum RemoteDisposition {
    /// The engine re-dispatched the request; nothing to do.
    Retried,
    /// The request is abandoned; fail the reservation or delegation.
    GiveUp,
}

struct EngineInner {
    registry: ProxyRegistry,
    pending: Mutex<HashMap<Guid, PendingRequest>>,
    timer: KernelTimer,
    policy: RetryPolicy,
}

/// Tracks every outbound request from this process. Retries are transparent
/// to the kernel: `message_id` and the reservation sequence never change, so
/// the peer's sequence gate keeps the observable effect at-most-once.
#[derive(Clone)]
pub struct RpcEngine {
    inner: Arc<EngineInner>,
}

impl RpcEngine {
    pub fn new(registry: ProxyRegistry, policy: RetryPolicy) -> Self {
        RpcEngine {
            inner: Arc::new(EngineInner {
                registry,
                pending: Mutex::new(HashMap::new()),
                timer: KernelTimer::spawn("rpc"),
                policy,
            }),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Registers the request and attempts first delivery. Never blocks the
    /// kernel: delivery is an enqueue, retries run on the timer thread.
    pub fn dispatch(&self, outbound: Outbound) {
        let message_id = outbound.record.message_id;
        let kind = outbound.record.kind();

        {
            let mut pending = self.inner.pending.lock().unwrap();
            pending.insert(
                message_id,
                PendingRequest {
                    from: outbound.from,
                    reply_queue: outbound.reply_queue,
                    target: outbound.target,
                    record: outbound.record,
                    retry_count: 0,
                    deadline: None,
                },
            );
        }

        // The entry must exist before the deadline can fire.
        if let Some(timeout) = self.deadline_for(kind) {
            let inner = self.inner.clone();
            let timer = self.inner.timer.schedule(timeout, move || {
                Self::expire(&inner, message_id, timeout);
            });
            let mut pending = self.inner.pending.lock().unwrap();
            match pending.get_mut(&message_id) {
                Some(request) => request.deadline = Some(timer),
                None => self.inner.timer.cancel(timer),
            }
        }

        Self::try_send(&self.inner, message_id);
    }

    fn deadline_for(&self, kind: RequestKind) -> Option<Duration> {
        match kind {
            RequestKind::Claim | RequestKind::Reclaim => Some(self.inner.policy.claim_timeout),
            RequestKind::Query => Some(self.inner.policy.query_timeout),
            _ => None,
        }
    }

    /// Marks a tracked request answered. Requests without deadlines are also
    /// cleaned up through here when the matching update arrives.
    pub fn complete(&self, request_id: Guid) {
        let mut pending = self.inner.pending.lock().unwrap();
        if let Some(request) = pending.remove(&request_id) {
            if let Some(timer) = request.deadline {
                self.inner.timer.cancel(timer);
            }
        }
    }

    /// Clears every in-flight request for the reservation; called when an
    /// update for it is absorbed. The pending gate allows at most one, so
    /// this is a targeted sweep.
    pub fn complete_for_reservation(&self, rid: ReservationId) {
        self.complete_matching(|request| request.record.body.rid() == Some(rid));
    }

    pub fn complete_for_delegation(&self, delegation_id: &DelegationId) {
        self.complete_matching(|request| request.record.body.delegation_id() == Some(delegation_id));
    }

    fn complete_matching(&self, matches: impl Fn(&PendingRequest) -> bool) {
        let mut pending = self.inner.pending.lock().unwrap();
        let ids: Vec<Guid> = pending.iter().filter(|(_, r)| matches(r)).map(|(id, _)| *id).collect();
        for id in ids {
            if let Some(request) = pending.remove(&id) {
                if let Some(timer) = request.deadline {
                    self.inner.timer.cancel(timer);
                }
            }
        }
    }

    /// Correlates a failed-RPC record received from the peer with the local
    /// request it answers.
    pub fn correlate_remote_failure(&self, body: &FailedRpcBody) -> RemoteDisposition {
        let should_retry = {
            let mut pending = self.inner.pending.lock().unwrap();
            match pending.get_mut(&body.request_id) {
                Some(request) if body.code == FailureCode::Transient
                    && request.retry_count < self.inner.policy.max_retries =>
                {
                    request.retry_count += 1;
                    Some(Self::backoff(&self.inner.policy, request.retry_count))
                }
                Some(_) => {
                    let request = pending.remove(&body.request_id).unwrap();
                    if let Some(timer) = request.deadline {
                        self.inner.timer.cancel(timer);
                    }
                    None
                }
                None => None,
            }
        };

        match should_retry {
            Some(delay) => {
                let inner = self.inner.clone();
                let message_id = body.request_id;
                self.inner.timer.schedule(delay, move || {
                    Self::try_send(&inner, message_id);
                });
                RemoteDisposition::Retried
            }
            None => RemoteDisposition::GiveUp,
        }
    }

    /// Number of requests currently tracked; used by shutdown and tests.
    pub fn outstanding(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    /// Drops every tracked request and cancels its deadline. Part of actor
    /// shutdown: in-flight sends are abandoned, not completed.
    pub fn abort_all(&self) {
        let mut pending = self.inner.pending.lock().unwrap();
        for (_, request) in pending.drain() {
            if let Some(timer) = request.deadline {
                self.inner.timer.cancel(timer);
            }
        }
    }

    /// Shutdown path for one actor of a shared engine: abandons only the
    /// requests that actor issued.
    pub fn abort_for(&self, actor: &ActorName) {
        self.complete_matching(|request| &request.from == actor);
    }

    fn backoff(policy: &RetryPolicy, retry_count: u32) -> Duration {
        let base = policy.backoff_base.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << retry_count.min(16));
        let jitter = rand::rng().random_range(0..=base / 2 + 1);
        Duration::from_millis(exp + jitter)
    }

    fn try_send(inner: &Arc<EngineInner>, message_id: Guid) {
        let attempt = {
            let pending = inner.pending.lock().unwrap();
            pending.get(&message_id).map(|request| (request.target.clone(), request.record.clone()))
        };

        let Some((target, record)) = attempt else {
            // Answered or aborted while a retry was queued.
            return;
        };

        let result: Result<()> = inner
            .registry
            .lookup(&target)
            .and_then(|proxy| proxy.deliver(record));

        if let Err(error) = result {
            Self::on_send_failure(inner, message_id, error);
        }
    }

    fn on_send_failure(inner: &Arc<EngineInner>, message_id: Guid, error: Error) {
        let retry_delay = {
            let mut pending = inner.pending.lock().unwrap();
            match pending.get_mut(&message_id) {
                Some(request) if request.retry_count < inner.policy.max_retries => {
                    request.retry_count += 1;
                    log::warn!(
                        "outbound {:?} to {} failed ({}); retry {}/{}",
                        request.record.kind(),
                        request.target,
                        error,
                        request.retry_count,
                        inner.policy.max_retries
                    );
                    Some(Self::backoff(&inner.policy, request.retry_count))
                }
                Some(_) => None,
                None => return,
            }
        };

        match retry_delay {
            Some(delay) => {
                let retry_inner = inner.clone();
                inner.timer.schedule(delay, move || {
                    Self::try_send(&retry_inner, message_id);
                });
            }
            None => {
                Self::give_up(inner, message_id, FailureCode::Permanent, format!("retries exhausted: {}", error));
            }
        }
    }

    fn expire(inner: &Arc<EngineInner>, message_id: Guid, timeout: Duration) {
        Self::give_up(
            inner,
            message_id,
            FailureCode::Timeout,
            format!("no answer within {} ms", timeout.as_millis()),
        );
    }

    fn give_up(inner: &Arc<EngineInner>, message_id: Guid, code: FailureCode, message: String) {
        let request = {
            let mut pending = inner.pending.lock().unwrap();
            pending.remove(&message_id)
        };
        let Some(request) = request else {
            return;
        };
        if let Some(timer) = request.deadline {
            inner.timer.cancel(timer);
        }

        let body = request.failed_body(code, message);
        log::warn!(
            "outbound {:?} to {} abandoned: {}",
            request.record.kind(),
            request.target,
            body.message
        );
        if request.reply_queue.post(KernelEvent::FailedOutbound(body)).is_err() {
            log::debug!("actor queue closed; dropping failure report for {}", message_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ActorProxy;
    use crate::rpc::wire::RequestBody;
    use crate::security::AuthToken;
    use crate::util::id::ActorGuid;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct FlakyProxy {
        name: ActorName,
        deliveries: Arc<AtomicUsize>,
        fail_first: usize,
    }

    impl ActorProxy for FlakyProxy {
        fn name(&self) -> &ActorName {
            &self.name
        }

        fn deliver(&self, _record: WireRecord) -> Result<()> {
            let n = self.deliveries.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(Error::TransportFailure("flaky".into()))
            } else {
                Ok(())
            }
        }
    }

    fn record(body: RequestBody) -> WireRecord {
        WireRecord::new(ActorName::new("caller"), AuthToken::new("caller", ActorGuid::new()), 1, body)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(5),
            claim_timeout: Duration::from_millis(60),
            query_timeout: Duration::from_millis(60),
        }
    }

    #[test]
    fn transient_failures_are_retried_with_same_message_id() {
        let registry = ProxyRegistry::new();
        let deliveries = Arc::new(AtomicUsize::new(0));
        let target = ActorName::new("broker");
        registry.register(Arc::new(FlakyProxy {
            name: target.clone(),
            deliveries: deliveries.clone(),
            fail_first: 2,
        }));

        let engine = RpcEngine::new(registry, fast_policy());
        let queue = QueueHandle::new();
        let rid = ReservationId::new();
        let wire = record(RequestBody::Close { rid });
        engine.dispatch(Outbound { from: ActorName::new("caller"), reply_queue: queue.clone(), target, record: wire });

        let start = Instant::now();
        while deliveries.load(Ordering::SeqCst) < 3 && start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(deliveries.load(Ordering::SeqCst), 3);
        // The successful delivery leaves one tracked request and no failure
        // event on the queue.
        assert_eq!(engine.outstanding(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn exhausted_retries_synthesize_permanent_failure() {
        let registry = ProxyRegistry::new();
        // No proxy registered at all: every delivery fails.
        let engine = RpcEngine::new(registry, fast_policy());
        let queue = QueueHandle::new();
        let rid = ReservationId::new();
        engine.dispatch(Outbound {
            from: ActorName::new("caller"),
            reply_queue: queue.clone(),
            target: ActorName::new("nowhere"),
            record: record(RequestBody::Close { rid }),
        });

        let event = wait_for_event(&queue, Duration::from_secs(2)).expect("failure event");
        match event {
            KernelEvent::FailedOutbound(body) => {
                assert_eq!(body.code, FailureCode::Permanent);
                assert_eq!(body.rid, Some(rid));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn claim_without_answer_times_out() {
        let registry = ProxyRegistry::new();
        let deliveries = Arc::new(AtomicUsize::new(0));
        let target = ActorName::new("site");
        // Accepts the record, never answers.
        registry.register(Arc::new(FlakyProxy { name: target.clone(), deliveries, fail_first: 0 }));

        let engine = RpcEngine::new(registry, fast_policy());
        let queue = QueueHandle::new();
        let delegation_id = DelegationId::new("del-1");
        engine.dispatch(Outbound {
            from: ActorName::new("caller"),
            reply_queue: queue.clone(),
            target,
            record: record(RequestBody::Claim {
                delegation_id: delegation_id.clone(),
                slice_id: crate::util::id::SliceId::new(),
                slice_name: "inventory".into(),
            }),
        });

        let event = wait_for_event(&queue, Duration::from_secs(2)).expect("timeout event");
        match event {
            KernelEvent::FailedOutbound(body) => {
                assert_eq!(body.code, FailureCode::Timeout);
                assert_eq!(body.delegation_id, Some(delegation_id));
                assert_eq!(body.kind, RequestKind::Claim);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn completing_cancels_the_deadline() {
        let registry = ProxyRegistry::new();
        let deliveries = Arc::new(AtomicUsize::new(0));
        let target = ActorName::new("site");
        registry.register(Arc::new(FlakyProxy { name: target.clone(), deliveries, fail_first: 0 }));

        let engine = RpcEngine::new(registry, fast_policy());
        let queue = QueueHandle::new();
        let delegation_id = DelegationId::new("del-2");
        let wire = record(RequestBody::Claim {
            delegation_id: delegation_id.clone(),
            slice_id: crate::util::id::SliceId::new(),
            slice_name: "inventory".into(),
        });
        engine.dispatch(Outbound { from: ActorName::new("caller"), reply_queue: queue.clone(), target, record: wire });

        engine.complete_for_delegation(&delegation_id);
        assert_eq!(engine.outstanding(), 0);
        assert!(wait_for_event(&queue, Duration::from_millis(150)).is_none());
    }

    fn wait_for_event(queue: &QueueHandle, timeout: Duration) -> Option<KernelEvent> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(event) = queue.try_next() {
                return Some(event);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }
}

use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::kernel::event::KernelEvent;
use crate::kernel::kernel::{ActorSpec, Kernel};
use crate::kernel::queue::QueueHandle;
use crate::manage::{ActorInfo, ManageOp, ManageResponse};
use crate::proxy::local::LocalProxy;
use crate::security::AuthToken;
use crate::time::clock::{ActorClock, Cycle};
use crate::util::id::{ActorGuid, ActorName};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Orchestrator,
    Broker,
    Authority,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Orchestrator => "orchestrator",
            ActorRole::Broker => "broker",
            ActorRole::Authority => "authority",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "orchestrator" | "controller" => Ok(ActorRole::Orchestrator),
            "broker" => Ok(ActorRole::Broker),
            "authority" | "site" => Ok(ActorRole::Authority),
            other => Err(Error::InvalidArguments(format!("unknown actor type '{}'", other))),
        }
    }
}

/// Handle to a running actor: its kernel thread plus the queue feeding it.
pub struct ActorHandle {
    name: ActorName,
    guid: ActorGuid,
    identity: AuthToken,
    queue: QueueHandle,
    worker: Option<thread::JoinHandle<()>>,
}

impl ActorHandle {
    /// Boots an actor: registers its local proxy, recovers persisted state,
    /// re-issues interrupted requests, then starts the kernel thread. A
    /// recovery invariant violation aborts the start.
    pub fn spawn(spec: ActorSpec) -> Result<ActorHandle> {
        let queue = QueueHandle::new();
        let name = spec.name.clone();
        let guid = spec.guid;
        let role = spec.role;
        let context = spec.context.clone();

        // The proxy goes in before recovery so re-issued requests can be
        // answered; inbound records queue up behind recovery on the work
        // queue and are processed only once the kernel thread starts.
        context.registry().register(std::sync::Arc::new(LocalProxy::new(name.clone(), queue.clone())));
        context.announce(ActorInfo { name: name.clone(), guid, role: role.as_str().to_string() });

        let mut kernel = Kernel::new(spec, queue.clone());
        let report = match crate::recovery::recover(&mut kernel) {
            Ok(report) => report,
            Err(e) => {
                context.registry().unregister(&name);
                context.withdraw(&name);
                return Err(e);
            }
        };
        log::info!(
            "{}: recovered {} slices, {} reservations, {} delegations ({} to re-issue)",
            name,
            report.slices,
            report.reservations,
            report.delegations,
            report.reissue.len()
        );
        crate::recovery::reissue(&mut kernel, report.reissue);

        let identity = AuthToken::new(name.as_str(), guid);
        let worker = thread::Builder::new()
            .name(format!("kernel-{}", name))
            .spawn(move || kernel.run())
            .map_err(|e| Error::Internal(format!("failed to spawn kernel thread: {}", e)))?;

        Ok(ActorHandle { name, guid, identity, queue, worker: Some(worker) })
    }

    pub fn name(&self) -> &ActorName {
        &self.name
    }

    pub fn guid(&self) -> ActorGuid {
        self.guid
    }

    pub fn queue(&self) -> QueueHandle {
        self.queue.clone()
    }

    /// Identity this actor uses for its own management calls.
    pub fn identity(&self) -> AuthToken {
        self.identity.clone()
    }

    /// Drives the clock externally; tests and simulations only.
    pub fn external_tick(&self, cycle: Cycle) -> Result<()> {
        self.queue.post(KernelEvent::Tick { cycle })
    }

    /// Synchronous management call: travels the kernel queue like any other
    /// event, the reply is built on the kernel thread.
    pub fn manage(&self, token: AuthToken, op: ManageOp) -> Result<ManageResponse> {
        let (reply, inbox) = mpsc::channel();
        self.queue.post(KernelEvent::Manage { token, op, reply })?;
        inbox
            .recv_timeout(Duration::from_secs(30))
            .map_err(|_| Error::Internal("management call timed out".to_string()))?
    }

    /// Queue barrier: returns once every event posted before it has been
    /// processed.
    pub fn settle(&self) -> Result<()> {
        self.manage(self.identity(), ManageOp::Ping).map(|_| ())
    }

    /// Drains the queue and stops the kernel thread.
    pub fn stop(mut self) {
        let _ = self.queue.post(KernelEvent::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for ActorHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.queue.post(KernelEvent::Stop);
            let _ = worker.join();
        }
    }
}

/// Timer component: fires a tick event at every cycle boundary. Ends when
/// the actor queue closes.
pub fn start_ticker(clock: ActorClock, queue: QueueHandle) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("ticker".to_string())
        .spawn(move || {
            let mut last = clock.current_cycle();
            loop {
                thread::sleep(Duration::from_millis(clock.cycle_millis().min(250)));
                let now = clock.current_cycle();
                if now > last {
                    last = now;
                    if queue.post(KernelEvent::Tick { cycle: now }).is_err() {
                        return;
                    }
                }
            }
        })
        .expect("failed to spawn ticker thread")
}

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::manage::{ActorInfo, VersionInfo};
use crate::proxy::ProxyRegistry;
use crate::rpc::{RetryPolicy, RpcEngine};
use crate::time::clock::ActorClock;
use crate::util::id::ActorName;

/// Process-wide environment, passed down explicitly from `main`. Tests
/// instantiate as many independent contexts as they need; nothing here is a
/// global.
pub struct Context {
    clock: ActorClock,
    registry: ProxyRegistry,
    engine: RpcEngine,
    version: VersionInfo,
    actors: RwLock<HashMap<ActorName, ActorInfo>>,
}

impl Context {
    pub fn new(clock: ActorClock, retry: RetryPolicy) -> Arc<Self> {
        let registry = ProxyRegistry::new();
        let engine = RpcEngine::new(registry.clone(), retry);
        Arc::new(Context {
            clock,
            registry,
            engine,
            version: VersionInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                gitsha1: option_env!("GIT_SHA1").unwrap_or("unknown").to_string(),
            },
            actors: RwLock::new(HashMap::new()),
        })
    }

    pub fn clock(&self) -> &ActorClock {
        &self.clock
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &RpcEngine {
        &self.engine
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    /// Announces an actor to the in-process directory (`GetActors`,
    /// `GetBrokers`).
    pub fn announce(&self, info: ActorInfo) {
        self.actors.write().unwrap().insert(info.name.clone(), info);
    }

    pub fn withdraw(&self, name: &ActorName) {
        self.actors.write().unwrap().remove(name);
    }

    pub fn actors(&self) -> Vec<ActorInfo> {
        self.actors.read().unwrap().values().cloned().collect()
    }

    pub fn brokers(&self) -> Vec<ActorInfo> {
        self.actors
            .read()
            .unwrap()
            .values()
            .filter(|info| info.role == "broker")
            .cloned()
            .collect()
    }
}

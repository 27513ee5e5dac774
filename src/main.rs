use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;

use slicebed::config::Config;
use slicebed::context::Context;
use slicebed::kernel::actor::start_ticker;
use slicebed::kernel::{ActorHandle, ActorRole, ActorSpec};
use slicebed::policy::{PolicyParams, PolicyRegistry};
use slicebed::proxy::bus::{Bus, BusProxy};
use slicebed::rpc::RetryPolicy;
use slicebed::security::{AccessChecker, KeyringValidator, PermitAll};
use slicebed::store::{ActorStore, ProxyRecord, SledStore};
use slicebed::time::ActorClock;
use slicebed::kernel::resource_set::ResourceType;
use slicebed::logger;
use slicebed::util::id::{ActorGuid, ActorName};

#[derive(Parser, Debug)]
#[command(name = "slicebed", about = "Testbed resource-leasing actor")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: String,
}

/// Requests above this many units fail ticket review unless a review
/// policy with its own cap is registered.
const DEFAULT_REVIEW_CAP: u64 = 64;

fn default_policy_kind(role: ActorRole) -> &'static str {
    match role {
        ActorRole::Orchestrator => "client-simple",
        ActorRole::Broker => "broker-simple",
        ActorRole::Authority => "authority-unit",
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config).context("loading configuration")?;
    logger::init(&config.logging);

    let clock = ActorClock::new(config.time.beginning_of_time, config.time.cycle_millis);
    let context = Context::new(clock, RetryPolicy::default());
    let store = Arc::new(SledStore::open(&config.database.path).context("opening state database")?);

    let role = ActorRole::parse(&config.actor.actor_type)?;
    let name = ActorName::new(config.actor.name.clone());
    let guid = config.actor.guid.map(ActorGuid::from_guid).unwrap_or_default();

    for peer in &config.peers {
        store.put_proxy(&ProxyRecord {
            name: ActorName::new(peer.name.clone()),
            kind: if peer.addr.is_some() { "bus".to_string() } else { "local".to_string() },
            addr: peer.addr.clone(),
        })?;
    }

    let access = if config.oauth.keys.is_empty() {
        log::warn!("no oauth keys configured; management plane runs open");
        AccessChecker::open()
    } else {
        AccessChecker::new(
            Box::new(KeyringValidator::new(config.oauth.keys.clone())),
            Box::new(PermitAll),
        )
    };

    let default_broker = config
        .peers
        .iter()
        .find(|p| p.peer_type == "broker")
        .map(|p| ActorName::new(p.name.clone()));
    let default_authority = config
        .peers
        .iter()
        .find(|p| p.peer_type == "authority" || p.peer_type == "site")
        .map(|p| ActorName::new(p.name.clone()));

    let registry = PolicyRegistry::with_builtins();
    let params = PolicyParams {
        name: name.clone(),
        guid,
        pools: config
            .actor
            .pools
            .iter()
            .map(|p| (ResourceType::new(p.rtype.clone()), p.units))
            .collect(),
        review_cap: DEFAULT_REVIEW_CAP,
    };
    let kind = config.actor.policy.as_deref().unwrap_or(default_policy_kind(role));
    let policy = registry.build(kind, &params)?;
    log::info!("policy '{}' selected (available: {:?})", kind, registry.kinds());

    let actor = ActorHandle::spawn(ActorSpec {
        name: name.clone(),
        guid,
        role,
        policy,
        store,
        context: context.clone(),
        access,
        default_broker,
        default_authority,
    })?;
    log::info!("actor {} ({}) is up", name, role.as_str());

    let needs_bus =
        config.runtime.bus_listen.is_some() || config.peers.iter().any(|p| p.addr.is_some());
    let bus = if needs_bus {
        let bus = Bus::start(config.runtime.bus_workers, config.runtime.bus_listen.as_deref())?;
        bus.node().register_local(name.clone(), actor.queue());
        for peer in config.peers.iter().filter(|p| p.addr.is_some()) {
            let peer_name = ActorName::new(peer.name.clone());
            context
                .registry()
                .register(Arc::new(BusProxy::new(peer_name, bus.node())));
            bus.connect(peer.addr.as_deref().unwrap())?;
        }
        Some(bus)
    } else {
        None
    };

    let _ticker = (!config.time.manual).then(|| start_ticker(clock, actor.queue()));

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(tokio::signal::ctrl_c())?;
    log::info!("shutdown signal received");

    actor.stop();
    drop(bus);
    Ok(())
}

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use crucible_bus::{EventBus, InMemoryBus, RedisBus};
use crucible_config::OperatorConfig;
use crucible_driver::{Driver, DriverRegistry, ProcessDriver};
use crucible_queue::{InMemoryQueue, RedisQueue, TaskQueue};
use crucible_store::{
    DurableStore, EphemeralStore, InMemoryDurableStore, InMemoryEphemeralStore, PostgresDurableStore,
    RedisEphemeralStore,
};

use crate::cli::{BackendArgs, RedisBackedBackend, StoreBackend};

/// Everything built from [`BackendArgs`], handed identically to `serve`,
/// `submit`, and `cancel` so the three never construct stores differently.
pub struct Backends {
    pub durable: Arc<dyn DurableStore>,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub bus: Arc<dyn EventBus>,
    pub queue: Arc<dyn TaskQueue>,
}

pub async fn build(args: &BackendArgs) -> anyhow::Result<Backends> {
    let needs_redis =
        matches!(args.ephemeral_store, RedisBackedBackend::Redis)
            || matches!(args.event_bus, RedisBackedBackend::Redis)
            || matches!(args.queue_backend, RedisBackedBackend::Redis);

    let redis_pool = if needs_redis {
        let url = args.redis_url.as_deref().context("--redis-url is required when any backend is set to redis")?;
        let cfg = deadpool_redis::Config::from_url(url);
        Some(cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1)).context("failed to build redis connection pool")?)
    } else {
        None
    };

    let durable: Arc<dyn DurableStore> = match args.durable_store {
        StoreBackend::Memory => Arc::new(InMemoryDurableStore::default()),
        StoreBackend::Postgres => {
            let url = args.postgres_url.as_deref().context("--postgres-url is required for the postgres durable store")?;
            Arc::new(PostgresDurableStore::connect(url).await?)
        }
    };

    let ephemeral: Arc<dyn EphemeralStore> = match args.ephemeral_store {
        RedisBackedBackend::Memory => Arc::new(InMemoryEphemeralStore::default()),
        RedisBackedBackend::Redis => Arc::new(RedisEphemeralStore::new(redis_pool.clone().unwrap())),
    };

    let bus: Arc<dyn EventBus> = match args.event_bus {
        RedisBackedBackend::Memory => Arc::new(InMemoryBus::new()),
        RedisBackedBackend::Redis => {
            let url = args.redis_url.as_deref().context("--redis-url is required for the redis event bus")?;
            let client = redis::Client::open(url).context("invalid redis url")?;
            Arc::new(RedisBus::new(redis_pool.clone().unwrap(), client))
        }
    };

    let queue: Arc<dyn TaskQueue> = match args.queue_backend {
        RedisBackedBackend::Memory => Arc::new(InMemoryQueue::new()),
        RedisBackedBackend::Redis => Arc::new(RedisQueue::new(redis_pool.unwrap())),
    };

    Ok(Backends { durable, ephemeral, bus, queue })
}

/// Resolves `{language -> backend}` from the operator config into a driver
/// registry. Only the `process` backend is wireable from CLI flags alone;
/// `gvisor`/`k8s` need cluster-specific configuration this CLI doesn't take,
/// so a language mapped to either fails at dispatch time with
/// `DriverNotConfigured` rather than being silently substituted.
pub fn build_driver_registry(cfg: &OperatorConfig) -> anyhow::Result<DriverRegistry> {
    let language_backend = cfg.sandbox_backends()?;
    let mut backends: HashMap<String, Arc<dyn Driver>> = HashMap::new();
    for name in language_backend.values() {
        if name == "process" {
            backends.entry(name.clone()).or_insert_with(|| Arc::new(ProcessDriver::new()) as Arc<dyn Driver>);
        }
    }
    Ok(DriverRegistry::new(backends, language_backend))
}

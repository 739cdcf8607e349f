//! Worker-process lifecycle for the event and offload core.

use std::time::Duration;

use indexmap::IndexMap;
use log::debug;

use crate::config::PoolRegistry;
use crate::error::{Error, Result};
use crate::pool::ThreadPool;
use crate::reactor::{Driver, EpollDriver, Reactor};

/// Process role the core is started under.
///
/// Thread pools are instantiated only for roles that run an event loop
/// of their own; a master process keeps the configuration but starts no
/// threads.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Master,
    Worker,
    Single,
    Helper,
}

impl Role {
    fn runs_pools(self) -> bool {
        matches!(self, Role::Worker | Role::Single)
    }
}

/// One worker: a reactor plus its configured thread pools, each wired
/// to the reactor through its notify channel.
pub struct Worker<D: Driver> {
    reactor: Reactor<D>,
    pools: IndexMap<String, ThreadPool>,
}

impl Worker<EpollDriver> {
    /// Build a worker over the epoll backend.
    pub fn init(registry: &PoolRegistry, role: Role) -> Result<Worker<EpollDriver>> {
        let driver = EpollDriver::new().map_err(Error::Platform)?;
        Worker::with_driver(driver, registry, role)
    }
}

impl<D: Driver> Worker<D> {
    pub fn with_driver(driver: D, registry: &PoolRegistry, role: Role) -> Result<Worker<D>> {
        let mut reactor = Reactor::new(driver)?;
        let mut pools = IndexMap::new();

        if role.runs_pools() {
            let mut registry = registry.clone();
            registry.ensure_default();

            for config in registry.iter() {
                let pool = ThreadPool::new(config)?;
                pool.attach(&mut reactor)?;

                debug!(
                    "thread pool \"{}\" started: threads={} max_queue={}",
                    config.name, config.threads, config.max_queue
                );

                pools.insert(config.name.clone(), pool);
            }
        }

        Ok(Worker { reactor, pools })
    }

    pub fn reactor(&self) -> &Reactor<D> {
        &self.reactor
    }

    pub fn reactor_mut(&mut self) -> &mut Reactor<D> {
        &mut self.reactor
    }

    /// Look up a started pool by name. Unknown names mirror the
    /// configuration error they stem from.
    pub fn pool(&self, name: &str) -> Result<&ThreadPool> {
        self.pools
            .get(name)
            .ok_or_else(|| Error::UnknownPool(name.to_string()))
    }

    pub fn pools(&self) -> impl Iterator<Item = &ThreadPool> {
        self.pools.values()
    }

    /// One reactor cycle.
    pub fn process(&mut self, timeout: Option<Duration>) -> Result<usize> {
        self.reactor.process(timeout)
    }

    /// Stop every pool: poison the workers and join them.
    pub fn shutdown(&mut self) {
        for (_, pool) in self.pools.iter_mut() {
            pool.shutdown();
        }
    }
}

impl<D: Driver> Drop for Worker<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

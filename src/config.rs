//! The `thread_pool` directive.
//!
//! `thread_pool NAME [threads=N] [max_queue=M]` declares a named pool at
//! configuration load; pools are de-duplicated by name and a `default`
//! pool is auto-provided. Referencing a pool that was never declared is
//! a fatal configuration error.

use indexmap::IndexMap;

use crate::error::{Error, Result};

pub const DEFAULT_POOL_NAME: &str = "default";
pub const DEFAULT_THREADS: usize = 32;
pub const DEFAULT_MAX_QUEUE: usize = 65536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub name: String,
    pub threads: usize,
    pub max_queue: usize,
}

impl PoolConfig {
    pub fn new(name: &str, threads: usize, max_queue: usize) -> PoolConfig {
        PoolConfig {
            name: name.to_string(),
            threads,
            max_queue,
        }
    }

    /// The auto-provided `default` pool.
    pub fn default_pool() -> PoolConfig {
        PoolConfig::new(DEFAULT_POOL_NAME, DEFAULT_THREADS, DEFAULT_MAX_QUEUE)
    }

    /// Parse one `thread_pool` directive line.
    ///
    /// `threads` is required except for the `default` pool; `max_queue`
    /// defaults to 65536.
    pub fn parse(line: &str) -> Result<PoolConfig> {
        let mut words = line.split_whitespace();

        match words.next() {
            Some("thread_pool") => {}
            Some(other) => return Err(Error::InvalidParam(other.to_string())),
            None => return Err(Error::InvalidParam(line.to_string())),
        }

        let name = match words.next() {
            Some(name) if !name.contains('=') => name.to_string(),
            _ => return Err(Error::InvalidParam(line.to_string())),
        };

        let mut threads = None;
        let mut max_queue = DEFAULT_MAX_QUEUE;

        for word in words {
            if let Some(value) = word.strip_prefix("threads=") {
                let value: usize = value
                    .parse()
                    .map_err(|_| Error::InvalidParam(word.to_string()))?;

                if value == 0 {
                    return Err(Error::InvalidParam(word.to_string()));
                }

                threads = Some(value);
            } else if let Some(value) = word.strip_prefix("max_queue=") {
                max_queue = value
                    .parse()
                    .map_err(|_| Error::InvalidParam(word.to_string()))?;
            } else {
                return Err(Error::InvalidParam(word.to_string()));
            }
        }

        let threads = match threads {
            Some(threads) => threads,
            None if name == DEFAULT_POOL_NAME => DEFAULT_THREADS,
            None => return Err(Error::InvalidParam(format!("thread_pool {}: threads", name))),
        };

        Ok(PoolConfig {
            name,
            threads,
            max_queue,
        })
    }
}

/// Named, de-duplicated pool configurations in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pools: IndexMap<String, PoolConfig>,
}

impl PoolRegistry {
    pub fn new() -> PoolRegistry {
        PoolRegistry {
            pools: IndexMap::new(),
        }
    }

    pub fn add(&mut self, config: PoolConfig) -> Result<()> {
        if self.pools.contains_key(&config.name) {
            return Err(Error::DuplicatePool(config.name));
        }

        self.pools.insert(config.name.clone(), config);

        Ok(())
    }

    pub fn parse_directive(&mut self, line: &str) -> Result<()> {
        self.add(PoolConfig::parse(line)?)
    }

    /// Look up a declared pool. Unknown names are fatal for the
    /// configuration referencing them.
    pub fn get(&self, name: &str) -> Result<&PoolConfig> {
        self.pools
            .get(name)
            .ok_or_else(|| Error::UnknownPool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    /// Insert the `default` pool if no declaration overrode it.
    pub fn ensure_default(&mut self) {
        if !self.pools.contains_key(DEFAULT_POOL_NAME) {
            let config = PoolConfig::default_pool();
            self.pools.insert(config.name.clone(), config);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PoolConfig> {
        self.pools.values()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_full_directive() {
        let config = PoolConfig::parse("thread_pool uploads threads=8 max_queue=128").unwrap();

        assert_eq!(config.name, "uploads");
        assert_eq!(config.threads, 8);
        assert_eq!(config.max_queue, 128);
    }

    #[test]
    fn max_queue_defaults() {
        let config = PoolConfig::parse("thread_pool uploads threads=8").unwrap();

        assert_eq!(config.max_queue, DEFAULT_MAX_QUEUE);
    }

    #[test]
    fn threads_required_except_default() {
        assert!(PoolConfig::parse("thread_pool uploads").is_err());

        let config = PoolConfig::parse("thread_pool default").unwrap();
        assert_eq!(config.threads, DEFAULT_THREADS);
        assert_eq!(config.max_queue, DEFAULT_MAX_QUEUE);
    }

    #[test]
    fn rejects_bad_numerics() {
        assert!(PoolConfig::parse("thread_pool a threads=zero").is_err());
        assert!(PoolConfig::parse("thread_pool a threads=0").is_err());
        assert!(PoolConfig::parse("thread_pool a threads=2 max_queue=-1").is_err());
        assert!(PoolConfig::parse("thread_pool a bogus=1").is_err());
        assert!(PoolConfig::parse("worker_processes 4").is_err());
    }

    #[test]
    fn registry_deduplicates() {
        let mut registry = PoolRegistry::new();

        registry.parse_directive("thread_pool a threads=2").unwrap();

        let err = registry
            .parse_directive("thread_pool a threads=4")
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePool(name) if name == "a"));
    }

    #[test]
    fn unknown_pool_is_fatal() {
        let registry = PoolRegistry::new();

        let err = registry.get("missing").unwrap_err();
        assert!(matches!(err, Error::UnknownPool(name) if name == "missing"));
    }

    #[test]
    fn default_pool_auto_provided() {
        let mut registry = PoolRegistry::new();
        registry.ensure_default();

        let config = registry.get(DEFAULT_POOL_NAME).unwrap();
        assert_eq!(config.threads, DEFAULT_THREADS);
        assert_eq!(config.max_queue, DEFAULT_MAX_QUEUE);

        // A declaration wins over the auto-provided pool.
        let mut registry = PoolRegistry::new();
        registry
            .parse_directive("thread_pool default threads=4")
            .unwrap();
        registry.ensure_default();

        assert_eq!(registry.get(DEFAULT_POOL_NAME).unwrap().threads, 4);
    }

    #[test]
    fn declaration_order_preserved() {
        let mut registry = PoolRegistry::new();
        registry.parse_directive("thread_pool b threads=1").unwrap();
        registry.parse_directive("thread_pool a threads=1").unwrap();

        let names: Vec<_> = registry.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}

//! Cache fan-out
//!
//! Routes every key to exactly one of several cache nodes, with selection
//! probability proportional to the node's weight and a stable mapping for
//! a fixed node set. All nodes share one single-flight barrier and one
//! statistics scope.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use xxhash_rust::xxh64::xxh64;

use crate::config::{CacheOptions, ClusterConf};
use crate::error::{BatchError, CacheError};
use crate::node::{CacheNode, Cacheable};
use crate::singleflight::SingleFlight;
use crate::stat::CacheStat;
use crate::store::{Redis, RedisPool, Store};

/// Weighted fan-out over one or more cache nodes.
pub struct Cache<S> {
    nodes: Vec<WeightedNode<S>>,
}

struct WeightedNode<S> {
    node: CacheNode<S>,
    weight: u32,
    /// Hash seed derived from the endpoint address, so each node scores
    /// keys independently.
    seed: u64,
}

impl Cache<Redis> {
    /// Builds one node per endpoint descriptor. Sharing `barrier` and
    /// `stat` across the nodes keeps duplicate suppression and counters
    /// deployment-wide.
    pub fn new(
        conf: &ClusterConf,
        pool: Arc<RedisPool>,
        barrier: Arc<SingleFlight<String>>,
        stat: Arc<CacheStat>,
        options: CacheOptions,
    ) -> Result<Self, CacheError> {
        let mut nodes = Vec::with_capacity(conf.len());
        for node_conf in conf {
            let store = Redis::new(node_conf, Arc::clone(&pool));
            let node = CacheNode::new(store, Arc::clone(&barrier), Arc::clone(&stat), options)?;
            nodes.push((node, node_conf.weight));
        }
        Self::with_nodes(nodes)
    }
}

impl<S: Store> Cache<S> {
    /// Wraps pre-built nodes. A weight of zero counts as one so every
    /// node stays reachable.
    pub fn with_nodes(nodes: Vec<(CacheNode<S>, u32)>) -> Result<Self, CacheError> {
        if nodes.is_empty() {
            return Err(CacheError::Config(
                "at least one cache node is required".to_owned(),
            ));
        }
        let nodes = nodes
            .into_iter()
            .map(|(node, weight)| {
                let seed = xxh64(node.addr().as_bytes(), 0);
                WeightedNode {
                    node,
                    weight: weight.max(1),
                    seed,
                }
            })
            .collect();
        Ok(Self { nodes })
    }

    pub async fn get_cache<T: Cacheable>(&self, key: &str) -> Result<T, CacheError> {
        self.dispatch(key).get_cache(key).await
    }

    pub async fn set_cache<T: Cacheable>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        self.dispatch(key).set_cache(key, value).await
    }

    pub async fn set_cache_with_expire<T: Cacheable>(
        &self,
        key: &str,
        value: &T,
        expire: Duration,
    ) -> Result<(), CacheError> {
        self.dispatch(key).set_cache_with_expire(key, value, expire).await
    }

    /// Best-effort delete; each key is routed to its owning node.
    pub async fn del_cache(&self, keys: &[&str]) -> Result<(), CacheError> {
        for (index, keys) in self.group_keys(keys).into_iter().enumerate() {
            if !keys.is_empty() {
                self.nodes[index].node.del_cache(&keys).await?;
            }
        }
        Ok(())
    }

    /// Strict delete for write paths; per-node failures are combined.
    pub(crate) async fn invalidate(&self, keys: &[&str]) -> Result<(), CacheError> {
        let mut batch = BatchError::new();
        for (index, keys) in self.group_keys(keys).into_iter().enumerate() {
            if keys.is_empty() {
                continue;
            }
            if let Err(err) = self.nodes[index].node.invalidate(&keys).await {
                batch.add(err);
            }
        }
        match batch.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn take<T, Q, QF>(&self, key: &str, query: Q) -> Result<T, CacheError>
    where
        T: Cacheable,
        Q: FnOnce() -> QF,
        QF: Future<Output = Result<T, CacheError>>,
    {
        self.dispatch(key).take(key, query).await
    }

    pub async fn take_with_expire<T, Q, QF>(&self, key: &str, query: Q) -> Result<T, CacheError>
    where
        T: Cacheable,
        Q: FnOnce(Duration) -> QF,
        QF: Future<Output = Result<T, CacheError>>,
    {
        self.dispatch(key).take_with_expire(key, query).await
    }

    fn dispatch(&self, key: &str) -> &CacheNode<S> {
        &self.nodes[self.dispatch_index(key)].node
    }

    /// Rendezvous hashing: every node scores the key with its own seed,
    /// scaled by weight; the top score wins. A key keeps its node for as
    /// long as the node set is unchanged, and the share of keys a node
    /// attracts is proportional to its weight.
    fn dispatch_index(&self, key: &str) -> usize {
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (index, entry) in self.nodes.iter().enumerate() {
            let hash = xxh64(key.as_bytes(), entry.seed);
            // Map the hash into (0, 1) so the logarithm stays finite.
            let unit = (hash as f64 + 1.0) / (u64::MAX as f64 + 2.0);
            let score = -f64::from(entry.weight) / unit.ln();
            if score > best_score {
                best_score = score;
                best = index;
            }
        }
        best
    }

    fn group_keys<'k>(&self, keys: &[&'k str]) -> Vec<Vec<&'k str>> {
        let mut grouped = vec![Vec::new(); self.nodes.len()];
        for key in keys {
            grouped[self.dispatch_index(key)].push(*key);
        }
        grouped
    }
}

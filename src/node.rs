//! Cache node
//!
//! The cache-aside state machine over one KV endpoint: probe the cache,
//! fall back to the caller's query under a shared single-flight barrier,
//! write the result back: a JSON payload for found rows, a short-lived
//! negative sentinel for missing ones.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::config::CacheOptions;
use crate::error::CacheError;
use crate::jitter::Jitter;
use crate::singleflight::SingleFlight;
use crate::stat::CacheStat;
use crate::store::Store;

/// Payload stored under a key whose row is known to be absent.
const NOT_FOUND_PLACEHOLDER: &str = "*";

/// Fraction by which every TTL is perturbed before it is written, so
/// entries cached in bursts do not expire in bursts.
const EXPIRY_DEVIATION: f64 = 0.05;

/// A value that can round-trip through the cache as JSON.
pub trait Cacheable: Serialize + DeserializeOwned + Send {}
impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Send {}

/// Outcome of a raw cache probe. Misses and transport failures travel as
/// errors.
enum Lookup<T> {
    Value(T),
    /// Negative entry: the database is known not to have this key.
    NegativeHit,
}

/// Cache-aside state machine over a single [`Store`] endpoint.
///
/// Reads go through [`take`](Self::take): served from the cache when
/// possible, otherwise the supplied query runs (once per key across all
/// concurrent callers, via the shared [`SingleFlight`] barrier) and its
/// result is written back. Nodes that share a barrier and key space also
/// share each computation, so the barrier is wired in as a collaborator
/// rather than owned per node.
pub struct CacheNode<S> {
    store: S,
    expiry: Duration,
    not_found_expiry: Duration,
    barrier: Arc<SingleFlight<String>>,
    jitter: Jitter,
    stat: Arc<CacheStat>,
}

impl<S: Store> CacheNode<S> {
    pub fn new(
        store: S,
        barrier: Arc<SingleFlight<String>>,
        stat: Arc<CacheStat>,
        options: CacheOptions,
    ) -> Result<Self, CacheError> {
        options.validate()?;
        Ok(Self {
            store,
            expiry: options.expiry,
            not_found_expiry: options.not_found_expiry,
            barrier,
            jitter: Jitter::new(EXPIRY_DEVIATION),
            stat,
        })
    }

    /// Endpoint identity, for log lines.
    pub fn addr(&self) -> &str {
        self.store.addr()
    }

    /// Read-only cache probe. Misses and negative hits both surface as
    /// [`CacheError::NotFound`].
    pub async fn get_cache<T: Cacheable>(&self, key: &str) -> Result<T, CacheError> {
        match self.do_get_cache(key).await? {
            Lookup::Value(value) => Ok(value),
            Lookup::NegativeHit => Err(CacheError::NotFound),
        }
    }

    pub async fn set_cache<T: Cacheable>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        self.set_cache_with_expire(key, value, self.jitter.around_duration(self.expiry))
            .await
    }

    pub async fn set_cache_with_expire<T: Cacheable>(
        &self,
        key: &str,
        value: &T,
        expire: Duration,
    ) -> Result<(), CacheError> {
        let data = serde_json::to_string(value)?;
        self.store.set(key, &data, expire).await
    }

    /// Best-effort delete: failures are logged, never returned.
    pub async fn del_cache(&self, keys: &[&str]) -> Result<(), CacheError> {
        if let Err(err) = self.invalidate(keys).await {
            error!(node = self.addr(), ?keys, %err, "failed to clear cache keys");
        }
        Ok(())
    }

    /// Strict delete for write paths: the error propagates.
    pub(crate) async fn invalidate(&self, keys: &[&str]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = keys.iter().map(|key| (*key).to_owned()).collect();
        self.store.del(&keys).await
    }

    /// Cache-aside read: serve from the cache if possible, otherwise run
    /// `query`, populate the cache and return.
    pub async fn take<T, Q, QF>(&self, key: &str, query: Q) -> Result<T, CacheError>
    where
        T: Cacheable,
        Q: FnOnce() -> QF,
        QF: Future<Output = Result<T, CacheError>>,
    {
        let expire = self.jitter.around_duration(self.expiry);
        self.do_take(key, move |_| query(), expire).await
    }

    /// Same as [`take`](Self::take), with the chosen TTL handed to `query`
    /// so the caller can derive a related TTL for entries it writes
    /// itself (see indexed lookups).
    pub async fn take_with_expire<T, Q, QF>(&self, key: &str, query: Q) -> Result<T, CacheError>
    where
        T: Cacheable,
        Q: FnOnce(Duration) -> QF,
        QF: Future<Output = Result<T, CacheError>>,
    {
        let expire = self.jitter.around_duration(self.expiry);
        self.do_take(key, query, expire).await
    }

    async fn do_take<T, Q, QF>(
        &self,
        key: &str,
        query: Q,
        expire: Duration,
    ) -> Result<T, CacheError>
    where
        T: Cacheable,
        Q: FnOnce(Duration) -> QF,
        QF: Future<Output = Result<T, CacheError>>,
    {
        let (data, fresh) = self
            .barrier
            .do_call_ex(key, async {
                match self.do_get_cache::<T>(key).await {
                    // Served from the cache; waiters decode the same JSON.
                    Ok(Lookup::Value(value)) => Ok(serde_json::to_string(&value)?),
                    Ok(Lookup::NegativeHit) => Err(CacheError::NotFound),
                    // True miss: load from the database.
                    Err(CacheError::NotFound) => self.load(key, query, expire).await,
                    // Transport failure: surfacing it beats stampeding the
                    // database behind a broken cache.
                    Err(err) => Err(err),
                }
            })
            .await?;

        if !fresh {
            // The waiter never touched the backing store; from its point
            // of view this was a cache hit.
            self.stat.increment_total();
            self.stat.increment_hit();
        }

        Ok(serde_json::from_str(&data)?)
    }

    async fn load<T, Q, QF>(
        &self,
        key: &str,
        query: Q,
        expire: Duration,
    ) -> Result<String, CacheError>
    where
        T: Cacheable,
        Q: FnOnce(Duration) -> QF,
        QF: Future<Output = Result<T, CacheError>>,
    {
        match query(expire).await {
            Ok(value) => {
                let data = serde_json::to_string(&value)?;
                if let Err(err) = self.store.set(key, &data, expire).await {
                    warn!(node = self.addr(), key, %err, "failed to populate cache");
                }
                Ok(data)
            }
            Err(CacheError::NotFound) => {
                if let Err(err) = self.set_not_found(key).await {
                    warn!(node = self.addr(), key, %err, "failed to write negative cache entry");
                }
                Err(CacheError::NotFound)
            }
            Err(err) => {
                self.stat.increment_db_fails();
                Err(err)
            }
        }
    }

    async fn do_get_cache<T: Cacheable>(&self, key: &str) -> Result<Lookup<T>, CacheError> {
        self.stat.increment_total();

        let data = match self.store.get(key).await {
            Ok(data) => data,
            Err(err) => {
                self.stat.increment_miss();
                return Err(err);
            }
        };
        let data = match data {
            Some(data) if !data.is_empty() => data,
            // An empty payload is indistinguishable from a missing key.
            _ => {
                self.stat.increment_miss();
                return Err(CacheError::NotFound);
            }
        };

        self.stat.increment_hit();
        if data == NOT_FOUND_PLACEHOLDER {
            return Ok(Lookup::NegativeHit);
        }

        match serde_json::from_str(&data) {
            Ok(value) => Ok(Lookup::Value(value)),
            Err(err) => {
                warn!(node = self.addr(), key, payload = %data, %err, "dropping undecodable cache entry");
                if let Err(err) = self.store.del(&[key.to_owned()]).await {
                    error!(node = self.addr(), key, %err, "failed to delete undecodable cache entry");
                }
                // Reads it as a miss, so the next take repopulates.
                Err(CacheError::NotFound)
            }
        }
    }

    async fn set_not_found(&self, key: &str) -> Result<(), CacheError> {
        let expire = self.jitter.around_duration(self.not_found_expiry);
        self.store.set(key, NOT_FOUND_PLACEHOLDER, expire).await
    }
}

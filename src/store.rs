//! KV store facade
//!
//! The [`Store`] trait is the seam between the cache node and the
//! transport; [`Redis`] implements it for single-node and cluster
//! deployments, with connection handles uniquified by server address.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;

use crate::config::{NodeConf, RedisKind};
use crate::error::{BatchError, CacheError};
use crate::resource::{Closable, ResourceManager};

/// Per-command deadline.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
/// Deadline for establishing a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Key/value transport the cache node runs against.
///
/// A missing key reads as `Ok(None)`; errors are transport failures only.
/// Implementations must tolerate concurrent calls.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Overwrites `key` with `value` for `ttl`. Sub-second precision is
    /// preserved, so jittered TTLs survive the wire.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Deletes the listed keys. An empty list is a no-op.
    async fn del(&self, keys: &[String]) -> Result<(), CacheError>;

    /// Endpoint identity, for log lines.
    fn addr(&self) -> &str;
}

/// Uniquifies Redis connection handles by server address, one registry per
/// deployment kind.
#[derive(Default)]
pub struct RedisPool {
    clients: ResourceManager<ConnectionManager>,
    clusters: ResourceManager<ClusterConnection>,
}

impl RedisPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes every handle created through this pool.
    pub async fn close(&self) -> Result<(), CacheError> {
        let mut batch = BatchError::new();
        if let Err(err) = self.clients.close().await {
            batch.add(err);
        }
        if let Err(err) = self.clusters.close().await {
            batch.add(err);
        }
        match batch.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// Multiplexed handles shut down once the last clone is dropped; the
// registry only has to forget them.
#[async_trait]
impl Closable for ConnectionManager {
    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[async_trait]
impl Closable for ClusterConnection {
    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// A Redis endpoint in either single-node or cluster mode.
#[derive(Clone)]
pub struct Redis {
    addr: String,
    kind: RedisKind,
    pass: Option<String>,
    pool: Arc<RedisPool>,
}

enum RedisConn {
    Node(ConnectionManager),
    Cluster(ClusterConnection),
}

impl Redis {
    pub fn new(conf: &NodeConf, pool: Arc<RedisPool>) -> Self {
        Self {
            addr: conf.host.clone(),
            kind: conf.kind,
            pass: conf.pass.clone(),
            pool,
        }
    }

    fn url(&self) -> String {
        match &self.pass {
            Some(pass) => format!("redis://:{pass}@{}", self.addr),
            None => format!("redis://{}", self.addr),
        }
    }

    async fn connect(&self) -> Result<RedisConn, CacheError> {
        match self.kind {
            RedisKind::Node => {
                let url = self.url();
                let conn = self
                    .pool
                    .clients
                    .get_resource(&self.addr, || async move {
                        let client = redis::Client::open(url.as_str())?;
                        let config = ConnectionManagerConfig::new()
                            .set_connection_timeout(CONNECT_TIMEOUT)
                            .set_response_timeout(RESPONSE_TIMEOUT);
                        Ok(ConnectionManager::new_with_config(client, config).await?)
                    })
                    .await?;
                Ok(RedisConn::Node(conn))
            }
            RedisKind::Cluster => {
                let url = self.url();
                let pass = self.pass.clone();
                let conn = self
                    .pool
                    .clusters
                    .get_resource(&self.addr, || async move {
                        let mut builder = ClusterClient::builder(vec![url])
                            .connection_timeout(CONNECT_TIMEOUT)
                            .response_timeout(RESPONSE_TIMEOUT);
                        if let Some(pass) = pass {
                            builder = builder.password(pass);
                        }
                        let client = builder.build()?;
                        Ok(client.get_async_connection().await?)
                    })
                    .await?;
                Ok(RedisConn::Cluster(conn))
            }
        }
    }
}

#[async_trait]
impl Store for Redis {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.connect().await? {
            RedisConn::Node(mut conn) => Ok(conn.get::<_, Option<String>>(key).await?),
            RedisConn::Cluster(mut conn) => Ok(conn.get::<_, Option<String>>(key).await?),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let millis = ttl.as_millis().max(1) as u64;
        match self.connect().await? {
            RedisConn::Node(mut conn) => conn.pset_ex::<_, _, ()>(key, value, millis).await?,
            RedisConn::Cluster(mut conn) => conn.pset_ex::<_, _, ()>(key, value, millis).await?,
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        match self.connect().await? {
            RedisConn::Node(mut conn) => conn.del::<_, ()>(keys).await?,
            RedisConn::Cluster(mut conn) => conn.del::<_, ()>(keys).await?,
        }
        Ok(())
    }

    fn addr(&self) -> &str {
        &self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(host: &str, pass: Option<&str>) -> NodeConf {
        NodeConf {
            host: host.to_owned(),
            kind: RedisKind::Node,
            pass: pass.map(str::to_owned),
            weight: 100,
        }
    }

    #[test]
    fn url_without_password() {
        let redis = Redis::new(&conf("127.0.0.1:6379", None), Arc::new(RedisPool::new()));
        assert_eq!(redis.url(), "redis://127.0.0.1:6379");
    }

    #[test]
    fn url_embeds_password() {
        let redis = Redis::new(&conf("127.0.0.1:6379", Some("hunter2")), Arc::new(RedisPool::new()));
        assert_eq!(redis.url(), "redis://:hunter2@127.0.0.1:6379");
    }
}

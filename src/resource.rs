//! Resource manager
//!
//! Address-keyed registry for long-lived, closable handles (connection
//! managers, pools). Creation is uniquified: however many callers race on
//! the same key, the factory runs once.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{BatchError, CacheError};
use crate::singleflight::SingleFlight;

/// A handle the [`ResourceManager`] knows how to shut down.
#[async_trait]
pub trait Closable {
    async fn close(&self) -> Result<(), CacheError>;
}

/// Uniquifies resources by key.
///
/// `get_resource` returns the stored handle for a key, creating it through
/// the supplied factory at most once for the lifetime of the manager. A
/// failed factory stores nothing, so the next caller retries.
pub struct ResourceManager<R> {
    resources: RwLock<HashMap<String, R>>,
    shared_calls: SingleFlight<R>,
}

impl<R: Clone> ResourceManager<R> {
    pub fn new() -> Self {
        Self {
            resources: RwLock::new(HashMap::new()),
            shared_calls: SingleFlight::new(),
        }
    }

    pub async fn get_resource<F, Fut>(&self, key: &str, create: F) -> Result<R, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, CacheError>>,
    {
        self.shared_calls
            .do_call(key, async {
                if let Some(existing) = self.resources.read().await.get(key) {
                    return Ok(existing.clone());
                }

                let resource = create().await?;
                self.resources
                    .write()
                    .await
                    .insert(key.to_owned(), resource.clone());
                Ok(resource)
            })
            .await
    }
}

impl<R: Clone + Closable> ResourceManager<R> {
    /// Closes every stored resource exactly once, combining failures into
    /// a single error.
    pub async fn close(&self) -> Result<(), CacheError> {
        let mut resources = self.resources.write().await;

        let mut batch = BatchError::new();
        for resource in resources.values() {
            if let Err(err) = resource.close().await {
                batch.add(err);
            }
        }
        resources.clear();

        match batch.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<R: Clone> Default for ResourceManager<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone)]
    struct Handle {
        closes: Arc<AtomicUsize>,
        fail_close: bool,
    }

    #[async_trait]
    impl Closable for Handle {
        async fn close(&self) -> Result<(), CacheError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(CacheError::Redis("close failed".to_owned()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_create_once() {
        let manager = Arc::new(ResourceManager::<String>::new());
        let creations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let manager = Arc::clone(&manager);
            let creations = Arc::clone(&creations);
            handles.push(tokio::spawn(async move {
                manager
                    .get_resource("redis://127.0.0.1:6379", || async {
                        creations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("handle".to_owned())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "handle");
        }
        assert_eq!(creations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_resources() {
        let manager = ResourceManager::<String>::new();

        let a = manager
            .get_resource("a", || async { Ok("resource-a".to_owned()) })
            .await
            .unwrap();
        let b = manager
            .get_resource("b", || async { Ok("resource-b".to_owned()) })
            .await
            .unwrap();

        assert_eq!(a, "resource-a");
        assert_eq!(b, "resource-b");
    }

    #[tokio::test]
    async fn failed_creation_stores_nothing() {
        let manager = ResourceManager::<String>::new();

        let err = manager
            .get_resource("k", || async { Err(CacheError::Redis("refused".to_owned())) })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Redis(_)));

        // The next caller gets a fresh attempt.
        let value = manager
            .get_resource("k", || async { Ok("second try".to_owned()) })
            .await
            .unwrap();
        assert_eq!(value, "second try");
    }

    #[tokio::test]
    async fn close_closes_each_resource_once_and_aggregates_errors() {
        let manager = ResourceManager::<Handle>::new();
        let closes = Arc::new(AtomicUsize::new(0));

        for (key, fail_close) in [("a", true), ("b", true), ("c", false)] {
            let closes = Arc::clone(&closes);
            manager
                .get_resource(key, || async move {
                    Ok(Handle {
                        closes,
                        fail_close,
                    })
                })
                .await
                .unwrap();
        }

        let err = manager.close().await.unwrap_err();
        assert!(matches!(err, CacheError::Aggregate(_)));
        assert_eq!(closes.load(Ordering::SeqCst), 3);

        // Everything was drained; a second close has nothing left to do.
        manager.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 3);
    }
}

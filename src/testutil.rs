//! In-memory [`Store`] used by tests: honors TTLs, records them for
//! assertions, and injects transport failures on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::CacheError;
use crate::store::Store;

#[derive(Clone)]
pub(crate) struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    addr: String,
    entries: Mutex<HashMap<String, Entry>>,
    fail_gets: AtomicBool,
    fail_sets: AtomicBool,
    fail_dels: AtomicBool,
}

struct Entry {
    value: String,
    ttl: Duration,
    written_at: Instant,
}

impl Entry {
    fn live(&self) -> bool {
        self.written_at.elapsed() <= self.ttl
    }
}

impl MemoryStore {
    pub(crate) fn new(addr: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                addr: addr.to_owned(),
                entries: Mutex::new(HashMap::new()),
                fail_gets: AtomicBool::new(false),
                fail_sets: AtomicBool::new(false),
                fail_dels: AtomicBool::new(false),
            }),
        }
    }

    /// Stores a raw payload, bypassing the cache layer's encoding.
    pub(crate) fn raw_set(&self, key: &str, value: &str, ttl: Duration) {
        self.inner.entries.lock().unwrap().insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                ttl,
                written_at: Instant::now(),
            },
        );
    }

    pub(crate) fn raw_get(&self, key: &str) -> Option<String> {
        let entries = self.inner.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone())
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.raw_get(key).is_some()
    }

    /// The TTL the entry was written with (not the remaining lifetime).
    pub(crate) fn ttl_of(&self, key: &str) -> Option<Duration> {
        let entries = self.inner.entries.lock().unwrap();
        entries.get(key).map(|entry| entry.ttl)
    }

    pub(crate) fn fail_gets(&self, fail: bool) {
        self.inner.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_sets(&self, fail: bool) {
        self.inner.fail_sets.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_dels(&self, fail: bool) {
        self.inner.fail_dels.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if self.inner.fail_gets.load(Ordering::SeqCst) {
            return Err(CacheError::Redis("injected get failure".to_owned()));
        }
        Ok(self.raw_get(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        if self.inner.fail_sets.load(Ordering::SeqCst) {
            return Err(CacheError::Redis("injected set failure".to_owned()));
        }
        self.raw_set(key, value, ttl);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        if self.inner.fail_dels.load(Ordering::SeqCst) {
            return Err(CacheError::Redis("injected del failure".to_owned()));
        }
        let mut entries = self.inner.entries.lock().unwrap();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    fn addr(&self) -> &str {
        &self.inner.addr
    }
}

//! Request coalescing
//!
//! At most one in-flight execution per key: the first caller runs the
//! supplied future, everyone arriving before it completes waits on the
//! same outcome.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::CacheError;

/// `None` while the call is in flight, `Some` once it settled.
type Outcome<T> = Option<Result<T, CacheError>>;

type FlightMap<T> = Arc<Mutex<HashMap<String, watch::Receiver<Outcome<T>>>>>;

enum Entry<T> {
    /// Another caller is already executing; wait on its channel.
    Waiter(watch::Receiver<Outcome<T>>),
    /// This caller registered the flight and must execute.
    Leader(watch::Sender<Outcome<T>>),
}

/// Collapses concurrent calls for the same key into a single execution.
///
/// One instance is meant to be shared by every cache node in a process so
/// duplicate suppression spans logically equivalent nodes. With
/// `T = String` (a JSON payload) the shared value is agnostic to the
/// caller's concrete type, which is what makes cross-node sharing work.
pub struct SingleFlight<T> {
    flights: FlightMap<T>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs `fut` unless a call for `key` is already in flight, in which
    /// case that call's outcome is returned once it settles.
    pub async fn do_call<F>(&self, key: &str, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        self.do_call_ex(key, fut).await.map(|(value, _)| value)
    }

    /// Like [`do_call`](Self::do_call), additionally reporting whether this
    /// caller executed `fut` (`true`) or was a coalesced waiter (`false`).
    pub async fn do_call_ex<F>(&self, key: &str, fut: F) -> Result<(T, bool), CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        let entry = {
            let mut flights = self.flights.lock().unwrap_or_else(|e| e.into_inner());
            match flights.get(key) {
                Some(rx) => Entry::Waiter(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    flights.insert(key.to_owned(), rx);
                    Entry::Leader(tx)
                }
            }
        };

        let tx = match entry {
            Entry::Waiter(rx) => {
                let value = Self::wait(rx).await?;
                return Ok((value, false));
            }
            Entry::Leader(tx) => tx,
        };

        let guard = FlightGuard {
            key: key.to_owned(),
            flights: Arc::clone(&self.flights),
            tx: Some(tx),
        };

        let result = fut.await;
        guard.complete(result.clone());
        result.map(|value| (value, true))
    }

    async fn wait(mut rx: watch::Receiver<Outcome<T>>) -> Result<T, CacheError> {
        loop {
            let settled = rx.borrow().clone();
            if let Some(outcome) = settled {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(CacheError::Interrupted);
            }
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Settles a flight exactly once: the record leaves the map strictly
/// before the channel is signaled, so a caller arriving after the signal
/// always starts a fresh computation. `Drop` covers a panicked or
/// cancelled executor, waking waiters with [`CacheError::Interrupted`].
struct FlightGuard<T> {
    key: String,
    flights: FlightMap<T>,
    tx: Option<watch::Sender<Outcome<T>>>,
}

impl<T> FlightGuard<T> {
    fn complete(mut self, outcome: Result<T, CacheError>) {
        self.settle(outcome);
    }

    fn settle(&mut self, outcome: Result<T, CacheError>) {
        if let Some(tx) = self.tx.take() {
            self.flights
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.key);
            let _ = tx.send(Some(outcome));
        }
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        self.settle(Err(CacheError::Interrupted));
    }
}

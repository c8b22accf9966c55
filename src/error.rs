//! Cache error types

use std::sync::Arc;

/// Errors surfaced by cache and cached-SQL operations.
///
/// The enum is `Clone` so one outcome can be handed to every caller
/// coalesced onto the same in-flight computation; transport errors are
/// carried as rendered strings for the same reason.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// No such row in the database / no such key in the cache.
    #[error("not found")]
    NotFound,

    /// KV store transport failure.
    #[error("redis error: {0}")]
    Redis(String),

    /// A cache payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Database failure other than a missing row.
    #[error("database error: {0}")]
    Db(Arc<sqlx::Error>),

    /// Transaction body failed and could not be cleanly rolled back.
    #[error("transaction failed: {0}")]
    Tx(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The caller executing a shared call vanished before completing it.
    #[error("shared call interrupted")]
    Interrupted,

    /// Several failures folded into one; see [`BatchError`].
    #[error("{0}")]
    Aggregate(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Redis(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CacheError::NotFound,
            other => CacheError::Db(Arc::new(other)),
        }
    }
}

/// Accumulates errors and folds them into one.
///
/// Messages keep insertion order, separated by line breaks. A single
/// accumulated error is returned unchanged so its identity survives.
#[derive(Debug, Default)]
pub struct BatchError {
    errs: Vec<CacheError>,
}

impl BatchError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, err: CacheError) {
        self.errs.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errs.is_empty()
    }

    /// The combined error, or `None` when nothing was added.
    pub fn err(self) -> Option<CacheError> {
        let mut errs = self.errs;
        match errs.len() {
            0 => None,
            1 => errs.pop(),
            _ => {
                let joined = errs
                    .iter()
                    .map(|err| err.to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(CacheError::Aggregate(joined))
            }
        }
    }
}

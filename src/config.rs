//! Cache configuration

use std::time::Duration;

use serde::Deserialize;

use crate::error::CacheError;

const DEFAULT_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_NOT_FOUND_EXPIRY: Duration = Duration::from_secs(60);

/// Deployment flavor of a Redis endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedisKind {
    #[default]
    Node,
    Cluster,
}

/// One cache endpoint: address, deployment kind, optional password and
/// routing weight.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConf {
    pub host: String,
    #[serde(rename = "type", default)]
    pub kind: RedisKind,
    #[serde(default)]
    pub pass: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    100
}

/// A cache deployment is a list of weighted endpoints.
pub type ClusterConf = Vec<NodeConf>;

/// TTL options for a cache node.
///
/// `expiry` covers positive entries and should be generous; a week works
/// for most read-heavy rows. `not_found_expiry` covers negative entries
/// and should stay short so a row created after a miss becomes visible
/// quickly.
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    /// Time-to-live for positive entries.
    pub expiry: Duration,
    /// Time-to-live for negative ("known absent") entries.
    pub not_found_expiry: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            expiry: DEFAULT_EXPIRY,
            not_found_expiry: DEFAULT_NOT_FOUND_EXPIRY,
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_not_found_expiry(mut self, expiry: Duration) -> Self {
        self.not_found_expiry = expiry;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), CacheError> {
        if self.expiry.is_zero() {
            return Err(CacheError::Config("expiry must be positive".to_owned()));
        }
        if self.not_found_expiry.is_zero() {
            return Err(CacheError::Config(
                "not_found_expiry must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_conf_fills_in_defaults() {
        let conf: NodeConf = serde_json::from_str(r#"{"host": "127.0.0.1:6379"}"#).unwrap();
        assert_eq!(conf.host, "127.0.0.1:6379");
        assert_eq!(conf.kind, RedisKind::Node);
        assert_eq!(conf.pass, None);
        assert_eq!(conf.weight, 100);
    }

    #[test]
    fn node_conf_parses_cluster_kind() {
        let conf: NodeConf = serde_json::from_str(
            r#"{"host": "10.0.0.1:7000", "type": "cluster", "pass": "secret", "weight": 40}"#,
        )
        .unwrap();
        assert_eq!(conf.kind, RedisKind::Cluster);
        assert_eq!(conf.pass.as_deref(), Some("secret"));
        assert_eq!(conf.weight, 40);
    }

    #[test]
    fn zero_ttls_are_rejected() {
        let options = CacheOptions::new().with_expiry(Duration::ZERO);
        assert!(matches!(options.validate(), Err(CacheError::Config(_))));

        let options = CacheOptions::new().with_not_found_expiry(Duration::ZERO);
        assert!(matches!(options.validate(), Err(CacheError::Config(_))));
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Store configuration and the storage port it is loaded through.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::ident::DEFAULT_LID_PREFIX;

/// Key under which [`StoreConfig`] is persisted.
pub const STORE_CONFIG_KEY: &str = "store";

/// Tunables for a [`Store`](crate::Store) and its fetch manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Global switch for batching record fetches through `find_many`.
    pub coalesce_find_requests: bool,
    /// Groups larger than this are split before `find_many`.
    pub max_batch_size: Option<usize>,
    /// Prefix of generated local ids.
    pub lid_prefix: String,
    /// Warn when a payload carries a relationship the schema does not declare.
    pub warn_on_undeclared_relationships: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            coalesce_find_requests: true,
            max_batch_size: None,
            lid_prefix: DEFAULT_LID_PREFIX.to_owned(),
            warn_on_undeclared_relationships: true,
        }
    }
}

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Serializes config values as JSON and delegates storage to a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize `key`. Returns `Ok(None)` if missing or empty.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist `value` under `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Loads the [`StoreConfig`], falling back to defaults when none is stored.
    pub fn load_store_config(&self) -> Result<StoreConfig, ConfigError> {
        Ok(self.load(STORE_CONFIG_KEY)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: StoreConfig = serde_json::from_str(r#"{"max_batch_size": 2}"#).unwrap();
        assert_eq!(cfg.max_batch_size, Some(2));
        assert!(cfg.coalesce_find_requests);
        assert_eq!(cfg.lid_prefix, "@lid");
    }
}

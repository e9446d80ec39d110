// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory [`ConfigStore`] for tests that must not touch the filesystem.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tether_core::{ConfigError, ConfigStore, StoreConfig, STORE_CONFIG_KEY};

/// Config store backed by a shared map. Clones share state, so a test can
/// hand one clone to a [`ConfigService`](tether_core::ConfigService) and
/// inspect the other.
///
/// ```
/// use tether_core::{ConfigService, StoreConfig};
/// use tether_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// assert_eq!(service.load_store_config().unwrap(), StoreConfig::default());
/// assert_eq!(store.load_count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: BTreeMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_loads: bool,
    fail_saves: bool,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a serialized [`StoreConfig`] under
    /// [`STORE_CONFIG_KEY`].
    pub fn with_store_config(config: &StoreConfig) -> Self {
        let store = Self::new();
        if let Ok(bytes) = serde_json::to_vec(config) {
            store.insert_raw(STORE_CONFIG_KEY, bytes);
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes a raw blob without counting it as a save.
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>) {
        self.lock().blobs.insert(key.to_owned(), bytes);
    }

    /// Raw blob stored under `key`.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().blobs.get(key).cloned()
    }

    /// Makes every subsequent load fail with [`ConfigError::Other`].
    pub fn fail_loads(&self, fail: bool) {
        self.lock().fail_loads = fail;
    }

    /// Makes every subsequent save fail with [`ConfigError::Other`].
    pub fn fail_saves(&self, fail: bool) {
        self.lock().fail_saves = fail;
    }

    /// Attempted loads, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Attempted saves, failed ones included.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Stored keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().blobs.keys().cloned().collect()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.load_count += 1;
        if inner.fail_loads {
            return Err(ConfigError::Other(format!("load of '{key}' failed")));
        }
        inner.blobs.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.save_count += 1;
        if inner.fail_saves {
            return Err(ConfigError::Other(format!("save of '{key}' failed")));
        }
        inner.blobs.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use tether_core::ConfigService;

    #[test]
    fn store_config_round_trips_through_service() {
        let store = InMemoryConfigStore::new();
        let service = ConfigService::new(store.clone());
        let config = StoreConfig {
            max_batch_size: Some(3),
            ..StoreConfig::default()
        };
        service.save(STORE_CONFIG_KEY, &config).unwrap();
        assert_eq!(service.load_store_config().unwrap(), config);
        assert_eq!(store.keys(), vec![STORE_CONFIG_KEY.to_owned()]);
        assert_eq!((store.save_count(), store.load_count()), (1, 1));
    }

    #[test]
    fn failures_surface_and_still_count() {
        let store = InMemoryConfigStore::with_store_config(&StoreConfig::default());
        store.fail_loads(true);
        let service = ConfigService::new(store.clone());
        assert!(matches!(
            service.load_store_config(),
            Err(ConfigError::Other(_))
        ));
        assert_eq!(store.load_count(), 1);
    }
}

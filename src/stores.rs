//! Store target configuration
//!
//! Each store has a JSON file mapping product SKUs to the devices that
//! highlight them, per provider:
//!
//! ```json
//! { "targets": { "SKU-1": { "providers": { "tuya": { "device_id": "abc" } } } } }
//! ```
//!
//! Files are read lazily and cached for the lifetime of the catalog.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Parsed store configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Target entries keyed by SKU
    #[serde(default)]
    pub targets: BTreeMap<String, TargetEntry>,
}

/// Devices associated with one SKU
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetEntry {
    /// Provider-specific device mapping keyed by provider name
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderTarget>,
}

/// Device mapping for one provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// A SKU resolved to a device for a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub sku: String,
    pub device_id: String,
    pub provider: String,
}

impl StoreConfig {
    /// Device for a SKU under the given provider
    #[must_use]
    pub fn resolve(&self, sku: &str, provider: &str) -> Option<ResolvedTarget> {
        let device_id = self
            .targets
            .get(sku)?
            .providers
            .get(provider)?
            .device_id
            .as_deref()
            .filter(|id| !id.is_empty())?;

        Some(ResolvedTarget {
            sku: sku.to_string(),
            device_id: device_id.to_string(),
            provider: provider.to_string(),
        })
    }

    /// Every SKU with a device mapped for the provider; each device listed once
    #[must_use]
    pub fn devices(&self, provider: &str) -> Vec<ResolvedTarget> {
        let mut seen = std::collections::HashSet::new();
        self.targets
            .keys()
            .filter_map(|sku| self.resolve(sku, provider))
            .filter(|target| seen.insert(target.device_id.clone()))
            .collect()
    }

    /// All configured SKUs, sorted
    #[must_use]
    pub fn skus(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }
}

#[derive(Debug)]
enum Source {
    Directory(PathBuf),
    Memory,
}

/// Read-only lookup of store configurations
#[derive(Debug)]
pub struct StoreCatalog {
    source: Source,
    cache: RwLock<HashMap<String, Arc<StoreConfig>>>,
}

impl StoreCatalog {
    /// Catalog backed by `<dir>/<store_id>.json` files
    #[must_use]
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::Directory(dir.into()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Catalog with a fixed set of stores
    #[must_use]
    pub fn in_memory(stores: impl IntoIterator<Item = (String, StoreConfig)>) -> Self {
        let cache = stores
            .into_iter()
            .map(|(id, config)| (id, Arc::new(config)))
            .collect();
        Self {
            source: Source::Memory,
            cache: RwLock::new(cache),
        }
    }

    /// Configuration for a store
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownStore` if the store has no readable configuration
    pub fn store(&self, store_id: &str) -> Result<Arc<StoreConfig>> {
        if let Some(config) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(store_id)
        {
            return Ok(config.clone());
        }

        let unknown = |reason: String| Error::UnknownStore {
            store_id: store_id.to_string(),
            reason,
        };

        let dir = match &self.source {
            Source::Directory(dir) => dir,
            Source::Memory => return Err(unknown("no such store".to_string())),
        };

        if store_id.is_empty()
            || store_id.contains(['/', '\\'])
            || store_id.contains("..")
        {
            return Err(unknown("invalid store id".to_string()));
        }

        let path = dir.join(format!("{store_id}.json"));
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| unknown(format!("{}: {e}", path.display())))?;
        let config: StoreConfig = serde_json::from_str(&raw)
            .map_err(|e| unknown(format!("{}: {e}", path.display())))?;

        tracing::info!(store_id, targets = config.targets.len(), "loaded store config");

        let config = Arc::new(config);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(store_id.to_string(), config.clone());
        Ok(config)
    }

    /// Resolve a SKU in a store to a device for the provider
    ///
    /// `Ok(None)` means the store exists but has no mapping for the SKU.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownStore` if the store has no readable configuration
    pub fn resolve(
        &self,
        store_id: &str,
        sku: &str,
        provider: &str,
    ) -> Result<Option<ResolvedTarget>> {
        Ok(self.store(store_id)?.resolve(sku, provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoreConfig {
        serde_json::from_str(
            r#"{
                "targets": {
                    "X1": { "providers": { "tuya": { "device_id": "d1" } } },
                    "X2": { "providers": { "hue": { "device_id": "h2" } } },
                    "X3": { "providers": { "tuya": { "device_id": "d1" } } },
                    "X4": { "providers": { "tuya": {} } }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn resolve_by_provider() {
        let config = sample();
        assert_eq!(config.resolve("X1", "tuya").unwrap().device_id, "d1");
        assert!(config.resolve("X2", "tuya").is_none());
        assert!(config.resolve("X4", "tuya").is_none());
        assert!(config.resolve("missing", "tuya").is_none());
    }

    #[test]
    fn devices_are_deduplicated() {
        let devices = sample().devices("tuya");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].sku, "X1");
    }

    #[test]
    fn unknown_store_is_distinct_from_unknown_sku() {
        let catalog = StoreCatalog::in_memory([("s1".to_string(), sample())]);
        assert!(catalog.resolve("s1", "nope", "tuya").unwrap().is_none());
        assert!(matches!(
            catalog.resolve("s2", "X1", "tuya"),
            Err(Error::UnknownStore { .. })
        ));
    }

    #[test]
    fn loads_and_caches_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("s1.json"),
            r#"{"targets": {"X1": {"providers": {"tuya": {"device_id": "d1"}}}}}"#,
        )
        .unwrap();

        let catalog = StoreCatalog::from_dir(dir.path());
        assert_eq!(catalog.store("s1").unwrap().skus(), vec!["X1".to_string()]);

        // Served from cache once loaded
        std::fs::remove_file(dir.path().join("s1.json")).unwrap();
        assert!(catalog.store("s1").is_ok());
    }

    #[test]
    fn rejects_path_traversal_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let catalog = StoreCatalog::from_dir(dir.path());
        assert!(catalog.store("../etc/passwd").is_err());
        assert!(catalog.store("broken").is_err());
        assert!(catalog.store("absent").is_err());
    }
}

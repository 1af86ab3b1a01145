use super::error::EngineError;
use crate::core::forcefield::ForceFieldSource;
use crate::core::models::property::{Component, PhysicalProperty, Quantity, ThermodynamicState};
use crate::core::models::result::OutcomeRecord;
use crate::core::options::RequestOptions;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

const OUTCOME_DIRECTORY: &str = "outcomes";

#[derive(Serialize)]
struct CacheKeyMaterial<'a> {
    property_type: &'a str,
    substance: &'a [Component],
    thermodynamic_state: Option<&'a ThermodynamicState>,
    uncertainty: Option<&'a Quantity>,
    force_field: String,
    options: &'a serde_json::Value,
}

/// Content address of an estimate: identical properties estimated with the
/// same force field and options share a key regardless of their identifiers.
pub fn cache_key(
    property: &PhysicalProperty,
    force_field: &ForceFieldSource,
    options: &RequestOptions,
) -> Result<String, EngineError> {
    let material = CacheKeyMaterial {
        property_type: &property.property_type,
        substance: &property.substance,
        thermodynamic_state: property.thermodynamic_state.as_ref(),
        uncertainty: property.uncertainty.as_ref(),
        force_field: force_field.fingerprint(),
        options: options.as_value(),
    };
    let bytes =
        serde_json::to_vec(&material).map_err(|e| EngineError::serialization("cache key", e))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Stores estimation outcomes as JSON files under a root directory, optionally
/// mirroring them in memory.
#[derive(Debug)]
pub struct LocalFileStorage {
    root: PathBuf,
    cache_objects_in_memory: bool,
    memory: Mutex<HashMap<String, OutcomeRecord>>,
}

impl LocalFileStorage {
    pub fn new(root: &Path, cache_objects_in_memory: bool) -> Result<Self, EngineError> {
        let outcomes = root.join(OUTCOME_DIRECTORY);
        std::fs::create_dir_all(&outcomes).map_err(|e| EngineError::io(&outcomes, e))?;
        Ok(Self {
            root: root.to_path_buf(),
            cache_objects_in_memory,
            memory: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(OUTCOME_DIRECTORY).join(format!("{}.json", key))
    }

    fn memory(&self) -> std::sync::MutexGuard<'_, HashMap<String, OutcomeRecord>> {
        self.memory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn store(&self, key: &str, record: &OutcomeRecord) -> Result<(), EngineError> {
        let path = self.path_for(key);
        let content = serde_json::to_vec(record)
            .map_err(|e| EngineError::serialization("stored outcome", e))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| EngineError::io(&path, e))?;
        if self.cache_objects_in_memory {
            self.memory().insert(key.to_string(), record.clone());
        }
        debug!(key = %key, "Stored outcome.");
        Ok(())
    }

    pub async fn retrieve(&self, key: &str) -> Result<Option<OutcomeRecord>, EngineError> {
        if self.cache_objects_in_memory {
            if let Some(record) = self.memory().get(key) {
                return Ok(Some(record.clone()));
            }
        }

        let path = self.path_for(key);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::io(&path, e)),
        };
        match serde_json::from_slice::<OutcomeRecord>(&content) {
            Ok(record) => {
                if self.cache_objects_in_memory {
                    self.memory().insert(key.to_string(), record.clone());
                }
                Ok(Some(record))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable stored outcome.");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::result::OutcomeStatus;
    use serde_json::json;
    use tempfile::tempdir;

    fn property(id: &str) -> PhysicalProperty {
        PhysicalProperty::new(id, "Density", Quantity::new(0.8, "g / ml"))
    }

    fn force_field() -> ForceFieldSource {
        ForceFieldSource { files: Vec::new() }
    }

    #[test]
    fn cache_key_ignores_identifier_but_not_options() {
        let options = RequestOptions::default();
        let a = cache_key(&property("a"), &force_field(), &options).unwrap();
        let b = cache_key(&property("b"), &force_field(), &options).unwrap();
        assert_eq!(a, b);

        let other_options = RequestOptions::new(json!({ "n_molecules": 256 }));
        let c = cache_key(&property("a"), &force_field(), &other_options).unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn stored_outcome_survives_a_new_storage_instance() {
        let dir = tempdir().unwrap();
        let record = OutcomeRecord {
            status: OutcomeStatus::Estimated,
            property: Some(property("a")),
            message: None,
        };

        LocalFileStorage::new(dir.path(), true)
            .unwrap()
            .store("k1", &record)
            .await
            .unwrap();

        let reopened = LocalFileStorage::new(dir.path(), false).unwrap();
        assert_eq!(reopened.retrieve("k1").await.unwrap(), Some(record));
        assert_eq!(reopened.retrieve("missing").await.unwrap(), None);
    }
}

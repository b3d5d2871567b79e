use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::fs;

use crate::shape::SchemaHandle;

// The shape of one entry in the registry file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: String,
    #[serde(default)]
    pub description: String,

    // A JSON Schema object; the model is asked to answer in this shape.
    pub schema: Value,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read schema registry at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema registry is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("schema id '{0}' is registered twice")]
    Duplicate(String),

    #[error("schema '{0}' must be a JSON object")]
    InvalidSchema(String),
}

/// Schemas callers can reference by id from a `registered` shape descriptor.
///
/// Loaded once at startup and read-only afterwards, so it is shared between
/// requests without locking.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<SchemaHandle>>,
}

impl SchemaRegistry {
    pub fn from_records(records: Vec<SchemaRecord>) -> Result<Self, RegistryError> {
        let mut schemas = HashMap::with_capacity(records.len());
        for record in records {
            if schemas.contains_key(&record.id) {
                return Err(RegistryError::Duplicate(record.id));
            }
            let handle = SchemaHandle::new(record.id.clone(), record.schema)
                .map_err(|_| RegistryError::InvalidSchema(record.id.clone()))?;
            schemas.insert(record.id, Arc::new(handle));
        }
        Ok(Self { schemas })
    }

    // Reads a registry file (a JSON array of records)
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();

        // 1. Read the JSON file
        let content = fs::read_to_string(path).await.map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // 2. Parse it
        let records: Vec<SchemaRecord> = serde_json::from_str(&content)?;

        // 3. Index it
        let registry = Self::from_records(records)?;
        tracing::info!("Loaded {} schemas from {}", registry.len(), path.display());
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SchemaHandle>> {
        self.schemas.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

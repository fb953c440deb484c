pub mod vector_store;

pub use vector_store::{SearchHit, VectorStore};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::catalog::ProductRecord;
use crate::Result;

/// Metadata stored next to each vector: enough to render a recommendation
/// line without a second catalog lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMetadata {
    pub name: String,
    pub url: String,
    pub description: String,
    pub tags: Vec<String>,
    pub price: String,
    pub image: String,
}

impl From<&ProductRecord> for ProductMetadata {
    #[inline]
    fn from(record: &ProductRecord) -> Self {
        Self {
            name: record.name.clone(),
            url: record.url.clone(),
            description: record.description.clone(),
            tags: record.tags.clone(),
            price: record.price.clone(),
            image: record.image.clone(),
        }
    }
}

/// One row bound for the vector table.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ProductMetadata,
}

/// Sidecar written after every successful index build. The retriever
/// compares `embedding_model` against the live configuration so an index
/// built with one model is never queried with another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub embedding_model: String,
    pub dimension: usize,
    pub namespace: String,
    pub record_count: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read index manifest: {}", path.display()))?;
        let manifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse index manifest: {}", path.display()))?;
        Ok(manifest)
    }

    #[inline]
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create manifest directory: {}", parent.display())
            })?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize index manifest")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write index manifest: {}", path.display()))?;
        Ok(())
    }
}

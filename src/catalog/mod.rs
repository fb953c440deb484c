
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

use crate::{GuideError, Result};

/// Hard cap on the text sent to the embedding endpoint per product.
const EMBEDDING_TEXT_MAX_CHARS: usize = 5000;

/// One catalog item as emitted by the extractor. The product URL doubles as
/// the stable identifier, so re-scraping a product overwrites rather than
/// duplicates its index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: String,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub bullets: Vec<String>,
    #[serde(default)]
    pub how_to_use: String,
    #[serde(default)]
    pub ingredients: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ProductRecord {
    /// Text used for embedding, concatenated in a fixed field order so that
    /// re-runs over an unchanged catalog embed identical input.
    #[inline]
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![self.name.trim().to_string()];
        if !self.description.trim().is_empty() {
            parts.push(self.description.trim().to_string());
        }
        if !self.bullets.is_empty() {
            parts.push(self.bullets.join(" "));
        }
        if !self.how_to_use.trim().is_empty() {
            parts.push(self.how_to_use.trim().to_string());
        }
        if !self.tags.is_empty() {
            parts.push(self.tags.join(" "));
        }

        let text = parts.join("\n");
        match text.char_indices().nth(EMBEDDING_TEXT_MAX_CHARS) {
            Some((byte_idx, _)) => text[..byte_idx].to_string(),
            None => text,
        }
    }

    /// Structural validity of a single record: non-empty name, and an
    /// absolute http(s) product URL matching the id.
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(GuideError::Catalog("record has an empty id".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(GuideError::Catalog(format!(
                "record {} has an empty name",
                self.id
            )));
        }
        let url = Url::parse(&self.url)
            .map_err(|_| GuideError::Catalog(format!("record {} has invalid url", self.id)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(GuideError::Catalog(format!(
                "record {} has non-http url {}",
                self.id, self.url
            )));
        }
        Ok(())
    }
}

/// Load a catalog snapshot written by the crawler.
#[inline]
pub fn load_snapshot(path: &Path) -> Result<Vec<ProductRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog snapshot: {}", path.display()))?;

    let records: Vec<ProductRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse catalog snapshot: {}", path.display()))?;

    if records.is_empty() {
        return Err(GuideError::Catalog(format!(
            "catalog snapshot {} contains no products",
            path.display()
        )));
    }

    debug!("Loaded {} products from {}", records.len(), path.display());
    Ok(records)
}

/// Write a catalog snapshot, replacing any previous one atomically enough
/// for a single-writer batch job (write to a temp name, then rename).
#[inline]
pub fn write_snapshot(path: &Path, records: &[ProductRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create snapshot directory: {}", parent.display()))?;
    }

    let content =
        serde_json::to_string_pretty(records).context("Failed to serialize catalog snapshot")?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .with_context(|| format!("Failed to write snapshot: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move snapshot into place: {}", path.display()))?;

    info!("Wrote {} products to {}", records.len(), path.display());
    Ok(())
}

/// Split a snapshot into indexable records and rejects. Duplicate ids are a
/// snapshot defect: the first occurrence wins, later ones are rejected.
#[inline]
pub fn partition_valid(records: Vec<ProductRecord>) -> (Vec<ProductRecord>, Vec<(String, String)>) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut valid = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for record in records {
        if let Err(err) = record.validate() {
            rejected.push((record.id.clone(), err.to_string()));
            continue;
        }
        if !seen.insert(record.id.clone()) {
            rejected.push((record.id.clone(), "duplicate id".to_string()));
            continue;
        }
        valid.push(record);
    }

    (valid, rejected)
}

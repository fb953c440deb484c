#[cfg(test)]
mod tests;

use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{EmbeddingRecord, ProductMetadata};
use crate::{GuideError, Result};

/// Vector index over the product catalog, one LanceDB table per namespace
/// so staging and production data never cross-contaminate.
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    dimension: usize,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("table_name", &self.table_name)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

/// One nearest-neighbour match. `score` is cosine similarity, higher is
/// better.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub metadata: ProductMetadata,
}

impl VectorStore {
    /// Open (or create) the namespace table under `db_path`.
    ///
    /// The configured dimension is part of the table contract: opening an
    /// existing table whose vector column has a different width is a fatal
    /// configuration error, never a silent re-create.
    #[inline]
    pub async fn open(db_path: &Path, namespace: &str, dimension: usize) -> Result<Self> {
        debug!("Opening vector store at {:?}, namespace {}", db_path, namespace);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GuideError::Database(format!("failed to create vector database directory: {e}"))
            })?;
        }

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| GuideError::Database(format!("failed to connect to LanceDB: {e}")))?;

        let store = Self {
            connection,
            table_name: namespace.to_string(),
            dimension,
        };

        store.initialize_table().await?;

        info!(
            "Vector store ready: namespace {}, dimension {}",
            store.table_name, store.dimension
        );
        Ok(store)
    }

    async fn initialize_table(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| GuideError::Database(format!("failed to list tables: {e}")))?;

        if table_names.contains(&self.table_name) {
            let existing = self.existing_vector_dimension().await?;
            if existing != self.dimension {
                return Err(GuideError::Config(format!(
                    "vector table '{}' was built with dimension {} but the configuration says {}; \
                     reindex with the configured model instead of mixing dimensions",
                    self.table_name, existing, self.dimension
                )));
            }
            return Ok(());
        }

        debug!(
            "Creating vector table '{}' with dimension {}",
            self.table_name, self.dimension
        );
        self.connection
            .create_empty_table(&self.table_name, self.schema())
            .execute()
            .await
            .map_err(|e| GuideError::Database(format!("failed to create table: {e}")))?;

        Ok(())
    }

    async fn existing_vector_dimension(&self) -> Result<usize> {
        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| GuideError::Database(format!("failed to open table: {e}")))?;

        let schema = table
            .schema()
            .await
            .map_err(|e| GuideError::Database(format!("failed to read table schema: {e}")))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(GuideError::Database(format!(
            "table '{}' has no vector column",
            self.table_name
        )))
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.dimension as i32,
                ),
                false,
            ),
            Field::new("name", DataType::Utf8, false),
            Field::new("url", DataType::Utf8, false),
            Field::new("description", DataType::Utf8, false),
            Field::new("tags", DataType::Utf8, false),
            Field::new("price", DataType::Utf8, false),
            Field::new("image", DataType::Utf8, false),
        ]))
    }

    /// Idempotent upsert: rows whose ids appear in `records` are replaced,
    /// everything else is left untouched.
    #[inline]
    pub async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<()> {
        if records.is_empty() {
            debug!("No embeddings to upsert");
            return Ok(());
        }

        for record in records {
            if record.vector.len() != self.dimension {
                return Err(GuideError::Config(format!(
                    "embedding for {} has {} dimensions, table '{}' requires {}",
                    record.id,
                    record.vector.len(),
                    self.table_name,
                    self.dimension
                )));
            }
        }

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| GuideError::Database(format!("failed to open table: {e}")))?;

        let id_list = records
            .iter()
            .map(|r| format!("'{}'", sql_escape(&r.id)))
            .collect::<Vec<_>>()
            .join(", ");
        table
            .delete(&format!("id IN ({id_list})"))
            .await
            .map_err(|e| GuideError::Database(format!("failed to delete stale rows: {e}")))?;

        let batch = self.record_batch(records)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| GuideError::Database(format!("failed to insert embeddings: {e}")))?;

        info!("Upserted {} embeddings into '{}'", records.len(), self.table_name);
        Ok(())
    }

    fn record_batch(&self, records: &[EmbeddingRecord]) -> Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut names = Vec::with_capacity(len);
        let mut urls = Vec::with_capacity(len);
        let mut descriptions = Vec::with_capacity(len);
        let mut tags = Vec::with_capacity(len);
        let mut prices = Vec::with_capacity(len);
        let mut images = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.dimension);

        for record in records {
            ids.push(record.id.as_str());
            names.push(record.metadata.name.as_str());
            urls.push(record.metadata.url.as_str());
            descriptions.push(record.metadata.description.as_str());
            tags.push(record.metadata.tags.join(","));
            prices.push(record.metadata.price.as_str());
            images.push(record.metadata.image.as_str());
            flat_values.extend_from_slice(&record.vector);
        }

        let values_array = Float32Array::from(flat_values);
        let item_field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            item_field,
            self.dimension as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| GuideError::Database(format!("failed to build vector array: {e}")))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(names)),
            Arc::new(StringArray::from(urls)),
            Arc::new(StringArray::from(descriptions)),
            Arc::new(StringArray::from(tags)),
            Arc::new(StringArray::from(prices)),
            Arc::new(StringArray::from(images)),
        ];

        RecordBatch::try_new(self.schema(), arrays)
            .map_err(|e| GuideError::Database(format!("failed to build record batch: {e}")))
    }

    /// Cosine nearest-neighbour search, optionally narrowed to rows tagged
    /// with `tag_filter`.
    #[inline]
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        tag_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        if query_vector.len() != self.dimension {
            return Err(GuideError::Config(format!(
                "query vector has {} dimensions, table '{}' requires {}",
                query_vector.len(),
                self.table_name,
                self.dimension
            )));
        }

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| GuideError::Database(format!("failed to open table: {e}")))?;

        let mut query = table
            .vector_search(query_vector)
            .map_err(|e| GuideError::Database(format!("failed to build vector search: {e}")))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit);

        if let Some(tag) = tag_filter {
            query = query.only_if(format!("tags LIKE '%{}%'", sql_escape(tag)));
        }

        let mut stream = query
            .execute()
            .await
            .map_err(|e| GuideError::Database(format!("failed to execute search: {e}")))?;

        let mut hits = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| GuideError::Database(format!("failed to read result stream: {e}")))?
        {
            hits.extend(self.parse_search_batch(&batch)?);
        }

        debug!("Search over '{}' returned {} hits", self.table_name, hits.len());
        Ok(hits)
    }

    fn parse_search_batch(&self, batch: &RecordBatch) -> Result<Vec<SearchHit>> {
        let ids = string_column(batch, "id")?;
        let names = string_column(batch, "name")?;
        let urls = string_column(batch, "url")?;
        let descriptions = string_column(batch, "description")?;
        let tags = string_column(batch, "tags")?;
        let prices = string_column(batch, "price")?;
        let images = string_column(batch, "image")?;

        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut hits = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            hits.push(SearchHit {
                id: ids.value(row).to_string(),
                // Cosine distance in [0, 2]; similarity mirrors it so that
                // higher means closer.
                score: 1.0 - distance,
                metadata: ProductMetadata {
                    name: names.value(row).to_string(),
                    url: urls.value(row).to_string(),
                    description: descriptions.value(row).to_string(),
                    tags: split_tags(tags.value(row)),
                    price: prices.value(row).to_string(),
                    image: images.value(row).to_string(),
                },
            });
        }

        Ok(hits)
    }

    /// Number of rows currently stored in the namespace.
    #[inline]
    pub async fn count(&self) -> Result<u64> {
        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| GuideError::Database(format!("failed to open table: {e}")))?;

        let count = table
            .count_rows(None)
            .await
            .map_err(|e| GuideError::Database(format!("failed to count rows: {e}")))?;

        Ok(count as u64)
    }

    /// Drop and recreate the namespace table (full reindex).
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| GuideError::Database(format!("failed to list tables: {e}")))?;

        if table_names.contains(&self.table_name) {
            info!("Dropping vector table '{}'", self.table_name);
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| GuideError::Database(format!("failed to drop table: {e}")))?;
        }

        self.initialize_table().await
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| GuideError::Database(format!("missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| GuideError::Database(format!("invalid {name} column type")))
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn sql_escape(value: &str) -> String {
    value.replace('\'', "''")
}

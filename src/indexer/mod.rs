#[cfg(test)]
mod tests;

use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::catalog::{self, ProductRecord};
use crate::config::Config;
use crate::database::lancedb::{EmbeddingRecord, IndexManifest, ProductMetadata, VectorStore};
use crate::embeddings::EmbeddingClient;
use crate::Result;

/// Offline batch job: embeds catalog records and upserts them into the
/// vector index, then records what the index was built with.
pub struct IndexBuilder {
    embedder: EmbeddingClient,
    store: VectorStore,
    manifest_path: PathBuf,
    namespace: String,
    batch_size: usize,
    show_progress: bool,
}

/// Operator-facing summary of one build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBuildReport {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: Vec<(String, String)>,
}

impl IndexBuildReport {
    #[inline]
    pub fn failed(&self) -> usize {
        self.skipped.len()
    }
}

impl IndexBuilder {
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        let embedder = EmbeddingClient::new(config)?;
        let store = VectorStore::open(
            &config.vector_database_path(),
            &config.index.namespace,
            config.openai.embedding_dimension as usize,
        )
        .await?;

        Ok(Self::from_parts(embedder, store, config))
    }

    /// Assemble a builder from already-constructed collaborators.
    #[inline]
    pub fn from_parts(embedder: EmbeddingClient, store: VectorStore, config: &Config) -> Self {
        Self {
            embedder,
            store,
            manifest_path: config.manifest_path(),
            namespace: config.index.namespace.clone(),
            batch_size: config.openai.batch_size as usize,
            show_progress: false,
        }
    }

    /// Render an indicatif bar while building (CLI runs only).
    #[inline]
    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }

    /// Build the index from a catalog snapshot.
    ///
    /// Invalid records and records whose embedding keeps failing transiently
    /// are skipped and reported; configuration failures (bad credentials,
    /// dimension mismatch) and unreachable storage abort the whole run with
    /// nothing reported as upserted.
    #[inline]
    pub async fn build(&self, records: Vec<ProductRecord>) -> Result<IndexBuildReport> {
        let total = records.len();
        let (valid, rejected) = catalog::partition_valid(records);

        let mut report = IndexBuildReport {
            total,
            succeeded: 0,
            skipped: rejected,
        };
        for (id, reason) in &report.skipped {
            warn!("Skipping record {}: {}", id, reason);
        }

        let bar = self.progress_bar(valid.len() as u64);

        for batch in valid.chunks(self.batch_size) {
            self.index_batch(batch, &mut report).await?;
            bar.inc(batch.len() as u64);
        }
        bar.finish_and_clear();

        let manifest = IndexManifest {
            embedding_model: self.embedder.model().to_string(),
            dimension: self.embedder.dimension(),
            namespace: self.namespace.clone(),
            record_count: report.succeeded,
            built_at: chrono::Utc::now(),
        };
        manifest.write(&self.manifest_path)?;

        info!(
            "Index build finished: {} succeeded, {} skipped of {} total in namespace {}",
            report.succeeded,
            report.failed(),
            report.total,
            self.namespace
        );
        Ok(report)
    }

    async fn index_batch(
        &self,
        batch: &[ProductRecord],
        report: &mut IndexBuildReport,
    ) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(ProductRecord::embedding_text).collect();

        match self.embedder.embed(&texts) {
            Ok(vectors) => {
                let records: Vec<EmbeddingRecord> = batch
                    .iter()
                    .zip(vectors)
                    .map(|(record, vector)| EmbeddingRecord {
                        id: record.id.clone(),
                        vector,
                        metadata: ProductMetadata::from(record),
                    })
                    .collect();
                self.store.upsert(&records).await?;
                report.succeeded += records.len();
                Ok(())
            }
            // One slow batch must not sink the run: fall back to embedding
            // record by record so only the genuinely failing ones are lost.
            Err(err) if err.is_transient() => {
                warn!(
                    "Batch embedding failed ({}), retrying {} records individually",
                    err,
                    batch.len()
                );
                for record in batch {
                    match self.embedder.embed_one(&record.embedding_text()) {
                        Ok(vector) => {
                            self.store
                                .upsert(&[EmbeddingRecord {
                                    id: record.id.clone(),
                                    vector,
                                    metadata: ProductMetadata::from(record),
                                }])
                                .await?;
                            report.succeeded += 1;
                        }
                        Err(err) if err.is_transient() => {
                            warn!("Skipping record {}: {}", record.id, err);
                            report.skipped.push((record.id.clone(), err.to_string()));
                        }
                        Err(err) => return Err(err),
                    }
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} products embedded")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    }
}

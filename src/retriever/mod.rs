
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::config::Config;
use crate::database::lancedb::{IndexManifest, ProductMetadata, SearchHit, VectorStore};
use crate::embeddings::EmbeddingClient;
use crate::{GuideError, Result};

/// Metadata filter derived from known conversation slots. Filtering is a
/// soft preference, never a hard constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotFilter {
    pub tag: String,
}

/// One shortlist entry, ordered by descending similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedMatch {
    pub id: String,
    pub score: f32,
    pub metadata: ProductMetadata,
}

impl From<SearchHit> for RankedMatch {
    #[inline]
    fn from(hit: SearchHit) -> Self {
        Self {
            id: hit.id,
            score: hit.score,
            metadata: hit.metadata,
        }
    }
}

/// Where the orchestrator gets its shortlist from. A seam so turn logic is
/// testable without an index on disk.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SlotFilter>,
    ) -> Result<Vec<RankedMatch>>;
}

/// Query-time retrieval: embed the message with the index's pinned model,
/// search the vector store, apply the ranking policy.
pub struct Retriever {
    embedder: EmbeddingClient,
    store: VectorStore,
    manifest_path: PathBuf,
}

impl Retriever {
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

    #[inline]
    pub fn from_parts(embedder: EmbeddingClient, store: VectorStore, config: &Config) -> Self {
        Self {
            embedder,
            store,
            manifest_path: config.manifest_path(),
        }
    }

    /// An index answers queries only with the embedding model it was built
    /// with; anything else silently returns garbage neighbours.
    fn verify_manifest(&self) -> Result<()> {
        if !self.manifest_path.exists() {
            return Err(GuideError::Config(format!(
                "no index manifest at {}; run the index build first",
                self.manifest_path.display()
            )));
        }

        let manifest = IndexManifest::load(&self.manifest_path)?;
        if manifest.embedding_model != self.embedder.model() {
            return Err(GuideError::Config(format!(
                "index was built with embedding model '{}' but '{}' is configured; reindex before querying",
                manifest.embedding_model,
                self.embedder.model()
            )));
        }
        if manifest.dimension != self.embedder.dimension() {
            return Err(GuideError::Config(format!(
                "index was built with dimension {} but {} is configured",
                manifest.dimension,
                self.embedder.dimension()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CandidateSource for Retriever {
    #[inline]
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SlotFilter>,
    ) -> Result<Vec<RankedMatch>> {
        self.verify_manifest()?;

        let vector = self.embedder.embed_one(query)?;

        let hits = match filter {
            Some(slot_filter) => {
                let filtered = self.store.search(&vector, top_k, Some(&slot_filter.tag)).await?;
                if filtered.len() < 2 {
                    // Never starve the recommendation step: a filter that
                    // leaves fewer than two candidates is dropped.
                    debug!(
                        "Slot filter '{}' left {} candidates, falling back to unfiltered query",
                        slot_filter.tag,
                        filtered.len()
                    );
                    self.store.search(&vector, top_k, None).await?
                } else {
                    filtered
                }
            }
            None => self.store.search(&vector, top_k, None).await?,
        };

        Ok(rank(hits))
    }
}

/// Deterministic ordering: descending score, ties broken by id ascending so
/// repeated runs shortlist identically.
#[inline]
pub fn rank(hits: Vec<SearchHit>) -> Vec<RankedMatch> {
    let mut matches: Vec<RankedMatch> = hits.into_iter().map(RankedMatch::from).collect();
    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.id.cmp(&b.id))
    });
    matches
}

use super::*;
use crate::database::lancedb::{EmbeddingRecord, ProductMetadata};
use tempfile::TempDir;

const DIM: usize = 4;

fn record(id: &str, vector: Vec<f32>, tags: &[&str]) -> EmbeddingRecord {
    EmbeddingRecord {
        id: id.to_string(),
        vector,
        metadata: ProductMetadata {
            name: format!("Product {id}"),
            url: format!("https://ortahaus.com/products/{id}"),
            description: "A fine product".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            price: "28".to_string(),
            image: String::new(),
        },
    }
}

async fn open_store(temp_dir: &TempDir) -> VectorStore {
    VectorStore::open(&temp_dir.path().join("vectors"), "test", DIM)
        .await
        .expect("open store")
}

#[tokio::test]
async fn upsert_and_search_round_trip() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = open_store(&temp_dir).await;

    store
        .upsert(&[
            record("a", vec![1.0, 0.0, 0.0, 0.0], &["curly"]),
            record("b", vec![0.0, 1.0, 0.0, 0.0], &["straight"]),
        ])
        .await
        .expect("upsert");

    let hits = store
        .search(&[1.0, 0.0, 0.0, 0.0], 2, None)
        .await
        .expect("search");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "a");
    assert!(hits[0].score > hits[1].score);
    assert_eq!(hits[0].metadata.tags, vec!["curly".to_string()]);
}

#[tokio::test]
async fn upsert_same_id_replaces_row() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = open_store(&temp_dir).await;

    store
        .upsert(&[record("a", vec![1.0, 0.0, 0.0, 0.0], &["curly"])])
        .await
        .expect("first upsert");
    store
        .upsert(&[record("a", vec![0.0, 0.0, 1.0, 0.0], &["wavy"])])
        .await
        .expect("second upsert");

    assert_eq!(store.count().await.expect("count"), 1);

    let hits = store
        .search(&[0.0, 0.0, 1.0, 0.0], 1, None)
        .await
        .expect("search");
    assert_eq!(hits[0].id, "a");
    assert_eq!(hits[0].metadata.tags, vec!["wavy".to_string()]);
}

#[tokio::test]
async fn tag_filter_narrows_results() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = open_store(&temp_dir).await;

    store
        .upsert(&[
            record("a", vec![1.0, 0.0, 0.0, 0.0], &["curly", "shine"]),
            record("b", vec![0.9, 0.1, 0.0, 0.0], &["straight"]),
        ])
        .await
        .expect("upsert");

    let hits = store
        .search(&[1.0, 0.0, 0.0, 0.0], 5, Some("curly"))
        .await
        .expect("filtered search");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "a");
}

#[tokio::test]
async fn wrong_dimension_vector_is_rejected() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = open_store(&temp_dir).await;

    let err = store
        .upsert(&[record("a", vec![1.0, 0.0], &[])])
        .await
        .expect_err("dimension mismatch");
    assert!(matches!(err, crate::GuideError::Config(_)));

    let err = store
        .search(&[1.0, 0.0], 1, None)
        .await
        .expect_err("query dimension mismatch");
    assert!(matches!(err, crate::GuideError::Config(_)));
}

#[tokio::test]
async fn reopening_with_different_dimension_fails() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("vectors");

    VectorStore::open(&path, "test", DIM).await.expect("open");
    let err = VectorStore::open(&path, "test", DIM + 1)
        .await
        .expect_err("schema conflict");
    assert!(matches!(err, crate::GuideError::Config(_)));
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("vectors");

    let staging = VectorStore::open(&path, "staging", DIM).await.expect("open");
    let prod = VectorStore::open(&path, "prod", DIM).await.expect("open");

    staging
        .upsert(&[record("a", vec![1.0, 0.0, 0.0, 0.0], &[])])
        .await
        .expect("upsert staging");

    assert_eq!(staging.count().await.expect("count"), 1);
    assert_eq!(prod.count().await.expect("count"), 0);
}

#[tokio::test]
async fn clear_empties_the_namespace() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = open_store(&temp_dir).await;

    store
        .upsert(&[record("a", vec![1.0, 0.0, 0.0, 0.0], &[])])
        .await
        .expect("upsert");
    store.clear().await.expect("clear");

    assert_eq!(store.count().await.expect("count"), 0);
}

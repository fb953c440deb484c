// Integration tests for the index build pipeline: a mock OpenAI-compatible
// embeddings endpoint plus a real vector store in a temp directory.

use std::hash::{DefaultHasher, Hash, Hasher};

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use product_guide::GuideError;
use product_guide::catalog::ProductRecord;
use product_guide::config::Config;
use product_guide::database::lancedb::{IndexManifest, VectorStore};
use product_guide::embeddings::EmbeddingClient;
use product_guide::indexer::IndexBuilder;

const DIM: usize = 8;

/// Deterministic fake embeddings: the same text always maps to the same
/// unit vector, and texts containing the sentinel fail with a 500.
struct EmbeddingResponder {
    dimension: usize,
}

impl Respond for EmbeddingResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("request body is json");
        let inputs = body["input"].as_array().expect("input array");

        if inputs
            .iter()
            .any(|t| t.as_str().unwrap_or_default().contains("unreachable-product"))
        {
            return ResponseTemplate::new(500);
        }

        let data: Vec<serde_json::Value> = inputs
            .iter()
            .enumerate()
            .map(|(index, text)| {
                serde_json::json!({
                    "index": index,
                    "embedding": fake_vector(text.as_str().unwrap_or_default(), self.dimension),
                })
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": data }))
    }
}

fn fake_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let mut seed = hasher.finish();

    let mut vector: Vec<f32> = (0..dimension)
        .map(|_| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((seed >> 33) % 1000) as f32 / 1000.0 + 0.001
        })
        .collect();

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    for v in &mut vector {
        *v /= norm;
    }
    vector
}

fn product(slug: &str, description: &str) -> ProductRecord {
    ProductRecord {
        id: format!("https://ortahaus.com/products/{slug}"),
        url: format!("https://ortahaus.com/products/{slug}"),
        name: slug.replace('-', " "),
        description: description.to_string(),
        price: "28".to_string(),
        image: String::new(),
        bullets: vec![],
        how_to_use: String::new(),
        ingredients: String::new(),
        tags: vec!["curly".to_string()],
    }
}

fn test_config(temp_dir: &TempDir, server: &MockServer) -> Config {
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.openai.api_base = format!("{}/v1", server.uri());
    config.openai.embedding_dimension = DIM as u32;
    config.openai.batch_size = 2;
    config.openai.retry_attempts = 1;
    config
}

async fn mount_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(EmbeddingResponder { dimension: DIM })
        .mount(server)
        .await;
}

async fn builder_for(config: &Config) -> IndexBuilder {
    let embedder =
        EmbeddingClient::with_api_key(config, "test-key".to_string()).expect("embedding client");
    let store = VectorStore::open(
        &config.vector_database_path(),
        &config.index.namespace,
        DIM,
    )
    .await
    .expect("vector store");
    IndexBuilder::from_parts(embedder, store, config)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn build_reports_and_stores_every_valid_record() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    let temp_dir = TempDir::new().expect("temp dir");
    let config = test_config(&temp_dir, &server);

    let mut invalid = product("broken", "no name");
    invalid.name = String::new();

    let records = vec![
        product("curl-cream", "Defined curls with shine"),
        product("texture-clay", "Matte clay with strong hold"),
        product("sea-salt-spray", "Beach texture and volume"),
        invalid,
    ];

    let builder = builder_for(&config).await;
    let report = builder.build(records).await.expect("build");

    assert_eq!(report.total, 4);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed(), 1);

    let store = VectorStore::open(
        &config.vector_database_path(),
        &config.index.namespace,
        DIM,
    )
    .await
    .expect("reopen store");
    assert_eq!(store.count().await.expect("count"), 3);

    let manifest = IndexManifest::load(&config.manifest_path()).expect("manifest");
    assert_eq!(manifest.embedding_model, config.openai.embedding_model);
    assert_eq!(manifest.dimension, DIM);
    assert_eq!(manifest.record_count, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rebuilding_an_unchanged_catalog_is_idempotent() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    let temp_dir = TempDir::new().expect("temp dir");
    let config = test_config(&temp_dir, &server);

    let records = || {
        vec![
            product("curl-cream", "Defined curls with shine"),
            product("texture-clay", "Matte clay with strong hold"),
        ]
    };

    let first = builder_for(&config).await.build(records()).await.expect("first build");
    let second = builder_for(&config).await.build(records()).await.expect("second build");

    assert_eq!(first.succeeded, 2);
    assert_eq!(second.succeeded, 2);

    let store = VectorStore::open(
        &config.vector_database_path(),
        &config.index.namespace,
        DIM,
    )
    .await
    .expect("reopen store");
    // Same ids overwrite, never duplicate.
    assert_eq!(store.count().await.expect("count"), 2);

    let query = fake_vector(
        &product("curl-cream", "Defined curls with shine").embedding_text(),
        DIM,
    );
    let hits = store.search(&query, 1, None).await.expect("search");
    assert_eq!(hits[0].id, "https://ortahaus.com/products/curl-cream");
    assert!(hits[0].score > 0.99);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_dimension_aborts_the_whole_build() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    let temp_dir = TempDir::new().expect("temp dir");
    let mut config = test_config(&temp_dir, &server);
    // The endpoint returns DIM-wide vectors; the index expects wider ones.
    config.openai.embedding_dimension = (DIM * 2) as u32;

    let builder = builder_for(&config).await;
    let err = builder
        .build(vec![product("curl-cream", "Defined curls")])
        .await
        .expect_err("dimension mismatch");

    assert!(matches!(err, GuideError::Config(_)), "got {err}");
    assert!(!config.manifest_path().exists(), "manifest must not be written");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_credentials_abort_the_whole_build() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let config = test_config(&temp_dir, &server);

    let builder = builder_for(&config).await;
    let err = builder
        .build(vec![product("curl-cream", "Defined curls")])
        .await
        .expect_err("auth failure");

    assert!(matches!(err, GuideError::Config(_)), "got {err}");
    assert!(!config.manifest_path().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_failure_skips_only_the_affected_record() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    let temp_dir = TempDir::new().expect("temp dir");
    let config = test_config(&temp_dir, &server);

    // First run: everything embeds.
    let healthy = vec![
        product("curl-cream", "Defined curls with shine"),
        product("texture-clay", "Matte clay with strong hold"),
        product("sea-salt-spray", "Beach texture and volume"),
    ];
    builder_for(&config).await.build(healthy).await.expect("first build");

    // Second run: the clay's embedding call now fails persistently.
    let degraded = vec![
        product("curl-cream", "Defined curls with shine"),
        product("texture-clay", "unreachable-product"),
        product("sea-salt-spray", "Beach texture and volume"),
    ];
    let report = builder_for(&config).await.build(degraded).await.expect("second build");

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(
        report.skipped[0].0,
        "https://ortahaus.com/products/texture-clay"
    );

    // The skipped id keeps its previous version in the index.
    let store = VectorStore::open(
        &config.vector_database_path(),
        &config.index.namespace,
        DIM,
    )
    .await
    .expect("reopen store");
    assert_eq!(store.count().await.expect("count"), 3);

    let old_clay_query = fake_vector(
        &product("texture-clay", "Matte clay with strong hold").embedding_text(),
        DIM,
    );
    let hits = store.search(&old_clay_query, 1, None).await.expect("search");
    assert_eq!(hits[0].id, "https://ortahaus.com/products/texture-clay");
    assert!(hits[0].score > 0.99);
}

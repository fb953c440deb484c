use super::*;

fn test_client(dimension: usize) -> EmbeddingClient {
    EmbeddingClient {
        endpoint: Url::parse("http://localhost:9/v1/embeddings").expect("valid url"),
        model: "text-embedding-3-small".to_string(),
        dimension,
        batch_size: 16,
        api_key: "test-key".to_string(),
        agent: ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(50)))
            .build()
            .into(),
        retry_attempts: 1,
    }
}

#[test]
fn empty_input_skips_the_network() {
    let client = test_client(1536);
    let vectors = client.embed(&[]).expect("empty batch");
    assert!(vectors.is_empty());
}

#[test]
fn exposes_pinned_model_and_dimension() {
    let client = test_client(1536);
    assert_eq!(client.model(), "text-embedding-3-small");
    assert_eq!(client.dimension(), 1536);
}

#[test]
fn unreachable_endpoint_is_a_service_error() {
    let client = test_client(8);
    let err = client.embed_one("query").expect_err("no server listening");
    assert!(err.is_transient(), "transport failures must be retryable: {err}");
}

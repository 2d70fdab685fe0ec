//! Exercises the remote embedding backend's HTTP contract against a stub
//! server, since the sync/route end-to-end tests only cover the deterministic
//! fallback backend.

use serde_json::json;
use skillcore::config::{EmbeddingBackendKind, EmbeddingConfig};
use skillcore::core::embedding::{EmbeddingService, EmbeddingServiceImpl};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn remote_backend_parses_openai_style_response_and_normalizes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [3.0, 4.0]}]
        })))
        .mount(&server)
        .await;

    let config = EmbeddingConfig {
        backend: EmbeddingBackendKind::Remote,
        dimension: 2,
        remote_base_url: server.uri(),
        ..EmbeddingConfig::default()
    };
    let service = EmbeddingServiceImpl::new(config);

    let vector = service.embed("hello").await.unwrap();
    assert_eq!(vector.len(), 2);
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 0.01);
}

#[tokio::test]
async fn remote_backend_dimension_mismatch_is_an_index_conflict() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [1.0, 2.0, 3.0]}]
        })))
        .mount(&server)
        .await;

    let config = EmbeddingConfig {
        backend: EmbeddingBackendKind::Remote,
        dimension: 8,
        remote_base_url: server.uri(),
        ..EmbeddingConfig::default()
    };
    let service = EmbeddingServiceImpl::new(config);

    let result = service.embed("hello").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn remote_backend_surfaces_non_success_status_as_embedding_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = EmbeddingConfig {
        backend: EmbeddingBackendKind::Remote,
        dimension: 4,
        remote_base_url: server.uri(),
        ..EmbeddingConfig::default()
    };
    let service = EmbeddingServiceImpl::new(config);

    let result = service.embed("hello").await;
    assert!(result.is_err());
}

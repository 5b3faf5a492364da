// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::support::{page_image, SyntheticEncoder, DIM};
use page_index::api::rest::{router, ApiConfig};
use page_index::client::{ClientConfig, HttpBackend};
use page_index::core::storage::{BackendError, RetryBackend, VectorBackend};
use page_index::core::types::VectorField;
use page_index::encoding::{QueryRepresentationBuilder, SharedEncoder};
use page_index::index::{
    AckMode, IndexingPipeline, PhasedSearch, Retriever, SchemaManager, SchemaOutcome, UpsertPipeline,
};
use page_index::storage::InMemoryBackend;
use std::sync::Arc;
use std::time::Duration;

/// Serve a fresh in-memory backend on an ephemeral port.
async fn spawn_server() -> String {
    let app = router(Arc::new(InMemoryBackend::new()), &ApiConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api/v1", addr)
}

#[tokio::test]
async fn test_unreachable_server_is_a_connection_error() {
    let config = ClientConfig::new("http://127.0.0.1:1/api/v1").with_timeout(Duration::from_secs(2));
    match HttpBackend::connect(config).await {
        Err(BackendError::Connection(_)) | Err(BackendError::Timeout) => {}
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("connected to a closed port"),
    }
}

#[tokio::test]
async fn test_http_backend_end_to_end() {
    let url = spawn_server().await;
    let backend: Arc<dyn VectorBackend> = Arc::new(RetryBackend::new(
        HttpBackend::connect(ClientConfig::new(url)).await.unwrap(),
        3,
    ));

    let manager = SchemaManager::new(backend.clone());
    assert_eq!(manager.ensure_schema("pages", DIM, false).await.unwrap(), SchemaOutcome::Created);
    assert_eq!(manager.ensure_schema("pages", DIM, false).await.unwrap(), SchemaOutcome::Existing);
    manager.check_compatible("pages", DIM).await.unwrap();
    assert!(matches!(
        backend.create_collection("pages", manager.schema_for(DIM)).await,
        Err(BackendError::CollectionExists(_))
    ));

    let encoder = SharedEncoder::new(SyntheticEncoder);
    let upserts = UpsertPipeline::new(backend.clone(), "pages", AckMode::default());
    let mut pipeline = IndexingPipeline::new(encoder.clone(), upserts, "http://minio").unwrap();
    let pages: Vec<_> = (0..4).map(|n| page_image("history", n)).collect();
    pipeline.index_pages(&pages).await.unwrap();
    assert_eq!(backend.count("pages").await.unwrap(), 4);

    let retriever = Retriever::new(
        QueryRepresentationBuilder::new(encoder),
        PhasedSearch::new(backend.clone(), "pages"),
    );
    let retrieval = retriever.retrieve("french revolution", VectorField::Initial, 3).await.unwrap();
    assert_eq!(retrieval.hits.len(), 3);
    assert!(retrieval.hits.iter().all(|h| h.page().unwrap().book_name == "history"));

    assert!(backend.delete_collection("pages").await.unwrap());
    assert_eq!(backend.get_collection("pages").await.unwrap(), None);
    assert!(matches!(
        backend.count("pages").await,
        Err(BackendError::CollectionNotFound(name)) if name == "pages"
    ));
}

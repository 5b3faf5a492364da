// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::support::{pages_collection, FlakyBackend};
use page_index::core::storage::{BackendError, PointBatch, RetryBackend, RetryConfig, VectorBackend};
use page_index::core::types::{MultiVector, PagePayload, Representations};
use page_index::storage::InMemoryBackend;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn fast(max_attempts: usize) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        jitter: true,
        ..RetryConfig::default()
    }
}

fn single_point() -> PointBatch {
    let mv = MultiVector::single(vec![1.0; 8]);
    PointBatch::new(
        vec![1],
        vec![PagePayload::new("book", 1, "http://minio/book/page_1.png").into_payload()],
        vec![Representations {
            full: mv.clone(),
            max_pool: mv.clone(),
            mean_pool: mv,
        }],
    )
    .unwrap()
}

#[tokio::test]
async fn test_retry_backend_rides_out_transient_failures() {
    let inner = InMemoryBackend::new();
    pages_collection(&inner, "pages").await;
    let backend = RetryBackend::with_config(FlakyBackend::new(inner, 2), fast(3));

    backend.upsert("pages", single_point(), true).await.unwrap();
    assert_eq!(backend.inner().upsert_calls.load(Ordering::SeqCst), 3);
    assert_eq!(backend.count("pages").await.unwrap(), 1);
}

#[tokio::test]
async fn test_retry_backend_surfaces_exhaustion() {
    let inner = InMemoryBackend::new();
    pages_collection(&inner, "pages").await;
    let backend = RetryBackend::with_config(FlakyBackend::new(inner, 10), fast(2));

    let err = backend.upsert("pages", single_point(), true).await.unwrap_err();
    assert!(matches!(err, BackendError::Connection(_)));
    assert_eq!(backend.inner().upsert_calls.load(Ordering::SeqCst), 2);
}

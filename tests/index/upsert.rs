// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::support::{pages_collection, wait_for_count, FlakyBackend, GatedBackend};
use page_index::core::storage::{BackendError, RetryConfig, VectorBackend};
use page_index::core::types::{MultiVector, PagePayload, Payload, PointId, Representations, UpdateStatus};
use page_index::index::{AckMode, UpsertError, UpsertPipeline};
use page_index::storage::InMemoryBackend;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn columns(ids: &[PointId]) -> (Vec<PointId>, Vec<Payload>, Vec<Representations>) {
    let payloads = ids
        .iter()
        .map(|&id| PagePayload::new("physics", id as i64, format!("http://minio/physics/page_{}.png", id)).into_payload())
        .collect();
    let vectors = ids
        .iter()
        .map(|&id| {
            let mv = MultiVector::single((0..8).map(|d| (id as f32 + 1.0) * (d as f32 - 3.5)).collect());
            Representations {
                full: mv.clone(),
                max_pool: mv.clone(),
                mean_pool: mv,
            }
        })
        .collect();
    (ids.to_vec(), payloads, vectors)
}

fn fast_retry(max_attempts: usize) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        ..RetryConfig::default()
    }
}

#[tokio::test]
async fn test_acknowledged_upsert_is_visible_on_return() {
    let backend = Arc::new(InMemoryBackend::new());
    pages_collection(&backend, "pages").await;
    let pipeline = UpsertPipeline::new(backend.clone(), "pages", AckMode::default());

    let (ids, payloads, vectors) = columns(&[0, 1, 2]);
    let result = pipeline.upsert(ids, payloads, vectors).await.unwrap();

    assert_eq!(result.status, UpdateStatus::Completed);
    assert_eq!(backend.count("pages").await.unwrap(), 3);
}

#[tokio::test]
async fn test_fire_and_forget_is_eventually_visible() {
    let backend = Arc::new(InMemoryBackend::new());
    pages_collection(&backend, "pages").await;
    let pipeline = UpsertPipeline::new(backend.clone(), "pages", AckMode::FireAndForget);

    let (ids, payloads, vectors) = columns(&[0, 1, 2, 3, 4]);
    let result = pipeline.upsert(ids, payloads, vectors).await.unwrap();

    assert_eq!(result.status, UpdateStatus::Acknowledged);
    assert_eq!(wait_for_count(backend.as_ref(), "pages", 5).await, 5);
}

#[tokio::test]
async fn test_length_mismatch_writes_nothing() {
    let backend = Arc::new(InMemoryBackend::new());
    pages_collection(&backend, "pages").await;
    let pipeline = UpsertPipeline::new(backend.clone(), "pages", AckMode::default());

    let (ids, payloads, mut vectors) = columns(&[0, 1, 2]);
    vectors.pop();
    assert_eq!(
        pipeline.upsert(ids, payloads, vectors).await,
        Err(UpsertError::LengthMismatch {
            ids: 3,
            payloads: 3,
            vectors: 2
        })
    );
    assert_eq!(backend.count("pages").await.unwrap(), 0);
}

#[tokio::test]
async fn test_acknowledged_mode_retries_transient_failures() {
    let inner = InMemoryBackend::new();
    pages_collection(&inner, "pages").await;
    let backend = Arc::new(FlakyBackend::new(inner, 2));
    let pipeline = UpsertPipeline::new(backend.clone(), "pages", AckMode::Acknowledged(fast_retry(3)));

    let (ids, payloads, vectors) = columns(&[7, 8]);
    pipeline.upsert(ids, payloads, vectors).await.unwrap();

    assert_eq!(backend.upsert_calls.load(Ordering::SeqCst), 3);
    assert_eq!(backend.count("pages").await.unwrap(), 2);
}

#[tokio::test]
async fn test_failure_reports_affected_ids() {
    let inner = InMemoryBackend::new();
    pages_collection(&inner, "pages").await;
    let backend = Arc::new(FlakyBackend::new(inner, 1));
    let pipeline = UpsertPipeline::new(backend, "pages", AckMode::FireAndForget);

    let (ids, payloads, vectors) = columns(&[4, 5, 6]);
    let err = pipeline.upsert(ids, payloads, vectors).await.unwrap_err();

    assert_eq!(err.failed_ids(), &[4, 5, 6]);
    assert!(matches!(
        err,
        UpsertError::Rejected {
            source: BackendError::Connection(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_unknown_collection_is_not_retried() {
    let backend = Arc::new(FlakyBackend::new(InMemoryBackend::new(), 0));
    let pipeline = UpsertPipeline::new(backend.clone(), "missing", AckMode::Acknowledged(fast_retry(5)));

    let (ids, payloads, vectors) = columns(&[1]);
    let err = pipeline.upsert(ids, payloads, vectors).await.unwrap_err();

    assert!(matches!(
        err,
        UpsertError::Rejected {
            source: BackendError::CollectionNotFound(_),
            ..
        }
    ));
    assert_eq!(backend.upsert_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_queue_applies_backpressure() {
    let inner = InMemoryBackend::new();
    pages_collection(&inner, "pages").await;
    let (gated, mut entered) = GatedBackend::new(inner);
    let gated = Arc::new(gated);
    let gate = gated.gate.clone();

    let queue = UpsertPipeline::new(gated.clone(), "pages", AckMode::default()).into_queue(1);

    let (ids, payloads, vectors) = columns(&[0]);
    let first = queue
        .submit(UpsertPipeline::batch(ids, payloads, vectors).unwrap())
        .await
        .unwrap();
    // worker now holds the first batch inside the backend
    entered.recv().await.unwrap();

    let (ids, payloads, vectors) = columns(&[1]);
    let second = queue
        .try_submit(UpsertPipeline::batch(ids, payloads, vectors).unwrap())
        .unwrap();

    let (ids, payloads, vectors) = columns(&[2, 3]);
    let rejected = queue
        .try_submit(UpsertPipeline::batch(ids, payloads, vectors).unwrap())
        .err()
        .unwrap();
    assert_eq!(rejected, UpsertError::QueueFull { ids: vec![2, 3] });

    gate.add_permits(2);
    first.wait().await.unwrap();
    second.wait().await.unwrap();

    let stats = queue.close().await.unwrap();
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.points, 2);
    assert_eq!(stats.failed_batches, 0);
    assert_eq!(gated.count("pages").await.unwrap(), 2);
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::support::{pages_collection, wait_for_count};
use approx::assert_relative_eq;
use page_index::core::schema::{CollectionSchema, SchemaError};
use page_index::core::storage::{BackendError, PointBatch, QueryRequest, VectorBackend};
use page_index::core::types::{
    MultiVector, PagePayload, Payload, PointId, Representations, UpdateStatus, VectorField,
};
use page_index::storage::InMemoryBackend;

fn bundle(rows: Vec<Vec<f32>>) -> Representations {
    let mv = MultiVector::new(rows).unwrap();
    Representations {
        full: mv.clone(),
        max_pool: mv.clone(),
        mean_pool: mv,
    }
}

fn payload(page: i64) -> Payload {
    PagePayload::new("deep_learning", page, format!("http://minio:9000/pages/deep_learning/page_{}.png", page))
        .into_payload()
}

fn query(field: VectorField, rows: Vec<Vec<f32>>, limit: usize) -> QueryRequest {
    QueryRequest {
        using: field,
        query: MultiVector::new(rows).unwrap(),
        limit,
        with_payload: true,
    }
}

#[tokio::test]
async fn test_duplicate_ids_last_write_wins() {
    let backend = InMemoryBackend::new();
    pages_collection(&backend, "pages").await;

    let mut vectors: Vec<Representations> = (0..8).map(|i| bundle(vec![vec![i as f32 + 1.0; 8]])).collect();
    vectors[1] = bundle(vec![vec![-1.0; 8]]);
    let batch = PointBatch::new(vec![1, 1], vec![payload(10), payload(20)], vectors[..2].to_vec()).unwrap();
    backend.upsert("pages", batch, true).await.unwrap();

    assert_eq!(backend.count("pages").await.unwrap(), 1);
    let hits = backend
        .query("pages", &query(VectorField::MeanPooling, vec![vec![-1.0; 8]], 5))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].page().unwrap().page_number, 20);
    assert_relative_eq!(hits[0].score, 1.0, epsilon = 1e-5);
}

#[tokio::test]
async fn test_score_ties_follow_insertion_order() {
    let backend = InMemoryBackend::new();
    pages_collection(&backend, "pages").await;

    let ids: Vec<PointId> = vec![40, 3, 17, 8];
    let batch = PointBatch::new(
        ids.clone(),
        ids.iter().map(|&id| payload(id as i64)).collect(),
        ids.iter().map(|_| bundle(vec![vec![0.5; 8]])).collect(),
    )
    .unwrap();
    backend.upsert("pages", batch, true).await.unwrap();

    let hits = backend
        .query("pages", &query(VectorField::MaxPooling, vec![vec![0.5; 8]], 10))
        .await
        .unwrap();
    let order: Vec<PointId> = hits.iter().map(|h| h.id).collect();
    assert_eq!(order, ids);
}

#[tokio::test]
async fn test_dimension_mismatch_is_rejected() {
    let backend = InMemoryBackend::new();
    pages_collection(&backend, "pages").await;

    let batch = PointBatch::new(vec![0], vec![payload(0)], vec![bundle(vec![vec![1.0; 4]])]).unwrap();
    let err = backend.upsert("pages", batch, true).await.unwrap_err();
    assert_eq!(
        err,
        BackendError::DimensionMismatch {
            field: VectorField::Initial,
            expected: 8,
            actual: 4
        }
    );

    let err = backend
        .query("pages", &query(VectorField::MeanPooling, vec![vec![1.0; 3]], 3))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::DimensionMismatch { field: VectorField::MeanPooling, .. }));
}

#[tokio::test]
async fn test_payload_schema_is_enforced() {
    let backend = InMemoryBackend::new();
    pages_collection(&backend, "pages").await;

    let mut bad = payload(1);
    bad.remove("page_url");
    let batch = PointBatch::new(vec![5], vec![bad], vec![bundle(vec![vec![1.0; 8]])]).unwrap();

    assert_eq!(
        backend.upsert("pages", batch, true).await,
        Err(BackendError::InvalidPayload {
            id: 5,
            source: SchemaError::MissingField("page_url".to_string())
        })
    );
    assert_eq!(backend.count("pages").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unacknowledged_writes_become_visible() {
    let backend = InMemoryBackend::new();
    pages_collection(&backend, "pages").await;

    let ids: Vec<PointId> = (0..5).collect();
    let batch = PointBatch::new(
        ids.clone(),
        ids.iter().map(|&i| payload(i as i64)).collect(),
        ids.iter().map(|&i| bundle(vec![vec![i as f32; 8]])).collect(),
    )
    .unwrap();

    let result = backend.upsert("pages", batch, false).await.unwrap();
    assert_eq!(result.status, UpdateStatus::Acknowledged);
    assert_eq!(wait_for_count(&backend, "pages", 5).await, 5);
}

#[tokio::test]
async fn test_plain_collection_without_quantization() {
    let backend = InMemoryBackend::new();
    let mut schema = CollectionSchema::multi_representation(2);
    schema.vectors.initial.quantization = None;
    schema.on_disk_payload = false;
    schema.payload_schema = None;
    backend.create_collection("plain", schema).await.unwrap();

    let batch = PointBatch::new(
        vec![1, 2],
        vec![Payload::new(), Payload::new()],
        vec![bundle(vec![vec![1.0, 0.0]]), bundle(vec![vec![0.0, 1.0]])],
    )
    .unwrap();
    backend.upsert("plain", batch, true).await.unwrap();

    let hits = backend
        .query("plain", &query(VectorField::Initial, vec![vec![0.0, 2.0]], 1))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 2);
}

#[tokio::test]
async fn test_delete_and_collection_info() {
    let backend = InMemoryBackend::new();
    pages_collection(&backend, "pages").await;

    let info = backend.collection_info("pages").await.unwrap();
    assert_eq!(info.shards, 4);
    assert_eq!(info.points, 0);

    assert!(backend.delete_collection("pages").await.unwrap());
    assert!(!backend.delete_collection("pages").await.unwrap());
    assert!(backend.list_collections().await.unwrap().is_empty());
}

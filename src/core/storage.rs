// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::core::schema::{CollectionSchema, SchemaError};
use crate::core::types::{
    MultiVector, Payload, PointId, Representations, ScoredPoint, UpdateResult, VectorField,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Backend timed out")]
    Timeout,
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    #[error("Collection already exists: {0}")]
    CollectionExists(String),
    #[error("Dimension mismatch on field '{field}': expected {expected}, got {actual}")]
    DimensionMismatch {
        field: VectorField,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid payload for point {id}: {source}")]
    InvalidPayload {
        id: PointId,
        #[source]
        source: SchemaError,
    },
    #[error("Invalid request: {0}")]
    Rejected(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Transient failures that a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Connection(_) | BackendError::Timeout)
    }
}

/// Column-oriented write batch: `ids[i]`, `payloads[i]` and `vectors[i]`
/// describe one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointBatch {
    ids: Vec<PointId>,
    payloads: Vec<Payload>,
    vectors: Vec<Representations>,
}

impl PointBatch {
    pub fn new(
        ids: Vec<PointId>,
        payloads: Vec<Payload>,
        vectors: Vec<Representations>,
    ) -> Result<Self, BackendError> {
        let batch = Self {
            ids,
            payloads,
            vectors,
        };
        batch.check_lengths()?;
        Ok(batch)
    }

    /// Deserialized batches bypass [`PointBatch::new`], so backends re-check.
    pub fn check_lengths(&self) -> Result<(), BackendError> {
        if self.ids.len() != self.payloads.len() || self.ids.len() != self.vectors.len() {
            return Err(BackendError::Rejected(format!(
                "batch columns differ in length: {} ids, {} payloads, {} vectors",
                self.ids.len(),
                self.payloads.len(),
                self.vectors.len()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[PointId] {
        &self.ids
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn vectors(&self) -> &[Representations] {
        &self.vectors
    }

    /// Points in batch order.
    pub fn points(&self) -> impl Iterator<Item = (PointId, &Payload, &Representations)> {
        self.ids
            .iter()
            .copied()
            .zip(self.payloads.iter())
            .zip(self.vectors.iter())
            .map(|((id, payload), vectors)| (id, payload, vectors))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Field the query is compared against.
    pub using: VectorField,
    pub query: MultiVector,
    pub limit: usize,
    #[serde(default = "default_with_payload")]
    pub with_payload: bool,
}

fn default_with_payload() -> bool {
    true
}

/// A multi-vector index holding named collections.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn list_collections(&self) -> Result<Vec<String>, BackendError>;
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionSchema>, BackendError>;
    async fn create_collection(&self, name: &str, schema: CollectionSchema) -> Result<(), BackendError>;
    /// Returns whether a collection was removed.
    async fn delete_collection(&self, name: &str) -> Result<bool, BackendError>;
    /// With `wait = false` the batch is validated, accepted and applied later.
    async fn upsert(&self, name: &str, batch: PointBatch, wait: bool) -> Result<UpdateResult, BackendError>;
    async fn query(&self, name: &str, request: &QueryRequest) -> Result<Vec<ScoredPoint>, BackendError>;
    async fn count(&self, name: &str) -> Result<usize, BackendError>;
}

// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error or
/// runs out of attempts.
pub async fn retry_with_backoff<F, Fut, R>(config: &RetryConfig, mut operation: F) -> Result<R, BackendError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<R, BackendError>>,
{
    let mut attempts = 0;
    let mut delay = config.initial_delay;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempts >= config.max_attempts.max(1) => {
                return Err(e);
            }
            Err(e) => {
                let mut actual_delay = delay;
                if config.jitter {
                    let jitter = Duration::from_millis(
                        (rand::random::<f64>() * delay.as_millis() as f64 * 0.3) as u64,
                    );
                    actual_delay = delay + jitter;
                }
                warn!(attempt = attempts, error = %e, "backend call failed, retrying in {:?}", actual_delay);

                sleep(actual_delay).await;

                let next_delay = Duration::from_millis(
                    (delay.as_millis() as f64 * config.exponential_base) as u64,
                );
                delay = next_delay.min(config.max_delay);
            }
        }
    }
}

/// Backend decorator retrying transient failures of every call.
pub struct RetryBackend<T> {
    inner: T,
    config: RetryConfig,
}

impl<T: VectorBackend> RetryBackend<T> {
    pub fn new(inner: T, max_attempts: usize) -> Self {
        Self::with_config(
            inner,
            RetryConfig {
                max_attempts,
                ..RetryConfig::default()
            },
        )
    }

    pub fn with_config(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: VectorBackend> VectorBackend for RetryBackend<T> {
    async fn list_collections(&self) -> Result<Vec<String>, BackendError> {
        retry_with_backoff(&self.config, || self.inner.list_collections()).await
    }

    async fn get_collection(&self, name: &str) -> Result<Option<CollectionSchema>, BackendError> {
        retry_with_backoff(&self.config, || self.inner.get_collection(name)).await
    }

    async fn create_collection(&self, name: &str, schema: CollectionSchema) -> Result<(), BackendError> {
        retry_with_backoff(&self.config, || self.inner.create_collection(name, schema.clone())).await
    }

    async fn delete_collection(&self, name: &str) -> Result<bool, BackendError> {
        retry_with_backoff(&self.config, || self.inner.delete_collection(name)).await
    }

    async fn upsert(&self, name: &str, batch: PointBatch, wait: bool) -> Result<UpdateResult, BackendError> {
        debug!(collection = name, points = batch.len(), "retrying upsert wrapper");
        retry_with_backoff(&self.config, || self.inner.upsert(name, batch.clone(), wait)).await
    }

    async fn query(&self, name: &str, request: &QueryRequest) -> Result<Vec<ScoredPoint>, BackendError> {
        retry_with_backoff(&self.config, || self.inner.query(name, request)).await
    }

    async fn count(&self, name: &str) -> Result<usize, BackendError> {
        retry_with_backoff(&self.config, || self.inner.count(name)).await
    }
}

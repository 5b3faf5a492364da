// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Batch upsert pipeline
//!
//! Writes `(id, payload, representations)` batches into a collection. Within
//! one batch a repeated id overwrites the earlier entry (last write wins).
//! Failures are reported per batch together with the ids they affected.

use crate::core::storage::{retry_with_backoff, BackendError, PointBatch, RetryConfig, VectorBackend};
use crate::core::types::{Payload, PointId, Representations, UpdateResult};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpsertError {
    #[error("batch columns differ in length: {ids} ids, {payloads} payloads, {vectors} vectors")]
    LengthMismatch {
        ids: usize,
        payloads: usize,
        vectors: usize,
    },

    #[error("batch of {} points rejected: {source}", .ids.len())]
    Rejected {
        ids: Vec<PointId>,
        #[source]
        source: BackendError,
    },

    #[error("upsert queue is full")]
    QueueFull { ids: Vec<PointId> },

    #[error("upsert queue is closed")]
    QueueClosed,
}

impl UpsertError {
    /// Ids of the points that were not written, when known.
    pub fn failed_ids(&self) -> &[PointId] {
        match self {
            UpsertError::Rejected { ids, .. } | UpsertError::QueueFull { ids } => ids,
            _ => &[],
        }
    }
}

/// How long the caller waits for a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum AckMode {
    /// Return once the backend has accepted the batch. The points become
    /// visible to search some time later; apply failures are not reported.
    FireAndForget,
    /// Wait until the batch is applied, retrying transient backend failures.
    Acknowledged(RetryConfig),
}

impl Default for AckMode {
    fn default() -> Self {
        AckMode::Acknowledged(RetryConfig::default())
    }
}

#[derive(Clone)]
pub struct UpsertPipeline {
    backend: Arc<dyn VectorBackend>,
    collection: String,
    mode: AckMode,
}

impl UpsertPipeline {
    pub fn new(backend: Arc<dyn VectorBackend>, collection: impl Into<String>, mode: AckMode) -> Self {
        Self {
            backend,
            collection: collection.into(),
            mode,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn mode(&self) -> &AckMode {
        &self.mode
    }

    /// Zip three equal-length columns into a batch.
    pub fn batch(
        ids: Vec<PointId>,
        payloads: Vec<Payload>,
        vectors: Vec<Representations>,
    ) -> Result<PointBatch, UpsertError> {
        if ids.len() != payloads.len() || ids.len() != vectors.len() {
            return Err(UpsertError::LengthMismatch {
                ids: ids.len(),
                payloads: payloads.len(),
                vectors: vectors.len(),
            });
        }
        PointBatch::new(ids, payloads, vectors).map_err(|source| UpsertError::Rejected {
            ids: Vec::new(),
            source,
        })
    }

    pub async fn upsert(
        &self,
        ids: Vec<PointId>,
        payloads: Vec<Payload>,
        vectors: Vec<Representations>,
    ) -> Result<UpdateResult, UpsertError> {
        self.upsert_batch(Self::batch(ids, payloads, vectors)?).await
    }

    pub async fn upsert_batch(&self, batch: PointBatch) -> Result<UpdateResult, UpsertError> {
        let ids = batch.ids().to_vec();
        let points = batch.len();

        let result = match &self.mode {
            AckMode::FireAndForget => self.backend.upsert(&self.collection, batch, false).await,
            AckMode::Acknowledged(retry) => {
                retry_with_backoff(retry, || self.backend.upsert(&self.collection, batch.clone(), true))
                    .await
            }
        };

        match result {
            Ok(update) => {
                debug!(
                    collection = %self.collection,
                    operation_id = update.operation_id,
                    points,
                    status = ?update.status,
                    "batch upserted"
                );
                Ok(update)
            }
            Err(source) => {
                error!(collection = %self.collection, points, error = %source, "batch upsert failed");
                Err(UpsertError::Rejected { ids, source })
            }
        }
    }

    /// Put a bounded queue in front of the pipeline. Submitters wait for room
    /// when `capacity` batches are pending.
    pub fn into_queue(self, capacity: usize) -> UpsertQueue {
        UpsertQueue::spawn(self, capacity)
    }
}

struct QueuedBatch {
    batch: PointBatch,
    reply: oneshot::Sender<Result<UpdateResult, UpsertError>>,
}

/// Resolves to the outcome of one queued batch.
pub struct UpsertTicket {
    rx: oneshot::Receiver<Result<UpdateResult, UpsertError>>,
}

impl UpsertTicket {
    pub async fn wait(self) -> Result<UpdateResult, UpsertError> {
        self.rx.await.map_err(|_| UpsertError::QueueClosed)?
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub batches: usize,
    pub points: usize,
    pub failed_batches: usize,
}

pub struct UpsertQueue {
    tx: mpsc::Sender<QueuedBatch>,
    worker: JoinHandle<QueueStats>,
}

impl UpsertQueue {
    fn spawn(pipeline: UpsertPipeline, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<QueuedBatch>(capacity.max(1));

        let worker = tokio::spawn(async move {
            let mut stats = QueueStats::default();
            while let Some(item) = rx.recv().await {
                let points = item.batch.len();
                let result = pipeline.upsert_batch(item.batch).await;
                stats.batches += 1;
                match &result {
                    Ok(_) => stats.points += points,
                    Err(_) => stats.failed_batches += 1,
                }
                let _ = item.reply.send(result);
            }
            info!(
                collection = %pipeline.collection,
                batches = stats.batches,
                points = stats.points,
                failed = stats.failed_batches,
                "upsert queue drained"
            );
            stats
        });

        Self { tx, worker }
    }

    /// Enqueue a batch, waiting while the queue is full.
    pub async fn submit(&self, batch: PointBatch) -> Result<UpsertTicket, UpsertError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueuedBatch { batch, reply })
            .await
            .map_err(|_| UpsertError::QueueClosed)?;
        Ok(UpsertTicket { rx })
    }

    /// Enqueue without waiting; a full queue hands the batch's ids back.
    pub fn try_submit(&self, batch: PointBatch) -> Result<UpsertTicket, UpsertError> {
        let (reply, rx) = oneshot::channel();
        match self.tx.try_send(QueuedBatch { batch, reply }) {
            Ok(()) => Ok(UpsertTicket { rx }),
            Err(mpsc::error::TrySendError::Full(item)) => Err(UpsertError::QueueFull {
                ids: item.batch.ids().to_vec(),
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(UpsertError::QueueClosed),
        }
    }

    /// Stop accepting batches, drain what is pending and return totals.
    pub async fn close(self) -> Result<QueueStats, UpsertError> {
        drop(self.tx);
        self.worker.await.map_err(|_| UpsertError::QueueClosed)
    }
}

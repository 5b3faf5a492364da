// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! In-process multi-vector index
//!
//! Collections are split into shards by a hash of the point id. Every
//! collection owns one update worker so that writes apply in submission
//! order, whether or not the caller waits for them. Searches scan shards
//! under read locks and observe whatever updates have been applied so far.

use crate::core::schema::{CollectionSchema, Distance, QuantizationConfig};
use crate::core::storage::{BackendError, PointBatch, QueryRequest, VectorBackend};
use crate::core::types::{
    MultiVector, Payload, PointId, ScoredPoint, UpdateResult, UpdateStatus, VectorField,
};
use crate::core::vector_ops::{max_sim, quantize_multivector, quantized_max_sim, BinaryVector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

pub const DEFAULT_OVERSAMPLING: f32 = 4.0;
pub const DEFAULT_UPDATE_QUEUE: usize = 1024;

#[derive(Debug, Clone)]
enum StoredPayload {
    Inline(Payload),
    /// CBOR blob, decoded only for returned hits.
    Encoded(Vec<u8>),
}

impl StoredPayload {
    fn encode(payload: &Payload, on_disk: bool) -> Result<Self, BackendError> {
        if on_disk {
            serde_cbor::to_vec(payload)
                .map(StoredPayload::Encoded)
                .map_err(|e| BackendError::Serialization(e.to_string()))
        } else {
            Ok(StoredPayload::Inline(payload.clone()))
        }
    }

    fn decode(&self) -> Result<Payload, BackendError> {
        match self {
            StoredPayload::Inline(p) => Ok(p.clone()),
            StoredPayload::Encoded(bytes) => serde_cbor::from_slice(bytes)
                .map_err(|e| BackendError::Serialization(e.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredVector {
    vectors: MultiVector,
    codes: Option<Vec<BinaryVector>>,
}

#[derive(Debug, Clone)]
struct StoredPoint {
    initial: StoredVector,
    max_pooling: StoredVector,
    mean_pooling: StoredVector,
    payload: StoredPayload,
}

impl StoredPoint {
    fn field(&self, field: VectorField) -> &StoredVector {
        match field {
            VectorField::Initial => &self.initial,
            VectorField::MaxPooling => &self.max_pooling,
            VectorField::MeanPooling => &self.mean_pooling,
        }
    }
}

#[derive(Debug)]
struct Slot {
    /// Insertion sequence; kept on replacement and used to break score ties.
    seq: u64,
    point: StoredPoint,
}

#[derive(Debug, Default)]
struct Shard {
    points: HashMap<PointId, Slot>,
}

struct UpdateOp {
    points: Vec<(PointId, StoredPoint)>,
    done: Option<oneshot::Sender<()>>,
}

struct CollectionData {
    schema: CollectionSchema,
    shards: Vec<RwLock<Shard>>,
    next_seq: AtomicU64,
}

impl CollectionData {
    fn shard_for(&self, id: PointId) -> usize {
        let hash = blake3::hash(&id.to_le_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(head) % self.shards.len() as u64) as usize
    }

    async fn apply(&self, points: Vec<(PointId, StoredPoint)>) {
        for (id, point) in points {
            let mut shard = self.shards[self.shard_for(id)].write().await;
            match shard.points.get_mut(&id) {
                Some(slot) => slot.point = point,
                None => {
                    let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
                    shard.points.insert(id, Slot { seq, point });
                }
            }
        }
    }
}

struct Collection {
    data: Arc<CollectionData>,
    updates: mpsc::Sender<UpdateOp>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub points: usize,
    pub shards: usize,
    pub created_at: DateTime<Utc>,
}

struct Candidate {
    seq: u64,
    id: PointId,
    score: f32,
}

fn by_score_then_seq(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.seq.cmp(&b.seq))
}

/// Sharded in-memory implementation of [`VectorBackend`].
pub struct InMemoryBackend {
    collections: DashMap<String, Collection>,
    next_operation: AtomicU64,
    oversampling: f32,
    update_queue: usize,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            next_operation: AtomicU64::new(0),
            oversampling: DEFAULT_OVERSAMPLING,
            update_queue: DEFAULT_UPDATE_QUEUE,
        }
    }

    /// Candidate multiplier for quantized fields before full-precision rescoring.
    pub fn with_oversampling(mut self, oversampling: f32) -> Self {
        self.oversampling = oversampling.max(1.0);
        self
    }

    /// Bound of each collection's pending-update queue.
    pub fn with_update_queue(mut self, capacity: usize) -> Self {
        self.update_queue = capacity.max(1);
        self
    }

    fn data(&self, name: &str) -> Result<Arc<CollectionData>, BackendError> {
        self.collections
            .get(name)
            .map(|c| c.data.clone())
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))
    }

    fn sender(&self, name: &str) -> Result<(Arc<CollectionData>, mpsc::Sender<UpdateOp>), BackendError> {
        self.collections
            .get(name)
            .map(|c| (c.data.clone(), c.updates.clone()))
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))
    }

    pub async fn collection_info(&self, name: &str) -> Result<CollectionInfo, BackendError> {
        let (data, created_at) = self
            .collections
            .get(name)
            .map(|c| (c.data.clone(), c.created_at))
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        Ok(CollectionInfo {
            name: name.to_string(),
            points: count_points(&data).await,
            shards: data.shards.len(),
            created_at,
        })
    }

    fn prepare(schema: &CollectionSchema, batch: &PointBatch) -> Result<Vec<(PointId, StoredPoint)>, BackendError> {
        batch.check_lengths()?;
        let mut prepared = Vec::with_capacity(batch.len());

        for (id, payload, vectors) in batch.points() {
            if let Some(payload_schema) = &schema.payload_schema {
                payload_schema
                    .validate(payload)
                    .map_err(|source| BackendError::InvalidPayload { id, source })?;
            }

            let store = |field: VectorField| -> Result<StoredVector, BackendError> {
                let params = schema.vectors.get(field);
                let mv = vectors.get(field);
                check_dimension(field, params.size, mv)?;
                let mv = match params.distance {
                    Distance::Cosine => mv.normalized(),
                    Distance::Dot => mv.clone(),
                };
                let codes = match params.quantization {
                    Some(QuantizationConfig::Binary { .. }) => Some(quantize_multivector(&mv)),
                    None => None,
                };
                Ok(StoredVector { vectors: mv, codes })
            };

            prepared.push((
                id,
                StoredPoint {
                    initial: store(VectorField::Initial)?,
                    max_pooling: store(VectorField::MaxPooling)?,
                    mean_pooling: store(VectorField::MeanPooling)?,
                    payload: StoredPayload::encode(payload, schema.on_disk_payload)?,
                },
            ));
        }

        Ok(prepared)
    }

    async fn search_shard(
        &self,
        shard: &RwLock<Shard>,
        field: VectorField,
        query: &MultiVector,
        query_codes: Option<&[BinaryVector]>,
        limit: usize,
    ) -> Vec<Candidate> {
        let shard = shard.read().await;

        let mut candidates: Vec<Candidate> = match query_codes {
            Some(codes) => {
                let mut rough: Vec<Candidate> = shard
                    .points
                    .iter()
                    .filter_map(|(id, slot)| {
                        slot.point.field(field).codes.as_ref().map(|doc| Candidate {
                            seq: slot.seq,
                            id: *id,
                            score: quantized_max_sim(codes, doc),
                        })
                    })
                    .collect();
                rough.sort_by(by_score_then_seq);
                rough.truncate(((limit as f32) * self.oversampling).ceil() as usize);
                rough
                    .into_iter()
                    .filter_map(|c| {
                        shard.points.get(&c.id).map(|slot| Candidate {
                            score: max_sim(query, &slot.point.field(field).vectors),
                            ..c
                        })
                    })
                    .collect()
            }
            None => shard
                .points
                .iter()
                .map(|(id, slot)| Candidate {
                    seq: slot.seq,
                    id: *id,
                    score: max_sim(query, &slot.point.field(field).vectors),
                })
                .collect(),
        };

        candidates.sort_by(by_score_then_seq);
        candidates.truncate(limit);
        candidates
    }
}

fn check_dimension(field: VectorField, expected: usize, mv: &MultiVector) -> Result<(), BackendError> {
    if mv.is_empty() {
        return Err(BackendError::Rejected(format!(
            "field '{}' has no token vectors",
            field
        )));
    }
    for row in mv.rows() {
        if row.len() != expected {
            return Err(BackendError::DimensionMismatch {
                field,
                expected,
                actual: row.len(),
            });
        }
    }
    Ok(())
}

async fn count_points(data: &CollectionData) -> usize {
    let mut total = 0;
    for shard in &data.shards {
        total += shard.read().await.points.len();
    }
    total
}

async fn run_update_worker(name: String, data: Arc<CollectionData>, mut rx: mpsc::Receiver<UpdateOp>) {
    while let Some(op) = rx.recv().await {
        data.apply(op.points).await;
        if let Some(done) = op.done {
            let _ = done.send(());
        }
    }
    debug!(collection = %name, "update worker stopped");
}

#[async_trait]
impl VectorBackend for InMemoryBackend {
    async fn list_collections(&self) -> Result<Vec<String>, BackendError> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn get_collection(&self, name: &str) -> Result<Option<CollectionSchema>, BackendError> {
        Ok(self.collections.get(name).map(|c| c.data.schema.clone()))
    }

    async fn create_collection(&self, name: &str, schema: CollectionSchema) -> Result<(), BackendError> {
        schema
            .validate()
            .map_err(|e| BackendError::Rejected(e.to_string()))?;

        match self.collections.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(BackendError::CollectionExists(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let shards = (0..schema.shard_number).map(|_| RwLock::new(Shard::default())).collect();
                let data = Arc::new(CollectionData {
                    schema,
                    shards,
                    next_seq: AtomicU64::new(0),
                });
                let (tx, rx) = mpsc::channel(self.update_queue);
                tokio::spawn(run_update_worker(name.to_string(), data.clone(), rx));
                entry.insert(Collection {
                    data,
                    updates: tx,
                    created_at: Utc::now(),
                });
                info!(collection = name, "created collection");
                Ok(())
            }
        }
    }

    async fn delete_collection(&self, name: &str) -> Result<bool, BackendError> {
        let removed = self.collections.remove(name).is_some();
        if removed {
            info!(collection = name, "deleted collection");
        }
        Ok(removed)
    }

    async fn upsert(&self, name: &str, batch: PointBatch, wait: bool) -> Result<UpdateResult, BackendError> {
        let (data, updates) = self.sender(name)?;
        let points = Self::prepare(&data.schema, &batch)?;
        let operation_id = self.next_operation.fetch_add(1, AtomicOrdering::SeqCst);
        debug!(collection = name, operation_id, points = points.len(), wait, "upsert accepted");

        let (done_tx, done_rx, status) = if wait {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx), UpdateStatus::Completed)
        } else {
            (None, None, UpdateStatus::Acknowledged)
        };

        updates
            .send(UpdateOp {
                points,
                done: done_tx,
            })
            .await
            .map_err(|_| BackendError::CollectionNotFound(name.to_string()))?;

        if let Some(rx) = done_rx {
            rx.await.map_err(|_| {
                warn!(collection = name, operation_id, "collection dropped before update applied");
                BackendError::CollectionNotFound(name.to_string())
            })?;
        }

        Ok(UpdateResult {
            operation_id,
            status,
        })
    }

    async fn query(&self, name: &str, request: &QueryRequest) -> Result<Vec<ScoredPoint>, BackendError> {
        let data = self.data(name)?;
        let params = data.schema.vectors.get(request.using);

        if request.query.is_empty() {
            return Err(BackendError::Rejected("query has no token vectors".to_string()));
        }
        check_dimension(request.using, params.size, &request.query)?;
        if request.limit == 0 {
            return Ok(Vec::new());
        }

        let query = match params.distance {
            Distance::Cosine => request.query.normalized(),
            Distance::Dot => request.query.clone(),
        };
        let query_codes = params
            .quantization
            .map(|_| quantize_multivector(&query));

        let mut merged = Vec::new();
        for shard in &data.shards {
            merged.extend(
                self.search_shard(shard, request.using, &query, query_codes.as_deref(), request.limit)
                    .await,
            );
        }
        merged.sort_by(by_score_then_seq);
        merged.truncate(request.limit);

        let mut results = Vec::with_capacity(merged.len());
        for candidate in merged {
            let payload = if request.with_payload {
                let shard = data.shards[data.shard_for(candidate.id)].read().await;
                match shard.points.get(&candidate.id) {
                    Some(slot) => Some(slot.point.payload.decode()?),
                    None => None,
                }
            } else {
                None
            };
            results.push(ScoredPoint {
                id: candidate.id,
                score: candidate.score,
                payload,
            });
        }

        Ok(results)
    }

    async fn count(&self, name: &str) -> Result<usize, BackendError> {
        let data = self.data(name)?;
        Ok(count_points(&data).await)
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod schema;
pub mod storage;
pub mod types;
pub mod vector_ops;

pub use schema::{CollectionSchema, PayloadSchema, SchemaError, VectorParams};
pub use storage::{BackendError, PointBatch, QueryRequest, RetryBackend, RetryConfig, VectorBackend};
pub use types::{
    MultiVector, PagePayload, Payload, PointId, QueryRepresentations, Representations,
    ScoredPoint, UpdateResult, UpdateStatus, VectorField,
};

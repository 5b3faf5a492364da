// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::core::schema::{CollectionSchema, SchemaError};
use crate::core::storage::{BackendError, VectorBackend};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaOutcome {
    Created,
    /// An existing collection was dropped and created again.
    Recreated,
    /// Left untouched; its schema was not inspected.
    Existing,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompatibilityError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Creates the page collection with its three vector fields.
#[derive(Clone)]
pub struct SchemaManager {
    backend: Arc<dyn VectorBackend>,
    shard_number: u32,
}

impl SchemaManager {
    pub fn new(backend: Arc<dyn VectorBackend>) -> Self {
        Self {
            backend,
            shard_number: crate::core::schema::DEFAULT_SHARD_NUMBER,
        }
    }

    pub fn with_shards(mut self, shard_number: u32) -> Self {
        self.shard_number = shard_number;
        self
    }

    pub fn schema_for(&self, dim: usize) -> CollectionSchema {
        CollectionSchema::multi_representation(dim).with_shards(self.shard_number)
    }

    /// Make sure collection `name` exists.
    ///
    /// With `force_recreate` any existing collection is dropped first and all
    /// of its points are lost. Without it an existing collection is assumed
    /// compatible; use [`SchemaManager::check_compatible`] to verify.
    pub async fn ensure_schema(
        &self,
        name: &str,
        dim: usize,
        force_recreate: bool,
    ) -> Result<SchemaOutcome, BackendError> {
        let outcome = if force_recreate {
            if self.backend.delete_collection(name).await? {
                warn!(collection = name, "force-recreating collection, existing points are discarded");
                SchemaOutcome::Recreated
            } else {
                SchemaOutcome::Created
            }
        } else if self.backend.get_collection(name).await?.is_some() {
            info!(collection = name, "collection already exists, skipping creation");
            return Ok(SchemaOutcome::Existing);
        } else {
            SchemaOutcome::Created
        };

        self.backend.create_collection(name, self.schema_for(dim)).await?;
        info!(collection = name, dim, shards = self.shard_number, "collection ready");
        Ok(outcome)
    }

    pub async fn check_compatible(&self, name: &str, dim: usize) -> Result<(), CompatibilityError> {
        let schema = self
            .backend
            .get_collection(name)
            .await?
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        schema.check_compatible(dim)?;
        Ok(())
    }
}

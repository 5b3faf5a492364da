// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Environment configuration for indexing and retrieval.

use crate::client::{ClientConfig, HttpBackend};
use crate::core::schema::DEFAULT_SHARD_NUMBER;
use crate::core::storage::{BackendError, RetryBackend, RetryConfig, VectorBackend};
use crate::encoding::encoder::SharedEncoder;
use crate::encoding::pooling::{grid_side, ShapeError};
use crate::index::pipeline::{IndexingPipeline, DEFAULT_BATCH_SIZE};
use crate::index::schema_manager::SchemaManager;
use crate::index::search::PhasedSearch;
use crate::index::upsert::{AckMode, UpsertPipeline, UpsertQueue};
use std::env;
use std::sync::Arc;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{key} is not a valid value: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    pub backend_url: String,
    pub collection: String,
    pub image_seq_length: usize,
    pub dim: usize,
    pub batch_size: usize,
    pub shard_number: u32,
    pub top_k: usize,
    pub timeout: Duration,
    pub queue_capacity: usize,
    pub ack_mode: AckMode,
    pub page_base_url: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8080/api/v1".to_string(),
            collection: "pages".to_string(),
            image_seq_length: 1024,
            dim: 128,
            batch_size: DEFAULT_BATCH_SIZE,
            shard_number: DEFAULT_SHARD_NUMBER,
            top_k: 3,
            timeout: Duration::from_secs(60),
            queue_capacity: 16,
            ack_mode: AckMode::default(),
            page_base_url: "http://localhost:9000/pages".to_string(),
        }
    }
}

impl IndexConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            backend_url: lookup("INDEX_BACKEND_URL").unwrap_or(defaults.backend_url),
            collection: lookup("INDEX_COLLECTION").unwrap_or(defaults.collection),
            image_seq_length: parse_or(&lookup, "INDEX_IMAGE_SEQ_LENGTH", defaults.image_seq_length)?,
            dim: parse_or(&lookup, "INDEX_DIM", defaults.dim)?,
            batch_size: parse_or(&lookup, "INDEX_BATCH_SIZE", defaults.batch_size)?,
            shard_number: parse_or(&lookup, "INDEX_SHARDS", defaults.shard_number)?,
            top_k: parse_or(&lookup, "INDEX_TOP_K", defaults.top_k)?,
            timeout: Duration::from_secs(parse_or(&lookup, "INDEX_TIMEOUT_SECS", 60u64)?),
            queue_capacity: parse_or(&lookup, "INDEX_QUEUE_CAPACITY", defaults.queue_capacity)?,
            ack_mode: match lookup("INDEX_ACK_MODE") {
                Some(value) => parse_ack_mode(&value)?,
                None => defaults.ack_mode,
            },
            page_base_url: lookup("INDEX_PAGE_BASE_URL").unwrap_or(defaults.page_base_url),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if grid_side(self.image_seq_length).is_none() {
            return Err(ConfigError::Invalid(format!(
                "INDEX_IMAGE_SEQ_LENGTH must be a non-zero perfect square, got {}",
                self.image_seq_length
            )));
        }
        if self.dim == 0 {
            return Err(ConfigError::Invalid("INDEX_DIM must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("INDEX_BATCH_SIZE must be positive".to_string()));
        }
        if self.shard_number == 0 {
            return Err(ConfigError::Invalid("INDEX_SHARDS must be positive".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("INDEX_QUEUE_CAPACITY must be positive".to_string()));
        }
        if self.collection.is_empty() {
            return Err(ConfigError::Invalid("INDEX_COLLECTION must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.backend_url.clone()).with_timeout(self.timeout)
    }

    /// Connect to the configured index server, retrying transient failures
    /// of every later call.
    pub async fn connect(&self) -> Result<Arc<dyn VectorBackend>, BackendError> {
        let backend = HttpBackend::connect(self.client_config()).await?;
        Ok(Arc::new(RetryBackend::new(backend, RetryConfig::default().max_attempts)))
    }

    pub fn schema_manager(&self, backend: Arc<dyn VectorBackend>) -> SchemaManager {
        SchemaManager::new(backend).with_shards(self.shard_number)
    }

    pub fn upsert_pipeline(&self, backend: Arc<dyn VectorBackend>) -> UpsertPipeline {
        UpsertPipeline::new(backend, self.collection.clone(), self.ack_mode.clone())
    }

    pub fn upsert_queue(&self, backend: Arc<dyn VectorBackend>) -> UpsertQueue {
        self.upsert_pipeline(backend).into_queue(self.queue_capacity)
    }

    pub fn indexing_pipeline(
        &self,
        encoder: SharedEncoder,
        backend: Arc<dyn VectorBackend>,
    ) -> Result<IndexingPipeline, ShapeError> {
        Ok(IndexingPipeline::new(encoder, self.upsert_pipeline(backend), self.page_base_url.clone())?
            .with_batch_size(self.batch_size))
    }

    pub fn phased_search(&self, backend: Arc<dyn VectorBackend>) -> PhasedSearch {
        PhasedSearch::new(backend, self.collection.clone()).with_timeout(self.timeout)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

fn parse_ack_mode(value: &str) -> Result<AckMode, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "fire_and_forget" | "fire-and-forget" => Ok(AckMode::FireAndForget),
        "acknowledged" | "ack" => Ok(AckMode::Acknowledged(RetryConfig::default())),
        _ => Err(ConfigError::InvalidValue {
            key: "INDEX_ACK_MODE",
            value: value.to_string(),
        }),
    }
}

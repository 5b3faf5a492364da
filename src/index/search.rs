// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Phased search
//!
//! A search names the vector field it runs against, so a cheap pass over a
//! pooled field and a full-precision pass over `initial` go through the same
//! executor. Backend failures and timeouts are errors, never empty results.

use crate::core::storage::{BackendError, QueryRequest, VectorBackend};
use crate::core::types::{MultiVector, ScoredPoint, VectorField};
use crate::encoding::encoder::EncoderError;
use crate::encoding::query::{QueryError, QueryRepresentationBuilder};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("search backend failure: {0}")]
    Backend(#[from] BackendError),

    #[error("search timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub representation: VectorField,
    pub query_vectors: MultiVector,
    pub top_k: usize,
    /// Overrides the executor's default timeout.
    pub timeout: Option<Duration>,
}

impl SearchRequest {
    pub fn new(representation: VectorField, query_vectors: MultiVector, top_k: usize) -> Self {
        Self {
            representation,
            query_vectors,
            top_k,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Clone)]
pub struct PhasedSearch {
    backend: Arc<dyn VectorBackend>,
    collection: String,
    timeout: Duration,
}

impl PhasedSearch {
    pub fn new(backend: Arc<dyn VectorBackend>, collection: impl Into<String>) -> Self {
        Self {
            backend,
            collection: collection.into(),
            timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rank points of the collection against `request.query_vectors` on the
    /// requested field. Dropping the returned future cancels the call.
    pub async fn search(&self, request: SearchRequest) -> Result<Vec<ScoredPoint>, SearchError> {
        if request.query_vectors.is_empty() {
            return Err(SearchError::InvalidQuery("query has no token vectors".to_string()));
        }
        if request.top_k == 0 {
            return Ok(Vec::new());
        }

        let timeout = request.timeout.unwrap_or(self.timeout);
        let query = QueryRequest {
            using: request.representation,
            query: request.query_vectors,
            limit: request.top_k,
            with_payload: true,
        };

        debug!(
            collection = %self.collection,
            using = %query.using,
            tokens = query.query.len(),
            limit = query.limit,
            "searching"
        );

        match tokio::time::timeout(timeout, self.backend.query(&self.collection, &query)).await {
            Ok(Ok(points)) => Ok(points),
            Ok(Err(e)) => {
                warn!(collection = %self.collection, error = %e, "search failed");
                Err(SearchError::Backend(e))
            }
            Err(_) => {
                warn!(collection = %self.collection, ?timeout, "search timed out");
                Err(SearchError::Timeout(timeout))
            }
        }
    }

    /// Run independent searches concurrently; results keep request order.
    pub async fn search_many(&self, requests: Vec<SearchRequest>) -> Vec<Result<Vec<ScoredPoint>, SearchError>> {
        join_all(requests.into_iter().map(|r| self.search(r))).await
    }
}

/// Hits of a text query plus where the time went.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub hits: Vec<ScoredPoint>,
    pub encode_time: Duration,
    pub search_time: Duration,
}

impl Retrieval {
    pub fn total_time(&self) -> Duration {
        self.encode_time + self.search_time
    }
}

/// Text query in, ranked pages out.
#[derive(Clone)]
pub struct Retriever {
    builder: QueryRepresentationBuilder,
    search: PhasedSearch,
}

impl Retriever {
    pub fn new(builder: QueryRepresentationBuilder, search: PhasedSearch) -> Self {
        Self { builder, search }
    }

    pub async fn retrieve(&self, text: &str, field: VectorField, top_k: usize) -> Result<Retrieval, SearchError> {
        let start = Instant::now();
        let builder = self.builder.clone();
        let text_owned = text.to_string();
        let query = spawn_blocking(move || builder.build(&text_owned))
            .await
            .map_err(|e| QueryError::Encoder(EncoderError::Model(format!("encoder task failed: {}", e))))??;
        let encode_time = start.elapsed();

        let start = Instant::now();
        let hits = self
            .search
            .search(SearchRequest::new(field, query.for_field(field), top_k))
            .await?;
        let search_time = start.elapsed();

        info!(
            using = %field,
            hits = hits.len(),
            encode_ms = encode_time.as_secs_f64() * 1000.0,
            search_ms = search_time.as_secs_f64() * 1000.0,
            "retrieval finished"
        );

        Ok(Retrieval {
            hits,
            encode_time,
            search_time,
        })
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! [`VectorBackend`] over the REST surface of a remote index server.
//!
//! Requests are not retried here; wrap the backend in
//! [`RetryBackend`](crate::core::storage::RetryBackend) for that.

use crate::api::rest::{
    CollectionsResponse, CountResponse, DeleteResponse, ErrorKind, ErrorResponse, QueryResponse,
};
use crate::core::schema::CollectionSchema;
use crate::core::storage::{BackendError, PointBatch, QueryRequest, VectorBackend};
use crate::core::types::{ScoredPoint, UpdateResult};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base of the versioned API, e.g. `http://localhost:8080/api/v1`.
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Clone)]
pub struct HttpBackend {
    config: ClientConfig,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: ClientConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Connection(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Build a client and make sure the server answers.
    pub async fn connect(config: ClientConfig) -> Result<Self, BackendError> {
        let backend = Self::new(config)?;
        let collections = backend.list_collections().await?;
        info!(
            url = %backend.config.base_url,
            collections = collections.len(),
            "connected to index server"
        );
        Ok(backend)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn collection_url(&self, name: &str, suffix: &str) -> String {
        self.url(&format!("/collections/{}{}", name, suffix))
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Connection(e.to_string())
    }
}

/// Turn a non-success response into the matching backend error.
async fn error_from(response: Response, collection: Option<&str>) -> BackendError {
    let status = response.status();
    let body = response.json::<ErrorResponse>().await.ok();
    let message = body
        .as_ref()
        .map(|b| b.error.clone())
        .unwrap_or_else(|| format!("Unexpected status: {}", status));
    let kind = body.map(|b| b.kind);

    match (kind, status) {
        (Some(ErrorKind::NotFound), _) | (None, StatusCode::NOT_FOUND) => {
            BackendError::CollectionNotFound(collection.unwrap_or_default().to_string())
        }
        (Some(ErrorKind::Conflict), _) | (None, StatusCode::CONFLICT) => {
            BackendError::CollectionExists(collection.unwrap_or_default().to_string())
        }
        (Some(ErrorKind::Timeout), _) | (None, StatusCode::GATEWAY_TIMEOUT) => BackendError::Timeout,
        (Some(ErrorKind::Unavailable), _) | (None, StatusCode::SERVICE_UNAVAILABLE) => {
            BackendError::Connection(message)
        }
        _ => BackendError::Rejected(message),
    }
}

async fn parse<T: DeserializeOwned>(response: Response, collection: Option<&str>) -> Result<T, BackendError> {
    if !response.status().is_success() {
        return Err(error_from(response, collection).await);
    }
    response
        .json()
        .await
        .map_err(|e| BackendError::Serialization(format!("Failed to parse response: {}", e)))
}

#[async_trait]
impl VectorBackend for HttpBackend {
    async fn list_collections(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .client
            .get(self.url("/collections"))
            .send()
            .await
            .map_err(transport_error)?;
        let body: CollectionsResponse = parse(response, None).await?;
        Ok(body.collections)
    }

    async fn get_collection(&self, name: &str) -> Result<Option<CollectionSchema>, BackendError> {
        let response = self
            .client
            .get(self.collection_url(name, ""))
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        parse(response, Some(name)).await.map(Some)
    }

    async fn create_collection(&self, name: &str, schema: CollectionSchema) -> Result<(), BackendError> {
        let response = self
            .client
            .put(self.collection_url(name, ""))
            .json(&schema)
            .send()
            .await
            .map_err(transport_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from(response, Some(name)).await)
        }
    }

    async fn delete_collection(&self, name: &str) -> Result<bool, BackendError> {
        let response = self
            .client
            .delete(self.collection_url(name, ""))
            .send()
            .await
            .map_err(transport_error)?;
        let body: DeleteResponse = parse(response, Some(name)).await?;
        Ok(body.deleted)
    }

    async fn upsert(&self, name: &str, batch: PointBatch, wait: bool) -> Result<UpdateResult, BackendError> {
        debug!(collection = name, points = batch.len(), wait, "sending upsert");
        let response = self
            .client
            .put(self.collection_url(name, "/points"))
            .query(&[("wait", wait)])
            .json(&batch)
            .send()
            .await
            .map_err(transport_error)?;
        parse(response, Some(name)).await
    }

    async fn query(&self, name: &str, request: &QueryRequest) -> Result<Vec<ScoredPoint>, BackendError> {
        let response = self
            .client
            .post(self.collection_url(name, "/points/query"))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        let body: QueryResponse = parse(response, Some(name)).await?;
        debug!(collection = name, hits = body.points.len(), server_ms = body.search_time_ms, "query answered");
        Ok(body.points)
    }

    async fn count(&self, name: &str) -> Result<usize, BackendError> {
        let response = self
            .client
            .get(self.collection_url(name, "/points/count"))
            .send()
            .await
            .map_err(transport_error)?;
        let body: CountResponse = parse(response, Some(name)).await?;
        Ok(body.count)
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Page indexing driver: object names in, pooled points in the collection out.

use crate::core::types::{PagePayload, PointId, Representations};
use crate::encoding::encoder::{EncoderError, PageImage, SharedEncoder};
use crate::encoding::pooling::{PoolingTransformer, ShapeError};
use crate::index::upsert::{UpsertError, UpsertPipeline};
use ndarray::Axis;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::spawn_blocking;
use tracing::{debug, info};

pub const DEFAULT_BATCH_SIZE: usize = 2;
pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexingError {
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Upsert(#[from] UpsertError),
    #[error("encoder returned {actual} embeddings for {expected} images")]
    BatchSizeMismatch { expected: usize, actual: usize },
}

/// Where a page sits, derived from its object key `book/page_N.png`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDescriptor {
    pub object_name: String,
    pub book_name: String,
    pub page_number: i64,
}

impl PageDescriptor {
    /// The folder is the book name (`uncategorized` without one); the page
    /// number is the part between the first `_` and the extension, 0 when
    /// absent or not a number.
    pub fn from_object_name(object_name: &str) -> Self {
        let (book_name, file_name) = match object_name.rsplit_once('/') {
            Some((dir, file)) => (dir.to_string(), file),
            None => (UNCATEGORIZED.to_string(), object_name),
        };

        let page_number = file_name
            .split('_')
            .nth(1)
            .and_then(|rest| rest.split('.').next())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);

        Self {
            object_name: object_name.to_string(),
            book_name,
            page_number,
        }
    }

    pub fn page_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.object_name)
    }

    pub fn payload(&self, base_url: &str) -> PagePayload {
        PagePayload::new(self.book_name.clone(), self.page_number, self.page_url(base_url))
    }
}

/// Supplies extracted page text for the payload, if any.
pub type TextSource = Arc<dyn Fn(&PageDescriptor) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingReport {
    pub pages_indexed: usize,
    pub batches: usize,
    /// Id the next indexed page will get.
    pub next_id: PointId,
}

pub struct IndexingPipeline {
    encoder: SharedEncoder,
    pooling: PoolingTransformer,
    upserts: UpsertPipeline,
    page_base_url: String,
    batch_size: usize,
    next_id: PointId,
    text_source: Option<TextSource>,
}

impl IndexingPipeline {
    pub fn new(
        encoder: SharedEncoder,
        upserts: UpsertPipeline,
        page_base_url: impl Into<String>,
    ) -> Result<Self, ShapeError> {
        let pooling = PoolingTransformer::new(encoder.image_seq_length(), encoder.dim())?;
        Ok(Self {
            encoder,
            pooling,
            upserts,
            page_base_url: page_base_url.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            next_id: 0,
            text_source: None,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn starting_at(mut self, first_id: PointId) -> Self {
        self.next_id = first_id;
        self
    }

    pub fn with_text_source(mut self, source: TextSource) -> Self {
        self.text_source = Some(source);
        self
    }

    /// Encode, pool and upsert `pages` in batches, assigning sequential ids.
    /// Stops at the first failing batch; earlier batches stay indexed.
    pub async fn index_pages(&mut self, pages: &[PageImage]) -> Result<IndexingReport, IndexingError> {
        let mut report = IndexingReport {
            next_id: self.next_id,
            ..IndexingReport::default()
        };

        for chunk in pages.chunks(self.batch_size) {
            self.index_batch(chunk).await?;
            report.pages_indexed += chunk.len();
            report.batches += 1;
            report.next_id = self.next_id;
        }

        info!(
            collection = self.upserts.collection(),
            pages = report.pages_indexed,
            batches = report.batches,
            "indexing complete"
        );
        Ok(report)
    }

    /// Encoder inference and pooling for one batch, off the async workers.
    async fn encode_batch(&self, pages: &[PageImage]) -> Result<Vec<Representations>, IndexingError> {
        let encoder = self.encoder.clone();
        let pooling = self.pooling;
        let images = pages.to_vec();

        spawn_blocking(move || {
            let grid = encoder.encode_images(&images)?;
            let produced = grid.len_of(Axis(0));
            if produced != images.len() {
                return Err(IndexingError::BatchSizeMismatch {
                    expected: images.len(),
                    actual: produced,
                });
            }
            Ok(pooling.pool(grid.view())?.into_representations())
        })
        .await
        .map_err(|e| EncoderError::Model(format!("encoder task failed: {}", e)))?
    }

    async fn index_batch(&mut self, pages: &[PageImage]) -> Result<(), IndexingError> {
        let vectors = self.encode_batch(pages).await?;

        let ids: Vec<PointId> = (self.next_id..self.next_id + pages.len() as PointId).collect();
        let payloads = pages
            .iter()
            .map(|page| {
                let descriptor = PageDescriptor::from_object_name(&page.object_name);
                let mut payload = descriptor.payload(&self.page_base_url);
                if let Some(source) = &self.text_source {
                    payload.page_text = source(&descriptor);
                }
                payload.into_payload()
            })
            .collect();

        debug!(first_id = self.next_id, pages = pages.len(), "upserting page batch");
        self.upserts.upsert(ids, payloads, vectors).await?;
        self.next_id += pages.len() as PointId;
        Ok(())
    }
}

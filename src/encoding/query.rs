// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::core::types::QueryRepresentations;
use crate::encoding::encoder::{EncoderError, SharedEncoder};
use crate::encoding::pooling::{to_multivector, ShapeError};
use ndarray::{ArrayView2, Axis};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Builds the query-side representations. One query per call.
#[derive(Debug, Clone)]
pub struct QueryRepresentationBuilder {
    encoder: SharedEncoder,
}

impl QueryRepresentationBuilder {
    pub fn new(encoder: SharedEncoder) -> Self {
        Self { encoder }
    }

    pub fn build(&self, text: &str) -> Result<QueryRepresentations, QueryError> {
        debug!(query = text, "encoding query");
        let embedding = self.encoder.encode_query(text)?;
        let dim = self.encoder.dim();
        if embedding.ncols() != dim {
            return Err(ShapeError::DimensionMismatch {
                expected: dim,
                actual: embedding.ncols(),
            }
            .into());
        }
        Ok(Self::from_embedding(embedding.view())?)
    }

    /// `full` is the raw `(tokens, dim)` embedding, `mean_pool` its mean over
    /// tokens.
    pub fn from_embedding(embedding: ArrayView2<f32>) -> Result<QueryRepresentations, ShapeError> {
        let mean = embedding.mean_axis(Axis(0)).ok_or(ShapeError::EmptyQuery)?;
        if embedding.ncols() == 0 {
            return Err(ShapeError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        Ok(QueryRepresentations {
            full: to_multivector(embedding),
            mean_pool: mean.to_vec(),
        })
    }
}

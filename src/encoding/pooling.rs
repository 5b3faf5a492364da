// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Patch-grid pooling
//!
//! The encoder emits `image_seq_length` grid tokens followed by a few special
//! tokens for each image. The grid tokens form a square `side × side` layout;
//! pooling collapses one grid axis (max or mean), keeping one token per grid
//! row, then appends the untouched special tokens.

use crate::core::types::{MultiVector, Representations};
use ndarray::{concatenate, s, Array3, ArrayView2, ArrayView3, Axis};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeError {
    #[error("image_seq_length {0} is not a perfect square")]
    NotSquare(usize),
    #[error("batch dimension is zero")]
    EmptyBatch,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("sequence has {actual} tokens, fewer than image_seq_length {expected}")]
    TooFewTokens { expected: usize, actual: usize },
    #[error("query embedding has no tokens")]
    EmptyQuery,
    #[error("tensor layout error: {0}")]
    Layout(String),
}

impl From<ndarray::ShapeError> for ShapeError {
    fn from(e: ndarray::ShapeError) -> Self {
        ShapeError::Layout(e.to_string())
    }
}

/// Exact integer square root, `None` for zero and non-squares.
pub fn grid_side(image_seq_length: usize) -> Option<usize> {
    let side = (image_seq_length as f64).sqrt().round() as usize;
    (side > 0 && side.checked_mul(side) == Some(image_seq_length)).then_some(side)
}

/// The three representations of a pooled batch, batch index first.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledBatch {
    /// `(batch, total_tokens, dim)`
    pub full: Array3<f32>,
    /// `(batch, grid_side + num_special, dim)`
    pub max_pool: Array3<f32>,
    /// `(batch, grid_side + num_special, dim)`
    pub mean_pool: Array3<f32>,
}

impl PooledBatch {
    pub fn batch_size(&self) -> usize {
        self.full.len_of(Axis(0))
    }

    /// Split into one [`Representations`] bundle per image, in batch order.
    pub fn into_representations(self) -> Vec<Representations> {
        (0..self.batch_size())
            .map(|i| Representations {
                full: to_multivector(self.full.index_axis(Axis(0), i)),
                max_pool: to_multivector(self.max_pool.index_axis(Axis(0), i)),
                mean_pool: to_multivector(self.mean_pool.index_axis(Axis(0), i)),
            })
            .collect()
    }
}

pub(crate) fn to_multivector(matrix: ArrayView2<f32>) -> MultiVector {
    MultiVector::from(
        matrix
            .outer_iter()
            .map(|row| row.to_vec())
            .collect::<Vec<_>>(),
    )
}

/// Stateless pooling transform for a fixed grid geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolingTransformer {
    image_seq_length: usize,
    grid_side: usize,
    dim: usize,
}

impl PoolingTransformer {
    pub fn new(image_seq_length: usize, dim: usize) -> Result<Self, ShapeError> {
        let grid_side = grid_side(image_seq_length).ok_or(ShapeError::NotSquare(image_seq_length))?;
        Ok(Self {
            image_seq_length,
            grid_side,
            dim,
        })
    }

    pub fn image_seq_length(&self) -> usize {
        self.image_seq_length
    }

    pub fn grid_side(&self) -> usize {
        self.grid_side
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Pooled sequence length for a grid carrying `num_special` special tokens.
    pub fn pooled_len(&self, num_special: usize) -> usize {
        self.grid_side + num_special
    }

    /// Pool a `(batch, total_tokens, dim)` grid. Fails for the whole batch on
    /// any shape violation.
    pub fn pool(&self, grid: ArrayView3<f32>) -> Result<PooledBatch, ShapeError> {
        let (batch, total_tokens, dim) = grid.dim();
        if batch == 0 {
            return Err(ShapeError::EmptyBatch);
        }
        if dim != self.dim {
            return Err(ShapeError::DimensionMismatch {
                expected: self.dim,
                actual: dim,
            });
        }
        if total_tokens < self.image_seq_length {
            return Err(ShapeError::TooFewTokens {
                expected: self.image_seq_length,
                actual: total_tokens,
            });
        }

        let special = grid.slice(s![.., self.image_seq_length.., ..]);
        let content = grid
            .slice(s![.., ..self.image_seq_length, ..])
            .to_owned()
            .into_shape_with_order((batch, self.grid_side, self.grid_side, dim))?;

        let max_rows = content.fold_axis(Axis(2), f32::NEG_INFINITY, |&acc, &x| acc.max(x));
        let mean_rows = content
            .mean_axis(Axis(2))
            .ok_or(ShapeError::NotSquare(self.image_seq_length))?;

        let max_pool = concatenate(Axis(1), &[max_rows.view(), special])?;
        let mean_pool = concatenate(Axis(1), &[mean_rows.view(), special])?;

        Ok(PooledBatch {
            full: grid.to_owned(),
            max_pool,
            mean_pool,
        })
    }
}

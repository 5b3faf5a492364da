// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod encoder;
pub mod pooling;
pub mod query;

pub use encoder::{EncoderError, PageImage, PatchEncoder, SharedEncoder};
pub use pooling::{PooledBatch, PoolingTransformer, ShapeError};
pub use query::{QueryError, QueryRepresentationBuilder};

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use ndarray::{Array2, Array3};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncoderError {
    #[error("Failed to decode image '{0}'")]
    InvalidImage(String),
    #[error("Encoder failure: {0}")]
    Model(String),
}

/// Raw page image as fetched from object storage.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    /// Object key, e.g. `textbook2/page_14.png`.
    pub object_name: String,
    pub bytes: Vec<u8>,
}

impl PageImage {
    pub fn new(object_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            object_name: object_name.into(),
            bytes,
        }
    }
}

/// Vision-language encoder producing patch and query embeddings.
///
/// Calls are synchronous; batching is the only parallelism on this side.
pub trait PatchEncoder: Send + Sync {
    /// Number of grid tokens per image, excluding trailing special tokens.
    fn image_seq_length(&self) -> usize;

    fn dim(&self) -> usize;

    /// `(batch, total_tokens, dim)` patch embeddings for `images`.
    fn encode_images(&self, images: &[PageImage]) -> Result<Array3<f32>, EncoderError>;

    /// `(tokens, dim)` embeddings for one query string.
    fn encode_query(&self, text: &str) -> Result<Array2<f32>, EncoderError>;
}

/// Handle to the process-wide encoder. Loaded once by the owner and cloned
/// into every component that encodes; never mutated afterwards.
#[derive(Clone)]
pub struct SharedEncoder(Arc<dyn PatchEncoder>);

impl SharedEncoder {
    pub fn new<E: PatchEncoder + 'static>(encoder: E) -> Self {
        SharedEncoder(Arc::new(encoder))
    }

    pub fn from_arc(encoder: Arc<dyn PatchEncoder>) -> Self {
        SharedEncoder(encoder)
    }
}

impl Deref for SharedEncoder {
    type Target = dyn PatchEncoder;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for SharedEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEncoder")
            .field("image_seq_length", &self.0.image_seq_length())
            .field("dim", &self.0.dim())
            .finish()
    }
}

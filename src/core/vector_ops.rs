// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::core::types::MultiVector;
use std::cmp::Ordering;

pub fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot_product_scalar(a, b) / (mag_a * mag_b)
}

/// Late-interaction score: every query token is matched with its best
/// document token and the per-token maxima are summed.
///
/// Both sides are expected to be normalized already when cosine semantics
/// are wanted. An empty document scores 0.
pub fn max_sim(query: &MultiVector, document: &MultiVector) -> f32 {
    if document.is_empty() {
        return 0.0;
    }
    query
        .rows()
        .iter()
        .map(|q| {
            document
                .rows()
                .iter()
                .map(|d| dot_product_scalar(q, d))
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .sum()
}

/// Sign-bit packing of one token vector, one bit per component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryVector {
    words: Vec<u64>,
    dim: usize,
}

impl BinaryVector {
    pub fn quantize(vector: &[f32]) -> Self {
        let mut words = vec![0u64; vector.len().div_ceil(64)];
        for (i, &x) in vector.iter().enumerate() {
            if x > 0.0 {
                words[i / 64] |= 1 << (i % 64);
            }
        }
        BinaryVector {
            words,
            dim: vector.len(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn hamming(&self, other: &Self) -> u32 {
        self.words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Similarity in `[-1, 1]` approximating the cosine of the originals.
    pub fn similarity(&self, other: &Self) -> f32 {
        if self.dim == 0 {
            return 0.0;
        }
        1.0 - 2.0 * self.hamming(other) as f32 / self.dim as f32
    }
}

pub fn quantize_multivector(mv: &MultiVector) -> Vec<BinaryVector> {
    mv.rows().iter().map(|r| BinaryVector::quantize(r)).collect()
}

/// MaxSim over binary-quantized tokens; used to preselect candidates before
/// rescoring with the original vectors.
pub fn quantized_max_sim(query: &[BinaryVector], document: &[BinaryVector]) -> f32 {
    if document.is_empty() {
        return 0.0;
    }
    query
        .iter()
        .map(|q| {
            document
                .iter()
                .map(|d| q.similarity(d))
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .sum()
}

/// Indices of the `k` highest scores, best first. Equal scores keep their
/// input order.
pub fn top_k_indices(scores: &[f32], k: usize) -> Vec<usize> {
    let mut indexed_scores: Vec<(usize, f32)> = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| (i, score))
        .collect();

    indexed_scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    indexed_scores.iter().take(k).map(|(i, _)| *i).collect()
}

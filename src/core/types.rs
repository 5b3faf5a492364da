// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type PointId = u64;

/// Free-form point payload, stored as a JSON object.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A sequence of token vectors sharing one dimensionality.
///
/// Serialized as a plain nested list so it can be posted as-is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiVector {
    rows: Vec<Vec<f32>>,
}

impl MultiVector {
    /// Build a multi-vector, rejecting ragged rows.
    pub fn new(rows: Vec<Vec<f32>>) -> Result<Self, &'static str> {
        if let Some(first) = rows.first() {
            let dim = first.len();
            if dim == 0 {
                return Err("Token vectors cannot be empty");
            }
            if rows.iter().any(|r| r.len() != dim) {
                return Err("All token vectors must share one dimension");
            }
        }
        Ok(MultiVector { rows })
    }

    pub fn single(vector: Vec<f32>) -> Self {
        MultiVector { rows: vec![vector] }
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<f32>> {
        self.rows
    }

    /// Number of token vectors.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Dimensionality of the token vectors, `None` when empty.
    pub fn dimension(&self) -> Option<usize> {
        self.rows.first().map(|r| r.len())
    }

    /// Copy with every token vector scaled to unit length.
    /// Zero vectors are left untouched.
    pub fn normalized(&self) -> Self {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mag = row.iter().map(|x| x * x).sum::<f32>().sqrt();
                if mag == 0.0 {
                    row.clone()
                } else {
                    row.iter().map(|x| x / mag).collect()
                }
            })
            .collect();
        MultiVector { rows }
    }
}

impl From<Vec<Vec<f32>>> for MultiVector {
    fn from(rows: Vec<Vec<f32>>) -> Self {
        MultiVector { rows }
    }
}

/// The three vector representations stored for every indexed page.
///
/// All three come from one patch grid and are written together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Representations {
    /// Untouched `(total_tokens, dim)` matrix.
    #[serde(rename = "initial")]
    pub full: MultiVector,
    /// Special tokens plus the per-row maximum over the grid.
    #[serde(rename = "max_pooling")]
    pub max_pool: MultiVector,
    /// Special tokens plus the per-row mean over the grid.
    #[serde(rename = "mean_pooling")]
    pub mean_pool: MultiVector,
}

impl Representations {
    pub fn get(&self, field: VectorField) -> &MultiVector {
        match field {
            VectorField::Initial => &self.full,
            VectorField::MaxPooling => &self.max_pool,
            VectorField::MeanPooling => &self.mean_pool,
        }
    }
}

/// Query-side representations. There is no max-pooled query variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRepresentations {
    pub full: MultiVector,
    pub mean_pool: Vec<f32>,
}

impl QueryRepresentations {
    /// Query vectors to compare against `field`: the full token matrix for
    /// `initial`, the mean-pooled vector as a single token otherwise.
    pub fn for_field(&self, field: VectorField) -> MultiVector {
        match field {
            VectorField::Initial => self.full.clone(),
            VectorField::MaxPooling | VectorField::MeanPooling => {
                MultiVector::single(self.mean_pool.clone())
            }
        }
    }
}

/// Named vector fields of a page collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorField {
    Initial,
    MaxPooling,
    MeanPooling,
}

impl VectorField {
    pub const ALL: [VectorField; 3] = [
        VectorField::Initial,
        VectorField::MaxPooling,
        VectorField::MeanPooling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VectorField::Initial => "initial",
            VectorField::MaxPooling => "max_pooling",
            VectorField::MeanPooling => "mean_pooling",
        }
    }
}

impl fmt::Display for VectorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" | "full" => Ok(VectorField::Initial),
            "max_pooling" | "max_pool" => Ok(VectorField::MaxPooling),
            "mean_pooling" | "mean_pool" => Ok(VectorField::MeanPooling),
            other => Err(format!("Unknown vector field: {}", other)),
        }
    }
}

/// Typed view of the payload stored alongside each page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagePayload {
    pub book_name: String,
    pub page_number: i64,
    pub page_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_text: Option<String>,
}

impl PagePayload {
    pub fn new(book_name: impl Into<String>, page_number: i64, page_url: impl Into<String>) -> Self {
        Self {
            book_name: book_name.into(),
            page_number,
            page_url: page_url.into(),
            page_text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.page_text = Some(text.into());
        self
    }

    pub fn into_payload(self) -> Payload {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Payload::new(),
        }
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(payload.clone()))
    }
}

/// One point of a search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: PointId,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl ScoredPoint {
    pub fn page(&self) -> Option<PagePayload> {
        self.payload
            .as_ref()
            .and_then(|p| PagePayload::from_payload(p).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Accepted; will be applied asynchronously.
    Acknowledged,
    /// Applied and visible to search.
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub operation_id: u64,
    pub status: UpdateStatus,
}

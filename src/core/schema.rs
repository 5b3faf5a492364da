// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Collection schema definition and payload validation
//!
//! A page collection carries three named multi-vector fields plus an optional
//! payload schema that incoming points are validated against.

use crate::core::types::{Payload, VectorField};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub const DEFAULT_SHARD_NUMBER: u32 = 4;
pub const DEFAULT_MEMMAP_THRESHOLD: usize = 20_000;

/// Error types for schema validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid type for field '{field}': expected {expected}, found {found}")]
    InvalidType {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Incompatible collection schema: {0}")]
    Incompatible(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    Cosine,
    Dot,
}

/// How a multi-vector query is compared against a multi-vector record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiVectorComparator {
    MaxSim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiVectorConfig {
    pub comparator: MultiVectorComparator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationConfig {
    /// One bit per component; `always_ram` keeps the codes resident even when
    /// the original vectors live on disk.
    Binary { always_ram: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorParams {
    pub size: usize,
    pub distance: Distance,
    pub multivector: MultiVectorConfig,
    #[serde(default)]
    pub on_disk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<QuantizationConfig>,
}

impl VectorParams {
    /// Cosine, MaxSim, on-disk, unquantized.
    pub fn pooled(size: usize) -> Self {
        Self {
            size,
            distance: Distance::Cosine,
            multivector: MultiVectorConfig {
                comparator: MultiVectorComparator::MaxSim,
            },
            on_disk: true,
            quantization: None,
        }
    }

    /// Same as [`VectorParams::pooled`] with binary quantization kept in RAM.
    pub fn quantized(size: usize) -> Self {
        Self {
            quantization: Some(QuantizationConfig::Binary { always_ram: true }),
            ..Self::pooled(size)
        }
    }
}

/// The closed set of vector fields of a page collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedVectors {
    pub initial: VectorParams,
    pub max_pooling: VectorParams,
    pub mean_pooling: VectorParams,
}

impl NamedVectors {
    pub fn get(&self, field: VectorField) -> &VectorParams {
        match field {
            VectorField::Initial => &self.initial,
            VectorField::MaxPooling => &self.max_pooling,
            VectorField::MeanPooling => &self.mean_pooling,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub vectors: NamedVectors,
    pub shard_number: u32,
    pub on_disk_payload: bool,
    pub memmap_threshold: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_schema: Option<PayloadSchema>,
}

impl CollectionSchema {
    /// Schema for page collections: the full-token field is binary-quantized
    /// since it is by far the largest, pooled fields stay full precision.
    pub fn multi_representation(dim: usize) -> Self {
        Self {
            vectors: NamedVectors {
                initial: VectorParams::quantized(dim),
                max_pooling: VectorParams::pooled(dim),
                mean_pooling: VectorParams::pooled(dim),
            },
            shard_number: DEFAULT_SHARD_NUMBER,
            on_disk_payload: true,
            memmap_threshold: DEFAULT_MEMMAP_THRESHOLD,
            payload_schema: Some(PayloadSchema::page()),
        }
    }

    pub fn with_shards(mut self, shard_number: u32) -> Self {
        self.shard_number = shard_number;
        self
    }

    /// Dimension shared by all fields, `None` if they disagree.
    pub fn dimension(&self) -> Option<usize> {
        let dim = self.vectors.initial.size;
        VectorField::ALL
            .iter()
            .all(|f| self.vectors.get(*f).size == dim)
            .then_some(dim)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.shard_number == 0 {
            return Err(SchemaError::Incompatible(
                "shard_number must be at least 1".to_string(),
            ));
        }
        for field in VectorField::ALL {
            if self.vectors.get(field).size == 0 {
                return Err(SchemaError::Incompatible(format!(
                    "field '{}' has zero dimension",
                    field
                )));
            }
        }
        Ok(())
    }

    /// Check that an existing collection can hold `dim`-dimensional page
    /// representations searched with MaxSim.
    pub fn check_compatible(&self, dim: usize) -> Result<(), SchemaError> {
        for field in VectorField::ALL {
            let params = self.vectors.get(field);
            if params.size != dim {
                return Err(SchemaError::Incompatible(format!(
                    "field '{}' has dimension {}, expected {}",
                    field, params.size, dim
                )));
            }
            if params.multivector.comparator != MultiVectorComparator::MaxSim {
                return Err(SchemaError::Incompatible(format!(
                    "field '{}' does not use the MaxSim comparator",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Field type definition for payload schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
}

impl FieldType {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Integer => "Integer",
            FieldType::Number => "Number",
            FieldType::Boolean => "Boolean",
        }
    }

    /// Validate a value against this field type
    pub fn validate_value(&self, field_name: &str, value: &Value) -> Result<(), SchemaError> {
        // Null values are allowed for all types (optional fields)
        if value.is_null() {
            return Ok(());
        }

        let ok = match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
        };

        if ok {
            Ok(())
        } else {
            Err(SchemaError::InvalidType {
                field: field_name.to_string(),
                expected: self.type_name().to_string(),
                found: get_value_type_name(value).to_string(),
            })
        }
    }
}

/// Payload schema definition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PayloadSchema {
    pub fields: BTreeMap<String, FieldType>,
    pub required: BTreeSet<String>,
}

impl PayloadSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// `book_name`, `page_number` and `page_url` are required;
    /// `page_text` is optional.
    pub fn page() -> Self {
        let mut schema = Self::new();
        schema.add_field("book_name", FieldType::String, true);
        schema.add_field("page_number", FieldType::Integer, true);
        schema.add_field("page_url", FieldType::String, true);
        schema.add_field("page_text", FieldType::String, false);
        schema
    }

    pub fn add_field(&mut self, name: impl Into<String>, field_type: FieldType, required: bool) {
        let name = name.into();
        self.fields.insert(name.clone(), field_type);
        if required {
            self.required.insert(name);
        }
    }

    pub fn validate(&self, payload: &Payload) -> Result<(), SchemaError> {
        for required_field in &self.required {
            if !payload.contains_key(required_field) {
                return Err(SchemaError::MissingField(required_field.clone()));
            }
        }

        for (field_name, field_type) in &self.fields {
            if let Some(value) = payload.get(field_name) {
                field_type.validate_value(field_name, value)?;
            }
        }

        Ok(())
    }
}

fn get_value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

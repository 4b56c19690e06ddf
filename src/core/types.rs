// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

use crate::error::ValidationError;

pub type Metadata = BTreeMap<String, MetadataValue>;

/// A metadata value: a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<MetadataValue>),
}

impl MetadataValue {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, MetadataValue::List(_))
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            MetadataValue::Bool(b) => JsonValue::Bool(*b),
            MetadataValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            MetadataValue::String(s) => JsonValue::String(s.clone()),
            MetadataValue::List(items) => {
                JsonValue::Array(items.iter().map(MetadataValue::to_json).collect())
            }
        }
    }

    /// Converts a loosely typed JSON value, rejecting nulls, objects and nested lists.
    pub fn from_json(value: &JsonValue) -> Result<Self, ValidationError> {
        match value {
            JsonValue::Array(items) => {
                let mut list = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let scalar = Self::scalar_from_json(item).map_err(|reason| {
                        ValidationError::new(format!("[{}]", i), reason)
                    })?;
                    list.push(scalar);
                }
                Ok(MetadataValue::List(list))
            }
            other => Self::scalar_from_json(other).map_err(|reason| ValidationError::new("", reason)),
        }
    }

    fn scalar_from_json(value: &JsonValue) -> Result<Self, String> {
        match value {
            JsonValue::Bool(b) => Ok(MetadataValue::Bool(*b)),
            JsonValue::Number(n) => n
                .as_f64()
                .map(MetadataValue::Number)
                .ok_or_else(|| format!("number {} is not representable", n)),
            JsonValue::String(s) => Ok(MetadataValue::String(s.clone())),
            JsonValue::Null => Err("null is not a supported metadata value".to_string()),
            JsonValue::Array(_) => Err("nested lists are not supported".to_string()),
            JsonValue::Object(_) => Err("objects are not supported as metadata values".to_string()),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(values: Vec<T>) -> Self {
        MetadataValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Converts a JSON object into metadata.
pub fn metadata_from_json(value: &JsonValue) -> Result<Metadata, ValidationError> {
    let map = value
        .as_object()
        .ok_or_else(|| ValidationError::new("", format!("expected a mapping, found {}", json_type_name(value))))?;
    let mut metadata = Metadata::new();
    for (key, value) in map {
        let converted = MetadataValue::from_json(value).map_err(|e| e.within(key))?;
        metadata.insert(key.clone(), converted);
    }
    Ok(metadata)
}

pub fn metadata_to_json(metadata: &Metadata) -> JsonValue {
    JsonValue::Object(
        metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

pub(crate) fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "mapping",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseValues {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseValues {
    pub fn new(indices: Vec<u32>, values: Vec<f32>) -> Self {
        Self { indices, values }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn dot(&self, other: &SparseValues) -> f32 {
        let lookup: HashMap<u32, f32> = other
            .indices
            .iter()
            .copied()
            .zip(other.values.iter().copied())
            .collect();
        self.indices
            .iter()
            .zip(self.values.iter())
            .filter_map(|(i, v)| lookup.get(i).map(|o| o * v))
            .sum()
    }
}

/// The canonical record every input shape normalizes to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    /// Dense values; empty when the record only carries sparse values.
    #[serde(default)]
    pub values: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_values: Option<SparseValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            values,
            sparse_values: None,
            metadata: None,
        }
    }

    pub fn sparse(id: impl Into<String>, sparse_values: SparseValues) -> Self {
        Self {
            id: id.into(),
            values: Vec::new(),
            sparse_values: Some(sparse_values),
            metadata: None,
        }
    }

    pub fn with_sparse_values(mut self, sparse_values: SparseValues) -> Self {
        self.sparse_values = Some(sparse_values);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn has_dense(&self) -> bool {
        !self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub id: String,
    pub score: f32,
    /// Present only when values were requested.
    pub values: Option<Vec<f32>>,
    pub sparse_values: Option<SparseValues>,
    /// Present only when metadata was requested.
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub id: String,
    pub values: Option<Vec<f32>>,
    pub sparse_values: Option<SparseValues>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertSummary {
    pub upserted_count: u32,
    pub batch_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceStats {
    pub vector_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub namespaces: HashMap<String, NamespaceStats>,
    pub dimension: u32,
    pub index_fullness: f32,
    pub total_vector_count: u64,
}

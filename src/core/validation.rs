// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Validation rules for dense values, sparse values and metadata.
//!
//! These checks are pure: they run before anything is sent, and every path
//! that carries vector data (upsert, query, update) goes through them.

use std::collections::HashSet;

use crate::core::types::{Metadata, MetadataValue, SparseValues, VectorRecord};
use crate::error::ValidationError;

/// Bounds the pipeline knows about the target index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueLimits {
    /// Dense dimension of the index, when known.
    pub dimension: Option<usize>,
    /// Exclusive upper bound for sparse indices, when known.
    pub sparse_dimension: Option<u32>,
}

impl ValueLimits {
    pub fn new(dimension: Option<usize>, sparse_dimension: Option<u32>) -> Self {
        Self {
            dimension,
            sparse_dimension,
        }
    }
}

pub fn validate_dense(values: &[f32], dimension: Option<usize>) -> Result<(), ValidationError> {
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(ValidationError::new(
            "values",
            format!("value at index {} is not finite ({})", i, values[i]),
        ));
    }
    if let Some(dimension) = dimension {
        if !values.is_empty() && values.len() != dimension {
            return Err(ValidationError::new(
                "values",
                format!(
                    "expected {} dimensions, found {}",
                    dimension,
                    values.len()
                ),
            ));
        }
    }
    Ok(())
}

impl SparseValues {
    pub fn validate(&self, bound: Option<u32>) -> Result<(), ValidationError> {
        if self.indices.len() != self.values.len() {
            return Err(ValidationError::new(
                "sparse_values",
                format!(
                    "indices and values must have the same length ({} != {})",
                    self.indices.len(),
                    self.values.len()
                ),
            ));
        }

        let mut seen = HashSet::with_capacity(self.indices.len());
        for &index in &self.indices {
            if !seen.insert(index) {
                return Err(ValidationError::new(
                    "sparse_values.indices",
                    format!("duplicate index {}", index),
                ));
            }
            if let Some(bound) = bound {
                if index >= bound {
                    return Err(ValidationError::new(
                        "sparse_values.indices",
                        format!("index {} is out of bounds for dimension {}", index, bound),
                    ));
                }
            }
        }

        if let Some(i) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(ValidationError::new(
                "sparse_values.values",
                format!("value at index {} is not finite ({})", i, self.values[i]),
            ));
        }
        Ok(())
    }
}

pub fn validate_metadata(metadata: &Metadata) -> Result<(), ValidationError> {
    for (key, value) in metadata {
        if key.is_empty() {
            return Err(ValidationError::new("metadata", "keys must not be empty"));
        }
        let field = format!("metadata.{}", key);
        match value {
            MetadataValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_scalar() {
                        return Err(ValidationError::new(
                            format!("{}[{}]", field, i),
                            "nested lists are not supported",
                        ));
                    }
                    validate_number(item, &field)?;
                }
            }
            scalar => validate_number(scalar, &field)?,
        }
    }
    Ok(())
}

fn validate_number(value: &MetadataValue, field: &str) -> Result<(), ValidationError> {
    match value {
        MetadataValue::Number(n) if !n.is_finite() => Err(ValidationError::new(
            field,
            format!("number {} is not finite", n),
        )),
        _ => Ok(()),
    }
}

pub fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::new("id", "must not be empty"));
    }
    Ok(())
}

/// Checks every invariant of a canonical record.
pub fn validate_record(record: &VectorRecord, limits: ValueLimits) -> Result<(), ValidationError> {
    validate_id(&record.id)?;

    let has_sparse = record
        .sparse_values
        .as_ref()
        .map_or(false, |s| !s.is_empty());
    if !record.has_dense() && !has_sparse {
        return Err(ValidationError::new(
            "values",
            "a vector must carry values, sparse_values, or both",
        ));
    }

    validate_dense(&record.values, limits.dimension)?;
    if let Some(sparse) = &record.sparse_values {
        sparse.validate(limits.sparse_dimension)?;
    }
    if let Some(metadata) = &record.metadata {
        validate_metadata(metadata)?;
    }
    Ok(())
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Conversion of the accepted input shapes into canonical [`VectorRecord`]s.

use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;

use crate::core::types::{json_type_name, metadata_from_json, Metadata, SparseValues, VectorRecord};
use crate::core::validation::{validate_record, ValueLimits};
use crate::error::ValidationError;

const VECTOR_KEYS: &[&str] = &["id", "values", "sparse_values", "metadata"];
const SPARSE_KEYS: &[&str] = &["indices", "values"];

/// Every shape a caller may hand to `upsert`.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorInput {
    /// `(id, values)`
    Pair(String, Vec<f32>),
    /// `(id, values, metadata)`
    Triple(String, Vec<f32>, Metadata),
    /// A loosely typed mapping with keys `id`, `values`, `sparse_values`, `metadata`.
    Mapping(JsonValue),
    /// An already canonical record.
    Record(VectorRecord),
}

impl<S: Into<String>> From<(S, Vec<f32>)> for VectorInput {
    fn from((id, values): (S, Vec<f32>)) -> Self {
        VectorInput::Pair(id.into(), values)
    }
}

impl<S: Into<String>> From<(S, Vec<f32>, Metadata)> for VectorInput {
    fn from((id, values, metadata): (S, Vec<f32>, Metadata)) -> Self {
        VectorInput::Triple(id.into(), values, metadata)
    }
}

impl From<JsonValue> for VectorInput {
    fn from(value: JsonValue) -> Self {
        VectorInput::Mapping(value)
    }
}

impl From<VectorRecord> for VectorInput {
    fn from(record: VectorRecord) -> Self {
        VectorInput::Record(record)
    }
}

/// Normalizes a single input. `position` is reported in any error.
pub fn normalize(
    input: VectorInput,
    position: usize,
    limits: ValueLimits,
) -> Result<VectorRecord, ValidationError> {
    let record = match input {
        VectorInput::Pair(id, values) => VectorRecord::new(id, values),
        VectorInput::Triple(id, values, metadata) => {
            VectorRecord::new(id, values).with_metadata(metadata)
        }
        VectorInput::Mapping(value) => record_from_mapping(&value).map_err(|e| e.at(position))?,
        VectorInput::Record(record) => record,
    };
    validate_record(&record, limits).map_err(|e| e.at(position))?;
    Ok(record)
}

/// Normalizes a mixed sequence, failing on the first bad element.
///
/// Ids must be unique across the sequence; a repeat is reported at the
/// position of its second occurrence.
pub fn normalize_all<I, V>(inputs: I, limits: ValueLimits) -> Result<Vec<VectorRecord>, ValidationError>
where
    I: IntoIterator<Item = V>,
    V: Into<VectorInput>,
{
    let inputs = inputs.into_iter();
    let mut records = Vec::with_capacity(inputs.size_hint().0);
    let mut seen = HashSet::new();

    for (position, input) in inputs.enumerate() {
        let record = normalize(input.into(), position, limits)?;
        if !seen.insert(record.id.clone()) {
            return Err(ValidationError::new(
                "id",
                format!("duplicate id '{}' in the same request", record.id),
            )
            .at(position));
        }
        records.push(record);
    }
    Ok(records)
}

fn record_from_mapping(value: &JsonValue) -> Result<VectorRecord, ValidationError> {
    let map = as_mapping(value, "")?;
    reject_unknown_keys(map, VECTOR_KEYS)?;

    let id = match map.get("id") {
        Some(JsonValue::String(id)) => id.clone(),
        Some(other) => return Err(wrong_type("id", "string", other)),
        None => return Err(ValidationError::new("id", "missing required key")),
    };

    let values = match map.get("values") {
        Some(value) => float_list(value).map_err(|e| e.within("values"))?,
        None => Vec::new(),
    };

    let sparse_values = map
        .get("sparse_values")
        .map(|value| sparse_from_mapping(value).map_err(|e| e.within("sparse_values")))
        .transpose()?;

    let metadata = map
        .get("metadata")
        .map(|value| metadata_from_json(value).map_err(|e| e.within("metadata")))
        .transpose()?;

    Ok(VectorRecord {
        id,
        values,
        sparse_values,
        metadata,
    })
}

fn sparse_from_mapping(value: &JsonValue) -> Result<SparseValues, ValidationError> {
    let map = as_mapping(value, "")?;
    reject_unknown_keys(map, SPARSE_KEYS)?;

    let indices = match map.get("indices") {
        Some(JsonValue::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| {
                        ValidationError::new(
                            "indices",
                            format!("element {} must be a non-negative 32-bit integer, found {}", i, item),
                        )
                    })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(wrong_type("indices", "list of integers", other)),
        None => return Err(ValidationError::new("indices", "missing required key")),
    };

    let values = match map.get("values") {
        Some(value) => float_list(value).map_err(|e| e.within("values"))?,
        None => return Err(ValidationError::new("values", "missing required key")),
    };

    Ok(SparseValues { indices, values })
}

fn float_list(value: &JsonValue) -> Result<Vec<f32>, ValidationError> {
    match value {
        JsonValue::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_f64().map(|f| f as f32).ok_or_else(|| {
                    ValidationError::new(
                        "",
                        format!("element {} must be a number, found {}", i, json_type_name(item)),
                    )
                })
            })
            .collect(),
        other => Err(wrong_type("", "list of floats", other)),
    }
}

fn as_mapping<'a>(value: &'a JsonValue, field: &str) -> Result<&'a Map<String, JsonValue>, ValidationError> {
    value
        .as_object()
        .ok_or_else(|| wrong_type(field, "mapping", value))
}

fn reject_unknown_keys(map: &Map<String, JsonValue>, allowed: &[&str]) -> Result<(), ValidationError> {
    let mut unknown: Vec<&str> = map
        .keys()
        .map(String::as_str)
        .filter(|key| !allowed.contains(key))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    Err(ValidationError::new(
        unknown[0],
        format!(
            "unexpected keys {:?}; allowed keys are {:?}",
            unknown, allowed
        ),
    ))
}

fn wrong_type(field: &str, expected: &str, found: &JsonValue) -> ValidationError {
    ValidationError::new(
        field,
        format!("expected a {}, found {}", expected, json_type_name(found)),
    )
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Metadata filter expressions
//!
//! Parses and validates the MongoDB-style filter language accepted by the index
//! service, and evaluates it against record metadata for in-process transports.
//! Supports equality, comparison, set membership, existence and boolean
//! combinators.

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::core::types::{Metadata, MetadataValue};

/// Errors that can occur during filter parsing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid filter syntax: {0}")]
    InvalidSyntax(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Type mismatch for '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn from_operator(op: &str) -> Option<Self> {
        match op {
            "$eq" => Some(CompareOp::Eq),
            "$ne" => Some(CompareOp::Ne),
            "$gt" => Some(CompareOp::Gt),
            "$gte" => Some(CompareOp::Gte),
            "$lt" => Some(CompareOp::Lt),
            "$lte" => Some(CompareOp::Lte),
            _ => None,
        }
    }

    pub fn operator(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Ne => "$ne",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
        }
    }

    fn is_ordering(&self) -> bool {
        matches!(
            self,
            CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte
        )
    }
}

/// Metadata filter for query, delete and stats requests
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilter {
    /// `{ "field": value }` or `{ "field": { "$op": value } }`
    Compare {
        field: String,
        op: CompareOp,
        value: JsonValue,
    },

    /// `{ "field": { "$in": [..] } }`
    In { field: String, values: Vec<JsonValue> },

    /// `{ "field": { "$nin": [..] } }`
    NotIn { field: String, values: Vec<JsonValue> },

    /// `{ "field": { "$exists": bool } }`
    Exists { field: String, exists: bool },

    /// `{ "$and": [..] }`
    And(Vec<MetadataFilter>),

    /// `{ "$or": [..] }`
    Or(Vec<MetadataFilter>),
}

impl MetadataFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        MetadataFilter::Compare {
            field: field.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    /// Parse a filter from JSON
    ///
    /// # Examples
    ///
    /// ```
    /// use serde_json::json;
    /// use vector_index_client::core::metadata_filter::MetadataFilter;
    ///
    /// let filter = MetadataFilter::from_json(&json!({"genre": "drama"})).unwrap();
    ///
    /// let filter = MetadataFilter::from_json(&json!({
    ///     "$and": [
    ///         {"genre": {"$in": ["drama", "comedy"]}},
    ///         {"year": {"$gte": 2019}}
    ///     ]
    /// })).unwrap();
    /// ```
    pub fn from_json(value: &JsonValue) -> Result<Self, FilterError> {
        let map = match value {
            JsonValue::Object(map) => map,
            _ => {
                return Err(FilterError::InvalidSyntax(
                    "Filter must be a JSON object".to_string(),
                ))
            }
        };
        if map.is_empty() {
            return Err(FilterError::InvalidSyntax(
                "Filter must not be empty".to_string(),
            ));
        }

        let mut filters = Vec::with_capacity(map.len());
        for (key, value) in map {
            let filter = match key.as_str() {
                "$and" => MetadataFilter::And(Self::parse_list(key, value)?),
                "$or" => MetadataFilter::Or(Self::parse_list(key, value)?),
                op if op.starts_with('$') => {
                    return Err(FilterError::UnsupportedOperator(op.to_string()))
                }
                field => Self::parse_field(field, value)?,
            };
            filters.push(filter);
        }

        if filters.len() == 1 {
            Ok(filters.remove(0))
        } else {
            Ok(MetadataFilter::And(filters))
        }
    }

    fn parse_list(op: &str, value: &JsonValue) -> Result<Vec<Self>, FilterError> {
        match value {
            JsonValue::Array(items) if !items.is_empty() => {
                items.iter().map(Self::from_json).collect()
            }
            _ => Err(FilterError::InvalidSyntax(format!(
                "{} must be a non-empty array",
                op
            ))),
        }
    }

    fn parse_field(field: &str, value: &JsonValue) -> Result<Self, FilterError> {
        let ops = match value {
            JsonValue::Object(ops) => ops,
            JsonValue::Array(_) => {
                return Err(FilterError::InvalidSyntax(format!(
                    "Array value for field '{}' - use $in to match any of several values",
                    field
                )))
            }
            JsonValue::Null => {
                return Err(FilterError::InvalidSyntax(format!(
                    "Null value for field '{}'",
                    field
                )))
            }
            scalar => {
                return Ok(MetadataFilter::Compare {
                    field: field.to_string(),
                    op: CompareOp::Eq,
                    value: scalar.clone(),
                })
            }
        };

        if ops.is_empty() {
            return Err(FilterError::InvalidSyntax(format!(
                "Empty object for field '{}' - must specify a value or operator",
                field
            )));
        }

        let mut filters = Vec::with_capacity(ops.len());
        for (op, operand) in ops {
            filters.push(Self::parse_operator(field, op, operand)?);
        }
        if filters.len() == 1 {
            Ok(filters.remove(0))
        } else {
            Ok(MetadataFilter::And(filters))
        }
    }

    fn parse_operator(field: &str, op: &str, operand: &JsonValue) -> Result<Self, FilterError> {
        if let Some(compare) = CompareOp::from_operator(op) {
            if compare.is_ordering() && !operand.is_number() {
                return Err(type_mismatch(field, "number", operand));
            }
            if !is_scalar(operand) {
                return Err(type_mismatch(field, "scalar", operand));
            }
            return Ok(MetadataFilter::Compare {
                field: field.to_string(),
                op: compare,
                value: operand.clone(),
            });
        }

        match op {
            "$in" | "$nin" => {
                let values = match operand {
                    JsonValue::Array(values) if values.iter().all(is_scalar) => values.clone(),
                    _ => return Err(type_mismatch(field, "array of scalars", operand)),
                };
                if op == "$in" {
                    Ok(MetadataFilter::In {
                        field: field.to_string(),
                        values,
                    })
                } else {
                    Ok(MetadataFilter::NotIn {
                        field: field.to_string(),
                        values,
                    })
                }
            }
            "$exists" => match operand {
                JsonValue::Bool(exists) => Ok(MetadataFilter::Exists {
                    field: field.to_string(),
                    exists: *exists,
                }),
                _ => Err(type_mismatch(field, "bool", operand)),
            },
            other if other.starts_with('$') => {
                Err(FilterError::UnsupportedOperator(other.to_string()))
            }
            other => Err(FilterError::InvalidSyntax(format!(
                "Nested field '{}' under '{}' is not supported",
                other, field
            ))),
        }
    }

    /// Canonical wire form of the filter.
    pub fn to_json(&self) -> JsonValue {
        match self {
            MetadataFilter::Compare { field, op, value } => {
                field_op(field, op.operator(), value.clone())
            }
            MetadataFilter::In { field, values } => {
                field_op(field, "$in", JsonValue::Array(values.clone()))
            }
            MetadataFilter::NotIn { field, values } => {
                field_op(field, "$nin", JsonValue::Array(values.clone()))
            }
            MetadataFilter::Exists { field, exists } => {
                field_op(field, "$exists", JsonValue::Bool(*exists))
            }
            MetadataFilter::And(filters) => combinator("$and", filters),
            MetadataFilter::Or(filters) => combinator("$or", filters),
        }
    }

    /// Check if metadata matches this filter
    ///
    /// List-valued fields match `$eq`/`$in` when any element matches, and
    /// `$ne`/`$nin` when no element does.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            MetadataFilter::Compare { field, op, value } => match metadata.get(field) {
                Some(MetadataValue::List(items)) => match op {
                    CompareOp::Eq => items.iter().any(|item| scalar_eq(item, value)),
                    CompareOp::Ne => !items.iter().any(|item| scalar_eq(item, value)),
                    _ => false,
                },
                Some(scalar) => compare_scalar(scalar, *op, value),
                None => *op == CompareOp::Ne,
            },

            MetadataFilter::In { field, values } => match metadata.get(field) {
                Some(found) => any_element(found, |item| values.iter().any(|v| scalar_eq(item, v))),
                None => false,
            },

            MetadataFilter::NotIn { field, values } => match metadata.get(field) {
                Some(found) => {
                    !any_element(found, |item| values.iter().any(|v| scalar_eq(item, v)))
                }
                None => true,
            },

            MetadataFilter::Exists { field, exists } => metadata.contains_key(field) == *exists,

            // Empty AND matches everything (vacuous truth)
            MetadataFilter::And(filters) => filters.iter().all(|f| f.matches(metadata)),

            MetadataFilter::Or(filters) => filters.iter().any(|f| f.matches(metadata)),
        }
    }
}

impl From<MetadataFilter> for JsonValue {
    fn from(filter: MetadataFilter) -> Self {
        filter.to_json()
    }
}

fn field_op(field: &str, op: &str, operand: JsonValue) -> JsonValue {
    let mut inner = Map::new();
    inner.insert(op.to_string(), operand);
    let mut outer = Map::new();
    outer.insert(field.to_string(), JsonValue::Object(inner));
    JsonValue::Object(outer)
}

fn combinator(op: &str, filters: &[MetadataFilter]) -> JsonValue {
    let mut map = Map::new();
    map.insert(
        op.to_string(),
        JsonValue::Array(filters.iter().map(MetadataFilter::to_json).collect()),
    );
    JsonValue::Object(map)
}

fn is_scalar(value: &JsonValue) -> bool {
    matches!(
        value,
        JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::String(_)
    )
}

fn type_mismatch(field: &str, expected: &str, actual: &JsonValue) -> FilterError {
    FilterError::TypeMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: crate::core::types::json_type_name(actual).to_string(),
    }
}

fn any_element(value: &MetadataValue, pred: impl Fn(&MetadataValue) -> bool) -> bool {
    match value {
        MetadataValue::List(items) => items.iter().any(pred),
        scalar => pred(scalar),
    }
}

fn scalar_eq(item: &MetadataValue, value: &JsonValue) -> bool {
    match (item, value) {
        (MetadataValue::String(a), JsonValue::String(b)) => a == b,
        (MetadataValue::Bool(a), JsonValue::Bool(b)) => a == b,
        (MetadataValue::Number(a), JsonValue::Number(b)) => b.as_f64() == Some(*a),
        _ => false,
    }
}

fn compare_scalar(item: &MetadataValue, op: CompareOp, value: &JsonValue) -> bool {
    match op {
        CompareOp::Eq => scalar_eq(item, value),
        CompareOp::Ne => !scalar_eq(item, value),
        ordering => match (item, value.as_f64()) {
            (MetadataValue::Number(a), Some(b)) => match ordering {
                CompareOp::Gt => *a > b,
                CompareOp::Gte => *a >= b,
                CompareOp::Lt => *a < b,
                CompareOp::Lte => *a <= b,
                _ => false,
            },
            _ => false,
        },
    }
}

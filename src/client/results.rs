// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Conversion of wire responses into typed results.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::error;

use crate::core::types::{
    metadata_from_json, FetchResult, IndexStats, Metadata, NamespaceStats, QueryResult,
};
use crate::error::{ClientError, ClientResult};
use crate::transport::wire::{
    DescribeIndexStatsResponse, FetchResponse, QueryResponse, UpsertResponse,
};

/// Builds query results in server rank order.
///
/// Values and metadata are only present when they were requested; a match
/// that was asked for metadata but carries none gets an empty map.
pub fn assemble_query(
    response: QueryResponse,
    include_values: bool,
    include_metadata: bool,
) -> ClientResult<Vec<QueryResult>> {
    response
        .matches
        .into_iter()
        .map(|scored| {
            let metadata = if include_metadata {
                Some(wire_metadata(&scored.id, scored.metadata.as_ref())?.unwrap_or_default())
            } else {
                None
            };
            let (values, sparse_values) = if include_values {
                (dense_values(scored.values), scored.sparse_values)
            } else {
                (None, None)
            };
            Ok(QueryResult {
                id: scored.id,
                score: scored.score,
                values,
                sparse_values,
                metadata,
            })
        })
        .collect()
}

/// Merges per-batch fetch responses into a map that follows `requested`.
///
/// Requested ids the server did not return are omitted. Ids the server
/// returned without being asked are appended afterwards.
pub fn assemble_fetch(
    requested: &[String],
    responses: Vec<FetchResponse>,
) -> ClientResult<IndexMap<String, FetchResult>> {
    let mut returned = IndexMap::new();
    for response in responses {
        for (key, vector) in response.vectors {
            let id = if vector.id.is_empty() { key } else { vector.id.clone() };
            let metadata = wire_metadata(&id, vector.metadata.as_ref())?;
            let result = FetchResult {
                id: id.clone(),
                values: dense_values(vector.values),
                sparse_values: vector.sparse_values,
                metadata,
            };
            returned.insert(id, result);
        }
    }

    let mut ordered = IndexMap::with_capacity(returned.len());
    for id in requested {
        if let Some(result) = returned.shift_remove(id) {
            ordered.insert(id.clone(), result);
        }
    }
    ordered.extend(returned);
    Ok(ordered)
}

/// Sparse-only vectors carry no dense values.
fn dense_values(values: Vec<f32>) -> Option<Vec<f32>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Checks one upsert acknowledgement against the size of the batch it answers.
pub fn check_upsert_ack(expected: usize, response: &UpsertResponse) -> ClientResult<u32> {
    if response.upserted_count as usize != expected {
        error!(
            expected,
            acknowledged = response.upserted_count,
            "Upsert acknowledgement does not match batch size"
        );
        return Err(ClientError::Protocol(format!(
            "server acknowledged {} vectors for a batch of {}",
            response.upserted_count, expected
        )));
    }
    Ok(response.upserted_count)
}

pub fn assemble_stats(response: DescribeIndexStatsResponse) -> IndexStats {
    IndexStats {
        namespaces: response
            .namespaces
            .into_iter()
            .map(|(name, summary)| {
                (
                    name,
                    NamespaceStats {
                        vector_count: summary.vector_count,
                    },
                )
            })
            .collect(),
        dimension: response.dimension,
        index_fullness: response.index_fullness,
        total_vector_count: response.total_vector_count,
    }
}

fn wire_metadata(id: &str, metadata: Option<&JsonValue>) -> ClientResult<Option<Metadata>> {
    match metadata {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => metadata_from_json(value).map(Some).map_err(|e| {
            error!(id, error = %e, "Unsupported metadata in response");
            ClientError::Protocol(format!("vector '{}' has unsupported metadata: {}", id, e))
        }),
    }
}

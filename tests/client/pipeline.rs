// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vector_index_client::transport::wire::*;
use vector_index_client::*;

use super::{init_tracing, memory_index};

fn config() -> ClientConfig {
    ClientConfig::default().with_dimension(4).with_batch_size(2)
}

#[tokio::test]
async fn test_upsert_then_fetch_round_trips_values_and_metadata() {
    init_tracing();
    let (index, _transport) = memory_index(config());

    let summary = index
        .upsert(
            vec![json!({"id": "v1", "values": [0.1, 0.2, 0.3, 0.4], "metadata": {"genre": "drama"}})],
            None,
        )
        .await
        .unwrap();
    assert_eq!(summary.upserted_count, 1);
    assert_eq!(summary.batch_count, 1);

    let fetched = index.fetch(&["v1"], None).await.unwrap();
    let v1 = &fetched["v1"];
    assert_eq!(v1.values, Some(vec![0.1, 0.2, 0.3, 0.4]));
    assert_eq!(
        v1.metadata.as_ref().unwrap()["genre"],
        MetadataValue::from("drama")
    );
}

#[tokio::test]
async fn test_mixed_shapes_upsert_in_batches() {
    let (index, transport) = memory_index(config());

    let mut metadata = Metadata::new();
    metadata.insert("year".to_string(), MetadataValue::from(2020));

    let inputs: Vec<VectorInput> = vec![
        ("a", vec![1.0, 0.0, 0.0, 0.0]).into(),
        ("b", vec![0.0, 1.0, 0.0, 0.0], metadata).into(),
        json!({"id": "c", "values": [0.0, 0.0, 1.0, 0.0]}).into(),
        VectorRecord::new("d", vec![0.0, 0.0, 0.0, 1.0])
            .with_sparse_values(SparseValues::new(vec![10], vec![0.5]))
            .into(),
        json!({"id": "e", "sparse_values": {"indices": [1, 2], "values": [0.3, 0.7]}}).into(),
    ];

    let summary = index.upsert(inputs, Some("mixed")).await.unwrap();
    assert_eq!(summary.upserted_count, 5);
    assert_eq!(summary.batch_count, 3);
    assert_eq!(transport.calls().upsert, 3);
    assert_eq!(transport.len("mixed"), 5);
}

#[tokio::test]
async fn test_invalid_element_fails_whole_call_without_network() {
    let (index, transport) = memory_index(config());

    let err = index
        .upsert(
            vec![
                json!({"id": "ok", "values": [0.1, 0.2, 0.3, 0.4]}),
                json!({"id": "bad"}),
            ],
            None,
        )
        .await
        .unwrap_err();

    match err {
        ClientError::Validation(e) => {
            assert_eq!(e.position, Some(1));
            assert_eq!(e.field, "values");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(transport.calls().total(), 0);
    assert!(transport.is_empty());
}

#[tokio::test]
async fn test_dimension_mismatch_is_caught_before_sending() {
    let (index, transport) = memory_index(config());
    let err = index
        .upsert(vec![("short", vec![0.1, 0.2, 0.3])], None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("position 0"));
    assert_eq!(transport.calls().total(), 0);
}

#[tokio::test]
async fn test_query_include_flags() {
    let (index, _transport) = memory_index(config());
    index
        .upsert(
            vec![
                json!({"id": "a", "values": [1.0, 0.0, 0.0, 0.0], "metadata": {"genre": "drama"}}),
                json!({"id": "b", "values": [0.0, 1.0, 0.0, 0.0]}),
            ],
            None,
        )
        .await
        .unwrap();

    let bare = index
        .query(2)
        .values(vec![1.0, 0.1, 0.0, 0.0])
        .send()
        .await
        .unwrap();
    assert_eq!(bare.len(), 2);
    assert_eq!(bare[0].id, "a");
    assert!(bare[0].score > bare[1].score);
    assert!(bare.iter().all(|m| m.values.is_none() && m.metadata.is_none()));

    let full = index
        .query(1)
        .values(vec![1.0, 0.1, 0.0, 0.0])
        .include_values(true)
        .include_metadata(true)
        .send()
        .await
        .unwrap();
    assert_eq!(full[0].values, Some(vec![1.0, 0.0, 0.0, 0.0]));
    assert_eq!(
        full[0].metadata.as_ref().unwrap()["genre"],
        MetadataValue::from("drama")
    );
}

#[tokio::test]
async fn test_query_with_id_and_vector_is_rejected_without_call() {
    let (index, transport) = memory_index(config());
    let err = index
        .query_by_id("a", 3)
        .values(vec![1.0, 0.0, 0.0, 0.0])
        .send()
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Validation(ref e) if e.field == "id"));
    assert_eq!(transport.calls().total(), 0);
}

#[tokio::test]
async fn test_query_by_id_keeps_the_queried_vector() {
    let (index, _transport) = memory_index(config());
    index
        .upsert(
            vec![
                ("a", vec![1.0, 0.0, 0.0, 0.0]),
                ("b", vec![0.9, 0.1, 0.0, 0.0]),
                ("c", vec![0.0, 0.0, 1.0, 0.0]),
            ],
            None,
        )
        .await
        .unwrap();

    let matches = index.query_by_id("a", 2).send().await.unwrap();
    let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_query_with_filter() {
    let (index, _transport) = memory_index(config());
    index
        .upsert(
            vec![
                json!({"id": "a", "values": [1.0, 0.0, 0.0, 0.0], "metadata": {"genre": "comedy"}}),
                json!({"id": "b", "values": [0.5, 0.5, 0.0, 0.0], "metadata": {"genre": "drama", "year": 2019}}),
                json!({"id": "c", "values": [0.0, 1.0, 0.0, 0.0], "metadata": {"genre": "drama", "year": 2023}}),
            ],
            None,
        )
        .await
        .unwrap();

    let filter = MetadataFilter::from_json(&json!({
        "$and": [{"genre": "drama"}, {"year": {"$lt": 2020}}]
    }))
    .unwrap();
    let matches = index
        .query(10)
        .values(vec![1.0, 0.0, 0.0, 0.0])
        .filter(filter)
        .send()
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, "b");
}

#[tokio::test]
async fn test_fetch_across_batches_follows_requested_order() {
    let (index, transport) = memory_index(config());
    let inputs: Vec<(String, Vec<f32>)> = (0..7)
        .map(|i| (format!("v{}", i), vec![i as f32, 1.0, 0.0, 0.0]))
        .collect();
    index.upsert(inputs, None).await.unwrap();

    let requested = ["v6", "v0", "missing", "v3", "v5"];
    let fetched = index.fetch(&requested, None).await.unwrap();
    let ids: Vec<&str> = fetched.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["v6", "v0", "v3", "v5"]);
    assert_eq!(transport.calls().fetch, 3);
}

#[tokio::test]
async fn test_update_merges_metadata_and_replaces_values() {
    let (index, _transport) = memory_index(config());
    index
        .upsert(
            vec![json!({"id": "v1", "values": [0.1, 0.2, 0.3, 0.4], "metadata": {"genre": "drama"}})],
            None,
        )
        .await
        .unwrap();

    let mut metadata = Metadata::new();
    metadata.insert("year".to_string(), MetadataValue::from(2021));
    index
        .update(
            "v1",
            VectorUpdate::default()
                .values(vec![0.4, 0.3, 0.2, 0.1])
                .set_metadata(metadata),
            None,
        )
        .await
        .unwrap();

    let fetched = index.fetch(&["v1"], None).await.unwrap();
    let v1 = &fetched["v1"];
    assert_eq!(v1.values, Some(vec![0.4, 0.3, 0.2, 0.1]));
    let metadata = v1.metadata.as_ref().unwrap();
    assert_eq!(metadata["genre"], MetadataValue::from("drama"));
    assert_eq!(metadata["year"], MetadataValue::Number(2021.0));
}

#[tokio::test]
async fn test_update_without_fields_is_rejected() {
    let (index, transport) = memory_index(config());
    let err = index
        .update("v1", VectorUpdate::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(transport.calls().total(), 0);
}

fn validation_field(err: ClientError) -> String {
    match err {
        ClientError::Validation(e) => e.field,
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_query_values_are_validated_before_any_call() {
    let (index, transport) = memory_index(config().with_sparse_dimension(100));
    index
        .upsert(vec![("a", vec![1.0, 0.0, 0.0, 0.0])], None)
        .await
        .unwrap();
    let before = transport.calls().total();

    let err = index
        .query(3)
        .values(vec![f32::NAN, 0.0, 0.0, 0.0])
        .send()
        .await
        .unwrap_err();
    assert_eq!(validation_field(err), "values");

    let err = index
        .query(3)
        .sparse_values(SparseValues::new(vec![3, 3], vec![0.5, 0.5]))
        .send()
        .await
        .unwrap_err();
    assert_eq!(validation_field(err), "sparse_values.indices");

    let err = index
        .query(3)
        .sparse_values(SparseValues::new(vec![100], vec![0.5]))
        .send()
        .await
        .unwrap_err();
    assert_eq!(validation_field(err), "sparse_values.indices");

    let err = index
        .query(3)
        .sparse_values(SparseValues::new(vec![1], vec![f32::INFINITY]))
        .send()
        .await
        .unwrap_err();
    assert_eq!(validation_field(err), "sparse_values.values");

    assert_eq!(transport.calls().total(), before);
}

#[tokio::test]
async fn test_query_with_empty_sparse_values_is_rejected() {
    let (index, transport) = memory_index(config());
    index
        .upsert(vec![("a", vec![1.0, 0.0, 0.0, 0.0])], None)
        .await
        .unwrap();
    let before = transport.calls().total();

    let err = index
        .query(3)
        .sparse_values(SparseValues::default())
        .send()
        .await
        .unwrap_err();
    assert_eq!(validation_field(err), "values");

    let err = index
        .query(3)
        .values(vec![])
        .sparse_values(SparseValues::new(vec![], vec![]))
        .send()
        .await
        .unwrap_err();
    assert_eq!(validation_field(err), "values");

    assert_eq!(transport.calls().total(), before);

    // Empty dense values alongside real sparse values are dropped, not rejected.
    let matches = index
        .query(3)
        .values(vec![])
        .sparse_values(SparseValues::new(vec![1], vec![1.0]))
        .send()
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
}

#[tokio::test]
async fn test_update_values_are_validated_before_any_call() {
    let (index, transport) = memory_index(config().with_sparse_dimension(100));

    let err = index
        .update(
            "v1",
            VectorUpdate::default().values(vec![1.0, f32::NAN, 0.0, 0.0]),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(validation_field(err), "values");

    let err = index
        .update(
            "v1",
            VectorUpdate::default().sparse_values(SparseValues::new(vec![7], vec![f32::NEG_INFINITY])),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(validation_field(err), "sparse_values.values");

    let err = index
        .update(
            "v1",
            VectorUpdate::default().sparse_values(SparseValues::new(vec![2, 2], vec![1.0, 1.0])),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(validation_field(err), "sparse_values.indices");

    let err = index
        .update("v1", VectorUpdate::default().sparse_values(SparseValues::default()), None)
        .await
        .unwrap_err();
    assert_eq!(validation_field(err), "update");

    assert_eq!(transport.calls().total(), 0);
}

#[tokio::test]
async fn test_delete_selectors() {
    let (index, transport) = memory_index(config());
    index
        .upsert(
            vec![
                json!({"id": "a", "values": [1.0, 0.0, 0.0, 0.0], "metadata": {"genre": "drama"}}),
                json!({"id": "b", "values": [0.0, 1.0, 0.0, 0.0], "metadata": {"genre": "comedy"}}),
                json!({"id": "c", "values": [0.0, 0.0, 1.0, 0.0], "metadata": {"genre": "comedy"}}),
            ],
            Some("ns"),
        )
        .await
        .unwrap();

    let both = DeleteSelector {
        ids: Some(vec!["a".to_string()]),
        delete_all: true,
        ..Default::default()
    };
    assert!(matches!(
        index.delete(both, Some("ns")).await,
        Err(ClientError::Validation(_))
    ));
    assert!(matches!(
        index.delete(DeleteSelector::default(), Some("ns")).await,
        Err(ClientError::Validation(_))
    ));
    assert_eq!(transport.calls().delete, 0);

    index.delete_ids(&["a"], Some("ns")).await.unwrap();
    assert_eq!(transport.len("ns"), 2);

    index
        .delete_by_filter(MetadataFilter::eq("genre", "comedy"), Some("ns"))
        .await
        .unwrap();
    assert_eq!(transport.len("ns"), 0);

    index.upsert(vec![("z", vec![1.0, 1.0, 1.0, 1.0])], Some("ns")).await.unwrap();
    index.delete_all(Some("ns")).await.unwrap();
    assert_eq!(transport.len("ns"), 0);
}

#[tokio::test]
async fn test_describe_index_stats() {
    let (index, _transport) = memory_index(config());
    index
        .upsert(vec![("a", vec![1.0, 0.0, 0.0, 0.0]), ("b", vec![0.0, 1.0, 0.0, 0.0])], Some("one"))
        .await
        .unwrap();
    index
        .upsert(vec![json!({"id": "c", "values": [0.0, 0.0, 1.0, 0.0], "metadata": {"genre": "drama"}})], Some("two"))
        .await
        .unwrap();

    let stats = index.describe_index_stats(None).await.unwrap();
    assert_eq!(stats.total_vector_count, 3);
    assert_eq!(stats.dimension, 4);
    assert_eq!(stats.namespaces["one"].vector_count, 2);
    assert_eq!(stats.namespaces["two"].vector_count, 1);

    let filtered = index
        .describe_index_stats(Some(MetadataFilter::eq("genre", "drama")))
        .await
        .unwrap();
    assert_eq!(filtered.total_vector_count, 1);
}

#[tokio::test]
async fn test_transport_errors_are_retried_when_configured() {
    let transport = Arc::new(MemoryTransport::new(Some(4)));
    let config = config().with_retry(RetryPolicy {
        max_retries: 2,
        backoff: Duration::from_millis(1),
        retry_non_idempotent: false,
    });
    let index = Index::new("retry", config, transport.clone()).unwrap();

    transport.fail_next_upsert_calls(2, ClientError::transport(RpcCode::Unavailable, "down"));
    let summary = index
        .upsert(vec![("a", vec![1.0, 0.0, 0.0, 0.0])], None)
        .await
        .unwrap();
    assert_eq!(summary.upserted_count, 1);
    assert_eq!(transport.calls().upsert, 3);
}

#[tokio::test]
async fn test_service_errors_are_not_retried() {
    let transport = Arc::new(MemoryTransport::new(Some(4)));
    let config = config().with_retry(RetryPolicy {
        max_retries: 3,
        backoff: Duration::from_millis(1),
        retry_non_idempotent: true,
    });
    let index = Index::new("retry", config, transport.clone()).unwrap();

    transport.fail_next_upsert_calls(1, ClientError::service(RpcCode::ResourceExhausted, "quota"));
    let err = index
        .upsert(vec![("a", vec![1.0, 0.0, 0.0, 0.0])], None)
        .await
        .unwrap_err();
    match err {
        ClientError::Aggregate(aggregate) => {
            assert!(matches!(
                aggregate.failures[0].cause,
                ClientError::Service { status: RpcCode::ResourceExhausted, .. }
            ));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(transport.calls().upsert, 1);
}

/// Acknowledges fewer vectors than it was sent.
struct ShortAckTransport;

#[async_trait]
impl Transport for ShortAckTransport {
    async fn upsert(&self, request: UpsertRequest) -> ClientResult<UpsertResponse> {
        Ok(UpsertResponse {
            upserted_count: request.vectors.len().saturating_sub(1) as u32,
        })
    }

    async fn query(&self, _request: QueryRequest) -> ClientResult<QueryResponse> {
        Ok(QueryResponse::default())
    }

    async fn fetch(&self, _request: FetchRequest) -> ClientResult<FetchResponse> {
        Ok(FetchResponse::default())
    }

    async fn update(&self, _request: UpdateRequest) -> ClientResult<()> {
        Ok(())
    }

    async fn delete(&self, _request: DeleteRequest) -> ClientResult<()> {
        Ok(())
    }

    async fn describe_index_stats(
        &self,
        _request: DescribeIndexStatsRequest,
    ) -> ClientResult<DescribeIndexStatsResponse> {
        Ok(DescribeIndexStatsResponse::default())
    }
}

#[tokio::test]
async fn test_short_acknowledgement_is_a_protocol_error() {
    let index = Index::new("short", config(), Arc::new(ShortAckTransport)).unwrap();
    let err = index
        .upsert(vec![("a", vec![1.0, 0.0, 0.0, 0.0]), ("b", vec![0.0, 1.0, 0.0, 0.0])], None)
        .await
        .unwrap_err();
    match err {
        ClientError::Aggregate(aggregate) => {
            assert_eq!(aggregate.failed_indices(), vec![0]);
            assert!(matches!(aggregate.failures[0].cause, ClientError::Protocol(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

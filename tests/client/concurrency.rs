// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use vector_index_client::*;

use super::init_tracing;

fn random_vectors(prefix: &str, count: usize, dimension: usize) -> Vec<(String, Vec<f32>)> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let values = (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();
            (format!("{}-{}", prefix, i), values)
        })
        .collect()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_batches_never_exceed_max_concurrency() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new(Some(8)).with_latency(Duration::from_millis(5)));
    let config = ClientConfig::default()
        .with_dimension(8)
        .with_batch_size(2)
        .with_max_concurrency(3);
    let index = Index::new("stress", config, transport.clone()).unwrap();

    let first = index.clone();
    let second = index.clone();
    let (a, b) = tokio::join!(
        first.upsert(random_vectors("a", 60, 8), None),
        second.upsert(random_vectors("b", 60, 8), None)
    );

    assert_eq!(a.unwrap().batch_count, 30);
    assert_eq!(b.unwrap().upserted_count, 60);
    assert!(transport.peak_in_flight() <= 3, "peak was {}", transport.peak_in_flight());
    assert!(transport.peak_in_flight() >= 1);
    assert_eq!(transport.calls().upsert, 60);
    assert_eq!(transport.len(""), 120);
    assert_eq!(index.admission_window().in_flight(), 0);
}

#[tokio::test]
async fn test_failed_batch_is_reported_after_siblings_complete() {
    let transport = Arc::new(
        MemoryTransport::new(Some(2))
            .with_latency(Duration::from_millis(2))
            .with_upsert_hook(|request| {
                request
                    .vectors
                    .iter()
                    .any(|v| v.id == "v4")
                    .then(|| ClientError::service(RpcCode::InvalidArgument, "rejected batch"))
            }),
    );
    let config = ClientConfig::default()
        .with_dimension(2)
        .with_batch_size(2)
        .with_max_concurrency(2);
    let index = Index::new("partial", config, transport.clone()).unwrap();

    let inputs: Vec<(String, Vec<f32>)> = (0..10).map(|i| (format!("v{}", i), vec![1.0, i as f32])).collect();
    let err = index.upsert(inputs, None).await.unwrap_err();

    match err {
        ClientError::Aggregate(aggregate) => {
            assert_eq!(aggregate.batch_count, 5);
            assert_eq!(aggregate.failed_indices(), vec![2]);
            assert_eq!(aggregate.succeeded, vec![0, 1, 3, 4]);
            assert!(aggregate.to_string().contains("rejected batch"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(transport.calls().upsert, 5);
    assert_eq!(transport.len(""), 8);
}

#[tokio::test]
async fn test_pending_upsert_resolves_to_summary() {
    let transport = Arc::new(MemoryTransport::new(Some(2)));
    let index = Index::new(
        "pending",
        ClientConfig::default().with_batch_size(3),
        transport.clone(),
    )
    .unwrap();

    let inputs: Vec<(String, Vec<f32>)> = (0..7).map(|i| (format!("p{}", i), vec![0.5, i as f32])).collect();
    let pending = index.spawn_upsert(inputs, None).unwrap();
    let summary = pending.await.unwrap();
    assert_eq!(summary.upserted_count, 7);
    assert_eq!(summary.batch_count, 3);
}

#[tokio::test]
async fn test_pending_upsert_validates_eagerly() {
    let transport = Arc::new(MemoryTransport::new(None));
    let index = Index::new("pending", ClientConfig::default().with_dimension(2), transport.clone()).unwrap();

    let err = index
        .spawn_upsert(vec![("a", vec![1.0, 2.0]), ("b", vec![1.0])], None)
        .unwrap_err();
    assert!(matches!(err, ClientError::Validation(ref e) if e.position == Some(1)));
    assert_eq!(transport.calls().total(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelling_pending_upsert_frees_all_slots() {
    let transport = Arc::new(MemoryTransport::new(Some(2)).with_latency(Duration::from_millis(200)));
    let config = ClientConfig::default().with_batch_size(1).with_max_concurrency(2);
    let index = Index::new("cancel", config, transport.clone()).unwrap();
    let window = index.admission_window().clone();

    let inputs: Vec<(String, Vec<f32>)> = (0..20).map(|i| (format!("c{}", i), vec![1.0, i as f32])).collect();
    let pending = index.spawn_upsert(inputs, None).unwrap();

    wait_until(|| window.in_flight() == 2).await;
    pending.cancel();

    let result = pending.await;
    assert!(matches!(result, Err(ClientError::Cancelled)));

    wait_until(|| window.in_flight() == 0).await;
    wait_until(|| transport.in_flight() == 0).await;
    assert!(transport.calls().upsert < 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropping_upsert_future_frees_all_slots() {
    let transport = Arc::new(MemoryTransport::new(Some(2)).with_latency(Duration::from_millis(200)));
    let config = ClientConfig::default().with_batch_size(1).with_max_concurrency(3);
    let index = Index::new("drop", config, transport.clone()).unwrap();

    let inputs: Vec<(String, Vec<f32>)> = (0..10).map(|i| (format!("d{}", i), vec![1.0, i as f32])).collect();
    let timed_out = tokio::time::timeout(Duration::from_millis(50), index.upsert(inputs, None)).await;
    assert!(timed_out.is_err());

    let window = index.admission_window().clone();
    wait_until(|| window.in_flight() == 0).await;

    // The handle is fully usable afterwards.
    let summary = index
        .upsert(vec![("after", vec![1.0, 1.0])], None)
        .await
        .unwrap();
    assert_eq!(summary.upserted_count, 1);
}

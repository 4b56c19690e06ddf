// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! In-process transport backed by a brute-force store.
//!
//! Applies the same request rules as the remote service (dimension checks,
//! filters, rank order, metadata merge) so the pipeline can run without a
//! network. Also counts calls, tracks peak concurrency and can inject
//! failures.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::core::metadata_filter::MetadataFilter;
use crate::core::types::{metadata_from_json, metadata_to_json, Metadata, SparseValues};
use crate::error::{ClientError, ClientResult, RpcCode};
use crate::transport::wire::*;
use crate::transport::Transport;

/// Similarity used to score query matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    #[default]
    Cosine,
    DotProduct,
}

type UpsertHook = Arc<dyn Fn(&UpsertRequest) -> Option<ClientError> + Send + Sync>;

#[derive(Debug, Clone)]
struct StoredVector {
    values: Vec<f32>,
    sparse_values: Option<SparseValues>,
    metadata: Metadata,
}

/// Snapshot of how many calls each RPC received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub upsert: usize,
    pub query: usize,
    pub fetch: usize,
    pub update: usize,
    pub delete: usize,
    pub describe_index_stats: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.upsert + self.query + self.fetch + self.update + self.delete + self.describe_index_stats
    }
}

#[derive(Default)]
struct Counters {
    upsert: AtomicUsize,
    query: AtomicUsize,
    fetch: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
    describe_index_stats: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a call ends, however it ends.
struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MemoryTransport {
    dimension: Option<usize>,
    metric: Metric,
    latency: Option<Duration>,
    namespaces: RwLock<HashMap<String, BTreeMap<String, StoredVector>>>,
    counters: Counters,
    upsert_failures: Mutex<VecDeque<ClientError>>,
    upsert_hook: Option<UpsertHook>,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("dimension", &self.dimension)
            .field("metric", &self.metric)
            .field("latency", &self.latency)
            .field("calls", &self.calls())
            .finish()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemoryTransport {
    pub fn new(dimension: Option<usize>) -> Self {
        Self {
            dimension,
            metric: Metric::default(),
            latency: None,
            namespaces: RwLock::new(HashMap::new()),
            counters: Counters::default(),
            upsert_failures: Mutex::new(VecDeque::new()),
            upsert_hook: None,
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// Delays every call, which makes overlapping calls observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Installs a hook that may reject an upsert call based on its content.
    pub fn with_upsert_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&UpsertRequest) -> Option<ClientError> + Send + Sync + 'static,
    {
        self.upsert_hook = Some(Arc::new(hook));
        self
    }

    /// Makes the next `count` upsert calls fail with `error`.
    pub fn fail_next_upsert_calls(&self, count: usize, error: ClientError) {
        let mut failures = lock(&self.upsert_failures);
        failures.extend(std::iter::repeat(error).take(count));
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            upsert: c.upsert.load(Ordering::SeqCst),
            query: c.query.load(Ordering::SeqCst),
            fetch: c.fetch.load(Ordering::SeqCst),
            update: c.update.load(Ordering::SeqCst),
            delete: c.delete.load(Ordering::SeqCst),
            describe_index_stats: c.describe_index_stats.load(Ordering::SeqCst),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were executing at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Number of vectors stored in `namespace`.
    pub fn len(&self, namespace: &str) -> usize {
        self.read()
            .map(|namespaces| namespaces.get(namespace).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.read()
            .map(|namespaces| namespaces.values().all(BTreeMap::is_empty))
            .unwrap_or(true)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn read(
        &self,
    ) -> ClientResult<std::sync::RwLockReadGuard<'_, HashMap<String, BTreeMap<String, StoredVector>>>> {
        self.namespaces
            .read()
            .map_err(|_| ClientError::service(RpcCode::Internal, "store lock poisoned"))
    }

    fn write(
        &self,
    ) -> ClientResult<std::sync::RwLockWriteGuard<'_, HashMap<String, BTreeMap<String, StoredVector>>>> {
        self.namespaces
            .write()
            .map_err(|_| ClientError::service(RpcCode::Internal, "store lock poisoned"))
    }

    fn check_dimension(&self, values: &[f32]) -> ClientResult<()> {
        match self.dimension {
            Some(dimension) if !values.is_empty() && values.len() != dimension => {
                Err(invalid_argument(format!(
                    "Vector dimension {} does not match the dimension of the index {}",
                    values.len(),
                    dimension
                )))
            }
            _ => Ok(()),
        }
    }

    fn score(&self, query: &[f32], query_sparse: Option<&SparseValues>, stored: &StoredVector) -> f32 {
        let dense = if query.is_empty() || stored.values.is_empty() {
            0.0
        } else {
            match self.metric {
                Metric::DotProduct => dot(query, &stored.values),
                Metric::Cosine => cosine(query, &stored.values),
            }
        };
        let sparse = match (query_sparse, &stored.sparse_values) {
            (Some(q), Some(s)) => q.dot(s),
            _ => 0.0,
        };
        dense + sparse
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn upsert(&self, request: UpsertRequest) -> ClientResult<UpsertResponse> {
        self.counters.upsert.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters);
        self.simulate_latency().await;

        if let Some(err) = lock(&self.upsert_failures).pop_front() {
            return Err(err);
        }
        if let Some(hook) = &self.upsert_hook {
            if let Some(err) = hook(&request) {
                return Err(err);
            }
        }

        let mut staged = Vec::with_capacity(request.vectors.len());
        for vector in request.vectors {
            self.check_dimension(&vector.values)?;
            let metadata = decode_metadata(vector.metadata.as_ref())?;
            staged.push((
                vector.id,
                StoredVector {
                    values: vector.values,
                    sparse_values: vector.sparse_values,
                    metadata,
                },
            ));
        }

        let upserted_count = staged.len() as u32;
        let mut namespaces = self.write()?;
        let store = namespaces.entry(request.namespace).or_default();
        store.extend(staged);
        Ok(UpsertResponse { upserted_count })
    }

    async fn query(&self, request: QueryRequest) -> ClientResult<QueryResponse> {
        self.counters.query.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters);
        self.simulate_latency().await;

        if request.top_k == 0 {
            return Err(invalid_argument("topK must be greater than 0"));
        }
        let filter = parse_filter(request.filter.as_ref())?;

        let namespaces = self.read()?;
        let empty = BTreeMap::new();
        let store = namespaces.get(&request.namespace).unwrap_or(&empty);

        let (values, sparse) = match (&request.id, request.vector, request.sparse_vector) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(invalid_argument("Cannot provide both id and vector"));
            }
            (Some(id), None, None) => match store.get(id) {
                Some(stored) => (stored.values.clone(), stored.sparse_values.clone()),
                None => {
                    return Ok(QueryResponse {
                        matches: Vec::new(),
                        namespace: request.namespace,
                    })
                }
            },
            (None, None, None) => {
                return Err(invalid_argument("No query provided"));
            }
            (None, vector, sparse) => (vector.unwrap_or_default(), sparse),
        };
        self.check_dimension(&values)?;

        let mut matches: Vec<ScoredVector> = store
            .iter()
            .filter(|(_, stored)| filter.as_ref().map_or(true, |f| f.matches(&stored.metadata)))
            .map(|(id, stored)| ScoredVector {
                id: id.clone(),
                score: self.score(&values, sparse.as_ref(), stored),
                values: if request.include_values {
                    stored.values.clone()
                } else {
                    Vec::new()
                },
                sparse_values: if request.include_values {
                    stored.sparse_values.clone()
                } else {
                    None
                },
                metadata: if request.include_metadata {
                    Some(metadata_to_json(&stored.metadata))
                } else {
                    None
                },
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(request.top_k as usize);

        Ok(QueryResponse {
            matches,
            namespace: request.namespace,
        })
    }

    async fn fetch(&self, request: FetchRequest) -> ClientResult<FetchResponse> {
        self.counters.fetch.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters);
        self.simulate_latency().await;

        let namespaces = self.read()?;
        let mut vectors = IndexMap::new();
        if let Some(store) = namespaces.get(&request.namespace) {
            for id in &request.ids {
                if let Some(stored) = store.get(id) {
                    vectors.insert(
                        id.clone(),
                        WireVector {
                            id: id.clone(),
                            values: stored.values.clone(),
                            sparse_values: stored.sparse_values.clone(),
                            metadata: Some(metadata_to_json(&stored.metadata)),
                        },
                    );
                }
            }
        }

        Ok(FetchResponse {
            vectors,
            namespace: request.namespace,
        })
    }

    async fn update(&self, request: UpdateRequest) -> ClientResult<()> {
        self.counters.update.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters);
        self.simulate_latency().await;

        if let Some(values) = &request.values {
            self.check_dimension(values)?;
        }
        let set_metadata = decode_metadata(request.set_metadata.as_ref())?;

        let mut namespaces = self.write()?;
        let stored = namespaces
            .get_mut(&request.namespace)
            .and_then(|store| store.get_mut(&request.id))
            .ok_or_else(|| {
                ClientError::service(RpcCode::NotFound, format!("Vector {} not found", request.id))
            })?;

        if let Some(values) = request.values {
            stored.values = values;
        }
        if let Some(sparse_values) = request.sparse_values {
            stored.sparse_values = Some(sparse_values);
        }
        stored.metadata.extend(set_metadata);
        Ok(())
    }

    async fn delete(&self, request: DeleteRequest) -> ClientResult<()> {
        self.counters.delete.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters);
        self.simulate_latency().await;

        let filter = parse_filter(request.filter.as_ref())?;
        let mut namespaces = self.write()?;
        let Some(store) = namespaces.get_mut(&request.namespace) else {
            return Ok(());
        };

        if request.delete_all {
            store.clear();
        } else if let Some(filter) = filter {
            store.retain(|_, stored| !filter.matches(&stored.metadata));
        } else {
            for id in &request.ids {
                store.remove(id);
            }
        }
        Ok(())
    }

    async fn describe_index_stats(
        &self,
        request: DescribeIndexStatsRequest,
    ) -> ClientResult<DescribeIndexStatsResponse> {
        self.counters.describe_index_stats.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters);
        self.simulate_latency().await;

        let filter = parse_filter(request.filter.as_ref())?;
        let namespaces = self.read()?;

        let mut summaries = HashMap::new();
        let mut total = 0u64;
        for (name, store) in namespaces.iter() {
            let count = store
                .values()
                .filter(|stored| filter.as_ref().map_or(true, |f| f.matches(&stored.metadata)))
                .count() as u64;
            if count > 0 {
                summaries.insert(name.clone(), NamespaceSummary { vector_count: count });
            }
            total += count;
        }

        Ok(DescribeIndexStatsResponse {
            namespaces: summaries,
            dimension: self.dimension.unwrap_or(0) as u32,
            index_fullness: 0.0,
            total_vector_count: total,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn invalid_argument(message: impl Into<String>) -> ClientError {
    ClientError::service(RpcCode::InvalidArgument, message)
}

fn parse_filter(filter: Option<&serde_json::Value>) -> ClientResult<Option<MetadataFilter>> {
    filter
        .map(|f| MetadataFilter::from_json(f).map_err(|e| invalid_argument(e.to_string())))
        .transpose()
}

fn decode_metadata(metadata: Option<&serde_json::Value>) -> ClientResult<Metadata> {
    match metadata {
        Some(value) => metadata_from_json(value).map_err(|e| invalid_argument(e.to_string())),
        None => Ok(Metadata::new()),
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

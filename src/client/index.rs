// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! The index handle: every data-plane operation a caller can perform.

use indexmap::IndexMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::batch::{partition, AdmissionWindow, BatchScheduler};
use crate::client::blocking::BlockingIndex;
use crate::client::config::ClientConfig;
use crate::client::results::{assemble_fetch, assemble_query, assemble_stats, check_upsert_ack};
use crate::client::retry::with_retry;
use crate::core::metadata_filter::MetadataFilter;
use crate::core::normalize::{normalize_all, VectorInput};
use crate::core::types::{
    metadata_to_json, FetchResult, IndexStats, Metadata, QueryResult, SparseValues,
    UpsertSummary, VectorRecord,
};
use crate::core::validation::{validate_dense, validate_id, validate_metadata};
use crate::error::{ClientError, ClientResult, ValidationError};
use crate::transport::wire::{
    DeleteRequest, DescribeIndexStatsRequest, FetchRequest, QueryRequest, UpdateRequest,
    UpsertRequest, WireVector,
};
use crate::transport::{HttpTransport, Transport};

/// Handle to one remote index.
///
/// Cheap to clone; clones share the configuration, the transport and the
/// admission window.
#[derive(Clone)]
pub struct Index {
    name: Arc<str>,
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    window: AdmissionWindow,
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("window", &self.window)
            .finish()
    }
}

impl Index {
    pub fn new(
        name: impl Into<String>,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let window = AdmissionWindow::new(config.max_concurrency);
        Ok(Self {
            name: Arc::from(name.into()),
            config: Arc::new(config),
            transport,
            window,
        })
    }

    /// Connects to the index over HTTP at `config.host`.
    pub fn connect(name: impl Into<String>, config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Self::new(name, config, Arc::new(transport))
    }

    /// Connects using `VECTOR_INDEX_*` environment variables.
    pub fn from_env(name: impl Into<String>) -> ClientResult<Self> {
        Self::connect(name, ClientConfig::from_env()?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn admission_window(&self) -> &AdmissionWindow {
        &self.window
    }

    /// Blocking view of this handle, driven by its own runtime.
    pub fn blocking(&self) -> ClientResult<BlockingIndex> {
        BlockingIndex::new(self.clone())
    }

    fn scheduler(&self) -> BatchScheduler {
        BatchScheduler::new(self.window.clone())
    }

    fn resolve_namespace(&self, namespace: Option<&str>) -> String {
        namespace.unwrap_or(&self.config.namespace).to_string()
    }

    /// Runs a single-shot call under the admission window with retry.
    async fn dispatch<Q, R, F, Fut>(
        &self,
        operation: &'static str,
        idempotent: bool,
        request: Q,
        call: F,
    ) -> ClientResult<R>
    where
        Q: Clone,
        F: FnMut(Q) -> Fut,
        Fut: Future<Output = ClientResult<R>>,
    {
        let _permit = self.window.acquire().await?;
        debug!(index = %self.name, operation, "Dispatching call");
        with_retry(&self.config.retry, idempotent, operation, request, call).await
    }

    /// Upserts vectors given in any accepted shape.
    ///
    /// All inputs are validated before anything is sent; a single bad element
    /// fails the whole call. The records are then split into batches of
    /// `batch_size` and sent concurrently, at most `max_concurrency` at a time.
    pub async fn upsert<I, V>(&self, vectors: I, namespace: Option<&str>) -> ClientResult<UpsertSummary>
    where
        I: IntoIterator<Item = V>,
        V: Into<VectorInput>,
    {
        let records = normalize_all(vectors, self.config.limits())?;
        self.upsert_records(records, self.resolve_namespace(namespace))
            .await
    }

    /// Validates `vectors` now and runs the upsert in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_upsert<I, V>(&self, vectors: I, namespace: Option<&str>) -> ClientResult<PendingUpsert>
    where
        I: IntoIterator<Item = V>,
        V: Into<VectorInput>,
    {
        let records = normalize_all(vectors, self.config.limits())?;
        let namespace = self.resolve_namespace(namespace);
        let index = self.clone();
        let handle = tokio::spawn(async move { index.upsert_records(records, namespace).await });
        Ok(PendingUpsert { handle })
    }

    async fn upsert_records(
        &self,
        records: Vec<VectorRecord>,
        namespace: String,
    ) -> ClientResult<UpsertSummary> {
        if records.is_empty() {
            return Ok(UpsertSummary {
                upserted_count: 0,
                batch_count: 0,
            });
        }

        let vector_count = records.len();
        let batches = partition(records, self.config.batch_size);
        let batch_count = batches.len();
        debug!(index = %self.name, namespace = %namespace, vector_count, batch_count, "Upserting");

        let index = self.clone();
        let ns = namespace.clone();
        let acknowledged = self
            .scheduler()
            .run("upsert", batches, move |_, batch: Vec<VectorRecord>| {
                let index = index.clone();
                let namespace = ns.clone();
                async move { index.upsert_batch(batch, namespace).await }
            })
            .await?;

        let upserted_count: u32 = acknowledged.iter().sum();
        info!(index = %self.name, namespace = %namespace, upserted_count, batch_count, "Upsert completed");
        Ok(UpsertSummary {
            upserted_count,
            batch_count,
        })
    }

    async fn upsert_batch(&self, batch: Vec<VectorRecord>, namespace: String) -> ClientResult<u32> {
        let expected = batch.len();
        let request = UpsertRequest {
            vectors: batch.into_iter().map(WireVector::from).collect(),
            namespace,
        };
        let transport = self.transport.as_ref();
        let response = with_retry(&self.config.retry, true, "upsert", request, |request| {
            transport.upsert(request)
        })
        .await?;
        check_upsert_ack(expected, &response)
    }

    /// Starts a query by vector; set `values` and/or `sparse_values` on the builder.
    pub fn query(&self, top_k: u32) -> QueryBuilder {
        QueryBuilder::new(self.clone(), top_k)
    }

    /// Starts a query using a stored vector as the query.
    pub fn query_by_id(&self, id: impl Into<String>, top_k: u32) -> QueryBuilder {
        QueryBuilder::new(self.clone(), top_k).id(id)
    }

    /// Fetches vectors by id. The result follows the order of `ids`; ids that
    /// do not exist are absent.
    pub async fn fetch<S: AsRef<str>>(
        &self,
        ids: &[S],
        namespace: Option<&str>,
    ) -> ClientResult<IndexMap<String, FetchResult>> {
        let requested = validate_ids(ids)?;
        let namespace = self.resolve_namespace(namespace);
        let batches = partition(requested.clone(), self.config.batch_size);

        let index = self.clone();
        let ns = namespace.clone();
        let responses = self
            .scheduler()
            .run("fetch", batches, move |_, ids: Vec<String>| {
                let index = index.clone();
                let request = FetchRequest {
                    ids,
                    namespace: ns.clone(),
                };
                async move {
                    let transport = index.transport.as_ref();
                    with_retry(&index.config.retry, true, "fetch", request, |request| {
                        transport.fetch(request)
                    })
                    .await
                }
            })
            .await?;

        let results = assemble_fetch(&requested, responses)?;
        info!(index = %self.name, namespace = %namespace, requested = requested.len(), found = results.len(), "Fetch completed");
        Ok(results)
    }

    /// Updates one vector in place. Metadata in `update` is merged into the
    /// stored metadata.
    pub async fn update(
        &self,
        id: impl Into<String>,
        update: VectorUpdate,
        namespace: Option<&str>,
    ) -> ClientResult<()> {
        let id = id.into();
        validate_id(&id)?;
        update.validate(&self.config)?;

        let sparse_values = update.sparse().cloned();
        let request = UpdateRequest {
            id,
            values: update.values,
            sparse_values,
            set_metadata: update.set_metadata.as_ref().map(metadata_to_json),
            namespace: self.resolve_namespace(namespace),
        };
        let transport = self.transport.as_ref();
        self.dispatch("update", false, request, |request| transport.update(request))
            .await?;
        info!(index = %self.name, "Update completed");
        Ok(())
    }

    /// Deletes the vectors chosen by `selector`. Exactly one selector must be set.
    pub async fn delete(&self, selector: DeleteSelector, namespace: Option<&str>) -> ClientResult<()> {
        selector.validate()?;
        let idempotent = selector.filter.is_none();

        let request = DeleteRequest {
            ids: selector.ids.unwrap_or_default(),
            delete_all: selector.delete_all,
            filter: selector.filter.as_ref().map(MetadataFilter::to_json),
            namespace: self.resolve_namespace(namespace),
        };
        let transport = self.transport.as_ref();
        self.dispatch("delete", idempotent, request, |request| transport.delete(request))
            .await?;
        info!(index = %self.name, "Delete completed");
        Ok(())
    }

    pub async fn delete_ids<S: AsRef<str>>(&self, ids: &[S], namespace: Option<&str>) -> ClientResult<()> {
        self.delete(DeleteSelector::ids(ids), namespace).await
    }

    pub async fn delete_by_filter(&self, filter: MetadataFilter, namespace: Option<&str>) -> ClientResult<()> {
        self.delete(DeleteSelector::filter(filter), namespace).await
    }

    pub async fn delete_all(&self, namespace: Option<&str>) -> ClientResult<()> {
        self.delete(DeleteSelector::all(), namespace).await
    }

    /// Vector counts per namespace, optionally restricted by `filter`.
    pub async fn describe_index_stats(&self, filter: Option<MetadataFilter>) -> ClientResult<IndexStats> {
        let request = DescribeIndexStatsRequest {
            filter: filter.as_ref().map(MetadataFilter::to_json),
        };
        let transport = self.transport.as_ref();
        let response = self
            .dispatch("describe_index_stats", true, request, |request| {
                transport.describe_index_stats(request)
            })
            .await?;
        Ok(assemble_stats(response))
    }
}

fn validate_ids<S: AsRef<str>>(ids: &[S]) -> Result<Vec<String>, ValidationError> {
    if ids.is_empty() {
        return Err(ValidationError::new("ids", "at least one id is required"));
    }
    ids.iter()
        .enumerate()
        .map(|(position, id)| {
            validate_id(id.as_ref()).map_err(|e| e.at(position))?;
            Ok(id.as_ref().to_string())
        })
        .collect()
}

/// An upsert running in the background.
///
/// Resolves to the same result the awaited form would return. Dropping it
/// detaches the task; [`cancel`](PendingUpsert::cancel) stops it.
#[derive(Debug)]
pub struct PendingUpsert {
    handle: JoinHandle<ClientResult<UpsertSummary>>,
}

impl PendingUpsert {
    /// Aborts the upsert and every batch it still has in flight.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for PendingUpsert {
    type Output = ClientResult<UpsertSummary>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(ClientError::Cancelled)),
            Poll::Ready(Err(e)) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

/// Builder for a similarity query.
#[must_use = "a query does nothing until `send` is awaited"]
pub struct QueryBuilder {
    index: Index,
    top_k: u32,
    values: Option<Vec<f32>>,
    sparse_values: Option<SparseValues>,
    id: Option<String>,
    namespace: Option<String>,
    filter: Option<MetadataFilter>,
    include_values: bool,
    include_metadata: bool,
}

impl QueryBuilder {
    fn new(index: Index, top_k: u32) -> Self {
        Self {
            index,
            top_k,
            values: None,
            sparse_values: None,
            id: None,
            namespace: None,
            filter: None,
            include_values: false,
            include_metadata: false,
        }
    }

    pub fn values(mut self, values: Vec<f32>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn sparse_values(mut self, sparse_values: SparseValues) -> Self {
        self.sparse_values = Some(sparse_values);
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn include_values(mut self, include: bool) -> Self {
        self.include_values = include;
        self
    }

    pub fn include_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    fn build_request(&self) -> Result<QueryRequest, ValidationError> {
        if self.top_k == 0 {
            return Err(ValidationError::new("top_k", "must be greater than 0"));
        }

        let has_vector = self.values.is_some() || self.sparse_values.is_some();
        let sparse = self.sparse_values.as_ref().filter(|s| !s.is_empty());
        match (&self.id, has_vector) {
            (Some(_), true) => {
                return Err(ValidationError::new(
                    "id",
                    "query by id and query by vector are mutually exclusive",
                ))
            }
            (None, false) => {
                return Err(ValidationError::new(
                    "values",
                    "a query needs values, sparse_values, or an id",
                ))
            }
            (Some(id), false) => validate_id(id)?,
            (None, true) => {}
        }

        let config = self.index.config();
        let values = self.values.as_ref().filter(|v| !v.is_empty());
        if self.id.is_none() && values.is_none() && sparse.is_none() {
            return Err(ValidationError::new(
                "values",
                "a query vector must carry values, sparse_values, or both",
            ));
        }
        if let Some(values) = values {
            validate_dense(values, config.dimension)?;
        }
        if let Some(sparse) = sparse {
            sparse.validate(config.sparse_dimension)?;
        }

        Ok(QueryRequest {
            namespace: self.index.resolve_namespace(self.namespace.as_deref()),
            top_k: self.top_k,
            vector: values.cloned(),
            sparse_vector: sparse.cloned(),
            id: self.id.clone(),
            filter: self.filter.as_ref().map(MetadataFilter::to_json),
            include_values: self.include_values,
            include_metadata: self.include_metadata,
        })
    }

    /// Validates the query and sends it. Matches come back in rank order.
    pub async fn send(self) -> ClientResult<Vec<QueryResult>> {
        let request = self.build_request()?;
        let transport = self.index.transport.as_ref();
        let response = self
            .index
            .dispatch("query", true, request, |request| transport.query(request))
            .await?;

        let results = assemble_query(response, self.include_values, self.include_metadata)?;
        debug!(index = %self.index.name, top_k = self.top_k, matches = results.len(), "Query completed");
        Ok(results)
    }
}

/// Fields to change on an existing vector. At least one must be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorUpdate {
    pub values: Option<Vec<f32>>,
    pub sparse_values: Option<SparseValues>,
    pub set_metadata: Option<Metadata>,
}

impl VectorUpdate {
    pub fn values(mut self, values: Vec<f32>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn sparse_values(mut self, sparse_values: SparseValues) -> Self {
        self.sparse_values = Some(sparse_values);
        self
    }

    pub fn set_metadata(mut self, metadata: Metadata) -> Self {
        self.set_metadata = Some(metadata);
        self
    }

    /// Sparse values with no entries count as unset.
    fn sparse(&self) -> Option<&SparseValues> {
        self.sparse_values.as_ref().filter(|s| !s.is_empty())
    }

    fn validate(&self, config: &ClientConfig) -> Result<(), ValidationError> {
        if self.values.is_none() && self.sparse().is_none() && self.set_metadata.is_none() {
            return Err(ValidationError::new(
                "update",
                "at least one of values, sparse_values or set_metadata is required",
            ));
        }
        if let Some(values) = &self.values {
            if values.is_empty() {
                return Err(ValidationError::new("values", "must not be empty"));
            }
            validate_dense(values, config.dimension)?;
        }
        if let Some(sparse) = self.sparse() {
            sparse.validate(config.sparse_dimension)?;
        }
        if let Some(metadata) = &self.set_metadata {
            validate_metadata(metadata)?;
        }
        Ok(())
    }
}

/// Which vectors a delete removes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteSelector {
    pub ids: Option<Vec<String>>,
    pub filter: Option<MetadataFilter>,
    pub delete_all: bool,
}

impl DeleteSelector {
    pub fn ids<S: AsRef<str>>(ids: &[S]) -> Self {
        Self {
            ids: Some(ids.iter().map(|id| id.as_ref().to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn filter(filter: MetadataFilter) -> Self {
        Self {
            filter: Some(filter),
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self {
            delete_all: true,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let selected = [self.ids.is_some(), self.filter.is_some(), self.delete_all]
            .iter()
            .filter(|set| **set)
            .count();
        if selected != 1 {
            return Err(ValidationError::new(
                "selector",
                format!(
                    "exactly one of ids, filter or delete_all must be set ({} given)",
                    selected
                ),
            ));
        }
        if let Some(ids) = &self.ids {
            validate_ids(ids)?;
        }
        Ok(())
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Blocking calling convention.
//!
//! Each method drives the corresponding async operation to completion on a
//! runtime owned by the handle, so both conventions share one request path.
//! These methods must not be called from inside an async context.

use indexmap::IndexMap;
use tokio::runtime::{Builder, Runtime};

use crate::client::index::{DeleteSelector, Index, QueryBuilder, VectorUpdate};
use crate::core::metadata_filter::MetadataFilter;
use crate::core::normalize::VectorInput;
use crate::core::types::{FetchResult, IndexStats, QueryResult, UpsertSummary};
use crate::error::{ClientError, ClientResult};

pub struct BlockingIndex {
    index: Index,
    runtime: Runtime,
}

impl std::fmt::Debug for BlockingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingIndex")
            .field("index", &self.index)
            .finish()
    }
}

impl BlockingIndex {
    pub(crate) fn new(index: Index) -> ClientResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(index.config().max_concurrency.clamp(1, 8))
            .thread_name("vector-index-blocking")
            .enable_all()
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to start runtime: {}", e)))?;
        Ok(Self { index, runtime })
    }

    /// The async handle this view wraps.
    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn upsert<I, V>(&self, vectors: I, namespace: Option<&str>) -> ClientResult<UpsertSummary>
    where
        I: IntoIterator<Item = V>,
        V: Into<VectorInput>,
    {
        self.runtime.block_on(self.index.upsert(vectors, namespace))
    }

    /// Sends a query built with [`Index::query`] or [`Index::query_by_id`].
    pub fn query(&self, query: QueryBuilder) -> ClientResult<Vec<QueryResult>> {
        self.runtime.block_on(query.send())
    }

    pub fn fetch<S: AsRef<str>>(
        &self,
        ids: &[S],
        namespace: Option<&str>,
    ) -> ClientResult<IndexMap<String, FetchResult>> {
        self.runtime.block_on(self.index.fetch(ids, namespace))
    }

    pub fn update(
        &self,
        id: impl Into<String>,
        update: VectorUpdate,
        namespace: Option<&str>,
    ) -> ClientResult<()> {
        self.runtime.block_on(self.index.update(id, update, namespace))
    }

    pub fn delete(&self, selector: DeleteSelector, namespace: Option<&str>) -> ClientResult<()> {
        self.runtime.block_on(self.index.delete(selector, namespace))
    }

    pub fn describe_index_stats(&self, filter: Option<MetadataFilter>) -> ClientResult<IndexStats> {
        self.runtime.block_on(self.index.describe_index_stats(filter))
    }
}

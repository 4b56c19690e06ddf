// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! The RPC channel between the pipeline and the index service.
//!
//! One method per data-plane call, each scoped to the namespace carried in its
//! request. Implementations never retry; connectivity failures surface as
//! [`ClientError::Transport`](crate::error::ClientError::Transport) and
//! rejections as [`ClientError::Service`](crate::error::ClientError::Service).

use async_trait::async_trait;

use crate::error::ClientResult;

pub mod http;
pub mod memory;
pub mod wire;

pub use http::HttpTransport;
pub use memory::{CallCounts, Metric, MemoryTransport};
pub use wire::{
    DeleteRequest, DescribeIndexStatsRequest, DescribeIndexStatsResponse, FetchRequest,
    FetchResponse, QueryRequest, QueryResponse, ScoredVector, UpdateRequest, UpsertRequest,
    UpsertResponse, WireVector,
};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn upsert(&self, request: UpsertRequest) -> ClientResult<UpsertResponse>;

    async fn query(&self, request: QueryRequest) -> ClientResult<QueryResponse>;

    async fn fetch(&self, request: FetchRequest) -> ClientResult<FetchResponse>;

    async fn update(&self, request: UpdateRequest) -> ClientResult<()>;

    async fn delete(&self, request: DeleteRequest) -> ClientResult<()>;

    async fn describe_index_stats(
        &self,
        request: DescribeIndexStatsRequest,
    ) -> ClientResult<DescribeIndexStatsResponse>;
}

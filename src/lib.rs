// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Client pipeline for a remote vector index.
//!
//! Vectors in any accepted shape are normalized and validated, split into
//! batches, sent concurrently under a per-handle admission window, and the
//! responses are assembled into typed results.
//!
//! ```no_run
//! use vector_index_client::{ClientConfig, Index};
//! use serde_json::json;
//!
//! # async fn run() -> vector_index_client::ClientResult<()> {
//! let config = ClientConfig::default()
//!     .with_host("https://my-index.svc.example.io")
//!     .with_api_key("key")
//!     .with_dimension(4);
//! let index = Index::connect("my-index", config)?;
//!
//! index
//!     .upsert(
//!         vec![json!({"id": "v1", "values": [0.1, 0.2, 0.3, 0.4], "metadata": {"genre": "drama"}})],
//!         None,
//!     )
//!     .await?;
//!
//! let matches = index
//!     .query(3)
//!     .values(vec![0.1, 0.2, 0.3, 0.4])
//!     .include_metadata(true)
//!     .send()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod core;
pub mod error;
pub mod transport;

pub use crate::client::{
    BlockingIndex, ClientConfig, DeleteSelector, Index, PendingUpsert, QueryBuilder, RetryPolicy,
    VectorUpdate,
};
pub use crate::core::{
    FetchResult, IndexStats, Metadata, MetadataFilter, MetadataValue, NamespaceStats, QueryResult,
    SparseValues, UpsertSummary, VectorInput, VectorRecord,
};
pub use crate::error::{AggregateError, BatchFailure, ClientError, ClientResult, RpcCode, ValidationError};
pub use crate::transport::{HttpTransport, MemoryTransport, Transport};

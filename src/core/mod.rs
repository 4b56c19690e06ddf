// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod metadata_filter;
pub mod normalize;
pub mod types;
pub mod validation;

pub use metadata_filter::{CompareOp, FilterError, MetadataFilter};
pub use normalize::{normalize, normalize_all, VectorInput};
pub use types::{
    FetchResult, IndexStats, Metadata, MetadataValue, NamespaceStats, QueryResult, SparseValues,
    UpsertSummary, VectorRecord,
};
pub use validation::ValueLimits;

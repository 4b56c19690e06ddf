// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod batch;
pub mod blocking;
pub mod config;
pub mod index;
pub mod results;
mod retry;

pub use batch::{partition, AdmissionWindow, BatchScheduler};
pub use blocking::BlockingIndex;
pub use config::{ClientConfig, RetryPolicy};
pub use index::{DeleteSelector, Index, PendingUpsert, QueryBuilder, VectorUpdate};

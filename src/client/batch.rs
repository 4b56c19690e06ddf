// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Batch partitioning and bounded fan-out.
//!
//! Every batch runs as its own task in a [`JoinSet`] and holds an admission
//! permit for the duration of its transport call. The permit is owned by the
//! task, so it is released on success, failure, panic or abort alike.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{AggregateError, BatchFailure, ClientError, ClientResult};

/// Counting semaphore bounding in-flight transport calls for one index handle.
///
/// Clones share the same slots.
#[derive(Debug, Clone)]
pub struct AdmissionWindow {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub async fn acquire(&self) -> ClientResult<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ClientError::Cancelled)
    }
}

/// Splits `items` into contiguous chunks of at most `batch_size`, keeping order.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == batch_size {
            batches.push(std::mem::replace(
                &mut current,
                Vec::with_capacity(batch_size),
            ));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[derive(Debug, Clone)]
pub struct BatchScheduler {
    window: AdmissionWindow,
}

impl BatchScheduler {
    pub fn new(window: AdmissionWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &AdmissionWindow {
        &self.window
    }

    /// Runs `op` once per batch under the admission window and gathers every
    /// outcome.
    ///
    /// A failed batch never cancels its siblings. If any batch failed, the
    /// result is [`ClientError::Aggregate`] naming each failed batch; otherwise
    /// the outputs are returned in batch order. Dropping the returned future
    /// aborts all batch tasks.
    pub async fn run<T, R, F, Fut>(
        &self,
        operation: &'static str,
        batches: Vec<T>,
        op: F,
    ) -> ClientResult<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(usize, T) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = ClientResult<R>> + Send + 'static,
    {
        let batch_count = batches.len();
        debug!(operation, batch_count, "Scheduling batches");

        let mut tasks = JoinSet::new();
        for (index, batch) in batches.into_iter().enumerate() {
            let window = self.window.clone();
            let op = op.clone();
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(async move {
                    let _permit = window.acquire().await?;
                    debug!(operation, batch = index, "Dispatching batch");
                    op(index, batch).await
                })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_error(panic)));
                (index, outcome)
            });
        }

        let mut outputs: Vec<Option<R>> = (0..batch_count).map(|_| None).collect();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(output))) => outputs[index] = Some(output),
                Ok((index, Err(cause))) => {
                    warn!(operation, batch = index, error = %cause, "Batch failed");
                    failures.push(BatchFailure { index, cause });
                }
                Err(e) => warn!(operation, error = %e, "Batch task did not complete"),
            }
        }

        // A task lost to runtime shutdown reports no index; account for it here.
        for (index, output) in outputs.iter().enumerate() {
            if output.is_none() && !failures.iter().any(|f| f.index == index) {
                failures.push(BatchFailure {
                    index,
                    cause: ClientError::Cancelled,
                });
            }
        }

        if failures.is_empty() {
            info!(operation, batch_count, "All batches completed");
            return Ok(outputs.into_iter().flatten().collect());
        }

        failures.sort_by_key(|f| f.index);
        let succeeded: Vec<usize> = outputs
            .iter()
            .enumerate()
            .filter_map(|(index, output)| output.as_ref().map(|_| index))
            .collect();
        warn!(
            operation,
            batch_count,
            failed = failures.len(),
            "Some batches failed"
        );
        Err(AggregateError {
            batch_count,
            failures,
            succeeded,
        }
        .into())
    }
}

fn panic_error(panic: Box<dyn std::any::Any + Send>) -> ClientError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ClientError::Protocol(format!("batch task panicked: {}", message))
}

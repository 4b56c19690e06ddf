// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::future::Future;
use tracing::warn;

use crate::client::config::RetryPolicy;
use crate::error::ClientResult;

/// Sends `request` through `call`, repeating it after transport errors as
/// `policy` allows.
///
/// Non-idempotent calls are attempted once unless the policy opts in. The
/// request is cloned only for attempts that may be followed by another; the
/// final attempt takes it by value.
pub(crate) async fn with_retry<Q, R, F, Fut>(
    policy: &RetryPolicy,
    idempotent: bool,
    operation: &'static str,
    request: Q,
    mut call: F,
) -> ClientResult<R>
where
    Q: Clone,
    F: FnMut(Q) -> Fut,
    Fut: Future<Output = ClientResult<R>>,
{
    let max_retries = if idempotent || policy.retry_non_idempotent {
        policy.max_retries
    } else {
        0
    };

    let mut attempts = 0;
    loop {
        if attempts >= max_retries {
            return call(request).await;
        }
        match call(request.clone()).await {
            Err(e) if e.is_retriable() => {
                attempts += 1;
                warn!(operation, attempt = attempts, error = %e, "Retrying after transport error");
                tokio::time::sleep(policy.delay(attempts)).await;
            }
            result => return result,
        }
    }
}

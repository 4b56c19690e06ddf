// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Client configuration, built once and shared by every handle.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::core::validation::ValueLimits;
use crate::error::{ClientError, ClientResult};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How an index handle repeats calls that failed with a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one. `0` disables retry.
    pub max_retries: u32,
    pub backoff: Duration,
    /// Also retry update and delete-by-filter.
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(100),
            retry_non_idempotent: false,
        }
    }
}

impl RetryPolicy {
    /// Linear backoff before retry `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

#[derive(Clone, PartialEq)]
pub struct ClientConfig {
    /// Data-plane URL of the index, e.g. `https://my-index.svc.example.io`.
    pub host: Option<String>,
    pub api_key: Option<String>,
    /// Namespace used when an operation does not name one.
    pub namespace: String,
    pub dimension: Option<usize>,
    pub sparse_dimension: Option<u32>,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            api_key: None,
            namespace: String::new(),
            dimension: None,
            sparse_dimension: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("namespace", &self.namespace)
            .field("dimension", &self.dimension)
            .field("sparse_dimension", &self.sparse_dimension)
            .field("batch_size", &self.batch_size)
            .field("max_concurrency", &self.max_concurrency)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ClientConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_sparse_dimension(mut self, sparse_dimension: u32) -> Self {
        self.sparse_dimension = Some(sparse_dimension);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn limits(&self) -> ValueLimits {
        ValueLimits::new(self.dimension, self.sparse_dimension)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.batch_size == 0 {
            return Err(ClientError::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(ClientError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.dimension == Some(0) {
            return Err(ClientError::Config("dimension must be at least 1".to_string()));
        }
        if self.sparse_dimension == Some(0) {
            return Err(ClientError::Config(
                "sparse_dimension must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ClientError::Config("timeout must be non-zero".to_string()));
        }
        if let Some(host) = &self.host {
            if !host.starts_with("http://") && !host.starts_with("https://") {
                return Err(ClientError::Config(format!(
                    "Invalid URL format for VECTOR_INDEX_HOST: must start with http:// or https:// (got '{}')",
                    host
                )));
            }
        }
        Ok(())
    }

    /// Loads configuration from `VECTOR_INDEX_*` environment variables.
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> ClientResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            host: get("VECTOR_INDEX_HOST"),
            api_key: get("VECTOR_INDEX_API_KEY"),
            namespace: get("VECTOR_INDEX_NAMESPACE").unwrap_or_default(),
            dimension: parse_var("VECTOR_INDEX_DIMENSION", get("VECTOR_INDEX_DIMENSION"))?,
            sparse_dimension: parse_var(
                "VECTOR_INDEX_SPARSE_DIMENSION",
                get("VECTOR_INDEX_SPARSE_DIMENSION"),
            )?,
            batch_size: parse_var("VECTOR_INDEX_BATCH_SIZE", get("VECTOR_INDEX_BATCH_SIZE"))?
                .unwrap_or(defaults.batch_size),
            max_concurrency: parse_var(
                "VECTOR_INDEX_MAX_CONCURRENCY",
                get("VECTOR_INDEX_MAX_CONCURRENCY"),
            )?
            .unwrap_or(defaults.max_concurrency),
            timeout: parse_var::<u64>("VECTOR_INDEX_TIMEOUT_SECS", get("VECTOR_INDEX_TIMEOUT_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            retry: RetryPolicy {
                max_retries: parse_var("VECTOR_INDEX_MAX_RETRIES", get("VECTOR_INDEX_MAX_RETRIES"))?
                    .unwrap_or(defaults.retry.max_retries),
                ..defaults.retry
            },
        };

        config.validate()?;
        config.log_summary();
        Ok(config)
    }

    /// Logs the effective configuration. The API key is never printed.
    pub fn log_summary(&self) {
        info!("Vector index client configuration:");
        info!("  Host: {}", self.host.as_deref().unwrap_or("<none>"));
        info!(
            "  API key: {}",
            if self.api_key.is_some() { "set" } else { "not set" }
        );
        info!("  Default namespace: '{}'", self.namespace);
        info!(
            "  Dimension: {}",
            self.dimension
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        info!("  Batch size: {}", self.batch_size);
        info!("  Max concurrency: {}", self.max_concurrency);
        info!("  Timeout: {:?}", self.timeout);
        info!("  Max retries: {}", self.retry.max_retries);
    }
}

fn parse_var<T: FromStr>(name: &str, raw: Option<String>) -> ClientResult<Option<T>> {
    raw.map(|value| {
        value.parse::<T>().map_err(|_| {
            ClientError::Config(format!(
                "{} must be a non-negative integer, got '{}'",
                name, value
            ))
        })
    })
    .transpose()
}

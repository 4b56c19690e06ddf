// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Error taxonomy for the vector-operation pipeline.

use std::fmt;
use thiserror::Error;

use crate::core::metadata_filter::FilterError;

pub type ClientResult<T> = Result<T, ClientError>;

/// Status codes reported by the index service, named after the RPC codes the
/// data plane uses on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    ResourceExhausted,
    Unavailable,
    DeadlineExceeded,
    Internal,
    Unimplemented,
    Unknown,
}

impl RpcCode {
    /// Maps a gRPC numeric code (as carried in JSON error bodies) to an `RpcCode`.
    pub fn from_grpc(code: i64) -> Self {
        match code {
            3 => RpcCode::InvalidArgument,
            4 => RpcCode::DeadlineExceeded,
            5 => RpcCode::NotFound,
            6 => RpcCode::AlreadyExists,
            7 => RpcCode::PermissionDenied,
            8 => RpcCode::ResourceExhausted,
            9 => RpcCode::FailedPrecondition,
            12 => RpcCode::Unimplemented,
            13 => RpcCode::Internal,
            14 => RpcCode::Unavailable,
            16 => RpcCode::Unauthenticated,
            _ => RpcCode::Unknown,
        }
    }

    /// Maps an HTTP status returned by the data plane to an `RpcCode`.
    pub fn from_http(status: u16) -> Self {
        match status {
            400 | 422 => RpcCode::InvalidArgument,
            401 => RpcCode::Unauthenticated,
            403 => RpcCode::PermissionDenied,
            404 => RpcCode::NotFound,
            409 => RpcCode::AlreadyExists,
            412 => RpcCode::FailedPrecondition,
            429 => RpcCode::ResourceExhausted,
            500 => RpcCode::Internal,
            501 => RpcCode::Unimplemented,
            502 | 503 => RpcCode::Unavailable,
            504 => RpcCode::DeadlineExceeded,
            _ => RpcCode::Unknown,
        }
    }

    /// Codes that describe the connection rather than the request.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, RpcCode::Unavailable | RpcCode::DeadlineExceeded)
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RpcCode::InvalidArgument => "InvalidArgument",
            RpcCode::Unauthenticated => "Unauthenticated",
            RpcCode::PermissionDenied => "PermissionDenied",
            RpcCode::NotFound => "NotFound",
            RpcCode::AlreadyExists => "AlreadyExists",
            RpcCode::FailedPrecondition => "FailedPrecondition",
            RpcCode::ResourceExhausted => "ResourceExhausted",
            RpcCode::Unavailable => "Unavailable",
            RpcCode::DeadlineExceeded => "DeadlineExceeded",
            RpcCode::Internal => "Internal",
            RpcCode::Unimplemented => "Unimplemented",
            RpcCode::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Malformed caller input, detected before any network call.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Position of the offending element in the caller's sequence, if any.
    pub position: Option<usize>,
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            position: None,
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    /// Prefixes the field path, e.g. `indices` becomes `sparse_values.indices`.
    pub fn within(mut self, parent: &str) -> Self {
        self.field = if self.field.is_empty() {
            parent.to_string()
        } else {
            format!("{}.{}", parent, self.field)
        };
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(position) => write!(
                f,
                "Invalid vector at position {}: field '{}': {}",
                position, self.field, self.reason
            ),
            None => write!(f, "Invalid argument '{}': {}", self.field, self.reason),
        }
    }
}

impl From<FilterError> for ValidationError {
    fn from(err: FilterError) -> Self {
        ValidationError::new("filter", err.to_string())
    }
}

/// A single failed batch inside an aggregate failure.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// 0-based index of the batch in the call's batch sequence.
    pub index: usize,
    pub cause: ClientError,
}

/// One or more batches of a single call failed. Every batch had completed
/// when this error was produced.
#[derive(Error, Debug, Clone)]
pub struct AggregateError {
    pub batch_count: usize,
    /// Sorted by batch index.
    pub failures: Vec<BatchFailure>,
    /// Indices of the batches that completed successfully.
    pub succeeded: Vec<usize>,
}

impl AggregateError {
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} batches failed",
            self.failures.len(),
            self.batch_count
        )?;
        for failure in &self.failures {
            write!(f, "; batch {}: {}", failure.index, failure.cause)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Transport error ({code}): {message}")]
    Transport { code: RpcCode, message: String },

    #[error("Service error ({status}): {message}")]
    Service { status: RpcCode, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ClientError::Validation(ValidationError::new(field, reason))
    }

    pub fn transport(code: RpcCode, message: impl Into<String>) -> Self {
        ClientError::Transport {
            code,
            message: message.into(),
        }
    }

    pub fn service(status: RpcCode, message: impl Into<String>) -> Self {
        ClientError::Service {
            status,
            message: message.into(),
        }
    }

    /// Connectivity and timeout failures may succeed when repeated.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ClientError::Transport { .. })
    }
}

impl From<FilterError> for ClientError {
    fn from(err: FilterError) -> Self {
        ClientError::Validation(err.into())
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Errors
//!
//! One error type for every public operation of the engine. Each variant maps
//! to a stable [`ErrorKind`] whose [`ErrorKind::code`] the transport layer can
//! switch on without reading messages.
//!
//! Validation failures are raised before any side effect. Persistence and
//! generation failures are never retried inside the core.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::generator::GenerationError;
use crate::domain::operation::{OperationError, OperationId, OperationState};
use crate::domain::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Malformed or missing input.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The caller violated the operation lifecycle, e.g. a duplicate ack.
    #[error("operation {operation_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        operation_id: OperationId,
        from: OperationState,
        to: OperationState,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("persistence failure: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("generation failed for {cache_key}: {source}")]
    Generation {
        cache_key: String,
        #[source]
        source: GenerationError,
    },

    #[error("timed out after {timeout:?} waiting for generation of {cache_key}")]
    GenerationTimeout { cache_key: String, timeout: Duration },
}

impl CoordinationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinationError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            CoordinationError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            CoordinationError::NotFound { .. } => ErrorKind::NotFound,
            CoordinationError::Persistence(_) => ErrorKind::Persistence,
            CoordinationError::Generation { .. } => ErrorKind::Generation,
            CoordinationError::GenerationTimeout { .. } => ErrorKind::GenerationTimeout,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        CoordinationError::InvalidParameter(message.into())
    }
}

impl From<OperationError> for CoordinationError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::InvalidTransition {
                operation_id,
                from,
                to,
            } => CoordinationError::InvalidStateTransition {
                operation_id,
                from,
                to,
            },
        }
    }
}

/// Stable, transport-facing classification of a [`CoordinationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    InvalidStateTransition,
    NotFound,
    Persistence,
    Generation,
    GenerationTimeout,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Generation => "generation",
            ErrorKind::GenerationTimeout => "generation_timeout",
        }
    }

    /// Whether resubmitting the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Persistence | ErrorKind::Generation | ErrorKind::GenerationTimeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct_and_stable() {
        let errors = vec![
            CoordinationError::invalid("x"),
            CoordinationError::InvalidStateTransition {
                operation_id: OperationId::new(),
                from: OperationState::Queued,
                to: OperationState::Acknowledged,
            },
            CoordinationError::NotFound { entity: "operation", id: "1".into() },
            CoordinationError::Persistence(RepositoryError::Unavailable("down".into())),
            CoordinationError::Generation {
                cache_key: "k".into(),
                source: GenerationError::Failed("boom".into()),
            },
            CoordinationError::GenerationTimeout {
                cache_key: "k".into(),
                timeout: Duration::from_secs(1),
            },
        ];

        let codes: Vec<&str> = errors.iter().map(|e| e.kind().code()).collect();
        assert_eq!(
            codes,
            vec![
                "invalid_parameter",
                "invalid_state_transition",
                "not_found",
                "persistence",
                "generation",
                "generation_timeout",
            ]
        );
        assert!(!ErrorKind::InvalidParameter.is_transient());
        assert!(ErrorKind::GenerationTimeout.is_transient());
    }

    #[test]
    fn test_operation_error_maps_to_state_transition() {
        let id = OperationId::new();
        let err: CoordinationError = OperationError::InvalidTransition {
            operation_id: id,
            from: OperationState::Acknowledged,
            to: OperationState::Acknowledged,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
        assert!(err.to_string().contains("ACKNOWLEDGED"));
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Configuration generator contract.
//!
//! The generator turns a content type plus canonical parameters into an
//! artifact and a version token. It is assumed deterministic for identical
//! inputs, free of side effects on core state, and possibly slow.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::cache::{CanonicalParameters, ContentType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub bytes: Bytes,
    pub version_token: String,
}

impl GeneratedArtifact {
    pub fn new(bytes: impl Into<Bytes>, version_token: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            version_token: version_token.into(),
        }
    }
}

/// Cloneable so one failed generation can be reported to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("source definition not found: {0}")]
    SourceNotFound(String),

    #[error("generator failed: {0}")]
    Failed(String),

    #[error("generator panicked")]
    Panicked,
}

#[async_trait]
pub trait ConfigurationGenerator: Send + Sync {
    async fn generate(
        &self,
        content_type: &ContentType,
        parameters: &CanonicalParameters,
    ) -> Result<GeneratedArtifact, GenerationError>;
}

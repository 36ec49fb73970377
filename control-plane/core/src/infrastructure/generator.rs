// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Built-in configuration generator.
//!
//! `DigestManifestGenerator` renders the request itself as a manifest: the
//! content type plus the canonical parameters, as YAML for `*yaml` content
//! types and JSON otherwise. The version token is the SHA-256 of the rendered
//! bytes, so identical inputs always produce identical tokens.
//!
//! Used by `fleetctl serve` and `fleetctl simulate` when no external
//! generator is wired in, and by tests that need a real generator.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

use crate::domain::cache::{CanonicalParameters, ContentType};
use crate::domain::generator::{ConfigurationGenerator, GeneratedArtifact, GenerationError};

#[derive(Serialize)]
struct Manifest<'a> {
    content_type: &'a str,
    parameters: &'a CanonicalParameters,
}

#[derive(Debug, Clone, Default)]
pub struct DigestManifestGenerator {
    latency: Option<Duration>,
}

impl DigestManifestGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before rendering; simulates an expensive source.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn render(
        content_type: &ContentType,
        parameters: &CanonicalParameters,
    ) -> Result<Vec<u8>, GenerationError> {
        let manifest = Manifest {
            content_type: content_type.as_str(),
            parameters,
        };
        if content_type.as_str().ends_with("yaml") {
            serde_yaml::to_string(&manifest)
                .map(String::into_bytes)
                .map_err(|e| GenerationError::Failed(e.to_string()))
        } else {
            serde_json::to_vec_pretty(&manifest).map_err(|e| GenerationError::Failed(e.to_string()))
        }
    }
}

#[async_trait]
impl ConfigurationGenerator for DigestManifestGenerator {
    async fn generate(
        &self,
        content_type: &ContentType,
        parameters: &CanonicalParameters,
    ) -> Result<GeneratedArtifact, GenerationError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let rendered = Self::render(content_type, parameters)?;
        let version_token = hex::encode(Sha256::digest(&rendered));
        debug!(
            content_type = %content_type,
            size = rendered.len(),
            version_token = %version_token,
            "Rendered configuration manifest"
        );
        Ok(GeneratedArtifact::new(Bytes::from(rendered), version_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::Parameters;

    fn params(flow: &str) -> CanonicalParameters {
        let mut raw = Parameters::new();
        raw.insert("flowId".to_string(), vec![flow.to_string()]);
        CanonicalParameters::canonicalize(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_json_rendering_is_deterministic() {
        let generator = DigestManifestGenerator::new();
        let ct = ContentType::parse("application/json").unwrap();

        let a = generator.generate(&ct, &params("f1")).await.unwrap();
        let b = generator.generate(&ct, &params("f1")).await.unwrap();
        let c = generator.generate(&ct, &params("f2")).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a.version_token, c.version_token);

        let parsed: serde_json::Value = serde_json::from_slice(&a.bytes).unwrap();
        assert_eq!(parsed["content_type"], "application/json");
        assert_eq!(parsed["parameters"]["flowId"][0], "f1");
    }

    #[tokio::test]
    async fn test_yaml_rendering() {
        let generator = DigestManifestGenerator::new();
        let ct = ContentType::parse("application/yaml").unwrap();
        let artifact = generator.generate(&ct, &params("f1")).await.unwrap();

        let parsed: serde_yaml::Value = serde_yaml::from_slice(&artifact.bytes).unwrap();
        assert_eq!(parsed["content_type"].as_str(), Some("application/yaml"));
        assert_eq!(artifact.version_token.len(), 64);
    }
}

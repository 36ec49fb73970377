// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Configuration Cache Domain
//!
//! Types for the configuration-artifact cache: request canonicalization,
//! cache keys, and the immutable entries that readers share.
//!
//! ## Canonical form
//!
//! Two requests that mean the same thing must map to the same [`CacheKey`]:
//!
//! - content types are trimmed, lowercased, and stripped of media-type
//!   parameters (`application/JSON; charset=utf-8` → `application/json`);
//! - parameter names are trimmed, empty names are rejected;
//! - parameter values are trimmed, blanks dropped, then sorted and
//!   de-duplicated; names left without values are dropped.
//!
//! The key is a SHA-256 over a length-prefixed encoding of the canonical
//! form, so no choice of separators inside values can collide.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::error::CoordinationError;

/// Raw request parameters as received from the transport: name → values.
pub type Parameters = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentType(String);

impl ContentType {
    pub fn parse(raw: &str) -> Result<Self, CoordinationError> {
        let essence = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence.is_empty() {
            return Err(CoordinationError::InvalidParameter(
                "content type must not be empty".to_string(),
            ));
        }
        Ok(Self(essence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters in canonical form. Iteration order is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CanonicalParameters(BTreeMap<String, Vec<String>>);

impl CanonicalParameters {
    pub fn canonicalize(raw: &Parameters) -> Result<Self, CoordinationError> {
        let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, values) in raw {
            let name = name.trim();
            if name.is_empty() {
                return Err(CoordinationError::InvalidParameter(
                    "parameter names must not be empty".to_string(),
                ));
            }
            let values: BTreeSet<String> = values
                .iter()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            if values.is_empty() {
                continue;
            }
            merged.entry(name.to_string()).or_default().extend(values);
        }

        Ok(Self(
            merged
                .into_iter()
                .map(|(name, values)| (name, values.into_iter().collect()))
                .collect(),
        ))
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Hex SHA-256 of the parameters alone.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        self.absorb_into(&mut hasher);
        hex::encode(hasher.finalize())
    }

    fn absorb_into(&self, hasher: &mut Sha256) {
        hasher.update((self.0.len() as u64).to_be_bytes());
        for (name, values) in &self.0 {
            absorb(hasher, name);
            hasher.update((values.len() as u64).to_be_bytes());
            for value in values {
                absorb(hasher, value);
            }
        }
    }
}

fn absorb(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field.as_bytes());
}

/// Deterministic digest of a content type and canonical parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(content_type: &ContentType, parameters: &CanonicalParameters) -> Self {
        let mut hasher = Sha256::new();
        absorb(&mut hasher, content_type.as_str());
        parameters.absorb_into(&mut hasher);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declares a content type the cache serves and the parameters it requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeSpec {
    pub content_type: String,
    #[serde(default)]
    pub required_parameters: Vec<String>,
}

impl ContentTypeSpec {
    pub fn new<I, S>(content_type: impl Into<String>, required_parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            content_type: content_type.into(),
            required_parameters: required_parameters.into_iter().map(Into::into).collect(),
        }
    }
}

/// A validated, canonicalized cache request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub content_type: ContentType,
    pub parameters: CanonicalParameters,
    pub key: CacheKey,
}

/// Recognized content types and their required parameter names.
#[derive(Debug, Clone, Default)]
pub struct ContentTypeRegistry {
    required: HashMap<ContentType, Vec<String>>,
}

impl ContentTypeRegistry {
    pub fn from_specs(specs: &[ContentTypeSpec]) -> Result<Self, CoordinationError> {
        let mut registry = Self::default();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, spec: &ContentTypeSpec) -> Result<(), CoordinationError> {
        let content_type = ContentType::parse(&spec.content_type)?;
        let mut required: Vec<String> = spec
            .required_parameters
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        required.sort();
        required.dedup();
        self.required.insert(content_type, required);
        Ok(())
    }

    pub fn is_registered(&self, content_type: &ContentType) -> bool {
        self.required.contains_key(content_type)
    }

    pub fn content_types(&self) -> Vec<&ContentType> {
        let mut types: Vec<&ContentType> = self.required.keys().collect();
        types.sort();
        types
    }

    /// Validate and canonicalize a raw request.
    ///
    /// Fails with `InvalidParameter` for unknown content types, malformed
    /// parameter names, or missing required parameters.
    pub fn resolve(
        &self,
        content_type: &str,
        parameters: &Parameters,
    ) -> Result<CacheRequest, CoordinationError> {
        let content_type = ContentType::parse(content_type)?;
        let required = self.required.get(&content_type).ok_or_else(|| {
            CoordinationError::InvalidParameter(format!(
                "unsupported content type '{content_type}'"
            ))
        })?;

        let parameters = CanonicalParameters::canonicalize(parameters)?;
        let missing: Vec<&str> = required
            .iter()
            .filter(|name| !parameters.contains(name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(CoordinationError::InvalidParameter(format!(
                "missing required parameter(s) for {content_type}: {}",
                missing.join(", ")
            )));
        }

        let key = CacheKey::derive(&content_type, &parameters);
        Ok(CacheRequest {
            content_type,
            parameters,
            key,
        })
    }
}

/// A generated artifact. Never mutated once stored; shared as `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub content_type: ContentType,
    pub parameters_digest: String,
    pub artifact: Bytes,
    pub version_token: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        match ttl {
            None => false,
            Some(ttl) => (now - self.created_at)
                .to_std()
                .map(|age| age >= ttl)
                .unwrap_or(false),
        }
    }
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Served from a live entry.
    Hit,
    /// This caller started the generation.
    Generated,
    /// This caller waited on a generation started by another caller.
    Joined,
}

#[derive(Debug, Clone)]
pub struct CacheFileInfo {
    entry: Arc<CacheEntry>,
    source: CacheSource,
}

impl CacheFileInfo {
    pub fn new(entry: Arc<CacheEntry>, source: CacheSource) -> Self {
        Self { entry, source }
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.entry.key
    }

    pub fn content_type(&self) -> &ContentType {
        &self.entry.content_type
    }

    pub fn version_token(&self) -> &str {
        &self.entry.version_token
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.entry.created_at
    }

    pub fn size(&self) -> usize {
        self.entry.artifact.len()
    }

    pub fn artifact(&self) -> Bytes {
        self.entry.artifact.clone()
    }

    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    pub fn source(&self) -> CacheSource {
        self.source
    }
}

/// Result of a lookup that carries the caller's last-seen version token.
#[derive(Debug, Clone)]
pub enum ConditionalFileInfo {
    NotModified(CacheFileInfo),
    Modified(CacheFileInfo),
}

impl ConditionalFileInfo {
    pub fn info(&self) -> &CacheFileInfo {
        match self {
            ConditionalFileInfo::NotModified(info) | ConditionalFileInfo::Modified(info) => info,
        }
    }

    pub fn is_modified(&self) -> bool {
        matches!(self, ConditionalFileInfo::Modified(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &[&str])]) -> Parameters {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_content_type_normalization() {
        let ct = ContentType::parse(" Application/JSON; charset=utf-8 ").unwrap();
        assert_eq!(ct.as_str(), "application/json");
        assert!(ContentType::parse("  ").is_err());
        assert!(ContentType::parse(";charset=utf-8").is_err());
    }

    #[test]
    fn test_equivalent_parameters_share_a_key() {
        let ct = ContentType::parse("application/json").unwrap();
        let a = CanonicalParameters::canonicalize(&params(&[
            ("flowId", &["f1"]),
            ("class", &["b", "a", "a"]),
        ]))
        .unwrap();
        let b = CanonicalParameters::canonicalize(&params(&[
            (" class ", &["a", " b", ""]),
            ("flowId", &["f1 "]),
            ("empty", &["  "]),
        ]))
        .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.get("class"), Some(&["a".to_string(), "b".to_string()][..]));
        assert!(!b.contains("empty"));
        assert_eq!(CacheKey::derive(&ct, &a), CacheKey::derive(&ct, &b));
    }

    #[test]
    fn test_keys_differ_by_content_type_and_values() {
        let json = ContentType::parse("application/json").unwrap();
        let yaml = ContentType::parse("application/yaml").unwrap();
        let p1 = CanonicalParameters::canonicalize(&params(&[("flowId", &["f1"])])).unwrap();
        let p2 = CanonicalParameters::canonicalize(&params(&[("flowId", &["f2"])])).unwrap();

        assert_ne!(CacheKey::derive(&json, &p1), CacheKey::derive(&yaml, &p1));
        assert_ne!(CacheKey::derive(&json, &p1), CacheKey::derive(&json, &p2));
        assert_eq!(CacheKey::derive(&json, &p1).as_str().len(), 64);
    }

    #[test]
    fn test_length_prefix_prevents_separator_collisions() {
        let ct = ContentType::parse("text/plain").unwrap();
        let a = CanonicalParameters::canonicalize(&params(&[("a", &["b,c"])])).unwrap();
        let b = CanonicalParameters::canonicalize(&params(&[("a", &["b", "c"])])).unwrap();
        assert_ne!(CacheKey::derive(&ct, &a), CacheKey::derive(&ct, &b));
    }

    #[test]
    fn test_empty_parameter_name_rejected() {
        let err = CanonicalParameters::canonicalize(&params(&[("  ", &["x"])])).unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidParameter(_)));
    }

    #[test]
    fn test_registry_resolve() {
        let registry = ContentTypeRegistry::from_specs(&[
            ContentTypeSpec::new("application/json", ["flowId"]),
            ContentTypeSpec::new("text/plain", Vec::<String>::new()),
        ])
        .unwrap();

        let request = registry
            .resolve("APPLICATION/JSON", &params(&[("flowId", &["f1"])]))
            .unwrap();
        assert_eq!(request.content_type.as_str(), "application/json");

        let missing = registry.resolve("application/json", &params(&[("flowId", &[" "])]));
        assert!(matches!(missing, Err(CoordinationError::InvalidParameter(msg)) if msg.contains("flowId")));

        let unknown = registry.resolve("application/xml", &Parameters::new());
        assert!(matches!(unknown, Err(CoordinationError::InvalidParameter(_))));

        assert!(registry.resolve("text/plain", &Parameters::new()).is_ok());
    }

    #[test]
    fn test_entry_expiry() {
        let now = Utc::now();
        let entry = CacheEntry {
            key: CacheKey("k".to_string()),
            content_type: ContentType::parse("text/plain").unwrap(),
            parameters_digest: String::new(),
            artifact: Bytes::from_static(b"x"),
            version_token: "v1".to_string(),
            created_at: now - chrono::Duration::seconds(120),
        };
        assert!(!entry.is_expired(None, now));
        assert!(!entry.is_expired(Some(Duration::from_secs(300)), now));
        assert!(entry.is_expired(Some(Duration::from_secs(60)), now));
    }
}

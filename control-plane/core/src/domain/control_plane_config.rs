// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Control Plane Configuration Types
//
// Defines the configuration schema for a control-plane instance:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Operation dispatcher and redelivery policy
// - Configuration cache (TTL, generation timeout, served content types)
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::cache::{ContentType, ContentTypeSpec};

pub const API_VERSION: &str = "fleet.control/v1";
pub const KIND: &str = "ControlPlaneConfig";

/// Top-level Kubernetes-style control plane configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfigManifest {
    /// API version (must be "fleet.control/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ControlPlaneConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ControlPlaneConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable instance name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneConfigSpec {
    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub observability: ObservabilitySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Operations attached to one heartbeat response when the caller does not ask
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Heartbeats without an ack before a delivered operation is requeued (0 disables)
    #[serde(default = "default_redelivery_after_heartbeats")]
    pub redelivery_after_heartbeats: u32,

    /// Time in DELIVERED before the sweeper requeues an operation
    #[serde(default = "default_redelivery_timeout", with = "humantime_serde")]
    pub redelivery_timeout: Duration,

    /// How often the redelivery sweeper runs
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// How long acknowledged/rejected operations are kept before purge
    #[serde(default = "default_terminal_retention", with = "humantime_serde")]
    pub terminal_retention: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Entry time-to-live; entries never expire when unset
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,

    /// How long a waiter blocks on an in-flight generation
    #[serde(default = "default_generation_timeout", with = "humantime_serde")]
    pub generation_timeout: Duration,

    /// Content types served and their required parameters
    #[serde(default = "default_content_types")]
    pub content_types: Vec<ContentTypeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (text or json)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Prometheus exporter port; exporter disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,

    /// Buffered events per subscriber before the oldest are dropped
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

fn default_max_batch_size() -> usize {
    50
}

fn default_redelivery_after_heartbeats() -> u32 {
    3
}

fn default_redelivery_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_terminal_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_generation_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_content_types() -> Vec<ContentTypeSpec> {
    vec![
        ContentTypeSpec::new("application/json", ["flowId"]),
        ContentTypeSpec::new("application/yaml", ["flowId"]),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_event_bus_capacity() -> usize {
    1000
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            redelivery_after_heartbeats: default_redelivery_after_heartbeats(),
            redelivery_timeout: default_redelivery_timeout(),
            sweep_interval: default_sweep_interval(),
            terminal_retention: default_terminal_retention(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: None,
            generation_timeout: default_generation_timeout(),
            content_types: default_content_types(),
        }
    }
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl Default for ControlPlaneConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "default".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: ControlPlaneConfigSpec::default(),
        }
    }
}

impl ControlPlaneConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Candidate configuration paths in precedence order
    /// 1. FLEET_CONFIG_PATH environment variable
    /// 2. ./fleet-config.yaml (working directory)
    /// 3. ~/.fleet/config.yaml (user home)
    /// 4. /etc/fleet/config.yaml (system, Unix) or C:\ProgramData\Fleet\config.yaml (Windows)
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var("FLEET_CONFIG_PATH") {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./fleet-config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".fleet").join("config.yaml"));
        }
        #[cfg(unix)]
        paths.push(PathBuf::from("/etc/fleet/config.yaml"));
        #[cfg(windows)]
        paths.push(PathBuf::from("C:\\ProgramData\\Fleet\\config.yaml"));
        paths
    }

    /// First existing path from [`Self::search_paths`]
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| path.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    /// This allows container deployments to override config via env vars
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("FLEET_MAX_BATCH_SIZE") {
            match val.trim().parse::<usize>() {
                Ok(size) => {
                    tracing::info!("Environment override: FLEET_MAX_BATCH_SIZE={}", size);
                    self.spec.dispatcher.max_batch_size = size;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for FLEET_MAX_BATCH_SIZE: '{}'. Expected a positive integer. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("FLEET_CACHE_TTL") {
            match val.trim() {
                "" | "none" | "off" => {
                    tracing::info!("Environment override: FLEET_CACHE_TTL disabled");
                    self.spec.cache.ttl = None;
                }
                raw => match humantime::parse_duration(raw) {
                    Ok(ttl) => {
                        tracing::info!("Environment override: FLEET_CACHE_TTL={:?}", ttl);
                        self.spec.cache.ttl = Some(ttl);
                    }
                    Err(_) => tracing::warn!(
                        "Invalid value for FLEET_CACHE_TTL: '{}'. Expected a duration like '10m'. Ignoring.",
                        val
                    ),
                },
            }
        }

        if let Some(val) = lookup("FLEET_LOG_LEVEL") {
            tracing::info!("Environment override: FLEET_LOG_LEVEL={}", val);
            self.spec.observability.log_level = val;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let dispatcher = &self.spec.dispatcher;
        if dispatcher.max_batch_size == 0 {
            anyhow::bail!("spec.dispatcher.max_batch_size must be at least 1");
        }
        if dispatcher.redelivery_timeout.is_zero() {
            anyhow::bail!("spec.dispatcher.redelivery_timeout must be greater than zero");
        }
        if dispatcher.sweep_interval.is_zero() {
            anyhow::bail!("spec.dispatcher.sweep_interval must be greater than zero");
        }

        let cache = &self.spec.cache;
        if cache.generation_timeout.is_zero() {
            anyhow::bail!("spec.cache.generation_timeout must be greater than zero");
        }
        if cache.ttl.is_some_and(|ttl| ttl.is_zero()) {
            anyhow::bail!("spec.cache.ttl must be greater than zero when set");
        }
        let mut seen = std::collections::HashSet::new();
        for spec in &cache.content_types {
            let content_type = ContentType::parse(&spec.content_type)
                .map_err(|e| anyhow::anyhow!("spec.cache.content_types: {}", e))?;
            if !seen.insert(content_type.clone()) {
                anyhow::bail!("Duplicate content type in spec.cache.content_types: {}", content_type);
            }
        }

        match self.spec.observability.log_format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("Invalid log_format: '{}'. Must be 'text' or 'json'", other),
        }
        if self.spec.observability.event_bus_capacity == 0 {
            anyhow::bail!("spec.observability.event_bus_capacity must be at least 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = ControlPlaneConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.dispatcher.max_batch_size, 50);
        assert_eq!(manifest.spec.cache.content_types.len(), 2);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_durations_and_content_types() {
        let yaml = r#"
apiVersion: fleet.control/v1
kind: ControlPlaneConfig
metadata:
  name: edge-eu
spec:
  dispatcher:
    max_batch_size: 10
    redelivery_after_heartbeats: 5
    redelivery_timeout: 2m
  cache:
    ttl: 1h
    generation_timeout: 15s
    content_types:
      - content_type: application/json
        required_parameters: [flowId, class]
"#;
        let manifest = ControlPlaneConfigManifest::from_yaml_str(yaml).unwrap();
        let spec = &manifest.spec;
        assert_eq!(spec.dispatcher.max_batch_size, 10);
        assert_eq!(spec.dispatcher.redelivery_after_heartbeats, 5);
        assert_eq!(spec.dispatcher.redelivery_timeout, Duration::from_secs(120));
        assert_eq!(spec.dispatcher.sweep_interval, Duration::from_secs(30));
        assert_eq!(spec.cache.ttl, Some(Duration::from_secs(3600)));
        assert_eq!(spec.cache.generation_timeout, Duration::from_secs(15));
        assert_eq!(spec.cache.content_types[0].required_parameters, vec!["flowId", "class"]);
        assert_eq!(spec.observability.log_format, "text");
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet-config.yaml");

        let mut manifest = ControlPlaneConfigManifest::default();
        manifest.spec.cache.ttl = Some(Duration::from_secs(90));
        manifest.to_yaml_file(&path).unwrap();

        let loaded = ControlPlaneConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.spec.cache.ttl, Some(Duration::from_secs(90)));
        assert_eq!(loaded.metadata.name, "default");
    }

    #[test]
    fn test_validation() {
        let mut manifest = ControlPlaneConfigManifest::default();
        manifest.api_version = "v0".to_string();
        assert!(manifest.validate().is_err());

        let mut manifest = ControlPlaneConfigManifest::default();
        manifest.spec.dispatcher.max_batch_size = 0;
        assert!(manifest.validate().is_err());

        let mut manifest = ControlPlaneConfigManifest::default();
        manifest.spec.cache.content_types.push(ContentTypeSpec::new(
            "Application/JSON; charset=utf-8",
            ["flowId"],
        ));
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate content type"));

        let mut manifest = ControlPlaneConfigManifest::default();
        manifest.spec.observability.log_format = "xml".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let mut manifest = ControlPlaneConfigManifest::default();
        manifest.apply_overrides(|name| match name {
            "FLEET_MAX_BATCH_SIZE" => Some("7".to_string()),
            "FLEET_CACHE_TTL" => Some("10m".to_string()),
            _ => None,
        });
        assert_eq!(manifest.spec.dispatcher.max_batch_size, 7);
        assert_eq!(manifest.spec.cache.ttl, Some(Duration::from_secs(600)));

        manifest.apply_overrides(|name| match name {
            "FLEET_MAX_BATCH_SIZE" => Some("lots".to_string()),
            "FLEET_CACHE_TTL" => Some("off".to_string()),
            _ => None,
        });
        assert_eq!(manifest.spec.dispatcher.max_batch_size, 7);
        assert_eq!(manifest.spec.cache.ttl, None);
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Configuration Cache
//!
//! Serves generated configuration artifacts keyed by content type and
//! canonical parameters, generating each missing artifact at most once at a
//! time.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Validate requests, serve hits, and coalesce concurrent
//!   misses into one generation (single-flight)
//!
//! ## Single-flight
//!
//! The first caller to miss registers a [`Flight`] under the key and spawns
//! the generation as its own task. Later callers clone the flight's `watch`
//! receiver and wait, each bounded by `generation_timeout`. The task owns the
//! outcome: it stores the entry, clears the marker, and publishes the result
//! to every waiter whether or not anyone is still listening. Dropping or
//! timing out a waiter never cancels the generation.
//!
//! Invalidation unregisters an in-flight generation. Its result still reaches
//! the waiters of that attempt but is not stored, and the next caller starts
//! a fresh flight. Each flight carries an id; a finishing task only stores
//! and clears the marker if it still owns the slot, checked under the same
//! `in_flight` shard lock that invalidation takes.
//!
//! Lock order is `in_flight` then `entries`; nothing takes them the other way
//! round.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::cache::{
    CacheEntry, CacheFileInfo, CacheKey, CacheRequest, CacheSource, ConditionalFileInfo, ContentType,
    ContentTypeRegistry, ContentTypeSpec, Parameters,
};
use crate::domain::control_plane_config::CacheSettings;
use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::events::CacheEvent;
use crate::domain::generator::{ConfigurationGenerator, GenerationError};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries older than this are regenerated on lookup; `None` keeps them
    /// until invalidated.
    pub ttl: Option<Duration>,
    /// How long a caller waits for a generation before giving up.
    pub generation_timeout: Duration,
    pub content_types: Vec<ContentTypeSpec>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            ttl: settings.ttl,
            generation_timeout: settings.generation_timeout,
            content_types: settings.content_types.clone(),
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses that joined a generation already in flight.
    pub joined: u64,
    pub generations: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub entries: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    generations: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

type FlightOutcome = Option<Result<Arc<CacheEntry>, GenerationError>>;

/// A generation in progress.
struct Flight {
    id: u64,
    content_type: ContentType,
    receiver: watch::Receiver<FlightOutcome>,
}

struct CacheInner {
    generator: Arc<dyn ConfigurationGenerator>,
    registry: ContentTypeRegistry,
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    in_flight: DashMap<CacheKey, Flight>,
    next_flight: AtomicU64,
    config: CacheConfig,
    counters: Counters,
    event_bus: Arc<EventBus>,
}

#[derive(Clone)]
pub struct ConfigurationCache {
    inner: Arc<CacheInner>,
}

impl ConfigurationCache {
    pub fn new(
        generator: Arc<dyn ConfigurationGenerator>,
        config: CacheConfig,
        event_bus: Arc<EventBus>,
    ) -> CoordinationResult<Self> {
        let registry = ContentTypeRegistry::from_specs(&config.content_types)?;
        info!(
            content_types = ?registry.content_types().iter().map(|ct| ct.as_str()).collect::<Vec<_>>(),
            ttl = ?config.ttl,
            generation_timeout = ?config.generation_timeout,
            "Configuration cache ready"
        );
        Ok(Self {
            inner: Arc::new(CacheInner {
                generator,
                registry,
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                next_flight: AtomicU64::new(0),
                config,
                counters: Counters::default(),
                event_bus,
            }),
        })
    }

    pub fn registry(&self) -> &ContentTypeRegistry {
        &self.inner.registry
    }

    /// Key a request would be stored under. Validates like a lookup.
    pub fn cache_key_for(&self, content_type: &str, parameters: &Parameters) -> CoordinationResult<CacheKey> {
        Ok(self.inner.registry.resolve(content_type, parameters)?.key)
    }

    pub async fn get_cache_file_info(
        &self,
        content_type: &str,
        parameters: &Parameters,
    ) -> CoordinationResult<CacheFileInfo> {
        let request = self.inner.registry.resolve(content_type, parameters)?;

        if let Some(entry) = self.live_entry(&request.key, Utc::now()) {
            return Ok(self.hit(&request.key, entry));
        }

        let (mut receiver, source) = match self.inner.in_flight.entry(request.key.clone()) {
            Entry::Occupied(flight) => (flight.get().receiver.clone(), CacheSource::Joined),
            Entry::Vacant(slot) => {
                // A flight may have stored the entry since the first lookup
                if let Some(entry) = self.live_entry(&request.key, Utc::now()) {
                    return Ok(self.hit(&request.key, entry));
                }
                let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                let (sender, receiver) = watch::channel(None);
                slot.insert(Flight {
                    id,
                    content_type: request.content_type.clone(),
                    receiver: receiver.clone(),
                });
                self.spawn_generation(id, request.clone(), sender);
                (receiver, CacheSource::Generated)
            }
        };

        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("fleet_cache_misses_total").increment(1);

        if source == CacheSource::Joined {
            self.inner.counters.joined.fetch_add(1, Ordering::Relaxed);
            debug!(cache_key = %request.key, "Joining in-flight generation");
        }

        let timeout = self.inner.config.generation_timeout;
        let outcome = tokio::time::timeout(timeout, async {
            receiver
                .wait_for(Option::is_some)
                .await
                .map(|outcome| outcome.clone())
        })
        .await;

        match outcome {
            Ok(Ok(Some(Ok(entry)))) => Ok(CacheFileInfo::new(entry, source)),
            Ok(Ok(Some(Err(error)))) => Err(CoordinationError::Generation {
                cache_key: request.key.to_string(),
                source: error,
            }),
            // Sender dropped without publishing
            Ok(Ok(None)) | Ok(Err(_)) => Err(CoordinationError::Generation {
                cache_key: request.key.to_string(),
                source: GenerationError::Failed("generation abandoned".to_string()),
            }),
            Err(_) => {
                self.inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(cache_key = %request.key, ?timeout, "Timed out waiting for generation");
                Err(CoordinationError::GenerationTimeout {
                    cache_key: request.key.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Lookup that reports whether the caller's known version is current.
    pub async fn get_cache_file_if_modified(
        &self,
        content_type: &str,
        parameters: &Parameters,
        known_version: Option<&str>,
    ) -> CoordinationResult<ConditionalFileInfo> {
        let info = self.get_cache_file_info(content_type, parameters).await?;
        if known_version.is_some_and(|known| known == info.version_token()) {
            Ok(ConditionalFileInfo::NotModified(info))
        } else {
            Ok(ConditionalFileInfo::Modified(info))
        }
    }

    fn hit(&self, key: &CacheKey, entry: Arc<CacheEntry>) -> CacheFileInfo {
        self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("fleet_cache_hits_total").increment(1);
        debug!(cache_key = %key, "Cache hit");
        CacheFileInfo::new(entry, CacheSource::Hit)
    }

    fn live_entry(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Arc<CacheEntry>> {
        let entry = self.inner.entries.get(key).map(|entry| entry.value().clone())?;
        if !entry.is_expired(self.inner.config.ttl, now) {
            return Some(entry);
        }
        // Only drop the exact entry we judged expired
        self.inner
            .entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, &entry));
        debug!(cache_key = %key, "Cache entry expired");
        None
    }

    fn spawn_generation(&self, flight_id: u64, request: CacheRequest, sender: watch::Sender<FlightOutcome>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            debug!(cache_key = %request.key, content_type = %request.content_type, "Generating configuration");
            let generated = AssertUnwindSafe(
                inner
                    .generator
                    .generate(&request.content_type, &request.parameters),
            )
            .catch_unwind()
            .await
            .unwrap_or(Err(GenerationError::Panicked));

            let outcome = match generated {
                Ok(artifact) => Ok(Arc::new(CacheEntry {
                    key: request.key.clone(),
                    content_type: request.content_type.clone(),
                    parameters_digest: request.parameters.digest(),
                    artifact: artifact.bytes,
                    version_token: artifact.version_token,
                    created_at: Utc::now(),
                })),
                Err(e) => Err(e),
            };

            inner.complete(flight_id, &request, &outcome);
            sender.send_replace(Some(outcome));
        });
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        // Waiters already attached keep their receivers; new callers start over
        let flight_content_type = self
            .inner
            .in_flight
            .remove(key)
            .map(|(_, flight)| flight.content_type);
        let removed = self.inner.entries.remove(key).map(|(_, entry)| entry);

        let content_type = removed
            .as_ref()
            .map(|entry| entry.content_type.clone())
            .or(flight_content_type);
        match content_type {
            Some(content_type) => {
                info!(cache_key = %key, content_type = %content_type, "Cache entry invalidated");
                self.inner.event_bus.publish_cache_event(CacheEvent::EntryInvalidated {
                    cache_key: key.clone(),
                    content_type,
                    invalidated_at: Utc::now(),
                });
                true
            }
            None => false,
        }
    }

    /// Invalidate every entry and in-flight generation of one content type.
    pub fn invalidate_content_type(&self, content_type: &str) -> CoordinationResult<usize> {
        let content_type = ContentType::parse(content_type)?;
        let mut keys: Vec<CacheKey> = self
            .inner
            .in_flight
            .iter()
            .filter(|flight| flight.content_type == content_type)
            .map(|flight| flight.key().clone())
            .collect();
        keys.extend(
            self.inner
                .entries
                .iter()
                .filter(|entry| entry.content_type == content_type)
                .map(|entry| entry.key().clone()),
        );
        keys.sort();
        keys.dedup();

        let mut invalidated = 0;
        for key in keys {
            if self.invalidate(&key) {
                invalidated += 1;
            }
        }
        Ok(invalidated)
    }

    pub fn invalidate_all(&self) -> usize {
        let mut keys: Vec<CacheKey> = self.inner.in_flight.iter().map(|f| f.key().clone()).collect();
        keys.extend(self.inner.entries.iter().map(|e| e.key().clone()));
        keys.sort();
        keys.dedup();

        let mut invalidated = 0;
        for key in keys {
            if self.invalidate(&key) {
                invalidated += 1;
            }
        }
        info!(invalidated, "Invalidated configuration cache");
        invalidated
    }

    /// Drop every entry past its TTL. Returns how many were removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.inner.config.ttl;
        if ttl.is_none() {
            return 0;
        }
        let before = self.inner.entries.len();
        self.inner.entries.retain(|_, entry| !entry.is_expired(ttl, now));
        before.saturating_sub(self.inner.entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            joined: counters.joined.load(Ordering::Relaxed),
            generations: counters.generations.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            entries: self.inner.entries.len(),
            in_flight: self.inner.in_flight.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

impl CacheInner {
    /// Record a finished generation and clear its in-flight marker.
    ///
    /// Nothing is stored once the flight has been invalidated, even if a
    /// newer flight now occupies the key.
    fn complete(&self, flight_id: u64, request: &CacheRequest, outcome: &Result<Arc<CacheEntry>, GenerationError>) {
        let key = &request.key;
        let mut stored = false;
        if let Entry::Occupied(flight) = self.in_flight.entry(key.clone()) {
            if flight.get().id == flight_id {
                if let Ok(entry) = outcome {
                    self.entries.insert(key.clone(), entry.clone());
                    stored = true;
                }
                flight.remove();
            }
        }

        match outcome {
            Ok(entry) => {
                self.counters.generations.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("fleet_cache_generations_total", "result" => "success").increment(1);
                if stored {
                    info!(
                        cache_key = %key,
                        content_type = %entry.content_type,
                        size = entry.artifact.len(),
                        version_token = %entry.version_token,
                        "Stored configuration artifact"
                    );
                    self.event_bus.publish_cache_event(CacheEvent::EntryStored {
                        cache_key: key.clone(),
                        content_type: entry.content_type.clone(),
                        version_token: entry.version_token.clone(),
                        stored_at: entry.created_at,
                    });
                } else {
                    debug!(cache_key = %key, "Discarding artifact invalidated during generation");
                }
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("fleet_cache_generations_total", "result" => "failure").increment(1);
                warn!(cache_key = %key, content_type = %request.content_type, error = %e, "Configuration generation failed");
                self.event_bus.publish_cache_event(CacheEvent::GenerationFailed {
                    cache_key: key.clone(),
                    content_type: request.content_type.clone(),
                    error: e.to_string(),
                    failed_at: Utc::now(),
                });
            }
        }
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the configuration cache's single-flight behavior.
//!
//! A counting generator records how many times it is invoked, so each test
//! can assert exactly how much generation work concurrent callers caused.

use async_trait::async_trait;
use fleet_control_core::application::{CacheConfig, ConfigurationCache};
use fleet_control_core::domain::cache::{CacheSource, CanonicalParameters, ContentType, ContentTypeSpec, Parameters};
use fleet_control_core::domain::error::{CoordinationError, ErrorKind};
use fleet_control_core::domain::events::CacheEvent;
use fleet_control_core::domain::generator::{ConfigurationGenerator, GeneratedArtifact, GenerationError};
use fleet_control_core::infrastructure::event_bus::{DomainEvent, EventBus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
}

struct CountingGenerator {
    calls: AtomicUsize,
    delay: Duration,
    behavior: Behavior,
}

impl CountingGenerator {
    fn new(delay: Duration, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            behavior,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigurationGenerator for CountingGenerator {
    async fn generate(
        &self,
        content_type: &ContentType,
        parameters: &CanonicalParameters,
    ) -> Result<GeneratedArtifact, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        match self.behavior {
            Behavior::Succeed => Ok(GeneratedArtifact::new(
                format!("{content_type}:{}", parameters.digest()).into_bytes(),
                format!("v{call}"),
            )),
            Behavior::Fail => Err(GenerationError::SourceNotFound("flow definition".to_string())),
            Behavior::Panic => panic!("generator bug"),
        }
    }
}

fn cache_with(generator: Arc<CountingGenerator>, generation_timeout: Duration) -> (ConfigurationCache, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new(256));
    let cache = ConfigurationCache::new(
        generator,
        CacheConfig {
            ttl: None,
            generation_timeout,
            content_types: vec![ContentTypeSpec::new("application/json", ["flowId"])],
        },
        bus.clone(),
    )
    .unwrap();
    (cache, bus)
}

fn flow(id: &str) -> Parameters {
    let mut params = Parameters::new();
    params.insert("flowId".to_string(), vec![id.to_string()]);
    params
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_cold_callers_share_one_generation() {
    let generator = CountingGenerator::new(Duration::from_millis(50), Behavior::Succeed);
    let (cache, _) = cache_with(generator.clone(), Duration::from_secs(5));

    let params = flow("f1");
    let (a, b) = tokio::join!(
        cache.get_cache_file_info("application/json", &params),
        cache.get_cache_file_info("application/json", &params),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(generator.calls(), 1);
    assert_eq!(a.version_token(), b.version_token());
    let mut sources = [a.source(), b.source()];
    sources.sort_by_key(|s| *s as u8);
    assert_eq!(sources, [CacheSource::Generated, CacheSource::Joined]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_callers_one_generation() {
    let generator = CountingGenerator::new(Duration::from_millis(30), Behavior::Succeed);
    let (cache, _) = cache_with(generator.clone(), Duration::from_secs(5));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_cache_file_info("application/json", &flow("f1"))
                .await
                .unwrap()
                .version_token()
                .to_string()
        }));
    }
    let mut tokens = Vec::new();
    for handle in handles {
        tokens.push(handle.await.unwrap());
    }

    assert_eq!(generator.calls(), 1);
    assert!(tokens.iter().all(|t| t == &tokens[0]));
    let stats = cache.stats();
    assert_eq!(stats.generations, 1);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.hits + stats.misses, 32);
}

#[tokio::test]
async fn test_distinct_keys_generate_independently() {
    let generator = CountingGenerator::new(Duration::from_millis(5), Behavior::Succeed);
    let (cache, _) = cache_with(generator.clone(), Duration::from_secs(5));

    let (f1, f2) = (flow("f1"), flow("f2"));
    let (a, b) = tokio::join!(
        cache.get_cache_file_info("application/json", &f1),
        cache.get_cache_file_info("application/json", &f2),
    );
    assert_ne!(a.unwrap().cache_key(), b.unwrap().cache_key());
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_missing_parameter_never_reaches_generator() {
    let generator = CountingGenerator::new(Duration::ZERO, Behavior::Succeed);
    let (cache, _) = cache_with(generator.clone(), Duration::from_secs(5));

    let mut blank = Parameters::new();
    blank.insert("flowId".to_string(), vec!["  ".to_string()]);
    for params in [Parameters::new(), blank] {
        let err = cache
            .get_cache_file_info("application/json", &params)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }
    assert_eq!(generator.calls(), 0);
    assert!(cache.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failure_reaches_every_waiter_then_retries() {
    let generator = CountingGenerator::new(Duration::from_millis(30), Behavior::Fail);
    let (cache, bus) = cache_with(generator.clone(), Duration::from_secs(5));
    let mut events = bus.subscribe();

    let params = flow("f1");
    let (a, b) = tokio::join!(
        cache.get_cache_file_info("application/json", &params),
        cache.get_cache_file_info("application/json", &params),
    );
    for result in [a, b] {
        match result {
            Err(CoordinationError::Generation { source, .. }) => {
                assert!(matches!(source, GenerationError::SourceNotFound(_)));
            }
            other => panic!("expected generation failure, got {other:?}"),
        }
    }
    assert_eq!(generator.calls(), 1);
    assert_eq!(cache.stats().in_flight, 0);

    match events.recv().await.unwrap() {
        DomainEvent::Cache(CacheEvent::GenerationFailed { content_type, .. }) => {
            assert_eq!(content_type.as_str(), "application/json");
        }
        other => panic!("unexpected event {other:?}"),
    }

    // The marker is gone, so a fresh request starts a new attempt
    assert!(cache.get_cache_file_info("application/json", &params).await.is_err());
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_panicking_generator_is_reported_as_failure() {
    let generator = CountingGenerator::new(Duration::ZERO, Behavior::Panic);
    let (cache, _) = cache_with(generator.clone(), Duration::from_secs(5));

    let err = cache
        .get_cache_file_info("application/json", &flow("f1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinationError::Generation {
            source: GenerationError::Panicked,
            ..
        }
    ));
    assert_eq!(cache.stats().in_flight, 0);
}

#[tokio::test]
async fn test_waiter_timeout_does_not_cancel_generation() {
    let generator = CountingGenerator::new(Duration::from_millis(150), Behavior::Succeed);
    let (cache, _) = cache_with(generator.clone(), Duration::from_millis(20));

    let err = cache
        .get_cache_file_info("application/json", &flow("f1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GenerationTimeout);
    assert_eq!(cache.stats().timeouts, 1);

    // The spawned generation finishes on its own and fills the cache
    tokio::time::sleep(Duration::from_millis(250)).await;
    let info = cache
        .get_cache_file_info("application/json", &flow("f1"))
        .await
        .unwrap();
    assert_eq!(info.source(), CacheSource::Hit);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_invalidation_during_generation_discards_result() {
    let generator = CountingGenerator::new(Duration::from_millis(100), Behavior::Succeed);
    let (cache, _) = cache_with(generator.clone(), Duration::from_secs(5));
    let key = cache.cache_key_for("application/json", &flow("f1")).unwrap();

    let before = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_cache_file_info("application/json", &flow("f1")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(cache.invalidate(&key));

    // Issued while the invalidated generation is still running
    let after = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_cache_file_info("application/json", &flow("f1")).await })
    };

    // The waiter of the invalidated attempt still gets its result
    let stale = before.await.unwrap().unwrap();
    assert_eq!(stale.version_token(), "v1");

    let fresh = after.await.unwrap().unwrap();
    assert_eq!(fresh.source(), CacheSource::Generated);
    assert_eq!(fresh.version_token(), "v2");
    assert_eq!(generator.calls(), 2);

    // Only the post-invalidation artifact was stored
    let cached = cache
        .get_cache_file_info("application/json", &flow("f1"))
        .await
        .unwrap();
    assert_eq!(cached.source(), CacheSource::Hit);
    assert_eq!(cached.version_token(), "v2");
    assert_eq!(cache.stats().in_flight, 0);
}

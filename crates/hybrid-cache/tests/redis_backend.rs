//! Integration tests for the Redis-backed shared tier and lock service.
//!
//! Tests use testcontainers to spin up a real Redis instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hybrid_cache::{
    CacheError, CachePolicy, DistributedTier, HybridCacheConfig, HybridCacheProvider, LockManager,
    RedisConfig, backend, lock_key_of,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

/// Config for one test; `instance_name` keeps tests from seeing each other's keys.
async fn redis_config(instance_name: &str) -> HybridCacheConfig {
    HybridCacheConfig {
        instance_name: format!("{instance_name}:"),
        redis: RedisConfig {
            connection_string: Some(get_redis_url().await),
            pool_size: 8,
            timeout_ms: 2_000,
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_redis_tier_get_set_remove() {
    let config = redis_config("tier-basic").await;
    let backends = backend::connect(&config).await.unwrap();
    let tier = backends.distributed;
    assert_eq!(tier.name(), "redis");

    tier.set("basket:u1", b"payload", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(tier.get("basket:u1").await.unwrap(), Some(b"payload".to_vec()));
    assert!(tier.exists("basket:u1").await.unwrap());

    tier.remove("basket:u1").await.unwrap();
    assert_eq!(tier.get("basket:u1").await.unwrap(), None);
    assert!(!tier.exists("basket:u1").await.unwrap());
}

#[tokio::test]
async fn test_redis_tier_ttl_and_zero_ttl() {
    let config = redis_config("tier-ttl").await;
    let tier = backend::connect(&config).await.unwrap().distributed;

    tier.set("short", b"v", Duration::from_millis(100)).await.unwrap();
    assert!(tier.exists("short").await.unwrap());
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!tier.exists("short").await.unwrap());

    tier.set("zero", b"v", Duration::ZERO).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(tier.get("zero").await.unwrap(), None);
}

#[tokio::test]
async fn test_redis_tier_reports_remaining_ttl_and_clamps() {
    let config = redis_config("tier-pttl").await;
    let backends = backend::connect(&config).await.unwrap();
    let tier = backends.distributed;

    tier.set("k", b"v", Duration::from_secs(60)).await.unwrap();
    let (data, remaining) = tier.get_with_ttl("k").await.unwrap().unwrap();
    assert_eq!(data, b"v".to_vec());
    let remaining = remaining.unwrap();
    assert!(remaining <= Duration::from_secs(60));
    assert!(remaining > Duration::from_secs(50));
    assert_eq!(tier.get_with_ttl("missing").await.unwrap(), None);

    // same outcome as the in-process tier instead of an "invalid expire time" error
    tier.set("forever", b"v", Duration::MAX).await.unwrap();
    assert!(tier.exists("forever").await.unwrap());

    let lock = backends
        .locks
        .try_acquire(&lock_key_of("forever"), Duration::MAX)
        .await
        .unwrap()
        .unwrap();
    backends.locks.release(&lock).await.unwrap();
}

#[tokio::test]
async fn test_instance_name_isolates_keys() {
    let a = backend::connect(&redis_config("iso-a").await).await.unwrap();
    let b = backend::connect(&redis_config("iso-b").await).await.unwrap();

    a.distributed
        .set("basket:u1", b"a", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(b.distributed.get("basket:u1").await.unwrap(), None);
}

#[tokio::test]
async fn test_redis_lock_mutual_exclusion_and_release() {
    let config = redis_config("lock").await;
    let locks = backend::connect(&config).await.unwrap().locks;
    let lock_key = lock_key_of("basket:u1");

    let first = locks
        .try_acquire(&lock_key, Duration::from_secs(5))
        .await
        .unwrap()
        .expect("lock should be free");
    let second = locks
        .try_acquire(&lock_key, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(second.is_none());

    locks.release(&first).await.unwrap();
    // idempotent
    locks.release(&first).await.unwrap();

    let third = locks
        .try_acquire(&lock_key, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(third.is_some());
}

#[tokio::test]
async fn test_redis_lock_lease_expires() {
    let config = redis_config("lock-lease").await;
    let locks = backend::connect(&config).await.unwrap().locks;
    let lock_key = lock_key_of("basket:u1");

    let abandoned = locks
        .try_acquire(&lock_key, Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();

    let next = locks
        .try_acquire(&lock_key, Duration::from_secs(2))
        .await
        .unwrap()
        .expect("lease should have expired");

    // The stale owner cannot free the new holder's lock.
    locks.release(&abandoned).await.unwrap();
    let contender = locks
        .try_acquire(&lock_key, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(contender.is_none());
    locks.release(&next).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stampede_across_redis_providers() {
    let config = redis_config("stampede").await;
    let instances = [
        Arc::new(HybridCacheProvider::from_config(config.clone()).await.unwrap()),
        Arc::new(HybridCacheProvider::from_config(config).await.unwrap()),
    ];
    let computations = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..12 {
        let cache = Arc::clone(&instances[i % 2]);
        let computations = Arc::clone(&computations);
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_set(
                    "product:42",
                    move || async move {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, CacheError>(vec![42u32, 7])
                    },
                    &CachePolicy::locked(),
                )
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), vec![42u32, 7]);
    }
    assert_eq!(computations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_corrupted_redis_entry_self_heals() {
    let config = redis_config("corrupt").await;
    let backends = backend::connect(&config).await.unwrap();
    let cache = HybridCacheProvider::with_backends(config, backends.clone());

    backends
        .distributed
        .set("basket:u1", b"\xff\xfe not json", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(cache.get::<Vec<String>>("basket:u1").await.unwrap(), None);
    assert!(!backends.distributed.exists("basket:u1").await.unwrap());

    cache
        .set("basket:u1", &vec!["apple".to_string()], None)
        .await
        .unwrap();
    assert_eq!(
        cache.get::<Vec<String>>("basket:u1").await.unwrap(),
        Some(vec!["apple".to_string()])
    );
}

#[tokio::test]
async fn test_broadcast_invalidation_evicts_peer_local_tier() {
    let config = HybridCacheConfig {
        broadcast_invalidations: true,
        ..redis_config("broadcast").await
    };
    let a = HybridCacheProvider::from_config(config.clone()).await.unwrap();
    let b = HybridCacheProvider::from_config(config).await.unwrap();
    // give both listeners time to subscribe
    tokio::time::sleep(Duration::from_millis(300)).await;

    a.set("basket:u1", &"v1", None).await.unwrap();
    assert_eq!(b.get::<String>("basket:u1").await.unwrap().as_deref(), Some("v1"));
    assert!(b.local().contains("basket:u1"));

    a.remove("basket:u1").await.unwrap();

    let mut evicted = false;
    for _ in 0..50 {
        if !b.local().contains("basket:u1") {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(evicted, "peer local tier still holds the removed key");
}

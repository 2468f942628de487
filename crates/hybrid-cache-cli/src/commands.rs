use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use colored::Colorize;
use hybrid_cache::{CacheError, CachePolicy, HybridCacheConfig, HybridCacheProvider, LockGuard, lock_key_of};
use serde_json::Value;

use crate::cli::{HoldArgs, SetArgs, StampedeArgs};
use crate::output::{print_success, print_value, print_warning};

pub async fn get(cache: &HybridCacheProvider, key: &str) -> Result<()> {
    match cache.get::<Value>(key).await? {
        Some(value) => print_value(&value),
        None => print_warning(&format!("{key} is not cached")),
    }
    Ok(())
}

pub async fn set(cache: &HybridCacheProvider, args: &SetArgs) -> Result<()> {
    let value: Value = serde_json::from_str(&args.value)
        .with_context(|| format!("value for {} is not valid JSON", args.key))?;
    let ttl = args.ttl_secs.map(Duration::from_secs);

    if args.lock {
        let lock_timeout = args.lock_timeout_ms.map(Duration::from_millis);
        cache
            .set_with_lock(&args.key, &value, ttl, lock_timeout)
            .await?;
    } else {
        cache.set(&args.key, &value, ttl).await?;
    }
    print_success(&format!("Set {}", args.key));
    Ok(())
}

pub async fn remove(cache: &HybridCacheProvider, key: &str) -> Result<()> {
    cache.remove(key).await?;
    print_success(&format!("Removed {key}"));
    Ok(())
}

pub async fn exists(cache: &HybridCacheProvider, key: &str) -> Result<()> {
    let found = cache.exists(key).await?;
    println!("{}: {}", key.cyan(), if found { "yes".green() } else { "no".red() });
    Ok(())
}

pub async fn hold_lock(cache: &HybridCacheProvider, args: &HoldArgs) -> Result<()> {
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| cache.config().default_lock_timeout());
    let lock_key = lock_key_of(&args.key);

    let guard = LockGuard::acquire(cache.lock_manager(), &lock_key, timeout)
        .await?
        .ok_or_else(|| CacheError::lock_timeout(&args.key, timeout))?;
    print_success(&format!("Holding {lock_key} for {}s", args.secs));

    tokio::time::sleep(Duration::from_secs(args.secs)).await;
    guard.release().await?;
    print_success(&format!("Released {lock_key}"));
    Ok(())
}

pub async fn stampede(cache: Arc<HybridCacheProvider>, args: &StampedeArgs) -> Result<()> {
    if args.fresh {
        cache.remove(&args.key).await?;
    }
    let policy = if args.no_lock {
        CachePolicy::unlocked()
    } else {
        CachePolicy::locked()
    };
    let computations = Arc::new(AtomicUsize::new(0));
    let compute_time = Duration::from_millis(args.compute_ms);
    let started = Instant::now();

    let mut tasks = Vec::with_capacity(args.callers);
    for caller in 0..args.callers {
        let cache = Arc::clone(&cache);
        let computations = Arc::clone(&computations);
        let policy = policy.clone();
        let key = args.key.clone();
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_set(
                    &key,
                    move || async move {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(compute_time).await;
                        Ok::<_, CacheError>(serde_json::json!({ "computed_by": caller }))
                    },
                    &policy,
                )
                .await
        }));
    }

    let mut succeeded = 0usize;
    let mut timed_out = 0usize;
    for task in tasks {
        match task.await.context("caller task panicked")? {
            Ok(_) => succeeded += 1,
            Err(e) if e.is_lock_timeout() => timed_out += 1,
            Err(e) => return Err(e.into()),
        }
    }

    println!("{}: {}", "Callers".cyan(), args.callers);
    println!("{}: {}", "Succeeded".cyan(), succeeded);
    println!("{}: {}", "Lock timeouts".cyan(), timed_out);
    println!(
        "{}: {}",
        "Computations".cyan(),
        computations.load(Ordering::SeqCst)
    );
    println!("{}: {:?}", "Elapsed".cyan(), started.elapsed());
    Ok(())
}

pub fn show_config(config: &HybridCacheConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

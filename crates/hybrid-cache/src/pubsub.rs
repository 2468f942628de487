//! Redis Pub/Sub for cross-instance local-tier invalidation.
//!
//! ## Example Flow
//!
//! ```text
//! Instance 1: provider.remove("basket:u1")
//!   ↓ both tiers cleared
//! Redis Pub/Sub: PUBLISH {instance_name}cache:invalidate "basket:u1"
//!   ↓
//! Instance 2: listener receives "basket:u1" → removes it from its local tier
//! ```
//!
//! Without this, another instance keeps serving its local copy until the
//! local TTL runs out.

use std::time::Duration;

use deadpool_redis::Pool;
use redis::AsyncCommands;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::CacheResult;
use crate::local::LocalTier;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Channel carrying invalidated keys for one instance namespace.
pub fn invalidation_channel(instance_name: &str) -> String {
    format!("{instance_name}cache:invalidate")
}

/// Subscribes to the invalidation channel and evicts received keys from the
/// local tier.
pub struct InvalidationListener {
    pub redis_url: String,
    pub channel: String,
    pub local: LocalTier,
}

impl InvalidationListener {
    /// Spawn the listener. It reconnects until `shutdown` is cancelled,
    /// backing off exponentially while connecting keeps failing.
    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Backoff::new();
            loop {
                let result = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = self.run() => result,
                };
                match result {
                    Ok(()) => {
                        tracing::info!(
                            channel = %self.channel,
                            "cache invalidation subscription closed, resubscribing"
                        );
                        backoff.reset();
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(
                            error = %e,
                            channel = %self.channel,
                            backoff_secs = delay.as_secs(),
                            "cache invalidation listener error, reconnecting"
                        );
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
            tracing::debug!(channel = %self.channel, "cache invalidation listener stopped");
        })
    }

    /// One subscription session. `Ok` once an established subscription
    /// closes; `Err` if it could not be established.
    async fn run(&self) -> Result<(), String> {
        use futures_util::StreamExt;

        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| format!("failed to create redis client: {e}"))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| format!("failed to subscribe: {e}"))?;

        tracing::info!(channel = %self.channel, "subscribed to cache invalidation channel");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            match msg.get_payload::<String>() {
                Ok(key) => {
                    tracing::debug!(key = %key, "received cache invalidation");
                    self.local.remove(&key);
                }
                Err(e) => tracing::warn!(error = %e, "failed to parse invalidation payload"),
            }
        }
        Ok(())
    }
}

/// Reconnect delay: doubles per consecutive failure up to `MAX_BACKOFF`.
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

/// Publish `key` so other instances drop their local copies.
pub async fn publish_invalidation(pool: &Pool, channel: &str, key: &str) -> CacheResult<()> {
    let mut conn = pool.get().await?;
    conn.publish::<_, _, ()>(channel, key).await?;
    tracing::debug!(key = %key, channel = %channel, "published cache invalidation");
    Ok(())
}

/// Publisher half owned by the provider; stops the listener when dropped.
pub(crate) struct InvalidationBus {
    pool: Pool,
    channel: String,
    _listener: DropGuard,
}

impl InvalidationBus {
    pub(crate) fn start(pool: Pool, redis_url: &str, instance_name: &str, local: LocalTier) -> Self {
        let channel = invalidation_channel(instance_name);
        let shutdown = CancellationToken::new();
        InvalidationListener {
            redis_url: redis_url.to_string(),
            channel: channel.clone(),
            local,
        }
        .start(shutdown.clone());
        Self {
            pool,
            channel,
            _listener: shutdown.drop_guard(),
        }
    }

    /// Publish failures are logged only: both tiers have already been cleared.
    pub(crate) async fn publish(&self, key: &str) {
        if let Err(e) = publish_invalidation(&self.pool, &self.channel, key).await {
            tracing::warn!(key = %key, error = %e, "failed to publish cache invalidation");
        }
    }
}

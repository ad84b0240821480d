// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Touch-to-user resolution cascade.
//!
//! The [`TouchResolver`] answers "which user does this touch belong to?"
//! without knowing where in the delivery pipeline the touch currently is.
//! It asks each tier in [`CASCADE`] order and stops at the first answer:
//!
//! ```text
//! DB(none) → DB(weak) → Queue(pending-send) → Queue(pending-persist) → Queue(in-persist) → DB(strong)
//! ```
//!
//! Every step but the last is a latency optimization. The final strong read
//! always runs when reached and its result, including "not found", is
//! returned as-is.
//!
//! Correctness assumes the pipeline moves touches in order: an entry leaves
//! `pending-send` no earlier than it lands in `pending-persist`, and the
//! durable row is written before the entry leaves `in-persist`.
//!
//! # Errors
//!
//! A tier that fails or times out aborts the cascade with that error. It is
//! never treated as "not found", since skipping a tier could hide a touch
//! that only that tier knew about.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use touch_resolver::{TouchResolver, ResolverConfig, QueueEntry};
//! use touch_resolver::storage::memory::{InMemoryOwnerStore, InMemoryQueueStore};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let owners = Arc::new(InMemoryOwnerStore::new());
//! let queues = Arc::new(InMemoryQueueStore::new());
//! queues.push("touch:to_log", &QueueEntry::new("tch_0123456789", "user_alice")).unwrap();
//!
//! let resolver = TouchResolver::new(owners, queues, ResolverConfig::default());
//! let sub = resolver.find_user_for_touch("tch_0123456789").await.unwrap();
//! assert_eq!(sub.as_deref(), Some("user_alice"));
//! # }
//! ```

mod types;
mod queue_tier;

pub use types::{Tier, Resolution, CASCADE};
pub use queue_tier::QueueTier;

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::ResolverConfig;
use crate::storage::traits::{OwnerStore, QueueStore, StorageError};
use crate::storage::redis::RedisQueueStore;
use crate::storage::sql::SqlOwnerStore;
use crate::metrics::LatencyTimer;

/// Resolves touch send uids to the sub of the owning user.
///
/// Stateless between calls and cheap to share behind an `Arc`; concurrent
/// resolutions are independent.
pub struct TouchResolver {
    owners: Arc<dyn OwnerStore>,
    queues: Arc<dyn QueueStore>,
    config: ResolverConfig,
}

impl TouchResolver {
    /// Build a resolver over already-constructed stores.
    pub fn new(
        owners: Arc<dyn OwnerStore>,
        queues: Arc<dyn QueueStore>,
        config: ResolverConfig,
    ) -> Self {
        Self { owners, queues, config }
    }

    /// Connect to Redis and SQL from `config` and install the scan script.
    pub async fn connect(config: ResolverConfig) -> Result<Self, StorageError> {
        let redis_url = config
            .redis_url
            .as_deref()
            .ok_or_else(|| StorageError::Config("redis_url is not set".into()))?;
        let sql_url = config
            .sql_url
            .as_deref()
            .ok_or_else(|| StorageError::Config("sql_url is not set".into()))?;

        info!("Connecting touch resolver backends");
        let queues = RedisQueueStore::with_prefix(
            redis_url,
            config.redis_prefix.as_deref(),
            config.script_revalidate(),
        )
        .await?;
        let owners = SqlOwnerStore::new(
            sql_url,
            config.sql_weak_url.as_deref(),
            config.sql_none_url.as_deref(),
        )
        .await?;

        let resolver = Self::new(Arc::new(owners), Arc::new(queues), config);
        resolver.install_scanner().await?;
        info!("Touch resolver ready");
        Ok(resolver)
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// (Re)install the queue scan script, e.g. after [`StorageError::ScriptNotLoaded`].
    pub async fn install_scanner(&self) -> Result<(), StorageError> {
        self.queues.install_scanner().await
    }

    /// Sub of the user that owns `touch_uid`, or `None` if no tier has it.
    ///
    /// Expects the uid to come from a trusted source; a uid that really
    /// doesn't exist costs a full pass over every queue.
    pub async fn find_user_for_touch(&self, touch_uid: &str) -> Result<Option<String>, StorageError> {
        Ok(self.resolve(touch_uid).await?.user_sub)
    }

    /// Run the cascade, reporting which tier answered.
    #[instrument(skip(self), fields(tier))]
    pub async fn resolve(&self, touch_uid: &str) -> Result<Resolution, StorageError> {
        if touch_uid.is_empty() {
            return Err(StorageError::InvalidTouchUid("send uid is empty".into()));
        }

        let mut consulted = 0;
        for tier in CASCADE {
            consulted += 1;
            if let Some(user_sub) = self.query_tier(tier, touch_uid).await? {
                tracing::Span::current().record("tier", tier.name());
                debug!(%tier, "Touch resolved");
                crate::metrics::record_resolution(tier.name());
                return Ok(Resolution {
                    user_sub: Some(user_sub),
                    tier: Some(tier),
                    tiers_consulted: consulted,
                });
            }
        }

        tracing::Span::current().record("tier", "miss");
        debug!("Touch not found in any tier");
        crate::metrics::record_resolution("miss");
        Ok(Resolution {
            user_sub: None,
            tier: None,
            tiers_consulted: consulted,
        })
    }

    /// One tier lookup under the configured deadline, with metrics.
    async fn query_tier(&self, tier: Tier, touch_uid: &str) -> Result<Option<String>, StorageError> {
        let _timer = LatencyTimer::new(tier.name());

        let result = match self.config.tier_timeout() {
            Some(after) => match tokio::time::timeout(after, self.lookup(tier, touch_uid)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(%tier, ?after, "Tier lookup timed out");
                    crate::metrics::record_tier_lookup(tier.name(), "timeout");
                    return Err(StorageError::Timeout {
                        tier: tier.name().to_string(),
                        after,
                    });
                }
            },
            None => self.lookup(tier, touch_uid).await,
        };

        match &result {
            Ok(Some(_)) => crate::metrics::record_tier_lookup(tier.name(), "hit"),
            Ok(None) => {
                debug!(%tier, "Tier miss");
                crate::metrics::record_tier_lookup(tier.name(), "miss");
            }
            Err(e) => {
                warn!(%tier, error = %e, "Tier lookup failed");
                crate::metrics::record_tier_lookup(tier.name(), "error");
            }
        }
        result
    }

    async fn lookup(&self, tier: Tier, touch_uid: &str) -> Result<Option<String>, StorageError> {
        match tier {
            Tier::Database(consistency) => self.owners.resolve_owner(touch_uid, consistency).await,
            Tier::Queue(stage) => {
                QueueTier::new(self.queues.as_ref(), self.config.list_for(stage), self.config.batch_size())
                    .find_owner(touch_uid)
                    .await
            }
        }
    }
}

//! Redis queue store: the Scanner Protocol as a server-side Lua script.
//!
//! The pipeline's queue lists are plain Redis lists of JSON entries,
//! appended with `RPUSH` by producers and drained from the head by the
//! persist job. Redis has no index into them, so a lookup walks the list
//! with [`SCAN_SCRIPT`] in bounded batches. A Lua script runs atomically,
//! so no producer write can interleave with a single batch.
//!
//! The script is invoked by SHA (`EVALSHA`). Its presence is re-verified
//! with `SCRIPT EXISTS` whenever the [`ScriptCache`] window lapses and
//! loaded with `SCRIPT LOAD` if missing. A `NOSCRIPT` reply mid-flight
//! (Redis restarted, `SCRIPT FLUSH`) surfaces as
//! [`StorageError::ScriptNotLoaded`] and invalidates the cache, so the next
//! call reinstalls.

use std::time::Duration;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, RedisError, Script, Value};
use tracing::{debug, info, instrument, warn};
use crate::resilience::retry::{retry, RetryConfig};
use crate::scanner::{Clock, ScriptCache, SystemClock, SCAN_SCRIPT};
use crate::touch::ScanStep;
use super::traits::{QueueStore, StorageError};

pub struct RedisQueueStore<C: Clock = SystemClock> {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "staging:" → "staging:touch:to_send")
    prefix: String,
    script: Script,
    script_cache: ScriptCache<C>,
}

impl RedisQueueStore<SystemClock> {
    /// Connect without a key prefix.
    pub async fn new(connection_string: &str, revalidate_after: Duration) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None, revalidate_after).await
    }

    /// Connect with an optional key prefix, prepended to every list name.
    pub async fn with_prefix(
        connection_string: &str,
        prefix: Option<&str>,
        revalidate_after: Duration,
    ) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Fast-fail on a bad URL instead of hanging forever
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: RedisError| StorageError::Backend(e.to_string()))?;

        Ok(Self::from_connection(
            connection,
            prefix,
            ScriptCache::new(revalidate_after),
        ))
    }
}

impl<C: Clock> RedisQueueStore<C> {
    /// Build on an existing connection with a caller-supplied script cache.
    pub fn from_connection(
        connection: ConnectionManager,
        prefix: Option<&str>,
        script_cache: ScriptCache<C>,
    ) -> Self {
        Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            script: Script::new(SCAN_SCRIPT),
            script_cache,
        }
    }

    /// Get a clone of the connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// SHA1 of the scan script, as Redis knows it.
    pub fn script_sha(&self) -> &str {
        self.script.get_hash()
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    /// `SCRIPT LOAD` the scan script and remember that it is there.
    async fn load_script(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(SCAN_SCRIPT)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                crate::metrics::record_script_load("error");
                StorageError::Backend(format!("Failed to load scan script: {}", e))
            })?;

        if sha != self.script_sha() {
            crate::metrics::record_script_load("error");
            return Err(StorageError::Protocol(format!(
                "SCRIPT LOAD returned sha {}, expected {}",
                sha,
                self.script_sha()
            )));
        }

        self.script_cache.mark_verified();
        crate::metrics::record_script_load("loaded");
        info!(sha = %sha, "Installed touch scan script");
        Ok(())
    }

    /// Verify the script is present if the cache says it's time, loading it if not.
    async fn ensure_script(&self) -> Result<(), StorageError> {
        if !self.script_cache.needs_check() {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        let present: Vec<bool> = redis::cmd("SCRIPT")
            .arg("EXISTS")
            .arg(self.script_sha())
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(format!("SCRIPT EXISTS failed: {}", e)))?;

        if present.first().copied().unwrap_or(false) {
            debug!("Scan script still present");
            self.script_cache.mark_verified();
            crate::metrics::record_script_load("present");
            return Ok(());
        }

        self.load_script().await
    }

    fn map_scan_error(&self, e: RedisError) -> StorageError {
        if e.kind() == ErrorKind::NoScriptError {
            self.script_cache.invalidate();
            warn!(sha = %self.script_sha(), "Scan script missing from Redis");
            StorageError::ScriptNotLoaded { sha: self.script_sha().to_string() }
        } else {
            StorageError::Backend(e.to_string())
        }
    }
}

/// Decode `{found, next_index, owner|nil[, skipped]}`.
fn parse_scan_reply(reply: Vec<Value>) -> Result<ScanStep, StorageError> {
    if reply.len() != 3 && reply.len() != 4 {
        return Err(StorageError::Protocol(format!(
            "expected 3 or 4 elements, got {}",
            reply.len()
        )));
    }
    let bad = |e: RedisError| StorageError::Protocol(e.to_string());

    let found: i64 = redis::from_redis_value(&reply[0]).map_err(bad)?;
    let next_index: i64 = redis::from_redis_value(&reply[1]).map_err(bad)?;
    let owner: Option<String> = redis::from_redis_value(&reply[2]).map_err(bad)?;
    let skipped: u32 = match reply.get(3) {
        Some(v) => redis::from_redis_value(v).map_err(bad)?,
        None => 0,
    };

    Ok(if found != 0 {
        ScanStep::hit(next_index, owner, skipped)
    } else if next_index == 0 {
        ScanStep::exhausted(skipped)
    } else {
        ScanStep::resume_at(next_index, skipped)
    })
}

#[async_trait]
impl<C: Clock + 'static> QueueStore for RedisQueueStore<C> {
    #[instrument(skip(self))]
    async fn scan(
        &self,
        list: &str,
        target_uid: &str,
        start_index: i64,
        max_count: usize,
    ) -> Result<ScanStep, StorageError> {
        self.ensure_script().await?;

        let mut conn = self.connection.clone();
        let reply: Vec<Value> = redis::cmd("EVALSHA")
            .arg(self.script_sha())
            .arg(1)
            .arg(self.prefixed_key(list))
            .arg(target_uid)
            .arg(start_index)
            .arg(max_count)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_scan_error(e))?;

        parse_scan_reply(reply)
    }

    async fn install_scanner(&self) -> Result<(), StorageError> {
        self.load_script().await
    }
}

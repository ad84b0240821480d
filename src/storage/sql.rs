// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL owner store: reads the durable touch log at a chosen consistency.
//!
//! Consistency maps onto connection pools:
//!
//! | Level    | Pool                                   |
//! |----------|----------------------------------------|
//! | `none`   | any replica (`sql_none_url`)           |
//! | `weak`   | bounded-lag replica (`sql_weak_url`)   |
//! | `strong` | primary (`sql_url`)                    |
//!
//! Missing replica URLs fall back toward the primary, so a single-node
//! deployment reads everything from the primary.
//!
//! Only reads. The schema is owned by the service that writes touches:
//! ```sql
//! CREATE TABLE users (id INTEGER PRIMARY KEY, sub TEXT UNIQUE NOT NULL, ...);
//! CREATE TABLE user_touches (
//!   id INTEGER PRIMARY KEY,
//!   send_uid TEXT NOT NULL,
//!   user_id INTEGER NOT NULL REFERENCES users(id),
//!   ...
//! );
//! ```

use async_trait::async_trait;
use sqlx::{AnyPool, Row, any::AnyPoolOptions};
use tracing::debug;
use crate::touch::Consistency;
use super::traits::{OwnerStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};
use std::sync::Once;
use std::time::Duration;

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

/// Register sqlx's default `Any` drivers (idempotent).
pub fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const RESOLVE_OWNER_SQL: &str = "SELECT users.sub FROM user_touches, users \
     WHERE users.id = user_touches.user_id AND user_touches.send_uid = ? \
     ORDER BY user_touches.id ASC LIMIT 1";

pub struct SqlOwnerStore {
    strong: AnyPool,
    weak: AnyPool,
    none: AnyPool,
}

impl SqlOwnerStore {
    /// Connect to the primary and, optionally, replicas.
    ///
    /// `none` falls back to `weak`, which falls back to the primary.
    pub async fn new(
        primary_url: &str,
        weak_url: Option<&str>,
        none_url: Option<&str>,
    ) -> Result<Self, StorageError> {
        install_drivers();

        let strong = connect("sql_connect_primary", primary_url).await?;
        let weak = match weak_url {
            Some(url) => connect("sql_connect_weak", url).await?,
            None => strong.clone(),
        };
        let none = match none_url {
            Some(url) => connect("sql_connect_none", url).await?,
            None => weak.clone(),
        };

        Ok(Self::from_pools(strong, weak, none))
    }

    /// Use already-connected pools (e.g. shared with other components).
    pub fn from_pools(strong: AnyPool, weak: AnyPool, none: AnyPool) -> Self {
        Self { strong, weak, none }
    }

    fn pool(&self, consistency: Consistency) -> &AnyPool {
        match consistency {
            Consistency::None => &self.none,
            Consistency::Weak => &self.weak,
            Consistency::Strong => &self.strong,
        }
    }
}

/// Startup-mode connect: fails fast if the URL is wrong.
async fn connect(operation: &str, url: &str) -> Result<AnyPool, StorageError> {
    retry(operation, &RetryConfig::startup(), || async {
        AnyPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .connect(url)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    })
    .await
}

#[async_trait]
impl OwnerStore for SqlOwnerStore {
    async fn resolve_owner(
        &self,
        touch_uid: &str,
        consistency: Consistency,
    ) -> Result<Option<String>, StorageError> {
        let row = sqlx::query(RESOLVE_OWNER_SQL)
            .bind(touch_uid)
            .fetch_optional(self.pool(consistency))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let Some(row) = row else {
            debug!(%consistency, "No touch row");
            return Ok(None);
        };

        // Try String first (SQLite TEXT), then bytes (MySQL VARCHAR through the Any driver)
        let sub = row
            .try_get::<String, _>("sub")
            .ok()
            .or_else(|| {
                row.try_get::<Vec<u8>, _>("sub")
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
            .ok_or_else(|| StorageError::Backend("users.sub is not text".to_string()))?;

        Ok(Some(sub))
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Touch data model.
//!
//! A touch is a single notification delivery attempt (push, SMS or email).
//! It is identified everywhere by its *send uid* and eventually belongs to
//! exactly one user, identified by that user's `sub`.
//!
//! While in flight a touch lives as a JSON [`QueueEntry`] in one of the
//! pipeline lists; once persisted it is a row in the durable store.

use std::fmt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Minimum length of a send uid accepted from untrusted callers.
pub const SEND_UID_MIN_LEN: usize = 10;
/// Maximum length of a send uid accepted from untrusted callers.
pub const SEND_UID_MAX_LEN: usize = 50;

/// Read consistency requested from the durable store.
///
/// Ordered from cheapest/stalest to most expensive/freshest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// Any replica, may be arbitrarily stale.
    None,
    /// A replica with bounded replication lag.
    Weak,
    /// The primary, always current.
    Strong,
}

impl Consistency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Consistency::None => "none",
            Consistency::Weak => "weak",
            Consistency::Strong => "strong",
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a touch currently resides in the delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    /// Enqueued, not yet dispatched.
    PendingSend,
    /// Dispatched, waiting to be batched into the durable store.
    PendingPersist,
    /// Being moved into the durable store by the persist job (purgatory).
    InPersist,
    /// Durable row exists and is authoritative.
    Persisted,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::PendingSend => "pending-send",
            PipelineStage::PendingPersist => "pending-persist",
            PipelineStage::InPersist => "in-persist",
            PipelineStage::Persisted => "persisted",
        }
    }

    /// The queue backing this stage; `None` once the touch is persisted.
    pub fn queue(&self) -> Option<QueueStage> {
        match self {
            PipelineStage::PendingSend => Some(QueueStage::PendingSend),
            PipelineStage::PendingPersist => Some(QueueStage::PendingPersist),
            PipelineStage::InPersist => Some(QueueStage::InPersist),
            PipelineStage::Persisted => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline stage that is backed by a queue list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueStage {
    PendingSend,
    PendingPersist,
    InPersist,
}

impl QueueStage {
    /// In the order a touch travels them.
    pub const ALL: [QueueStage; 3] = [
        QueueStage::PendingSend,
        QueueStage::PendingPersist,
        QueueStage::InPersist,
    ];

    pub fn stage(&self) -> PipelineStage {
        match self {
            QueueStage::PendingSend => PipelineStage::PendingSend,
            QueueStage::PendingPersist => PipelineStage::PendingPersist,
            QueueStage::InPersist => PipelineStage::InPersist,
        }
    }

    /// Default Redis list key.
    pub fn default_list_key(&self) -> &'static str {
        match self {
            QueueStage::PendingSend => "touch:to_send",
            QueueStage::PendingPersist => "touch:to_log",
            QueueStage::InPersist => "touch:log_purgatory",
        }
    }
}

impl fmt::Display for QueueStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stage().as_str())
    }
}

/// A serialized touch sitting in one of the pipeline lists.
///
/// Producers attach many more fields (channel, message, timestamps...);
/// only `uid` and `user_sub` matter for resolution, the rest is preserved
/// in `extra`.
///
/// # Example
///
/// ```
/// use touch_resolver::QueueEntry;
///
/// let entry = QueueEntry::new("tch_abc123def456", "oseh_u_alice");
/// let raw = entry.to_json().unwrap();
/// let back = QueueEntry::decode(&raw).unwrap();
/// assert_eq!(back.user_sub.as_deref(), Some("oseh_u_alice"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    /// The touch's send uid
    pub uid: String,
    /// Sub of the owning user. `None` when the entry carries no string
    /// `user_sub`; a non-string value is kept untouched in `extra`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_sub: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QueueEntry {
    pub fn new(uid: impl Into<String>, user_sub: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            user_sub: Some(user_sub.into()),
            extra: Map::new(),
        }
    }

    /// Attach an additional producer-defined field.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Permissive decode, shared by every scan and list helper.
    ///
    /// Returns `None` for anything that isn't a JSON object carrying a
    /// string `uid` (arrays never qualify); such entries are skipped.
    pub fn decode(raw: &str) -> Option<Self> {
        let Value::Object(mut extra) = serde_json::from_str::<Value>(raw).ok()? else {
            return None;
        };
        let Some(Value::String(uid)) = extra.remove("uid") else {
            return None;
        };
        let user_sub = match extra.remove("user_sub") {
            Some(Value::String(sub)) => Some(sub),
            Some(other) => {
                extra.insert("user_sub".to_string(), other);
                None
            }
            None => None,
        };
        Some(Self { uid, user_sub, extra })
    }
}

/// Reply of one Scanner Protocol invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStep {
    pub found: bool,
    /// Index of the match when `found`; otherwise the cursor to resume from,
    /// or 0 when the list is exhausted.
    pub next_index: i64,
    pub owner: Option<String>,
    /// Entries in this batch that failed to decode.
    pub skipped: u32,
}

impl ScanStep {
    pub fn exhausted(skipped: u32) -> Self {
        Self { found: false, next_index: 0, owner: None, skipped }
    }

    pub fn resume_at(next_index: i64, skipped: u32) -> Self {
        Self { found: false, next_index, owner: None, skipped }
    }

    pub fn hit(index: i64, owner: Option<String>, skipped: u32) -> Self {
        Self { found: true, next_index: index, owner, skipped }
    }

    /// True when the caller should stop scanning this list.
    pub fn is_terminal(&self) -> bool {
        self.found || self.next_index == 0
    }
}

/// Check a send uid arriving from an untrusted context.
///
/// Trusted internal callers may pass uids of any non-zero length straight to
/// the resolver; this is for request handlers.
pub fn validate_send_uid(uid: &str) -> Result<(), crate::StorageError> {
    let len = uid.chars().count();
    if !(SEND_UID_MIN_LEN..=SEND_UID_MAX_LEN).contains(&len) {
        return Err(crate::StorageError::InvalidTouchUid(format!(
            "send uid must be {}-{} characters, got {}",
            SEND_UID_MIN_LEN, SEND_UID_MAX_LEN, len
        )));
    }
    Ok(())
}

//! In-process backends with the same contracts as the Redis and SQL stores.
//!
//! Used by tests and the demo. The queue store scans under a per-list lock,
//! which gives the same atomicity a Lua script gets inside Redis.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use crate::scanner::scan_entries;
use crate::touch::{Consistency, QueueEntry, ScanStep};
use super::traits::{OwnerStore, QueueStore, StorageError};

pub struct InMemoryQueueStore {
    lists: DashMap<String, Vec<String>>,
}

impl InMemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self { lists: DashMap::new() }
    }

    /// RPUSH a raw (possibly malformed) entry.
    pub fn push_raw(&self, list: &str, raw: impl Into<String>) {
        self.lists.entry(list.to_string()).or_default().push(raw.into());
    }

    pub fn push(&self, list: &str, entry: &QueueEntry) -> Result<(), StorageError> {
        let raw = entry.to_json().map_err(|e| StorageError::Backend(e.to_string()))?;
        self.push_raw(list, raw);
        Ok(())
    }

    /// LPOP, as the persist job does when moving entries along.
    pub fn pop_front(&self, list: &str) -> Option<String> {
        let mut entries = self.lists.get_mut(list)?;
        if entries.is_empty() {
            None
        } else {
            Some(entries.remove(0))
        }
    }

    /// Remove the first entry for `uid`, returning it.
    pub fn remove_uid(&self, list: &str, uid: &str) -> Option<QueueEntry> {
        let mut entries = self.lists.get_mut(list)?;
        let pos = entries
            .iter()
            .position(|raw| QueueEntry::decode(raw).is_some_and(|e| e.uid == uid))?;
        QueueEntry::decode(&entries.remove(pos))
    }

    #[must_use]
    pub fn len(&self, list: &str) -> usize {
        self.lists.get(list).map(|l| l.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self, list: &str) -> bool {
        self.len(list) == 0
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn scan(
        &self,
        list: &str,
        target_uid: &str,
        start_index: i64,
        max_count: usize,
    ) -> Result<ScanStep, StorageError> {
        Ok(match self.lists.get(list) {
            Some(entries) => scan_entries(entries.as_slice(), target_uid, start_index, max_count),
            None => ScanStep::exhausted(0),
        })
    }
}

#[derive(Debug, Clone)]
struct TouchRow {
    id: u64,
    send_uid: String,
    user_sub: String,
    replicated: bool,
}

/// Durable touch log with a primary and lagging replicas.
///
/// Rows inserted with [`InMemoryOwnerStore::insert_unreplicated`] are only
/// visible to [`Consistency::Strong`] reads until [`InMemoryOwnerStore::replicate`].
pub struct InMemoryOwnerStore {
    rows: RwLock<Vec<TouchRow>>,
}

impl InMemoryOwnerStore {
    #[must_use]
    pub fn new() -> Self {
        Self { rows: RwLock::new(Vec::new()) }
    }

    /// Insert a row visible at every consistency level.
    pub fn insert(&self, send_uid: &str, user_sub: &str) {
        self.push_row(send_uid, user_sub, true);
    }

    /// Insert a row that only the primary has seen so far.
    pub fn insert_unreplicated(&self, send_uid: &str, user_sub: &str) {
        self.push_row(send_uid, user_sub, false);
    }

    /// Catch every replica up with the primary.
    pub fn replicate(&self) {
        for row in self.rows.write().iter_mut() {
            row.replicated = true;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn push_row(&self, send_uid: &str, user_sub: &str, replicated: bool) {
        let mut rows = self.rows.write();
        let id = rows.len() as u64 + 1;
        rows.push(TouchRow {
            id,
            send_uid: send_uid.to_string(),
            user_sub: user_sub.to_string(),
            replicated,
        });
    }
}

impl Default for InMemoryOwnerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OwnerStore for InMemoryOwnerStore {
    async fn resolve_owner(
        &self,
        touch_uid: &str,
        consistency: Consistency,
    ) -> Result<Option<String>, StorageError> {
        let rows = self.rows.read();
        Ok(rows
            .iter()
            .filter(|r| r.send_uid == touch_uid)
            .filter(|r| r.replicated || consistency == Consistency::Strong)
            .min_by_key(|r| r.id)
            .map(|r| r.user_sub.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_list_is_exhausted() {
        let store = InMemoryQueueStore::new();
        let step = store.scan("touch:to_send", "t", -1, 20).await.unwrap();
        assert_eq!(step, ScanStep::exhausted(0));
    }

    #[tokio::test]
    async fn test_push_and_scan() {
        let store = InMemoryQueueStore::new();
        store.push("q", &QueueEntry::new("t1", "alice")).unwrap();
        store.push("q", &QueueEntry::new("t2", "bob")).unwrap();

        let step = store.scan("q", "t1", -1, 20).await.unwrap();
        assert!(step.found);
        assert_eq!(step.next_index, 0);
        assert_eq!(step.owner.as_deref(), Some("alice"));
        assert_eq!(store.len("q"), 2);
    }

    #[tokio::test]
    async fn test_pop_and_remove() {
        let store = InMemoryQueueStore::new();
        store.push("q", &QueueEntry::new("t1", "alice")).unwrap();
        store.push("q", &QueueEntry::new("t2", "bob")).unwrap();
        store.push("q", &QueueEntry::new("t3", "carol")).unwrap();

        assert!(store.pop_front("q").unwrap().contains("t1"));
        assert_eq!(store.remove_uid("q", "t3").unwrap().user_sub.as_deref(), Some("carol"));
        assert!(store.remove_uid("q", "t3").is_none());
        assert_eq!(store.len("q"), 1);
        assert!(store.pop_front("nope").is_none());
    }

    #[tokio::test]
    async fn test_remove_entry_without_owner() {
        let store = InMemoryQueueStore::new();
        store.push_raw("q", r#"{"uid":"t1","user_sub":7}"#);

        let step = store.scan("q", "t1", -1, 20).await.unwrap();
        assert!(step.found);
        assert_eq!(step.owner, None);

        let removed = store.remove_uid("q", "t1").unwrap();
        assert_eq!(removed.user_sub, None);
        assert!(store.is_empty("q"));
    }

    #[tokio::test]
    async fn test_owner_store_earliest_row_wins() {
        let store = InMemoryOwnerStore::new();
        store.insert("t1", "alice");
        store.insert("t1", "mallory");

        for level in [Consistency::None, Consistency::Weak, Consistency::Strong] {
            assert_eq!(store.resolve_owner("t1", level).await.unwrap().as_deref(), Some("alice"));
        }
        assert_eq!(store.resolve_owner("t2", Consistency::Strong).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreplicated_rows_only_visible_on_primary() {
        let store = InMemoryOwnerStore::new();
        store.insert_unreplicated("t1", "alice");

        assert_eq!(store.resolve_owner("t1", Consistency::None).await.unwrap(), None);
        assert_eq!(store.resolve_owner("t1", Consistency::Weak).await.unwrap(), None);
        assert_eq!(
            store.resolve_owner("t1", Consistency::Strong).await.unwrap().as_deref(),
            Some("alice")
        );

        store.replicate();
        assert_eq!(
            store.resolve_owner("t1", Consistency::None).await.unwrap().as_deref(),
            Some("alice")
        );
    }
}

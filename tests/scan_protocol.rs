//! Scan protocol tests: batching, exhaustion, and malformed entries.
//!
//! Runs against the in-process implementation, which the Redis script is
//! checked against in `tests/integration.rs`.
//!
//! ```bash
//! cargo test --test scan_protocol
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use async_trait::async_trait;
use parking_lot::Mutex;

use touch_resolver::{
    scan_entries, InMemoryQueueStore, QueueEntry, QueueStore, QueueTier, ScanStep, StorageError,
};

const LIST: &str = "touch:to_log";

/// Records every cursor the adapter passes to the store.
struct CursorLog {
    inner: InMemoryQueueStore,
    cursors: Mutex<Vec<i64>>,
    steps: Mutex<Vec<ScanStep>>,
    calls: AtomicUsize,
}

impl CursorLog {
    fn new(inner: InMemoryQueueStore) -> Self {
        Self {
            inner,
            cursors: Mutex::new(Vec::new()),
            steps: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QueueStore for CursorLog {
    async fn scan(
        &self,
        list: &str,
        target_uid: &str,
        start_index: i64,
        max_count: usize,
    ) -> Result<ScanStep, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().push(start_index);
        let step = self.inner.scan(list, target_uid, start_index, max_count).await?;
        self.steps.lock().push(step.clone());
        Ok(step)
    }
}

fn touch(i: usize) -> QueueEntry {
    QueueEntry::new(format!("tch_{:08}", i), format!("user_{}", i))
        .with_field("channel", serde_json::json!("sms"))
}

fn raw_list(len: usize) -> Vec<String> {
    (0..len).map(|i| touch(i).to_json().unwrap()).collect()
}

fn store_with(len: usize) -> InMemoryQueueStore {
    let store = InMemoryQueueStore::new();
    for i in 0..len {
        store.push(LIST, &touch(i)).unwrap();
    }
    store
}

// =============================================================================
// Batched scan correctness
// =============================================================================

#[tokio::test]
async fn batched_scan_takes_three_invocations_for_deep_target() {
    // 45 entries, batch 20: [44..25], [24..5], [4..0]
    let store = CursorLog::new(store_with(45));
    let tier = QueueTier::new(&store, LIST, 20);

    let owner = tier.find_owner("tch_00000004").await.unwrap();
    assert_eq!(owner.as_deref(), Some("user_4"));
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert_eq!(*store.cursors.lock(), vec![-1, 24, 4]);

    let steps = store.steps.lock();
    assert!(!steps[0].found && !steps[1].found);
    assert!(steps[2].found);
    assert_eq!(steps[2].next_index, 4);
}

#[tokio::test]
async fn batched_scan_stops_on_batch_that_reaches_target() {
    let store = CursorLog::new(store_with(45));
    let tier = QueueTier::new(&store, LIST, 20);

    let owner = tier.find_owner("tch_00000010").await.unwrap();
    assert_eq!(owner.as_deref(), Some("user_10"));
    assert_eq!(*store.cursors.lock(), vec![-1, 24]);
    assert_eq!(store.steps.lock()[1], ScanStep::hit(10, Some("user_10".into()), 0));
}

#[test]
fn batched_scan_cursor_sequence_by_hand() {
    let entries = raw_list(45);

    let first = scan_entries(&entries, "tch_00000004", -1, 20);
    assert_eq!(first, ScanStep::resume_at(24, 0));

    let second = scan_entries(&entries, "tch_00000004", first.next_index, 20);
    assert_eq!(second, ScanStep::resume_at(4, 0));

    let third = scan_entries(&entries, "tch_00000004", second.next_index, 20);
    assert!(third.found);
    assert_eq!(third.next_index, 4);
    assert_eq!(third.owner.as_deref(), Some("user_4"));
}

#[test]
fn batched_scan_newest_entry_found_in_first_call() {
    let entries = raw_list(45);
    let step = scan_entries(&entries, "tch_00000044", -1, 20);
    assert_eq!(step, ScanStep::hit(44, Some("user_44".into()), 0));
}

#[tokio::test]
async fn batched_scan_head_only_remaining_still_visited() {
    // 41 entries, batch 20: [40..21], [20..1], then only index 0 is left
    let store = CursorLog::new(store_with(41));
    let tier = QueueTier::new(&store, LIST, 20);

    let owner = tier.find_owner("tch_00000000").await.unwrap();
    assert_eq!(owner.as_deref(), Some("user_0"));
    assert_eq!(*store.cursors.lock(), vec![-1, 20, -41]);
}

// =============================================================================
// Exhaustion
// =============================================================================

#[test]
fn exhaustion_short_list_single_call() {
    let entries = raw_list(5);
    let step = scan_entries(&entries, "tch_notthere", -1, 20);
    assert!(!step.found);
    assert_eq!(step.next_index, 0);
    assert_eq!(step.owner, None);
    assert!(step.is_terminal());
}

#[tokio::test]
async fn exhaustion_adapter_stops_after_one_call() {
    let store = CursorLog::new(store_with(5));
    let tier = QueueTier::new(&store, LIST, 20);

    assert_eq!(tier.find_owner("tch_notthere").await.unwrap(), None);
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhaustion_long_list_walks_every_batch() {
    let store = CursorLog::new(store_with(100));
    let tier = QueueTier::new(&store, LIST, 20);

    assert_eq!(tier.find_owner("tch_notthere").await.unwrap(), None);
    assert_eq!(*store.cursors.lock(), vec![-1, 79, 59, 39, 19]);
}

#[tokio::test]
async fn exhaustion_missing_list() {
    let store = CursorLog::new(InMemoryQueueStore::new());
    let tier = QueueTier::new(&store, "touch:nothing_here", 20);

    assert_eq!(tier.find_owner("tch_00000001").await.unwrap(), None);
    assert_eq!(*store.steps.lock(), vec![ScanStep::exhausted(0)]);
}

// =============================================================================
// Malformed entries
// =============================================================================

#[test]
fn malformed_entry_next_to_target() {
    let mut entries = raw_list(6);
    entries.insert(3, "{\"uid\": \"tch_broken".to_string());

    // target sits just below the broken entry
    let step = scan_entries(&entries, "tch_00000002", -1, 20);
    assert!(step.found);
    assert_eq!(step.next_index, 2);
    assert_eq!(step.owner.as_deref(), Some("user_2"));
    assert_eq!(step.skipped, 1);

    // and just above it
    let step = scan_entries(&entries, "tch_00000003", -1, 20);
    assert!(step.found);
    assert_eq!(step.next_index, 4);
    assert_eq!(step.skipped, 0);
}

#[test]
fn malformed_shapes_are_all_skipped() {
    let mut entries = vec![touch(0).to_json().unwrap()];
    entries.extend(
        [
            "",
            "null",
            "\"tch_00000000\"",
            "17",
            r#"{"user_sub":"user_x"}"#,
            r#"{"uid":12345,"user_sub":"user_x"}"#,
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    let step = scan_entries(&entries, "tch_00000000", -1, 20);
    assert_eq!(step, ScanStep::hit(0, Some("user_0".into()), 6));
}

#[test]
fn malformed_entries_count_toward_batch_budget() {
    let mut entries = vec![touch(0).to_json().unwrap()];
    entries.extend(std::iter::repeat("garbage".to_string()).take(4));

    let step = scan_entries(&entries, "tch_00000000", -1, 2);
    assert_eq!(step, ScanStep::resume_at(2, 2));
}

#[tokio::test]
async fn malformed_entries_do_not_abort_adapter() {
    let store = store_with(30);
    for _ in 0..10 {
        store.push_raw(LIST, "\u{0}\u{1}binary");
    }
    store.push(LIST, &touch(999)).unwrap();

    let logged = CursorLog::new(store);
    let tier = QueueTier::new(&logged, LIST, 20);
    assert_eq!(tier.find_owner("tch_00000007").await.unwrap().as_deref(), Some("user_7"));

    let skipped: u32 = logged.steps.lock().iter().map(|s| s.skipped).sum();
    assert_eq!(skipped, 10);
}

#[test]
fn extra_fields_and_ordering_do_not_matter() {
    let entries = vec![
        r#"{"channel":"email","user_sub":"user_z","message":{"body":"hi"},"uid":"tch_reordered"}"#
            .to_string(),
    ];
    let step = scan_entries(&entries, "tch_reordered", -1, 20);
    assert_eq!(step.owner.as_deref(), Some("user_z"));
}

//! Queue tier adapter: drive the scan over one list until hit or exhaustion.
//!
//! Only guaranteed to find an entry that sits in the list for the whole
//! duration of the scan. Entries appended after the scan passes the tail, or
//! removed before the cursor reaches them, may be missed; the cascade covers
//! that by checking the next stage and finally the primary.

use tracing::{debug, warn};
use crate::storage::traits::{QueueStore, StorageError};

pub struct QueueTier<'a> {
    store: &'a dyn QueueStore,
    list: &'a str,
    batch_size: usize,
}

impl<'a> QueueTier<'a> {
    pub fn new(store: &'a dyn QueueStore, list: &'a str, batch_size: usize) -> Self {
        Self {
            store,
            list,
            batch_size: batch_size.max(1),
        }
    }

    /// Scan the list from the tail for `touch_uid`, returning its owner.
    ///
    /// Store errors abort the scan and propagate; nothing is retried here.
    pub async fn find_owner(&self, touch_uid: &str) -> Result<Option<String>, StorageError> {
        let mut cursor: i64 = -1;
        let mut invocations: u64 = 0;
        let mut skipped: u64 = 0;

        let (found, owner) = loop {
            let step = self
                .store
                .scan(self.list, touch_uid, cursor, self.batch_size)
                .await?;
            invocations += 1;
            skipped += u64::from(step.skipped);

            if step.found {
                break (true, step.owner);
            }
            if step.next_index == 0 {
                break (false, None);
            }
            cursor = step.next_index;
        };

        crate::metrics::record_scan_invocations(self.list, invocations);
        if skipped > 0 {
            warn!(list = %self.list, skipped, "Skipped undecodable queue entries");
            crate::metrics::record_skipped_entries(self.list, skipped);
        }
        if found && owner.is_none() {
            warn!(list = %self.list, "Matching queue entry has no owner");
        }
        debug!(list = %self.list, invocations, found, "Queue scan finished");

        Ok(owner)
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batched reverse scan over an append-only queue list.
//!
//! Queue lists grow at the tail, so the most recently appended entries are
//! the most likely to still be there. A scan walks from a cursor toward the
//! head, inspecting at most `max_count` entries per invocation so a single
//! call never blocks the list's store for long:
//!
//! ```text
//!   head                                              tail
//!   [0] [1] [2] ... [23] [24] [25] ... [42] [43] [44]
//!                    ◄────── call 2 ──────┤◄── call 1 ──┤  cursor = -1
//! ```
//!
//! Each invocation replies `(found, next_index, owner, skipped)`:
//! - found: `next_index` is the index of the match
//! - not found, budget spent: `next_index` is where to resume
//! - not found, head reached (or empty list): `next_index == 0`
//!
//! Because 0 is the "exhausted" sentinel, a batch that stops with index 0
//! still unscanned resumes from `-len` instead, which resolves to the same
//! position.
//!
//! [`SCAN_SCRIPT`] runs this inside Redis as one atomic Lua call.
//! [`scan_entries`] is the same algorithm over an in-process slice.

pub mod script_cache;

pub use script_cache::{Clock, ManualClock, ScriptCache, SystemClock};

use crate::touch::{QueueEntry, ScanStep};

/// Lua implementation of one scan invocation.
///
/// `KEYS[1]` list key, `ARGV[1]` target uid, `ARGV[2]` start index,
/// `ARGV[3]` max count. Replies `{found, next_index, owner|nil, skipped}`.
pub const SCAN_SCRIPT: &str = r#"
local key = KEYS[1]
local target = ARGV[1]
local start_index = tonumber(ARGV[2])
local max_count = tonumber(ARGV[3])

local len = redis.call("LLEN", key)
if len == 0 then
    return {0, 0, false, 0}
end

if start_index < 0 then
    start_index = len + start_index
end
if start_index < 0 then
    return {0, 0, false, 0}
end
if start_index >= len then
    start_index = len - 1
end
if max_count < 1 then
    max_count = 1
end

local low = start_index - max_count + 1
if low < 0 then
    low = 0
end

local items = redis.call("LRANGE", key, low, start_index)
local skipped = 0
for i = #items, 1, -1 do
    local ok, entry = pcall(cjson.decode, items[i])
    if ok and type(entry) == "table" and type(entry.uid) == "string" then
        if entry.uid == target then
            local owner = entry.user_sub
            if type(owner) ~= "string" then
                owner = false
            end
            return {1, low + i - 1, owner, skipped}
        end
    else
        skipped = skipped + 1
    end
end

if low == 0 then
    return {0, 0, false, skipped}
end
local next_index = low - 1
if next_index == 0 then
    next_index = -len
end
return {0, next_index, false, skipped}
"#;

/// Run one scan invocation over `entries` (head first, as stored).
///
/// Mirrors [`SCAN_SCRIPT`] exactly; used by the in-memory queue store and
/// as the reference the Lua script is tested against.
pub fn scan_entries<S: AsRef<str>>(
    entries: &[S],
    target_uid: &str,
    start_index: i64,
    max_count: usize,
) -> ScanStep {
    let len = entries.len() as i64;
    if len == 0 {
        return ScanStep::exhausted(0);
    }

    let mut start = if start_index < 0 { len + start_index } else { start_index };
    if start < 0 {
        return ScanStep::exhausted(0);
    }
    if start >= len {
        start = len - 1;
    }

    // A batch can never cover more than the whole list
    let budget = i64::try_from(max_count.max(1)).unwrap_or(i64::MAX);
    let low = start.saturating_sub(budget - 1).max(0);

    let mut skipped = 0u32;
    for idx in (low..=start).rev() {
        match QueueEntry::decode(entries[idx as usize].as_ref()) {
            Some(entry) if entry.uid == target_uid => {
                return ScanStep::hit(idx, entry.user_sub, skipped)
            }
            Some(_) => {}
            None => skipped += 1,
        }
    }

    if low == 0 {
        return ScanStep::exhausted(skipped);
    }
    let next = low - 1;
    ScanStep::resume_at(if next == 0 { -len } else { next }, skipped)
}

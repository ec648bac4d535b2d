//! Duplicate error merging
//!
//! Errors with the same message and stack trace seen again within the
//! duplicate interval are not queued individually. The first repeat opens a
//! merge entry; later repeats only bump its count. [`DuplicateCheckerPlugin::flush`]
//! then enqueues one event per entry carrying the accumulated count.
//!
//! ## Hashing
//!
//! Each level of the `@error` chain contributes its non-empty message and its
//! non-empty stack trace (as compact JSON):
//!
//! ```text
//! hash = (hash * 397) ^ string_hash(part)
//! ```
//!
//! where `string_hash` is the 31-multiplier polynomial hash over UTF-16 code
//! units with 32-bit wrap-around. A zero hash means "nothing to compare" and
//! the event passes through.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::error::Result;
use crate::pipeline::{PipelineContext, Plugin};
use crate::queue::SubmissionQueue;
use crate::types::{Event, InnerError};

/// Number of recent hashes remembered.
pub const MAX_PROCESSED_HASHES: usize = 50;

/// 32-bit polynomial hash over UTF-16 code units.
pub fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Hash of an error chain used to recognise duplicates.
pub fn error_hash(error: &InnerError) -> i32 {
    let mut hash = 0i32;
    for level in error.chain() {
        if let Some(message) = level.message.as_deref().filter(|m| !m.is_empty()) {
            hash = hash.wrapping_mul(397) ^ string_hash(message);
        }
        if let Some(stack) = level.stack_trace.as_ref().filter(|s| !is_empty_stack(s)) {
            hash = hash.wrapping_mul(397) ^ string_hash(&stack.to_string());
        }
    }
    hash
}

fn is_empty_stack(stack: &Value) -> bool {
    match stack {
        Value::Null => true,
        Value::Array(frames) => frames.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// A repeated error waiting to be flushed.
#[derive(Debug, Clone)]
pub struct MergedEvent {
    hash: i32,
    count: u32,
    event: Event,
}

impl MergedEvent {
    pub fn hash(&self) -> i32 {
        self.hash
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    fn increment_count(&mut self, by: u32) {
        self.count = self.count.saturating_add(by);
    }

    fn update_date(&mut self, date: Option<DateTime<Utc>>) {
        if let Some(date) = date {
            if self.event.date.map_or(true, |current| date > current) {
                self.event.date = Some(date);
            }
        }
    }

    /// The event to enqueue, with the merged count and latest date.
    fn into_event(self) -> Event {
        let mut event = self.event;
        event.count = self.count;
        event
    }
}

#[derive(Debug, Clone, Copy)]
struct ProcessedHash {
    hash: i32,
    timestamp_ms: i64,
}

#[derive(Default)]
struct DuplicateState {
    merged: Vec<MergedEvent>,
    processed: VecDeque<ProcessedHash>,
}

/// Merges repeated errors seen within the duplicate interval.
pub struct DuplicateCheckerPlugin {
    queue: Arc<SubmissionQueue>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    state: Mutex<DuplicateState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl DuplicateCheckerPlugin {
    pub fn new(queue: Arc<SubmissionQueue>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            queue,
            clock,
            interval,
            state: Mutex::new(DuplicateState::default()),
            timer: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Merge entries waiting for the next flush.
    pub fn pending(&self) -> Vec<MergedEvent> {
        self.lock_state().merged.clone()
    }

    /// Enqueue every merged event and clear the merge table.
    ///
    /// Merged events go straight to the queue; they already passed the
    /// pipeline once. Returns the events handed to the queue.
    pub fn flush(&self) -> Vec<Event> {
        let merged = std::mem::take(&mut self.lock_state().merged);

        merged
            .into_iter()
            .map(|entry| {
                tracing::debug!(
                    hash = entry.hash,
                    count = entry.count,
                    "Enqueueing merged duplicate event"
                );
                let event = entry.into_event();
                self.queue.enqueue(&event);
                event
            })
            .collect()
    }

    /// Spawn the recurring flush on the current tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.is_some() {
            return;
        }

        let checker: Weak<Self> = Arc::downgrade(self);
        let period = self.interval.max(Duration::from_millis(1));
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(checker) = checker.upgrade() else {
                    break;
                };
                checker.flush();
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DuplicateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn interval_ms(&self) -> i64 {
        i64::try_from(self.interval.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Plugin for DuplicateCheckerPlugin {
    fn name(&self) -> &str {
        "core.duplicate_checker"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let Some(error) = ctx.event.error() else {
            return Ok(());
        };
        let hash = error_hash(&error);
        if hash == 0 {
            return Ok(());
        }

        let count = ctx.event.count.max(1);
        let now_ms = self.clock.now_millis();
        let mut state = self.lock_state();

        if let Some(merged) = state.merged.iter_mut().find(|m| m.hash == hash) {
            merged.increment_count(count);
            merged.update_date(ctx.event.date);
            tracing::info!(hash, count = merged.count, "Ignoring duplicate event");
            ctx.cancel();
            return Ok(());
        }

        let window_start = now_ms.saturating_sub(self.interval_ms());
        let seen_recently = state
            .processed
            .iter()
            .any(|p| p.hash == hash && p.timestamp_ms >= window_start);

        if seen_recently {
            tracing::trace!(hash, "Adding event to merge table");
            // The entry also counts the occurrence that opened the window
            state.merged.push(MergedEvent {
                hash,
                count: count.saturating_add(1),
                event: ctx.event.clone(),
            });
            ctx.cancel();
            return Ok(());
        }

        tracing::trace!(hash, "Recording event hash");
        state.processed.push_back(ProcessedHash {
            hash,
            timestamp_ms: now_ms,
        });
        while state.processed.len() > MAX_PROCESSED_HASHES {
            state.processed.pop_front();
        }

        Ok(())
    }
}

impl Drop for DuplicateCheckerPlugin {
    fn drop(&mut self) {
        self.stop();
    }
}

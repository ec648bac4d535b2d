//! Offline submission queue
//!
//! Events are persisted in the `queue` store as soon as they leave the
//! pipeline and are posted in batches by [`SubmissionQueue::process`]. What
//! happens to a batch afterwards depends on the collector's answer:
//!
//! | Status | Batch | Suspend | Extra |
//! |---|---|---|---|
//! | 2xx | removed | - | - |
//! | 503 | kept | 5 min | - |
//! | 402 | cleared | 5 min | new events discarded while suspended |
//! | 401, 403 | removed | 15 min | - |
//! | 400, 404 | removed | 4 h | - |
//! | 413, batch > 1 | kept | - | batch size divided by 1.5 |
//! | 413, batch of 1 | removed | - | - |
//! | anything else | kept | 5 min | - |
//!
//! A timer started with [`SubmissionQueue::start`] processes the queue every
//! submission interval unless a suspension is active.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::Config;
use crate::settings::SettingsManager;
use crate::storage::{Storage, StorageItem};
use crate::transport::{SubmissionResponse, Transport};
use crate::types::Event;

/// Suspension used when none (or a non-positive one) is requested.
pub const DEFAULT_SUSPEND_MINUTES: i64 = 5;

/// Callback invoked after every post with the batch and the response.
pub type EventsPostedHandler = Box<dyn Fn(&[Event], &SubmissionResponse) + Send + Sync>;

#[derive(Debug, Default)]
struct Suspension {
    suspended_until: Option<DateTime<Utc>>,
    discard_until: Option<DateTime<Utc>>,
}

/// Clears the in-flight flag even if the processing future is dropped.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Durable queue of events waiting for delivery.
pub struct SubmissionQueue {
    enabled: bool,
    api_key_valid: bool,
    server_url: String,
    interval: Duration,
    storage: Storage<Event>,
    transport: Arc<dyn Transport>,
    settings: Arc<SettingsManager>,
    clock: Arc<dyn Clock>,
    batch_size: AtomicUsize,
    processing: AtomicBool,
    suspension: Mutex<Suspension>,
    handlers: RwLock<Vec<EventsPostedHandler>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SubmissionQueue {
    pub fn new(
        config: &Config,
        storage: Storage<Event>,
        transport: Arc<dyn Transport>,
        settings: Arc<SettingsManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            api_key_valid: config.is_valid(),
            server_url: config.server_url.clone(),
            interval: config.submission_interval(),
            storage,
            transport,
            settings,
            clock,
            batch_size: AtomicUsize::new(config.submission_batch_size.max(1)),
            processing: AtomicBool::new(false),
            suspension: Mutex::new(Suspension::default()),
            handlers: RwLock::new(Vec::new()),
            timer: Mutex::new(None),
        }
    }

    /// Persist an event for delivery.
    ///
    /// Returns the storage timestamp, or `None` when the event was refused
    /// or could not be stored.
    pub fn enqueue(&self, event: &Event) -> Option<i64> {
        if !self.enabled {
            tracing::info!("Configuration is disabled, the event will not be enqueued");
            return None;
        }
        if !self.api_key_valid {
            tracing::info!("Invalid API key, the event will not be enqueued");
            return None;
        }
        if self.are_queued_items_discarded() {
            tracing::info!("Queue items are currently being discarded, the event will not be enqueued");
            return None;
        }

        match self.storage.save(event) {
            Some(timestamp) => {
                tracing::info!(
                    timestamp,
                    event_type = %event.type_str(),
                    reference_id = event.reference_id.as_deref().unwrap_or(""),
                    "Enqueued event"
                );
                Some(timestamp)
            }
            None => {
                tracing::error!(event_type = %event.type_str(), "Could not enqueue event");
                None
            }
        }
    }

    /// Post the oldest batch and apply the response policy.
    ///
    /// Does nothing while another call is in flight.
    pub async fn process(&self, is_app_exiting: bool) {
        if self.processing.swap(true, Ordering::SeqCst) {
            tracing::trace!("Queue is already being processed");
            return;
        }
        let _guard = ProcessingGuard(&self.processing);

        if !self.enabled {
            tracing::info!("Configuration is disabled, the queue will not be processed");
            return;
        }
        if !self.api_key_valid {
            tracing::info!("Invalid API key, the queue will not be processed");
            return;
        }

        let batch = self.storage.get(Some(self.submission_batch_size()));
        if batch.is_empty() {
            return;
        }

        tracing::info!(
            count = batch.len(),
            server_url = %self.server_url,
            "Sending events"
        );

        let events: Vec<Event> = batch.iter().map(|item| item.value.clone()).collect();
        let response = self.transport.post_events(&events, is_app_exiting).await;

        self.apply_response(&response, &batch);
        self.notify_posted(&events, &response);

        if let Some(version) = response.settings_version {
            self.settings.check_version(version).await;
        }

        tracing::info!("Finished processing queue");
    }

    /// Register a callback for completed posts.
    pub fn on_events_posted<F>(&self, handler: F)
    where
        F: Fn(&[Event], &SubmissionResponse) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(handler));
    }

    /// Current batch size; shrinks after 413 responses.
    pub fn submission_batch_size(&self) -> usize {
        self.batch_size.load(Ordering::SeqCst)
    }

    pub fn is_suspended(&self) -> bool {
        let now = self.clock.now();
        self.lock_suspension()
            .suspended_until
            .is_some_and(|until| until > now)
    }

    pub fn are_queued_items_discarded(&self) -> bool {
        let now = self.clock.now();
        self.lock_suspension()
            .discard_until
            .is_some_and(|until| until > now)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Number of events waiting in storage.
    pub fn pending(&self) -> usize {
        self.storage.len()
    }

    pub fn storage(&self) -> &Storage<Event> {
        &self.storage
    }

    /// Spawn the recurring processing timer on the current tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.is_some() {
            return;
        }

        let queue: Weak<Self> = Arc::downgrade(self);
        let period = self.interval.max(Duration::from_millis(1));
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(queue) = queue.upgrade() else {
                    break;
                };
                if !queue.is_suspended() && !queue.is_processing() {
                    queue.process(false).await;
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    fn apply_response(&self, response: &SubmissionResponse, batch: &[StorageItem<Event>]) {
        let status = response.status_code;
        let message = response.message.as_deref().unwrap_or("");

        if response.success() {
            tracing::info!(status, count = batch.len(), "Sent events");
            self.remove_batch(batch);
            return;
        }

        if response.service_unavailable() {
            tracing::warn!(status, "Server returned service unavailable");
            self.suspend(None, false, false);
            return;
        }

        if response.payment_required() {
            tracing::info!(status, "Too many events have been submitted, please upgrade your plan");
            self.suspend(None, true, true);
            return;
        }

        if response.unable_to_authenticate() {
            tracing::info!(status, reason = message, "Unable to authenticate, please check your configuration");
            self.suspend(Some(15), false, false);
            self.remove_batch(batch);
            return;
        }

        if response.not_found() || response.bad_request() {
            tracing::error!(status, reason = message, "Error while trying to submit data");
            self.suspend(Some(60 * 4), false, false);
            self.remove_batch(batch);
            return;
        }

        if response.request_entity_too_large() {
            let batch_size = self.submission_batch_size();
            if batch_size > 1 {
                let reduced = ((batch_size as f64 / 1.5).round() as usize).max(1);
                tracing::error!(
                    status,
                    from = batch_size,
                    to = reduced,
                    "Request entity too large, retrying with a smaller batch"
                );
                self.batch_size.store(reduced, Ordering::SeqCst);
            } else {
                tracing::error!(status, "Request entity too large, discarding event");
                self.remove_batch(batch);
            }
            return;
        }

        tracing::error!(status, reason = message, "Error submitting events");
        self.suspend(None, false, false);
    }

    /// Pause processing for `minutes` (default [`DEFAULT_SUSPEND_MINUTES`]).
    ///
    /// With `discard_future`, `enqueue` refuses new events for the same
    /// window. With `clear_queue`, every queued event is deleted now.
    pub fn suspend(&self, minutes: Option<i64>, discard_future: bool, clear_queue: bool) {
        let minutes = minutes
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_SUSPEND_MINUTES);
        let until = self.clock.now() + chrono::Duration::minutes(minutes);
        tracing::info!(minutes, until = %until, "Suspending processing");

        {
            let mut suspension = self.lock_suspension();
            suspension.suspended_until = Some(until);
            if discard_future {
                suspension.discard_until = Some(until);
            }
        }

        if clear_queue {
            self.storage.clear();
        }
    }

    fn remove_batch(&self, batch: &[StorageItem<Event>]) {
        for item in batch {
            self.storage.remove(item.timestamp);
        }
    }

    fn notify_posted(&self, events: &[Event], response: &SubmissionResponse) {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        for handler in handlers.iter() {
            handler(events, response);
        }
    }

    fn lock_suspension(&self) -> std::sync::MutexGuard<'_, Suspension> {
        self.suspension.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SubmissionQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryBackend;
    use crate::test_support::{server_settings, RecordingTransport, TEST_API_KEY};
    use crate::transport::SettingsResponse;

    struct Harness {
        clock: Arc<ManualClock>,
        transport: Arc<RecordingTransport>,
        settings: Arc<SettingsManager>,
        queue: Arc<SubmissionQueue>,
    }

    fn harness_with(config: Config, transport: RecordingTransport) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let transport = Arc::new(transport);
        let settings = Arc::new(SettingsManager::new(
            &config,
            Storage::new("settings", Arc::new(MemoryBackend::new()), 1, clock.clone()),
            transport.clone(),
        ));
        let queue = Arc::new(SubmissionQueue::new(
            &config,
            Storage::new(
                "queue",
                Arc::new(MemoryBackend::new()),
                config.queue_max_items,
                clock.clone(),
            ),
            transport.clone(),
            settings.clone(),
            clock.clone(),
        ));
        Harness {
            clock,
            transport,
            settings,
            queue,
        }
    }

    fn harness() -> Harness {
        harness_with(Config::with_api_key(TEST_API_KEY), RecordingTransport::new())
    }

    fn enqueue_logs(queue: &SubmissionQueue, count: usize) {
        for i in 0..count {
            let event = Event::log(Some("test"), &format!("message {i}"), None);
            assert!(queue.enqueue(&event).is_some());
        }
    }

    #[test]
    fn test_suspend_directly() {
        let h = harness();
        enqueue_logs(&h.queue, 2);

        h.queue.suspend(Some(10), false, false);
        assert!(h.queue.is_suspended());
        assert!(!h.queue.are_queued_items_discarded());
        assert_eq!(h.queue.pending(), 2);
        h.clock.advance(chrono::Duration::minutes(9));
        assert!(h.queue.is_suspended());
        h.clock.advance(chrono::Duration::minutes(2));
        assert!(!h.queue.is_suspended());

        h.queue.suspend(None, true, true);
        assert!(h.queue.is_suspended());
        assert!(h.queue.are_queued_items_discarded());
        assert_eq!(h.queue.pending(), 0);
        assert!(h.queue.enqueue(&Event::new("log")).is_none());

        h.clock.advance(chrono::Duration::minutes(DEFAULT_SUSPEND_MINUTES) + chrono::Duration::seconds(1));
        assert!(!h.queue.is_suspended());
        assert!(!h.queue.are_queued_items_discarded());
        assert!(h.queue.enqueue(&Event::new("log")).is_some());
    }

    #[test]
    fn test_suspend_non_positive_minutes_uses_default() {
        let h = harness();
        h.queue.suspend(Some(0), false, false);
        h.clock.advance(chrono::Duration::minutes(DEFAULT_SUSPEND_MINUTES) - chrono::Duration::seconds(1));
        assert!(h.queue.is_suspended());
        h.clock.advance(chrono::Duration::seconds(2));
        assert!(!h.queue.is_suspended());
    }

    #[tokio::test]
    async fn test_success_removes_batch() {
        let h = harness();
        enqueue_logs(&h.queue, 3);

        h.queue.process(false).await;

        assert_eq!(h.queue.pending(), 0);
        assert_eq!(h.transport.posted().len(), 1);
        assert_eq!(h.transport.posted()[0].len(), 3);
        assert!(!h.queue.is_suspended());
    }

    #[tokio::test]
    async fn test_batches_follow_storage_order_and_size() {
        let mut config = Config::with_api_key(TEST_API_KEY);
        config.submission_batch_size = 2;
        let h = harness_with(config, RecordingTransport::new());
        enqueue_logs(&h.queue, 3);

        h.queue.process(false).await;
        h.queue.process(false).await;

        let posted = h.transport.posted();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0].len(), 2);
        assert_eq!(posted[0][0].message.as_deref(), Some("message 0"));
        assert_eq!(posted[1][0].message.as_deref(), Some("message 2"));
        assert_eq!(h.queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_does_not_post() {
        let h = harness();
        h.queue.process(false).await;
        assert!(h.transport.posted().is_empty());
    }

    #[tokio::test]
    async fn test_service_unavailable_keeps_batch_and_suspends() {
        let h = harness();
        h.transport.push_status(503);
        enqueue_logs(&h.queue, 2);

        h.queue.process(false).await;
        assert_eq!(h.queue.pending(), 2);
        assert!(h.queue.is_suspended());
        assert!(!h.queue.are_queued_items_discarded());

        h.clock.advance(chrono::Duration::minutes(5) + chrono::Duration::seconds(1));
        assert!(!h.queue.is_suspended());
    }

    #[tokio::test]
    async fn test_payment_required_clears_and_discards() {
        let h = harness();
        h.transport.push_status(402);
        enqueue_logs(&h.queue, 2);

        h.queue.process(false).await;
        assert_eq!(h.queue.pending(), 0);
        assert!(h.queue.is_suspended());
        assert!(h.queue.are_queued_items_discarded());
        assert!(h.queue.enqueue(&Event::new("log")).is_none());

        h.clock.advance(chrono::Duration::minutes(6));
        assert!(!h.queue.are_queued_items_discarded());
        assert!(h.queue.enqueue(&Event::new("log")).is_some());
    }

    #[tokio::test]
    async fn test_unauthorized_drops_batch_for_fifteen_minutes() {
        for status in [401, 403] {
            let h = harness();
            h.transport.push_status(status);
            enqueue_logs(&h.queue, 2);

            h.queue.process(false).await;
            assert_eq!(h.queue.pending(), 0);
            assert!(h.queue.is_suspended());

            h.clock.advance(chrono::Duration::minutes(14));
            assert!(h.queue.is_suspended());
            h.clock.advance(chrono::Duration::minutes(2));
            assert!(!h.queue.is_suspended());
        }
    }

    #[tokio::test]
    async fn test_bad_request_and_not_found_drop_batch_for_four_hours() {
        for status in [400, 404] {
            let h = harness();
            h.transport.push_status(status);
            enqueue_logs(&h.queue, 1);

            h.queue.process(false).await;
            assert_eq!(h.queue.pending(), 0);

            h.clock.advance(chrono::Duration::minutes(239));
            assert!(h.queue.is_suspended());
            h.clock.advance(chrono::Duration::minutes(2));
            assert!(!h.queue.is_suspended());
        }
    }

    #[tokio::test]
    async fn test_too_large_shrinks_batch_and_keeps_items() {
        let h = harness();
        assert_eq!(h.queue.submission_batch_size(), 50);
        h.transport.push_status(413);
        enqueue_logs(&h.queue, 3);

        h.queue.process(false).await;
        assert_eq!(h.queue.submission_batch_size(), 33);
        assert_eq!(h.queue.pending(), 3);
        assert!(!h.queue.is_suspended());
    }

    #[tokio::test]
    async fn test_too_large_single_event_is_dropped() {
        let mut config = Config::with_api_key(TEST_API_KEY);
        config.submission_batch_size = 1;
        let h = harness_with(config, RecordingTransport::new());
        h.transport.push_status(413);
        enqueue_logs(&h.queue, 2);

        h.queue.process(false).await;
        assert_eq!(h.queue.submission_batch_size(), 1);
        assert_eq!(h.queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_repeated_too_large_never_reaches_zero() {
        let mut config = Config::with_api_key(TEST_API_KEY);
        config.submission_batch_size = 2;
        let h = harness_with(config, RecordingTransport::new());
        enqueue_logs(&h.queue, 2);

        h.transport.push_status(413);
        h.queue.process(false).await;
        assert_eq!(h.queue.submission_batch_size(), 1);
    }

    #[tokio::test]
    async fn test_other_failures_keep_batch_and_suspend() {
        for status in [500, 0] {
            let h = harness();
            h.transport.push_status(status);
            enqueue_logs(&h.queue, 2);

            h.queue.process(false).await;
            assert_eq!(h.queue.pending(), 2);
            assert!(h.queue.is_suspended());
        }
    }

    #[tokio::test]
    async fn test_disabled_or_invalid_key_refuses_work() {
        let mut disabled = Config::with_api_key(TEST_API_KEY);
        disabled.enabled = false;

        for config in [disabled, Config::default()] {
            let h = harness_with(config, RecordingTransport::new());
            assert!(h.queue.enqueue(&Event::new("log")).is_none());
            h.queue.process(false).await;
            assert!(h.transport.posted().is_empty());
        }
    }

    #[tokio::test]
    async fn test_process_is_not_reentrant() {
        let h = harness_with(
            Config::with_api_key(TEST_API_KEY),
            RecordingTransport::new().gated(),
        );
        enqueue_logs(&h.queue, 1);

        let in_flight = {
            let queue = h.queue.clone();
            tokio::spawn(async move { queue.process(false).await })
        };
        while h.transport.posted().is_empty() {
            tokio::task::yield_now().await;
        }

        assert!(h.queue.is_processing());
        h.queue.process(false).await;
        assert_eq!(h.transport.posted().len(), 1);

        h.transport.open_gate();
        in_flight.await.unwrap();
        assert!(!h.queue.is_processing());
        assert_eq!(h.queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_exit_flag_reaches_transport() {
        let h = harness();
        enqueue_logs(&h.queue, 1);
        h.queue.process(true).await;
        assert_eq!(h.transport.exiting_flags(), vec![true]);
    }

    #[tokio::test]
    async fn test_settings_version_triggers_refresh() {
        let h = harness();
        h.transport
            .push_response(SubmissionResponse::new(202).with_settings_version(4));
        h.transport
            .push_settings(SettingsResponse::ok(server_settings(4, &[("@@log:*", "Warn")])));
        enqueue_logs(&h.queue, 1);

        h.queue.process(false).await;
        assert_eq!(h.transport.settings_requests(), vec![0]);
        assert_eq!(h.settings.version(), 4);
        assert_eq!(h.settings.get("@@log:*").as_deref(), Some("Warn"));
    }

    #[tokio::test]
    async fn test_events_posted_handlers_see_batch_and_response() {
        let h = harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            h.queue.on_events_posted(move |events, response| {
                seen.lock()
                    .unwrap()
                    .push((events.len(), response.status_code));
            });
        }
        h.transport.push_status(503);
        enqueue_logs(&h.queue, 2);

        h.queue.process(false).await;
        assert_eq!(*seen.lock().unwrap(), vec![(2, 503)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_processes_until_stopped() {
        let h = harness();
        enqueue_logs(&h.queue, 1);
        h.queue.start();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.transport.posted().len(), 1);
        assert_eq!(h.queue.pending(), 0);

        h.queue.stop();
        enqueue_logs(&h.queue, 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.transport.posted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_skips_while_suspended() {
        let h = harness();
        h.transport.push_status(503);
        enqueue_logs(&h.queue, 1);
        h.queue.process(false).await;
        assert!(h.queue.is_suspended());

        h.queue.start();
        tokio::time::sleep(Duration::from_secs(25)).await;
        // The suspension is measured on the injected clock, which has not moved
        assert_eq!(h.transport.posted().len(), 1);

        h.clock.advance(chrono::Duration::minutes(6));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.transport.posted().len(), 2);
        assert_eq!(h.queue.pending(), 0);
    }
}

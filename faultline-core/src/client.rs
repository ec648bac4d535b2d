//! Client facade
//!
//! Wires storage, settings, the submission queue and the default pipeline
//! together from one [`Config`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use faultline_core::{Client, Collaborators, Config};
//!
//! let config = Config::load()?;
//! let client = Client::new(config, transport, Collaborators::with_source_chain_parser())?;
//! client.start();
//!
//! client.submit_log(Some("app.startup"), "ready", Some("Info"));
//! if let Err(e) = do_work() {
//!     client.submit_exception(e);
//! }
//!
//! client.shutdown().await;
//! ```

use std::sync::{Arc, Mutex, Weak};

use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{
    create_default_pipeline, Collaborators, ContextData, DuplicateCheckerPlugin, Pipeline,
    PipelineContext, Plugin,
};
use crate::queue::SubmissionQueue;
use crate::settings::SettingsManager;
use crate::storage::{
    Database, MemoryBackend, SqliteBackend, Storage, StorageBackend, QUEUE_NAMESPACE,
    SETTINGS_NAMESPACE,
};
use crate::transport::Transport;
use crate::types::{event_types, Event};

/// Entry point for submitting events.
pub struct Client {
    config: Config,
    clock: Arc<dyn Clock>,
    settings: Arc<SettingsManager>,
    queue: Arc<SubmissionQueue>,
    duplicates: Arc<DuplicateCheckerPlugin>,
    pipeline: Pipeline,
    last_reference_id: Mutex<Option<String>>,
    settings_timer: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        Self::with_clock(config, transport, collaborators, Arc::new(SystemClock))
    }

    /// Like [`Client::new`] with an injected clock.
    pub fn with_clock(
        config: Config,
        transport: Arc<dyn Transport>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        if !config.is_valid() {
            tracing::warn!("No valid API key configured, events will not be submitted");
        }

        let (queue_backend, settings_backend) = open_backends(&config)?;

        let settings = Arc::new(SettingsManager::new(
            &config,
            Storage::new(SETTINGS_NAMESPACE, settings_backend, 1, clock.clone()),
            transport.clone(),
        ));
        let queue = Arc::new(SubmissionQueue::new(
            &config,
            Storage::new(
                QUEUE_NAMESPACE,
                queue_backend,
                config.queue_max_items,
                clock.clone(),
            ),
            transport,
            settings.clone(),
            clock.clone(),
        ));
        let duplicates = Arc::new(DuplicateCheckerPlugin::new(
            queue.clone(),
            clock.clone(),
            config.duplicate_interval(),
        ));
        let pipeline =
            create_default_pipeline(&config, settings.clone(), duplicates.clone(), &collaborators);

        tracing::debug!(plugins = ?pipeline.plugin_names(), "Client initialized");

        Ok(Self {
            config,
            clock,
            settings,
            queue,
            duplicates,
            pipeline,
            last_reference_id: Mutex::new(None),
            settings_timer: Mutex::new(None),
        })
    }

    /// Run an event through the pipeline and enqueue it unless cancelled.
    ///
    /// The returned context tells whether the event was cancelled and holds
    /// the enriched event.
    pub fn submit_event(&self, event: Event, data: ContextData) -> PipelineContext {
        let mut ctx = PipelineContext::with_data(event, data);

        if !self.config.enabled {
            tracing::info!("Event submission is currently disabled");
            ctx.cancel();
            return ctx;
        }

        if ctx.event.date.is_none() {
            ctx.event.date = Some(self.clock.now());
        }

        self.pipeline.run(&mut ctx, |ctx| {
            if ctx.cancelled {
                return;
            }

            if ctx.event.type_str().is_empty() {
                ctx.event.event_type = Some(event_types::LOG.to_string());
            }

            self.queue.enqueue(&ctx.event);

            if let Some(reference_id) = ctx.event.reference_id.as_deref().filter(|r| !r.is_empty())
            {
                tracing::info!(reference_id, "Setting last reference id");
                *self
                    .last_reference_id
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(reference_id.to_string());
            }
        });

        ctx
    }

    /// Submit an error; its `source()` chain is parsed by the configured
    /// error parser.
    pub fn submit_exception<E>(&self, error: E) -> PipelineContext
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.submit_event(
            Event::new(event_types::ERROR),
            ContextData::with_exception(error),
        )
    }

    /// Submit an error that application code did not handle.
    pub fn submit_unhandled_exception<E>(&self, error: E, submission_method: &str) -> PipelineContext
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.submit_event(
            Event::new(event_types::ERROR),
            ContextData::with_exception(error).mark_unhandled(Some(submission_method)),
        )
    }

    pub fn submit_log(
        &self,
        source: Option<&str>,
        message: &str,
        level: Option<&str>,
    ) -> PipelineContext {
        self.submit_event(Event::log(source, message, level), ContextData::default())
    }

    pub fn submit_not_found(&self, resource: &str) -> PipelineContext {
        let mut event = Event::new(event_types::NOT_FOUND);
        event.source = Some(resource.to_string());
        self.submit_event(event, ContextData::default())
    }

    pub fn submit_feature_usage(&self, feature: &str) -> PipelineContext {
        let mut event = Event::new(event_types::USAGE);
        event.source = Some(feature.to_string());
        self.submit_event(event, ContextData::default())
    }

    /// Post one batch now.
    pub async fn process_queue(&self) {
        self.queue.process(false).await;
    }

    /// Fetch settings from the collector now.
    pub async fn update_settings(&self) -> bool {
        self.settings.update_settings().await
    }

    /// Reference id of the last enqueued event that had one.
    pub fn last_reference_id(&self) -> Option<String> {
        self.last_reference_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn add_plugin(&self, plugin: Arc<dyn Plugin>) -> bool {
        self.pipeline.add_plugin(plugin)
    }

    pub fn remove_plugin(&self, name: &str) -> bool {
        self.pipeline.remove_plugin(name)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn queue(&self) -> &Arc<SubmissionQueue> {
        &self.queue
    }

    pub fn settings(&self) -> &Arc<SettingsManager> {
        &self.settings
    }

    pub fn duplicates(&self) -> &Arc<DuplicateCheckerPlugin> {
        &self.duplicates
    }

    /// Apply saved settings and spawn the background timers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.settings.apply_saved_server_settings();
        self.queue.start();
        self.duplicates.start();
        self.start_settings_refresh();
        tracing::info!("Client started");
    }

    /// Stop the timers, flush merged duplicates and post a final batch.
    pub async fn shutdown(&self) {
        self.stop_timers();
        self.duplicates.flush();
        self.queue.process(true).await;
        tracing::info!("Client shut down");
    }

    fn start_settings_refresh(&self) {
        let mut timer = self
            .settings_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if timer.is_some() {
            return;
        }

        let settings: Weak<SettingsManager> = Arc::downgrade(&self.settings);
        let period = self.config.settings_refresh_interval();
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(settings) = settings.upgrade() else {
                    break;
                };
                settings.update_settings().await;
            }
        }));
    }

    fn stop_timers(&self) {
        self.queue.stop();
        self.duplicates.stop();
        if let Some(handle) = self
            .settings_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop_timers();
    }
}

fn open_backends(
    config: &Config,
) -> Result<(Arc<dyn StorageBackend>, Arc<dyn StorageBackend>)> {
    if config.storage.in_memory {
        return Ok((
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
        ));
    }

    let path = config.resolved_storage_path();
    tracing::debug!(path = %path.display(), "Opening storage");
    let db = Arc::new(Database::open(&path)?);
    Ok((
        Arc::new(SqliteBackend::new(db.clone(), QUEUE_NAMESPACE)),
        Arc::new(SqliteBackend::new(db, SETTINGS_NAMESPACE)),
    ))
}

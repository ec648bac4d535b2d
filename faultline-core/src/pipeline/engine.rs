//! Event pipeline framework
//!
//! Plugins enrich or filter one event at a time, in ascending priority order.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         PIPELINE                              │
//! │                                                               │
//! │  defaults(10) → reference_id(20) → error(30) → duplicate(40)  │
//! │       → exclusion(45) → modules(50) → request(70)             │
//! │       → environment(80) → submission_method(100)              │
//! │                                                               │
//! │  ┌─────────────────────────────────────────────────────────┐  │
//! │  │                  Pipeline::run()                        │  │
//! │  │  - Sorts plugins by priority (stable)                   │  │
//! │  │  - Advances a cursor until the context is cancelled     │  │
//! │  │  - Isolates plugin errors and panics                    │  │
//! │  │  - Always calls the completion callback exactly once    │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use faultline_core::pipeline::{Pipeline, PipelineContext};
//!
//! let pipeline = Pipeline::new();
//! pipeline.add_plugin(Arc::new(MyPlugin));
//!
//! let mut ctx = PipelineContext::new(event);
//! pipeline.run(&mut ctx, |ctx| {
//!     if !ctx.cancelled {
//!         queue.enqueue(&ctx.event);
//!     }
//! });
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::types::Event;

// ============================================
// Context
// ============================================

/// An error captured at submission time, with its concrete type name.
#[derive(Clone)]
pub struct CapturedException {
    pub type_name: &'static str,
    pub error: Arc<dyn std::error::Error + Send + Sync>,
}

impl CapturedException {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<E>(),
            error: Arc::new(error),
        }
    }
}

impl std::fmt::Debug for CapturedException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedException")
            .field("type_name", &self.type_name)
            .field("error", &self.error.to_string())
            .finish()
    }
}

/// Side-channel data passed into a pipeline run without touching the event.
#[derive(Debug, Clone, Default)]
pub struct ContextData {
    /// The error being reported, parsed into `@error` by the error plugin
    pub exception: Option<CapturedException>,
    /// Forced submission method tag ("onerror", "unhandledrejection", ...)
    pub submission_method: Option<String>,
    /// Set when the error was not handled by application code
    pub unhandled: bool,
}

impl ContextData {
    pub fn with_exception<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            exception: Some(CapturedException::new(error)),
            ..Default::default()
        }
    }

    pub fn mark_unhandled(mut self, submission_method: Option<&str>) -> Self {
        self.unhandled = true;
        self.submission_method = submission_method.map(str::to_string);
        self
    }
}

/// One event moving through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub event: Event,
    /// Once set, no further plugins run and the event is not queued
    pub cancelled: bool,
    pub data: ContextData,
}

impl PipelineContext {
    pub fn new(event: Event) -> Self {
        Self::with_data(event, ContextData::default())
    }

    pub fn with_data(event: Event, data: ContextData) -> Self {
        Self {
            event,
            cancelled: false,
            data,
        }
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }
}

// ============================================
// Plugin trait
// ============================================

/// A named, prioritised enrichment or filtering stage.
///
/// Plugins run once per event. To stop the pipeline, call
/// [`PipelineContext::cancel`]; returning an error also cancels the event and
/// is logged with the plugin name.
///
/// ## Example
///
/// ```rust,ignore
/// pub struct TagPlugin;
///
/// impl Plugin for TagPlugin {
///     fn name(&self) -> &str { "app.tag" }
///     fn priority(&self) -> i32 { 60 }
///     fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
///         ctx.event.add_tags(["tagged"]);
///         Ok(())
///     }
/// }
/// ```
pub trait Plugin: Send + Sync {
    /// Unique name within a pipeline.
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> i32;

    fn run(&self, ctx: &mut PipelineContext) -> Result<()>;
}

// ============================================
// Pipeline
// ============================================

/// Ordered registry of plugins and the driver that runs them.
#[derive(Default)]
pub struct Pipeline {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Returns `false` (and changes nothing) if a plugin
    /// with the same name is already registered.
    pub fn add_plugin(&self, plugin: Arc<dyn Plugin>) -> bool {
        let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
        if plugins.iter().any(|p| p.name() == plugin.name()) {
            tracing::debug!(plugin = plugin.name(), "Plugin already registered");
            return false;
        }
        tracing::debug!(
            plugin = plugin.name(),
            priority = plugin.priority(),
            "Registered pipeline plugin"
        );
        plugins.push(plugin);
        true
    }

    /// Unregister a plugin by name.
    pub fn remove_plugin(&self, name: &str) -> bool {
        let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
        let before = plugins.len();
        plugins.retain(|p| p.name() != name);
        plugins.len() != before
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|p| p.name() == name)
    }

    /// Plugin names in execution order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.sorted_plugins()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Run every plugin against `ctx`, then `on_complete`.
    ///
    /// Stops at the first plugin that cancels, fails or panics; a failure
    /// marks the context cancelled. `on_complete` runs exactly once either
    /// way, and nothing propagates to the caller.
    pub fn run<F>(&self, ctx: &mut PipelineContext, on_complete: F)
    where
        F: FnOnce(&mut PipelineContext),
    {
        for plugin in self.sorted_plugins() {
            if ctx.cancelled {
                break;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| plugin.run(ctx)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };

            ctx.cancel();
            tracing::error!(
                plugin = plugin.name(),
                error = %failure,
                "Error running plugin, discarding event"
            );
            break;
        }

        on_complete(ctx);
    }

    fn sorted_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let mut plugins = self
            .plugins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        plugins.sort_by_key(|p| p.priority());
        plugins
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "plugin panicked".to_string()
    }
}

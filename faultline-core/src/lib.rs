//! # faultline-core
//!
//! Core library for faultline - a client-side error and event reporting agent.
//!
//! This library provides:
//! - Domain types for events, structured errors and collector settings
//! - An event pipeline with built-in enrichment, deduplication and exclusion
//! - A durable, batched submission queue that honours collector throttling
//! - Remote settings synchronization
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Events flow through three stages:
//! - **Pipeline:** plugins enrich, merge or cancel the event
//! - **Queue:** surviving events are persisted (SQLite or memory)
//! - **Transport:** batches are posted to the collector; the response decides
//!   whether they are removed, retried or dropped
//!
//! The network side is abstracted behind [`Transport`]; see the
//! `faultline-http` crate for the HTTP implementation.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use faultline_core::{Client, Collaborators, Config, Transport};
//!
//! # async fn run(transport: Arc<dyn Transport>) -> faultline_core::Result<()> {
//! let config = Config::load()?;
//! let client = Client::new(config, transport, Collaborators::with_source_chain_parser())?;
//! client.start();
//!
//! client.submit_log(Some("app.startup"), "ready", Some("Info"));
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use client::Client;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{
    Collaborators, ContextData, ErrorParser, Pipeline, PipelineContext, Plugin, SourceChainParser,
};
pub use queue::SubmissionQueue;
pub use settings::SettingsManager;
pub use storage::{Database, MemoryBackend, SqliteBackend, Storage, StorageBackend};
pub use transport::{SettingsResponse, SubmissionResponse, Transport};
pub use types::*;

// Public modules
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod settings;
pub mod storage;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

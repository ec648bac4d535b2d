//! Error types for faultline-core

use thiserror::Error;

/// Main error type for the faultline-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A pipeline plugin failed while processing an event
    #[error("plugin {plugin} failed: {message}")]
    Plugin { plugin: String, message: String },

    /// Transport/collector error
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Build a plugin failure for the named stage.
    pub fn plugin(plugin: &str, message: impl Into<String>) -> Self {
        Error::Plugin {
            plugin: plugin.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for faultline-core
pub type Result<T> = std::result::Result<T, Error>;

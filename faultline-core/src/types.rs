//! Core domain types for faultline
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | A single telemetry record (error, log entry, usage signal, 404, session marker) |
//! | **InnerError** | One level of a structured error; `inner` links to its cause |
//! | **ServerSettings** | A versioned snapshot of collector-issued settings |
//!
//! Events carry an open `data` map. Well-known keys start with `@` and are
//! listed in [`data_keys`]; everything else is an application property.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Well-known event type tags.
pub mod event_types {
    pub const ERROR: &str = "error";
    pub const LOG: &str = "log";
    pub const NOT_FOUND: &str = "404";
    pub const USAGE: &str = "usage";
}

/// Well-known keys inside [`Event::data`].
pub mod data_keys {
    pub const ERROR: &str = "@error";
    pub const LEVEL: &str = "@level";
    pub const SUBMISSION_METHOD: &str = "@submission_method";
    pub const ENVIRONMENT: &str = "@environment";
    pub const REQUEST: &str = "@request";
    pub const MODULES: &str = "@modules";
}

// ============================================
// Event
// ============================================

/// The unit of telemetry.
///
/// Created by application code, mutated by pipeline plugins, and destroyed
/// once delivered or permanently discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Category tag ("error", "log", "usage", "404", "session", ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// Origin of the event (logger name, resource path, feature name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,

    /// Ordered tags, duplicates suppressed by [`Event::add_tags`]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// "lat,lon"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    /// Extended properties
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,

    /// Client-chosen correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,

    /// Merge multiplier set by the duplicate checker
    #[serde(default = "default_count", skip_serializing_if = "is_default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

fn is_default_count(count: &u32) -> bool {
    *count == 1
}

impl Default for Event {
    fn default() -> Self {
        Self {
            event_type: None,
            source: None,
            date: None,
            tags: Vec::new(),
            message: None,
            geo: None,
            value: None,
            data: Map::new(),
            reference_id: None,
            count: default_count(),
        }
    }
}

impl Event {
    /// Create an event of the given type.
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: Some(event_type.to_string()),
            ..Default::default()
        }
    }

    /// Create a log event.
    pub fn log(source: Option<&str>, message: &str, level: Option<&str>) -> Self {
        let mut event = Self::new(event_types::LOG);
        event.source = source.map(str::to_string);
        event.message = Some(message.to_string());
        if let Some(level) = level {
            event.set_level(level);
        }
        event
    }

    /// Event type, or "" when unset.
    pub fn type_str(&self) -> &str {
        self.event_type.as_deref().unwrap_or("")
    }

    /// Source, or "" when unset.
    pub fn source_str(&self) -> &str {
        self.source.as_deref().unwrap_or("")
    }

    /// Append tags, skipping empty strings and tags already present.
    pub fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            let tag = tag.as_ref().trim();
            if tag.is_empty() || self.tags.iter().any(|t| t == tag) {
                continue;
            }
            self.tags.push(tag.to_string());
        }
    }

    /// Set an extended property, replacing any existing value.
    pub fn set_property(&mut self, name: &str, value: Value) {
        self.data.insert(name.to_string(), value);
    }

    /// The log level stored under `@level`, if any.
    pub fn level(&self) -> Option<&str> {
        self.data.get(data_keys::LEVEL).and_then(Value::as_str)
    }

    pub fn set_level(&mut self, level: &str) {
        self.set_property(data_keys::LEVEL, Value::String(level.to_string()));
    }

    /// Structured error stored under `@error`.
    ///
    /// Returns `None` when absent or when the stored value does not have the
    /// expected shape.
    pub fn error(&self) -> Option<InnerError> {
        self.data
            .get(data_keys::ERROR)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_error(&mut self, error: &InnerError) -> crate::Result<()> {
        let value = serde_json::to_value(error)?;
        self.set_property(data_keys::ERROR, value);
        Ok(())
    }
}

// ============================================
// Errors
// ============================================

/// One level of a structured error; `inner` is the cause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InnerError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Error type name (e.g. "std::io::Error")
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Parsed stack frames, kept as opaque JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner: Option<Box<InnerError>>,
}

impl InnerError {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            error_type: Some(error_type.to_string()),
            ..Default::default()
        }
    }

    /// Attach a cause, returning the outer error.
    pub fn with_inner(mut self, inner: InnerError) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Iterate this error and every cause, outermost first.
    pub fn chain(&self) -> ErrorChain<'_> {
        ErrorChain { next: Some(self) }
    }
}

/// Iterator over an [`InnerError`] cause chain.
pub struct ErrorChain<'a> {
    next: Option<&'a InnerError>,
}

impl<'a> Iterator for ErrorChain<'a> {
    type Item = &'a InnerError;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.inner.as_deref();
        Some(current)
    }
}

// ============================================
// Server settings
// ============================================

/// Versioned settings snapshot issued by the collector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub version: i64,
    pub settings: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_tags_suppresses_duplicates() {
        let mut event = Event::new(event_types::LOG);
        event.add_tags(["a", "b", "a", "", " b "]);
        event.add_tags(vec!["c".to_string(), "a".to_string()]);
        assert_eq!(event.tags, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_event_serializes_type_and_omits_default_count() {
        let mut event = Event::log(Some("app"), "hello", Some("Info"));
        event.reference_id = Some("ref".to_string());

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "log");
        assert_eq!(value["source"], "app");
        assert_eq!(value["data"]["@level"], "Info");
        assert!(value.get("count").is_none());

        event.count = 3;
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn test_event_deserialize_defaults_count() {
        let event: Event = serde_json::from_value(json!({"type": "usage"})).unwrap();
        assert_eq!(event.count, 1);
        assert_eq!(event.type_str(), "usage");
        assert!(event.data.is_empty());
    }

    #[test]
    fn test_error_round_trips_through_data() {
        let error = InnerError::new("Outer", "outer failed")
            .with_inner(InnerError::new("Inner", "inner failed"));
        let mut event = Event::new(event_types::ERROR);
        event.set_error(&error).unwrap();

        let stored = event.error().unwrap();
        assert_eq!(stored, error);
        assert_eq!(event.data["@error"]["inner"]["type"], "Inner");
    }

    #[test]
    fn test_error_chain_walks_causes() {
        let error = InnerError::new("A", "a")
            .with_inner(InnerError::new("B", "b").with_inner(InnerError::new("C", "c")));
        let types: Vec<_> = error
            .chain()
            .filter_map(|e| e.error_type.as_deref())
            .collect();
        assert_eq!(types, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_malformed_error_is_ignored() {
        let mut event = Event::new(event_types::ERROR);
        event.set_property(data_keys::ERROR, json!("not an object"));
        assert!(event.error().is_none());
    }
}

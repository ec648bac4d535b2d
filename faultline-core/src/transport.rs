//! Transport collaborator contract
//!
//! The core never talks to the network itself. A [`Transport`] posts event
//! batches and fetches settings; the submission queue decides what to do with
//! the status it reports.

use async_trait::async_trait;

use crate::types::{Event, ServerSettings};

/// Status code used when a request never produced an HTTP response.
pub const STATUS_NO_RESPONSE: u16 = 0;

/// Outcome of posting a batch of events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResponse {
    pub status_code: u16,
    pub message: Option<String>,
    /// Settings version advertised by the collector, if any
    pub settings_version: Option<i64>,
}

impl SubmissionResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            message: None,
            settings_version: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_settings_version(mut self, version: i64) -> Self {
        self.settings_version = Some(version);
        self
    }

    /// A request that failed before the collector answered.
    pub fn no_response(message: impl Into<String>) -> Self {
        Self::new(STATUS_NO_RESPONSE).with_message(message)
    }

    pub fn success(&self) -> bool {
        (200..=299).contains(&self.status_code)
    }

    pub fn bad_request(&self) -> bool {
        self.status_code == 400
    }

    pub fn service_unavailable(&self) -> bool {
        self.status_code == 503
    }

    pub fn payment_required(&self) -> bool {
        self.status_code == 402
    }

    pub fn unable_to_authenticate(&self) -> bool {
        self.status_code == 401 || self.status_code == 403
    }

    pub fn not_found(&self) -> bool {
        self.status_code == 404
    }

    pub fn request_entity_too_large(&self) -> bool {
        self.status_code == 413
    }
}

/// Outcome of fetching settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsResponse {
    pub success: bool,
    pub settings: Option<ServerSettings>,
    pub message: Option<String>,
}

impl SettingsResponse {
    pub fn ok(settings: ServerSettings) -> Self {
        Self {
            success: true,
            settings: Some(settings),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            settings: None,
            message: Some(message.into()),
        }
    }
}

/// Delivers events to and fetches settings from the collector.
///
/// Implementations own their timeouts and must resolve every call exactly
/// once; failures are reported through the response, never by panicking.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post a batch of events. `is_app_exiting` lets implementations pick a
    /// faster, best-effort path during shutdown.
    async fn post_events(&self, events: &[Event], is_app_exiting: bool) -> SubmissionResponse;

    /// Fetch the settings snapshot newer than `since_version`.
    async fn get_settings(&self, since_version: i64) -> SettingsResponse;
}

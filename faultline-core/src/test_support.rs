//! Shared fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::transport::{SettingsResponse, SubmissionResponse, Transport};
use crate::types::{Event, ServerSettings};

pub(crate) const TEST_API_KEY: &str = "LhhP1C9gijpSKCslHHCvwdSIz298twx271nTest";

pub(crate) fn server_settings(version: i64, pairs: &[(&str, &str)]) -> ServerSettings {
    ServerSettings {
        version,
        settings: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
    }
}

/// Transport that records every call and answers from scripted queues.
///
/// Unscripted event posts succeed with 202; unscripted settings fetches fail.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    responses: Mutex<VecDeque<SubmissionResponse>>,
    posted: Mutex<Vec<Vec<Event>>>,
    exiting_flags: Mutex<Vec<bool>>,
    settings: Mutex<VecDeque<SettingsResponse>>,
    settings_requests: Mutex<Vec<i64>>,
    gate: Option<Arc<Notify>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hold every transport call until [`open_gate`](Self::open_gate).
    pub(crate) fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub(crate) fn push_response(&self, response: SubmissionResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn push_status(&self, status: u16) {
        self.push_response(SubmissionResponse::new(status));
    }

    pub(crate) fn push_settings(&self, response: SettingsResponse) {
        self.settings.lock().unwrap().push_back(response);
    }

    pub(crate) fn posted(&self) -> Vec<Vec<Event>> {
        self.posted.lock().unwrap().clone()
    }

    pub(crate) fn exiting_flags(&self) -> Vec<bool> {
        self.exiting_flags.lock().unwrap().clone()
    }

    pub(crate) fn settings_requests(&self) -> Vec<i64> {
        self.settings_requests.lock().unwrap().clone()
    }

    async fn wait_for_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn post_events(&self, events: &[Event], is_app_exiting: bool) -> SubmissionResponse {
        self.posted.lock().unwrap().push(events.to_vec());
        self.exiting_flags.lock().unwrap().push(is_app_exiting);
        self.wait_for_gate().await;
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| SubmissionResponse::new(202))
    }

    async fn get_settings(&self, since_version: i64) -> SettingsResponse {
        self.settings_requests.lock().unwrap().push(since_version);
        self.wait_for_gate().await;
        self.settings
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| SettingsResponse::failed("no settings scripted"))
    }
}

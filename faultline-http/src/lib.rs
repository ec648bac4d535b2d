//! HTTP transport for the faultline collector API
//!
//! Implements [`Transport`] over `reqwest`:
//!
//! - `POST {server_url}/api/v2/events` with a JSON array of events
//! - `GET {server_url}/api/v2/projects/config?v={version}` for settings
//!
//! Both requests authenticate with `Authorization: Bearer {api_key}`. The
//! collector advertises its current settings version in the
//! [`CONFIG_VERSION_HEADER`] response header.
//!
//! Failures never surface as errors: a request that produced no response is
//! reported with [`STATUS_NO_RESPONSE`](faultline_core::transport::STATUS_NO_RESPONSE)
//! and the queue decides what to do with it.

use std::time::Duration;

use async_trait::async_trait;
use faultline_core::{
    Config, Error, Event, Result, ServerSettings, SettingsResponse, SubmissionResponse, Transport,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};

/// Response header carrying the collector's settings version.
pub const CONFIG_VERSION_HEADER: &str = "X-Faultline-ConfigVersion";

/// Upper bound on the request timeout while the host is shutting down.
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the collector API
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport from configuration
    ///
    /// Returns an error if the API key cannot be used as a header value or
    /// the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config.server_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("server_url is required".to_string()));
        }

        // Build default headers
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("faultline-rust/", env!("CARGO_PKG_VERSION"))),
        );

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let timeout = Duration::from_secs(config.transport.timeout_secs.max(1));
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn events_url(&self) -> String {
        format!("{}/api/v2/events", self.base_url)
    }

    fn settings_url(&self) -> String {
        format!("{}/api/v2/projects/config", self.base_url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_events(&self, events: &[Event], is_app_exiting: bool) -> SubmissionResponse {
        let timeout = if is_app_exiting {
            self.timeout.min(EXIT_TIMEOUT)
        } else {
            self.timeout
        };

        let response = match self
            .http_client
            .post(self.events_url())
            .timeout(timeout)
            .json(events)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, count = events.len(), "HTTP request failed");
                return SubmissionResponse::no_response(format!("HTTP request failed: {}", e));
            }
        };

        let status = response.status();
        let settings_version = config_version(response.headers());

        let mut result = SubmissionResponse::new(status.as_u16());
        if let Some(version) = settings_version {
            result = result.with_settings_version(version);
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            tracing::debug!(status = status.as_u16(), body = %error_text, "Collector rejected events");
            result = result.with_message(format!("API error ({}): {}", status, error_text));
        }

        result
    }

    async fn get_settings(&self, since_version: i64) -> SettingsResponse {
        let response = match self
            .http_client
            .get(self.settings_url())
            .query(&[("v", since_version)])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "HTTP request failed");
                return SettingsResponse::failed(format!("HTTP request failed: {}", e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return SettingsResponse::failed(format!("API error ({}): {}", status, error_text));
        }

        match response.json::<ServerSettings>().await {
            Ok(settings) => SettingsResponse::ok(settings),
            Err(e) => SettingsResponse::failed(format!("failed to parse response: {}", e)),
        }
    }
}

fn config_version(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(CONFIG_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

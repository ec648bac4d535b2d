//! Remote settings synchronizer
//!
//! Keeps the merged settings view used by the exclusion filter: local
//! settings from [`Config::settings`] overlaid by the latest collector
//! snapshot. The snapshot is persisted in the `settings` store so a restart
//! starts from the last known version instead of from scratch.
//!
//! Refreshes are single-flight: a call made while another refresh is
//! outstanding returns immediately without queueing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::storage::Storage;
use crate::transport::Transport;
use crate::types::ServerSettings;

/// Callback invoked with the merged settings after every change.
pub type SettingsChangedHandler = Box<dyn Fn(&HashMap<String, String>) + Send + Sync>;

/// Fetches, merges and persists collector settings.
pub struct SettingsManager {
    enabled: bool,
    api_key_valid: bool,
    local: HashMap<String, String>,
    current: RwLock<HashMap<String, String>>,
    storage: Storage<ServerSettings>,
    transport: Arc<dyn Transport>,
    updating: AtomicBool,
    handlers: RwLock<Vec<SettingsChangedHandler>>,
}

/// Clears the single-flight flag even if the refresh future is dropped.
struct UpdatingGuard<'a>(&'a AtomicBool);

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SettingsManager {
    pub fn new(
        config: &Config,
        storage: Storage<ServerSettings>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            api_key_valid: config.is_valid(),
            local: config.settings.clone(),
            current: RwLock::new(config.settings.clone()),
            storage,
            transport,
            updating: AtomicBool::new(false),
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Merge the persisted snapshot (if any) into the current settings.
    pub fn apply_saved_server_settings(&self) {
        let Some(saved) = self.saved_server_settings() else {
            return;
        };

        tracing::info!(version = saved.version, "Applying saved settings");
        {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            current.extend(saved.settings);
        }
        self.notify_changed();
    }

    /// The persisted snapshot, if one exists and is well formed.
    pub fn saved_server_settings(&self) -> Option<ServerSettings> {
        self.storage
            .get(Some(1))
            .into_iter()
            .next()
            .map(|item| item.value)
    }

    /// Version of the persisted snapshot, 0 when none.
    pub fn version(&self) -> i64 {
        self.saved_server_settings()
            .map(|s| s.version)
            .unwrap_or(0)
    }

    /// Refresh when the collector advertises a newer version.
    pub async fn check_version(&self, version: i64) -> bool {
        let current_version = self.version();
        if version <= current_version {
            return false;
        }

        tracing::info!(
            from = current_version,
            to = version,
            "Updating settings"
        );
        self.update_settings().await
    }

    /// Fetch settings from the collector and apply them.
    ///
    /// Returns `true` when a new snapshot was applied.
    pub async fn update_settings(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.updating.swap(true, Ordering::SeqCst) {
            tracing::debug!("Settings update already in progress, skipping");
            return false;
        }
        let _guard = UpdatingGuard(&self.updating);

        if !self.api_key_valid {
            tracing::error!("Unable to update settings: API key is not set");
            return false;
        }

        let version = self.version();
        tracing::info!(version, "Checking for updated settings");

        let response = self.transport.get_settings(version).await;
        let settings = match response.settings {
            Some(settings) if response.success => settings,
            _ => {
                tracing::warn!(
                    reason = response.message.as_deref().unwrap_or("no settings returned"),
                    "Unable to update settings"
                );
                return false;
            }
        };

        if settings.version < version {
            tracing::warn!(
                current = version,
                received = settings.version,
                "Ignoring settings older than the cached version"
            );
            return false;
        }

        self.apply_server_settings(settings);
        true
    }

    /// Look up a merged setting.
    pub fn get(&self, key: &str) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Copy of the merged settings.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Forget the server snapshot and fall back to local settings.
    pub fn reset(&self) {
        self.storage.clear();
        {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            *current = self.local.clone();
        }
        tracing::info!("Reset settings to local defaults");
        self.notify_changed();
    }

    /// Register a callback for settings changes.
    pub fn on_changed<F>(&self, handler: F)
    where
        F: Fn(&HashMap<String, String>) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(handler));
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    fn apply_server_settings(&self, settings: ServerSettings) {
        let previous = self.saved_server_settings();

        {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            for (key, value) in &settings.settings {
                current.insert(key.clone(), value.clone());
            }

            // Keys the collector dropped revert to their local value, if any
            if let Some(previous) = previous {
                for key in previous.settings.keys() {
                    if settings.settings.contains_key(key) {
                        continue;
                    }
                    match self.local.get(key) {
                        Some(local) => current.insert(key.clone(), local.clone()),
                        None => current.remove(key),
                    };
                }
            }
        }

        if self.storage.save(&settings).is_none() {
            tracing::error!(version = settings.version, "Failed to persist settings");
        }
        tracing::info!(version = settings.version, "Updated settings");
        self.notify_changed();
    }

    fn notify_changed(&self) {
        let snapshot = self.snapshot();
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        for handler in handlers.iter() {
            handler(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryBackend;
    use crate::test_support::{server_settings, RecordingTransport, TEST_API_KEY};
    use crate::transport::SettingsResponse;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    fn settings_store(backend: Arc<MemoryBackend>) -> Storage<ServerSettings> {
        Storage::new(
            "settings",
            backend,
            1,
            Arc::new(ManualClock::new(Utc::now())),
        )
    }

    fn manager_with(
        config: &Config,
        transport: Arc<RecordingTransport>,
        backend: Arc<MemoryBackend>,
    ) -> SettingsManager {
        SettingsManager::new(config, settings_store(backend), transport)
    }

    #[tokio::test]
    async fn test_update_merges_over_local_settings() {
        let mut config = Config::with_api_key(TEST_API_KEY);
        config.settings.insert("local".to_string(), "1".to_string());
        config.settings.insert("shared".to_string(), "local".to_string());

        let transport = Arc::new(RecordingTransport::new());
        transport.push_settings(SettingsResponse::ok(server_settings(
            3,
            &[("shared", "server"), ("@@log:*", "Info")],
        )));

        let manager = manager_with(&config, transport.clone(), Arc::new(MemoryBackend::new()));
        assert!(manager.update_settings().await);

        assert_eq!(manager.get("local").as_deref(), Some("1"));
        assert_eq!(manager.get("shared").as_deref(), Some("server"));
        assert_eq!(manager.get("@@log:*").as_deref(), Some("Info"));
        assert_eq!(manager.version(), 3);
        assert_eq!(transport.settings_requests(), vec![0]);
    }

    #[tokio::test]
    async fn test_update_removes_keys_dropped_by_server() {
        let mut config = Config::with_api_key(TEST_API_KEY);
        config.settings.insert("restored".to_string(), "local".to_string());

        let transport = Arc::new(RecordingTransport::new());
        transport.push_settings(SettingsResponse::ok(server_settings(
            1,
            &[("stale", "x"), ("restored", "server"), ("kept", "y")],
        )));
        transport.push_settings(SettingsResponse::ok(server_settings(2, &[("kept", "z")])));

        let manager = manager_with(&config, transport.clone(), Arc::new(MemoryBackend::new()));
        assert!(manager.update_settings().await);
        assert!(manager.update_settings().await);

        assert_eq!(manager.get("stale"), None);
        assert_eq!(manager.get("restored").as_deref(), Some("local"));
        assert_eq!(manager.get("kept").as_deref(), Some("z"));
        assert_eq!(transport.settings_requests(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_settings_untouched() {
        let mut config = Config::with_api_key(TEST_API_KEY);
        config.settings.insert("a".to_string(), "1".to_string());

        let transport = Arc::new(RecordingTransport::new());
        transport.push_settings(SettingsResponse::failed("collector down"));

        let manager = manager_with(&config, transport, Arc::new(MemoryBackend::new()));
        assert!(!manager.update_settings().await);
        assert_eq!(manager.snapshot().len(), 1);
        assert_eq!(manager.version(), 0);
        assert!(!manager.is_updating());
    }

    #[tokio::test]
    async fn test_invalid_api_key_skips_fetch() {
        let transport = Arc::new(RecordingTransport::new());
        let manager = manager_with(
            &Config::default(),
            transport.clone(),
            Arc::new(MemoryBackend::new()),
        );
        assert!(!manager.update_settings().await);
        assert!(transport.settings_requests().is_empty());
        assert!(!manager.is_updating());
    }

    #[tokio::test]
    async fn test_check_version_only_refreshes_when_newer() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_settings(SettingsResponse::ok(server_settings(5, &[("a", "b")])));

        let manager = manager_with(
            &Config::with_api_key(TEST_API_KEY),
            transport.clone(),
            Arc::new(MemoryBackend::new()),
        );
        assert!(!manager.check_version(0).await);
        assert!(manager.check_version(5).await);
        assert!(!manager.check_version(5).await);
        assert!(!manager.check_version(4).await);
        assert_eq!(transport.settings_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_older_snapshot_is_ignored() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_settings(SettingsResponse::ok(server_settings(5, &[("a", "new")])));
        transport.push_settings(SettingsResponse::ok(server_settings(2, &[("a", "old")])));

        let manager = manager_with(
            &Config::with_api_key(TEST_API_KEY),
            transport,
            Arc::new(MemoryBackend::new()),
        );
        assert!(manager.update_settings().await);
        assert!(!manager.update_settings().await);
        assert_eq!(manager.get("a").as_deref(), Some("new"));
        assert_eq!(manager.version(), 5);
    }

    #[tokio::test]
    async fn test_saved_settings_survive_restart_and_reset() {
        let backend = Arc::new(MemoryBackend::new());
        let config = Config::with_api_key(TEST_API_KEY);

        let transport = Arc::new(RecordingTransport::new());
        transport.push_settings(SettingsResponse::ok(server_settings(7, &[("@@404:*", "false")])));
        let first = manager_with(&config, transport, backend.clone());
        assert!(first.update_settings().await);

        let second = manager_with(&config, Arc::new(RecordingTransport::new()), backend);
        assert_eq!(second.get("@@404:*"), None);
        second.apply_saved_server_settings();
        assert_eq!(second.get("@@404:*").as_deref(), Some("false"));
        assert_eq!(second.version(), 7);

        second.reset();
        assert_eq!(second.get("@@404:*"), None);
        assert_eq!(second.version(), 0);
    }

    #[tokio::test]
    async fn test_changed_handlers_are_notified() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_settings(SettingsResponse::ok(server_settings(1, &[("a", "b")])));
        let manager = manager_with(
            &Config::with_api_key(TEST_API_KEY),
            transport,
            Arc::new(MemoryBackend::new()),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        manager.on_changed(move |settings| {
            assert_eq!(settings.get("a").map(String::as_str), Some("b"));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        manager.update_settings().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_update_is_single_flight() {
        let transport = Arc::new(RecordingTransport::new().gated());
        transport.push_settings(SettingsResponse::ok(server_settings(1, &[("a", "b")])));
        let manager = Arc::new(manager_with(
            &Config::with_api_key(TEST_API_KEY),
            transport.clone(),
            Arc::new(MemoryBackend::new()),
        ));

        let in_flight = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.update_settings().await })
        };
        while transport.settings_requests().is_empty() {
            tokio::task::yield_now().await;
        }

        assert!(manager.is_updating());
        assert!(!manager.update_settings().await);

        transport.open_gate();
        assert!(in_flight.await.unwrap());
        assert_eq!(transport.settings_requests().len(), 1);
        assert!(!manager.is_updating());
    }
}

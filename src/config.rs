//! Configuration Management
//!
//! Provider-level settings for azmon, persisted as JSON under the user's
//! config directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::azure::DEFAULT_ENDPOINT;
use crate::reconciler::{ReconcileOptions, Timeouts, WaitPolicy};

/// Environment variable consulted when no token is configured
pub const TOKEN_ENV_VAR: &str = "AZURE_ACCESS_TOKEN";

/// Per-operation deadlines, in minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub create_minutes: u64,
    pub read_minutes: u64,
    pub update_minutes: u64,
    pub delete_minutes: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            create_minutes: 30,
            read_minutes: 5,
            update_minutes: 30,
            delete_minutes: 30,
        }
    }
}

/// Consistency wait debounce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSettings {
    pub required_hits: u32,
    pub interval_seconds: u64,
}

impl WaitSettings {
    fn to_policy(self) -> WaitPolicy {
        WaitPolicy {
            required_hits: self.required_hits,
            min_interval: Duration::from_secs(self.interval_seconds),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_create_wait() -> WaitSettings {
    WaitSettings {
        required_hits: 2,
        interval_seconds: 15,
    }
}

fn default_delete_wait() -> WaitSettings {
    WaitSettings {
        required_hits: 5,
        interval_seconds: 15,
    }
}

/// User configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Subscription new resources are created in
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Management endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bearer token; falls back to `AZURE_ACCESS_TOKEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_true")]
    pub import_protection: bool,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default = "default_create_wait")]
    pub create_wait: WaitSettings,
    #[serde(default = "default_delete_wait")]
    pub delete_wait: WaitSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            subscription_id: None,
            endpoint: default_endpoint(),
            access_token: None,
            import_protection: true,
            timeouts: TimeoutSettings::default(),
            create_wait: default_create_wait(),
            delete_wait: default_delete_wait(),
        }
    }
}

impl Settings {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("azmon").join("config.json"))
    }

    /// Load settings from disk; a missing or unreadable file yields defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!("Ignoring settings file {:?}: {:#}", path, err);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Token from settings, then the environment
    pub fn effective_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()))
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        ReconcileOptions {
            timeouts: Timeouts {
                create: minutes(self.timeouts.create_minutes),
                read: minutes(self.timeouts.read_minutes),
                update: minutes(self.timeouts.update_minutes),
                delete: minutes(self.timeouts.delete_minutes),
            },
            create_wait: self.create_wait.to_policy(),
            delete_wait: self.delete_wait.to_policy(),
            import_protection: self.import_protection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reconciler_defaults() {
        assert_eq!(Settings::default().reconcile_options(), ReconcileOptions::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"subscription_id": "sub-1", "timeouts": {"read_minutes": 1}}"#)
                .unwrap();
        assert_eq!(settings.subscription_id.as_deref(), Some("sub-1"));
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert!(settings.import_protection);

        let options = settings.reconcile_options();
        assert_eq!(options.timeouts.read, Duration::from_secs(60));
        assert_eq!(options.timeouts.create, Duration::from_secs(30 * 60));
        assert_eq!(options.delete_wait.required_hits, 5);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("azmon-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let settings = Settings {
            subscription_id: Some("sub-1".to_string()),
            import_protection: false,
            ..Default::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_configured_token_wins() {
        let settings = Settings {
            access_token: Some("from-file".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.effective_token().as_deref(), Some("from-file"));
    }
}

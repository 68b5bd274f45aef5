//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, timeouts, renewal cooldown, the public endpoint table and the
//! route tables used for realm-aware redirects.
//!
//! Configuration is stored at `~/.config/gigpass/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::routes::RouteTable;

/// Application name used for config directory paths
const APP_NAME: &str = "gigpass";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`
pub const API_URL_ENV: &str = "GIGPASS_API_URL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// General requests fail after 15 seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Uploads get longer since bodies can be large.
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 60;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// After a failed renewal, further attempts are refused for this long.
const DEFAULT_REFRESH_COOLDOWN_MS: u64 = 5_000;

/// Delay between the expiry notice and the redirect to login.
const DEFAULT_EXPIRY_REDIRECT_DELAY_MS: u64 = 1_500;

/// Token endpoint paths, relative to `api_base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub token: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            token: "/token/".to_string(),
            refresh: "/token/refresh/".to_string(),
            logout: "/token/logout/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub refresh_cooldown_ms: u64,
    pub expiry_redirect_delay_ms: u64,
    pub endpoints: Endpoints,
    /// API paths where 401/403 is a business answer rather than session
    /// expiry. Requests to these never carry a bearer header and never
    /// trigger renewal. Entries match exactly unless they end in `*`.
    pub anonymous_endpoints: Vec<String>,
    pub routes: RouteTable,
}

impl Default for Config {
    fn default() -> Self {
        let endpoints = Endpoints::default();
        let anonymous_endpoints = vec![
            endpoints.token.clone(),
            endpoints.refresh.clone(),
            "/users/register/".to_string(),
            "/companies/register/".to_string(),
            "/users/check-email/".to_string(),
            "/password-reset/*".to_string(),
            "/health/".to_string(),
        ];
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            upload_timeout_secs: DEFAULT_UPLOAD_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            refresh_cooldown_ms: DEFAULT_REFRESH_COOLDOWN_MS,
            expiry_redirect_delay_ms: DEFAULT_EXPIRY_REDIRECT_DELAY_MS,
            endpoints,
            anonymous_endpoints,
            routes: RouteTable::default(),
        }
    }
}

impl Config {
    /// Defaults pointed at a specific API base URL.
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path, falling back to defaults when absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn refresh_cooldown(&self) -> Duration {
        Duration::from_millis(self.refresh_cooldown_ms)
    }

    pub fn expiry_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.expiry_redirect_delay_ms)
    }

    /// Absolute URL for an API path. Absolute URLs pass through untouched.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.api_base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

//! Client configuration.
//!
//! Loaded from `~/.config/habitkit/config.json` when present, otherwise the
//! defaults below. A few fields can be overridden from the environment
//! (see [`Config::apply_env`]); the CLI loads `.env` before doing so.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::ExemptionRegistry;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "habitkit";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

const DEFAULT_BASE_URL: &str = "https://api.habitkit.app";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Refresh call timeout in seconds. Kept shorter than the request timeout
/// so a stuck refresh releases queued requests promptly.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub sign_in: String,
    pub sign_up: String,
    pub email_check: String,
    pub nickname_check: String,
    pub refresh: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            sign_in: "/users/sign-in".to_string(),
            sign_up: "/users/sign-up".to_string(),
            email_check: "/users/email/duplicate".to_string(),
            nickname_check: "/users/nickname/duplicate".to_string(),
            refresh: "/auth/refresh".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub endpoints: Endpoints,
    /// Extra path fragments that must never carry an access token
    pub extra_exempt: Vec<String>,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            endpoints: Endpoints::default(),
            extra_exempt: Vec::new(),
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&contents)
        } else {
            Ok(Self::default())
        }
    }

    fn parse(contents: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(contents).context("Failed to parse config file")?;
        config.validate().context("Invalid config file")?;
        Ok(config)
    }

    /// A zero timeout would fail every request, and every refresh with it
    fn validate(&self) -> Result<()> {
        ensure!(self.request_timeout_secs > 0, "request timeout must be at least one second");
        ensure!(self.refresh_timeout_secs > 0, "refresh timeout must be at least one second");
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `HABITKIT_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("HABITKIT_BASE_URL") {
            self.base_url = url;
        }
        if let Some(secs) = lookup("HABITKIT_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs
                .parse()
                .context("HABITKIT_REQUEST_TIMEOUT_SECS must be a whole number of seconds")?;
        }
        if let Some(secs) = lookup("HABITKIT_REFRESH_TIMEOUT_SECS") {
            self.refresh_timeout_secs = secs
                .parse()
                .context("HABITKIT_REFRESH_TIMEOUT_SECS must be a whole number of seconds")?;
        }
        self.validate().context("Invalid HABITKIT_* override")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Endpoints sent without credentials: the auth endpoints plus any extras
    pub fn exemptions(&self) -> ExemptionRegistry {
        let e = &self.endpoints;
        let listed = [&e.sign_in, &e.sign_up, &e.email_check, &e.nickname_check]
            .into_iter()
            .cloned()
            .chain(self.extra_exempt.iter().cloned());
        ExemptionRegistry::new(&e.refresh, listed)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn session_path(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(SESSION_FILE))
    }
}

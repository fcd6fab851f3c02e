//! Configuration management with secure storage
//!
//! Handles:
//! - iLevel account (password from file, env or OS keyring)
//! - Poll timing (retry, refresh, request timeout)
//! - MQTT broker settings for the local inventory
//! - Cross-platform storage

use crate::poller::{PollSettings, INITIAL_DELAY};
use crate::session::{Credentials, DEFAULT_BASE_URL};
use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const KEYRING_SERVICE: &str = "ilevel-agent";
const KEYRING_USER: &str = "account-password";
pub const CONFIG_ENV: &str = "ILEVEL_AGENT_CONFIG";

/// Upper bounds for the poll timing settings (one week, five minutes)
pub const MAX_DELAY_MINUTES: u64 = 7 * 24 * 60;
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub account: AccountConfig,
    pub ilevel: IlevelConfig,
    pub mqtt: MqttConfig,
    pub agent: AgentInfo,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub username: Option<String>,
    #[serde(skip_serializing)] // Never write passwords back
    pub password: Option<String>,
    pub store_credentials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IlevelConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub retry_minutes: u64,
    pub refresh_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u16,
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentInfo {
    pub agent_id: String,
    pub version: String,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("store_credentials", &self.store_credentials)
            .finish()
    }
}

impl Default for IlevelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 10,
            retry_minutes: 10,
            refresh_minutes: 30,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: None,
            keep_alive_secs: 30,
            topic_prefix: "symbion/ilevel".to_string(),
        }
    }
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            agent_id: uuid::Uuid::new_v4().simple().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AgentConfig {
    /// Load config from `$ILEVEL_AGENT_CONFIG` or the OS-specific location
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("Invalid config file {}", config_path.display()))?
        } else {
            // No file: defaults, credentials must then come from env or keyring
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
            .validate()
            .with_context(|| format!("Invalid settings in {}", config_path.display()))?;

        // Load password from secure keyring if enabled
        if config.account.store_credentials && config.account.password.is_none() {
            config.account.password = Self::load_password().ok();
        }

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `ILEVEL_USERNAME` / `ILEVEL_PASSWORD` win over the file
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(username) = lookup("ILEVEL_USERNAME") {
            self.account.username = Some(username);
        }
        if let Some(password) = lookup("ILEVEL_PASSWORD") {
            self.account.password = Some(password);
        }
    }

    /// Zero delays would hammer the dashboard; huge ones overflow timers
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("ilevel.retry_minutes", self.ilevel.retry_minutes, MAX_DELAY_MINUTES),
            ("ilevel.refresh_minutes", self.ilevel.refresh_minutes, MAX_DELAY_MINUTES),
            (
                "ilevel.request_timeout_secs",
                self.ilevel.request_timeout_secs,
                MAX_REQUEST_TIMEOUT_SECS,
            ),
        ];

        for (key, value, max) in checks {
            if value == 0 {
                anyhow::bail!("{} must be greater than 0", key);
            }
            if value > max {
                anyhow::bail!("{} must be at most {} (got {})", key, max, value);
            }
        }
        Ok(())
    }

    pub fn config_file_path() -> Result<PathBuf> {
        Self::resolve_config_path(std::env::var(CONFIG_ENV).ok(), dirs::config_dir())
    }

    fn resolve_config_path(env_path: Option<String>, config_dir: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = env_path {
            return Ok(PathBuf::from(path));
        }

        let mut path = config_dir.ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("ilevel-agent");
        path.push("config.toml");
        Ok(path)
    }

    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.account.username, &self.account.password) {
            (Some(username), Some(password)) if !username.is_empty() => {
                Ok(Credentials::new(username.clone(), password.clone()))
            }
            _ => anyhow::bail!("account.username or account.password not set in iLevel agent config"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.ilevel.request_timeout_secs.min(MAX_REQUEST_TIMEOUT_SECS))
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            retry_delay: minutes(self.ilevel.retry_minutes),
            refresh_interval: minutes(self.ilevel.refresh_minutes),
            initial_delay: INITIAL_DELAY,
        }
    }

    pub fn mqtt_client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("ilevel-agent-{}", self.agent.agent_id))
    }

    /// Load password from secure OS keyring
    fn load_password() -> Result<String> {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
        entry.get_password().map_err(Into::into)
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.min(MAX_DELAY_MINUTES) * 60)
}

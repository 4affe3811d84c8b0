//! Configuration system for the ECOS gateway
//!
//! Configuration is read from a TOML file and then adjusted by a small set of
//! environment overrides. Credentials never live in the file: the config only
//! names the environment variables that hold them.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Main gateway configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub hardware: HardwareSection,
    #[serde(default)]
    pub saas: SaasSection,
}

/// HTTP server section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub environment: Environment,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: Environment::default(),
        }
    }
}

/// Deployment environment; production refuses to start without a signing secret
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Token signing section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSection {
    /// Environment variable containing the HMAC signing secret
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    /// Token lifetime in hours
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            secret_env: default_secret_env(),
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// The gateway only talks to a broker when this is set
    #[serde(default)]
    pub enabled: bool,
    /// MQTT broker URL with protocol and port
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long startup waits for the first ConnAck before serving without MQTT
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Reconnection attempts before giving up (unset = retry forever)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_url: default_broker_url(),
            client_id: default_client_id(),
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            max_reconnect_attempts: None,
        }
    }
}

/// Hardware scaffolding section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HardwareSection {
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
}

impl Default for HardwareSection {
    fn default() -> Self {
        Self {
            manifest_path: default_manifest_path(),
        }
    }
}

/// SaaS tier section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaasSection {
    /// Environment variable that may carry a JSON object of tier overrides
    #[serde(default = "default_tiers_env")]
    pub tiers_env: String,
}

impl Default for SaasSection {
    fn default() -> Self {
        Self {
            tiers_env: default_tiers_env(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_secret_env() -> String {
    "ECOS_JWT_SECRET".to_string()
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_client_id() -> String {
    "ecos-gateway".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_manifest_path() -> String {
    "config/hardware-manifests.json".to_string()
}

fn default_tiers_env() -> String {
    "SAAS_TIERS_JSON".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Source of environment values, injectable so overrides can be tested
/// without mutating the process environment.
pub trait EnvSource {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads from the real process environment
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<F> EnvSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        self(name)
    }
}

impl GatewayConfig {
    /// Load configuration from TOML file, apply environment overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text, apply environment overrides and validate
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: GatewayConfig = toml::from_str(content)?;
        config.apply_env_overrides(&ProcessEnv)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, used when no file exists
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = GatewayConfig::default();
        config.apply_env_overrides(&ProcessEnv)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the documented environment overrides
    pub fn apply_env_overrides(&mut self, env: &dyn EnvSource) -> Result<(), ConfigError> {
        if let Some(enabled) = env.get("MQTT_ENABLED") {
            self.mqtt.enabled = enabled.eq_ignore_ascii_case("true");
        }

        let host = env.get("MQTT_BROKER_HOST");
        let port = env.get("MQTT_BROKER_PORT");
        if host.is_some() || port.is_some() {
            let mut url = Url::parse(&self.mqtt.broker_url)
                .map_err(|_| ConfigError::InvalidConfig(self.mqtt.broker_url.clone()))?;
            if let Some(host) = host {
                url.set_host(Some(&host)).map_err(|_| {
                    ConfigError::InvalidConfig(format!("MQTT_BROKER_HOST '{host}' is not a host"))
                })?;
            }
            if let Some(port) = port {
                let port: u16 = port.parse().map_err(|_| {
                    ConfigError::InvalidConfig(format!("MQTT_BROKER_PORT '{port}' is not a port"))
                })?;
                url.set_port(Some(port)).map_err(|_| {
                    ConfigError::InvalidConfig("broker URL cannot carry a port".to_string())
                })?;
            }
            self.mqtt.broker_url = url.to_string().trim_end_matches('/').to_string();
        }

        if let Some(port) = env.get("HTTP_PORT") {
            self.server.port = port.parse().map_err(|_| {
                ConfigError::InvalidConfig(format!("HTTP_PORT '{port}' is not a port"))
            })?;
        }

        if env.get("NODE_ENV").as_deref() == Some("production") {
            self.server.environment = Environment::Production;
        }

        Ok(())
    }

    /// Validate field formats and ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "server.port must be greater than 0".to_string(),
            ));
        }

        if self.auth.token_ttl_hours <= 0 {
            return Err(ConfigError::InvalidConfig(
                "auth.token_ttl_hours must be greater than 0".to_string(),
            ));
        }

        let url = Url::parse(&self.mqtt.broker_url).map_err(|_| {
            ConfigError::InvalidConfig(format!("invalid broker URL: {}", self.mqtt.broker_url))
        })?;
        if url.scheme() != "mqtt" && url.scheme() != "mqtts" {
            return Err(ConfigError::InvalidConfig(format!(
                "broker URL scheme must be mqtt or mqtts, got {}",
                url.scheme()
            )));
        }

        validate_client_id(&self.mqtt.client_id)?;

        Ok(())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Get the token signing secret from its environment variable
    pub fn get_token_secret(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.auth.secret_env)
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .ok()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8000

[mqtt]
enabled = false
broker_url = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Client IDs must match [a-zA-Z0-9._-]+
fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

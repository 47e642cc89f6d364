// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Assistant Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing:
// - Grant store location
// - Discord REST access (token, API base, request timeout)
// - Role management audit destination
// - Branding used when rendering notices
// - HTTP command surface and observability settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::grant::ChannelId;
use crate::domain::repository::{SqliteConfig, StorageBackend};

pub const API_VERSION: &str = "rolekeeper/v1";
pub const KIND: &str = "AssistantConfig";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfigManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: AssistantConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Community this deployment serves
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantConfigSpec {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub role_management: RoleManagementConfig,

    #[serde(default)]
    pub branding: BrandingConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite://path/to/file.sqlite`, or `memory` for a throwaway store
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn storage_backend(&self) -> StorageBackend {
        if self.url.trim() == "memory" {
            return StorageBackend::InMemory;
        }
        StorageBackend::Sqlite(SqliteConfig {
            connection_string: self.url.clone(),
            max_connections: self.max_connections,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bot token (supports "env:VAR_NAME")
    #[serde(default = "default_token")]
    pub token: String,

    /// Upper bound for every REST call
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleManagementConfig {
    /// Channel receiving grant/expiry audit entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_channel_id: Option<ChannelId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandingConfig {
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default = "default_success_color")]
    pub success_color: u32,

    #[serde(default = "default_warn_color")]
    pub warn_color: u32,

    #[serde(default = "default_error_color")]
    pub error_color: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_database_url() -> String {
    "sqlite://data.sqlite".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_token() -> String {
    "env:DISCORD_TOKEN".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_server_name() -> String {
    "Community".to_string()
}

fn default_success_color() -> u32 {
    0x57F287
}

fn default_warn_color() -> u32 {
    0xFEE75C
}

fn default_error_color() -> u32 {
    0xED4245
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8750
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_metrics_port() -> u16 {
    9750
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: default_token(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            success_color: default_success_color(),
            warn_color: default_warn_color(),
            error_color: default_error_color(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for AssistantConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "rolekeeper".to_string(),
                version: None,
            },
            spec: AssistantConfigSpec::default(),
        }
    }
}

impl AssistantConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. ROLEKEEPER_CONFIG_PATH environment variable
    /// 2. ./rolekeeper.yaml (working directory)
    /// 3. ~/.rolekeeper/config.yaml (user home)
    /// 4. /etc/rolekeeper/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("ROLEKEEPER_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./rolekeeper.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".rolekeeper").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/rolekeeper/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides so container deployments can
    /// configure the daemon without a file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("ROLEKEEPER_DATABASE_URL") {
            tracing::info!("Environment override: ROLEKEEPER_DATABASE_URL");
            self.spec.database.url = url;
        }

        if let Some(channel) = lookup("ROLEKEEPER_LOG_CHANNEL_ID") {
            tracing::info!("Environment override: ROLEKEEPER_LOG_CHANNEL_ID={}", channel);
            self.spec.role_management.log_channel_id = Some(ChannelId::new(channel));
        }

        if let Some(port) = lookup("ROLEKEEPER_API_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.spec.api.port = port,
                Err(_) => tracing::warn!(
                    "Invalid value for ROLEKEEPER_API_PORT: '{}'. Ignoring.",
                    port
                ),
            }
        }
    }

    /// Resolve the bot token, following "env:VAR_NAME" indirection.
    pub fn resolve_token(&self) -> anyhow::Result<String> {
        resolve_secret(&self.spec.discord.token, |name| std::env::var(name).ok())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.database.url.trim().is_empty() {
            anyhow::bail!("spec.database.url cannot be empty");
        }

        if self.spec.database.max_connections == 0 {
            anyhow::bail!("spec.database.max_connections must be at least 1");
        }

        if self.spec.api.port == 0 {
            anyhow::bail!("spec.api.port must be greater than zero");
        }

        if self.spec.discord.request_timeout.is_zero() {
            anyhow::bail!("spec.discord.request_timeout must be greater than zero");
        }

        match self.spec.observability.logging.format.as_str() {
            "compact" | "json" => {}
            other => anyhow::bail!(
                "Invalid log format: '{}'. Expected 'compact' or 'json'",
                other
            ),
        }

        Ok(())
    }
}

/// Resolve a literal value or an "env:VAR_NAME" reference.
pub fn resolve_secret(
    value: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<String> {
    let resolved = match value.strip_prefix("env:") {
        Some(var) => lookup(var)
            .ok_or_else(|| anyhow::anyhow!("Environment variable {} is not set", var))?,
        None => value.to_string(),
    };

    if resolved.trim().is_empty() {
        anyhow::bail!("Secret value is empty");
    }

    Ok(resolved)
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! Values come from a YAML file (path in `WORKER_TAIL_CONFIG`, default
//! `config.yaml`), overridden by `WORKER_TAIL_`-prefixed environment
//! variables. Nested keys use `__`, e.g. `WORKER_TAIL_LOKI__URL`.
//!
//! ```yaml
//! services:
//!   - name: checkout
//!     accountId: 0123abcd
//!     apiToken: secret
//!     env: production
//! loki:
//!   url: http://localhost:3100/loki/api/v1/push
//! ```

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use loki_push::LokiConfig;
use worker_tail::session::DEFAULT_API_BASE_URL;
use worker_tail::stream::{StreamOptions, DEFAULT_CHANNEL_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT};
use worker_tail::{ServiceDescriptor, StartupPolicy};

pub const CONFIG_PATH_ENV: &str = "WORKER_TAIL_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const ENV_PREFIX: &str = "WORKER_TAIL_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {} not found", .0.display())]
    Missing(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("no services configured")]
    NoServices,

    #[error("service at index {index}: {field} is required")]
    MissingField { index: usize, field: &'static str },

    #[error("service name {0} is configured more than once")]
    DuplicateService(String),

    #[error("{0} is required")]
    Required(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!("invalid log level: {s}")),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, <LogLevel as TryFrom<String>>::Error> {
        value.parse()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how records are pushed to Loki.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LokiSettings {
    pub url: String,
    pub batch_wait_ms: u64,
    pub batch_size_bytes: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub tenant_id: Option<String>,
}

impl Default for LokiSettings {
    fn default() -> Self {
        let defaults = LokiConfig::default();
        Self {
            url: defaults.url,
            batch_wait_ms: u64::try_from(defaults.batch_wait.as_millis()).unwrap_or(u64::MAX),
            batch_size_bytes: defaults.batch_size,
            timeout_secs: defaults.timeout.as_secs(),
            max_retries: defaults.max_retries,
            tenant_id: None,
        }
    }
}

impl LokiSettings {
    pub fn to_loki_config(&self) -> LokiConfig {
        LokiConfig {
            batch_wait: Duration::from_millis(self.batch_wait_ms),
            batch_size: self.batch_size_bytes,
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            tenant_id: self.tenant_id.clone().filter(|t| !t.is_empty()),
            ..LokiConfig::new(self.url.clone())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub services: Vec<ServiceDescriptor>,
    pub loki: LokiSettings,
    pub api_base_url: String,
    pub handshake_timeout_secs: u64,
    pub channel_capacity: usize,
    pub startup_policy: StartupPolicy,
    pub log_level: LogLevel,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            loki: LokiSettings::default(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT.as_secs(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            startup_policy: StartupPolicy::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl AgentConfig {
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            channel_capacity: self.channel_capacity,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::NoServices);
        }

        let mut names = HashSet::new();
        for (index, service) in self.services.iter().enumerate() {
            if service.name.trim().is_empty() {
                return Err(ConfigError::MissingField { index, field: "name" });
            }
            if service.account_id.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    index,
                    field: "accountId",
                });
            }
            if service.api_token.is_empty() {
                return Err(ConfigError::MissingField {
                    index,
                    field: "apiToken",
                });
            }
            if !names.insert(service.name.as_str()) {
                return Err(ConfigError::DuplicateService(service.name.clone()));
            }
        }

        if self.loki.url.trim().is_empty() {
            return Err(ConfigError::Required("loki.url"));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::Required("api_base_url"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero("channel_capacity"));
        }
        if self.loki.batch_size_bytes == 0 {
            return Err(ConfigError::Zero("loki.batch_size_bytes"));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::Zero("handshake_timeout_secs"));
        }
        Ok(())
    }
}

/// Config file path from `WORKER_TAIL_CONFIG`, falling back to `config.yaml`.
pub fn config_path() -> PathBuf {
    env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Loads and validates the configuration at `path`.
pub fn load(path: &Path) -> Result<AgentConfig, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }

    let config: AgentConfig = Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

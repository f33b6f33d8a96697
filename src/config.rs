use colored::*;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use conntrace::runner::RequestTemplate;
use conntrace::transport::{DEFAULT_USER_AGENT, ProxyConfig, TransportConfig};

pub const DEFAULT_TARGET_URL: &str = "https://update.traefik.io/repos/traefik/traefik/releases";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub target: TargetConfig,
    pub timeouts: TimeoutsConfig,
    pub transport: TransportSection,
    pub output: OutputConfig,
}

/// The request every attempt sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_TARGET_URL.to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub connect_ms: u64,
    pub tls_handshake_ms: u64,
    pub idle_ms: u64,
    pub response_header_ms: u64,
    pub expect_continue_ms: u64,
    pub request_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_ms: 10000,
            tls_handshake_ms: 10000,
            idle_ms: 10000,
            response_header_ms: 10000,
            expect_continue_ms: 10000,
            request_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub max_idle_per_host: usize,
    pub user_agent: String,
    pub proxy_from_env: bool,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            max_idle_per_host: 2,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy_from_env: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("out"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            target: TargetConfig::default(),
            timeouts: TimeoutsConfig::default(),
            transport: TransportSection::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if let Some(config) = Self::load_fallback(&primary_config) {
                return Ok(config);
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if let Some(config) = Self::load_fallback(&fallback_config) {
            return Ok(config);
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load an optional config location. Logging is not up yet, so a broken file is
    /// reported on stderr before falling through to the next location.
    fn load_fallback(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match Self::load_from_file(path) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("{} Failed to load config from {}: {:#}", "Warning:".yellow(), path.display(), e);
                None
            }
        }
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn transport_config(&self) -> TransportConfig {
        let ms = Duration::from_millis;
        TransportConfig {
            connect_timeout: ms(self.timeouts.connect_ms),
            tls_handshake_timeout: ms(self.timeouts.tls_handshake_ms),
            idle_timeout: ms(self.timeouts.idle_ms),
            response_header_timeout: ms(self.timeouts.response_header_ms),
            expect_continue_timeout: ms(self.timeouts.expect_continue_ms),
            request_timeout: ms(self.timeouts.request_ms),
            max_idle_per_host: self.transport.max_idle_per_host,
            user_agent: self.transport.user_agent.clone(),
        }
    }

    pub fn request_template(&self) -> RequestTemplate {
        RequestTemplate {
            method: self.target.method.clone(),
            url: self.target.url.clone(),
            headers: self.target.headers.clone(),
            body: self.target.body.clone(),
        }
    }

    pub fn proxy_config(&self) -> Result<ProxyConfig> {
        if !self.transport.proxy_from_env {
            return Ok(ProxyConfig::none());
        }
        ProxyConfig::from_env().context("Invalid proxy settings in environment")
    }
}

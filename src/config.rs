use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration.
///
/// Loaded from a YAML file when `ROTOR_CONFIG` points at one, otherwise from
/// compiled-in defaults with `LISTEN` / `BACKENDS` environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the load balancer listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Ordered list of upstream backends
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,

    /// How long to wait for in-flight requests on shutdown
    #[serde(default = "default_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Liveness probe timeout
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Backend connect timeout
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Full forwarded-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// One backend entry in the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Backend URL (e.g., "http://localhost:9001")
    pub url: String,

    /// Optional backend name for logging
    #[serde(default)]
    pub name: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_backends() -> Vec<BackendConfig> {
    ["http://127.0.0.1:9001", "http://127.0.0.1:9002", "http://127.0.0.1:9003"]
        .into_iter()
        .map(|url| BackendConfig { url: url.to_string(), name: None })
        .collect()
}

fn default_grace_secs() -> u64 {
    5
}

fn default_probe_timeout_secs() -> u64 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            backends: default_backends(),
            shutdown_grace_secs: default_grace_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    /// Loads configuration for the process.
    ///
    /// Precedence: `ROTOR_CONFIG` file, then environment overrides on top of
    /// the defaults. A file that cannot be read or parsed is a fatal error.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("ROTOR_CONFIG") {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path))?;
            return Self::from_yaml(&raw);
        }

        Ok(Self::from_env())
    }

    /// Parses a YAML configuration document.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("invalid config file")
    }

    /// Builds configuration from defaults plus environment overrides.
    ///
    /// `LISTEN` replaces the listen address; `BACKENDS` is a comma-separated
    /// list of backend URLs.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(listen) = std::env::var("LISTEN") {
            cfg.listen_addr = listen;
        }

        if let Ok(raw) = std::env::var("BACKENDS") {
            let backends: Vec<BackendConfig> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|url| BackendConfig { url: url.to_string(), name: None })
                .collect();

            if !backends.is_empty() {
                cfg.backends = backends;
            }
        }

        cfg
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

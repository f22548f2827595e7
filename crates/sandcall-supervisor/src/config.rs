use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Domain every service sandbox is a subdomain of, e.g. `example.com`.
    #[serde(default = "default_root_domain")]
    pub root_domain: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Path of the loader page that boots a sandbox.
    #[serde(default = "default_loader_path")]
    pub loader_path: String,
    #[serde(default = "default_sandbox_timeout_ms")]
    pub sandbox_timeout_ms: u64,
    #[serde(default = "default_preload_timeout_ms")]
    pub preload_timeout_ms: u64,
    /// Abort a chain when a frame stays on top of the stack this long.
    /// Disabled when unset.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    /// Services implemented by the host itself. Never loaded as sandboxes.
    #[serde(default = "default_host_services")]
    pub host_services: Vec<String>,
}

fn default_root_domain() -> String {
    "sandcall.localhost".into()
}
fn default_scheme() -> String {
    "https".into()
}
fn default_loader_path() -> String {
    "/common/wasm-loader".into()
}
fn default_sandbox_timeout_ms() -> u64 {
    2000
}
fn default_preload_timeout_ms() -> u64 {
    2000
}
fn default_host_services() -> Vec<String> {
    vec!["host".into(), "wasi".into()]
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            root_domain: default_root_domain(),
            scheme: default_scheme(),
            loader_path: default_loader_path(),
            sandbox_timeout_ms: default_sandbox_timeout_ms(),
            preload_timeout_ms: default_preload_timeout_ms(),
            call_timeout_ms: None,
            host_services: default_host_services(),
        }
    }
}

/// Bounded waits applied by every plugin handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub sandbox: Duration,
    pub preload: Duration,
}

impl SupervisorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.sandcall/sandcall.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sandcall")
            .join("sandcall.toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_domain.is_empty() || self.root_domain.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "root_domain must be a bare host name, got `{}`",
                self.root_domain
            )));
        }
        if self.scheme != "https" && self.scheme != "http" {
            return Err(ConfigError::Invalid(format!(
                "scheme must be `https` or `http`, got `{}`",
                self.scheme
            )));
        }
        if !self.loader_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "loader_path must start with `/`, got `{}`",
                self.loader_path
            )));
        }
        if self.sandbox_timeout_ms == 0 || self.preload_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.call_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "call_timeout_ms must be non-zero when set".into(),
            ));
        }
        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            sandbox: Duration::from_millis(self.sandbox_timeout_ms),
            preload: Duration::from_millis(self.preload_timeout_ms),
        }
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn is_host_service(&self, service: &str) -> bool {
        self.host_services.iter().any(|s| s == service)
    }
}

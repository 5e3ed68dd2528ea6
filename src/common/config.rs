//! Configuration for hank components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Root path of the coordination namespace
    #[serde(default = "default_root")]
    pub root: String,

    /// Bind address for the HTTP status API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_root() -> String {
    "/hank".to_string()
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:5100".parse().unwrap()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            bind_addr: default_bind_addr(),
            log_level: default_log_level(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| crate::Error::InvalidConfig(e.to_string()))
    }

    /// Validate configuration values
    pub fn validate(&self) -> crate::Result<()> {
        if !self.root.starts_with('/') || self.root.len() < 2 {
            return Err(crate::Error::InvalidConfig(format!(
                "root must be an absolute path: {}",
                self.root
            )));
        }
        if self.root.ends_with('/') {
            return Err(crate::Error::InvalidConfig(
                "root must not end with a slash".into(),
            ));
        }
        Ok(())
    }
}

//! Configuration data model.
//!
//! Struct/enum definitions plus default values. Loading, source precedence,
//! and validation stay in `config::mod`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::{
    DEFAULT_BRIDGE_HOST, DEFAULT_BRIDGE_PORT, DEFAULT_CACHE_TIMEOUT_SECS,
    DEFAULT_DISCOVERY_TIMEOUT_SECS, DEFAULT_EXECUTE_TIMEOUT_SECS, DEFAULT_HEALTH_TIMEOUT_SECS,
    DEFAULT_REWRITE_TIMEOUT_SECS,
};
use crate::pipeline::detect::DEFAULT_MARKER;
use crate::site::SiteProfile;

/// Top-level runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub pipeline: PipelineConfig,
    /// Resolved site profiles: built-ins merged with file and `sites_file`
    /// entries.
    pub sites: Vec<SiteProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            pipeline: PipelineConfig::default(),
            sites: super::defaults::builtin_sites(),
        }
    }
}

/// Connection settings for the local bridge service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub health_timeout_secs: u64,
    /// Service/tool discovery, remote config, and lifecycle calls.
    pub discovery_timeout_secs: u64,
    pub execute_timeout_secs: u64,
    /// Paged, search, and context reads of cached results.
    pub cache_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BRIDGE_HOST.to_string(),
            port: DEFAULT_BRIDGE_PORT,
            health_timeout_secs: DEFAULT_HEALTH_TIMEOUT_SECS,
            discovery_timeout_secs: DEFAULT_DISCOVERY_TIMEOUT_SECS,
            execute_timeout_secs: DEFAULT_EXECUTE_TIMEOUT_SECS,
            cache_timeout_secs: DEFAULT_CACHE_TIMEOUT_SECS,
        }
    }
}

impl BridgeConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Interception pipeline switches.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub enabled: bool,
    pub marker: String,
    /// Per-hostname switch: inject the reminder into continuing
    /// conversations too.
    pub always_inject: BTreeMap<String, bool>,
    /// Submit the capability prompt after typing it on `refresh_prompt`.
    pub auto_submit_prompt: bool,
    pub rewrite_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            marker: DEFAULT_MARKER.to_string(),
            always_inject: BTreeMap::new(),
            auto_submit_prompt: false,
            rewrite_timeout_secs: DEFAULT_REWRITE_TIMEOUT_SECS,
        }
    }
}

impl PipelineConfig {
    pub fn always_inject_for(&self, hostname: &str) -> bool {
        self.always_inject
            .iter()
            .any(|(host, enabled)| *enabled && host.eq_ignore_ascii_case(hostname))
    }

    pub fn rewrite_timeout(&self) -> Duration {
        Duration::from_secs(self.rewrite_timeout_secs)
    }
}

/// On-disk shape of `chatbridge.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct FileConfig {
    pub bridge: BridgeConfig,
    pub pipeline: PipelineConfig,
    pub sites: Vec<SiteProfile>,
    pub sites_file: Option<PathBuf>,
}

/// Result of `chatbridge init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigInitResult {
    Created { path: PathBuf },
    AlreadyInitialized { path: PathBuf },
    Overwritten { path: PathBuf, backup_path: PathBuf },
}

//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`CHATBRIDGE_HOST`, `CHATBRIDGE_PORT`,
//!    `CHATBRIDGE_EXECUTE_TIMEOUT_SECS`, `CHATBRIDGE_DISABLED`)
//! 2. TOML file specified via --config CLI flag
//! 3. ./chatbridge.toml in the current directory
//! 4. $XDG_CONFIG_HOME/chatbridge/chatbridge.toml (or
//!    ~/.config/chatbridge/chatbridge.toml)
//! 5. Built-in defaults
//!
//! Site profiles merge by id: built-ins first, then `[[sites]]` from the
//! file, then entries from `sites_file`.

use crate::error::ConfigError;
use crate::pipeline::detect::TagDetector;
use crate::site::SiteProfile;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

mod defaults;
mod env;
mod init;
mod sources;
mod types;

pub use init::{config_root_dir, default_global_config_path, initialize_config};
pub use sources::ConfigSource;
pub use types::{BridgeConfig, Config, ConfigInitResult, PipelineConfig};

use defaults::builtin_sites;
use env::apply_runtime_env_overrides;
use sources::read_config_text_with_sources;
use types::FileConfig;

/// Resolved configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: ConfigSource,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from --config flag).
pub fn load_config(path_override: Option<&str>) -> Result<LoadedConfig, ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )
}

fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<LoadedConfig, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (config_text, source) =
        read_config_text_with_sources(path_override, &read_file, &config_root)?;
    let parsed: FileConfig = toml::from_str(&config_text)?;
    let mut config = resolve_config_from_file_config(parsed, &read_file)?;
    apply_runtime_env_overrides(&mut config, &env_lookup)?;
    validate(&config)?;
    tracing::debug!(
        "config loaded from {source}: {} site profiles, bridge {}",
        config.sites.len(),
        config.bridge.base_url()
    );
    Ok(LoadedConfig { config, source })
}

fn resolve_config_from_file_config<FRead>(
    parsed: FileConfig,
    read_file: &FRead,
) -> Result<Config, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
{
    let mut sites = builtin_sites();
    merge_sites(&mut sites, parsed.sites);

    if let Some(path) = parsed.sites_file.as_deref() {
        let text = read_file(path).map_err(|e| {
            ConfigError::Invalid(format!("failed to read sites_file `{}`: {e}", path.display()))
        })?;
        let extra: Vec<SiteProfile> = serde_json::from_str(&text)?;
        merge_sites(&mut sites, extra);
    }

    Ok(Config {
        bridge: parsed.bridge,
        pipeline: parsed.pipeline,
        sites,
    })
}

/// Replace profiles with matching ids in place; append new ones.
fn merge_sites(sites: &mut Vec<SiteProfile>, overrides: Vec<SiteProfile>) {
    for profile in overrides {
        match sites.iter_mut().find(|existing| existing.id == profile.id) {
            Some(existing) => *existing = profile,
            None => sites.push(profile),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.bridge.host.trim().is_empty() {
        return Err(ConfigError::Invalid("bridge.host must not be empty".into()));
    }
    if config.bridge.port == 0 {
        return Err(ConfigError::Invalid("bridge.port must be non-zero".into()));
    }
    for (name, secs) in [
        ("bridge.health_timeout_secs", config.bridge.health_timeout_secs),
        ("bridge.discovery_timeout_secs", config.bridge.discovery_timeout_secs),
        ("bridge.execute_timeout_secs", config.bridge.execute_timeout_secs),
        ("bridge.cache_timeout_secs", config.bridge.cache_timeout_secs),
        ("pipeline.rewrite_timeout_secs", config.pipeline.rewrite_timeout_secs),
    ] {
        if secs == 0 {
            return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
        }
    }
    TagDetector::new(&config.pipeline.marker)?;

    let mut seen = HashSet::new();
    for site in &config.sites {
        if site.id.trim().is_empty() {
            return Err(ConfigError::Invalid("site profile with empty id".into()));
        }
        if !seen.insert(site.id.as_str()) {
            return Err(ConfigError::Invalid(format!("duplicate site id `{}`", site.id)));
        }
        if site.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "site `{}` has an empty hostname",
                site.id
            )));
        }
        if !site.intercepted_endpoints.iter().any(|e| !e.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "site `{}` has no intercepted endpoints",
                site.id
            )));
        }
        if !site.prompt_paths.iter().any(|p| !p.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "site `{}` has no prompt paths",
                site.id
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

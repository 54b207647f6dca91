//! Default configuration constants and the embedded config template.

use crate::site::SiteProfile;
use serde::Deserialize;

/// Embedded default `chatbridge.toml` written by `chatbridge init`. Its
/// `[[sites]]` entries are also the built-in site profiles.
pub(super) const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../templates/chatbridge.toml");

pub(super) const DEFAULT_BRIDGE_HOST: &str = "127.0.0.1";
pub(super) const DEFAULT_BRIDGE_PORT: u16 = 3849;
pub(super) const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 2;
pub(super) const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 5;
pub(super) const DEFAULT_EXECUTE_TIMEOUT_SECS: u64 = 120;
pub(super) const DEFAULT_CACHE_TIMEOUT_SECS: u64 = 30;
pub(super) const DEFAULT_REWRITE_TIMEOUT_SECS: u64 = 5;

#[derive(Deserialize)]
struct TemplateSites {
    #[serde(default)]
    sites: Vec<SiteProfile>,
}

/// Site profiles shipped in the embedded template.
pub(super) fn builtin_sites() -> Vec<SiteProfile> {
    match toml::from_str::<TemplateSites>(DEFAULT_CONFIG_TEMPLATE) {
        Ok(template) => template.sites,
        Err(err) => {
            tracing::warn!("built-in site profiles failed to parse: {err}");
            Vec::new()
        }
    }
}

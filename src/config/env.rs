//! Environment overrides. `CHATBRIDGE_*` variables win over every file.

use crate::error::ConfigError;

use super::Config;

pub(super) fn apply_runtime_env_overrides<FEnv>(
    config: &mut Config,
    env_lookup: &FEnv,
) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(host) = non_empty(env_lookup, "CHATBRIDGE_HOST") {
        config.bridge.host = host;
    }
    if let Some(port) = non_empty(env_lookup, "CHATBRIDGE_PORT") {
        config.bridge.port = port.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "invalid CHATBRIDGE_PORT value `{port}`: expected a port number"
            ))
        })?;
    }
    if let Some(timeout) = non_empty(env_lookup, "CHATBRIDGE_EXECUTE_TIMEOUT_SECS") {
        let parsed = timeout.parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid CHATBRIDGE_EXECUTE_TIMEOUT_SECS value `{timeout}`: expected positive integer seconds"
            ))
        })?;
        // Zero would mean an immediate timeout on every call.
        config.bridge.execute_timeout_secs = parsed.max(1);
    }
    if let Some(disabled) = non_empty(env_lookup, "CHATBRIDGE_DISABLED") {
        config.pipeline.enabled = !parse_flag(&disabled).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "invalid CHATBRIDGE_DISABLED value `{disabled}`: expected true/false"
            ))
        })?;
    }
    Ok(())
}

fn non_empty<FEnv>(env_lookup: &FEnv, name: &str) -> Option<String>
where
    FEnv: Fn(&str) -> Option<String>,
{
    env_lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

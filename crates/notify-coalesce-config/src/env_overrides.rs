use super::{LogFormat, RuntimeConfig};
use anyhow::{Context, Result};
use thiserror::Error;

pub const ENV_PREFIX: &str = "NOTIFY_COALESCE_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    /// Get a variable by its unprefixed key (e.g. `WINDOW_SECS`).
    fn get(&self, key: &str) -> Option<String>;
}

impl EnvSource for std::collections::HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        std::collections::HashMap::get(self, key).cloned()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse {prefix}{key}={value:?}: {reason}")]
    InvalidValue {
        prefix: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: String, reason: impl ToString) -> Self {
        Self::InvalidValue {
            prefix: ENV_PREFIX,
            key,
            value,
            reason: reason.to_string(),
        }
    }
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Window configuration
    if let Some(val) = get_env_parsed::<_, u64>(env, "WINDOW_SECS")? {
        config.batch.window_secs = val;
    }
    if let Some(val) = get_env_parsed::<_, usize>(env, "MAX_SUMMARY_CHARS")? {
        config.batch.max_summary_chars = val;
    }
    if let Some(prefix) = env.get("LINK_PREFIX") {
        config.batch.link_prefix = prefix;
    }

    // Logging (level, format)
    if let Some(level) = env.get("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.logging.format = format
            .parse::<LogFormat>()
            .with_context(|| format!("Invalid {}LOG_FORMAT value", ENV_PREFIX))?;
    }

    Ok(())
}

fn get_env_parsed<E, T>(env: &E, key: &'static str) -> Result<Option<T>>
where
    E: EnvSource,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .trim()
                .parse::<T>()
                .map_err(|e| ConfigError::invalid(key, val.clone(), e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

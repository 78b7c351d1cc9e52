// Configuration validation
//
// Validates that values are sensible before the engine is built

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

const DAY_SECS: u64 = 24 * 60 * 60;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_batch_config(&config.batch)?;
    validate_log_config(&config.logging)?;
    Ok(())
}

fn validate_batch_config(config: &BatchConfig) -> Result<()> {
    if config.window_secs == 0 {
        bail!("batch.window_secs must be greater than 0");
    }

    if config.max_summary_chars == 0 {
        bail!("batch.max_summary_chars must be greater than 0");
    }

    if !config.link_prefix.starts_with('/') {
        bail!(
            "batch.link_prefix must start with '/', got '{}'",
            config.link_prefix
        );
    }

    // Pending windows live only in memory
    if config.window_secs > DAY_SECS {
        warn!(
            window_secs = config.window_secs,
            "batch.window_secs exceeds one day; pending notifications are lost on restart"
        );
    }

    Ok(())
}

fn validate_log_config(config: &LogConfig) -> Result<()> {
    if config.level.trim().is_empty() {
        bail!("logging.level must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_batch_config() {
        assert!(validate_batch_config(&BatchConfig::default()).is_ok());

        let zero_window = BatchConfig {
            window_secs: 0,
            ..BatchConfig::default()
        };
        assert!(validate_batch_config(&zero_window).is_err());

        let zero_summary = BatchConfig {
            max_summary_chars: 0,
            ..BatchConfig::default()
        };
        assert!(validate_batch_config(&zero_summary).is_err());

        let relative_link = BatchConfig {
            link_prefix: "chat".to_string(),
            ..BatchConfig::default()
        };
        assert!(validate_batch_config(&relative_link).is_err());

        let long_window = BatchConfig {
            window_secs: 2 * DAY_SECS,
            ..BatchConfig::default()
        };
        assert!(validate_batch_config(&long_window).is_ok());
    }

    #[test]
    fn test_validate_log_config() {
        assert!(validate_log_config(&LogConfig::default()).is_ok());

        let blank = LogConfig {
            level: "  ".to_string(),
            format: LogFormat::Json,
        };
        assert!(validate_log_config(&blank).is_err());
    }
}

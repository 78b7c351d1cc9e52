use anyhow::{Context, Result};
use clap::Parser;
use notify_coalesce::{init_tracing, run_with_config, RunOptions, ShutdownMode};
use notify_coalesce_config::RuntimeConfig;
use std::path::PathBuf;

/// Coalesce bursts of chat events into summarized notifications
#[derive(Parser)]
#[command(name = "notify-coalesce")]
#[command(version)]
#[command(about = "Coalesce bursts of chat events into summarized notifications", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON-lines event input (defaults to stdin)
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Coalescing window in seconds (overrides config file)
    #[arg(short, long, value_name = "SECS")]
    window_secs: Option<u64>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Flush all pending windows when input ends instead of waiting for a signal
    #[arg(long)]
    flush_on_eof: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build tokio runtime and run the driver
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Step 1: Load base configuration
    let mut config = if let Some(config_path) = &cli.config {
        // Explicit config file path provided
        RuntimeConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        // Env-named or default-location file, else built-in defaults
        RuntimeConfig::load().context("Failed to load configuration")?
    };

    // Step 2: Apply CLI overrides (highest priority)
    apply_cli_overrides(&mut config, &cli);
    config
        .validate()
        .context("Invalid configuration after CLI overrides")?;

    // Step 3: Logging
    init_tracing(&config);

    // Step 4: Run with resolved config
    let options = RunOptions {
        input: cli.input,
        shutdown: if cli.flush_on_eof {
            ShutdownMode::FlushOnEof
        } else {
            ShutdownMode::WaitForSignal
        },
    };
    run_with_config(config, options).await
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) {
    if let Some(secs) = cli.window_secs {
        config.batch.window_secs = secs;
    }

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "notify-coalesce",
            "--window-secs",
            "30",
            "--log-level",
            "debug",
            "--flush-on-eof",
        ]);
        assert!(cli.flush_on_eof);

        let mut config = RuntimeConfig::default();
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config.batch.window_secs, 30);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let cli = Cli::parse_from(["notify-coalesce"]);
        let mut config = RuntimeConfig::default();
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config, RuntimeConfig::default());
    }
}

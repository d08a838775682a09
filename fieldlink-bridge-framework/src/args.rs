//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::Parser;

use crate::LoggingConfig;

/// Common CLI arguments for all bridges.
#[derive(Parser, Debug, Clone)]
#[command(about = "Fieldlink telemetry bridge")]
#[command(version)]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If no `--config` argument is provided, uses the default.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        let matches = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .get_matches();

        <Self as clap::FromArgMatches>::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }

    /// Apply the `--log-level` override to a logging configuration.
    pub fn logging_overrides(&self, logging: &LoggingConfig) -> LoggingConfig {
        let mut logging = logging.clone();
        if let Some(ref level) = self.log_level {
            logging.level = level.clone();
        }
        logging
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_from() {
        let args =
            BridgeArgs::parse_from(["bridge", "--config", "test.json5", "--log-level", "debug"]);
        assert_eq!(args.config, PathBuf::from("test.json5"));
        assert_eq!(args.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_log_level_override() {
        let args = BridgeArgs {
            config: PathBuf::from("test.json5"),
            log_level: Some("trace".to_string()),
        };
        let logging = args.logging_overrides(&LoggingConfig::default());
        assert_eq!(logging.level, "trace");

        let args = BridgeArgs {
            config: PathBuf::from("test.json5"),
            log_level: None,
        };
        let logging = args.logging_overrides(&LoggingConfig::default());
        assert_eq!(logging.level, "info");
    }
}

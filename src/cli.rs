//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use chrono::{DateTime, Utc};
use clap::Parser;
use secrecy::SecretString;
use std::path::PathBuf;

/// Cohortwise - privacy-preserving trend aggregation
///
/// Builds pseudonymized, generalized contributions for every consenting
/// user, then publishes population trends that clear per-category cohort
/// floors. Intended to run on a schedule (e.g. weekly).
///
/// Examples:
///   cohortwise --data-dir ./data
///   cohortwise --phase build --as-of 2026-10-12T00:00:00Z
///   cohortwise --phase aggregate --window-days 60 --summary run.json --format json
///   cohortwise --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Pseudonymization salt (required)
    ///
    /// Prefer the environment variable so the secret stays out of shell
    /// history. There is no default.
    #[arg(
        long,
        env = "COHORTWISE_SALT",
        hide_env_values = true,
        value_parser = parse_secret
    )]
    pub salt: Option<SecretString>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .cohortwise.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Data directory holding consent, records and output stores
    #[arg(short, long, value_name = "DIR", env = "COHORTWISE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Reference time for this run (RFC 3339); defaults to now
    #[arg(long, value_name = "TIMESTAMP")]
    pub as_of: Option<DateTime<Utc>>,

    /// Aggregation window in days (capped at the retention window)
    #[arg(long, value_name = "DAYS")]
    pub window_days: Option<i64>,

    /// Number of users processed concurrently
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Which phase(s) to run
    #[arg(long, default_value = "all", value_name = "PHASE")]
    pub phase: Phase,

    /// Also write the run summary to this file
    #[arg(short, long, value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Run summary format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .cohortwise.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Pipeline phases to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Phase {
    /// Contribution builder only
    Build,
    /// Trend aggregator only
    Aggregate,
    /// Builder, then aggregator (default)
    #[default]
    All,
}

impl Phase {
    pub fn runs_build(&self) -> bool {
        matches!(self, Phase::Build | Phase::All)
    }

    pub fn runs_aggregate(&self) -> bool {
        matches!(self, Phase::Aggregate | Phase::All)
    }
}

/// Output format for the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Wrap the salt as soon as clap hands it over.
fn parse_secret(value: &str) -> Result<SecretString, String> {
    Ok(SecretString::new(value.to_string().into_boxed_str()))
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(concurrency) = self.concurrency {
            if concurrency == 0 {
                return Err("Concurrency must be at least 1".to_string());
            }
        }

        if let Some(window) = self.window_days {
            if window < 1 {
                return Err("Window must be at least 1 day".to_string());
            }
        }

        Ok(())
    }

    /// The salt, if one was supplied.
    pub fn salt_secret(&self) -> Option<SecretString> {
        self.salt.clone()
    }

    /// Effective reference time.
    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of.unwrap_or_else(Utc::now)
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_args() -> Args {
        Args {
            salt: parse_secret("0123456789abcdef").ok(),
            config: None,
            data_dir: None,
            as_of: None,
            window_days: None,
            concurrency: None,
            phase: Phase::All,
            summary: None,
            format: OutputFormat::Markdown,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_concurrency() {
        let mut args = make_args();
        args.concurrency = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_parse_as_of_and_phase() {
        let args = Args::try_parse_from([
            "cohortwise",
            "--as-of",
            "2026-10-12T00:00:00Z",
            "--phase",
            "aggregate",
        ])
        .unwrap();
        assert_eq!(
            args.as_of(),
            Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap()
        );
        assert!(args.phase.runs_aggregate());
        assert!(!args.phase.runs_build());
    }

    #[test]
    fn test_salt_secret_wraps_value() {
        use secrecy::ExposeSecret;
        let args = make_args();
        assert_eq!(
            args.salt_secret().unwrap().expose_secret(),
            "0123456789abcdef"
        );
    }

    #[test]
    fn test_salt_never_printed() {
        let args = Args::try_parse_from(["cohortwise", "--salt", "plain-salt-value-1234"]).unwrap();
        assert!(!format!("{:?}", args).contains("plain-salt-value-1234"));
        let secret = args.salt_secret().unwrap();
        assert_eq!(
            secrecy::ExposeSecret::expose_secret(&secret),
            "plain-salt-value-1234"
        );
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}

//! marcstream CLI library
//!
//! Command-line front end for the conversion engine:
//!
//! - **Conversion**: run one input through codecs and transforms (`marcstream run`)
//! - **Expansion**: list the locators an `@glob` marker names (`marcstream glob`)

pub mod commands;

use clap::{Args, Parser, Subcommand};
use marcstream_common::logging::{LogConfig, LogFormat, LogLevel, LogOutput};
use marcstream_common::{Error, Result};
use marcstream_engine::config::DEFAULT_CHANNEL_CAPACITY;
use std::path::PathBuf;

/// marcstream - streaming record conversion
#[derive(Parser, Debug)]
#[command(name = "marcstream")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Environment file loaded before settings are read
    #[arg(short = 'c', long = "config", default_value = ".env", global = true)]
    pub config: PathBuf,

    /// Log destination (stderr, stdout, file, both) or `json` for JSON logs
    #[arg(long, global = true)]
    pub log: Option<String>,

    /// Log at info level
    #[arg(long, global = true)]
    pub info: bool,

    /// Log at debug level
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log at trace level
    #[arg(long, global = true)]
    pub trace: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert one input
    Run(RunArgs),

    /// Print the locators matched by an `@glob:` marker
    Glob(GlobArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Input locator: path, `-`, file:, http(s)://, s3(s)://, sftp://
    pub input: String,

    /// Input codec
    #[arg(long)]
    pub from: Option<String>,

    /// Output codec; without one nothing is written
    #[arg(long)]
    pub to: Option<String>,

    /// Output locator (default: standard output)
    #[arg(long)]
    pub out: Option<String>,

    /// Transform applied to every record
    #[arg(long)]
    pub map: Option<String>,

    /// Plugin parameter, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Stop after this many records
    #[arg(long)]
    pub count: Option<u64>,

    /// Skip this many records first
    #[arg(long, default_value_t = 0)]
    pub skip: u64,

    /// Decompress gzip input
    #[arg(short = 'z', long = "gunzip")]
    pub gunzip: bool,

    /// Extract tar input
    #[arg(long)]
    pub tar: bool,

    /// Multipart upload part size in bytes
    #[arg(long)]
    pub part_size: Option<usize>,

    /// Capacity of the channel between two stages
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// SSH private key file for sftp
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Environment variable holding an SSH private key for sftp
    #[arg(long)]
    pub key_env: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct GlobArgs {
    /// Locator ending in `/@glob:<suffix>`
    pub locator: String,

    /// Print embedded credentials instead of masking them
    #[arg(long)]
    pub show_credentials: bool,
}

impl Cli {
    /// Logging setup from the environment, overridden by flags
    pub fn log_config(&self) -> Result<LogConfig> {
        let mut config =
            LogConfig::from_env().map_err(|e| Error::Configuration(e.to_string()))?;

        if self.trace {
            config.level = LogLevel::Trace;
        } else if self.debug {
            config.level = LogLevel::Debug;
        } else if self.info {
            config.level = LogLevel::Info;
        }

        match self.log.as_deref() {
            None => {},
            Some("json") => config.format = LogFormat::Json,
            Some(output) => {
                config.output = output
                    .parse::<LogOutput>()
                    .map_err(|e| Error::Configuration(e.to_string()))?;
            },
        }
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::parse_from([
            "marcstream", "run", "in.seq", "--from", "alephseq", "--to", "jsonl", "--param",
            "header=no", "--count", "5", "-z", "--debug",
        ]);
        let Commands::Run(args) = &cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.from.as_deref(), Some("alephseq"));
        assert_eq!(args.params, vec!["header=no"]);
        assert_eq!(args.count, Some(5));
        assert!(args.gunzip);
        assert_eq!(args.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert!(cli.debug);
    }

    #[test]
    fn test_log_flag() {
        let cli = Cli::parse_from(["marcstream", "--log", "json", "glob", "/tmp/@glob:.xml"]);
        assert_eq!(cli.log_config().unwrap().format, LogFormat::Json);

        let cli = Cli::parse_from(["marcstream", "--log", "nowhere", "glob", "x"]);
        assert!(cli.log_config().is_err());
    }
}

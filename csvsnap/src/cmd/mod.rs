//! Command parsing.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::common::*;
use crate::config::{Configuration, Settings};
use crate::logging::LogFormat;
use crate::pipeline::PipelineConfig;
use crate::schema::DuplicateColumns;

pub mod config;
pub mod count;
pub mod run;
pub mod schema;
pub mod serve;

/// Command-line options, parsed using `clap`.
#[derive(Debug, Parser)]
#[command(
    name = "csvsnap",
    version,
    about = "Load a published CSV dataset into a warehouse table, and search it."
)]
pub struct Opt {
    /// How to format log output on stderr [values: indented, flat, json].
    #[arg(long, global = true, default_value = "indented", env = "CSVSNAP_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Also write logs to this file, rotated daily.
    #[arg(long, global = true, env = "CSVSNAP_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// The command to run.
    #[command(subcommand)]
    pub cmd: Command,
}

/// The command to run.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch the source dataset and replace a destination table with it.
    #[command(after_help = DESTINATION_HELP)]
    Run(run::Opt),

    /// Fetch the source dataset and print the schema we'd load it with.
    Schema(schema::Opt),

    /// Print the number of rows in a destination table.
    #[command(after_help = DESTINATION_HELP)]
    Count(count::Opt),

    /// Serve record searches, proxied to the dataset's catalog.
    Serve(serve::Opt),

    /// Update configuration.
    Config(config::Opt),
}

/// Shown after the help for commands which take a destination.
const DESTINATION_HELP: &str = r#"EXAMPLE DESTINATIONS:
    bigquery:my-project:abr.business_names
    databricks:main.abr.business_names
"#;

/// Options describing the source dataset, shared by `run` and `schema`.
#[derive(Debug, Args)]
pub struct SourceOpt {
    /// The URL of the CSV file to load.
    #[arg(long)]
    source_url: Option<Url>,

    /// The field delimiter used by the source [values: comma, tab].
    #[arg(long)]
    delimiter: Option<Delimiter>,

    /// What to do when two columns end up with the same name [values:
    /// reject, suffix].
    #[arg(long)]
    duplicate_columns: Option<DuplicateColumns>,

    /// Fail on invalid UTF-8 instead of decoding it as Latin-1.
    #[arg(long)]
    no_legacy_fallback: bool,
}

impl SourceOpt {
    /// Apply these options on top of `settings`.
    fn apply(&self, settings: &mut Settings) {
        if let Some(url) = &self.source_url {
            settings.source_url = url.clone();
        }
        if let Some(delimiter) = self.delimiter {
            settings.delimiter = delimiter;
        }
        if let Some(duplicate_columns) = self.duplicate_columns {
            settings.duplicate_columns = duplicate_columns;
        }
        if self.no_legacy_fallback {
            settings.legacy_fallback = false;
        }
    }

    /// Build a pipeline configuration from `settings` and these options.
    fn pipeline_config(&self, settings: &mut Settings) -> Result<PipelineConfig> {
        self.apply(settings);
        let mut config = PipelineConfig::new(settings.source())?;
        config.duplicate_columns = settings.duplicate_columns;
        Ok(config)
    }
}

/// Run the command specified by `opt`.
pub async fn run(config: Configuration, opt: Opt) -> Result<()> {
    match opt.cmd {
        Command::Run(command) => run::run(settings(&config)?, command).await,
        Command::Schema(command) => schema::run(settings(&config)?, command).await,
        Command::Count(command) => count::run(settings(&config)?, command).await,
        Command::Serve(command) => serve::run(settings(&config)?, command).await,
        Command::Config(command) => self::config::run(config, command).await,
    }
}

/// Resolve our settings from `config` and the environment.
fn settings(config: &Configuration) -> Result<Settings> {
    let settings = Settings::resolve(config)?;
    debug!("resolved settings: {:?}", settings);
    Ok(settings)
}

#[test]
fn parses_command_lines() {
    let opt = Opt::try_parse_from([
        "csvsnap",
        "run",
        "--delimiter",
        "tab",
        "--no-legacy-fallback",
        "databricks:main.abr.business_names",
    ])
    .unwrap();
    match opt.cmd {
        Command::Run(run) => {
            assert_eq!(run.source.delimiter, Some(Delimiter::Tab));
            assert!(run.source.no_legacy_fallback);
            assert!(run.destination.is_some());
        }
        other => panic!("unexpected command {:?}", other),
    }

    let opt =
        Opt::try_parse_from(["csvsnap", "serve", "--log-file", "/var/log/csvsnap.log"])
            .unwrap();
    assert_eq!(opt.log_file, Some(PathBuf::from("/var/log/csvsnap.log")));

    assert!(Opt::try_parse_from(["csvsnap", "count", "postgres://x"]).is_err());
    assert!(Opt::try_parse_from(["csvsnap", "--log-format", "xml", "schema"]).is_err());
}

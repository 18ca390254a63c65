//! The `schema` subcommand.

use clap::Args;

use super::SourceOpt;
use crate::common::*;
use crate::config::Settings;
use crate::pipeline::derive_from_url;

/// Schema arguments.
#[derive(Debug, Args)]
pub struct Opt {
    #[command(flatten)]
    source: SourceOpt,
}

/// Print the schema we would load the source with, as a BigQuery schema.
pub async fn run(mut settings: Settings, opt: Opt) -> Result<()> {
    let config = opt.source.pipeline_config(&mut settings)?;
    let derived = derive_from_url(&config).await?;
    println!("{}", derived.schema.to_bigquery_json()?);
    Ok(())
}

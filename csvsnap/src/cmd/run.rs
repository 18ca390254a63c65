//! The `run` subcommand.

use clap::Args;

use super::SourceOpt;
use crate::common::*;
use crate::config::Settings;
use crate::credentials::CredentialsManager;
use crate::pipeline;

/// Pipeline arguments.
#[derive(Debug, Args)]
pub struct Opt {
    #[command(flatten)]
    pub(crate) source: SourceOpt,

    /// Print the load report as JSON.
    #[arg(long)]
    json: bool,

    /// The table to replace (defaults to the `destination` setting).
    pub(crate) destination: Option<DestinationLocator>,
}

/// Fetch the source and replace the destination with it.
pub async fn run(mut settings: Settings, opt: Opt) -> Result<()> {
    let locator = opt
        .destination
        .clone()
        .or_else(|| settings.destination.clone())
        .ok_or_else(|| {
            format_err!(
                "no destination given (pass one, or set CSVSNAP_DESTINATION or destination)"
            )
        })?;
    let config = opt.source.pipeline_config(&mut settings)?;

    let credentials = CredentialsManager::new()?;
    let destination = locator
        .open(&settings, &credentials)
        .await
        .with_context(|| format!("could not open {}", locator))?;

    let report = pipeline::run(&config, destination.as_ref()).await?;
    if opt.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

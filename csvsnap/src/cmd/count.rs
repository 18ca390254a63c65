//! The `count` subcommand.

use clap::Args;

use crate::common::*;
use crate::config::Settings;
use crate::credentials::CredentialsManager;

/// Count arguments.
#[derive(Debug, Args)]
pub struct Opt {
    /// The table whose rows we should count.
    destination: DestinationLocator,
}

/// Count the rows in a destination table.
pub async fn run(settings: Settings, opt: Opt) -> Result<()> {
    let credentials = CredentialsManager::new()?;
    let destination = opt
        .destination
        .open(&settings, &credentials)
        .await
        .with_context(|| format!("could not open {}", opt.destination))?;
    let count = destination
        .row_count()
        .await
        .with_context(|| format!("could not count rows in {}", destination))?;
    println!("{}", count);
    Ok(())
}

//! The `config` subcommand.

use clap::{Args, Subcommand};

use crate::common::*;
use crate::config::{Configuration, Key};

/// Configuration-editing arguments.
#[derive(Debug, Args)]
pub struct Opt {
    /// The command to perform on the configuration key.
    #[command(subcommand)]
    command: Command,
}

/// A command that we can perform on a config key.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set a configuration key.
    Set {
        /// The key to set, like `destination` or `ckan_url`.
        key: Key,

        /// The value to store.
        value: String,
    },

    /// Remove a configuration key, so its default applies again.
    Unset {
        /// The key to remove.
        key: Key,
    },
}

/// Edit our config file.
pub async fn run(mut config: Configuration, opt: Opt) -> Result<()> {
    match &opt.command {
        Command::Set { key, value } => config.set(*key, value)?,
        Command::Unset { key } => config.unset(*key),
    }
    let path = config.path().to_owned();
    tokio::task::spawn_blocking(move || config.write())
        .await
        .context("config writer panicked")??;
    info!("updated {}", path.display());
    Ok(())
}

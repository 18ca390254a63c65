//! The `serve` subcommand.

use clap::Args;
use std::net::SocketAddr;

use crate::clouds::ckan::CkanClient;
use crate::common::*;
use crate::config::Settings;
use crate::credentials::CredentialsManager;
use crate::search::{bind_and_serve, SearchService};

/// Server arguments.
#[derive(Debug, Args)]
pub struct Opt {
    /// The address to listen on (defaults to the `listen` setting, or
    /// `0.0.0.0:$PORT`).
    #[arg(long)]
    listen: Option<SocketAddr>,
}

/// Run the search proxy until it fails.
pub async fn run(settings: Settings, opt: Opt) -> Result<()> {
    let listen = opt.listen.unwrap_or(settings.listen);

    let credentials = CredentialsManager::new()?;
    let token = match credentials.get("ckan_api_token").await {
        Ok(token) => Some(token),
        Err(err) => {
            warn!("searching without a catalog API token: {:#}", err);
            None
        }
    };
    let ckan = CkanClient::new(settings.ckan_url.clone(), token)?;
    info!(
        "proxying searches to {} (default resource {})",
        settings.ckan_url, settings.resource_id,
    );
    let service = SearchService::new(ckan, settings.resource_id);
    bind_and_serve(listen, service).await
}

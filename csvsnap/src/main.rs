//! Load a published CSV dataset into a warehouse table, and proxy searches
//! to the catalog which publishes it.

#![warn(rust_2018_idioms, unused_extern_crates, clippy::all)]

use anyhow::Result;
use clap::Parser;
use csvsnap::{cmd, config::Configuration};
use std::process;
use tracing::debug;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {}", err);
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {}", cause);
        }
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let opt = cmd::Opt::parse();
    let _log_guard = opt.log_format.init(opt.log_file.as_deref())?;
    debug!("{:?}", opt);

    let config = Configuration::try_default()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(cmd::run(config, opt))
}

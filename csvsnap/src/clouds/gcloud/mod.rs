//! Google Cloud support.

pub(crate) mod bigquery;
mod client;

pub(crate) use self::client::*;

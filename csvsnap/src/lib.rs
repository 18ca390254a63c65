//! Load a published CSV dataset into a warehouse table as a full-refresh
//! snapshot, and proxy record searches to the catalog that publishes it.
//!
//! The interesting part is [`pipeline`], which runs fetch, decode, schema
//! derivation and load strictly in that order. Each stage has its own error
//! type, and the pipeline reports which stage failed.

#![warn(rust_2018_idioms, unused_extern_crates, clippy::all)]

pub mod clouds;
pub mod cmd;
pub mod config;
pub mod credentials;
pub mod decode;
pub mod drivers;
pub mod errors;
pub mod fetch;
pub mod logging;
pub mod pipeline;
pub mod schema;
pub mod search;
pub mod source;

pub use errors::{
    DecodeError, FetchError, LoadError, LoadErrorKind, PipelineError, RowError,
    SchemaError, Stage, StageError,
};

/// Definitions included by all the files in this crate.
///
/// This forms the dialect of Rust we use for implementing the pipeline and
/// its drivers, with an emphasis on `tokio` and structured logging.
#[allow(unused_imports)]
pub(crate) mod common {
    pub(crate) use anyhow::{format_err, Context as _, Error, Result};
    pub(crate) use async_trait::async_trait;
    pub(crate) use bytes::Bytes;
    pub(crate) use tracing::{
        debug, debug_span, error, info, instrument, trace, trace_span, warn,
        Instrument,
    };
    pub(crate) use url::Url;

    pub(crate) use crate::{
        drivers::{Destination, DestinationLocator},
        errors::{
            DecodeError, FetchError, LoadError, LoadErrorKind, PipelineError,
            RowError, SchemaError, Stage, StageError,
        },
        schema::TableSchema,
        source::Delimiter,
    };
}

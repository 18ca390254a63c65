//! Interfaces to BigQuery.

use serde::{Deserialize, Serialize};
use std::{error, fmt};

use crate::common::*;
use crate::schema::ColumnSchema;

pub(crate) mod jobs;
mod load;
mod tables;

pub(crate) use self::load::*;
pub(crate) use self::tables::*;

/// The root of the BigQuery REST API.
pub(crate) const BIGQUERY_API: &str = "https://bigquery.googleapis.com";

/// A BigQuery error.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BigQueryError {
    /// The reason for this error.
    pub(crate) reason: String,

    /// If present, where this error occurred.
    pub(crate) location: Option<String>,

    /// Internal Google information about this error.
    pub(crate) debug_info: Option<String>,

    /// A human-readable description of this error.
    pub(crate) message: String,
}

impl BigQueryError {
    /// Is this a quota or rate limit error?
    pub(crate) fn is_quota(&self) -> bool {
        classify_reason(&self.reason) == LoadErrorKind::Quota
    }

    /// Did BigQuery reject the contents of our data?
    pub(crate) fn is_row_rejection(&self) -> bool {
        classify_reason(&self.reason) == LoadErrorKind::RowRejected
    }

    /// Convert this to a per-row error.
    pub(crate) fn to_row_error(&self) -> RowError {
        RowError {
            location: self.location.clone(),
            message: self.message.clone(),
        }
    }
}

/// Map a BigQuery error `reason` onto our load error kinds. Used for both job
/// errors and HTTP error details.
pub(crate) fn classify_reason(reason: &str) -> LoadErrorKind {
    match reason {
        "quotaExceeded" | "rateLimitExceeded" | "billingTierLimitExceeded" => {
            LoadErrorKind::Quota
        }
        "invalid" => LoadErrorKind::RowRejected,
        _ => LoadErrorKind::Unknown,
    }
}

impl fmt::Display for BigQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl error::Error for BigQueryError {}

/// A table schema, in the format BigQuery's REST API uses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableSchema {
    /// The fields in the table.
    pub(crate) fields: Vec<ColumnSchema>,
}

impl From<&crate::schema::TableSchema> for TableSchema {
    fn from(schema: &crate::schema::TableSchema) -> Self {
        TableSchema {
            fields: schema.columns.clone(),
        }
    }
}

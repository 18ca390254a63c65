//! Destinations we can load snapshots into.
//!
//! Every destination implements [`Destination`], which only knows how to do
//! one thing: replace a table's entire contents with new data, atomically.

use std::{fmt, str::FromStr};

use crate::common::*;
use crate::config::Settings;
use crate::credentials::CredentialsManager;

pub mod bigquery;
pub mod databricks;
#[cfg(test)]
pub(crate) mod memory;

/// A warehouse table which we can fill with a full-refresh snapshot.
#[async_trait]
pub trait Destination: fmt::Debug + fmt::Display + Send + Sync {
    /// Replace the entire contents of this table with `data`.
    ///
    /// `data` is UTF-8 delimited text whose first line is a header row
    /// matching `schema`. This must either succeed completely or leave the
    /// previous contents visible.
    async fn load_full_refresh(
        &self,
        schema: &TableSchema,
        delimiter: Delimiter,
        data: Bytes,
    ) -> Result<(), LoadError>;

    /// How many rows are currently visible in this table?
    async fn row_count(&self) -> Result<u64, LoadError>;

    /// Load `data` and report the row count the destination now shows.
    async fn load(
        &self,
        schema: &TableSchema,
        delimiter: Delimiter,
        data: Bytes,
    ) -> Result<u64, LoadError> {
        self.load_full_refresh(schema, delimiter, data).await?;
        self.row_count().await
    }
}

/// Where to load data, parsed from strings like `bigquery:p:d.t`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DestinationLocator {
    /// A BigQuery table.
    BigQuery(bigquery::TableName),
    /// A Delta table in Databricks Unity Catalog.
    Databricks(databricks::TableName),
}

impl DestinationLocator {
    /// Open a connection to this destination.
    pub async fn open(
        &self,
        settings: &Settings,
        credentials: &CredentialsManager,
    ) -> Result<Box<dyn Destination>> {
        match self {
            DestinationLocator::BigQuery(name) => Ok(Box::new(
                bigquery::BigQueryDestination::open(name.to_owned(), credentials)
                    .await?,
            )),
            DestinationLocator::Databricks(name) => Ok(Box::new(
                databricks::DatabricksDestination::open(
                    name.to_owned(),
                    settings,
                    credentials,
                )
                .await?,
            )),
        }
    }
}

impl fmt::Display for DestinationLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationLocator::BigQuery(name) => write!(f, "bigquery:{}", name),
            DestinationLocator::Databricks(name) => write!(f, "databricks:{}", name),
        }
    }
}

impl FromStr for DestinationLocator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("bigquery:") {
            Ok(DestinationLocator::BigQuery(rest.parse()?))
        } else if let Some(rest) = s.strip_prefix("databricks:") {
            Ok(DestinationLocator::Databricks(rest.parse()?))
        } else {
            Err(format_err!(
                "unknown destination {:?} (expected bigquery:PROJECT:DATASET.TABLE or databricks:CATALOG.SCHEMA.TABLE)",
                s,
            ))
        }
    }
}

#[test]
fn locators_round_trip_through_strings() {
    for s in &["bigquery:my-project:abr.business_names", "databricks:main.abr.business_names"] {
        let locator = s.parse::<DestinationLocator>().unwrap();
        assert_eq!(&locator.to_string(), s);
    }
    assert!(matches!(
        "bigquery:p:d.t".parse::<DestinationLocator>().unwrap(),
        DestinationLocator::BigQuery(_),
    ));
    assert!("postgres://localhost/db#t".parse::<DestinationLocator>().is_err());
    assert!("databricks:p:d.t".parse::<DestinationLocator>().is_err());
}

//! Loading snapshots into BigQuery.

use std::fmt;

use crate::clouds::gcloud::{bigquery, Client};
use crate::common::*;
use crate::credentials::CredentialsManager;

mod table_name;

pub use self::table_name::TableName;

/// A BigQuery table we can load into.
#[derive(Debug)]
pub struct BigQueryDestination {
    name: TableName,
    client: Client,
    labels: bigquery::jobs::Labels,
}

impl BigQueryDestination {
    /// Connect to BigQuery using our static access token.
    pub async fn open(
        name: TableName,
        credentials: &CredentialsManager,
    ) -> Result<BigQueryDestination> {
        let token = credentials.get("bigquery_access_token").await?;
        let client = Client::new(token.as_str().to_owned())?;
        let mut labels = bigquery::jobs::Labels::new();
        labels.insert("app".to_owned(), "csvsnap".to_owned());
        Ok(BigQueryDestination {
            name,
            client,
            labels,
        })
    }
}

impl fmt::Display for BigQueryDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bigquery:{}", self.name)
    }
}

#[async_trait]
impl Destination for BigQueryDestination {
    #[instrument(level = "debug", name = "bigquery::load_full_refresh", skip_all, fields(table = %self.name))]
    async fn load_full_refresh(
        &self,
        schema: &TableSchema,
        delimiter: Delimiter,
        data: Bytes,
    ) -> Result<(), LoadError> {
        bigquery::load_full_refresh(
            &self.client,
            &self.name,
            schema,
            delimiter,
            data,
            &self.labels,
        )
        .await
    }

    #[instrument(level = "debug", name = "bigquery::row_count", skip_all, fields(table = %self.name))]
    async fn row_count(&self) -> Result<u64, LoadError> {
        bigquery::row_count(&self.client, &self.name).await
    }
}

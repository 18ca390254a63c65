//! Looking up BigQuery table metadata.

use serde::Deserialize;

use super::super::{percent_encode, Client, ClientError, NoQuery};
use super::{jobs::classify_client_error, BIGQUERY_API};
use crate::common::*;
use crate::drivers::bigquery::TableName;

/// The parts of a table resource we care about.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    /// BigQuery encodes this 64-bit integer as a string.
    num_rows: Option<String>,
}

/// How many rows are visible in `name`?
///
/// A table which doesn't exist yet reports zero.
#[instrument(level = "debug", skip(client), fields(table = %name))]
pub(crate) async fn row_count(client: &Client, name: &TableName) -> Result<u64, LoadError> {
    let url = format!(
        "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}",
        BIGQUERY_API,
        percent_encode(name.project()),
        percent_encode(name.dataset()),
        percent_encode(name.table()),
    );
    match client.get::<Table, _, _>(url.as_str(), NoQuery).await {
        Ok(table) => parse_num_rows(table.num_rows.as_deref()),
        Err(ClientError::NotFound { .. }) => {
            debug!("{} does not exist yet", name);
            Ok(0)
        }
        Err(err) => Err(classify_client_error(err)),
    }
}

fn parse_num_rows(num_rows: Option<&str>) -> Result<u64, LoadError> {
    match num_rows {
        None => Ok(0),
        Some(n) => n.parse::<u64>().map_err(|err| {
            LoadError::new(
                LoadErrorKind::Unknown,
                format!("BigQuery returned invalid numRows {:?}: {}", n, err),
            )
        }),
    }
}

#[test]
fn num_rows_is_parsed_from_a_string() {
    let table: Table = serde_json::from_str(r#"{"numRows": "1"}"#).unwrap();
    assert_eq!(parse_num_rows(table.num_rows.as_deref()).unwrap(), 1);
    assert_eq!(parse_num_rows(None).unwrap(), 0);
    let err = parse_num_rows(Some("lots")).unwrap_err();
    assert_eq!(err.kind, LoadErrorKind::Unknown);
}

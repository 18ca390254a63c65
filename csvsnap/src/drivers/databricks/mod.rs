//! Loading snapshots into Delta tables on Databricks.
//!
//! We stage the data as a file in a Unity Catalog volume, and then replace
//! the table with a single `CREATE OR REPLACE TABLE ... AS SELECT` statement.
//! Delta commits that atomically, so readers see either the old snapshot or
//! the new one.

use std::fmt;

use crate::clouds::databricks::{delete_file, execute_statement, upload_file, Client};
use crate::common::*;
use crate::config::Settings;
use crate::credentials::CredentialsManager;

mod table_name;

pub use self::table_name::TableName;

/// A Databricks table we can load into.
#[derive(Debug)]
pub struct DatabricksDestination {
    name: TableName,
    client: Client,
    warehouse_id: String,
    /// A volume path like `/Volumes/main/abr/staging`.
    staging_volume: String,
}

impl DatabricksDestination {
    /// Connect to the workspace named in `settings`.
    pub async fn open(
        name: TableName,
        settings: &Settings,
        credentials: &CredentialsManager,
    ) -> Result<DatabricksDestination> {
        let host = settings.databricks_host.clone().ok_or_else(|| {
            format_err!("no Databricks host configured (set DATABRICKS_HOST or databricks_host)")
        })?;
        let warehouse_id = settings.databricks_warehouse_id.clone().ok_or_else(|| {
            format_err!(
                "no SQL warehouse configured (set DATABRICKS_WAREHOUSE_ID or databricks_warehouse_id)"
            )
        })?;
        let staging_volume = settings
            .databricks_staging_volume
            .clone()
            .ok_or_else(|| {
                format_err!(
                    "no staging volume configured (set DATABRICKS_STAGING_VOLUME or databricks_staging_volume)"
                )
            })?;
        if !staging_volume.starts_with("/Volumes/") {
            return Err(format_err!(
                "staging volume {:?} should look like /Volumes/CATALOG/SCHEMA/VOLUME",
                staging_volume,
            ));
        }
        let token = credentials.get("databricks_token").await?;
        let client = Client::new(host, token.as_str().to_owned())?;
        Ok(DatabricksDestination {
            name,
            client,
            warehouse_id,
            staging_volume: staging_volume.trim_end_matches('/').to_owned(),
        })
    }

    /// A fresh path to stage one load.
    fn staging_path(&self) -> String {
        format!(
            "{}/csvsnap_{}.csv",
            self.staging_volume,
            uuid::Uuid::new_v4().simple(),
        )
    }
}

impl fmt::Display for DatabricksDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "databricks:{}", self.name)
    }
}

#[async_trait]
impl Destination for DatabricksDestination {
    #[instrument(level = "debug", name = "databricks::load_full_refresh", skip_all, fields(table = %self.name))]
    async fn load_full_refresh(
        &self,
        schema: &TableSchema,
        delimiter: Delimiter,
        data: Bytes,
    ) -> Result<(), LoadError> {
        let path = self.staging_path();
        upload_file(&self.client, &path, data).await?;

        let sql = replace_table_sql(&self.name, schema, delimiter, &path);
        let result = execute_statement(&self.client, &self.warehouse_id, &sql).await;

        // Clean up whether or not the load worked.
        if let Err(err) = delete_file(&self.client, &path).await {
            warn!("could not delete staged file {}: {:#}", path, err);
        }
        result?;
        info!("replaced {}", self.name);
        Ok(())
    }

    #[instrument(level = "debug", name = "databricks::row_count", skip_all, fields(table = %self.name))]
    async fn row_count(&self) -> Result<u64, LoadError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.name.quoted());
        let resp = match execute_statement(&self.client, &self.warehouse_id, &sql).await {
            Ok(resp) => resp,
            Err(err) if err.detail.contains("TABLE_OR_VIEW_NOT_FOUND") => {
                debug!("{} does not exist yet", self.name);
                return Ok(0);
            }
            Err(err) => return Err(err),
        };
        let count = resp.first_value().ok_or_else(|| {
            LoadError::new(LoadErrorKind::Unknown, "COUNT(*) returned no rows")
        })?;
        count.parse::<u64>().map_err(|err| {
            LoadError::new(
                LoadErrorKind::Unknown,
                format!("could not parse row count {:?}: {}", count, err),
            )
        })
    }
}

/// Generate SQL which atomically replaces `name` with the contents of the
/// staged file at `path`.
///
/// We pass an explicit schema so nothing is inferred, and `FAILFAST` so a
/// single malformed row fails the whole statement.
fn replace_table_sql(
    name: &TableName,
    schema: &TableSchema,
    delimiter: Delimiter,
    path: &str,
) -> String {
    let select_list = schema
        .column_names()
        .map(|column| column.quoted().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let ddl = schema
        .columns
        .iter()
        .map(|column| format!("{} {}", column.name.quoted(), column.data_type))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "CREATE OR REPLACE TABLE {table} AS\nSELECT {select_list}\nFROM read_files(\n  {path},\n  format => 'csv',\n  header => true,\n  sep => {sep},\n  multiLine => true,\n  mode => 'FAILFAST',\n  schema => {ddl}\n)",
        table = name.quoted(),
        select_list = select_list,
        path = sql_string(path),
        sep = sql_string(delimiter.as_str()),
        ddl = sql_string(&ddl),
    )
}

/// Quote `s` as a Databricks SQL string literal.
fn sql_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use tokio::sync::mpsc;

    use super::*;
    use crate::fetch::test_server::{self, Reply};
    use crate::schema::{derive, DuplicateColumns, StringOnlySchema};

    /// A destination whose workspace is a local server giving `replies`.
    async fn destination(
        replies: Vec<Reply>,
    ) -> (DatabricksDestination, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (url, requests) = test_server::serve_replies(replies).await;
        let client = Client::new(url.join("/").unwrap(), "dapi".to_owned()).unwrap();
        let dest = DatabricksDestination {
            name: "main.abr.business_names".parse().unwrap(),
            client,
            warehouse_id: "wh1".to_owned(),
            staging_volume: "/Volumes/main/abr/staging".to_owned(),
        };
        (dest, requests)
    }

    /// Wait for the next request, and return its method, its path and the raw
    /// request.
    async fn next_request(
        requests: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> (String, String, Vec<u8>) {
        let request = requests.recv().await.unwrap();
        let text = String::from_utf8_lossy(&request).into_owned();
        let mut words = text.lines().next().unwrap().split_whitespace();
        let method = words.next().unwrap().to_owned();
        let path = words.next().unwrap().to_owned();
        (method, path, request)
    }

    fn statement(state: &str) -> serde_json::Value {
        serde_json::json!({ "statement_id": "01ef", "status": { "state": state } })
    }

    fn failed_statement(message: &str) -> serde_json::Value {
        serde_json::json!({
            "statement_id": "01ef",
            "status": {
                "state": "FAILED",
                "error": { "error_code": "BAD_REQUEST", "message": message }
            }
        })
    }

    fn one_column_schema() -> TableSchema {
        derive(
            &["Name".to_owned()],
            &StringOnlySchema,
            DuplicateColumns::Reject,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn rejected_load_still_deletes_staged_file() {
        let (dest, mut requests) = destination(vec![
            Reply::empty(),
            Reply::json(failed_statement(
                "[MALFORMED_RECORD_IN_PARSING] Malformed records are detected in record parsing",
            )),
            Reply::empty(),
        ])
        .await;

        let err = dest
            .load_full_refresh(
                &one_column_schema(),
                Delimiter::Comma,
                Bytes::from_static(b"Name\nAcme\n"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::RowRejected);
        assert_eq!(err.row_errors.len(), 1);

        let (method, put_path, put_request) = next_request(&mut requests).await;
        assert_eq!(method, "PUT");
        assert!(
            put_path.starts_with("/api/2.0/fs/files/Volumes/main/abr/staging/csvsnap_")
        );
        assert!(put_path.ends_with(".csv?overwrite=true"));
        assert!(put_request.ends_with(b"Name\nAcme\n"));

        let (method, path, post_request) = next_request(&mut requests).await;
        assert_eq!(method, "POST");
        assert_eq!(path, "/api/2.0/sql/statements");
        let post_text = String::from_utf8_lossy(&post_request);
        assert!(post_text.contains("CREATE OR REPLACE TABLE"));
        assert!(post_text.contains("\"warehouse_id\":\"wh1\""));

        let (method, path, _) = next_request(&mut requests).await;
        assert_eq!(method, "DELETE");
        assert_eq!(Some(path.as_str()), put_path.strip_suffix("?overwrite=true"));
    }

    #[tokio::test]
    async fn failed_cleanup_does_not_fail_the_load() {
        let (dest, mut requests) = destination(vec![
            Reply::empty(),
            Reply::json(statement("SUCCEEDED")),
            Reply {
                status: "500 Internal Server Error",
                content_type: "text/plain",
                body: b"oops".to_vec(),
            },
        ])
        .await;

        dest.load_full_refresh(
            &one_column_schema(),
            Delimiter::Tab,
            Bytes::from_static(b"Name\nAcme\n"),
        )
        .await
        .unwrap();

        let methods = [
            next_request(&mut requests).await.0,
            next_request(&mut requests).await.0,
            next_request(&mut requests).await.0,
        ];
        assert_eq!(methods, ["PUT", "POST", "DELETE"]);
    }

    #[tokio::test]
    async fn row_count_polls_until_the_statement_finishes() {
        let (dest, mut requests) = destination(vec![
            Reply::json(statement("PENDING")),
            Reply::json(serde_json::json!({
                "statement_id": "01ef",
                "status": { "state": "SUCCEEDED" },
                "result": { "data_array": [["2"]] }
            })),
        ])
        .await;

        assert_eq!(dest.row_count().await.unwrap(), 2);

        let (method, path, post_request) = next_request(&mut requests).await;
        assert_eq!(
            (method.as_str(), path.as_str()),
            ("POST", "/api/2.0/sql/statements"),
        );
        assert!(String::from_utf8_lossy(&post_request).contains("SELECT COUNT(*)"));
        let (method, path, _) = next_request(&mut requests).await;
        assert_eq!(
            (method.as_str(), path.as_str()),
            ("GET", "/api/2.0/sql/statements/01ef"),
        );
    }

    #[tokio::test]
    async fn missing_table_has_no_rows() {
        let (dest, _requests) = destination(vec![Reply::json(failed_statement(
            "[TABLE_OR_VIEW_NOT_FOUND] The table or view `main`.`abr`.`business_names` cannot be found.",
        ))])
        .await;
        assert_eq!(dest.row_count().await.unwrap(), 0);
    }

    #[test]
    fn replace_sql_uses_an_explicit_schema() {
        let name = "main.abr.business_names".parse::<TableName>().unwrap();
        let schema = derive(
            &["Name".to_owned(), "BN_ABN".to_owned(), "Owner's Name".to_owned()],
            &StringOnlySchema,
            DuplicateColumns::Reject,
        )
        .unwrap();
        let sql = replace_table_sql(
            &name,
            &schema,
            Delimiter::Tab,
            "/Volumes/main/abr/staging/csvsnap_1.csv",
        );
        assert_eq!(
            sql,
            "CREATE OR REPLACE TABLE `main`.`abr`.`business_names` AS
SELECT `Name`, `BN_ABN`, `Owner's_Name`
FROM read_files(
  '/Volumes/main/abr/staging/csvsnap_1.csv',
  format => 'csv',
  header => true,
  sep => '\\t',
  multiLine => true,
  mode => 'FAILFAST',
  schema => '`Name` STRING, `BN_ABN` STRING, `Owner\\'s_Name` STRING'
)",
        );
    }

    #[test]
    fn sql_strings_are_escaped() {
        assert_eq!(sql_string("a'b\\c"), r"'a\'b\\c'");
        assert_eq!(sql_string(","), "','");
    }
}

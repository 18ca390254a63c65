//! Running SQL through the Statement Execution API.

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};

use super::{classify_error, Client, DatabricksError};
use crate::common::*;

/// The longest we'll sleep between polls.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(16);

/// A request to execute a statement.
#[derive(Debug, Serialize)]
struct ExecuteStatement<'a> {
    warehouse_id: &'a str,
    statement: &'a str,
    /// How long the server should wait before handing us a statement ID to
    /// poll. At most 50s.
    wait_timeout: &'static str,
    on_wait_timeout: &'static str,
    format: &'static str,
    disposition: &'static str,
}

/// A statement, as the API reports it.
#[derive(Debug, Deserialize)]
pub(crate) struct StatementResponse {
    pub(crate) statement_id: String,
    pub(crate) status: StatementStatus,
    #[serde(default)]
    pub(crate) result: Option<StatementResult>,
}

/// The status of a statement.
#[derive(Debug, Deserialize)]
pub(crate) struct StatementStatus {
    pub(crate) state: StatementState,
    #[serde(default)]
    pub(crate) error: Option<DatabricksError>,
}

/// Statement lifecycle states.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum StatementState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Closed,
}

impl StatementState {
    fn is_done(self) -> bool {
        !matches!(self, StatementState::Pending | StatementState::Running)
    }
}

/// Inline result data in `JSON_ARRAY` format. Every value arrives as a
/// string or null.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct StatementResult {
    #[serde(default)]
    pub(crate) data_array: Vec<Vec<Option<String>>>,
}

impl StatementResponse {
    /// Turn a finished statement into either itself or a [`LoadError`].
    fn check_for_error(self) -> Result<StatementResponse, LoadError> {
        match self.status.state {
            StatementState::Succeeded => Ok(self),
            StatementState::Failed => {
                let err = self.status.error.unwrap_or_else(|| DatabricksError {
                    status: None,
                    error_code: String::new(),
                    message: "statement failed without an error message".to_owned(),
                });
                Err(err.to_load_error())
            }
            state => Err(LoadError::new(
                LoadErrorKind::Unknown,
                format!("statement {} ended in state {:?}", self.statement_id, state),
            )),
        }
    }

    /// Get the first column of the first row.
    pub(crate) fn first_value(&self) -> Option<&str> {
        self.result
            .as_ref()?
            .data_array
            .first()?
            .first()?
            .as_deref()
    }
}

/// Run `statement` on `warehouse_id` and wait for it to finish.
#[instrument(level = "debug", skip(client, statement))]
pub(crate) async fn execute_statement(
    client: &Client,
    warehouse_id: &str,
    statement: &str,
) -> Result<StatementResponse, LoadError> {
    debug!("executing SQL: {}", statement);
    let url = client
        .url(["api", "2.0", "sql", "statements"])
        .map_err(|err| classify_error(&err))?;
    let request = ExecuteStatement {
        warehouse_id,
        statement,
        wait_timeout: "30s",
        on_wait_timeout: "CONTINUE",
        format: "JSON_ARRAY",
        disposition: "INLINE",
    };
    let mut resp = client
        .post::<StatementResponse, _>(&url, &request)
        .await
        .map_err(|err| classify_error(&err))?;

    let poll_url = client
        .url(["api", "2.0", "sql", "statements", resp.statement_id.as_str()])
        .map_err(|err| classify_error(&err))?;
    let mut sleep_duration = Duration::from_secs(2);
    while !resp.status.state.is_done() {
        sleep(sleep_duration).await;
        if sleep_duration < MAX_POLL_INTERVAL {
            sleep_duration *= 2;
        }
        trace!("polling {}", poll_url);
        resp = client
            .get::<StatementResponse>(&poll_url)
            .await
            .map_err(|err| classify_error(&err))?;
    }
    resp.check_for_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: serde_json::Value) -> StatementResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn count_is_read_from_the_first_cell() {
        let resp = response(serde_json::json!({
            "statement_id": "01ef",
            "status": { "state": "SUCCEEDED" },
            "manifest": { "format": "JSON_ARRAY" },
            "result": { "chunk_index": 0, "data_array": [["1"]] }
        }));
        let resp = resp.check_for_error().unwrap();
        assert_eq!(resp.first_value(), Some("1"));
    }

    #[test]
    fn failed_statements_become_load_errors() {
        let resp = response(serde_json::json!({
            "statement_id": "01ef",
            "status": {
                "state": "FAILED",
                "error": {
                    "error_code": "BAD_REQUEST",
                    "message": "[MALFORMED_RECORD_IN_PARSING] Malformed records are detected in record parsing"
                }
            }
        }));
        let err = resp.check_for_error().unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::RowRejected);
    }

    #[test]
    fn canceled_statements_are_errors() {
        let resp = response(serde_json::json!({
            "statement_id": "01ef",
            "status": { "state": "CANCELED" }
        }));
        assert!(resp.status.state.is_done());
        let err = resp.check_for_error().unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::Unknown);
    }
}

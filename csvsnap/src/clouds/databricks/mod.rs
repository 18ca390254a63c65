//! Databricks REST APIs: the Files API for staging data in a Unity Catalog
//! volume, and the Statement Execution API for running SQL on a warehouse.

use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{error, fmt};

use crate::clouds::{original_http_error, response_claims_to_be_json};
use crate::common::*;

mod files;
mod statements;

pub(crate) use self::files::*;
pub(crate) use self::statements::*;

/// An error returned by a Databricks REST API.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct DatabricksError {
    /// The HTTP status, if this came from an HTTP error response.
    #[serde(skip)]
    pub(crate) status: Option<u16>,

    /// A machine-readable code like `RESOURCE_EXHAUSTED`.
    #[serde(default)]
    pub(crate) error_code: String,

    /// A human-readable message.
    #[serde(default)]
    pub(crate) message: String,
}

impl DatabricksError {
    /// Was this a quota or rate limit error?
    pub(crate) fn is_quota(&self) -> bool {
        self.status == Some(429)
            || matches!(
                self.error_code.as_str(),
                "RESOURCE_EXHAUSTED" | "REQUEST_LIMIT_EXCEEDED" | "QUOTA_EXCEEDED"
            )
            || self.message.to_ascii_lowercase().contains("quota")
    }

    /// Did Databricks reject some of our data?
    pub(crate) fn is_row_rejection(&self) -> bool {
        let message = self.message.to_ascii_uppercase();
        [
            "MALFORMED",
            "BAD_RECORD",
            "BAD RECORD",
            "CANNOT_PARSE",
            "CAST_INVALID_INPUT",
        ]
        .iter()
        .any(|needle| message.contains(needle))
    }

    /// Convert this to a [`LoadError`].
    pub(crate) fn to_load_error(&self) -> LoadError {
        let kind = if self.is_quota() {
            LoadErrorKind::Quota
        } else if self.is_row_rejection() {
            LoadErrorKind::RowRejected
        } else {
            LoadErrorKind::Unknown
        };
        let err = LoadError::new(kind, self.to_string());
        if kind == LoadErrorKind::RowRejected {
            err.with_row_errors(vec![RowError {
                location: None,
                message: self.message.clone(),
            }])
        } else {
            err
        }
    }
}

impl fmt::Display for DatabricksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Databricks error")?;
        if let Some(status) = self.status {
            write!(f, " {}", status)?;
        }
        if !self.error_code.is_empty() {
            write!(f, " {}", self.error_code)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl error::Error for DatabricksError {}

/// Classify an error from one of our Databricks calls.
pub(crate) fn classify_error(err: &Error) -> LoadError {
    if let Some(db_err) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<DatabricksError>())
    {
        let mut load_err = db_err.to_load_error();
        load_err.detail = format!("{:#}", err);
        load_err
    } else if original_http_error(err).is_some() {
        LoadError::transport(err)
    } else {
        LoadError::new(LoadErrorKind::Unknown, format!("{:#}", err))
    }
}

/// A client for a single Databricks workspace.
#[derive(Clone)]
pub(crate) struct Client {
    /// The workspace URL, like `https://dbc-1234.cloud.databricks.com/`.
    host: Url,
    /// A personal access token or similar bearer token.
    token: String,
    client: reqwest::Client,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.host.as_str())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client for the workspace at `host`.
    pub(crate) fn new(host: Url, token: String) -> Result<Client> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("csvsnap/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("could not build HTTP client")?;
        Ok(Client {
            host,
            token,
            client,
        })
    }

    /// Build an API URL from path segments, escaping each one.
    pub(crate) fn url<'a, I>(&self, segments: I) -> Result<Url>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut url = self.host.clone();
        url.path_segments_mut()
            .map_err(|_| format_err!("cannot use {} as a base URL", self.host))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET `url` and deserialize the JSON response.
    #[instrument(level = "trace", skip(self), fields(url = %url))]
    pub(crate) async fn get<Output>(&self, url: &Url) -> Result<Output>
    where
        Output: fmt::Debug + DeserializeOwned,
    {
        trace!("GET {}", url);
        let http_resp = self
            .client
            .get(url.as_str())
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("could not GET {}", url))?;
        self.handle_json_response("GET", url, http_resp).await
    }

    /// POST `body` as JSON to `url` and deserialize the JSON response.
    #[instrument(level = "trace", skip(self, body), fields(url = %url))]
    pub(crate) async fn post<Output, Body>(&self, url: &Url, body: &Body) -> Result<Output>
    where
        Output: fmt::Debug + DeserializeOwned,
        Body: fmt::Debug + Serialize,
    {
        trace!("POST {} {:?}", url, body);
        let http_resp = self
            .client
            .post(url.as_str())
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("could not POST {}", url))?;
        self.handle_json_response("POST", url, http_resp).await
    }

    /// PUT raw bytes to `url`, ignoring any response body.
    #[instrument(level = "trace", skip(self, data), fields(url = %url, len = data.len()))]
    pub(crate) async fn put_bytes(&self, url: &Url, data: Bytes) -> Result<()> {
        let http_resp = self
            .client
            .put(url.as_str())
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .with_context(|| format!("could not PUT {}", url))?;
        self.check_status("PUT", url, http_resp).await
    }

    /// DELETE `url`, ignoring any response body.
    #[instrument(level = "trace", skip(self), fields(url = %url))]
    pub(crate) async fn delete(&self, url: &Url) -> Result<()> {
        let http_resp = self
            .client
            .delete(url.as_str())
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("could not DELETE {}", url))?;
        self.check_status("DELETE", url, http_resp).await
    }

    /// Deserialize a successful response, or turn it into an error.
    async fn handle_json_response<Output>(
        &self,
        method: &str,
        url: &Url,
        http_resp: reqwest::Response,
    ) -> Result<Output>
    where
        Output: fmt::Debug + DeserializeOwned,
    {
        if http_resp.status().is_success() {
            let resp = http_resp.json::<Output>().await.with_context(|| {
                format!("error fetching JSON response from {}", url)
            })?;
            trace!("{} returned {:?}", method, resp);
            Ok(resp)
        } else {
            Err(self.handle_error(method, url, http_resp).await)
        }
    }

    /// Succeed on a 2xx status, or turn the response into an error.
    async fn check_status(
        &self,
        method: &str,
        url: &Url,
        http_resp: reqwest::Response,
    ) -> Result<()> {
        if http_resp.status().is_success() {
            Ok(())
        } else {
            Err(self.handle_error(method, url, http_resp).await)
        }
    }

    /// Handle an HTTP error response.
    async fn handle_error(
        &self,
        method: &str,
        url: &Url,
        http_resp: reqwest::Response,
    ) -> Error {
        let status = http_resp.status();
        let should_parse_as_json = response_claims_to_be_json(&http_resp);
        let err_body = match http_resp.bytes().await {
            Ok(err_body) => err_body,
            Err(err) => {
                return Error::new(err)
                    .context(format!("error fetching error response from {}", url))
            }
        };

        let mut db_err = if should_parse_as_json {
            serde_json::from_slice::<DatabricksError>(&err_body).ok()
        } else {
            None
        }
        .unwrap_or_else(|| DatabricksError {
            status: None,
            error_code: String::new(),
            message: String::from_utf8_lossy(&err_body).trim().to_owned(),
        });
        db_err.status = Some(status.as_u16());
        if db_err.message.is_empty() {
            db_err.message = status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_owned();
        }
        if status == StatusCode::NOT_FOUND {
            debug!("{} {} returned 404", method, url);
        }
        Error::new(db_err).context(format!("{} error {}", method, url))
    }
}

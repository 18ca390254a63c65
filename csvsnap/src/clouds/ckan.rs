//! A client for the CKAN open-data catalog's `datastore_search` action.

use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{error, fmt};

use crate::common::*;
use crate::credentials::Token;

/// A `datastore_search` request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatastoreSearch {
    pub resource_id: String,
    /// Full-text query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// Exact-match filters on field values.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub filters: Map<String, Value>,
    pub limit: u64,
}

/// The envelope CKAN wraps around every action response.
#[derive(Debug, Deserialize)]
struct ActionResponse {
    success: bool,
    #[serde(default)]
    result: Option<SearchResult>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    records: Vec<Value>,
}

/// An error reported by CKAN itself.
#[derive(Debug)]
pub struct CkanError {
    /// The HTTP status CKAN used.
    pub status: u16,
    /// The `error` object from the response, if there was one.
    pub error: Option<Value>,
}

impl fmt::Display for CkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CKAN error {}", self.status)?;
        if let Some(error) = &self.error {
            match error.get("message").and_then(Value::as_str) {
                Some(message) => write!(f, ": {}", message)?,
                None => write!(f, ": {}", error)?,
            }
        }
        Ok(())
    }
}

impl error::Error for CkanError {}

/// A client for one CKAN instance.
#[derive(Clone)]
pub struct CkanClient {
    /// The root of the catalog, like `https://www.data.gov.au/data/`.
    base: Url,
    token: Option<Token>,
    client: reqwest::Client,
}

impl fmt::Debug for CkanClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CkanClient")
            .field("base", &self.base.as_str())
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

impl CkanClient {
    /// Create a client for the catalog at `base`. Public datasets can be
    /// searched without a token.
    pub fn new(base: Url, token: Option<Token>) -> Result<CkanClient> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("csvsnap/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("could not build HTTP client")?;
        Ok(CkanClient {
            base,
            token,
            client,
        })
    }

    /// The URL of an action.
    fn action_url(&self, action: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| format_err!("cannot use {} as a base URL", self.base))?
            .pop_if_empty()
            .extend(&["api", "3", "action", action]);
        Ok(url)
    }

    /// Search the records of a datastore resource.
    #[instrument(level = "debug", skip(self))]
    pub async fn datastore_search(&self, search: &DatastoreSearch) -> Result<Vec<Value>> {
        let url = self.action_url("datastore_search")?;
        let mut req = self.client.post(url.as_str()).json(search);
        if let Some(token) = &self.token {
            // CKAN wants the bare token, not `Bearer ...`.
            req = req.header(AUTHORIZATION, token.as_str());
        }
        let http_resp = req
            .send()
            .await
            .with_context(|| format!("could not POST {}", url))?;
        let status = http_resp.status();
        let body = http_resp
            .bytes()
            .await
            .with_context(|| format!("error reading response from {}", url))?;

        // CKAN usually describes errors in the same JSON envelope it uses for
        // success, whatever the status.
        let resp = match serde_json::from_slice::<ActionResponse>(&body) {
            Ok(resp) => resp,
            Err(err) if status.is_success() => {
                return Err(Error::new(err)
                    .context(format!("could not parse response from {}", url)))
            }
            Err(_) => {
                return Err(Error::new(CkanError {
                    status: status.as_u16(),
                    error: Some(Value::String(
                        String::from_utf8_lossy(&body).trim().to_owned(),
                    )),
                })
                .context(format!("POST error {}", url)))
            }
        };
        debug!("full CKAN response: {}", String::from_utf8_lossy(&body));
        if !status.is_success() || !resp.success {
            return Err(Error::new(CkanError {
                status: status.as_u16(),
                error: resp.error,
            })
            .context(format!("POST error {}", url)));
        }
        let records = resp.result.map(|r| r.records).unwrap_or_default();
        info!("CKAN search returned {} records", records.len());
        Ok(records)
    }
}

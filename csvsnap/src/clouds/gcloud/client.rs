//! A Google Cloud REST client.

use bytes::{BufMut, BytesMut};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{
    self,
    header::{HeaderValue, CONTENT_TYPE},
    IntoUrl, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{error, fmt};

use crate::clouds::response_claims_to_be_json;
use crate::common::*;

/// An empty `GET` query.
#[derive(Debug, Serialize)]
pub(crate) struct NoQuery;

/// An HTTP client error. We break out a few specified statuses our caller might
/// care about.
#[derive(Debug)]
pub(crate) enum ClientError {
    /// The resource at URL was not found.
    NotFound { method: String, url: Url },
    /// Another error occured. We don't currently care about the details.
    Other(Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NotFound { method, url } => {
                write!(f, "cannot {} {}: Not Found", method, url)
            }
            ClientError::Other(err) => write!(f, "{:#}", err),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ClientError::NotFound { .. } => None,
            ClientError::Other(err) => err.source(),
        }
    }
}

impl From<Error> for ClientError {
    fn from(err: Error) -> Self {
        ClientError::Other(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Other(err.into())
    }
}

impl ClientError {
    /// Convert into a plain `Error`, keeping the original error chain.
    pub(crate) fn into_error(self) -> Error {
        match self {
            ClientError::Other(err) => err,
            err @ ClientError::NotFound { .. } => Error::new(err),
        }
    }
}

/// A Google Cloud REST client using a static OAuth2 access token.
///
/// We never retry. A failed request fails the whole load, and the caller can
/// run the pipeline again.
#[derive(Clone)]
pub(crate) struct Client {
    /// Our bearer token.
    token: String,

    /// Our HTTP client.
    client: reqwest::Client,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print our token.
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Create a new Google Cloud client.
    pub(crate) fn new(token: String) -> Result<Client> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("csvsnap/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("could not build HTTP client")?;
        Ok(Client { token, client })
    }

    /// Make an HTTP GET request with the specified URL and query parameters,
    /// and deserialize the result.
    #[instrument(level = "trace", skip(self))]
    pub(crate) async fn get<Output, U, Query>(
        &self,
        url: U,
        query: Query,
    ) -> Result<Output, ClientError>
    where
        Output: fmt::Debug + DeserializeOwned,
        U: IntoUrl + fmt::Debug,
        Query: fmt::Debug + Serialize,
    {
        let url = build_url(url, query)?;
        trace!("GET {}", url);
        let http_resp = self
            .client
            .get(url.as_str())
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("could not GET {}", url))?;
        self.handle_response("GET", &url, http_resp).await
    }

    /// Make a `multipart/related` upload: JSON metadata followed by media.
    ///
    /// This is how Google's upload endpoints accept a resource description
    /// and its data in a single request.
    #[instrument(level = "trace", skip(self, metadata, media), fields(media_len = media.len()))]
    pub(crate) async fn post_related<Output, U, Query, Metadata>(
        &self,
        url: U,
        query: Query,
        metadata: Metadata,
        media: Bytes,
    ) -> Result<Output, ClientError>
    where
        Output: fmt::Debug + DeserializeOwned,
        U: IntoUrl + fmt::Debug,
        Query: fmt::Debug + Serialize,
        Metadata: fmt::Debug + Serialize,
    {
        let url = build_url(url, query)?;
        trace!("POST {} {:?} with {} bytes", url, metadata, media.len());
        let boundary = format!("csvsnap_{}", uuid::Uuid::new_v4().simple());
        let body = related_body(&boundary, &serde_json::to_vec(&metadata)?, &media);
        let content_type =
            HeaderValue::from_str(&format!("multipart/related; boundary={}", boundary))
                .context("invalid multipart boundary")?;
        let http_resp = self
            .client
            .post(url.as_str())
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .with_context(|| format!("could not POST {}", url))?;
        self.handle_response("POST", &url, http_resp).await
    }

    /// Handle an HTTP response.
    async fn handle_response<Output>(
        &self,
        method: &str,
        url: &Url,
        http_resp: reqwest::Response,
    ) -> Result<Output, ClientError>
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

    /// Handle an HTTP error response.
    async fn handle_error(
        &self,
        method: &str,
        url: &Url,
        http_resp: reqwest::Response,
    ) -> ClientError {
        // Return 404 Not Found as a special case.
        if http_resp.status() == StatusCode::NOT_FOUND {
            return ClientError::NotFound {
                method: method.to_owned(),
                url: url.to_owned(),
            };
        }

        // Decide if we should even try to parse this response as JSON before we
        // consume our http_resp.
        let should_parse_as_json = response_claims_to_be_json(&http_resp);

        // Fetch the error body.
        let err_body_result = http_resp
            .bytes()
            .await
            .with_context(|| format!("error fetching error response from {}", url));
        let err_body = match err_body_result {
            Ok(err_body) => err_body,
            Err(err) => return err.into(),
        };

        // Try to return a nice JSON error.
        if should_parse_as_json {
            if let Ok(resp) = serde_json::from_slice::<ErrorResponse>(&err_body) {
                trace!("{} error {:?}", method, resp);
                let err: Error = resp.error.into();
                return err.context(format!("{} error {}", method, url)).into();
            }
        }

        // Something in between us and Google returned an error page, so just
        // report whatever we have.
        let raw_err = String::from_utf8_lossy(&err_body);
        trace!(
            "{} {}: expected JSON describing error, but got {:?}",
            method,
            url,
            raw_err,
        );
        let err = format_err!("expected JSON describing error, but got {:?}", raw_err);
        err.context(format!("{} error {}", method, url)).into()
    }
}

/// Construct a URL from something we can convert to URL, and something that we
/// can serialize as a query string.
fn build_url<U, Query>(url: U, query: Query) -> Result<Url>
where
    U: IntoUrl,
    Query: fmt::Debug + Serialize,
{
    let mut url = url.into_url().context("could not parse URL")?;
    let query_str = serde_urlencoded::to_string(&query)?;
    if !query_str.is_empty() {
        url.set_query(Some(&query_str));
    }
    Ok(url)
}

/// Build a two-part `multipart/related` body.
fn related_body(boundary: &str, metadata: &[u8], media: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(metadata.len() + media.len() + 256);
    body.put_slice(format!("--{}\r\n", boundary).as_bytes());
    body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.put_slice(metadata);
    body.put_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.put_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.put_slice(media);
    body.put_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body.freeze()
}

/// A Google Cloud error response.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    /// The actual error.
    error: GCloudError,
}

/// Information about a GCloud error.
#[derive(Debug, Deserialize)]
pub(crate) struct GCloudError {
    pub(crate) code: i32,
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) errors: Vec<ErrorDetail>,
}

impl fmt::Display for GCloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Google Cloud error: {} {}", self.code, self.message)
    }
}

impl error::Error for GCloudError {}

/// Details about an individial GCloud error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub(crate) reason: String,
    pub(crate) message: String,
    pub(crate) location: Option<String>,
}

/// Percent-encode a string for use as a URL path component.
pub(crate) fn percent_encode(s: &str) -> impl fmt::Display + '_ {
    utf8_percent_encode(s, NON_ALPHANUMERIC)
}

/// Given an `Error`, look to see if it's a wrapper around `GCloudError`, and
/// if so, return the original error. Otherwise return `None`.
pub(crate) fn original_gcloud_error(err: &Error) -> Option<&GCloudError> {
    err.chain().find_map(|cause| cause.downcast_ref::<GCloudError>())
}

#[test]
fn related_body_has_both_parts() {
    let body = related_body("XYZ", br#"{"a":1}"#, b"Name\nAcme\n");
    let expected = "--XYZ\r\n\
        Content-Type: application/json; charset=UTF-8\r\n\r\n\
        {\"a\":1}\r\n\
        --XYZ\r\n\
        Content-Type: application/octet-stream\r\n\r\n\
        Name\nAcme\n\r\n\
        --XYZ--\r\n";
    assert_eq!(std::str::from_utf8(&body).unwrap(), expected);
}

#[test]
fn build_url_adds_query() {
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Upload {
        upload_type: &'static str,
    }
    let url = build_url(
        "https://bigquery.googleapis.com/upload/bigquery/v2/projects/p/jobs",
        Upload {
            upload_type: "multipart",
        },
    )
    .unwrap();
    assert_eq!(
        url.as_str(),
        "https://bigquery.googleapis.com/upload/bigquery/v2/projects/p/jobs?uploadType=multipart",
    );
    let url = build_url("https://example.com/x", NoQuery).unwrap();
    assert_eq!(url.query(), None);
}

//! A tiny HTTP service which proxies record searches to a CKAN catalog.
//!
//! There's exactly one route, `POST /search`, which takes
//! `{"query": ..., "filters": {...}, "limit": 5, "resource_id": ...}` and
//! returns the matching records as a JSON array.

use http::{header, HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::{body::Body, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::{convert::Infallible, error, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;

use crate::clouds::ckan::{CkanClient, DatastoreSearch};
use crate::common::*;

/// How many records to return if the caller doesn't say.
const DEFAULT_LIMIT: u64 = 5;

/// The largest request body we'll read.
const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// The body of a search request.
#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    filters: Option<Map<String, Value>>,
    #[serde(default)]
    limit: Option<u64>,
    #[serde(default)]
    resource_id: Option<String>,
}

/// Our search service. Holds no per-request state.
#[derive(Debug)]
pub struct SearchService {
    ckan: CkanClient,
    /// The resource to search when the request doesn't name one.
    resource_id: String,
}

impl SearchService {
    pub fn new(ckan: CkanClient, resource_id: String) -> SearchService {
        SearchService { ckan, resource_id }
    }

    /// Handle a request, given its method, path and complete body.
    #[instrument(level = "debug", skip(self, body))]
    pub(crate) async fn handle(
        &self,
        method: &Method,
        path: &str,
        body: &[u8],
    ) -> (StatusCode, Value) {
        if *method != Method::POST || path != "/search" {
            return (StatusCode::NOT_FOUND, json!({ "error": "Not Found" }));
        }

        let search = match self.parse_search(body) {
            Ok(search) => search,
            Err(response) => return response,
        };
        info!(
            "searching CKAN: resource_id={:?} q={:?} filters={} limit={}",
            search.resource_id,
            search.q,
            serde_json::Value::Object(search.filters.clone()),
            search.limit,
        );

        match self.ckan.datastore_search(&search).await {
            Ok(records) => (StatusCode::OK, Value::Array(records)),
            Err(err) => {
                error!("error in /search: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "exception": format!("An unexpected error occurred: {:#}", err) }),
                )
            }
        }
    }

    /// Validate a request body and turn it into a CKAN search.
    fn parse_search(&self, body: &[u8]) -> Result<DatastoreSearch, (StatusCode, Value)> {
        let missing_payload = || {
            warn!("search request is missing its JSON payload");
            (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Missing JSON payload" }),
            )
        };

        // An empty object counts as missing.
        let value = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(obj)) if !obj.is_empty() => Value::Object(obj),
            _ => return Err(missing_payload()),
        };
        let req = serde_json::from_value::<SearchRequest>(value).map_err(|err| {
            warn!("invalid search request: {}", err);
            (
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("Invalid JSON payload: {}", err) }),
            )
        })?;

        let filters = req.filters.unwrap_or_default();
        if req.query.is_none() && filters.is_empty() {
            warn!("search request has neither query nor filters");
            return Err((
                StatusCode::BAD_REQUEST,
                json!({ "error": "Missing 'query' or 'filters' parameter in JSON payload" }),
            ));
        }

        Ok(DatastoreSearch {
            resource_id: req
                .resource_id
                .unwrap_or_else(|| self.resource_id.clone()),
            q: req.query,
            filters,
            limit: req.limit.unwrap_or(DEFAULT_LIMIT),
        })
    }

    /// Adapt [`SearchService::handle`] to `hyper`.
    async fn respond<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body,
        B::Error: Into<Box<dyn error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        info!("incoming request: {} {}", parts.method, parts.uri);
        debug!("request headers: {:?}", loggable_headers(&parts.headers));
        let body = match Limited::new(body, MAX_REQUEST_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                warn!("request body is larger than {} bytes", MAX_REQUEST_BYTES);
                let value = json!({
                    "error": format!("Request body is larger than {} bytes", MAX_REQUEST_BYTES)
                });
                return Ok(json_response(StatusCode::PAYLOAD_TOO_LARGE, &value));
            }
            Err(err) => {
                warn!("could not read request body: {}", err);
                Bytes::new()
            }
        };
        debug!("request body: {}", String::from_utf8_lossy(&body));
        let (status, value) = self.handle(&parts.method, parts.uri.path(), &body).await;
        Ok(json_response(status, &value))
    }
}

/// Request headers worth logging. Credentials are left out.
fn loggable_headers(headers: &HeaderMap) -> Vec<(&str, &str)> {
    headers
        .iter()
        .filter(|(name, _)| {
            **name != header::AUTHORIZATION
                && **name != header::COOKIE
                && **name != header::PROXY_AUTHORIZATION
        })
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("<binary>")))
        .collect()
}

/// Build a JSON response.
fn json_response(status: StatusCode, value: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

/// Listen on `addr` and serve searches until something goes wrong.
pub async fn bind_and_serve(addr: SocketAddr, service: SearchService) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not listen on {}", addr))?;
    info!("listening on http://{}", listener.local_addr()?);
    serve(listener, Arc::new(service)).await
}

/// Serve searches on `listener`, one task per connection.
pub async fn serve(listener: TcpListener, service: Arc<SearchService>) -> Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("error accepting connection")?;
        let io = TokioIo::new(stream);
        let service = service.clone();
        tokio::spawn(
            async move {
                let svc = service_fn(move |req| {
                    let service = service.clone();
                    async move { service.respond(req).await }
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                    debug!("connection error: {}", err);
                }
            }
            .instrument(debug_span!("connection", %peer)),
        );
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::DEFAULT_RESOURCE_ID;
    use crate::fetch::test_server;

    /// A service whose catalog is never reachable.
    fn offline_service() -> SearchService {
        let ckan = CkanClient::new("http://127.0.0.1:9/".parse().unwrap(), None).unwrap();
        SearchService::new(ckan, DEFAULT_RESOURCE_ID.to_owned())
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let service = offline_service();
        for (method, path) in &[(Method::GET, "/search"), (Method::POST, "/other")] {
            let (status, body) = service.handle(method, path, b"{}").await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body, json!({ "error": "Not Found" }));
        }
    }

    #[tokio::test]
    async fn missing_payloads_are_rejected() {
        let service = offline_service();
        let bodies: &[&[u8]] = &[b"", b"not json", b"{}", b"[1, 2]"];
        for body in bodies {
            let (status, value) = service.handle(&Method::POST, "/search", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(value, json!({ "error": "Missing JSON payload" }));
        }
    }

    #[tokio::test]
    async fn query_or_filters_are_required() {
        let service = offline_service();
        let (status, value) = service
            .handle(&Method::POST, "/search", br#"{"limit": 3, "filters": {}}"#)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            value,
            json!({ "error": "Missing 'query' or 'filters' parameter in JSON payload" }),
        );
    }

    #[test]
    fn resource_ids_fall_back_to_configured_value() {
        let ckan = CkanClient::new("http://127.0.0.1:9/".parse().unwrap(), None).unwrap();
        let service = SearchService::new(ckan, "configured".to_owned());

        let search = service.parse_search(br#"{"query": "acme"}"#).unwrap();
        assert_eq!(search.resource_id, "configured");
        assert_eq!(search.limit, DEFAULT_LIMIT);

        let search = service
            .parse_search(br#"{"filters": {"BN_STATE_OF_REG": "NSW"}, "resource_id": "mine", "limit": 10}"#)
            .unwrap();
        assert_eq!(search.resource_id, "mine");
        assert_eq!(search.q, None);
        assert_eq!(search.limit, 10);
    }

    #[tokio::test]
    async fn catalog_failures_are_server_errors() {
        let service = offline_service();
        let (status, value) = service
            .handle(&Method::POST, "/search", br#"{"query": "acme"}"#)
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(value["exception"].is_string());
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused() {
        let service = offline_service();
        let body = vec![b' '; MAX_REQUEST_BYTES + 1];
        let req = Request::builder()
            .method(Method::POST)
            .uri("/search")
            .body(Full::new(Bytes::from(body)))
            .unwrap();
        let resp = service.respond(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice::<Value>(&body).unwrap();
        assert!(value["error"].as_str().unwrap().contains("larger than"));
    }

    #[tokio::test]
    async fn bodies_under_the_limit_are_handled() {
        let service = offline_service();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/search")
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap();
        let resp = service.respond(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn credentials_are_not_logged() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(
            loggable_headers(&headers),
            vec![("content-type", "application/json")],
        );
    }

    #[tokio::test]
    async fn records_are_proxied_over_http() {
        let ckan_body = json!({
            "success": true,
            "result": { "records": [{ "BN_NAME": "ACME" }, { "BN_NAME": "ACME TWO" }] }
        });
        let (ckan_url, _requests) = test_server::serve_recording(
            "200 OK",
            "application/json",
            ckan_body.to_string().into_bytes(),
            1,
        )
        .await;
        let ckan = CkanClient::new(ckan_url.join("/").unwrap(), None).unwrap();
        let service = Arc::new(SearchService::new(ckan, DEFAULT_RESOURCE_ID.to_owned()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, service));

        let resp = reqwest::Client::new()
            .post(format!("http://{}/search", addr))
            .json(&json!({ "query": "acme" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let records = resp.json::<Value>().await.unwrap();
        assert_eq!(
            records,
            json!([{ "BN_NAME": "ACME" }, { "BN_NAME": "ACME TWO" }]),
        );
    }
}

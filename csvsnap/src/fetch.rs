//! Downloading the source dataset.

use std::time::Duration;

use crate::common::*;

/// How long we'll wait for the whole download.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Fetches raw bytes over HTTP.
///
/// We make exactly one attempt. If it fails, the caller decides whether to run
/// the pipeline again.
#[derive(Clone, Debug)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    /// Create a fetcher with our default timeout.
    pub fn new() -> Result<Fetcher> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a fetcher with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Fetcher> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("csvsnap/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("could not build HTTP client")?;
        Ok(Fetcher { client })
    }

    /// Fetch `url`, returning the complete body.
    #[instrument(level = "debug", skip(self, url), fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        info!("fetching {}", url);
        let resp = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                code: status.as_u16(),
            });
        }

        let body = resp.bytes().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;
        debug!("fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! A tiny local HTTP server, so we can test HTTP clients without a network.

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::mpsc,
    };

    use crate::common::*;

    /// Serve a CSV `body` with `status` to the first `connections` requests,
    /// and return the URL to fetch.
    pub(crate) async fn serve(status: &'static str, body: Vec<u8>, connections: usize) -> Url {
        serve_recording(status, "text/csv", body, connections).await.0
    }

    /// Like [`serve`], but with any content type, and also return a channel
    /// which receives each raw request (head and body).
    pub(crate) async fn serve_recording(
        status: &'static str,
        content_type: &'static str,
        body: Vec<u8>,
        connections: usize,
    ) -> (Url, mpsc::UnboundedReceiver<Vec<u8>>) {
        let reply = Reply {
            status,
            content_type,
            body,
        };
        serve_replies(vec![reply; connections]).await
    }

    /// One canned HTTP response.
    #[derive(Clone, Debug)]
    pub(crate) struct Reply {
        pub(crate) status: &'static str,
        pub(crate) content_type: &'static str,
        pub(crate) body: Vec<u8>,
    }

    impl Reply {
        /// A `200 OK` with a JSON body.
        pub(crate) fn json(value: serde_json::Value) -> Reply {
            Reply {
                status: "200 OK",
                content_type: "application/json",
                body: value.to_string().into_bytes(),
            }
        }

        /// A `200 OK` with nothing in it.
        pub(crate) fn empty() -> Reply {
            Reply {
                status: "200 OK",
                content_type: "text/plain",
                body: vec![],
            }
        }
    }

    /// Answer one connection with each of `replies`, in order, recording the
    /// requests. The returned URL points at a CSV file on this server; join
    /// `/` onto it to get the base URL.
    pub(crate) async fn serve_replies(
        replies: Vec<Reply>,
    ) -> (Url, mpsc::UnboundedReceiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for reply in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                // Nobody may be listening, and that's fine.
                let _ = tx.send(request);
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.status,
                    reply.content_type,
                    reply.body.len(),
                );
                socket.write_all(head.as_bytes()).await.unwrap();
                socket.write_all(&reply.body).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        let url = format!("http://{}/business_names.csv", addr).parse().unwrap();
        (url, rx)
    }

    /// Read request headers, and then as many body bytes as `Content-Length`
    /// promises.
    async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        let head_len = loop {
            if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return request;
            }
            request.extend_from_slice(&buf[..n]);
        };
        let head = String::from_utf8_lossy(&request[..head_len]).to_ascii_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|len| len.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while request.len() < head_len + content_length {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        request
    }
}

//! Stream forwarding proxy.
//!
//! Sanitizes upstream stream URLs, forwards the client's playback headers and
//! relays the response: HLS manifests are buffered and returned in one piece,
//! everything else is relayed chunk by chunk as it arrives.

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::services::entities::decode_entities_fully;
use crate::services::metrics::STREAM_REQUESTS;

// Re-export reqwest header module to avoid version conflicts
mod reqwest_header {
    pub use reqwest::header::{
        HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ORIGIN, RANGE,
        REFERER, USER_AGENT,
    };
}

/// Media payloads are relayed in chunks of at most this size
pub const RELAY_CHUNK_SIZE: usize = 8 * 1024;

/// Assumed when upstream sends no Content-Type
const DEFAULT_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// xTeVe vendor bug: `&parallel=` in stream URLs comes out as `¶llel=`
/// (the `&para` prefix was decoded as the pilcrow entity). Only this exact
/// token is repaired.
const XTEVE_CORRUPTED_TOKEN: &str = "¶llel";
const XTEVE_REPAIRED_TOKEN: &str = "&parallel";

const MAX_SANITIZE_ROUNDS: usize = 8;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
    /// Upstream unreachable, timed out or broke while reading
    #[error("error accessing stream: {0}")]
    Upstream(String),
    #[error("error accessing stream: upstream returned HTTP {0}")]
    UpstreamStatus(u16),
    /// Failure building the proxy response itself
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) | ProxyError::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Clean up a stream URL as published by the aggregator.
///
/// Decodes HTML entities (including double-encoded ones) and repairs the
/// xTeVe `¶llel` corruption. Idempotent.
pub fn sanitize_stream_url(raw: &str) -> String {
    let mut current = raw.trim().to_string();
    for _ in 0..MAX_SANITIZE_ROUNDS {
        let next = decode_entities_fully(&current).replace(XTEVE_CORRUPTED_TOKEN, XTEVE_REPAIRED_TOKEN);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Validate URL is HTTP/HTTPS
fn is_valid_http_url(url: &str) -> bool {
    url::Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// HLS playlists are small text documents and are buffered
pub fn is_manifest(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.contains("mpegurl") || lower.contains("m3u8")
}

fn client_header<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Headers sent upstream: User-Agent (with fallback), Referer, Origin, Range.
/// Headers the client did not send, or sent empty, are omitted.
pub fn upstream_headers(client: &HeaderMap, default_user_agent: &str) -> reqwest_header::HeaderMap {
    let user_agent = client_header(client, header::USER_AGENT).unwrap_or(default_user_agent);

    let candidates = [
        (reqwest_header::USER_AGENT, Some(user_agent)),
        (reqwest_header::REFERER, client_header(client, header::REFERER)),
        (reqwest_header::ORIGIN, client_header(client, header::ORIGIN)),
        (reqwest_header::RANGE, client_header(client, header::RANGE)),
    ];

    let mut headers = reqwest_header::HeaderMap::new();
    for (name, value) in candidates {
        let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        if let Ok(value) = reqwest_header::HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
    headers
}

/// Split upstream chunks so none exceeds `chunk_size`. Chunks are passed on
/// as soon as they arrive; nothing is accumulated.
pub fn rechunk<S, E>(upstream: S, chunk_size: usize) -> impl Stream<Item = Result<Bytes, std::io::Error>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    upstream.flat_map(move |item| {
        let pieces: Vec<Result<Bytes, std::io::Error>> = match item {
            Ok(mut bytes) => {
                let mut pieces = Vec::with_capacity(bytes.len() / chunk_size + 1);
                while bytes.len() > chunk_size {
                    pieces.push(Ok(bytes.split_to(chunk_size)));
                }
                if !bytes.is_empty() {
                    pieces.push(Ok(bytes));
                }
                pieces
            }
            Err(e) => vec![Err(std::io::Error::new(std::io::ErrorKind::Other, e))],
        };
        futures::stream::iter(pieces)
    })
}

/// Logs the outcome of a media relay when the body is dropped, which happens
/// both on normal completion and when the client disconnects.
struct RelayLog {
    url: String,
    bytes: u64,
    chunks: u64,
    failed: bool,
}

impl Drop for RelayLog {
    fn drop(&mut self) {
        tracing::info!(
            url = %self.url,
            bytes = self.bytes,
            chunks = self.chunks,
            failed = self.failed,
            "Media relay closed"
        );
    }
}

fn truncate(url: &str, max_chars: usize) -> &str {
    match url.char_indices().nth(max_chars) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}

const CORS_HEADERS: [(header::HeaderName, &str); 3] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
];

fn cors_headers(builder: axum::http::response::Builder) -> axum::http::response::Builder {
    CORS_HEADERS
        .into_iter()
        .fold(builder, |builder, (name, value)| builder.header(name, value))
}

/// Add the stream endpoint's CORS headers to an already built response
/// (error answers)
pub fn apply_cors(headers: &mut HeaderMap) {
    for (name, value) in CORS_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
}

/// Empty 204 answer to CORS preflight requests on the stream endpoint
pub fn preflight_response() -> Response {
    cors_headers(Response::builder().status(StatusCode::NO_CONTENT))
        .body(Body::empty())
        .unwrap_or_default()
}

/// Upstream stream proxy
#[derive(Clone)]
pub struct StreamForwarder {
    http: Client,
    default_user_agent: String,
    connect_timeout: Duration,
}

impl StreamForwarder {
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        // No overall timeout: live streams are unbounded. Only the connection
        // handshake is limited. Compression is off so byte ranges stay exact.
        let http = Client::builder()
            .connect_timeout(config.stream_connect_timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .no_gzip()
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            default_user_agent: config.default_user_agent.clone(),
            connect_timeout: config.stream_connect_timeout(),
        })
    }

    /// Proxy `stream_url` for a client request with the given headers
    pub async fn forward(&self, stream_url: &str, client_headers: &HeaderMap) -> Result<Response, ProxyError> {
        let result = self.forward_inner(stream_url, client_headers).await;
        if let Err(e) = &result {
            STREAM_REQUESTS.with_label_values(&["error"]).inc();
            tracing::error!("Error proxying stream: {}", e);
        }
        result
    }

    async fn forward_inner(&self, stream_url: &str, client_headers: &HeaderMap) -> Result<Response, ProxyError> {
        let clean_url = sanitize_stream_url(stream_url);
        tracing::info!(
            url = %truncate(&clean_url, 150),
            modified = clean_url != stream_url,
            "Processing stream"
        );

        if !is_valid_http_url(&clean_url) {
            return Err(ProxyError::InvalidUrl(truncate(&clean_url, 150).to_string()));
        }

        let headers = upstream_headers(client_headers, &self.default_user_agent);
        tracing::debug!(headers = ?headers.keys().map(|k| k.as_str()).collect::<Vec<_>>(), "Forwarding headers");

        // The client only bounds the TCP handshake; waiting for the response
        // head gets the same limit.
        let upstream = tokio::time::timeout(
            self.connect_timeout,
            self.http.get(&clean_url).headers(headers).send(),
        )
        .await
        .map_err(|_| ProxyError::Upstream("timed out waiting for upstream response".to_string()))?
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let status = upstream.status();
        let content_type = upstream
            .headers()
            .get(reqwest_header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        tracing::info!(status = status.as_u16(), content_type = %content_type, "Upstream responded");

        if !status.is_success() {
            return Err(ProxyError::UpstreamStatus(status.as_u16()));
        }

        let content_type = HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

        if is_manifest(content_type.to_str().unwrap_or_default()) {
            self.manifest_response(upstream, content_type).await
        } else {
            self.media_response(upstream, content_type, clean_url)
        }
    }

    async fn manifest_response(
        &self,
        upstream: reqwest::Response,
        content_type: HeaderValue,
    ) -> Result<Response, ProxyError> {
        let body = tokio::time::timeout(self.connect_timeout, upstream.bytes())
            .await
            .map_err(|_| ProxyError::Upstream("timed out reading manifest".to_string()))?
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        STREAM_REQUESTS.with_label_values(&["manifest"]).inc();

        cors_headers(Response::builder().status(StatusCode::OK))
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .map_err(|e| ProxyError::Internal(e.to_string()))
    }

    fn media_response(
        &self,
        upstream: reqwest::Response,
        content_type: HeaderValue,
        url: String,
    ) -> Result<Response, ProxyError> {
        // 200 or 206 (range requests)
        let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::OK);

        let mut response = cors_headers(Response::builder().status(status))
            .header(header::CONTENT_TYPE, content_type)
            .header(header::ACCEPT_RANGES, "bytes");

        for (from, to) in [
            (reqwest_header::CONTENT_LENGTH, header::CONTENT_LENGTH),
            (reqwest_header::CONTENT_RANGE, header::CONTENT_RANGE),
        ] {
            if let Some(value) = upstream.headers().get(from).and_then(|v| v.to_str().ok()) {
                if let Ok(value) = HeaderValue::from_str(value) {
                    response = response.header(to, value);
                }
            }
        }

        STREAM_REQUESTS.with_label_values(&["media"]).inc();

        let mut log = RelayLog {
            url: truncate(&url, 150).to_string(),
            bytes: 0,
            chunks: 0,
            failed: false,
        };
        // Dropping the body (client gone) drops the upstream response and
        // releases its connection.
        let chunks = rechunk(upstream.bytes_stream(), RELAY_CHUNK_SIZE).inspect(move |item| {
            // Borrow the whole guard so the closure owns it, not copies of its fields
            let log = &mut log;
            match item {
                Ok(chunk) => {
                    log.bytes += chunk.len() as u64;
                    log.chunks += 1;
                }
                Err(_) => log.failed = true,
            }
        });

        response
            .body(Body::from_stream(chunks))
            .map_err(|e| ProxyError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, extract::Request, routing::get, Router};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_sanitize_decodes_escaped_ampersands() {
        assert_eq!(
            sanitize_stream_url("http://host/live/1.ts?a=1&amp;b=2"),
            "http://host/live/1.ts?a=1&b=2"
        );
        assert_eq!(
            sanitize_stream_url("http://host/x?a=1&amp;amp;b=2"),
            "http://host/x?a=1&b=2"
        );
    }

    #[test]
    fn test_sanitize_repairs_xteve_token() {
        assert_eq!(
            sanitize_stream_url("http://host/stream?id=5¶llel=1"),
            "http://host/stream?id=5&parallel=1"
        );
        assert_eq!(
            sanitize_stream_url("http://host/stream?id=5&para;llel=1"),
            "http://host/stream?id=5&parallel=1"
        );
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            "http://host/x?a=1&b=2",
            "http://host/x?a=1&amp;b=2",
            "http://host/x?a=1&amp;amp;amp;b=2",
            "http://host/x?id=1¶llel=2",
            "http://host/x?id=1&amp;para;llel=2",
            "http://host/x?id=1¶llel;",
            "  http://host/x?q=&lt;&gt;&#38;&#x26;  ",
            "&&&;;&amp",
            "",
        ];
        for input in inputs {
            let once = sanitize_stream_url(input);
            assert_eq!(sanitize_stream_url(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_is_manifest() {
        assert!(is_manifest("application/vnd.apple.mpegurl"));
        assert!(is_manifest("audio/x-mpegURL; charset=utf-8"));
        assert!(is_manifest("application/m3u8"));
        assert!(!is_manifest("video/mp2t"));
        assert!(!is_manifest("video/mp4"));
    }

    #[test]
    fn test_upstream_headers_defaults_and_omissions() {
        let headers = upstream_headers(&HeaderMap::new(), "Default-UA");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get(reqwest_header::USER_AGENT).unwrap(), "Default-UA");

        let mut client = HeaderMap::new();
        client.insert(header::USER_AGENT, HeaderValue::from_static("VLC/3.0"));
        client.insert(header::REFERER, HeaderValue::from_static(""));
        client.insert(header::ORIGIN, HeaderValue::from_static("http://app"));
        client.insert(header::RANGE, HeaderValue::from_static("bytes=0-99"));
        client.insert(header::COOKIE, HeaderValue::from_static("secret=1"));

        let headers = upstream_headers(&client, "Default-UA");
        assert_eq!(headers.get(reqwest_header::USER_AGENT).unwrap(), "VLC/3.0");
        assert!(headers.get(reqwest_header::REFERER).is_none());
        assert_eq!(headers.get(reqwest_header::ORIGIN).unwrap(), "http://app");
        assert_eq!(headers.get(reqwest_header::RANGE).unwrap(), "bytes=0-99");
        assert_eq!(headers.len(), 3);
    }

    #[tokio::test]
    async fn test_rechunk_splits_large_chunks() {
        let upstream = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from(vec![1u8; 20_000])),
            Ok(Bytes::from_static(b"tail")),
        ]);
        let sizes: Vec<usize> = rechunk(upstream, RELAY_CHUNK_SIZE)
            .map(|c| c.unwrap().len())
            .collect()
            .await;
        assert_eq!(sizes, vec![8192, 8192, 3616, 4]);
    }

    #[tokio::test]
    async fn test_rechunk_propagates_errors() {
        let upstream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let items: Vec<_> = rechunk(upstream, RELAY_CHUNK_SIZE).collect().await;
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    async fn spawn_upstream(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn forwarder() -> StreamForwarder {
        let mut config = Config::from_env();
        config.default_user_agent = "Default-UA".to_string();
        config.stream_connect_timeout_ms = 5_000;
        StreamForwarder::new(&config).unwrap()
    }

    fn upstream_app() -> Router {
        Router::new()
            .route(
                "/playlist.m3u8",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
                        "#EXTM3U\n#EXT-X-TARGETDURATION:6\nseg1.ts\n",
                    )
                }),
            )
            .route(
                "/video.ts",
                get(|req: Request| async move {
                    let range = req
                        .headers()
                        .get(header::RANGE)
                        .map(|v| v.to_str().unwrap().to_string());
                    match range {
                        Some(range) => (
                            StatusCode::PARTIAL_CONTENT,
                            [
                                (header::CONTENT_TYPE, "video/mp2t".to_string()),
                                (header::CONTENT_RANGE, format!("{}/30000", range.replace('=', " "))),
                            ],
                            vec![7u8; 100],
                        ),
                        None => (
                            StatusCode::OK,
                            [
                                (header::CONTENT_TYPE, "video/mp2t".to_string()),
                                (header::ETAG, "\"v1\"".to_string()),
                            ],
                            vec![7u8; 30_000],
                        ),
                    }
                }),
            )
            .route(
                "/echo",
                get(|req: Request| async move {
                    let seen = |name: header::HeaderName| {
                        req.headers()
                            .get(name)
                            .map(|v| v.to_str().unwrap().to_string())
                            .unwrap_or_else(|| "-".to_string())
                    };
                    let query = req.uri().query().unwrap_or_default().to_string();
                    (
                        [(header::CONTENT_TYPE, "application/x-mpegurl")],
                        format!(
                            "ua={} referer={} range={} query={}",
                            seen(header::USER_AGENT),
                            seen(header::REFERER),
                            seen(header::RANGE),
                            query
                        ),
                    )
                }),
            )
            .route("/gone", get(|| async { StatusCode::NOT_FOUND }))
    }

    #[tokio::test]
    async fn test_manifest_is_buffered_with_cors() {
        let base = spawn_upstream(upstream_app()).await;
        let response = forwarder()
            .forward(&format!("{}/playlist.m3u8", base), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/vnd.apple.mpegurl");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, OPTIONS");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "*");
        assert!(headers.get(header::ACCEPT_RANGES).is_none());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"#EXTM3U\n#EXT-X-TARGETDURATION:6\nseg1.ts\n");
    }

    #[tokio::test]
    async fn test_media_is_relayed_in_chunks() {
        let base = spawn_upstream(upstream_app()).await;
        let response = forwarder()
            .forward(&format!("{}/video.ts", base), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp2t");

        let mut body = response.into_body().into_data_stream();
        let mut total = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= RELAY_CHUNK_SIZE);
            total += chunk.len();
        }
        assert_eq!(total, 30_000);
    }

    #[tokio::test]
    async fn test_range_requests_pass_through() {
        let base = spawn_upstream(upstream_app()).await;
        let mut client = HeaderMap::new();
        client.insert(header::RANGE, HeaderValue::from_static("bytes=0-99"));

        let response = forwarder()
            .forward(&format!("{}/video.ts", base), &client)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-99/30000");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 100);
    }

    #[tokio::test]
    async fn test_forwards_sanitized_url_and_headers() {
        let base = spawn_upstream(upstream_app()).await;
        let mut client = HeaderMap::new();
        client.insert(header::REFERER, HeaderValue::from_static("http://app/"));

        let response = forwarder()
            .forward(&format!("{}/echo?a=1&amp;b=2", base), &client)
            .await
            .unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&body),
            "ua=Default-UA referer=http://app/ range=- query=a=1&b=2"
        );
    }

    #[tokio::test]
    async fn test_upstream_failures_are_gateway_errors() {
        let base = spawn_upstream(upstream_app()).await;
        let err = forwarder()
            .forward(&format!("{}/gone", base), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamStatus(404)));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = forwarder()
            .forward(&format!("http://{}/x.ts", addr), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Upstream(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    /// Collects formatted log output for assertions
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_relay_log_counts_bytes_after_body_is_consumed() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let base = spawn_upstream(upstream_app()).await;
        let response = forwarder()
            .forward(&format!("{}/video.ts", base), &HeaderMap::new())
            .await
            .unwrap();
        assert!(!logs.text().contains("Media relay closed"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 30_000);

        let text = logs.text();
        let line = text
            .lines()
            .find(|l| l.contains("Media relay closed"))
            .expect("relay log emitted once the body is dropped");
        assert!(line.contains("bytes=30000"), "{}", line);
        assert!(line.contains("failed=false"), "{}", line);
        assert!(!line.contains("chunks=0"), "{}", line);
    }

    #[tokio::test]
    async fn test_silent_upstream_times_out_as_gateway_error() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut config = Config::from_env();
        config.stream_connect_timeout_ms = 500;
        let forwarder = StreamForwarder::new(&config).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            forwarder.forward(&format!("http://{}/live.ts", addr), &HeaderMap::new()),
        )
        .await
        .expect("forward must not hang on a silent upstream");

        let err = result.unwrap_err();
        assert!(matches!(err, ProxyError::Upstream(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_upstream() {
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel::<()>();
        let closed_tx = Arc::new(Mutex::new(Some(closed_tx)));

        let app = Router::new().route(
            "/endless.ts",
            get(move || {
                let closed_tx = closed_tx.clone();
                async move {
                    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(4);
                    let signal = closed_tx.lock().unwrap().take();
                    tokio::spawn(async move {
                        // Endless live stream: stops only when the receiver is gone
                        while tx.send(Bytes::from(vec![0u8; 4096])).await.is_ok() {}
                        if let Some(signal) = signal {
                            let _ = signal.send(());
                        }
                    });
                    let body = futures::stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|chunk| (Ok::<_, std::io::Error>(chunk), rx))
                    });
                    ([(header::CONTENT_TYPE, "video/mp2t")], Body::from_stream(body))
                }
            }),
        );
        let base = spawn_upstream(app).await;

        let response = forwarder()
            .forward(&format!("{}/endless.ts", base), &HeaderMap::new())
            .await
            .unwrap();
        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert!(!first.is_empty());

        // Client goes away mid-stream
        drop(body);

        tokio::time::timeout(Duration::from_secs(10), closed_rx)
            .await
            .expect("upstream stream must be closed after the client disconnects")
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let err = forwarder().forward("ftp://host/file", &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidUrl(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::Internal("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Reverse-proxy forwarding.
//!
//! Rebuilds the inbound request against the resolved target, streams the
//! inbound body to it, sends it once and relays status, headers and body
//! back. Status and headers reach the caller only after the backend
//! answered; in buffered mode the body is written only after it has been
//! read in full.

use crate::error::{GatewayError, Result};
use crate::routing::Target;
use axum::body::{Body, HttpBody};
use axum::extract::{Request, State};
use axum::http::header::{HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error};

/// Connection framing headers describe a single hop and are rebuilt by the
/// client and server on each side.
fn is_hop_header(name: &HeaderName) -> bool {
    *name == HOST || *name == TRANSFER_ENCODING
}

/// How the backend body is relayed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    /// Read the whole body, then write it.
    #[default]
    Buffered,
    /// Copy bytes to the caller as they arrive.
    Streaming,
}

impl FromStr for RelayMode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buffered" => Ok(RelayMode::Buffered),
            "streaming" => Ok(RelayMode::Streaming),
            other => Err(GatewayError::Configuration(format!(
                "unknown relay mode '{}', expected 'buffered' or 'streaming'",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    relay: RelayMode,
}

impl Forwarder {
    /// `timeout` of `None` keeps the transport defaults.
    pub fn new(timeout: Option<Duration>, relay: RelayMode) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            GatewayError::Configuration(format!("failed to build HTTP client: {}", e))
        })?;

        Ok(Self { client, relay })
    }

    pub fn relay_mode(&self) -> RelayMode {
        self.relay
    }

    /// Forward `request` to `target` and relay the answer.
    pub async fn forward(&self, request: Request, target: &Target) -> Result<Response> {
        let (parts, body) = request.into_parts();

        let url = match parts.uri.query() {
            Some(query) => format!("{}?{}", target.url, query),
            None => target.url.clone(),
        };

        let mut outbound = self.client.request(parts.method, url.as_str());
        // Known-empty bodies go out without one rather than as an empty chunked stream.
        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        let mut outbound = outbound
            .build()
            .map_err(|e| GatewayError::InvalidTarget {
                target: url.clone(),
                reason: e.to_string(),
            })?;
        copy_headers(&parts.headers, outbound.headers_mut());

        debug!(service = %target.service, target = %url, "Forwarding request");

        let upstream = self
            .client
            .execute(outbound)
            .await
            .map_err(|source| GatewayError::Send {
                target: url.clone(),
                source,
            })?;

        let status = upstream.status();
        let mut headers = HeaderMap::with_capacity(upstream.headers().len());
        copy_headers(upstream.headers(), &mut headers);

        let body = match self.relay {
            RelayMode::Buffered => {
                let bytes = upstream
                    .bytes()
                    .await
                    .map_err(|source| GatewayError::ResponseBody {
                        target: url.clone(),
                        source,
                    })?;
                Body::from(bytes)
            }
            RelayMode::Streaming => Body::from_stream(upstream.bytes_stream()),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Append every value of every header, in order, skipping hop headers.
fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        if is_hop_header(name) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

/// Terminal handler of the proxy pipeline.
pub async fn forward(
    State(forwarder): State<Forwarder>,
    Extension(target): Extension<Target>,
    request: Request,
) -> Response {
    match forwarder.forward(request, &target).await {
        Ok(response) => response,
        Err(err) => {
            error!(service = %target.service, target = %target.url, error = %err, "Forwarding failed");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Method, Request as HttpRequest, StatusCode};
    use axum::routing::{any, post};
    use axum::Router;
    use axum::body::Bytes;
    use http_body_util::BodyExt;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn spawn_backend(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn target(addr: SocketAddr, path: &str) -> Target {
        Target {
            service: "test".to_string(),
            url: format!("http://{}{}", addr, path),
        }
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_copy_headers_keeps_all_values_in_order() {
        let mut from = HeaderMap::new();
        from.append("cookie", HeaderValue::from_static("a=1"));
        from.append("cookie", HeaderValue::from_static("b=2"));
        from.insert(HOST, HeaderValue::from_static("gateway:8080"));

        let mut to = HeaderMap::new();
        copy_headers(&from, &mut to);

        let cookies: Vec<_> = to.get_all("cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert!(to.get(HOST).is_none());
    }

    #[test]
    fn test_relay_mode_parsing() {
        assert_eq!("buffered".parse::<RelayMode>().unwrap(), RelayMode::Buffered);
        assert_eq!("Streaming".parse::<RelayMode>().unwrap(), RelayMode::Streaming);
        assert!("chunky".parse::<RelayMode>().is_err());
    }

    #[tokio::test]
    async fn test_status_and_body_are_relayed() {
        let backend = Router::new().route(
            "/items",
            post(|| async { (StatusCode::CREATED, r#"{"id":42}"#) }),
        );
        let addr = spawn_backend(backend).await;

        let forwarder = Forwarder::new(None, RelayMode::Buffered).unwrap();
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/api/items")
            .body(Body::from("{}"))
            .unwrap();

        let response = forwarder.forward(request, &target(addr, "/items")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_string(response).await, r#"{"id":42}"#);
    }

    #[tokio::test]
    async fn test_method_body_and_query_reach_backend() {
        let backend = Router::new().route(
            "/echo",
            any(|request: Request| async move {
                let method = request.method().to_string();
                let query = request.uri().query().unwrap_or_default().to_string();
                let body = axum::body::to_bytes(request.into_body(), usize::MAX)
                    .await
                    .unwrap();
                format!("{} {} {}", method, query, String::from_utf8_lossy(&body))
            }),
        );
        let addr = spawn_backend(backend).await;

        let forwarder = Forwarder::new(None, RelayMode::Buffered).unwrap();
        let request = HttpRequest::builder()
            .method(Method::PUT)
            .uri("/api/docs/echo?b=2&a=1&a=0")
            .body(Body::from("payload"))
            .unwrap();

        let response = forwarder.forward(request, &target(addr, "/echo")).await.unwrap();
        assert_eq!(body_string(response).await, "PUT b=2&a=1&a=0 payload");
    }

    #[tokio::test]
    async fn test_inbound_body_is_streamed_to_backend() {
        let backend = Router::new().route(
            "/upload",
            post(|request: Request| async move {
                let chunked = request.headers().contains_key("transfer-encoding");
                let body = axum::body::to_bytes(request.into_body(), usize::MAX)
                    .await
                    .unwrap();
                format!("{} {}", chunked, body.len())
            }),
        );
        let addr = spawn_backend(backend).await;

        let chunks: Vec<Result<Bytes, std::io::Error>> =
            (0..64).map(|_| Ok(Bytes::from(vec![b'z'; 4096]))).collect();
        let forwarder = Forwarder::new(None, RelayMode::Buffered).unwrap();
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/api/upload")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .unwrap();

        let response = forwarder.forward(request, &target(addr, "/upload")).await.unwrap();
        assert_eq!(body_string(response).await, format!("true {}", 64 * 4096));
    }

    #[tokio::test]
    async fn test_multi_valued_headers_both_directions() {
        let backend = Router::new().route(
            "/cookies",
            any(|headers: HeaderMap| async move {
                let seen: Vec<_> = headers
                    .get_all("cookie")
                    .iter()
                    .map(|v| v.to_str().unwrap().to_string())
                    .collect();
                let mut response = seen.join("|").into_response();
                response
                    .headers_mut()
                    .append("set-cookie", HeaderValue::from_static("x=1"));
                response
                    .headers_mut()
                    .append("set-cookie", HeaderValue::from_static("y=2"));
                response
            }),
        );
        let addr = spawn_backend(backend).await;

        let forwarder = Forwarder::new(None, RelayMode::Buffered).unwrap();
        let request = HttpRequest::builder()
            .uri("/api/cookies")
            .header("cookie", "a=1")
            .header("cookie", "b=2")
            .body(Body::empty())
            .unwrap();

        let response = forwarder.forward(request, &target(addr, "/cookies")).await.unwrap();
        let set_cookies: Vec<_> = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(set_cookies, vec!["x=1", "y=2"]);
        assert_eq!(body_string(response).await, "a=1|b=2");
    }

    #[tokio::test]
    async fn test_streaming_relay_delivers_same_body() {
        let backend = Router::new().route("/big", any(|| async { "x".repeat(64 * 1024) }));
        let addr = spawn_backend(backend).await;

        let forwarder = Forwarder::new(None, RelayMode::Streaming).unwrap();
        let request = HttpRequest::builder().uri("/api/big").body(Body::empty()).unwrap();

        let response = forwarder.forward(request, &target(addr, "/big")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await.len(), 64 * 1024);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_send_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = Forwarder::new(Some(Duration::from_secs(5)), RelayMode::Buffered).unwrap();
        let request = HttpRequest::builder().uri("/api/x").body(Body::empty()).unwrap();

        let err = forwarder.forward(request, &target(addr, "/x")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Send { .. }));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        assert!(!body.contains(&addr.to_string()));
    }

    #[tokio::test]
    async fn test_truncated_backend_body_is_response_body_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\nshort")
                .await
                .unwrap();
        });

        let forwarder = Forwarder::new(Some(Duration::from_secs(5)), RelayMode::Buffered).unwrap();
        let request = HttpRequest::builder().uri("/api/x").body(Body::empty()).unwrap();

        let err = forwarder.forward(request, &target(addr, "/x")).await.unwrap_err();
        assert!(matches!(err, GatewayError::ResponseBody { .. }));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body_string(response).await.contains("short"));
    }

    #[tokio::test]
    async fn test_malformed_target_is_rejected_before_sending() {
        let forwarder = Forwarder::new(None, RelayMode::Buffered).unwrap();
        let request = HttpRequest::builder().uri("/api/x").body(Body::empty()).unwrap();
        let bad = Target {
            service: "broken".to_string(),
            url: "http://bad host:99999/x".to_string(),
        };

        let err = forwarder.forward(request, &bad).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidTarget { .. }));
    }
}

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, Incoming};
use log::{error, info, warn};

use wisp_health::Transition;
use wisp_lb::{Backend, BackendSet, PickedBackend};
use wisp_telemetry::Metrics;
use wisp_transport::{full, BoxError, ProxyBody, UpstreamError};

use crate::router::Router;

/// Value appended in the `Via` response header.
pub const PROXY_ID: &str = "wisp";

// label used when a request never reached a backend
const NO_BACKEND: &str = "none";

/// The request pipeline: route, balance, forward, relay.
///
/// Both ingress listeners feed requests here; nothing transport-specific
/// crosses this boundary except the remote address.
pub struct ProxyHandler {
    router: Router,
    backends: Arc<BackendSet>,
    metrics: Arc<Metrics>,
}

impl ProxyHandler {
    pub fn new(router: Router, backends: Arc<BackendSet>, metrics: Arc<Metrics>) -> Self {
        Self {
            router,
            backends,
            metrics,
        }
    }

    pub async fn handle(&self, req: Request<ProxyBody>, remote_addr: SocketAddr) -> Response<ProxyBody> {
        let start = Instant::now();

        if req.uri().path() == "/health" {
            return self.own_health_response();
        }

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let host = request_host(&req);
        let request_size = estimate_request_size(&req);

        let Some(route) = self
            .router
            .match_request(&method, &path, host.as_deref(), req.headers())
        else {
            return self.error_response(
                &method,
                StatusCode::NOT_FOUND,
                "no matching route",
                start,
                request_size,
            );
        };

        // validation guarantees the group exists; treat a miss as unrouted
        let Some(group) = self.backends.group(route.backend) else {
            return self.error_response(
                &method,
                StatusCode::NOT_FOUND,
                "no matching route",
                start,
                request_size,
            );
        };

        let strip_prefix = route.strip_prefix.map(String::from);

        let Some(picked) = group.pick() else {
            warn!("No healthy backends available in group '{}'", group.name());
            return self.error_response(
                &method,
                StatusCode::SERVICE_UNAVAILABLE,
                "no healthy backends available",
                start,
                request_size,
            );
        };

        let upstream_req =
            match build_upstream_request(req, &picked, strip_prefix.as_deref(), remote_addr) {
                Ok(request) => request,
                Err(e) => {
                    error!("Failed to build upstream request: {e}");
                    return self.error_response(
                        &method,
                        StatusCode::BAD_REQUEST,
                        "invalid request",
                        start,
                        request_size,
                    );
                }
            };

        let upstream_url = upstream_req.uri().to_string();
        let backend_start = Instant::now();

        match picked.client().send(upstream_req, group.timeout()).await {
            Ok(upstream_response) => {
                let response_time = backend_start.elapsed();
                self.apply_transition(&picked, picked.health().observe(true));
                self.metrics
                    .record_backend_request(picked.name(), "success", response_time);

                let status = upstream_response.status();
                info!(
                    "{} {} -> {} backend={} duration={:?}",
                    method,
                    path,
                    status.as_u16(),
                    picked.name(),
                    start.elapsed()
                );
                self.metrics.record_http_request(
                    method.as_str(),
                    status.as_u16(),
                    picked.name(),
                    start.elapsed(),
                    request_size,
                );

                self.relay_response(upstream_response, picked)
            }
            Err(err) => {
                let response_time = backend_start.elapsed();
                let status = match err {
                    UpstreamError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };

                error!(
                    "Upstream request failed: backend={} url={} class={} duration={:?}: {}",
                    picked.name(),
                    upstream_url,
                    err.class(),
                    response_time,
                    err
                );

                if err.is_transport() {
                    self.apply_transition(&picked, picked.health().observe(false));
                }
                self.metrics
                    .record_backend_request(picked.name(), "error", response_time);
                self.metrics.record_http_request(
                    method.as_str(),
                    status.as_u16(),
                    picked.name(),
                    start.elapsed(),
                    request_size,
                );

                let message = match err {
                    UpstreamError::Timeout => "upstream timeout",
                    _ => "upstream error",
                };
                self.metrics
                    .observe_response_size(status.as_u16(), picked.name(), message.len() as u64);
                simple_response(status, message)
            }
        }
    }

    /// `/health` on the proxy's own ingress; never forwarded.
    fn own_health_response(&self) -> Response<ProxyBody> {
        let (healthy, total) = self.backends.health_summary();

        let (status_text, status_code) = if healthy == 0 {
            ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
        } else if healthy < total {
            ("degraded", StatusCode::OK)
        } else {
            ("healthy", StatusCode::OK)
        };

        let body = serde_json::json!({
            "status": status_text,
            "healthy_backends": healthy,
            "total_backends": total,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        Response::builder()
            .status(status_code)
            .header(header::CONTENT_TYPE, "application/json")
            .body(full(body.to_string()))
            .expect("static response")
    }

    fn relay_response(
        &self,
        upstream: Response<Incoming>,
        picked: PickedBackend,
    ) -> Response<ProxyBody> {
        let (parts, body) = upstream.into_parts();

        let mut builder = Response::builder().status(parts.status);
        for (name, value) in parts.headers.iter() {
            if is_hop_header(name.as_str()) {
                continue;
            }
            builder = builder.header(name, value);
        }
        builder = builder
            .header("via", PROXY_ID)
            .header("x-backend", picked.name());

        let metered = MeteredBody::new(
            body.map_err(BoxError::from).boxed(),
            picked,
            parts.status.as_u16(),
            self.metrics.clone(),
        );

        builder.body(metered.boxed()).unwrap_or_else(|e| {
            error!("Failed to relay upstream response: {e}");
            simple_response(StatusCode::BAD_GATEWAY, "upstream error")
        })
    }

    fn apply_transition(&self, backend: &Backend, transition: Option<Transition>) {
        match transition {
            Some(Transition::Ejected) => {
                warn!("Backend {} marked as unhealthy", backend.name());
                self.metrics.set_backend_health(backend.name(), false);
            }
            Some(Transition::Recovered) => {
                info!("Backend {} marked as healthy", backend.name());
                self.metrics.set_backend_health(backend.name(), true);
            }
            None => {}
        }
    }

    fn error_response(
        &self,
        method: &Method,
        status: StatusCode,
        message: &str,
        start: Instant,
        request_size: u64,
    ) -> Response<ProxyBody> {
        error!("Proxy error: {} ({})", message, status.as_u16());
        self.metrics.record_http_request(
            method.as_str(),
            status.as_u16(),
            NO_BACKEND,
            start.elapsed(),
            request_size,
        );
        self.metrics
            .observe_response_size(status.as_u16(), NO_BACKEND, message.len() as u64);
        simple_response(status, message)
    }
}

fn simple_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(full(message.to_string()))
        .expect("static response")
}

/// Headers meaningful only on a single hop (RFC 7230 §6.1) plus the
/// `Proxy-*` family; never copied in either direction.
fn is_hop_header(name: &str) -> bool {
    matches!(
        name,
        "connection" | "keep-alive" | "te" | "trailer" | "transfer-encoding" | "upgrade"
    ) || name.starts_with("proxy-")
}

fn request_host(req: &Request<ProxyBody>) -> Option<String> {
    req.uri()
        .authority()
        .map(|a| a.as_str().to_string())
        .or_else(|| {
            req.headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
}

fn estimate_request_size(req: &Request<ProxyBody>) -> u64 {
    let mut size = (req.method().as_str().len() + req.uri().to_string().len() + 8) as u64;
    for (name, value) in req.headers() {
        size += (name.as_str().len() + value.len() + 4) as u64;
    }
    if let Some(len) = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
    {
        size += len;
    }
    size
}

/// Rewrites the request toward the picked backend: origin swap, optional
/// prefix strip, hop-by-hop removal, proxy headers. The body is passed
/// through untouched.
fn build_upstream_request(
    req: Request<ProxyBody>,
    backend: &Backend,
    strip_prefix: Option<&str>,
    remote_addr: SocketAddr,
) -> Result<Request<ProxyBody>, http::Error> {
    let (parts, body) = req.into_parts();

    let path = parts.uri.path();
    let target_path = match strip_prefix {
        Some(prefix) if path.starts_with(prefix) => {
            let trimmed = &path[prefix.len()..];
            if trimmed.is_empty() {
                String::from("/")
            } else {
                trimmed.to_string()
            }
        }
        _ => path.to_string(),
    };

    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{target_path}?{query}"),
        None => target_path,
    };

    let uri = Uri::builder()
        .scheme("http")
        .authority(backend.authority())
        .path_and_query(path_and_query)
        .build()?;

    let mut upstream = Request::builder()
        .method(parts.method)
        .uri(uri)
        .body(body)?;

    let headers = upstream.headers_mut();
    for (name, value) in parts.headers.iter() {
        if is_hop_header(name.as_str()) || name == &header::HOST {
            continue;
        }
        headers.append(name, value.clone());
    }
    headers.insert(header::HOST, HeaderValue::from_str(backend.authority())?);

    let client_ip = remote_addr.ip().to_string();
    let forwarded_for = match parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip.clone(),
    };
    headers.insert("x-forwarded-for", HeaderValue::from_str(&forwarded_for)?);
    headers.insert("x-real-ip", HeaderValue::from_str(&client_ip)?);
    headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
    headers.insert("x-forwarded-port", HeaderValue::from_static("443"));

    Ok(upstream)
}

/// Streams the upstream body through unchanged while counting bytes; on
/// completion (or drop) it observes the response-size histogram and releases
/// the backend's in-flight slot.
struct MeteredBody {
    inner: ProxyBody,
    picked: Option<PickedBackend>,
    status: u16,
    bytes: u64,
    metrics: Arc<Metrics>,
    finished: bool,
}

impl MeteredBody {
    fn new(inner: ProxyBody, picked: PickedBackend, status: u16, metrics: Arc<Metrics>) -> Self {
        Self {
            inner,
            picked: Some(picked),
            status,
            bytes: 0,
            metrics,
            finished: false,
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(picked) = self.picked.take() {
            self.metrics
                .observe_response_size(self.status, picked.name(), self.bytes);
        }
    }
}

impl Body for MeteredBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for MeteredBody {
    fn drop(&mut self) {
        self.finish();
    }
}

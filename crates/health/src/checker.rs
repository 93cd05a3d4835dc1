use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::uri::PathAndQuery;
use http::{header, Method, Request, Uri};
use http_body_util::Empty;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use wisp_config::config::HealthCheck;
use wisp_telemetry::Metrics;

use crate::state::{HealthState, Transition};

const PROBE_USER_AGENT: &str = concat!("wisp-health-checker/", env!("CARGO_PKG_VERSION"));

/// Periodic prober for a single backend.
pub struct Checker {
    backend_name: String,
    url: Uri,
    interval: Duration,
    timeout: Duration,
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl Checker {
    pub fn new(backend_name: String, base: &Uri, cfg: &HealthCheck) -> Result<Self, String> {
        let url = join_path(base, &cfg.path)
            .map_err(|e| format!("invalid health check path '{}': {}", cfg.path, e))?;

        let client = Client::builder(TokioExecutor::new()).build_http();

        Ok(Self {
            backend_name,
            url,
            interval: cfg.interval,
            timeout: cfg.timeout,
            client,
        })
    }

    /// Probes until the shutdown watch fires; cancellation latency is one
    /// `select!` round, well under the interval.
    pub async fn run(
        self,
        state: Arc<HealthState>,
        metrics: Arc<Metrics>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting health checks for {}", self.backend_name);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let success = self.probe().await;
                    match state.observe(success) {
                        Some(Transition::Ejected) => {
                            warn!("Backend {} marked as unhealthy", self.backend_name);
                            metrics.set_backend_health(&self.backend_name, false);
                        }
                        Some(Transition::Recovered) => {
                            info!("Backend {} marked as healthy", self.backend_name);
                            metrics.set_backend_health(&self.backend_name, true);
                        }
                        None => {}
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Stopping health checks for {}", self.backend_name);
                    return;
                }
            }
        }
    }

    /// One probe. Success is exactly a 2xx status inside the timeout; the
    /// client never follows redirects.
    async fn probe(&self) -> bool {
        let request = match Request::builder()
            .method(Method::GET)
            .uri(self.url.clone())
            .header(header::USER_AGENT, PROBE_USER_AGENT)
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Empty::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!("Failed to build probe request for {}: {}", self.url, e);
                return false;
            }
        };

        match tokio::time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if success {
                    debug!("Probe {} -> {}", self.url, response.status());
                } else {
                    warn!("Probe {} -> {}", self.url, response.status());
                }
                success
            }
            Ok(Err(e)) => {
                debug!("Probe {} failed: {}", self.url, e);
                false
            }
            Err(_) => {
                debug!("Probe {} timed out after {:?}", self.url, self.timeout);
                false
            }
        }
    }
}

fn join_path(base: &Uri, path: &str) -> Result<Uri, http::Error> {
    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path)?);
    Uri::from_parts(parts).map_err(http::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use http_body_util::Full;
    use hyper::body::Incoming;
    use hyper::service::service_fn;
    use hyper::{Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    fn check_config(interval: Duration, timeout: Duration) -> HealthCheck {
        HealthCheck {
            enabled: true,
            path: String::from("/health"),
            interval,
            timeout,
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        }
    }

    async fn start_backend(ok: Arc<AtomicBool>, probes: Arc<AtomicUsize>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let ok = ok.clone();
                let probes = probes.clone();
                let service = service_fn(move |_req: hyper::Request<Incoming>| {
                    let ok = ok.clone();
                    let probes = probes.clone();
                    async move {
                        probes.fetch_add(1, Ordering::SeqCst);
                        let status = if ok.load(Ordering::SeqCst) {
                            StatusCode::OK
                        } else {
                            StatusCode::INTERNAL_SERVER_ERROR
                        };
                        Ok::<_, std::convert::Infallible>(
                            Response::builder()
                                .status(status)
                                .body(Full::new(Bytes::new()))
                                .unwrap(),
                        )
                    }
                });

                tokio::spawn(async move {
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        port
    }

    #[test]
    fn joins_base_and_probe_path() {
        let base: Uri = "http://127.0.0.1:8001".parse().unwrap();
        let url = join_path(&base, "/healthz").unwrap();
        assert_eq!(url.to_string(), "http://127.0.0.1:8001/healthz");
    }

    #[tokio::test]
    async fn ejects_and_recovers_through_probes() {
        let ok = Arc::new(AtomicBool::new(false));
        let probes = Arc::new(AtomicUsize::new(0));
        let port = start_backend(ok.clone(), probes.clone()).await;

        let base: Uri = format!("http://127.0.0.1:{port}").parse().unwrap();
        let checker = Checker::new(
            String::from("g-b1"),
            &base,
            &check_config(Duration::from_millis(20), Duration::from_millis(500)),
        )
        .unwrap();

        let state = Arc::new(HealthState::new(2, 3));
        let metrics = Arc::new(Metrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(checker.run(state.clone(), metrics.clone(), shutdown_rx));

        // three consecutive 500s eject
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.is_healthy() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("backend never ejected");
        assert_eq!(
            metrics.backend_health.with_label_values(&["g-b1"]).get(),
            0.0
        );

        // two consecutive 200s recover
        ok.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !state.is_healthy() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("backend never recovered");
        assert_eq!(
            metrics.backend_health.with_label_values(&["g-b1"]).get(),
            1.0
        );

        let _ = shutdown_tx.send(true);
        assert!(probes.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn probe_timeout_counts_as_failure() {
        // nothing listening: connect errors are failures too, but use a
        // sleeping server to exercise the timeout arm specifically
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                // accept and stall without answering
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    drop(stream);
                });
            }
        });

        let base: Uri = format!("http://127.0.0.1:{port}").parse().unwrap();
        let checker = Checker::new(
            String::from("g-slow"),
            &base,
            &check_config(Duration::from_millis(20), Duration::from_millis(50)),
        )
        .unwrap();

        assert!(!checker.probe().await);
    }
}

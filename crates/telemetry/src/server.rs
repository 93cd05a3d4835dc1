use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, info};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::metrics::Metrics;

/// Serves the Prometheus text exposition on its own bind address.
pub struct MetricsServer {
    listener: TcpListener,
    path: String,
    metrics: Arc<Metrics>,
}

impl MetricsServer {
    pub async fn bind(
        addr: SocketAddr,
        path: String,
        metrics: Arc<Metrics>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Metrics endpoint listening on {}{}", addr, path);
        Ok(Self {
            listener,
            path,
            metrics,
        })
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, _) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            debug!("metrics accept failed: {e}");
                            continue;
                        }
                    };

                    let metrics = self.metrics.clone();
                    let path = self.path.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let metrics = metrics.clone();
                            let path = path.clone();
                            async move { Ok::<_, Infallible>(handle(req, &path, &metrics)) }
                        });

                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("metrics connection error: {e}");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("Metrics endpoint stopped");
                    return;
                }
            }
        }
    }
}

fn handle(req: Request<Incoming>, path: &str, metrics: &Metrics) -> Response<Full<Bytes>> {
    if req.uri().path() == path {
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", prometheus::TEXT_FORMAT)
            .body(Full::new(Bytes::from(metrics.render())))
            .expect("static response")
    } else {
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .expect("static response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use hyper_util::client::legacy::{connect::HttpConnector, Client};

    #[tokio::test]
    async fn serves_exposition_and_404s_elsewhere() {
        let metrics = Arc::new(Metrics::new());
        metrics.set_backend_health("b1", true);

        let server = MetricsServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            String::from("/metrics"),
            metrics,
        )
        .await
        .unwrap();
        let addr = server.listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.run(shutdown_rx));

        let client: Client<HttpConnector, Full<Bytes>> =
            Client::builder(hyper_util::rt::TokioExecutor::new()).build_http();

        let ok = client
            .get(format!("http://{addr}/metrics").parse().unwrap())
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
        let body = ok.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("backend_health_status"));

        let missing = client
            .get(format!("http://{addr}/other").parse().unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        let _ = shutdown_tx.send(true);
    }
}

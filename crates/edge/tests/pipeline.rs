use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::sync::watch;

use wisp_config::config;
use wisp_edge::FallbackListener;
use wisp_lb::BackendSet;
use wisp_proxy::{ProxyHandler, Router};
use wisp_telemetry::Metrics;

async fn start_backend(body: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => break,
            };
            let service = service_fn(move |_req: Request<Incoming>| async move {
                Ok::<_, std::convert::Infallible>(Response::new(Full::new(Bytes::from(body))))
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

fn make_handler(backend_port: u16) -> Arc<ProxyHandler> {
    let groups = vec![config::BackendGroup {
        name: String::from("g"),
        targets: vec![config::Target {
            url: format!("http://127.0.0.1:{backend_port}"),
            weight: 1,
        }],
        strategy: String::from("round_robin"),
        health_check: config::HealthCheck::default(),
        timeout: Duration::from_secs(2),
        retry_count: 0,
    }];
    let routing = config::Routing {
        rules: Vec::new(),
        default_backend: Some(String::from("g")),
    };

    let backends = Arc::new(BackendSet::from_config(&groups).unwrap());
    let metrics = Arc::new(Metrics::new());
    Arc::new(ProxyHandler::new(Router::new(&routing), backends, metrics))
}

fn http_client() -> Client<HttpConnector, Full<Bytes>> {
    Client::builder(TokioExecutor::new()).build_http()
}

#[tokio::test]
async fn fallback_listener_runs_the_same_pipeline() {
    let backend_port = start_backend("plain old http").await;
    let handler = make_handler(backend_port);

    let listener = FallbackListener::bind("127.0.0.1:0".parse().unwrap(), handler)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(listener.run(shutdown_rx));

    let client = http_client();

    let response = client
        .get(format!("http://{addr}/some/path").parse().unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["via"], "wisp");
    assert_eq!(
        response.headers()["x-backend"],
        format!("g-http://127.0.0.1:{backend_port}")
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"plain old http");

    // the proxy's own health endpoint is served, not forwarded
    let response = client
        .get(format!("http://{addr}/health").parse().unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "healthy");
}

#[tokio::test]
async fn shutdown_stops_accepting_new_connections() {
    let backend_port = start_backend("ok").await;
    let handler = make_handler(backend_port);

    let listener = FallbackListener::bind("127.0.0.1:0".parse().unwrap(), handler)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(listener.run(shutdown_rx));

    // server works before shutdown
    let client = http_client();
    let response = client
        .get(format!("http://{addr}/x").parse().unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("listener did not stop")
        .unwrap();

    // the socket is gone; new requests fail to connect
    let err = client.get(format!("http://{addr}/x").parse().unwrap()).await;
    assert!(err.is_err());
}

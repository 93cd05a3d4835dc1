use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http::Request;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, info};
use tokio::net::TcpListener;
use tokio::sync::watch;

use wisp_proxy::ProxyHandler;
use wisp_transport::BoxError;

/// Plain-TCP HTTP/1.1 ingress for clients without HTTP/3. Same handler,
/// same pipeline once the request is parsed.
pub struct FallbackListener {
    listener: TcpListener,
    handler: Arc<ProxyHandler>,
}

impl FallbackListener {
    pub async fn bind(addr: SocketAddr, handler: Arc<ProxyHandler>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("HTTP/1.1 fallback listener on {}", addr);
        Ok(Self { listener, handler })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            debug!("fallback accept failed: {e}");
                            continue;
                        }
                    };

                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let handler = handler.clone();
                            async move {
                                let req = req.map(|body| body.map_err(BoxError::from).boxed());
                                Ok::<_, Infallible>(handler.handle(req, remote_addr).await)
                            }
                        });

                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("fallback connection error: {e}");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("Stopping fallback listener");
                    return;
                }
            }
        }
    }
}

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes};
use h3::server::RequestStream;
use h3_quinn::Connection as H3QuinnConnection;
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper::body::{Body, Frame};
use log::{debug, error, info, warn};
use quinn::crypto::rustls::QuicServerConfig;
use quinn::{congestion, Endpoint, IdleTimeout, TransportConfig, VarInt};
use tokio::sync::{mpsc, watch};

use wisp_config::config::Server;
use wisp_proxy::ProxyHandler;
use wisp_transport::{BoxError, ProxyBody};
use wisp_utils::tls;

use crate::ListenerError;

/// How long in-flight streams get to finish after the shutdown signal.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

// h3 needs the client's control and QPACK unidirectional streams
const MIN_UNI_STREAMS: u32 = 3;

/// QUIC endpoint terminating TLS 1.3 + HTTP/3 and feeding the handler.
pub struct QuicListener {
    endpoint: Endpoint,
    handler: Arc<ProxyHandler>,
    shutdown: watch::Receiver<bool>,
}

impl QuicListener {
    pub fn bind(
        cfg: &Server,
        handler: Arc<ProxyHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ListenerError> {
        let addr: SocketAddr = cfg.address.parse().map_err(|e| {
            ListenerError::Config(format!("invalid listen address {}: {}", cfg.address, e))
        })?;

        let (certs, key) = tls::load_keypair(&cfg.cert_file, &cfg.key_file)
            .map_err(|e| ListenerError::Tls(e.to_string()))?;

        let provider = rustls::crypto::ring::default_provider();
        let mut tls_config = rustls::ServerConfig::builder_with_provider(provider.into())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(|e| ListenerError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ListenerError::Tls(e.to_string()))?;
        tls_config.alpn_protocols = vec![b"h3".to_vec()];
        if cfg.quic.enable_0rtt {
            // early data can be replayed; the config default keeps this off
            tls_config.max_early_data_size = u32::MAX;
        }

        let quic_tls = QuicServerConfig::try_from(tls_config)
            .map_err(|e| ListenerError::Tls(e.to_string()))?;

        let mut transport = TransportConfig::default();
        transport.max_concurrent_bidi_streams(VarInt::from_u32(cfg.quic.max_streams));
        transport.max_concurrent_uni_streams(VarInt::from_u32(
            (cfg.quic.max_streams / 4).max(MIN_UNI_STREAMS),
        ));
        let idle: IdleTimeout = cfg
            .quic
            .idle_timeout
            .try_into()
            .map_err(|e| ListenerError::Config(format!("invalid idle timeout: {e}")))?;
        transport.max_idle_timeout(Some(idle));
        transport.keep_alive_interval(Some(cfg.quic.keep_alive));
        apply_congestion(&mut transport, &cfg.quic.congestion_algorithm)?;

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_tls));
        server_config.transport_config(Arc::new(transport));

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ListenerError::Bind(format!("UDP {}: {}", addr, e)))?;

        info!("HTTP/3 listener on {} (ALPN h3)", addr);

        Ok(Self {
            endpoint,
            handler,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Accepts connections until shutdown, then drains within
    /// `DRAIN_TIMEOUT` before closing the socket.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                incoming = self.endpoint.accept() => {
                    let Some(incoming) = incoming else { break };
                    let handler = self.handler.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        let remote_addr = incoming.remote_address();
                        if let Err(e) = handle_connection(incoming, handler, shutdown).await {
                            debug!("Connection from {} ended with error: {}", remote_addr, e);
                        }
                    });
                }
                _ = self.shutdown.changed() => {
                    info!("Stopping HTTP/3 listener");
                    break;
                }
            }
        }

        if tokio::time::timeout(DRAIN_TIMEOUT, self.endpoint.wait_idle())
            .await
            .is_err()
        {
            warn!("Drain deadline exceeded, closing remaining connections");
            self.endpoint.close(VarInt::from_u32(0), b"shutting down");
        }
    }
}

fn apply_congestion(
    transport: &mut TransportConfig,
    algorithm: &str,
) -> Result<(), ListenerError> {
    match algorithm.to_lowercase().as_str() {
        "cubic" => {
            transport.congestion_controller_factory(Arc::new(congestion::CubicConfig::default()));
        }
        "bbr" => {
            transport.congestion_controller_factory(Arc::new(congestion::BbrConfig::default()));
        }
        "newreno" => {
            transport
                .congestion_controller_factory(Arc::new(congestion::NewRenoConfig::default()));
        }
        other => {
            return Err(ListenerError::Config(format!(
                "unsupported congestion algorithm: {other}"
            )))
        }
    }
    Ok(())
}

async fn handle_connection(
    incoming: quinn::Incoming,
    handler: Arc<ProxyHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BoxError> {
    let connection = incoming.accept()?.await?;
    let remote_addr = connection.remote_address();
    debug!("QUIC connection established from {}", remote_addr);

    let mut h3: h3::server::Connection<H3QuinnConnection, Bytes> = h3::server::builder()
        .build(H3QuinnConnection::new(connection))
        .await?;

    loop {
        tokio::select! {
            resolved = h3.accept() => {
                match resolved {
                    Ok(Some(resolver)) => {
                        let (request, stream) = match resolver.resolve_request().await {
                            Ok(parts) => parts,
                            Err(e) => {
                                error!("Failed to resolve request: {e}");
                                continue;
                            }
                        };

                        let handler = handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_request(request, stream, handler, remote_addr).await
                            {
                                debug!("HTTP/3 stream error: {e}");
                            }
                        });
                    }
                    Ok(None) => {
                        debug!("HTTP/3 connection closed by peer: {}", remote_addr);
                        break;
                    }
                    Err(e) => {
                        debug!("HTTP/3 accept error: {e}");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("Shutdown: no longer accepting streams from {}", remote_addr);
                break;
            }
        }
    }

    Ok(())
}

/// Bridges one HTTP/3 stream through the handler: request body in via a
/// bounded channel, response head + body frames out.
async fn handle_request<S>(
    request: Request<()>,
    stream: RequestStream<S, Bytes>,
    handler: Arc<ProxyHandler>,
    remote_addr: SocketAddr,
) -> Result<(), BoxError>
where
    S: h3::quic::BidiStream<Bytes> + Send + 'static,
    S::RecvStream: Send + 'static,
    S::SendStream: Send + 'static,
{
    let (mut send, recv) = stream.split();

    let (parts, _) = request.into_parts();
    let request = Request::from_parts(parts, channel_body(recv));

    let response = handler.handle(request, remote_addr).await;
    let (parts, mut body) = response.into_parts();

    send.send_response(Response::from_parts(parts, ())).await?;
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Ok(data) = frame.into_data() {
                    send.send_data(data).await?;
                }
            }
            // dropping the send half without finish() resets the stream
            Err(e) => return Err(e),
        }
    }
    send.finish().await?;

    Ok(())
}

// bounded: at most 8 frames buffered between the QUIC stream and the
// upstream dispatch
const BODY_CHANNEL_CAPACITY: usize = 8;

fn channel_body<R>(mut recv: RequestStream<R, Bytes>) -> ProxyBody
where
    R: h3::quic::RecvStream + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, BoxError>>(BODY_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        loop {
            match recv.recv_data().await {
                Ok(Some(mut chunk)) => {
                    let data = chunk.copy_to_bytes(chunk.remaining());
                    if tx.send(Ok(Frame::data(data))).await.is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    let _ = tx.send(Err(BoxError::from(e))).await;
                    return;
                }
            }
        }
    });

    ChannelBody { rx }.boxed()
}

struct ChannelBody {
    rx: mpsc::Receiver<Result<Frame<Bytes>, BoxError>>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

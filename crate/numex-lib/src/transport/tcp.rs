//! TCP transport for the number exchange.
//!
//! Serves [NumberService] over plain TCP or TLS, and opens client
//! sessions to such a server. Both sides frame bincode messages with a
//! length prefix.

use std::net::SocketAddr;

use anyhow::Context as _;
use futures::future::Either;
use futures::prelude::*;
use rustls::pki_types::ServerName;
use tarpc::serde_transport as transport;
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_serde::formats::Bincode;
use tarpc::tokio_util::codec::length_delimited::LengthDelimitedCodec;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::client::Connect;
use crate::metrics::{self, MetricsNumberClient, MetricsNumberServer};
use crate::model::service::{
    NumberService, NumberServiceClient, NumberServiceRequest, NumberServiceResponse,
};
use crate::model::{ClientError, ConfigError};
use crate::server::{NumberServer, WorkerPool};
use crate::transport::hostport::HostPort;
use crate::transport::security::{ClientSecurity, ClientTransport, ServerTransport};

/// Port used by client and server when none is given.
pub const DEFAULT_PORT: u16 = 50051;

/// Stub of a client session over TCP.
pub type TcpStub =
    MetricsNumberClient<tarpc::client::Channel<NumberServiceRequest, NumberServiceResponse>>;

pub type TcpNumberServiceClient = NumberServiceClient<TcpStub>;

#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Maximum number of requests handled at the same time, over all
    /// connections.
    pub max_workers: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_workers: WorkerPool::DEFAULT_CAPACITY,
        }
    }
}

/// A server accepting connections in the background.
///
/// Dropping the handle shuts the server down, without waiting.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    /// The address the server listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and close the open ones.
    ///
    /// Returns once the listener and all connections are gone.
    /// Handlers already running are left to finish on their own.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.shutdown_tx.closed().await;
    }
}

/// Start the server, listening on the given address.
pub async fn start_server(
    addr: SocketAddr,
    transport: ServerTransport,
    options: ServerOptions,
) -> anyhow::Result<ServerHandle> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    let addr = listener.local_addr()?;
    log::debug!("Listening for RPC connections on {addr}");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let pool = WorkerPool::new(options.max_workers);
    let connection_rx = shutdown_rx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select!(
                _ = shutdown_rx.wait_for(|stop| *stop).map(|_| ()) => {
                    log::debug!("Shutting down listener");
                    return;
                }
                res = listener.accept() => {
                    match res {
                        Ok((stream, peer)) => {
                            let transport = transport.clone();
                            let pool = pool.clone();
                            let mut shutdown_rx = connection_rx.clone();
                            tokio::spawn(async move {
                                tokio::select!(
                                    _ = shutdown_rx.wait_for(|stop| *stop) => {
                                        log::debug!("{peer}: closing connection on shutdown");
                                    }
                                    _ = handle_connection(stream, peer, transport, pool) => {}
                                );
                            });
                        }
                        Err(err) => log::debug!("Failed to accept connection: {err}"),
                    }
                }
            );
        }
    });

    Ok(ServerHandle { addr, shutdown_tx })
}

/// Authenticate a new connection, then serve it until it is closed.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    transport: ServerTransport,
    pool: WorkerPool,
) {
    let connection = match accept(stream, &transport, pool).await {
        Ok(connection) => connection,
        Err(err) => {
            metrics::record_server_connection(false);
            log::debug!("{peer}: connection rejected: {err:#}");
            return;
        }
    };
    metrics::record_server_connection(true);
    log::debug!("{peer}: connection accepted");

    connection.await;
    log::debug!("{peer}: connection closed");
}

async fn accept(
    stream: TcpStream,
    transport: &ServerTransport,
    pool: WorkerPool,
) -> anyhow::Result<impl Future<Output = ()>> {
    stream.set_nodelay(true)?;

    Ok(match transport {
        ServerTransport::Plain => Either::Left(serve_connection(stream, pool)),
        ServerTransport::Tls(acceptor) => {
            let stream = acceptor.accept(stream).await.context("TLS handshake")?;

            Either::Right(serve_connection(stream, pool))
        }
    })
}

/// Serve requests from one connection, running handlers on `pool`.
///
/// Once the pool is full, no more requests are read from the
/// connection until a handler finishes.
fn serve_connection<S>(stream: S, pool: WorkerPool) -> impl Future<Output = ()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = LengthDelimitedCodec::builder().new_framed(stream);

    BaseChannel::with_defaults(transport::new(framed, Bincode::default()))
        .execute(MetricsNumberServer::new(NumberServer::new().serve()))
        .for_each(move |fut| {
            let pool = pool.clone();
            async move {
                if let Err(err) = pool.spawn(metrics::track_in_flight_request(fut)).await {
                    log::warn!("Dropped request: {err}");
                }
            }
        })
}

#[derive(Clone, Default, Debug)]
pub struct ClientOptions {
    /// TLS server name to check; defaults to the host.
    pub domain: Option<String>,
}

/// Opens sessions to a server over TCP.
///
/// Security credentials are loaded again on each attempt, so fixed
/// files are picked up on the next reconnection.
#[derive(Clone, Debug)]
pub struct TcpConnect {
    host: String,
    port: u16,
    security: ClientSecurity,
    options: ClientOptions,
}

impl TcpConnect {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        security: ClientSecurity,
        options: ClientOptions,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            security,
            options,
        }
    }

    fn server_name(&self) -> Result<ServerName<'static>, ConfigError> {
        let name = self.options.domain.as_deref().unwrap_or(&self.host);
        let name = name
            .strip_prefix('[')
            .and_then(|n| n.strip_suffix(']'))
            .unwrap_or(name);

        ServerName::try_from(name.to_string()).map_err(|_| ConfigError::ServerName(name.to_string()))
    }

    async fn open(&self, transport: &ClientTransport) -> anyhow::Result<TcpStub> {
        let hostport = HostPort::resolve(&self.host, self.port).await?;
        let stream = TcpStream::connect(hostport.addr())
            .await
            .with_context(|| format!("{hostport}"))?;
        stream.set_nodelay(true)?;

        match transport {
            ClientTransport::Plain => Ok(new_stub(stream)),
            ClientTransport::Tls(connector) => {
                let stream = connector
                    .connect(self.server_name()?, stream)
                    .await
                    .with_context(|| format!("{hostport}: TLS handshake"))?;

                Ok(new_stub(stream))
            }
        }
    }
}

impl Connect for TcpConnect {
    type Stub = TcpStub;

    async fn run(&self) -> Result<TcpStub, ClientError> {
        let transport = ClientTransport::build(&self.security)?;
        if self.security.is_tls() {
            self.server_name()?;
        }

        let res = self.open(&transport).await;
        metrics::record_client_connection(&res);

        res.map_err(ClientError::Connect)
    }
}

fn new_stub<S>(stream: S) -> TcpStub
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let codec_builder = LengthDelimitedCodec::builder();
    let transport = transport::new(codec_builder.new_framed(stream), Bincode::default());

    MetricsNumberClient::new(tarpc::client::new(Default::default(), transport).spawn())
}

/// Open a single session to the given server.
pub async fn connect_client(
    host: &str,
    port: u16,
    security: ClientSecurity,
    options: ClientOptions,
) -> Result<TcpNumberServiceClient, ClientError> {
    let stub = TcpConnect::new(host, port, security, options).run().await?;

    Ok(NumberServiceClient::from(stub))
}

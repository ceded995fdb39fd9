//! Chain assembly: session, framing and client stacked over one connection.

use crate::client::{ClientInbound, PsClient};
use crate::config::ChainConfig;
use crate::error::{Error, Result};
use crate::framing::{FrameCodec, FrameReader, FrameWriter};
use crate::pool::WorkerPool;
use crate::proxy::{self, RemoteInterface};
use crate::service::ServiceFactory;
use crate::session::{Session, SessionHandle, SessionState};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// One connection's layers, handled through its top-level client.
///
/// Clones share the same chain. The chain closes when [`Chain::close`] is
/// called, when the peer disconnects, or when the last clone and the last
/// proxy bound to it are dropped.
#[derive(Clone)]
pub struct Chain {
    client: Arc<PsClient>,
    session: SessionHandle,
    peer_addr: Option<SocketAddr>,
}

impl Chain {
    /// The client at the top of the chain.
    #[must_use]
    pub const fn ps_client(&self) -> &Arc<PsClient> {
        &self.client
    }

    /// Resolve a typed proxy for `service_id` on the peer.
    ///
    /// # Errors
    ///
    /// Returns an argument error if `service_id` is empty.
    pub fn create_service<I: RemoteInterface>(&self, service_id: &str) -> Result<I> {
        proxy::create_service(Some(self), service_id)
    }

    /// Address of the peer, when connected over TCP.
    #[must_use]
    pub const fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Id of the underlying session.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.session.id()
    }

    /// Current state of the underlying session.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Whether the chain has left the open state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() != SessionState::Open
    }

    /// Close the chain. Returns `true` only for the call that initiated it.
    pub fn close(&self) -> bool {
        self.client.close()
    }

    /// Wait until the connection is released.
    pub async fn closed(&self) {
        self.session.wait_closed().await;
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id())
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Shared core of both factories.
struct ChainFactory {
    config: ChainConfig,
    workers: WorkerPool,
    services: Arc<dyn ServiceFactory>,
}

impl ChainFactory {
    fn new(config: ChainConfig, services: Arc<dyn ServiceFactory>) -> Result<Self> {
        if config.timeout.is_zero() {
            return Err(Error::Argument("timeout must be positive".to_string()));
        }
        let workers = WorkerPool::new(config.thread_count)?;
        Ok(Self {
            config,
            workers,
            services,
        })
    }

    fn assemble<S>(&self, stream: S, peer_addr: Option<SocketAddr>) -> Chain
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session = Session::new(stream, &self.config.session);
        let handle = session.handle();

        let client = Arc::new(PsClient::new(
            Box::new(FrameWriter::new(handle.clone())),
            self.config.codec,
            self.config.timeout,
            Arc::clone(&self.services),
            self.workers.clone(),
        ));
        let codec = FrameCodec::from_config(&self.config.framing);
        session.start(FrameReader::new(codec, ClientInbound::new(&client)));

        debug!("Assembled chain {} for {:?}", handle.id(), peer_addr);
        Chain {
            client,
            session: handle,
            peer_addr,
        }
    }
}

/// Builds chains for accepted connections and owns them until they close.
pub struct ServerFactory {
    factory: ChainFactory,
    connections: Arc<DashMap<u64, Chain>>,
    shutdown: CancellationToken,
}

impl ServerFactory {
    /// Create a server factory with `thread_count` workers and a per-call
    /// `timeout`, serving the services `services` resolves.
    ///
    /// # Errors
    ///
    /// Returns an argument error if `thread_count` or `timeout` is zero, or
    /// if no tokio runtime is running.
    pub fn build(
        thread_count: usize,
        timeout: Duration,
        services: Arc<dyn ServiceFactory>,
    ) -> Result<Self> {
        let config = ChainConfig::default()
            .with_thread_count(thread_count)
            .with_timeout(timeout);
        Self::with_config(config, services)
    }

    /// Create a server factory from a full configuration.
    ///
    /// # Errors
    ///
    /// Same as [`ServerFactory::build`].
    pub fn with_config(config: ChainConfig, services: Arc<dyn ServiceFactory>) -> Result<Self> {
        Ok(Self {
            factory: ChainFactory::new(config, services)?,
            connections: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Build a chain over an accepted stream and track it until it closes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] once [`ServerFactory::shutdown`] has
    /// been called; the stream is dropped.
    pub fn accept<S>(&self, stream: S, peer_addr: Option<SocketAddr>) -> Result<Chain>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            debug!("Refusing connection from {:?} after shutdown", peer_addr);
            return Err(Error::Disconnected);
        }

        let chain = self.factory.assemble(stream, peer_addr);
        let id = chain.id();
        self.connections.insert(id, chain.clone());

        let session = chain.session.clone();
        let connections = Arc::clone(&self.connections);
        tokio::spawn(async move {
            session.wait_closed().await;
            connections.remove(&id);
            debug!("Chain {} released", id);
        });

        // Shutdown may have drained the table between the check and the insert.
        if self.shutdown.is_cancelled() {
            chain.close();
            return Err(Error::Disconnected);
        }

        Ok(chain)
    }

    /// Accept connections from `listener` until [`ServerFactory::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("RPC server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    info!("RPC server shutdown requested");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                            }
                            if let Err(e) = self.accept(stream, Some(addr)) {
                                debug!("Dropped connection from {}: {}", addr, e);
                            }
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Chains currently open.
    #[must_use]
    pub fn connections(&self) -> Vec<Chain> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of chains currently open.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Stop accepting, close every chain and stop the workers.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        loop {
            let chains = self.connections();
            if chains.is_empty() {
                break;
            }
            for chain in &chains {
                chain.close();
            }
            for chain in &chains {
                chain.closed().await;
                self.connections.remove(&chain.id());
            }
        }

        self.factory.workers.stop().await;
        info!("RPC server stopped");
    }
}

impl std::fmt::Debug for ServerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerFactory")
            .field("config", &self.factory.config)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

/// Builds chains over outbound connections.
pub struct ClientFactory {
    factory: ChainFactory,
}

impl ClientFactory {
    /// Create a client factory with `thread_count` workers and a per-call
    /// `timeout`. Requests the peer sends back are served from `services`.
    ///
    /// # Errors
    ///
    /// Returns an argument error if `thread_count` or `timeout` is zero, or
    /// if no tokio runtime is running.
    pub fn build(
        thread_count: usize,
        timeout: Duration,
        services: Arc<dyn ServiceFactory>,
    ) -> Result<Self> {
        let config = ChainConfig::default()
            .with_thread_count(thread_count)
            .with_timeout(timeout);
        Self::with_config(config, services)
    }

    /// Create a client factory from a full configuration.
    ///
    /// # Errors
    ///
    /// Same as [`ClientFactory::build`].
    pub fn with_config(config: ChainConfig, services: Arc<dyn ServiceFactory>) -> Result<Self> {
        Ok(Self {
            factory: ChainFactory::new(config, services)?,
        })
    }

    /// Connect to `addr`, retrying per the configured policy.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt: an I/O error, or a timeout if
    /// the attempt exceeded the connect deadline.
    #[instrument(skip(self))]
    pub async fn connect(&self, addr: SocketAddr) -> Result<Chain> {
        let config = &self.factory.config;
        let attempts = config.connect_retries.max(1);
        let mut last_error = Error::Disconnected;

        for attempt in 1..=attempts {
            debug!("Connecting to {} (attempt {}/{})", addr, attempt, attempts);
            match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }
                    info!("Connected to {}", addr);
                    return Ok(self.factory.assemble(stream, Some(addr)));
                }
                Ok(Err(e)) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    last_error = Error::Io(e);
                }
                Err(_) => {
                    warn!("Connect to {} timed out", addr);
                    last_error = Error::Timeout(config.connect_timeout);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(config.retry_delay).await;
            }
        }

        Err(last_error)
    }

    /// Build a chain over an already connected stream.
    pub fn attach<S>(&self, stream: S) -> Chain
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.factory.assemble(stream, None)
    }

    /// Stop the workers. Chains built by this factory can still issue calls
    /// but no longer serve requests from their peers.
    pub async fn stop(&self) {
        self.factory.workers.stop().await;
    }
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("config", &self.factory.config)
            .finish_non_exhaustive()
    }
}

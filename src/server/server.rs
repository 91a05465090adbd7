//! Chunk server.
//!
//! Provides [`ChunkServer`] for accepting client connections and serving
//! terrain chunks from a [`ChunkSource`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::session::{ServerSession, ServerSessionId};
use super::source::{ChunkSource, SourceError};
use crate::core::CodecError;
use crate::core::constants::{
    DEFAULT_MAX_CLIENTS, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_PORT, DEFAULT_SERVER_COMPRESSION_LEVEL,
};
use crate::extensions::CompressionConfig;
use crate::sync::{Codec, PipelineConfig, PipelineError};
use crate::transport::{FrameError, TransportError};

/// Errors that can occur in the chunk server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// Chunk could not be loaded.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Response body could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Encode pipeline error.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Response could not be framed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Request could not be read.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server is shut down.
    #[error("server shut down")]
    Shutdown,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,

    /// Maximum number of connections served at once; later ones wait.
    pub max_clients: usize,

    /// Encode queue capacity per session.
    pub max_queue_size: usize,

    /// Compress response bodies with zstd.
    pub enable_compression: bool,

    /// zstd level used when compression is enabled.
    pub compression_level: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_clients: DEFAULT_MAX_CLIENTS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            enable_compression: true,
            compression_level: DEFAULT_SERVER_COMPRESSION_LEVEL,
        }
    }
}

impl ServerConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_clients == 0 {
            return Err(ServerError::Config("max_clients must be at least 1".into()));
        }
        PipelineConfig {
            max_queue_size: self.max_queue_size,
        }
        .validate()
        .map_err(|e| ServerError::Config(e.to_string()))
    }

    fn codec(&self) -> Codec {
        if self.enable_compression {
            Codec::with_compression(CompressionConfig {
                level: self.compression_level,
                ..CompressionConfig::default()
            })
        } else {
            Codec::new()
        }
    }
}

/// Builder for creating a [`ServerConfig`].
#[derive(Debug)]
pub struct ChunkServerBuilder {
    config: ServerConfig,
}

impl ChunkServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the maximum number of concurrently served connections.
    pub fn max_clients(mut self, max: usize) -> Self {
        self.config.max_clients = max;
        self
    }

    /// Set the per-session encode queue capacity.
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config.max_queue_size = size;
        self
    }

    /// Enable or disable compression.
    pub fn compression(mut self, enabled: bool) -> Self {
        self.config.enable_compression = enabled;
        self
    }

    /// Set the zstd compression level.
    pub fn compression_level(mut self, level: i32) -> Self {
        self.config.compression_level = level;
        self
    }

    /// Build the server configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl Default for ChunkServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for stopping a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    /// Stop accepting connections and close every session after its
    /// current response.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Check if shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// A terrain chunk server.
///
/// # Example
///
/// ```no_run
/// use terrain_sync::server::{ChunkServer, ChunkServerBuilder, FileChunkSource};
///
/// # async fn run() -> Result<(), terrain_sync::server::ServerError> {
/// let config = ChunkServerBuilder::new().build();
/// let server = ChunkServer::bind(config, FileChunkSource::new("dem_tiles")).await?;
/// println!("serving on {}", server.local_addr());
/// server.run().await
/// # }
/// ```
#[derive(Debug)]
pub struct ChunkServer<S> {
    /// Server configuration.
    config: ServerConfig,

    /// Listening socket.
    listener: TcpListener,

    /// Where chunk contents come from.
    source: Arc<S>,

    /// Codec shared by every session's encoder.
    codec: Arc<Codec>,

    /// Limits concurrently served connections.
    slots: Arc<Semaphore>,

    /// Shutdown signal.
    shutdown: Arc<watch::Sender<bool>>,

    /// Next session ID.
    next_session: AtomicU64,

    /// Address the listener is bound to.
    local_addr: SocketAddr,
}

impl<S: ChunkSource> ChunkServer<S> {
    /// Bind to an address.
    pub async fn bind(config: ServerConfig, source: S) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| ServerError::BindFailed(format!("{}: {e}", config.bind_addr)))?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = watch::channel(false);

        info!(%local_addr, max_clients = config.max_clients, "chunk server listening");

        Ok(Self {
            codec: Arc::new(config.codec()),
            slots: Arc::new(Semaphore::new(config.max_clients)),
            config,
            listener,
            source: Arc::new(source),
            shutdown: Arc::new(shutdown),
            next_session: AtomicU64::new(1),
            local_addr,
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a handle that can stop the server.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Gracefully shut down the server.
    pub fn shutdown(&self) {
        self.handle().shutdown();
    }

    /// Accept and serve connections until shutdown.
    ///
    /// Returns once every session has finished.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut sessions = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => continue,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        sessions.spawn(self.serve(stream, peer));
                    }
                    Err(e) => warn!(%e, "accept failed"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(%e, "session task panicked");
                    }
                }
            }
        }

        info!(active = sessions.len(), "chunk server shutting down");
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!(%e, "session task panicked");
            }
        }
        Ok(())
    }

    fn serve(&self, stream: TcpStream, peer: SocketAddr) -> impl Future<Output = ()> + Send + 'static {
        let id = ServerSessionId::new(self.next_session.fetch_add(1, Ordering::Relaxed));
        let slots = Arc::clone(&self.slots);
        let source = Arc::clone(&self.source);
        let codec = Arc::clone(&self.codec);
        let pipeline = PipelineConfig {
            max_queue_size: self.config.max_queue_size,
        };
        let shutdown = self.shutdown.subscribe();

        async move {
            if slots.available_permits() == 0 {
                debug!(session = %id, %peer, "all client slots busy, waiting");
            }
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };
            let _ = stream.set_nodelay(true);
            info!(session = %id, %peer, "client connected");

            let result = match ServerSession::new(id, Some(peer), source, codec, pipeline) {
                Ok(session) => session.run(stream, shutdown).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => info!(session = %id, %peer, "client disconnected"),
                Err(e) => warn!(session = %id, %peer, %e, "session ended with error"),
            }
        }
    }
}

impl<S> Drop for ChunkServer<S> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

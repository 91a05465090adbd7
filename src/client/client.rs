//! Networked chunk client.
//!
//! Provides [`ChunkClient`] for requesting terrain chunks from a server and
//! [`ChunkReceiver`] for consuming the reconstructed grids.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::reconcile::{ChunkUpdate, Reconciler};
use crate::core::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_PORT};
use crate::core::{ApplyError, ChunkKey, ChunkSink, CodecError, Lod, Value};
use crate::extensions::CompressionConfig;
use crate::sync::{
    ChunkRoute, Codec, DecodeJob, Failure, PipelineConfig, PipelineError, PipelineEvents, TaskPipeline,
};
use crate::transport::{FrameError, MessageReader, PayloadKind, RequestHeader, TransportError};

/// Errors that can occur in the chunk client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A diff arrived for a chunk with no cached snapshot at that level of detail.
    #[error("diff received for {key} without a cached base")]
    DiffWithoutBase {
        /// Chunk the diff was for.
        key: ChunkKey,
    },

    /// Reconstructed chunk is not a flat sequence of numbers.
    #[error("chunk {key} is not a numeric grid")]
    NotNumeric {
        /// Chunk the data was for.
        key: ChunkKey,
        /// First offending element, or `None` if the value is not a sequence.
        index: Option<usize>,
    },

    /// A response arrived before any request was sent.
    #[error("response received with no outstanding request")]
    NoOutstandingRequest,

    /// Response framing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Diff could not be applied.
    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Decode pipeline error.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Client is disconnected.
    #[error("client disconnected")]
    Disconnected,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to connect to.
    pub server_addr: String,

    /// Decode queue capacity, counting the job in progress.
    pub max_queue_size: usize,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Limits applied when decompressing response bodies.
    pub compression: CompressionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            compression: CompressionConfig::default(),
        }
    }
}

/// Builder for creating a [`ClientConfig`].
#[derive(Debug)]
pub struct ChunkClientBuilder {
    config: ClientConfig,
}

impl ChunkClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Set the server address (`host:port`).
    pub fn server_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server_addr = addr.into();
        self
    }

    /// Set the decode queue capacity.
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config.max_queue_size = size;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set decompression limits.
    pub fn compression(mut self, config: CompressionConfig) -> Self {
        self.config.compression = config;
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ChunkClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Connected and receiving.
    Connected,
    /// Connection closed gracefully.
    Closed,
    /// Connection ended after an error.
    Failed,
}

/// Event delivered to the [`ChunkReceiver`].
#[derive(Debug)]
pub enum ClientEvent {
    /// A chunk was reconstructed.
    ChunkReady(ChunkUpdate),
    /// The connection failed; no further events follow.
    Error(ClientError),
}

/// Handle for receiving reconstructed chunks.
#[derive(Debug)]
pub struct ChunkReceiver {
    rx: mpsc::Receiver<ClientEvent>,
}

impl ChunkReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the connection has closed and all events are consumed.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }

    /// Forward every event to `sink` until the connection closes.
    pub async fn drive<S: ChunkSink + ?Sized>(mut self, sink: &mut S) {
        while let Some(event) = self.rx.recv().await {
            match event {
                ClientEvent::ChunkReady(update) => {
                    sink.on_chunk_ready(update.key, &update.values, update.side)
                }
                ClientEvent::Error(e) => sink.on_error(&e.to_string()),
            }
        }
    }
}

/// A terrain chunk client.
///
/// # Example
///
/// ```no_run
/// use terrain_sync::client::{ChunkClient, ChunkClientBuilder, ClientEvent};
/// use terrain_sync::transport::PayloadKind;
///
/// # async fn run() -> Result<(), terrain_sync::client::ClientError> {
/// let config = ChunkClientBuilder::new().server_addr("127.0.0.1:6000").build();
/// let (client, mut chunks) = ChunkClient::connect(config).await?;
///
/// client.request_chunk(0, 0, 1.0, PayloadKind::Full).await?;
/// if let Some(ClientEvent::ChunkReady(update)) = chunks.recv().await {
///     println!("{} is {}x{}", update.key, update.side, update.side);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChunkClient {
    /// Current connection state.
    state: Arc<RwLock<ClientState>>,

    /// Write half of the connection.
    writer: Mutex<OwnedWriteHalf>,

    /// Most recently sent request, read by the receive task.
    outstanding: watch::Sender<Option<RequestHeader>>,

    /// Shutdown signal.
    shutdown_tx: Option<oneshot::Sender<()>>,

    /// Address of the connected server.
    peer_addr: SocketAddr,
}

impl ChunkClient {
    /// Connect to a chunk server.
    ///
    /// Returns the client handle and a receiver for reconstructed chunks.
    pub async fn connect(config: ClientConfig) -> Result<(Self, ChunkReceiver), ClientError> {
        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(config.server_addr.as_str()),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {e}", config.server_addr)))?;

        Self::from_stream(stream, &config)
    }

    /// Start a client on an already connected stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream(stream: TcpStream, config: &ClientConfig) -> Result<(Self, ChunkReceiver), ClientError> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let codec = Arc::new(Codec::with_compression(config.compression.clone()));
        let pipeline_config = PipelineConfig {
            max_queue_size: config.max_queue_size,
        };
        let (decoder, events) = TaskPipeline::<DecodeJob>::new(codec, pipeline_config)
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (outstanding_tx, outstanding_rx) = watch::channel(None);
        let state = Arc::new(RwLock::new(ClientState::Connected));

        let receive = ReceiveLoop {
            reader: MessageReader::new(read_half),
            outstanding: outstanding_rx,
            reconciler: Reconciler::new(),
            decoder,
            events,
            event_tx,
        };
        tokio::spawn(receive.run(Arc::clone(&state), shutdown_rx));

        info!(%peer_addr, "connected to chunk server");

        let client = Self {
            state,
            writer: Mutex::new(write_half),
            outstanding: outstanding_tx,
            shutdown_tx: Some(shutdown_tx),
            peer_addr,
        };

        Ok((client, ChunkReceiver { rx: event_rx }))
    }

    /// Request a chunk.
    ///
    /// `lod` is a fraction in `[0, 1]`; values outside are clamped. The
    /// response is attributed to this request until the next one is sent.
    pub async fn request_chunk(
        &self,
        cx: i32,
        cy: i32,
        lod: f32,
        kind: PayloadKind,
    ) -> Result<RequestHeader, ClientError> {
        if !self.is_connected().await {
            return Err(ClientError::Disconnected);
        }

        let header = RequestHeader::new(kind, ChunkKey::new(cx, cy), Lod::from_fraction(lod));

        // Record under the writer lock so requests and responses pair in send order.
        let mut writer = self.writer.lock().await;
        self.outstanding.send_replace(Some(header));
        writer.write_all(&header.encode()).await?;

        debug!(cx, cy, lod = %header.lod, ?kind, "chunk requested");
        Ok(header)
    }

    /// Get the current connection state.
    pub async fn client_state(&self) -> ClientState {
        *self.state.read().await
    }

    /// Check if the client is connected.
    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.read().await, ClientState::Connected)
    }

    /// Gracefully disconnect from the server.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        {
            let mut state = self.state.write().await;
            *state = ClientState::Closed;
        }

        self.writer.lock().await.shutdown().await?;
        Ok(())
    }

    /// Get the server address.
    pub fn server_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Drop for ChunkClient {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Background task that reads responses and reconciles them.
struct ReceiveLoop {
    reader: MessageReader<OwnedReadHalf>,
    outstanding: watch::Receiver<Option<RequestHeader>>,
    reconciler: Reconciler,
    decoder: TaskPipeline<DecodeJob>,
    events: PipelineEvents<DecodeJob>,
    event_tx: mpsc::Sender<ClientEvent>,
}

/// Why the receive loop stopped.
enum Exit {
    /// Server closed the stream.
    Eof,
    /// Client shut down or the receiver was dropped.
    Shutdown,
}

impl ReceiveLoop {
    async fn run(mut self, state: Arc<RwLock<ClientState>>, shutdown_rx: oneshot::Receiver<()>) {
        let outcome = match self.pump(shutdown_rx).await {
            Ok(Exit::Eof) => self.drain().await,
            Ok(Exit::Shutdown) => Ok(()),
            Err(e) => Err(e),
        };

        let final_state = match outcome {
            Ok(()) => {
                debug!("receive loop finished");
                ClientState::Closed
            }
            Err(e) => {
                error!(%e, "chunk connection failed");
                let _ = self.event_tx.send(ClientEvent::Error(e)).await;
                ClientState::Failed
            }
        };

        let mut state = state.write().await;
        if *state == ClientState::Connected {
            *state = final_state;
        }
    }

    async fn pump(&mut self, mut shutdown_rx: oneshot::Receiver<()>) -> Result<Exit, ClientError> {
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => return Ok(Exit::Shutdown),

                Some(done) = self.events.completions.recv() => {
                    let update = self.reconciler.complete(done.route, done.output)?;
                    if self.event_tx.send(ClientEvent::ChunkReady(update)).await.is_err() {
                        return Ok(Exit::Shutdown);
                    }
                }

                Some(failure) = self.events.failures.recv() => return Err(self.fail_after(failure).await),

                message = self.reader.next_message() => match message? {
                    Some(payload) => {
                        self.reconciler.set_outstanding(*self.outstanding.borrow());
                        let job = self.reconciler.route(&payload)?;
                        self.decoder.submit(job);
                    }
                    None => return Ok(Exit::Eof),
                },
            }
        }
    }

    /// Reconcile responses still being decoded when the stream ended.
    async fn drain(&mut self) -> Result<(), ClientError> {
        if !self.decoder.is_idle() {
            warn!(pending = self.decoder.pending(), "server closed with responses still decoding");
        }
        loop {
            // The worker reports a result before going idle.
            let idle = self.decoder.is_idle();
            while let Ok(done) = self.events.completions.try_recv() {
                self.deliver(done.route, done.output).await?;
            }
            if let Ok(failure) = self.events.failures.try_recv() {
                return Err(self.fail_after(failure).await);
            }
            if idle {
                return Ok(());
            }

            tokio::select! {
                biased;

                Some(done) = self.events.completions.recv() => {
                    self.deliver(done.route, done.output).await?;
                }
                Some(failure) = self.events.failures.recv() => return Err(self.fail_after(failure).await),
            }
        }
    }

    /// Deliver every result submitted before `failure`, then hand back its error.
    async fn fail_after(&mut self, failure: Failure<ChunkRoute>) -> ClientError {
        while let Ok(done) = self.events.completions.try_recv() {
            if done.id > failure.id {
                break;
            }
            if let Err(e) = self.deliver(done.route, done.output).await {
                return e;
            }
        }
        failure.error.into()
    }

    async fn deliver(&mut self, route: ChunkRoute, value: Value) -> Result<(), ClientError> {
        let update = self.reconciler.complete(route, value)?;
        let _ = self.event_tx.send(ClientEvent::ChunkReady(update)).await;
        Ok(())
    }
}

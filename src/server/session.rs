//! Server session management.
//!
//! One [`ServerSession`] serves one connection: it reads requests until the
//! client hangs up, and remembers the last chunk sent for each key so later
//! diff requests can be answered with a diff. That history mirrors the
//! client's cache: one entry per key, replaced by every response.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, trace};

use super::grid::Grid;
use super::server::ServerError;
use super::source::{ChunkSource, SourceError};
use crate::core::{ChunkKey, Lod, Value};
use crate::sync::{
    ChunkRoute, Codec, EncodeJob, PipelineConfig, PipelineEvents, TaskPipeline, compute_diff,
};
use crate::transport::{PayloadKind, RequestHeader, encode_response, read_request_header};

/// Connection-scoped session ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerSessionId(u64);

impl ServerSessionId {
    /// Create a session ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServerSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A response ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Whether the body is a full snapshot or a diff.
    pub kind: PayloadKind,
    /// Complete length-prefixed message.
    pub message: Vec<u8>,
}

/// Per-client session.
pub struct ServerSession<S> {
    /// Session ID.
    id: ServerSessionId,

    /// Client's address, if known.
    peer: Option<SocketAddr>,

    /// Where chunk contents come from.
    source: Arc<S>,

    /// Encodes outgoing bodies off the I/O task.
    encoder: TaskPipeline<EncodeJob>,

    /// Receiving ends of the encoder's event channels.
    events: PipelineEvents<EncodeJob>,

    /// Last chunk sent per key, with the level of detail it was sent at.
    last_sent: HashMap<ChunkKey, (Lod, Value)>,

    /// Requests answered so far.
    requests_served: u64,
}

impl<S> fmt::Debug for ServerSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("last_sent", &self.last_sent.len())
            .field("requests_served", &self.requests_served)
            .finish()
    }
}

impl<S: ChunkSource> ServerSession<S> {
    /// Create a new session.
    pub fn new(
        id: ServerSessionId,
        peer: Option<SocketAddr>,
        source: Arc<S>,
        codec: Arc<Codec>,
        pipeline: PipelineConfig,
    ) -> Result<Self, ServerError> {
        let (encoder, events) =
            TaskPipeline::new(codec, pipeline).map_err(|e| ServerError::Config(e.to_string()))?;
        Ok(Self {
            id,
            peer,
            source,
            encoder,
            events,
            last_sent: HashMap::new(),
            requests_served: 0,
        })
    }

    /// Get the session ID.
    pub fn id(&self) -> ServerSessionId {
        self.id
    }

    /// Get the client address.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Requests answered so far.
    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    /// The chunk last sent for `key` and its level of detail.
    pub fn last_sent(&self, key: ChunkKey) -> Option<(Lod, &Value)> {
        self.last_sent.get(&key).map(|(lod, value)| (*lod, value))
    }

    /// Serve requests from `stream` until the client disconnects or
    /// `shutdown` flips to `true`.
    pub async fn run<T>(mut self, stream: T, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        loop {
            if *shutdown.borrow() {
                debug!(session = %self.id, "session closing for shutdown");
                break;
            }

            let header = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                header = read_request_header(&mut reader) => header?,
            };
            let Some(header) = header else {
                break;
            };

            let response = self.respond(header).await?;
            writer.write_all(&response.message).await?;
        }

        debug!(session = %self.id, served = self.requests_served, "session finished");
        let _ = writer.shutdown().await;
        Ok(())
    }

    /// Build the response to one request and record what was sent.
    ///
    /// A diff is sent only if the client asked for one, the last response
    /// for this key was at the same level of detail, and the chunk did not
    /// shrink since then. Anything else gets a full snapshot.
    pub async fn respond(&mut self, header: RequestHeader) -> Result<Response, ServerError> {
        let RequestHeader { kind, key, lod } = header;
        let chunk = self.load(key, lod).await?;

        let base = match self.last_sent.get(&key) {
            Some((sent_lod, base)) if *sent_lod == lod && !shrunk(base, &chunk) => Some(base),
            _ => None,
        };
        let (kind, body) = match (kind, base) {
            (PayloadKind::Diff, Some(base)) => (PayloadKind::Diff, compute_diff(base, &chunk).into_value()),
            _ => (PayloadKind::Full, chunk.clone()),
        };

        let route = ChunkRoute { key, kind, lod };
        let encoded = self.encode(route, body).await?;
        let message = encode_response(kind, &encoded)?;

        trace!(
            session = %self.id,
            cx = key.cx,
            cy = key.cy,
            %lod,
            ?kind,
            len = message.len(),
            "response ready"
        );

        self.last_sent.insert(key, (lod, chunk));
        self.requests_served += 1;
        Ok(Response { kind, message })
    }

    async fn load(&self, key: ChunkKey, lod: Lod) -> Result<Value, ServerError> {
        let source = Arc::clone(&self.source);
        let loaded = tokio::task::spawn_blocking(move || source.load(key))
            .await
            .map_err(|e| SourceError::Loader(e.to_string()))??;
        Ok(Grid::from_value(loaded)?.downsample(lod).into_value())
    }

    async fn encode(&mut self, route: ChunkRoute, value: Value) -> Result<Vec<u8>, ServerError> {
        self.encoder.submit(EncodeJob { route, value });
        tokio::select! {
            Some(done) = self.events.completions.recv() => Ok(done.output),
            Some(failure) = self.events.failures.recv() => Err(failure.error.into()),
            else => Err(ServerError::Shutdown),
        }
    }
}

/// Truncation has no diff encoding, so a shorter chunk must go out in full.
fn shrunk(base: &Value, chunk: &Value) -> bool {
    match (base.as_seq(), chunk.as_seq()) {
        (Some(base), Some(chunk)) => chunk.len() < base.len(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Diff, apply_diff};
    use crate::transport::{MessageReader, ResponsePayload};

    fn session<S: ChunkSource>(source: S) -> ServerSession<S> {
        ServerSession::new(
            ServerSessionId::new(1),
            None,
            Arc::new(source),
            Arc::new(Codec::new()),
            PipelineConfig::default(),
        )
        .unwrap()
    }

    fn decode(response: &Response) -> Value {
        let payload = ResponsePayload::parse(&response.message[4..]).unwrap();
        assert_eq!(payload.kind, response.kind);
        Codec::new().decode(payload.body).unwrap()
    }

    fn request(kind: PayloadKind, cx: i32, cy: i32) -> RequestHeader {
        RequestHeader::new(kind, ChunkKey::new(cx, cy), Lod::FULL)
    }

    #[tokio::test]
    async fn test_diff_without_history_sends_full() {
        let mut session = session(|_: ChunkKey| Value::floats([1.0, 2.0, 3.0, 4.0]));
        let response = session.respond(request(PayloadKind::Diff, 0, 0)).await.unwrap();
        assert_eq!(response.kind, PayloadKind::Full);
        assert_eq!(decode(&response), Value::floats([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(
            session.last_sent(ChunkKey::new(0, 0)),
            Some((Lod::FULL, &Value::floats([1.0, 2.0, 3.0, 4.0])))
        );
    }

    #[tokio::test]
    async fn test_diff_after_change() {
        let version = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&version);
        let mut session = session(move |_: ChunkKey| {
            let v = counter.load(std::sync::atomic::Ordering::SeqCst);
            Value::floats([0.0, f64::from(v), 0.0, 0.0])
        });

        let full = session.respond(request(PayloadKind::Full, 2, 2)).await.unwrap();
        let base = decode(&full);

        version.store(7, std::sync::atomic::Ordering::SeqCst);
        let response = session.respond(request(PayloadKind::Diff, 2, 2)).await.unwrap();
        assert_eq!(response.kind, PayloadKind::Diff);

        let wire = decode(&response);
        let diff = Diff::from_wire(&base, wire).unwrap();
        assert_eq!(apply_diff(&base, &diff).unwrap(), Value::floats([0.0, 7.0, 0.0, 0.0]));
    }

    #[tokio::test]
    async fn test_unchanged_chunk_sends_empty_diff() {
        let mut session = session(|_: ChunkKey| Value::floats([5.0; 4]));
        session.respond(request(PayloadKind::Full, 0, 0)).await.unwrap();
        let response = session.respond(request(PayloadKind::Diff, 0, 0)).await.unwrap();
        assert_eq!(response.kind, PayloadKind::Diff);
        assert_eq!(decode(&response), Value::Seq(Vec::new()));
    }

    #[tokio::test]
    async fn test_diff_at_other_lod_sends_full() {
        let mut session = session(|_: ChunkKey| Value::floats([1.0; 16]));
        session.respond(request(PayloadKind::Full, 0, 0)).await.unwrap();

        let other_lod = RequestHeader::new(PayloadKind::Diff, ChunkKey::new(0, 0), Lod::from_byte(127));
        let response = session.respond(other_lod).await.unwrap();
        assert_eq!(response.kind, PayloadKind::Full);
        assert_eq!(decode(&response), Value::floats([1.0; 4]));
    }

    #[tokio::test]
    async fn test_lod_switch_replaces_history() {
        let mut session = session(|_: ChunkKey| Value::floats([1.0; 16]));
        let key = ChunkKey::new(0, 0);
        let half = Lod::from_byte(127);

        session.respond(request(PayloadKind::Full, 0, 0)).await.unwrap();
        session
            .respond(RequestHeader::new(PayloadKind::Full, key, half))
            .await
            .unwrap();
        assert_eq!(session.last_sent(key).map(|(lod, _)| lod), Some(half));

        // The client only holds the half-resolution grid now.
        let response = session.respond(request(PayloadKind::Diff, 0, 0)).await.unwrap();
        assert_eq!(response.kind, PayloadKind::Full);
        assert_eq!(decode(&response), Value::floats([1.0; 16]));
    }

    #[tokio::test]
    async fn test_shrunk_chunk_sends_full() {
        let version = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&version);
        let mut session = session(move |_: ChunkKey| match counter.load(std::sync::atomic::Ordering::SeqCst) {
            0 => Value::floats([1.0; 16]),
            _ => Value::floats([2.0; 4]),
        });

        session.respond(request(PayloadKind::Full, 0, 0)).await.unwrap();
        version.store(1, std::sync::atomic::Ordering::SeqCst);
        let response = session.respond(request(PayloadKind::Diff, 0, 0)).await.unwrap();
        assert_eq!(response.kind, PayloadKind::Full);
        assert_eq!(decode(&response), Value::floats([2.0; 4]));
    }

    #[tokio::test]
    async fn test_grown_chunk_sends_diff() {
        let version = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&version);
        let mut session = session(move |_: ChunkKey| match counter.load(std::sync::atomic::Ordering::SeqCst) {
            0 => Value::floats([1.0; 4]),
            _ => Value::floats([1.0; 9]),
        });

        let base = decode(&session.respond(request(PayloadKind::Full, 0, 0)).await.unwrap());
        version.store(1, std::sync::atomic::Ordering::SeqCst);
        let response = session.respond(request(PayloadKind::Diff, 0, 0)).await.unwrap();
        assert_eq!(response.kind, PayloadKind::Diff);
        let diff = Diff::from_wire(&base, decode(&response)).unwrap();
        assert_eq!(apply_diff(&base, &diff).unwrap(), Value::floats([1.0; 9]));
    }

    #[tokio::test]
    async fn test_rows_sent_flat() {
        let mut session = session(|_: ChunkKey| {
            Value::Seq(vec![Value::floats([1.0, 2.0]), Value::floats([3.0, 4.0])])
        });
        let response = session.respond(request(PayloadKind::Full, 0, 0)).await.unwrap();
        assert_eq!(decode(&response), Value::floats([1.0, 2.0, 3.0, 4.0]));
    }

    #[tokio::test]
    async fn test_bad_chunk_is_an_error() {
        let mut session = session(|_: ChunkKey| Value::from("not terrain"));
        assert!(matches!(
            session.respond(request(PayloadKind::Full, 0, 0)).await,
            Err(ServerError::Source(SourceError::NotAGrid(_)))
        ));
        assert_eq!(session.requests_served(), 0);
    }

    #[tokio::test]
    async fn test_run_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(session(|_: ChunkKey| Value::floats([9.0; 4])).run(server, shutdown_rx));

        let (read_half, mut write_half) = tokio::io::split(client);
        write_half
            .write_all(&request(PayloadKind::Full, 1, 1).encode())
            .await
            .unwrap();
        write_half
            .write_all(&request(PayloadKind::Diff, 1, 1).encode())
            .await
            .unwrap();

        let mut reader = MessageReader::new(read_half);
        let first = reader.next_message().await.unwrap().unwrap();
        assert_eq!(first[0], PayloadKind::Full.as_byte());
        let second = reader.next_message().await.unwrap().unwrap();
        assert_eq!(second[0], PayloadKind::Diff.as_byte());

        write_half.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_client, server) = tokio::io::duplex(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(session(|_: ChunkKey| Value::floats([0.0])).run(server, shutdown_rx));

        shutdown_tx.send_replace(true);
        task.await.unwrap().unwrap();
    }
}

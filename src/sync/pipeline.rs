//! Bounded codec pipeline
//!
//! One [`TaskPipeline`] per direction (encode, decode) moves codec work off
//! the caller's task. At most one job per pipeline runs at a time, on the
//! blocking pool, and results come back in submission order.
//!
//! Backpressure is most-recent-wins: when the queue is full, the oldest job
//! still waiting (never the running one) is dropped without notification.
//! With a capacity of one there is no waiting slot, so a job submitted while
//! another runs is dropped instead.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::codec::Codec;
use crate::core::constants::DEFAULT_MAX_QUEUE_SIZE;
use crate::core::{ChunkKey, CodecError, Lod, TerrainSyncError, Value};
use crate::transport::PayloadKind;

/// Errors reported on a pipeline's failure channel.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No runtime was available to run the job.
    #[error("failed to start worker: {0}")]
    WorkerStartFailed(String),

    /// The codec rejected the job's input.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The job panicked on the blocking pool.
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Identifier assigned to each submitted job, increasing per pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unit of codec work.
pub trait CodecJob: Send + 'static {
    /// Identity used to route the result back to the request it belongs to.
    type Route: Clone + fmt::Debug + Send + 'static;
    /// Successful result.
    type Output: Send + 'static;
    /// Direction name for logs.
    const DIRECTION: &'static str;

    /// Routing identity of this job.
    fn route(&self) -> Self::Route;

    /// Run the job. Called on the blocking pool.
    fn run(self, codec: &Codec) -> Result<Self::Output, CodecError>;
}

/// Which chunk request a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRoute {
    /// Chunk the payload is for.
    pub key: ChunkKey,
    /// Full snapshot or diff.
    pub kind: PayloadKind,
    /// Level of detail of the request.
    pub lod: Lod,
}

/// Encode a value for sending.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    /// Routing identity.
    pub route: ChunkRoute,
    /// Value or wire diff to encode.
    pub value: Value,
}

impl CodecJob for EncodeJob {
    type Route = ChunkRoute;
    type Output = Vec<u8>;
    const DIRECTION: &'static str = "encode";

    fn route(&self) -> ChunkRoute {
        self.route
    }

    fn run(self, codec: &Codec) -> Result<Vec<u8>, CodecError> {
        codec.encode(&self.value)
    }
}

/// Decode a received body.
#[derive(Debug, Clone)]
pub struct DecodeJob {
    /// Routing identity.
    pub route: ChunkRoute,
    /// Encoded body.
    pub body: Vec<u8>,
}

impl CodecJob for DecodeJob {
    type Route = ChunkRoute;
    type Output = Value;
    const DIRECTION: &'static str = "decode";

    fn route(&self) -> ChunkRoute {
        self.route
    }

    fn run(self, codec: &Codec) -> Result<Value, CodecError> {
        codec.decode(&self.body)
    }
}

/// A queued job.
#[derive(Debug)]
pub struct PendingTask<J> {
    /// Assigned identifier.
    pub id: TaskId,
    /// The work itself.
    pub job: J,
}

/// Successful job result.
#[derive(Debug)]
pub struct Completion<J: CodecJob> {
    /// Job identifier.
    pub id: TaskId,
    /// Routing identity of the job.
    pub route: J::Route,
    /// Job output.
    pub output: J::Output,
}

/// Failed job.
#[derive(Debug)]
pub struct Failure<R> {
    /// Job identifier.
    pub id: TaskId,
    /// Routing identity of the job.
    pub route: R,
    /// What went wrong.
    pub error: PipelineError,
}

/// Receiving ends of a pipeline.
///
/// Completions and failures travel on separate channels. Within each
/// channel, events arrive in submission order.
#[derive(Debug)]
pub struct PipelineEvents<J: CodecJob> {
    /// Successful results.
    pub completions: mpsc::UnboundedReceiver<Completion<J>>,
    /// Failed jobs.
    pub failures: mpsc::UnboundedReceiver<Failure<J::Route>>,
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Queue capacity, counting the running job.
    pub max_queue_size: usize,
}

impl PipelineConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<(), TerrainSyncError> {
        if self.max_queue_size == 0 {
            return Err(TerrainSyncError::Config("max_queue_size must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

/// Queue state. `in_flight` is `None` only while `waiting` is empty.
#[derive(Debug)]
struct QueueState<J> {
    waiting: VecDeque<PendingTask<J>>,
    in_flight: Option<TaskId>,
}

struct Shared<J: CodecJob> {
    state: Mutex<QueueState<J>>,
    codec: Arc<Codec>,
    max_queue_size: usize,
    next_id: AtomicU64,
    completions: mpsc::UnboundedSender<Completion<J>>,
    failures: mpsc::UnboundedSender<Failure<J::Route>>,
}

impl<J: CodecJob> Shared<J> {
    /// Retire the running job and claim the next one, if any.
    fn advance(&self) -> Option<PendingTask<J>> {
        let mut state = self.state.lock();
        let next = state.waiting.pop_front();
        state.in_flight = next.as_ref().map(|task| task.id);
        next
    }

    fn fail(&self, id: TaskId, route: J::Route, error: PipelineError) {
        debug!(direction = J::DIRECTION, task = %id, ?route, %error, "pipeline job failed");
        let _ = self.failures.send(Failure { id, route, error });
    }
}

/// Bounded single-worker codec queue.
///
/// Cloning yields another handle to the same queue.
pub struct TaskPipeline<J: CodecJob> {
    shared: Arc<Shared<J>>,
}

impl<J: CodecJob> Clone for TaskPipeline<J> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<J: CodecJob> fmt::Debug for TaskPipeline<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPipeline")
            .field("direction", &J::DIRECTION)
            .field("max_queue_size", &self.shared.max_queue_size)
            .field("pending", &self.pending())
            .finish()
    }
}

impl<J: CodecJob> TaskPipeline<J> {
    /// Create a pipeline and the receiving ends of its event channels.
    pub fn new(
        codec: Arc<Codec>,
        config: PipelineConfig,
    ) -> Result<(Self, PipelineEvents<J>), TerrainSyncError> {
        config.validate()?;

        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (failures_tx, failures) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                waiting: VecDeque::new(),
                in_flight: None,
            }),
            codec,
            max_queue_size: config.max_queue_size,
            next_id: AtomicU64::new(1),
            completions: completions_tx,
            failures: failures_tx,
        });

        Ok((
            Self { shared },
            PipelineEvents {
                completions,
                failures,
            },
        ))
    }

    /// Queue a job, starting the worker if it is idle.
    ///
    /// [`pending`](Self::pending) never exceeds the configured capacity.
    ///
    /// Must be called from within a tokio runtime; otherwise the job is
    /// reported as [`PipelineError::WorkerStartFailed`].
    pub fn submit(&self, job: J) -> TaskId {
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let task = PendingTask { id, job };

        let mut state = self.shared.state.lock();
        if state.in_flight.is_none() {
            state.in_flight = Some(id);
            drop(state);
            self.start_worker(task);
            return id;
        }

        if state.waiting.len() + 1 >= self.shared.max_queue_size {
            match state.waiting.pop_front() {
                Some(evicted) => warn!(
                    direction = J::DIRECTION,
                    task = %evicted.id,
                    route = ?evicted.job.route(),
                    "pipeline queue full, dropping oldest waiting job"
                ),
                None => {
                    warn!(
                        direction = J::DIRECTION,
                        task = %id,
                        route = ?task.job.route(),
                        "pipeline busy with no waiting slot, dropping job"
                    );
                    return id;
                }
            }
        }
        state.waiting.push_back(task);
        id
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        state.waiting.len() + usize::from(state.in_flight.is_some())
    }

    /// Check if no job is queued or running.
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Queue capacity.
    pub fn max_queue_size(&self) -> usize {
        self.shared.max_queue_size
    }

    fn start_worker(&self, mut task: PendingTask<J>) {
        loop {
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(drive(Arc::clone(&self.shared), task));
                    return;
                }
                Err(e) => {
                    warn!(direction = J::DIRECTION, task = %task.id, "no runtime to start pipeline worker");
                    self.shared.fail(
                        task.id,
                        task.job.route(),
                        PipelineError::WorkerStartFailed(e.to_string()),
                    );
                    match self.shared.advance() {
                        Some(next) => task = next,
                        None => return,
                    }
                }
            }
        }
    }
}

async fn drive<J: CodecJob>(shared: Arc<Shared<J>>, mut task: PendingTask<J>) {
    loop {
        let PendingTask { id, job } = task;
        let route = job.route();
        let codec = Arc::clone(&shared.codec);

        match tokio::task::spawn_blocking(move || job.run(&codec)).await {
            Ok(Ok(output)) => {
                let _ = shared.completions.send(Completion { id, route, output });
            }
            Ok(Err(e)) => shared.fail(id, route, e.into()),
            Err(e) => shared.fail(id, route, PipelineError::WorkerPanicked(e.to_string())),
        }

        match shared.advance() {
            Some(next) => task = next,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(cx: i32) -> ChunkRoute {
        ChunkRoute {
            key: ChunkKey::new(cx, 0),
            kind: PayloadKind::Full,
            lod: Lod::FULL,
        }
    }

    fn decode_job(codec: &Codec, n: i64) -> DecodeJob {
        DecodeJob {
            route: route(n as i32),
            body: codec.encode(&Value::from(n)).unwrap(),
        }
    }

    fn decoder(max_queue_size: usize) -> (TaskPipeline<DecodeJob>, PipelineEvents<DecodeJob>) {
        TaskPipeline::new(Arc::new(Codec::new()), PipelineConfig { max_queue_size }).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result =
            TaskPipeline::<EncodeJob>::new(Arc::new(Codec::new()), PipelineConfig { max_queue_size: 0 });
        assert!(matches!(result, Err(TerrainSyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_completions_in_submission_order() {
        let codec = Codec::new();
        let (pipeline, mut events) = decoder(10);

        let ids: Vec<TaskId> = (1i64..=5).map(|n| pipeline.submit(decode_job(&codec, n))).collect();

        for (n, id) in (1i64..=5).zip(ids) {
            let done = events.completions.recv().await.unwrap();
            assert_eq!(done.id, id);
            assert_eq!(done.route, route(n as i32));
            assert_eq!(done.output, Value::from(n));
        }
    }

    #[tokio::test]
    async fn test_full_queue_evicts_oldest_waiting() {
        let codec = Codec::new();
        let (pipeline, mut events) = decoder(3);

        // The first job starts at once and counts toward capacity, so the
        // fourth submission evicts job 2.
        for n in 1..=4 {
            pipeline.submit(decode_job(&codec, n));
        }
        assert_eq!(pipeline.pending(), 3);
        drop(pipeline);

        let mut outputs = Vec::new();
        while let Some(done) = events.completions.recv().await {
            outputs.push(done.output);
        }
        assert_eq!(outputs, vec![Value::from(1i64), Value::from(3i64), Value::from(4i64)]);
        assert!(events.failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_capacity_one_never_queues() {
        let codec = Codec::new();
        let (pipeline, mut events) = decoder(1);

        for n in 1..=3 {
            pipeline.submit(decode_job(&codec, n));
            assert_eq!(pipeline.pending(), 1);
        }
        drop(pipeline);

        let mut outputs = Vec::new();
        while let Some(done) = events.completions.recv().await {
            outputs.push(done.output);
        }
        assert_eq!(outputs, vec![Value::from(1i64)]);
        assert!(events.failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_capacity_two_keeps_latest() {
        let codec = Codec::new();
        let (pipeline, mut events) = decoder(2);

        for n in 1..=4 {
            pipeline.submit(decode_job(&codec, n));
            assert!(pipeline.pending() <= 2);
        }
        drop(pipeline);

        let mut outputs = Vec::new();
        while let Some(done) = events.completions.recv().await {
            outputs.push(done.output);
        }
        assert_eq!(outputs, vec![Value::from(1i64), Value::from(4i64)]);
    }

    #[tokio::test]
    async fn test_codec_error_on_failure_channel() {
        let codec = Codec::new();
        let (pipeline, mut events) = decoder(10);

        pipeline.submit(DecodeJob {
            route: route(9),
            body: Vec::new(),
        });
        pipeline.submit(decode_job(&codec, 2));

        let failure = events.failures.recv().await.unwrap();
        assert_eq!(failure.route, route(9));
        assert!(matches!(
            failure.error,
            PipelineError::Codec(CodecError::InvalidInput(_))
        ));

        let done = events.completions.recv().await.unwrap();
        assert_eq!(done.output, Value::from(2i64));
    }

    #[tokio::test]
    async fn test_encode_job() {
        let codec = Arc::new(Codec::new());
        let (pipeline, mut events) =
            TaskPipeline::<EncodeJob>::new(Arc::clone(&codec), PipelineConfig::default()).unwrap();

        let chunk = Value::floats([0.1, 0.2, 0.3, 0.4]);
        pipeline.submit(EncodeJob {
            route: route(0),
            value: chunk.clone(),
        });

        let done = events.completions.recv().await.unwrap();
        assert_eq!(codec.decode(&done.output).unwrap(), chunk);
    }

    #[tokio::test]
    async fn test_idle_after_drain() {
        let codec = Codec::new();
        let (pipeline, mut events) = decoder(2);
        pipeline.submit(decode_job(&codec, 1));
        events.completions.recv().await.unwrap();

        // advance() runs right after the completion is sent
        while !pipeline.is_idle() {
            tokio::task::yield_now().await;
        }
        pipeline.submit(decode_job(&codec, 2));
        assert_eq!(events.completions.recv().await.unwrap().output, Value::from(2i64));
    }

    #[test]
    fn test_worker_start_failure_outside_runtime() {
        let codec = Codec::new();
        let (pipeline, mut events) = decoder(4);

        pipeline.submit(decode_job(&codec, 1));
        pipeline.submit(decode_job(&codec, 2));

        for n in 1..=2 {
            let failure = events.failures.try_recv().unwrap();
            assert_eq!(failure.route, route(n));
            assert!(matches!(failure.error, PipelineError::WorkerStartFailed(_)));
        }
        assert!(pipeline.is_idle());
        assert!(events.completions.try_recv().is_err());
    }
}

//! Response reconciliation.
//!
//! [`Reconciler`] owns the chunk cache and turns each response into a
//! reconstructed grid. It does no I/O, so the networked client drives it
//! from its read loop and tests drive it directly.
//!
//! Per chunk key the cache moves `Unknown → Full` on the first full snapshot
//! and stays `Full` across every later snapshot or applied diff.

use tracing::debug;

use super::client::ClientError;
use crate::core::{ChunkKey, Lod, Value};
use crate::sync::{ChunkCache, ChunkRoute, Codec, DecodeJob, Diff, apply_diff};
use crate::transport::{PayloadKind, RequestHeader, ResponsePayload};

/// A reconstructed chunk, ready for a [`ChunkSink`](crate::core::ChunkSink).
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkUpdate {
    /// Chunk the grid belongs to.
    pub key: ChunkKey,
    /// Level of detail the grid was requested at.
    pub lod: Lod,
    /// Whether the response was a full snapshot or a diff.
    pub kind: PayloadKind,
    /// Flat row-major grid.
    pub values: Vec<f64>,
    /// `floor(sqrt(values.len()))`.
    pub side: usize,
}

/// Client-side reconciliation state.
///
/// One request is outstanding at a time; every response is attributed to
/// the most recently sent request.
#[derive(Debug, Default)]
pub struct Reconciler {
    cache: ChunkCache,
    outstanding: Option<RequestHeader>,
}

impl Reconciler {
    /// Create a reconciler with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The chunk cache.
    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// The request responses are currently attributed to.
    pub fn outstanding(&self) -> Option<&RequestHeader> {
        self.outstanding.as_ref()
    }

    /// Record a new request and return its header.
    pub fn request(&mut self, key: ChunkKey, lod: Lod, kind: PayloadKind) -> RequestHeader {
        let header = RequestHeader::new(kind, key, lod);
        debug!(cx = key.cx, cy = key.cy, %lod, ?kind, "chunk requested");
        self.outstanding = Some(header);
        header
    }

    /// Attribute responses to a request recorded elsewhere.
    pub fn set_outstanding(&mut self, header: Option<RequestHeader>) {
        self.outstanding = header;
    }

    /// Parse a response payload into a decode job for the outstanding request.
    pub fn route(&self, payload: &[u8]) -> Result<DecodeJob, ClientError> {
        let response = ResponsePayload::parse(payload)?;
        let request = self.outstanding.ok_or(ClientError::NoOutstandingRequest)?;

        debug!(
            cx = request.key.cx,
            cy = request.key.cy,
            kind = ?response.kind,
            len = response.body.len(),
            "response received"
        );

        Ok(DecodeJob {
            route: ChunkRoute {
                key: request.key,
                kind: response.kind,
                lod: request.lod,
            },
            body: response.body.to_vec(),
        })
    }

    /// Reconcile a decoded body and update the cache.
    ///
    /// A diff is applied to the cached value built at the same level of
    /// detail; without one this fails with [`ClientError::DiffWithoutBase`].
    /// The cache is only written once the result is known to be a numeric grid.
    pub fn complete(&mut self, route: ChunkRoute, decoded: Value) -> Result<ChunkUpdate, ClientError> {
        let ChunkRoute { key, kind, lod } = route;

        let value = match kind {
            PayloadKind::Full => decoded,
            PayloadKind::Diff => {
                let base = self
                    .cache
                    .get_at(&key, lod)
                    .ok_or(ClientError::DiffWithoutBase { key })?;
                let diff = Diff::from_wire(base, decoded)?;
                apply_diff(base, &diff)?
            }
        };

        let values = numeric_grid(key, &value)?;
        let side = values.len().isqrt();
        self.cache.insert(key, value, lod);

        debug!(cx = key.cx, cy = key.cy, ?kind, len = values.len(), side, "chunk reconciled");
        Ok(ChunkUpdate {
            key,
            lod,
            kind,
            values,
            side,
        })
    }

    /// Route, decode and reconcile a payload on the calling task.
    pub fn handle_message(&mut self, codec: &Codec, payload: &[u8]) -> Result<ChunkUpdate, ClientError> {
        let job = self.route(payload)?;
        let decoded = codec.decode(&job.body)?;
        self.complete(job.route, decoded)
    }
}

fn numeric_grid(key: ChunkKey, value: &Value) -> Result<Vec<f64>, ClientError> {
    let items = value.as_seq().ok_or(ClientError::NotNumeric { key, index: None })?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_f64()
                .ok_or(ClientError::NotNumeric { key, index: Some(i) })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::compute_diff;
    use crate::core::constants::LENGTH_PREFIX_SIZE;
    use crate::transport::encode_response;

    fn payload(codec: &Codec, kind: PayloadKind, value: &Value) -> Vec<u8> {
        let message = encode_response(kind, &codec.encode(value).unwrap()).unwrap();
        message[LENGTH_PREFIX_SIZE..].to_vec()
    }

    fn diff_records(records: &[(i64, f64)]) -> Value {
        Value::Seq(
            records
                .iter()
                .map(|&(index, value)| {
                    Value::map([("index", Value::from(index)), ("value", Value::from(value))])
                })
                .collect(),
        )
    }

    #[test]
    fn test_full_then_diff() {
        let codec = Codec::new();
        let mut reconciler = Reconciler::new();
        let key = ChunkKey::new(0, 0);
        let lod = Lod::from_fraction(0.5);

        reconciler.request(key, lod, PayloadKind::Full);
        let full = payload(&codec, PayloadKind::Full, &Value::floats([0.1, 0.2, 0.3, 0.4]));
        let update = reconciler.handle_message(&codec, &full).unwrap();
        assert_eq!(update.values, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(update.side, 2);
        assert_eq!(
            reconciler.cache().get(&key).unwrap().value,
            Value::floats([0.1, 0.2, 0.3, 0.4])
        );

        reconciler.request(key, lod, PayloadKind::Diff);
        let diff = payload(&codec, PayloadKind::Diff, &diff_records(&[(1, 0.9)]));
        let update = reconciler.handle_message(&codec, &diff).unwrap();
        assert_eq!(update.kind, PayloadKind::Diff);
        assert_eq!(update.values, vec![0.1, 0.9, 0.3, 0.4]);
        assert_eq!(update.side, 2);
        assert_eq!(
            reconciler.cache().get(&key).unwrap().value,
            Value::floats([0.1, 0.9, 0.3, 0.4])
        );
    }

    #[test]
    fn test_diff_without_base() {
        let codec = Codec::new();
        let mut reconciler = Reconciler::new();
        let key = ChunkKey::new(5, 5);

        reconciler.request(key, Lod::FULL, PayloadKind::Diff);
        let diff = payload(&codec, PayloadKind::Diff, &diff_records(&[(0, 1.0)]));
        let result = reconciler.handle_message(&codec, &diff);

        assert!(matches!(result, Err(ClientError::DiffWithoutBase { key: k }) if k == key));
        assert!(reconciler.cache().is_empty());
    }

    #[test]
    fn test_diff_at_other_lod_has_no_base() {
        let codec = Codec::new();
        let mut reconciler = Reconciler::new();
        let key = ChunkKey::new(1, 1);

        reconciler.request(key, Lod::FULL, PayloadKind::Full);
        reconciler
            .handle_message(&codec, &payload(&codec, PayloadKind::Full, &Value::floats([0.0; 4])))
            .unwrap();

        reconciler.request(key, Lod::from_fraction(0.5), PayloadKind::Diff);
        let diff = payload(&codec, PayloadKind::Diff, &diff_records(&[(0, 1.0)]));
        assert!(matches!(
            reconciler.handle_message(&codec, &diff),
            Err(ClientError::DiffWithoutBase { .. })
        ));
        assert_eq!(reconciler.cache().get(&key).unwrap().value, Value::floats([0.0; 4]));
    }

    #[test]
    fn test_failed_apply_keeps_cache() {
        let codec = Codec::new();
        let mut reconciler = Reconciler::new();
        let key = ChunkKey::new(0, 1);
        let base = Value::floats([1.0, 2.0, 3.0, 4.0]);

        reconciler.request(key, Lod::FULL, PayloadKind::Full);
        reconciler
            .handle_message(&codec, &payload(&codec, PayloadKind::Full, &base))
            .unwrap();

        reconciler.request(key, Lod::FULL, PayloadKind::Diff);
        let diff = payload(&codec, PayloadKind::Diff, &diff_records(&[(9, 0.5)]));
        assert!(matches!(
            reconciler.handle_message(&codec, &diff),
            Err(ClientError::Apply(_))
        ));
        assert_eq!(reconciler.cache().get(&key).unwrap().value, base);
    }

    #[test]
    fn test_corrupt_body_keeps_cache() {
        let codec = Codec::new();
        let mut reconciler = Reconciler::new();
        let key = ChunkKey::new(0, 0);

        reconciler.request(key, Lod::FULL, PayloadKind::Full);
        let result = reconciler.handle_message(&codec, &[1, 0xC4]);
        assert!(matches!(result, Err(ClientError::Codec(_))));
        assert!(reconciler.cache().is_empty());
    }

    #[test]
    fn test_non_numeric_grid_rejected() {
        let codec = Codec::new();
        let mut reconciler = Reconciler::new();
        reconciler.request(ChunkKey::new(0, 0), Lod::FULL, PayloadKind::Full);

        let grid = Value::Seq(vec![Value::from(1.0), Value::from("x")]);
        let result = reconciler.handle_message(&codec, &payload(&codec, PayloadKind::Full, &grid));
        assert!(matches!(result, Err(ClientError::NotNumeric { index: Some(1), .. })));
        assert!(reconciler.cache().is_empty());
    }

    #[test]
    fn test_response_without_request() {
        let codec = Codec::new();
        let mut reconciler = Reconciler::new();
        let full = payload(&codec, PayloadKind::Full, &Value::floats([1.0]));
        assert!(matches!(
            reconciler.handle_message(&codec, &full),
            Err(ClientError::NoOutstandingRequest)
        ));
    }

    #[test]
    fn test_server_computed_diff_reconstructs() {
        let codec = Codec::new();
        let mut reconciler = Reconciler::new();
        let key = ChunkKey::new(-4, 2);
        let old = Value::floats((0..16).map(f64::from));
        let new = Value::floats((0..16).map(|i| if i % 5 == 0 { -1.0 } else { f64::from(i) }));

        reconciler.request(key, Lod::FULL, PayloadKind::Full);
        reconciler
            .handle_message(&codec, &payload(&codec, PayloadKind::Full, &old))
            .unwrap();

        reconciler.request(key, Lod::FULL, PayloadKind::Diff);
        let wire = compute_diff(&old, &new).into_value();
        let update = reconciler
            .handle_message(&codec, &payload(&codec, PayloadKind::Diff, &wire))
            .unwrap();
        assert_eq!(Value::floats(update.values), new);
        assert_eq!(update.side, 4);
    }

    #[test]
    fn test_side_is_floor_sqrt() {
        let codec = Codec::new();
        let mut reconciler = Reconciler::new();
        reconciler.request(ChunkKey::new(0, 0), Lod::FULL, PayloadKind::Full);
        let update = reconciler
            .handle_message(&codec, &payload(&codec, PayloadKind::Full, &Value::floats([0.0; 10])))
            .unwrap();
        assert_eq!(update.side, 3);
    }
}

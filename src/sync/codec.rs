//! Value codec
//!
//! Encodes [`Value`]s as MessagePack, optionally wrapped in a zstd frame.
//!
//! Wire format of an encoded body:
//! ```text
//! plain:       MessagePack value (exactly one, no trailing bytes)
//! compressed:  zstd frame (magic 28 B5 2F FD) containing the plain form
//! ```

use crate::core::{CodecError, Map, MapKey, Scalar, Value};
use crate::extensions::{CompressionConfig, Compressor, is_compressed};

/// Encoder/decoder between [`Value`] and bytes.
///
/// Every call either returns a complete result or an error; no partial
/// output is ever exposed.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    /// Compressor applied on encode, when enabled.
    compressor: Option<Compressor>,
    /// Used on decode whenever a body carries a zstd frame.
    decompressor: Compressor,
}

impl Codec {
    /// Create a codec that encodes plain MessagePack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec that compresses encoded bodies.
    pub fn with_compression(config: CompressionConfig) -> Self {
        let compressor = Compressor::with_config(config);
        Self {
            decompressor: compressor.clone(),
            compressor: Some(compressor),
        }
    }

    /// Check if encode compresses.
    pub fn compresses(&self) -> bool {
        self.compressor.is_some()
    }

    /// Encode a value.
    ///
    /// Fails with [`CodecError::InvalidInput`] for the nil scalar and with
    /// [`CodecError::EncodingFailed`] if serialization yields no bytes.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        if value.is_nil() {
            return Err(CodecError::InvalidInput("cannot encode nil value"));
        }

        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &to_msgpack(value))
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        if buf.is_empty() {
            return Err(CodecError::EncodingFailed("serializer produced an empty buffer".into()));
        }

        match &self.compressor {
            Some(compressor) => compressor
                .compress(&buf)
                .map(|result| result.into_data())
                .map_err(|e| CodecError::EncodingFailed(e.to_string())),
            None => Ok(buf),
        }
    }

    /// Decode a value.
    ///
    /// Fails with [`CodecError::InvalidInput`] for an empty buffer and with
    /// [`CodecError::ParseError`] for anything that is not exactly one
    /// well-formed value.
    pub fn decode(&self, buffer: &[u8]) -> Result<Value, CodecError> {
        if buffer.is_empty() {
            return Err(CodecError::InvalidInput("cannot decode empty buffer"));
        }

        let inflated;
        let mut plain = buffer;
        if is_compressed(buffer) {
            inflated = self
                .decompressor
                .decompress(buffer)
                .map_err(|e| CodecError::ParseError(e.to_string()))?;
            plain = &inflated;
        }

        let mut cursor = plain;
        let raw = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| CodecError::ParseError(e.to_string()))?;
        if !cursor.is_empty() {
            return Err(CodecError::ParseError(format!(
                "{} trailing bytes after value",
                cursor.len()
            )));
        }

        from_msgpack(raw)
    }
}

fn to_msgpack(value: &Value) -> rmpv::Value {
    match value {
        Value::Map(map) => rmpv::Value::Map(
            map.iter()
                .map(|(k, v)| (key_to_msgpack(k), to_msgpack(v)))
                .collect(),
        ),
        Value::Seq(items) => rmpv::Value::Array(items.iter().map(to_msgpack).collect()),
        Value::Scalar(scalar) => match scalar {
            Scalar::Nil => rmpv::Value::Nil,
            Scalar::Bool(b) => rmpv::Value::Boolean(*b),
            Scalar::Int(i) => rmpv::Value::from(*i),
            Scalar::Float(f) => rmpv::Value::F64(*f),
            Scalar::Str(s) => rmpv::Value::from(s.as_str()),
            Scalar::Bytes(b) => rmpv::Value::Binary(b.clone()),
        },
    }
}

fn key_to_msgpack(key: &MapKey) -> rmpv::Value {
    match key {
        MapKey::Int(i) => rmpv::Value::from(*i),
        MapKey::Str(s) => rmpv::Value::from(s.as_str()),
    }
}

fn from_msgpack(raw: rmpv::Value) -> Result<Value, CodecError> {
    let value = match raw {
        rmpv::Value::Nil => Value::NIL,
        rmpv::Value::Boolean(b) => Value::from(b),
        rmpv::Value::Integer(i) => Value::from(
            i.as_i64()
                .ok_or_else(|| CodecError::ParseError(format!("integer {i} out of range")))?,
        ),
        rmpv::Value::F32(f) => Value::from(f64::from(f)),
        rmpv::Value::F64(f) => Value::from(f),
        rmpv::Value::String(s) => Value::from(
            s.into_str()
                .ok_or_else(|| CodecError::ParseError("invalid utf-8 string".into()))?,
        ),
        rmpv::Value::Binary(b) => Value::Scalar(Scalar::Bytes(b)),
        rmpv::Value::Array(items) => Value::Seq(
            items
                .into_iter()
                .map(from_msgpack)
                .collect::<Result<_, _>>()?,
        ),
        rmpv::Value::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                let key = key_from_msgpack(k)?;
                if map.contains_key(&key) {
                    return Err(CodecError::ParseError(format!("duplicate map key {key}")));
                }
                map.insert(key, from_msgpack(v)?);
            }
            Value::Map(map)
        }
        rmpv::Value::Ext(tag, _) => {
            return Err(CodecError::ParseError(format!("unsupported ext type {tag}")));
        }
    };
    Ok(value)
}

fn key_from_msgpack(raw: rmpv::Value) -> Result<MapKey, CodecError> {
    match raw {
        rmpv::Value::Integer(i) => i
            .as_i64()
            .map(MapKey::Int)
            .ok_or_else(|| CodecError::ParseError(format!("map key {i} out of range"))),
        rmpv::Value::String(s) => s
            .into_str()
            .map(MapKey::Str)
            .ok_or_else(|| CodecError::ParseError("invalid utf-8 map key".into())),
        other => Err(CodecError::ParseError(format!("unsupported map key {other}"))),
    }
}

//! Structured values.
//!
//! [`Value`] is the closed model the codec and diff engine operate on. It is
//! either a map, an ordered sequence, or a scalar, so diff and patch logic can
//! match exhaustively on shape.

use std::collections::BTreeMap;
use std::fmt;

/// Key of a [`Value::Map`] entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    /// Integer key.
    Int(i64),
    /// String key.
    Str(String),
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for MapKey {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for MapKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Int(i) => write!(f, "{i}"),
            MapKey::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Absent value. Also the tombstone inside a map diff.
    Nil,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

/// Map type used by [`Value::Map`].
pub type Map = BTreeMap<MapKey, Value>;

/// A structured value.
///
/// Equality is deep structural equality. Floats compare with IEEE semantics,
/// so a `NaN` never equals itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unordered map with unique keys.
    Map(Map),
    /// Ordered sequence.
    Seq(Vec<Value>),
    /// Scalar leaf.
    Scalar(Scalar),
}

impl Value {
    /// The nil scalar.
    pub const NIL: Value = Value::Scalar(Scalar::Nil);

    /// Build a sequence of floats.
    pub fn floats(values: impl IntoIterator<Item = f64>) -> Self {
        Value::Seq(values.into_iter().map(Value::from).collect())
    }

    /// Build a map from key/value pairs.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<MapKey>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Check if this is the nil scalar.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Scalar(Scalar::Nil))
    }

    /// Numeric view of an integer or float scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Scalar(Scalar::Float(f)) => Some(*f),
            Value::Scalar(Scalar::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    /// Integer view of an integer scalar.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Scalar(Scalar::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Borrow the elements of a sequence.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the entries of a map.
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Short shape name, used in log and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Map(_) => "map",
            Value::Seq(_) => "sequence",
            Value::Scalar(Scalar::Nil) => "nil",
            Value::Scalar(_) => "scalar",
        }
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::Scalar(s)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Scalar(Scalar::Float(f))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Scalar(Scalar::Int(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(Scalar::Str(s.to_owned()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(Scalar::Str(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Seq(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(map)
    }
}

/// Chunk grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChunkKey {
    /// Chunk X coordinate.
    pub cx: i32,
    /// Chunk Y coordinate.
    pub cy: i32,
}

impl ChunkKey {
    /// Create a chunk key.
    pub const fn new(cx: i32, cy: i32) -> Self {
        Self { cx, cy }
    }
}

impl From<(i32, i32)> for ChunkKey {
    fn from((cx, cy): (i32, i32)) -> Self {
        Self::new(cx, cy)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.cx, self.cy)
    }
}

/// Level of detail, quantized to one byte.
///
/// `0` is the coarsest grid and `255` the full-resolution one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lod(u8);

impl Lod {
    /// Full resolution.
    pub const FULL: Lod = Lod(u8::MAX);

    /// Quantize a fraction in `[0, 1]`: `round(clamp(lod, 0, 1) * 255)`.
    ///
    /// `NaN` quantizes to `0`.
    pub fn from_fraction(lod: f32) -> Self {
        if lod.is_nan() {
            return Lod(0);
        }
        Lod((lod.clamp(0.0, 1.0) * 255.0).round() as u8)
    }

    /// Wrap a raw quantized byte.
    pub const fn from_byte(byte: u8) -> Self {
        Lod(byte)
    }

    /// Quantized byte.
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Fraction in `[0, 1]`.
    pub fn fraction(self) -> f32 {
        f32::from(self.0) / 255.0
    }
}

impl Default for Lod {
    fn default() -> Self {
        Self::FULL
    }
}

impl fmt::Display for Lod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.fraction())
    }
}

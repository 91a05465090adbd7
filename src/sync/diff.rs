//! Structural diff and patch
//!
//! [`compute_diff`] produces the smallest [`Diff`] that turns one value into
//! another of the same shape; [`apply_diff`] replays it on a base.
//!
//! Known limits of the format:
//! - A map entry set to nil reads as a removal (nil is the tombstone).
//! - A sequence can grow through a diff but never shrink; trailing elements
//!   of a longer base survive a diff computed against a shorter value.

use std::collections::BTreeMap;

use crate::core::constants::{DIFF_INDEX_KEY, DIFF_VALUE_KEY};
use crate::core::{ApplyError, Map, MapKey, Value};

/// One changed or appended sequence element.
#[derive(Debug, Clone, PartialEq)]
pub struct SeqChange {
    /// Position in the sequence.
    pub index: usize,
    /// New element.
    pub value: Value,
}

impl SeqChange {
    /// Wire form: `{"index": i, "value": v}`.
    pub fn to_value(&self) -> Value {
        // Lengths beyond i64 cannot occur for values that fit in memory.
        let index = i64::try_from(self.index).unwrap_or(i64::MAX);
        Value::map([
            (DIFF_INDEX_KEY, Value::from(index)),
            (DIFF_VALUE_KEY, self.value.clone()),
        ])
    }

    /// Parse the wire form.
    pub fn from_value(record: &Value) -> Result<Self, ApplyError> {
        let fields = record.as_map().ok_or_else(|| {
            ApplyError::MalformedRecord(format!("expected map, got {}", record.kind()))
        })?;

        let index = fields
            .get(&MapKey::from(DIFF_INDEX_KEY))
            .and_then(Value::as_i64)
            .ok_or_else(|| ApplyError::MalformedRecord("missing integer index".into()))?;
        let index = usize::try_from(index)
            .map_err(|_| ApplyError::MalformedRecord(format!("negative index {index}")))?;

        let value = fields
            .get(&MapKey::from(DIFF_VALUE_KEY))
            .cloned()
            .ok_or_else(|| ApplyError::MalformedRecord("missing value".into()))?;

        Ok(Self { index, value })
    }
}

/// A structural delta between two values.
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Old and new are equal.
    Unchanged,
    /// Changed or added entries; nil marks a removed key.
    Map(Map),
    /// Changed or appended elements, in ascending index order.
    Seq(Vec<SeqChange>),
    /// Whole-value replacement (scalars and shape changes).
    Replace(Value),
}

impl Diff {
    /// Check if applying this diff leaves every base unchanged.
    pub fn is_empty(&self) -> bool {
        match self {
            Diff::Unchanged => true,
            Diff::Map(entries) => entries.is_empty(),
            Diff::Seq(changes) => changes.is_empty(),
            Diff::Replace(_) => false,
        }
    }

    /// Wire form of the diff.
    ///
    /// `Unchanged` is sent as an empty map.
    pub fn into_value(self) -> Value {
        match self {
            Diff::Unchanged => Value::Map(BTreeMap::new()),
            Diff::Map(entries) => Value::Map(entries),
            Diff::Seq(changes) => Value::Seq(changes.iter().map(SeqChange::to_value).collect()),
            Diff::Replace(value) => value,
        }
    }

    /// Interpret a decoded wire diff against the base it will be applied to.
    pub fn from_wire(base: &Value, wire: Value) -> Result<Self, ApplyError> {
        match (base, wire) {
            (Value::Seq(_), Value::Seq(records)) => records
                .iter()
                .map(SeqChange::from_value)
                .collect::<Result<_, _>>()
                .map(Diff::Seq),
            (Value::Map(_), Value::Map(entries)) => Ok(Diff::Map(entries)),
            (_, Value::Map(entries)) if entries.is_empty() => Ok(Diff::Unchanged),
            (_, wire) => Ok(Diff::Replace(wire)),
        }
    }
}

/// Compute the delta from `old` to `new`.
///
/// Equality is deep structural equality.
pub fn compute_diff(old: &Value, new: &Value) -> Diff {
    match (old, new) {
        (Value::Map(old), Value::Map(new)) => {
            let mut entries: Map = new
                .iter()
                .filter(|&(key, value)| old.get(key) != Some(value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            for key in old.keys().filter(|key| !new.contains_key(*key)) {
                entries.insert(key.clone(), Value::NIL);
            }
            Diff::Map(entries)
        }
        (Value::Seq(old), Value::Seq(new)) => {
            let overlap = old.len().min(new.len());
            let changed = (0..overlap).filter(|&i| old[i] != new[i]);
            let appended = overlap..new.len();
            Diff::Seq(
                changed
                    .chain(appended)
                    .map(|index| SeqChange {
                        index,
                        value: new[index].clone(),
                    })
                    .collect(),
            )
        }
        _ if old == new => Diff::Unchanged,
        _ => Diff::Replace(new.clone()),
    }
}

/// Apply `diff` to `base`, returning the reconstructed value.
///
/// Sequence records overwrite `index < len` and append at `index == len`;
/// any other index fails with [`ApplyError::IndexOutOfRange`].
pub fn apply_diff(base: &Value, diff: &Diff) -> Result<Value, ApplyError> {
    match (base, diff) {
        (_, Diff::Unchanged) => Ok(base.clone()),
        (Value::Map(base), Diff::Map(entries)) => {
            let mut result = base.clone();
            for (key, value) in entries {
                if value.is_nil() {
                    result.remove(key);
                } else {
                    result.insert(key.clone(), value.clone());
                }
            }
            Ok(Value::Map(result))
        }
        (Value::Seq(base), Diff::Seq(changes)) => {
            let mut result = base.clone();
            for SeqChange { index, value } in changes {
                let len = result.len();
                match (*index).cmp(&len) {
                    std::cmp::Ordering::Less => result[*index] = value.clone(),
                    std::cmp::Ordering::Equal => result.push(value.clone()),
                    std::cmp::Ordering::Greater => {
                        return Err(ApplyError::IndexOutOfRange { index: *index, len });
                    }
                }
            }
            Ok(Value::Seq(result))
        }
        (_, diff) => Ok(diff.clone().into_value()),
    }
}

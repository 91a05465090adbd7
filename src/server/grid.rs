//! Chunk grid normalization and level-of-detail sampling.

use crate::core::{Lod, Value};

use super::source::SourceError;

/// A rectangular chunk grid in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    /// Cells per row.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// `width * height` cells, row-major.
    pub cells: Vec<Value>,
}

impl Grid {
    /// Normalize a loaded chunk into a grid.
    ///
    /// Accepts a sequence of equal-length rows or a flat sequence whose
    /// length is a perfect square.
    pub fn from_value(value: Value) -> Result<Self, SourceError> {
        let items = match value {
            Value::Seq(items) => items,
            other => {
                return Err(SourceError::NotAGrid(format!(
                    "expected a sequence, got {}",
                    other.kind()
                )));
            }
        };

        if items.is_empty() {
            return Ok(Self {
                width: 0,
                height: 0,
                cells: Vec::new(),
            });
        }

        if !items.iter().any(|item| matches!(item, Value::Seq(_))) {
            let width = items.len().isqrt();
            if width * width != items.len() {
                return Err(SourceError::NotAGrid(format!(
                    "flat chunk of {} cells is not square",
                    items.len()
                )));
            }
            return Ok(Self {
                width,
                height: width,
                cells: items,
            });
        }

        let height = items.len();
        let mut width = None;
        let mut cells = Vec::new();
        for (y, row) in items.into_iter().enumerate() {
            let Value::Seq(row) = row else {
                return Err(SourceError::NotAGrid("chunk mixes rows and cells".into()));
            };
            match width {
                None => {
                    width = Some(row.len());
                    cells.reserve(row.len() * height);
                }
                Some(w) if w != row.len() => {
                    return Err(SourceError::NotAGrid(format!(
                        "row {y} has {} cells, expected {w}",
                        row.len()
                    )));
                }
                Some(_) => {}
            }
            cells.extend(row);
        }

        Ok(Self {
            width: width.unwrap_or(0),
            height,
            cells,
        })
    }

    /// Keep every `factor`-th row and column for the given level of detail.
    pub fn downsample(self, lod: Lod) -> Self {
        let factor = sample_factor(lod, self.width.max(self.height));
        if factor == 1 {
            return self;
        }

        let width = self.width.div_ceil(factor);
        let height = self.height.div_ceil(factor);
        let mut cells = Vec::with_capacity(width * height);
        for y in (0..self.height).step_by(factor) {
            let row = &self.cells[y * self.width..(y + 1) * self.width];
            cells.extend(row.iter().step_by(factor).cloned());
        }

        Self {
            width,
            height,
            cells,
        }
    }

    /// The flat sequence sent to clients.
    pub fn into_value(self) -> Value {
        Value::Seq(self.cells)
    }
}

/// Sampling stride for a level of detail.
///
/// `floor(1 / lod)` with `lod = byte / 255`, at least 1. Level zero keeps a
/// single sample of a grid whose longest side is `extent`.
pub fn sample_factor(lod: Lod, extent: usize) -> usize {
    match lod.as_byte() {
        0 => extent.max(1),
        b => usize::from(u8::MAX / b).max(1),
    }
}

use ndarray::{Array2, ArrayView1, Axis};

use crate::error::{Error, Result};

/// An ordered sequence of feature vectors (one row per frame).
///
/// Discrete models read the first (and only) value of each frame as the
/// emitted token.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    frames: Array2<f64>,
}

impl Observation {
    pub fn new(frames: Array2<f64>) -> Self {
        Self { frames }
    }

    /// Builds a one-dimensional observation from a slice of tokens.
    pub fn from_tokens(tokens: &[f64]) -> Self {
        let frames = Array2::from_shape_fn((tokens.len(), 1), |(t, _)| tokens[t]);
        Self { frames }
    }

    /// Builds an observation from per-frame vectors.
    ///
    /// Every frame must have the same dimension.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let dim = rows.first().map_or(0, |r| r.len());
        if let Some((t, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(Error::InvalidInput(format!(
                "frame {} has dimension {}, expected {}",
                t,
                row.len(),
                dim
            )));
        }
        let frames = Array2::from_shape_fn((rows.len(), dim), |(t, d)| rows[t][d]);
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.nrows() == 0
    }

    pub fn dimension(&self) -> usize {
        self.frames.ncols()
    }

    pub fn frame(&self, t: usize) -> ArrayView1<'_, f64> {
        self.frames.row(t)
    }

    pub fn frames(&self) -> impl Iterator<Item = ArrayView1<'_, f64>> {
        self.frames.axis_iter(Axis(0))
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.frames
    }
}

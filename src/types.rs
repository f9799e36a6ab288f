//! Core tensor and quantization types shared by the clustering engines and
//! the compressed artifact.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VqError};

/// Row-major `N x D` matrix of `f32` attribute vectors, one row per point.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeTensor {
    dim: usize,
    data: Vec<f32>,
}

/// Representative vectors produced by a clustering run. `K x D`.
pub type Codebook = AttributeTensor;

/// One codebook offset per input row.
pub type AssignmentIndex = Vec<u32>;

impl AttributeTensor {
    /// Wrap a flat row-major buffer. `data.len()` must be a multiple of `dim`.
    pub fn new(dim: usize, data: Vec<f32>) -> Result<Self> {
        if dim == 0 {
            return Err(VqError::Validation("attribute dimension must be > 0".into()));
        }
        if data.len() % dim != 0 {
            return Err(VqError::Validation(format!(
                "buffer of {} values is not a whole number of {dim}-dimensional rows",
                data.len()
            )));
        }
        Ok(Self { dim, data })
    }

    /// Build from individual rows, all of which must share one length.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let dim = rows
            .first()
            .map(|r| r.as_ref().len())
            .ok_or_else(|| VqError::Validation("cannot build a tensor from zero rows".into()))?;
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            let row = row.as_ref();
            if row.len() != dim {
                return Err(VqError::DimensionMismatch {
                    expected: dim,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Self::new(dim, data)
    }

    /// An all-zero tensor of `rows x dim`.
    pub fn zeros(rows: usize, dim: usize) -> Self {
        Self {
            dim,
            data: vec![0.0; rows * dim],
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.dim)
    }

    /// Flat view of rows `start..end`.
    #[inline]
    pub fn rows_slice(&self, start: usize, end: usize) -> &[f32] {
        &self.data[start * self.dim..end * self.dim]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// New tensor holding the rows at `indices`, in order.
    pub fn gather(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.dim);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            dim: self.dim,
            data,
        }
    }

    /// Column-wise arithmetic mean over all rows.
    pub fn mean(&self) -> Vec<f32> {
        let mut sums = vec![0.0f64; self.dim];
        for row in self.rows() {
            for (s, &v) in sums.iter_mut().zip(row) {
                *s += v as f64;
            }
        }
        let n = self.len().max(1) as f64;
        sums.into_iter().map(|s| (s / n) as f32).collect()
    }
}

/// The three attribute groups quantized independently per model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeGroup {
    /// DC colour plus spherical-harmonic rest coefficients.
    Color,
    Scale,
    Rotation,
}

impl AttributeGroup {
    pub const ALL: [AttributeGroup; 3] = [
        AttributeGroup::Color,
        AttributeGroup::Scale,
        AttributeGroup::Rotation,
    ];

    /// Archive array names for `(codebook, indices)`.
    pub fn array_names(self) -> (&'static str, &'static str) {
        match self {
            AttributeGroup::Color => ("cDCSH", "iDCSH"),
            AttributeGroup::Scale => ("cSc", "iSc"),
            AttributeGroup::Rotation => ("cRo", "iRo"),
        }
    }
}

impl std::fmt::Display for AttributeGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttributeGroup::Color => "color",
            AttributeGroup::Scale => "scale",
            AttributeGroup::Rotation => "rotation",
        };
        f.write_str(name)
    }
}

/// A codebook and the per-point indices into it.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedAttribute {
    pub codebook: Codebook,
    pub indices: AssignmentIndex,
}

impl QuantizedAttribute {
    /// Pair a codebook with its indices, checking every index is in range.
    pub fn new(codebook: Codebook, indices: AssignmentIndex) -> Result<Self> {
        let q = Self { codebook, indices };
        q.validate()?;
        Ok(q)
    }

    /// Number of codebook entries.
    pub fn k(&self) -> usize {
        self.codebook.len()
    }

    pub fn validate(&self) -> Result<()> {
        let k = self.codebook.len();
        if let Some((pos, &bad)) = self
            .indices
            .iter()
            .enumerate()
            .find(|(_, &i)| i as usize >= k)
        {
            return Err(VqError::CorruptArtifact(format!(
                "index {bad} at position {pos} is outside codebook of length {k}"
            )));
        }
        Ok(())
    }

    /// Expand back to one codebook row per point.
    pub fn reconstruct(&self) -> AttributeTensor {
        let mut data = Vec::with_capacity(self.indices.len() * self.codebook.dim());
        for &i in &self.indices {
            data.extend_from_slice(self.codebook.row(i as usize));
        }
        AttributeTensor {
            dim: self.codebook.dim(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_ragged_buffer() {
        assert!(AttributeTensor::new(3, vec![1.0; 7]).is_err());
        assert!(AttributeTensor::new(0, vec![]).is_err());
    }

    #[test]
    fn test_from_rows_dimension_mismatch() {
        let rows = vec![vec![1.0f32, 2.0], vec![3.0]];
        match AttributeTensor::from_rows(&rows) {
            Err(VqError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("expected DimensionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_row_access_and_gather() {
        let t = AttributeTensor::from_rows(&[[0.0f32, 1.0], [2.0, 3.0], [4.0, 5.0]]).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.dim(), 2);
        assert_eq!(t.row(1), &[2.0, 3.0]);

        let g = t.gather(&[2, 0, 2]);
        assert_eq!(g.as_slice(), &[4.0, 5.0, 0.0, 1.0, 4.0, 5.0]);
    }

    #[test]
    fn test_mean() {
        let t = AttributeTensor::from_rows(&[[1.0f32, 10.0], [3.0, 20.0]]).unwrap();
        assert_eq!(t.mean(), vec![2.0, 15.0]);
    }

    #[test]
    fn test_quantized_reconstruct() {
        let codebook = AttributeTensor::from_rows(&[[0.0f32, 0.0], [1.0, 1.0]]).unwrap();
        let q = QuantizedAttribute::new(codebook, vec![1, 0, 1]).unwrap();
        let r = q.reconstruct();
        assert_eq!(r.as_slice(), &[1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_quantized_rejects_out_of_range() {
        let codebook = AttributeTensor::from_rows(&[[0.0f32], [1.0]]).unwrap();
        let err = QuantizedAttribute::new(codebook, vec![0, 2]).unwrap_err();
        assert!(matches!(err, VqError::CorruptArtifact(_)));
    }

    #[test]
    fn test_group_array_names() {
        assert_eq!(AttributeGroup::Color.array_names(), ("cDCSH", "iDCSH"));
        assert_eq!(AttributeGroup::Rotation.to_string(), "rotation");
    }
}

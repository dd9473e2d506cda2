//! Dense vectors and matrices for the search CLI.
//!
//! A [`Tensor`] is a rank 1 (vector) or rank 2 (matrix) block of `f32` or
//! `f64` values. Tensors are imported from JSON and persisted in a small
//! checksummed binary format (see [`save`] and [`load`]).

mod file;
mod json;

pub use file::{load, save};
pub use json::{from_json, read_json};

/// Element type stored in a tensor file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    /// Bytes per element.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    const fn code(self) -> u8 {
        match self {
            Self::F32 => 0,
            Self::F64 => 1,
        }
    }

    fn from_code(code: u8) -> eyre::Result<Self> {
        match code {
            0 => Ok(Self::F32),
            1 => Ok(Self::F64),
            other => eyre::bail!("unknown dtype code {other}"),
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::F32 => f.write_str("f32"),
            Self::F64 => f.write_str("f64"),
        }
    }
}

/// Whether a tensor is a single vector or a matrix of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Vector,
    Matrix,
}

impl Rank {
    const fn code(self) -> u8 {
        match self {
            Self::Vector => 1,
            Self::Matrix => 2,
        }
    }
}

/// An element type that can be stored in a tensor file.
pub trait TensorElement: knn_core::Element + for<'de> serde::Deserialize<'de> {
    /// Dtype tag written to the file header.
    const DTYPE: DType;

    /// Append the little-endian bytes of `self`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode one element from exactly `DTYPE.size()` bytes.
    fn read_le(bytes: &[u8]) -> Self;

    /// Erase the element type.
    fn into_any(tensor: Tensor<Self>) -> AnyTensor;
}

impl TensorElement for f32 {
    const DTYPE: DType = DType::F32;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        Self::from_le_bytes(buf)
    }

    fn into_any(tensor: Tensor<Self>) -> AnyTensor {
        AnyTensor::F32(tensor)
    }
}

impl TensorElement for f64 {
    const DTYPE: DType = DType::F64;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Self::from_le_bytes(buf)
    }

    fn into_any(tensor: Tensor<Self>) -> AnyTensor {
        AnyTensor::F64(tensor)
    }
}

/// A non-empty rank 1 or rank 2 tensor.
///
/// Vectors are stored as a single-row matrix so both ranks share one
/// row-major buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    rank: Rank,
    data: ndarray::Array2<T>,
}

impl<T: TensorElement> Tensor<T> {
    /// Build a vector tensor.
    pub fn from_vector(values: Vec<T>) -> eyre::Result<Self> {
        if values.is_empty() {
            eyre::bail!("vector must not be empty");
        }
        let data = ndarray::Array2::from_shape_vec((1, values.len()), values)?;
        Ok(Self {
            rank: Rank::Vector,
            data,
        })
    }

    /// Build a matrix tensor from rows of equal, non-zero length.
    pub fn from_rows(rows: Vec<Vec<T>>) -> eyre::Result<Self> {
        let Some(first) = rows.first() else {
            eyre::bail!("matrix must have at least one row");
        };
        let cols = first.len();
        if cols == 0 {
            eyre::bail!("matrix rows must not be empty");
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != cols) {
            eyre::bail!("row {i} has {} values, expected {cols}", row.len());
        }

        let nrows = rows.len();
        let flat: Vec<T> = rows.into_iter().flatten().collect();
        let data = ndarray::Array2::from_shape_vec((nrows, cols), flat)?;
        Ok(Self {
            rank: Rank::Matrix,
            data,
        })
    }

    fn from_parts(rank: Rank, rows: usize, cols: usize, values: Vec<T>) -> eyre::Result<Self> {
        let data = ndarray::Array2::from_shape_vec((rows, cols), values)?;
        Ok(Self { rank, data })
    }

    #[must_use]
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// `[len]` for vectors, `[rows, cols]` for matrices.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        match self.rank {
            Rank::Vector => vec![self.data.ncols()],
            Rank::Matrix => vec![self.data.nrows(), self.data.ncols()],
        }
    }

    /// The values of a vector tensor, or `None` for a matrix.
    #[must_use]
    pub fn as_vector(&self) -> Option<knn_core::VectorView<'_, T>> {
        match self.rank {
            Rank::Vector => Some(self.data.row(0)),
            Rank::Matrix => None,
        }
    }

    /// The tensor as a matrix; a vector is a single row.
    #[must_use]
    pub fn as_matrix(&self) -> knn_core::MatrixView<'_, T> {
        self.data.view()
    }
}

/// A tensor whose element type is only known at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyTensor {
    F32(Tensor<f32>),
    F64(Tensor<f64>),
}

impl AnyTensor {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
        }
    }

    #[must_use]
    pub fn rank(&self) -> Rank {
        match self {
            Self::F32(t) => t.rank(),
            Self::F64(t) => t.rank(),
        }
    }

    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::F32(t) => t.shape(),
            Self::F64(t) => t.shape(),
        }
    }
}

impl From<Tensor<f32>> for AnyTensor {
    fn from(tensor: Tensor<f32>) -> Self {
        Self::F32(tensor)
    }
}

impl From<Tensor<f64>> for AnyTensor {
    fn from(tensor: Tensor<f64>) -> Self {
        Self::F64(tensor)
    }
}

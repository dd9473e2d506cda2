//! Binary tensor files.
//!
//! Layout, all little endian:
//! - header (28 bytes): magic `u32`, version `u32`, dtype `u8`, rank `u8`,
//!   two reserved zero bytes, rows `u64`, cols `u64`
//! - payload: `rows * cols` elements, row-major
//! - trailer (32 bytes): blake3 hash of the payload

use std::io::Write as _;

use eyre::WrapErr as _;

use crate::{AnyTensor, DType, Rank, Tensor, TensorElement};

/// Magic bytes for tensor file validation.
const MAGIC: u32 = 0x4B4E_4E54; // "KNNT"
const VERSION: u32 = 1;

const HEADER_SIZE: usize = 28;
const CHECKSUM_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    dtype: DType,
    rank: Rank,
    rows: u64,
    cols: u64,
}

impl Header {
    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8] = self.dtype.code();
        buf[9] = self.rank.code();
        buf[12..20].copy_from_slice(&self.rows.to_le_bytes());
        buf[20..28].copy_from_slice(&self.cols.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; HEADER_SIZE]) -> eyre::Result<Self> {
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

        if magic != MAGIC {
            eyre::bail!("invalid tensor file magic: expected {MAGIC:#x}, got {magic:#x}");
        }
        if version != VERSION {
            eyre::bail!("unsupported tensor file version: expected {VERSION}, got {version}");
        }

        let dtype = DType::from_code(buf[8])?;
        let rank = match buf[9] {
            1 => Rank::Vector,
            2 => Rank::Matrix,
            other => eyre::bail!("unsupported tensor rank {other}"),
        };

        let rows = u64::from_le_bytes([
            buf[12], buf[13], buf[14], buf[15], buf[16], buf[17], buf[18], buf[19],
        ]);
        let cols = u64::from_le_bytes([
            buf[20], buf[21], buf[22], buf[23], buf[24], buf[25], buf[26], buf[27],
        ]);

        if rows == 0 || cols == 0 {
            eyre::bail!("tensor file has an empty shape {rows}x{cols}");
        }
        if rank == Rank::Vector && rows != 1 {
            eyre::bail!("vector tensor file has {rows} rows");
        }

        Ok(Self {
            dtype,
            rank,
            rows,
            cols,
        })
    }

    /// Payload length in bytes, or `None` if it does not fit in memory.
    fn payload_len(self) -> Option<usize> {
        let rows = usize::try_from(self.rows).ok()?;
        let cols = usize::try_from(self.cols).ok()?;
        rows.checked_mul(cols)?.checked_mul(self.dtype.size())
    }
}

/// Write `tensor` to `path`, replacing any existing file.
pub fn save<T: TensorElement>(path: &std::path::Path, tensor: &Tensor<T>) -> eyre::Result<()> {
    let matrix = tensor.as_matrix();
    let header = Header {
        dtype: T::DTYPE,
        rank: tensor.rank(),
        rows: matrix.nrows() as u64,
        cols: matrix.ncols() as u64,
    };

    let mut payload = Vec::with_capacity(matrix.len() * T::DTYPE.size());
    for &value in matrix {
        value.write_le(&mut payload);
    }
    let checksum = blake3::hash(&payload);

    let file = std::fs::File::create(path)
        .wrap_err_with(|| format!("failed to create tensor file {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);

    writer
        .write_all(&header.to_bytes())
        .wrap_err("failed to write header")?;
    writer
        .write_all(&payload)
        .wrap_err("failed to write payload")?;
    writer
        .write_all(checksum.as_bytes())
        .wrap_err("failed to write checksum")?;
    writer.flush().wrap_err("failed to flush tensor file")?;

    tracing::debug!(
        path = %path.display(),
        dtype = %T::DTYPE,
        rows = header.rows,
        cols = header.cols,
        "saved tensor"
    );
    Ok(())
}

/// Read a tensor file written by [`save`].
///
/// Rejects files with a bad magic, unknown version or dtype, a size that
/// does not match the header, or a payload whose checksum does not match.
pub fn load(path: &std::path::Path) -> eyre::Result<AnyTensor> {
    let file = std::fs::File::open(path)
        .wrap_err_with(|| format!("failed to open tensor file {}", path.display()))?;

    // SAFETY: the map is read-only and dropped before this function returns.
    let mmap = unsafe {
        memmap2::Mmap::map(&file).wrap_err_with(|| format!("failed to mmap {}", path.display()))?
    };

    let Some((header_bytes, rest)) = mmap.split_first_chunk::<HEADER_SIZE>() else {
        eyre::bail!(
            "tensor file {} is too short for a header ({} bytes)",
            path.display(),
            mmap.len()
        );
    };
    let header = Header::from_bytes(header_bytes)
        .wrap_err_with(|| format!("invalid tensor file {}", path.display()))?;

    let payload_len = header
        .payload_len()
        .filter(|len| len.checked_add(CHECKSUM_SIZE).is_some())
        .ok_or_else(|| eyre::eyre!("tensor shape {}x{} is too large", header.rows, header.cols))?;
    let expected = payload_len + CHECKSUM_SIZE;
    if rest.len() != expected {
        eyre::bail!(
            "tensor file {} has {} bytes after the header, expected {expected}",
            path.display(),
            rest.len()
        );
    }

    let (payload, checksum) = rest.split_at(payload_len);
    if blake3::hash(payload).as_bytes() != checksum {
        eyre::bail!("checksum mismatch in tensor file {}", path.display());
    }

    let tensor = match header.dtype {
        DType::F32 => f32::into_any(decode(header, payload)?),
        DType::F64 => f64::into_any(decode(header, payload)?),
    };

    tracing::debug!(
        path = %path.display(),
        dtype = %header.dtype,
        rows = header.rows,
        cols = header.cols,
        "loaded tensor"
    );
    Ok(tensor)
}

fn decode<T: TensorElement>(header: Header, payload: &[u8]) -> eyre::Result<Tensor<T>> {
    let values: Vec<T> = payload
        .chunks_exact(T::DTYPE.size())
        .map(T::read_le)
        .collect();
    let rows = usize::try_from(header.rows)?;
    let cols = usize::try_from(header.cols)?;
    Tensor::from_parts(header.rank, rows, cols, values)
}

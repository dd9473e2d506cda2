//! JSON import: a flat array is a vector, an array of arrays is a matrix.

use eyre::WrapErr as _;

use crate::{AnyTensor, DType, Tensor, TensorElement};

#[derive(serde::Deserialize)]
#[serde(untagged, bound = "T: TensorElement")]
enum JsonTensor<T> {
    Vector(Vec<T>),
    Matrix(Vec<Vec<T>>),
}

fn parse<T: TensorElement>(text: &str) -> eyre::Result<AnyTensor> {
    let parsed: JsonTensor<T> = serde_json::from_str(text)
        .wrap_err("expected a JSON array of numbers or an array of number arrays")?;
    let tensor = match parsed {
        JsonTensor::Vector(values) => Tensor::from_vector(values)?,
        JsonTensor::Matrix(rows) => Tensor::from_rows(rows)?,
    };
    Ok(T::into_any(tensor))
}

/// Parse a tensor from JSON text, storing values as `dtype`.
pub fn from_json(text: &str, dtype: DType) -> eyre::Result<AnyTensor> {
    match dtype {
        DType::F32 => parse::<f32>(text),
        DType::F64 => parse::<f64>(text),
    }
}

/// Read and parse a JSON tensor file.
pub fn read_json(path: &std::path::Path, dtype: DType) -> eyre::Result<AnyTensor> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    from_json(&text, dtype).wrap_err_with(|| format!("failed to parse {}", path.display()))
}

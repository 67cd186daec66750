//! Name-addressed creation entry points, as used by host bindings.
//!
//! Each call resolves the dtype first, then validates the shape, then
//! allocates. The first failure is returned unchanged. Every call returns
//! an independently owned tensor.

use crate::dtype::resolve_dtype;
use crate::scalar::Scalar;
use crate::tensor::{FillMode, Tensor};
use crate::Result;

/// Zero-filled tensor of the named dtype.
pub fn zeros(shape: &[i64], dtype_name: &str) -> Result<Tensor> {
    let dtype = resolve_dtype(dtype_name)?;
    Tensor::create(shape, dtype, FillMode::Zero)
}

/// One-filled tensor of the named dtype (`1.0` for floats, `1` for integers).
pub fn ones(shape: &[i64], dtype_name: &str) -> Result<Tensor> {
    let dtype = resolve_dtype(dtype_name)?;
    Tensor::create(shape, dtype, FillMode::One)
}

/// Tensor filled with `value`; its dtype is the value's.
pub fn full(shape: &[i64], value: impl Into<Scalar>) -> Result<Tensor> {
    let value = value.into();
    Tensor::create(shape, value.dtype(), FillMode::Value(value))
}

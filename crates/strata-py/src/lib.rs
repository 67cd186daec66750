//! # strata-py
//!
//! PyO3 bindings for strata-core → `import tensor_py` in Python.
//!
//! Provides:
//! - `tensor_py.zeros(shape, dtype="f32")` / `tensor_py.ones(...)` / `tensor_py.full(...)`,
//!   returning numpy arrays that view the tensor storage without copying
//! - `tensor_py.Tensor` — the owning object; `.numpy()` borrows it as an array
//! - `tensor_py.resolve_dtype(name)` — registry lookup

use half::f16;
use numpy::ndarray::{ArrayViewD, IxDyn, ShapeBuilder};
use numpy::{Element as NumpyElement, PyArrayDyn};
use pyo3::exceptions::{PyMemoryError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyTuple};

use strata_core::{export_view, DType, FillMode, Scalar, Tensor, TensorConfig, TensorError};

fn to_py_err(e: TensorError) -> PyErr {
    match e {
        TensorError::OutOfMemory { .. } => PyMemoryError::new_err(e.to_string()),
        _ => PyValueError::new_err(e.to_string()),
    }
}

// ============================================================================
// Tensor wrapper
// ============================================================================

/// Owns a strata tensor. numpy arrays borrowed from it hold it as their
/// `base`, which keeps the storage valid.
#[pyclass(name = "Tensor", frozen)]
struct PyTensor {
    inner: Tensor,
}

#[pymethods]
impl PyTensor {
    /// Create a tensor of the given shape, dtype and fill (`"zeros"` or `"ones"`).
    #[new]
    #[pyo3(signature = (shape, dtype="f32", fill="zeros"))]
    fn new(shape: Vec<i64>, dtype: &str, fill: &str) -> PyResult<Self> {
        let inner = match fill {
            "zeros" => strata_core::zeros(&shape, dtype),
            "ones" => strata_core::ones(&shape, dtype),
            other => return Err(PyValueError::new_err(format!("unknown fill '{other}'"))),
        }
        .map_err(to_py_err)?;
        Ok(Self { inner })
    }

    #[getter]
    fn shape<'py>(&self, py: Python<'py>) -> Bound<'py, PyTuple> {
        PyTuple::new_bound(py, self.inner.dims())
    }

    /// Strides in bytes.
    #[getter]
    fn strides<'py>(&self, py: Python<'py>) -> Bound<'py, PyTuple> {
        PyTuple::new_bound(py, self.inner.byte_strides())
    }

    #[getter]
    fn ndim(&self) -> usize {
        self.inner.ndim()
    }

    #[getter]
    fn dtype(&self) -> String {
        self.inner.dtype().to_string()
    }

    #[getter]
    fn nbytes(&self) -> usize {
        self.inner.nbytes()
    }

    /// Reorder axes; the result shares this tensor's storage.
    fn permute(&self, axes: Vec<usize>) -> PyResult<Self> {
        let inner = self.inner.permute(&axes).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Borrow as a numpy array over the same memory (no copy).
    fn numpy<'py>(slf: &Bound<'py, Self>) -> Bound<'py, PyAny> {
        borrow_array(slf)
    }

    /// numpy conversion protocol, so `np.asarray(t)` shares memory too.
    #[pyo3(signature = (dtype=None, copy=None))]
    fn __array__<'py>(
        slf: &Bound<'py, Self>,
        dtype: Option<&Bound<'py, PyAny>>,
        copy: Option<bool>,
    ) -> PyResult<Bound<'py, PyAny>> {
        let array = borrow_array(slf);
        match (dtype, copy) {
            (Some(dt), _) => array.call_method1("astype", (dt,)),
            (None, Some(true)) => array.call_method0("copy"),
            _ => Ok(array),
        }
    }

    fn __repr__(&self) -> String {
        format!("{}", self.inner)
    }
}

fn borrow_typed<'py, T: NumpyElement>(owner: &Bound<'py, PyTensor>) -> Bound<'py, PyAny> {
    let tensor = &owner.get().inner;
    let view = export_view(tensor);
    let layout = IxDyn(view.shape()).strides(IxDyn(tensor.strides()));
    // SAFETY: shape and element strides describe the tensor's own layout,
    // which lies inside its storage; the pointer is aligned for T.
    let array = unsafe { ArrayViewD::<T>::from_shape_ptr(layout, view.data_ptr().cast::<T>()) };
    // SAFETY: `owner` becomes the array's base and holds the storage for as
    // long as the array lives.
    unsafe { PyArrayDyn::<T>::borrow_from_array_bound(&array, owner.clone().into_any()) }.into_any()
}

fn borrow_array<'py>(owner: &Bound<'py, PyTensor>) -> Bound<'py, PyAny> {
    match owner.get().inner.dtype() {
        DType::F16 => borrow_typed::<f16>(owner),
        DType::F32 => borrow_typed::<f32>(owner),
        DType::F64 => borrow_typed::<f64>(owner),
        DType::I32 => borrow_typed::<i32>(owner),
        DType::I64 => borrow_typed::<i64>(owner),
    }
}

fn into_numpy(py: Python<'_>, tensor: Tensor) -> PyResult<PyObject> {
    let owner = Bound::new(py, PyTensor { inner: tensor })?;
    Ok(borrow_array(&owner).unbind())
}

/// Convert a Python number to the dtype's scalar. Integer dtypes reject
/// floats and out-of-range values instead of truncating.
fn scalar_for(dtype: DType, value: &Bound<'_, PyAny>) -> PyResult<Scalar> {
    let scalar = match dtype {
        DType::F16 => value.extract::<f64>().map(|v| Scalar::F16(f16::from_f64(v))),
        DType::F32 => value.extract().map(Scalar::F32),
        DType::F64 => value.extract().map(Scalar::F64),
        DType::I32 => value.extract().map(Scalar::I32),
        DType::I64 => value.extract().map(Scalar::I64),
    };
    scalar.map_err(|e| PyValueError::new_err(format!("invalid fill value for {dtype}: {e}")))
}

fn config_for(max_bytes: Option<usize>) -> TensorConfig {
    match max_bytes {
        Some(limit) => TensorConfig::default().with_max_alloc_bytes(limit),
        None => TensorConfig::default(),
    }
}

/// Resolves the dtype before the shape is looked at, so an unknown dtype
/// wins over a bad shape.
fn create(shape: &[i64], dtype: &str, fill: FillMode, max_bytes: Option<usize>) -> PyResult<Tensor> {
    let dt = strata_core::resolve_dtype(dtype).map_err(to_py_err)?;
    Tensor::create_with(&config_for(max_bytes), shape, dt, fill).map_err(to_py_err)
}

// ============================================================================
// Creation functions
// ============================================================================

/// Zero-filled array. `max_bytes` caps the allocation (`MemoryError` above it).
#[pyfunction]
#[pyo3(signature = (shape, dtype="f32", max_bytes=None))]
fn zeros(py: Python<'_>, shape: Vec<i64>, dtype: &str, max_bytes: Option<usize>) -> PyResult<PyObject> {
    let t = create(&shape, dtype, FillMode::Zero, max_bytes)?;
    into_numpy(py, t)
}

/// One-filled array.
#[pyfunction]
#[pyo3(signature = (shape, dtype="f32", max_bytes=None))]
fn ones(py: Python<'_>, shape: Vec<i64>, dtype: &str, max_bytes: Option<usize>) -> PyResult<PyObject> {
    let t = create(&shape, dtype, FillMode::One, max_bytes)?;
    into_numpy(py, t)
}

/// Array filled with `value`.
#[pyfunction]
#[pyo3(signature = (shape, value, dtype="f32", max_bytes=None))]
fn full(
    py: Python<'_>,
    shape: Vec<i64>,
    value: &Bound<'_, PyAny>,
    dtype: &str,
    max_bytes: Option<usize>,
) -> PyResult<PyObject> {
    let dt = strata_core::resolve_dtype(dtype).map_err(to_py_err)?;
    let fill = FillMode::Value(scalar_for(dt, value)?);
    let t = create(&shape, dtype, fill, max_bytes)?;
    into_numpy(py, t)
}

/// Registry entry for a dtype name.
#[pyfunction]
fn resolve_dtype<'py>(py: Python<'py>, name: &str) -> PyResult<Bound<'py, PyDict>> {
    let info = strata_core::resolve_dtype(name).map_err(to_py_err)?.info();
    let dict = PyDict::new_bound(py);
    dict.set_item("name", info.name)?;
    dict.set_item("itemsize", info.byte_width)?;
    dict.set_item("alignment", info.alignment)?;
    dict.set_item("is_floating", info.is_floating)?;
    dict.set_item("is_signed", info.is_signed)?;
    dict.set_item("format", info.format_code)?;
    Ok(dict)
}

// ============================================================================
// Module entry point
// ============================================================================

#[pymodule]
fn tensor_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTensor>()?;
    m.add_function(wrap_pyfunction!(zeros, m)?)?;
    m.add_function(wrap_pyfunction!(ones, m)?)?;
    m.add_function(wrap_pyfunction!(full, m)?)?;
    m.add_function(wrap_pyfunction!(resolve_dtype, m)?)?;
    Ok(())
}

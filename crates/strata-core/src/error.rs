use crate::DType;

/// Errors produced by strata-core.
///
/// Creation failures (`UnknownDType`, `InvalidShape`, `OutOfMemory`) are
/// surfaced unchanged from the step that raised them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TensorError {
    #[error("Unknown dtype '{0}' (expected one of f16, f32, f64, i32, i64)")]
    UnknownDType(String),

    #[error("Invalid shape {dims:?}: {reason}")]
    InvalidShape { dims: Vec<i64>, reason: &'static str },

    #[error("Out of memory: failed to allocate {nbytes} bytes (align {align})")]
    OutOfMemory { nbytes: usize, align: usize },

    #[error("Invalid alignment {0}: must be a non-zero power of two")]
    InvalidAlignment(usize),

    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("Shapes {lhs:?} and {rhs:?} cannot be broadcast together")]
    BroadcastError { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("Cannot reshape {numel} elements into {shape:?}")]
    InvalidReshape { numel: usize, shape: Vec<isize> },

    #[error("Invalid permutation {perm:?} for tensor with {ndim} dimensions")]
    InvalidPermutation { perm: Vec<usize>, ndim: usize },

    #[error("Index {index:?} out of bounds for shape {shape:?}")]
    IndexOutOfBounds { index: Vec<usize>, shape: Vec<usize> },

    #[error("Operation requires a contiguous tensor")]
    NonContiguous,

    #[error("Storage is shared by {0} handles; exclusive access required")]
    StorageShared(usize),
}

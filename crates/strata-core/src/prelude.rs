//! Convenience re-exports for common strata-core types.
//!
//! ```rust
//! use strata_core::prelude::*;
//! ```

pub use crate::BufferView;
pub use crate::DType;
pub use crate::FillMode;
pub use crate::Result;
pub use crate::Scalar;
pub use crate::Shape;
pub use crate::Tensor;
pub use crate::TensorError;

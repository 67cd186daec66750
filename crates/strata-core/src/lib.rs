//! # strata-core
//!
//! Native N-dimensional tensor storage for the strata engine.
//!
//! Provides:
//! - A closed dtype registry (f16, f32, f64, i32, i64)
//! - Row-major shape/stride computation with overflow-checked validation
//! - Aligned, reference-counted storage with bit-exact fills
//! - Zero-copy buffer export for numpy-style consumers
//! - `zeros` / `ones` / `full` creation by dtype name
//!
//! Arithmetic is left to the consumer of the exported buffer.

pub mod config;
pub mod creation;
pub mod dtype;
pub mod error;
pub mod interop;
pub mod prelude;
pub mod scalar;
pub mod shape;
pub mod storage;
pub mod tensor;

pub use config::TensorConfig;
pub use creation::{full, ones, zeros};
pub use dtype::{resolve_dtype, DType, DTypeInfo, Element};
pub use error::TensorError;
pub use interop::{export_view, export_view_readonly, BufferView};
pub use scalar::Scalar;
pub use shape::Shape;
pub use storage::Storage;
pub use tensor::{FillMode, Tensor};

pub type Result<T> = std::result::Result<T, TensorError>;

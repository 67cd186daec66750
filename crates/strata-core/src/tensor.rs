use std::fmt;

use half::f16;
use smallvec::SmallVec;

use crate::config::TensorConfig;
use crate::dtype::{DType, Element};
use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::shape::{Shape, Strides};
use crate::storage::Storage;
use crate::Result;

/// How a freshly allocated tensor is initialized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillMode {
    /// Every byte zero.
    Zero,
    /// The dtype's `1` (`1.0` for floats), bit-exact.
    One,
    /// An explicit value; its dtype must match the tensor's.
    Value(Scalar),
}

/// A strided N-dimensional array over shared, aligned storage.
///
/// Creation always allocates fresh storage. Views (`reshape`, `permute`)
/// share it, and so do exported [`BufferView`](crate::BufferView)s, which
/// keep the storage alive after the tensor itself is dropped.
///
/// # Examples
///
/// ```
/// use strata_core::{DType, Tensor};
///
/// let t = Tensor::ones(&[2, 3], DType::F32).unwrap();
/// assert_eq!(t.shape().dims(), &[2, 3]);
/// assert_eq!(t.strides(), &[3, 1]);
/// assert!(t.all_equal(1.0f32).unwrap());
/// ```
#[derive(Clone)]
pub struct Tensor {
    storage: Storage,
    shape: Shape,
    strides: Strides,
    /// Offset of the first element, in elements.
    offset: usize,
    dtype: DType,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a tensor from caller-supplied dimensions.
    ///
    /// Validates the shape, computes row-major strides, allocates exactly
    /// `element_size × numel` bytes and applies `fill`. Nothing is returned
    /// unless every step succeeds.
    pub fn create(dims: &[i64], dtype: DType, fill: FillMode) -> Result<Tensor> {
        Self::create_with(&TensorConfig::default(), dims, dtype, fill)
    }

    /// Like [`Tensor::create`] with a custom allocation config.
    pub fn create_with(
        config: &TensorConfig,
        dims: &[i64],
        dtype: DType,
        fill: FillMode,
    ) -> Result<Tensor> {
        let shape = Shape::validate(dims, dtype)?;
        Self::build(config, shape, dtype, fill)
    }

    fn build(config: &TensorConfig, shape: Shape, dtype: DType, fill: FillMode) -> Result<Tensor> {
        config.validate()?;
        if let FillMode::Value(v) = fill {
            if v.dtype() != dtype {
                return Err(TensorError::DTypeMismatch {
                    expected: dtype,
                    got: v.dtype(),
                });
            }
        }

        let nbytes = shape.checked_nbytes(dtype)?;
        let align = config.alignment.max(dtype.alignment());
        let limit = config.max_alloc_bytes;

        let storage = match fill {
            FillMode::Zero => Storage::zeroed(nbytes, align, limit)?,
            FillMode::One => {
                Storage::allocate_limited(nbytes, align, limit)?.fill_constant(&dtype.one())?
            }
            FillMode::Value(v) => Storage::allocate_limited(nbytes, align, limit)?.fill_constant(&v)?,
        };

        tracing::debug!(shape = %shape, %dtype, ?fill, nbytes, "created tensor");

        let strides = shape.contiguous_strides();
        Ok(Self {
            storage,
            shape,
            strides,
            offset: 0,
            dtype,
        })
    }

    /// Create a tensor of zeros with the given shape and dtype.
    pub fn zeros(shape: &[usize], dtype: DType) -> Result<Tensor> {
        Self::build(&TensorConfig::default(), Shape::new(shape), dtype, FillMode::Zero)
    }

    /// Create a tensor of ones with the given shape and dtype.
    pub fn ones(shape: &[usize], dtype: DType) -> Result<Tensor> {
        Self::build(&TensorConfig::default(), Shape::new(shape), dtype, FillMode::One)
    }

    /// Create a tensor filled with `value`; the dtype is the value's.
    pub fn full(shape: &[usize], value: impl Into<Scalar>) -> Result<Tensor> {
        let value = value.into();
        Self::build(
            &TensorConfig::default(),
            Shape::new(shape),
            value.dtype(),
            FillMode::Value(value),
        )
    }

    /// Create a 0-dimensional tensor holding `value`.
    pub fn scalar<T: Element>(value: T) -> Result<Tensor> {
        Self::full(&[], value.into_scalar())
    }

    /// Zeros with this tensor's shape and dtype.
    pub fn zeros_like(&self) -> Result<Tensor> {
        Self::zeros(self.shape.dims(), self.dtype)
    }

    /// Ones with this tensor's shape and dtype.
    pub fn ones_like(&self) -> Result<Tensor> {
        Self::ones(self.shape.dims(), self.dtype)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Shape of the tensor.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Dimension sizes.
    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Strides (in elements, not bytes).
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Strides in bytes, as foreign array libraries expect them.
    pub fn byte_strides(&self) -> SmallVec<[isize; 4]> {
        let width = self.dtype.element_size();
        self.strides.iter().map(|&s| (s * width) as isize).collect()
    }

    /// Offset of the first element into storage, in elements.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Logical size in bytes (`numel × element_size`).
    pub fn nbytes(&self) -> usize {
        self.numel() * self.dtype.element_size()
    }

    /// The underlying storage handle.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Address of the first element.
    pub fn data_ptr(&self) -> *const u8 {
        self.storage
            .as_ptr()
            .wrapping_add(self.offset * self.dtype.element_size())
    }

    /// Whether this tensor is contiguous in memory (row-major).
    pub fn is_contiguous(&self) -> bool {
        self.numel() == 0 || self.strides == self.shape.contiguous_strides()
    }

    // =========================================================================
    // Data access
    // =========================================================================

    fn check_dtype<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.dtype {
            return Err(TensorError::DTypeMismatch {
                expected: self.dtype,
                got: T::DTYPE,
            });
        }
        Ok(())
    }

    fn byte_range(&self) -> std::ops::Range<usize> {
        let start = self.offset * self.dtype.element_size();
        start..start + self.nbytes()
    }

    /// Borrow the elements as a typed slice (contiguous tensors only).
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_dtype::<T>()?;
        if !self.is_contiguous() {
            return Err(TensorError::NonContiguous);
        }
        let range = self.byte_range();
        Ok(bytemuck::cast_slice(&self.storage.as_bytes()[range]))
    }

    /// Mutably borrow the elements. Requires a contiguous tensor that is the
    /// only holder of its storage.
    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T]> {
        self.check_dtype::<T>()?;
        if !self.is_contiguous() {
            return Err(TensorError::NonContiguous);
        }
        let range = self.byte_range();
        let bytes = self.storage.as_bytes_mut()?;
        Ok(bytemuck::cast_slice_mut(&mut bytes[range]))
    }

    /// Read one element by multi-dimensional index.
    pub fn get<T: Element>(&self, index: &[usize]) -> Result<T> {
        self.check_dtype::<T>()?;
        let physical = self.physical_index(index)?;
        let width = self.dtype.element_size();
        let bytes = &self.storage.as_bytes()[physical * width..(physical + 1) * width];
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// All elements in logical row-major order, for any layout.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if self.is_contiguous() {
            return Ok(self.as_slice::<T>()?.to_vec());
        }
        self.check_dtype::<T>()?;
        let width = self.dtype.element_size();
        let bytes = self.storage.as_bytes();
        Ok((0..self.numel())
            .map(|i| {
                let p = self.flat_to_physical(i);
                bytemuck::pod_read_unaligned(&bytes[p * width..(p + 1) * width])
            })
            .collect())
    }

    fn physical_index(&self, index: &[usize]) -> Result<usize> {
        let in_bounds = index.len() == self.ndim()
            && index.iter().zip(self.dims()).all(|(&i, &d)| i < d);
        if !in_bounds {
            return Err(TensorError::IndexOutOfBounds {
                index: index.to_vec(),
                shape: self.dims().to_vec(),
            });
        }
        Ok(self.offset
            + index
                .iter()
                .zip(self.strides.iter())
                .map(|(&i, &s)| i * s)
                .sum::<usize>())
    }

    /// Convert a logical flat index to a physical storage index.
    fn flat_to_physical(&self, flat_index: usize) -> usize {
        let mut remaining = flat_index;
        let mut physical = self.offset;
        for (&dim, &stride) in self.dims().iter().zip(self.strides.iter()).rev() {
            physical += (remaining % dim) * stride;
            remaining /= dim;
        }
        physical
    }

    // =========================================================================
    // Comparison
    // =========================================================================

    /// Whether every element equals `value` under the dtype's native
    /// equality (exact for integers, IEEE for floats). True for empty tensors.
    ///
    /// The value must have the tensor's dtype; nothing is converted.
    pub fn all_equal(&self, value: impl Into<Scalar>) -> Result<bool> {
        let value = value.into();
        if value.dtype() != self.dtype {
            return Err(TensorError::DTypeMismatch {
                expected: self.dtype,
                got: value.dtype(),
            });
        }
        match value {
            Scalar::F16(v) => self.all_equal_typed(v),
            Scalar::F32(v) => self.all_equal_typed(v),
            Scalar::F64(v) => self.all_equal_typed(v),
            Scalar::I32(v) => self.all_equal_typed(v),
            Scalar::I64(v) => self.all_equal_typed(v),
        }
    }

    fn all_equal_typed<T: Element>(&self, value: T) -> Result<bool> {
        if self.is_contiguous() {
            return Ok(self.as_slice::<T>()?.iter().all(|&x| x == value));
        }
        Ok(self.to_vec::<T>()?.into_iter().all(|x| x == value))
    }

    fn elements_eq<T: Element>(&self, other: &Tensor) -> bool {
        match (self.to_vec::<T>(), other.to_vec::<T>()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    // =========================================================================
    // In-place fills
    // =========================================================================

    /// Overwrite every element with `value`. The storage address is unchanged.
    ///
    /// Fails with `StorageShared` while views or exported buffers hold the storage.
    pub fn fill_(&mut self, value: impl Into<Scalar>) -> Result<()> {
        let value = value.into();
        if value.dtype() != self.dtype {
            return Err(TensorError::DTypeMismatch {
                expected: self.dtype,
                got: value.dtype(),
            });
        }
        if self.is_contiguous() && self.offset == 0 && self.nbytes() == self.storage.nbytes() {
            return self.storage.fill_constant(&value);
        }

        let width = self.dtype.element_size();
        let positions: Vec<usize> = (0..self.numel()).map(|i| self.flat_to_physical(i)).collect();
        let src = value.to_ne_bytes();
        let bytes = self.storage.as_bytes_mut()?;
        for p in positions {
            bytes[p * width..(p + 1) * width].copy_from_slice(&src);
        }
        Ok(())
    }

    /// Zero every element in place.
    pub fn zero_(&mut self) -> Result<()> {
        self.fill_(self.dtype.zero())
    }

    // =========================================================================
    // Shared writes
    // =========================================================================

    /// Write one element while views or exported buffers still hold the
    /// storage. Every holder observes the new value.
    ///
    /// # Safety
    ///
    /// For the duration of the call nothing else may read or write the
    /// element: no other thread, no foreign consumer of an exported buffer,
    /// and no slice borrowed from `as_slice` on any tensor sharing the
    /// storage.
    pub unsafe fn write_shared<T: Element>(&self, index: &[usize], value: T) -> Result<()> {
        self.check_dtype::<T>()?;
        let physical = self.physical_index(index)?;
        // SAFETY: physical addresses an element inside the storage, which is
        // aligned for T. Exclusive access is the caller's obligation.
        unsafe { self.storage.as_mut_ptr().cast::<T>().add(physical).write(value) };
        Ok(())
    }

    /// Overwrite every element while views or exported buffers still hold
    /// the storage. The storage address is unchanged.
    ///
    /// # Safety
    ///
    /// Same contract as [`Tensor::write_shared`], over every element of
    /// this tensor.
    pub unsafe fn fill_shared(&self, value: impl Into<Scalar>) -> Result<()> {
        let value = value.into();
        if value.dtype() != self.dtype {
            return Err(TensorError::DTypeMismatch {
                expected: self.dtype,
                got: value.dtype(),
            });
        }
        let width = self.dtype.element_size();
        let src = value.to_ne_bytes();
        let base = self.storage.as_mut_ptr();
        for i in 0..self.numel() {
            let p = self.flat_to_physical(i);
            // SAFETY: p is an in-bounds element; see the caller contract.
            unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(p * width), width) };
        }
        Ok(())
    }

    // =========================================================================
    // Shape operations (zero-copy views)
    // =========================================================================

    /// Reshape the tensor (zero-copy; contiguous tensors only).
    pub fn reshape(&self, new_shape: &[isize]) -> Result<Tensor> {
        let resolved =
            self.shape
                .resolve_reshape(new_shape)
                .ok_or_else(|| TensorError::InvalidReshape {
                    numel: self.numel(),
                    shape: new_shape.to_vec(),
                })?;

        if !self.is_contiguous() {
            return Err(TensorError::NonContiguous);
        }
        // An empty tensor can be reshaped to any extent around its zero
        // axis; the strides of that extent must still be addressable.
        resolved.checked_nbytes(self.dtype)?;

        let strides = resolved.contiguous_strides();
        Ok(Tensor {
            storage: self.storage.clone(), // Arc clone — shared data
            shape: resolved,
            strides,
            offset: self.offset,
            dtype: self.dtype,
        })
    }

    /// Reorder dimensions (zero-copy view). `perm[i]` names the source axis
    /// that becomes axis `i`.
    pub fn permute(&self, perm: &[usize]) -> Result<Tensor> {
        let ndim = self.ndim();
        let mut seen: SmallVec<[bool; 4]> = SmallVec::from_elem(false, ndim);
        let valid = perm.len() == ndim
            && perm.iter().all(|&p| p < ndim && !std::mem::replace(&mut seen[p], true));
        if !valid {
            return Err(TensorError::InvalidPermutation {
                perm: perm.to_vec(),
                ndim,
            });
        }

        let dims: SmallVec<[usize; 4]> = perm.iter().map(|&p| self.dims()[p]).collect();
        let strides: Strides = perm.iter().map(|&p| self.strides[p]).collect();
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: Shape::new(&dims),
            strides,
            offset: self.offset,
            dtype: self.dtype,
        })
    }

    /// Broadcast to `dims` (zero-copy view). Stretched axes, including new
    /// leading ones, get stride 0, so every position along them aliases
    /// the same element.
    pub fn broadcast_to(&self, dims: &[usize]) -> Result<Tensor> {
        let target = Shape::new(dims);
        if self.shape.broadcast_with(&target)? != target {
            return Err(TensorError::BroadcastError {
                lhs: self.dims().to_vec(),
                rhs: dims.to_vec(),
            });
        }
        target.checked_nbytes(self.dtype)?;

        let lead = dims.len() - self.ndim();
        let strides: Strides = dims
            .iter()
            .enumerate()
            .map(|(axis, &d)| match axis.checked_sub(lead) {
                Some(src) if self.dims()[src] == d => self.strides[src],
                _ => 0,
            })
            .collect();
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: target,
            strides,
            offset: self.offset,
            dtype: self.dtype,
        })
    }

    /// Return a contiguous copy of this tensor if it isn't already contiguous.
    pub fn contiguous(&self) -> Result<Tensor> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }

        let mut out = Self::zeros(self.dims(), self.dtype)?;
        let width = self.dtype.element_size();
        let src = self.storage.as_bytes();
        let dst = out.storage.as_bytes_mut()?;
        for (i, chunk) in dst.chunks_exact_mut(width).enumerate() {
            let p = self.flat_to_physical(i);
            chunk.copy_from_slice(&src[p * width..(p + 1) * width]);
        }
        Ok(out)
    }

    fn fmt_values(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_vals<T: Element>(t: &Tensor, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match t.to_vec::<T>() {
                Ok(v) => write!(f, "{v:?}"),
                Err(_) => write!(f, "[?]"),
            }
        }
        match self.dtype {
            DType::F16 => write_vals::<f16>(self, f),
            DType::F32 => write_vals::<f32>(self, f),
            DType::F64 => write_vals::<f64>(self, f),
            DType::I32 => write_vals::<i32>(self, f),
            DType::I64 => write_vals::<i64>(self, f),
        }
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        if self.dtype != other.dtype || self.shape != other.shape {
            return false;
        }
        match self.dtype {
            DType::F16 => self.elements_eq::<f16>(other),
            DType::F32 => self.elements_eq::<f32>(other),
            DType::F64 => self.elements_eq::<f64>(other),
            DType::I32 => self.elements_eq::<i32>(other),
            DType::I64 => self.elements_eq::<i64>(other),
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, strides={:?}, contiguous={})",
            self.shape,
            self.dtype,
            self.strides.as_slice(),
            self.is_contiguous(),
        )
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.numel() <= 20 {
            write!(f, "tensor(")?;
            self.fmt_values(f)?;
            write!(f, ", shape={}, dtype={})", self.shape, self.dtype)
        } else {
            write!(f, "tensor(shape={}, dtype={})", self.shape, self.dtype)
        }
    }
}

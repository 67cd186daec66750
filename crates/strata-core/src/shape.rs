use smallvec::SmallVec;
use std::fmt;

use crate::dtype::DType;
use crate::error::TensorError;
use crate::Result;

/// Per-dimension strides, in elements.
pub type Strides = SmallVec<[usize; 4]>;

/// Tensor shape with stack-allocated storage for ≤4 dimensions.
///
/// Most tensors are 1D-4D, so we avoid heap allocation for the common case.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    /// Create a new shape from dimensions.
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// Scalar shape (0 dimensions).
    pub fn scalar() -> Self {
        Self {
            dims: SmallVec::new(),
        }
    }

    /// Validate caller-supplied dimensions for a tensor of `dtype`.
    ///
    /// Fails with `InvalidShape` if any dimension is negative, or if the
    /// total byte size of the tensor would not fit in `isize::MAX`.
    pub fn validate(dims: &[i64], dtype: DType) -> Result<Shape> {
        let invalid = |reason| TensorError::InvalidShape {
            dims: dims.to_vec(),
            reason,
        };

        let mut out: SmallVec<[usize; 4]> = SmallVec::with_capacity(dims.len());
        for &d in dims {
            if d < 0 {
                return Err(invalid("negative dimension"));
            }
            out.push(usize::try_from(d).map_err(|_| invalid("dimension exceeds address space"))?);
        }

        let shape = Shape { dims: out };
        shape.checked_nbytes(dtype)?;
        Ok(shape)
    }

    /// Byte size of a contiguous tensor of this shape, checked against
    /// `isize::MAX`.
    ///
    /// The extent of every non-zero dimension is checked even when another
    /// dimension is zero, so the row-major strides of an empty shape still
    /// fit in the address space.
    pub fn checked_nbytes(&self, dtype: DType) -> Result<usize> {
        let invalid = |reason| TensorError::InvalidShape {
            dims: self
                .dims
                .iter()
                .map(|&d| i64::try_from(d).unwrap_or(i64::MAX))
                .collect(),
            reason,
        };

        let extent = self
            .dims
            .iter()
            .filter(|&&d| d != 0)
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| invalid("array is too big"))?;
        let extent_bytes = dtype
            .storage_bytes(extent)
            .filter(|&n| n <= isize::MAX as usize)
            .ok_or_else(|| invalid("array is too big"))?;

        if self.dims.contains(&0) {
            Ok(0)
        } else {
            Ok(extent_bytes)
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements. A scalar has one; any zero dimension gives zero.
    pub fn numel(&self) -> usize {
        if self.dims.contains(&0) {
            return 0;
        }
        self.dims.iter().product()
    }

    /// Get dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Get size of a specific dimension.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    /// Whether this is a scalar (0-dimensional).
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Whether the shape holds no elements.
    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    /// Compute default strides for a contiguous row-major layout.
    pub fn contiguous_strides(&self) -> Strides {
        let ndim = self.dims.len();
        if ndim == 0 {
            return SmallVec::new();
        }
        let mut strides = SmallVec::from_elem(0usize, ndim);
        strides[ndim - 1] = 1;
        for i in (0..ndim - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Broadcast this shape against `other` under numpy rules: trailing
    /// axes line up, and a size-1 axis stretches to the other side's size.
    pub fn broadcast_with(&self, other: &Shape) -> Result<Shape> {
        let ndim = self.ndim().max(other.ndim());
        // Missing leading axes count as 1.
        let axis = |s: &Shape, i: usize| (i + s.ndim()).checked_sub(ndim).map_or(1, |j| s.dims[j]);

        let dims = (0..ndim)
            .map(|i| match (axis(self, i), axis(other, i)) {
                (a, b) if a == b || b == 1 => Ok(a),
                (1, b) => Ok(b),
                _ => Err(TensorError::BroadcastError {
                    lhs: self.dims.to_vec(),
                    rhs: other.dims.to_vec(),
                }),
            })
            .collect::<Result<SmallVec<[usize; 4]>>>()?;
        Ok(Shape { dims })
    }

    /// Validate and compute a reshape target.
    /// At most one dimension can be -1 (inferred).
    pub fn resolve_reshape(&self, target: &[isize]) -> Option<Shape> {
        let numel = self.numel();
        let mut inferred_idx = None;
        let mut known_product: usize = 1;

        for (i, &d) in target.iter().enumerate() {
            if d == -1 {
                if inferred_idx.is_some() {
                    return None; // multiple -1s
                }
                inferred_idx = Some(i);
            } else if d < 0 {
                return None;
            } else {
                known_product = known_product.checked_mul(d as usize)?;
            }
        }

        let mut result: SmallVec<[usize; 4]> = target
            .iter()
            .map(|&d| if d == -1 { 0 } else { d as usize })
            .collect();

        if let Some(idx) = inferred_idx {
            if known_product == 0 || numel % known_product != 0 {
                return None;
            }
            result[idx] = numel / known_product;
        }

        let result_shape = Shape { dims: result };
        if result_shape.numel() != numel {
            return None;
        }
        Some(result_shape)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        if self.dims.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape {
            dims: SmallVec::from_vec(dims),
        }
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(&dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar() {
        let s = Shape::scalar();
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
        assert!(s.is_scalar());
        assert!(s.contiguous_strides().is_empty());
    }

    #[test]
    fn test_basic_shape() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), 24);
        assert_eq!(s.dim(0), Some(2));
        assert_eq!(s.dim(2), Some(4));
        assert_eq!(s.dim(3), None);
    }

    #[test]
    fn test_zero_dim_is_empty() {
        let s = Shape::new(&[3, 0, 5]);
        assert_eq!(s.numel(), 0);
        assert!(s.is_empty());
        assert_eq!(s.contiguous_strides().as_slice(), &[0, 5, 1]);
    }

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(Shape::new(&[4]).contiguous_strides().as_slice(), &[1]);
        assert_eq!(Shape::new(&[2, 3, 5]).contiguous_strides().as_slice(), &[15, 5, 1]);
        assert_eq!(Shape::new(&[2, 3]).contiguous_strides().as_slice(), &[3, 1]);
    }

    #[test]
    fn test_validate() {
        let s = Shape::validate(&[2, 3], DType::F32).unwrap();
        assert_eq!(s.dims(), &[2, 3]);

        let s = Shape::validate(&[], DType::I64).unwrap();
        assert!(s.is_scalar());

        let s = Shape::validate(&[0, 7], DType::F64).unwrap();
        assert_eq!(s.numel(), 0);
    }

    #[test]
    fn test_validate_negative() {
        let err = Shape::validate(&[-1], DType::F32).unwrap_err();
        assert!(matches!(err, TensorError::InvalidShape { ref dims, .. } if dims == &[-1]));

        assert!(Shape::validate(&[4, -2, 3], DType::I32).is_err());
    }

    #[test]
    fn test_validate_overflow() {
        let huge = i64::MAX;
        assert!(matches!(
            Shape::validate(&[huge, huge], DType::F32),
            Err(TensorError::InvalidShape { .. })
        ));
        // Fits as an element count but not in bytes.
        let n = (isize::MAX as usize / 2) as i64;
        assert!(Shape::validate(&[n], DType::F64).is_err());
        // A zero dimension does not excuse the others: their strides
        // still have to be addressable.
        assert!(Shape::validate(&[0, huge], DType::F64).is_err());
        assert!(Shape::validate(&[huge, huge, 0], DType::F64).is_err());
        assert!(Shape::validate(&[0, huge / 2], DType::F64).is_err());
        assert!(Shape::validate(&[0, 1 << 20, 1 << 20], DType::F64).is_ok());
    }

    #[test]
    fn test_checked_nbytes() {
        assert_eq!(Shape::new(&[2, 3]).checked_nbytes(DType::F32), Ok(24));
        assert_eq!(Shape::scalar().checked_nbytes(DType::I64), Ok(8));
        assert_eq!(Shape::new(&[5, 0]).checked_nbytes(DType::F64), Ok(0));
        assert!(Shape::new(&[usize::MAX, 2]).checked_nbytes(DType::I32).is_err());
        assert!(Shape::new(&[0, usize::MAX, 2]).checked_nbytes(DType::I32).is_err());
    }

    #[test]
    fn test_broadcast() {
        let a = Shape::new(&[3, 1]);
        let b = Shape::new(&[1, 4]);
        assert_eq!(a.broadcast_with(&b).unwrap().dims(), &[3, 4]);

        let a = Shape::new(&[2, 3]);
        assert_eq!(a.broadcast_with(&Shape::scalar()).unwrap().dims(), &[2, 3]);
        assert_eq!(a.broadcast_with(&Shape::new(&[3])).unwrap().dims(), &[2, 3]);
        assert_eq!(
            a.broadcast_with(&Shape::new(&[4, 3])),
            Err(TensorError::BroadcastError {
                lhs: vec![2, 3],
                rhs: vec![4, 3]
            })
        );
        // A size-1 axis stretches to zero as well.
        let e = Shape::new(&[1, 4]).broadcast_with(&Shape::new(&[0, 1])).unwrap();
        assert_eq!(e.dims(), &[0, 4]);
    }

    #[test]
    fn test_reshape() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.resolve_reshape(&[6, 4]).unwrap().dims(), &[6, 4]);
        assert_eq!(s.resolve_reshape(&[-1, 4]).unwrap().dims(), &[6, 4]);
        assert_eq!(s.resolve_reshape(&[2, -1]).unwrap().dims(), &[2, 12]);

        assert!(s.resolve_reshape(&[-1, -1]).is_none());
        assert!(s.resolve_reshape(&[5, 5]).is_none());
        assert!(s.resolve_reshape(&[-2, 12]).is_none());
    }

    #[test]
    fn test_reshape_empty() {
        let s = Shape::new(&[0, 3]);
        assert_eq!(s.resolve_reshape(&[3, 0]).unwrap().dims(), &[3, 0]);
        assert!(s.resolve_reshape(&[0, -1]).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::new(&[2, 3]).to_string(), "(2, 3)");
        assert_eq!(Shape::new(&[4]).to_string(), "(4,)");
        assert_eq!(Shape::scalar().to_string(), "()");
    }

    #[test]
    fn test_from_array() {
        let s: Shape = [2, 3].into();
        assert_eq!(s.dims(), &[2, 3]);

        let s: Shape = vec![1, 2, 3, 4].into();
        assert_eq!(s.numel(), 24);
    }
}

use std::fmt;

use half::f16;
use smallvec::SmallVec;

use crate::dtype::DType;

/// A single typed value, used for fills and scalar comparisons.
///
/// The variant fixes the dtype: a `Scalar::F32` can only fill an `F32`
/// tensor. No implicit conversion happens anywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    F16(f16),
    F32(f32),
    F64(f64),
    I32(i32),
    I64(i64),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::F16(_) => DType::F16,
            Scalar::F32(_) => DType::F32,
            Scalar::F64(_) => DType::F64,
            Scalar::I32(_) => DType::I32,
            Scalar::I64(_) => DType::I64,
        }
    }

    /// Native-endian byte representation, exactly `dtype().element_size()` long.
    pub fn to_ne_bytes(&self) -> SmallVec<[u8; 8]> {
        match self {
            Scalar::F16(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Scalar::F32(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Scalar::F64(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Scalar::I32(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Scalar::I64(v) => SmallVec::from_slice(&v.to_ne_bytes()),
        }
    }

    /// Whether every byte of the representation is zero.
    ///
    /// Note `-0.0` is not all-zero bytes even though it compares equal to `0.0`.
    pub fn is_zero_bits(&self) -> bool {
        self.to_ne_bytes().iter().all(|&b| b == 0)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::F16(v) => write!(f, "{v}"),
            Scalar::F32(v) => write!(f, "{v}"),
            Scalar::F64(v) => write!(f, "{v}"),
            Scalar::I32(v) => write!(f, "{v}"),
            Scalar::I64(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_scalar_from {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl From<$ty> for Scalar {
                fn from(v: $ty) -> Self {
                    Scalar::$variant(v)
                }
            }
        )*
    };
}

impl_scalar_from!(f16 => F16, f32 => F32, f64 => F64, i32 => I32, i64 => I64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_and_width() {
        for s in [Scalar::F16(f16::ONE), Scalar::F32(1.0), Scalar::F64(1.0), Scalar::I32(1), Scalar::I64(1)] {
            assert_eq!(s.to_ne_bytes().len(), s.dtype().element_size());
        }
    }

    #[test]
    fn test_bit_exact_one() {
        assert_eq!(Scalar::F32(1.0).to_ne_bytes().as_slice(), &0x3F80_0000u32.to_ne_bytes());
        assert_eq!(
            Scalar::F64(1.0).to_ne_bytes().as_slice(),
            &0x3FF0_0000_0000_0000u64.to_ne_bytes()
        );
        assert_eq!(Scalar::I32(1).to_ne_bytes().as_slice(), &1i32.to_ne_bytes());
        assert_eq!(Scalar::F16(f16::ONE).to_ne_bytes().as_slice(), &0x3C00u16.to_ne_bytes());
    }

    #[test]
    fn test_zero_bits() {
        assert!(Scalar::F32(0.0).is_zero_bits());
        assert!(Scalar::I64(0).is_zero_bits());
        assert!(!Scalar::F32(-0.0).is_zero_bits());
        assert!(!Scalar::F16(f16::NEG_ZERO).is_zero_bits());
        assert!(!Scalar::I32(1).is_zero_bits());
    }

    #[test]
    fn test_from() {
        assert_eq!(Scalar::from(2.5f32), Scalar::F32(2.5));
        assert_eq!(Scalar::from(7i64).dtype(), DType::I64);
        assert_eq!(format!("{}", Scalar::I32(-3)), "-3");
    }
}

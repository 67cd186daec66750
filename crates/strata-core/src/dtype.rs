use std::fmt;

use half::f16;

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::Result;

/// Element types supported by strata tensors.
///
/// The set is closed: every `match` over `DType` must handle each variant, so
/// adding a dtype is a compile error until the registry, fills and interop
/// codes all know about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 16-bit IEEE 754 half-precision float
    F16,
    /// 32-bit IEEE 754 single-precision float
    F32,
    /// 64-bit IEEE 754 double-precision float
    F64,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
}

/// Static description of a dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DTypeInfo {
    /// Canonical short name (`"f32"`).
    pub name: &'static str,
    /// Size of one element in bytes. Always > 0.
    pub byte_width: usize,
    /// Natural alignment of one element in bytes.
    pub alignment: usize,
    pub is_floating: bool,
    pub is_signed: bool,
    /// PEP 3118 struct format character.
    pub format_code: &'static str,
    /// numpy array-interface kind character (`f`, `i`).
    pub kind: char,
}

static F16_INFO: DTypeInfo = DTypeInfo {
    name: "f16",
    byte_width: 2,
    alignment: std::mem::align_of::<f16>(),
    is_floating: true,
    is_signed: true,
    format_code: "e",
    kind: 'f',
};

static F32_INFO: DTypeInfo = DTypeInfo {
    name: "f32",
    byte_width: 4,
    alignment: std::mem::align_of::<f32>(),
    is_floating: true,
    is_signed: true,
    format_code: "f",
    kind: 'f',
};

static F64_INFO: DTypeInfo = DTypeInfo {
    name: "f64",
    byte_width: 8,
    alignment: std::mem::align_of::<f64>(),
    is_floating: true,
    is_signed: true,
    format_code: "d",
    kind: 'f',
};

static I32_INFO: DTypeInfo = DTypeInfo {
    name: "i32",
    byte_width: 4,
    alignment: std::mem::align_of::<i32>(),
    is_floating: false,
    is_signed: true,
    format_code: "i",
    kind: 'i',
};

static I64_INFO: DTypeInfo = DTypeInfo {
    name: "i64",
    byte_width: 8,
    alignment: std::mem::align_of::<i64>(),
    is_floating: false,
    is_signed: true,
    format_code: "q",
    kind: 'i',
};

#[cfg(target_endian = "little")]
const BYTE_ORDER: char = '<';
#[cfg(target_endian = "big")]
const BYTE_ORDER: char = '>';

impl DType {
    /// Every supported dtype, in registry order.
    pub const ALL: [DType; 5] = [DType::F16, DType::F32, DType::F64, DType::I32, DType::I64];

    /// Registry entry for this dtype.
    pub fn info(&self) -> &'static DTypeInfo {
        match self {
            DType::F16 => &F16_INFO,
            DType::F32 => &F32_INFO,
            DType::F64 => &F64_INFO,
            DType::I32 => &I32_INFO,
            DType::I64 => &I64_INFO,
        }
    }

    /// Resolve a dtype from its name.
    ///
    /// Accepts the short names (`f32`, `i64`, ...) and the numpy-style long
    /// names (`float32`, `int64`, ...). `int` maps to `i32`.
    pub fn from_name(name: &str) -> Result<DType> {
        match name {
            "f16" | "float16" => Ok(DType::F16),
            "f32" | "float32" => Ok(DType::F32),
            "f64" | "float64" => Ok(DType::F64),
            "i32" | "int32" | "int" => Ok(DType::I32),
            "i64" | "int64" => Ok(DType::I64),
            _ => Err(TensorError::UnknownDType(name.to_string())),
        }
    }

    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        self.info().byte_width
    }

    /// Natural alignment of a single element.
    pub fn alignment(&self) -> usize {
        self.info().alignment
    }

    /// Number of bytes needed to store `n` elements, or None on overflow.
    pub fn storage_bytes(&self, n: usize) -> Option<usize> {
        self.element_size().checked_mul(n)
    }

    pub fn is_float(&self) -> bool {
        self.info().is_floating
    }

    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }

    pub fn is_signed(&self) -> bool {
        self.info().is_signed
    }

    /// PEP 3118 format code (`"e"`, `"f"`, `"d"`, `"i"`, `"q"`).
    pub fn format_code(&self) -> &'static str {
        self.info().format_code
    }

    /// numpy `__array_interface__` typestr in native byte order, e.g. `"<f4"`.
    pub fn typestr(&self) -> String {
        format!("{}{}{}", BYTE_ORDER, self.info().kind, self.element_size())
    }

    /// The value `1` in this dtype.
    pub fn one(&self) -> Scalar {
        match self {
            DType::F16 => Scalar::F16(f16::ONE),
            DType::F32 => Scalar::F32(1.0),
            DType::F64 => Scalar::F64(1.0),
            DType::I32 => Scalar::I32(1),
            DType::I64 => Scalar::I64(1),
        }
    }

    /// The value `0` in this dtype.
    pub fn zero(&self) -> Scalar {
        match self {
            DType::F16 => Scalar::F16(f16::ZERO),
            DType::F32 => Scalar::F32(0.0),
            DType::F64 => Scalar::F64(0.0),
            DType::I32 => Scalar::I32(0),
            DType::I64 => Scalar::I64(0),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info().name)
    }
}

impl std::str::FromStr for DType {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self> {
        DType::from_name(s)
    }
}

/// Resolve a dtype name, failing with `UnknownDType` for anything outside the
/// supported set.
pub fn resolve_dtype(name: &str) -> Result<DType> {
    DType::from_name(name)
}

mod sealed {
    pub trait Sealed {}
}

/// Rust element types that map one-to-one onto a [`DType`].
pub trait Element:
    bytemuck::Pod + PartialEq + fmt::Debug + Send + Sync + sealed::Sealed
{
    const DTYPE: DType;
    const ZERO: Self;
    const ONE: Self;

    fn into_scalar(self) -> Scalar;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident, $zero:expr, $one:expr;)*) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;
                const ZERO: Self = $zero;
                const ONE: Self = $one;

                fn into_scalar(self) -> Scalar {
                    Scalar::$dtype(self)
                }
            }
        )*
    };
}

impl_element! {
    f16 => F16, f16::ZERO, f16::ONE;
    f32 => F32, 0.0, 1.0;
    f64 => F64, 0.0, 1.0;
    i32 => I32, 0, 1;
    i64 => I64, 0, 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(DType::F16.element_size(), 2);
        assert_eq!(DType::F32.element_size(), 4);
        assert_eq!(DType::F64.element_size(), 8);
        assert_eq!(DType::I32.element_size(), 4);
        assert_eq!(DType::I64.element_size(), 8);
        for dt in DType::ALL {
            assert!(dt.element_size() > 0);
            assert!(dt.alignment() <= dt.element_size());
        }
    }

    #[test]
    fn test_storage_bytes() {
        assert_eq!(DType::F32.storage_bytes(10), Some(40));
        assert_eq!(DType::I64.storage_bytes(0), Some(0));
        assert_eq!(DType::F64.storage_bytes(usize::MAX), None);
    }

    #[test]
    fn test_resolve() {
        assert_eq!(resolve_dtype("f32").unwrap(), DType::F32);
        assert_eq!(resolve_dtype("float16").unwrap(), DType::F16);
        assert_eq!(resolve_dtype("float64").unwrap(), DType::F64);
        assert_eq!(resolve_dtype("int").unwrap(), DType::I32);
        assert_eq!(resolve_dtype("int64").unwrap(), DType::I64);
        assert_eq!("i32".parse::<DType>().unwrap(), DType::I32);
    }

    #[test]
    fn test_resolve_unknown() {
        assert_eq!(
            resolve_dtype("bogus"),
            Err(TensorError::UnknownDType("bogus".into()))
        );
        // Names are case-sensitive.
        assert!(resolve_dtype("F32").is_err());
        assert!(resolve_dtype("").is_err());
    }

    #[test]
    fn test_dtype_categories() {
        assert!(DType::F32.is_float());
        assert!(!DType::F32.is_integer());
        assert!(DType::I64.is_integer());
        assert!(DType::I32.is_signed());
        assert!(DType::F16.is_float());
    }

    #[test]
    fn test_interop_codes() {
        assert_eq!(DType::F16.format_code(), "e");
        assert_eq!(DType::F32.format_code(), "f");
        assert_eq!(DType::F64.format_code(), "d");
        assert_eq!(DType::I32.format_code(), "i");
        assert_eq!(DType::I64.format_code(), "q");
        if cfg!(target_endian = "little") {
            assert_eq!(DType::F16.typestr(), "<f2");
            assert_eq!(DType::F32.typestr(), "<f4");
            assert_eq!(DType::I64.typestr(), "<i8");
        }
    }

    #[test]
    fn test_element_mapping() {
        assert_eq!(<f32 as Element>::DTYPE, DType::F32);
        assert_eq!(<i64 as Element>::DTYPE, DType::I64);
        assert_eq!(<f16 as Element>::DTYPE, DType::F16);
        // 1.0 in binary16 is 0x3C00.
        assert_eq!(DType::F16.one(), Scalar::F16(f16::from_bits(0x3C00)));
        assert_eq!(DType::I32.one(), Scalar::I32(1));
        assert_eq!(DType::F64.zero(), 0.0f64.into_scalar());
    }

    #[test]
    fn test_display() {
        for dt in DType::ALL {
            assert_eq!(DType::from_name(&dt.to_string()).unwrap(), dt);
        }
    }
}

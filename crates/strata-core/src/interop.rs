//! Zero-copy export of tensor memory to foreign array libraries.
//!
//! A [`BufferView`] carries everything a numpy-style consumer needs to wrap
//! the storage without copying: format code, item size, shape, byte strides
//! and a data pointer. It also holds a storage handle, so the pointer stays
//! valid for as long as the view is alive, even if the tensor is dropped.

use smallvec::SmallVec;

use crate::dtype::{DType, Element};
use crate::error::TensorError;
use crate::storage::Storage;
use crate::tensor::Tensor;
use crate::Result;

/// Descriptor of a tensor's memory for foreign consumers.
#[derive(Debug, Clone)]
pub struct BufferView {
    dtype: DType,
    shape: SmallVec<[usize; 4]>,
    /// Strides in bytes.
    strides: SmallVec<[isize; 4]>,
    data: *mut u8,
    readonly: bool,
    // Lifetime token: keeps the region behind `data` allocated.
    owner: Storage,
}

// SAFETY: `data` points into `owner`, which is Send + Sync. BufferView never
// dereferences it mutably; foreign writes are the consumer's contract.
unsafe impl Send for BufferView {}
unsafe impl Sync for BufferView {}

/// Export a writable view over `tensor`'s storage.
pub fn export_view(tensor: &Tensor) -> BufferView {
    BufferView::new(tensor, false)
}

/// Export a view that consumers must treat as read-only.
pub fn export_view_readonly(tensor: &Tensor) -> BufferView {
    BufferView::new(tensor, true)
}

impl BufferView {
    fn new(tensor: &Tensor, readonly: bool) -> Self {
        let owner = tensor.storage().clone();
        let data = owner
            .as_mut_ptr()
            .wrapping_add(tensor.offset() * tensor.dtype().element_size());
        tracing::trace!(
            shape = %tensor.shape(),
            dtype = %tensor.dtype(),
            readonly,
            refs = owner.ref_count(),
            "exported buffer view"
        );
        Self {
            dtype: tensor.dtype(),
            shape: SmallVec::from_slice(tensor.dims()),
            strides: tensor.byte_strides(),
            data,
            readonly,
            owner,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// PEP 3118 format code.
    pub fn format(&self) -> &'static str {
        self.dtype.format_code()
    }

    /// numpy array-interface typestr, e.g. `"<f4"`.
    pub fn typestr(&self) -> String {
        self.dtype.typestr()
    }

    /// Bytes per element.
    pub fn item_size(&self) -> usize {
        self.dtype.element_size()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Strides in bytes.
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Pointer to the first element.
    ///
    /// Valid while this view is alive. Writes through it are visible to the
    /// tensor and every other view of the same storage.
    pub fn data_ptr(&self) -> *mut u8 {
        self.data
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logical size in bytes.
    pub fn nbytes(&self) -> usize {
        self.len() * self.item_size()
    }

    /// Whether the byte strides describe a packed row-major layout.
    pub fn is_c_contiguous(&self) -> bool {
        if self.is_empty() {
            return true;
        }
        let mut expected = self.item_size() as isize;
        for (&dim, &stride) in self.shape.iter().zip(self.strides.iter()).rev() {
            if dim != 1 && stride != expected {
                return false;
            }
            expected *= dim as isize;
        }
        true
    }

    /// Read one element through the descriptor, the way a foreign consumer
    /// would: base pointer plus `Σ index[i] × stride[i]` bytes.
    pub fn read<T: Element>(&self, index: &[usize]) -> Result<T> {
        if T::DTYPE != self.dtype {
            return Err(TensorError::DTypeMismatch {
                expected: self.dtype,
                got: T::DTYPE,
            });
        }
        let in_bounds = index.len() == self.ndim()
            && index.iter().zip(self.shape.iter()).all(|(&i, &d)| i < d);
        if !in_bounds {
            return Err(TensorError::IndexOutOfBounds {
                index: index.to_vec(),
                shape: self.shape.to_vec(),
            });
        }
        let byte_offset: isize = index
            .iter()
            .zip(self.strides.iter())
            .map(|(&i, &s)| i as isize * s)
            .sum();
        // SAFETY: the index is in bounds, so the offset lands inside the
        // region kept alive by `owner`.
        Ok(unsafe { self.data.offset(byte_offset).cast::<T>().read_unaligned() })
    }

    /// The storage this view keeps alive.
    pub fn owner(&self) -> &Storage {
        &self.owner
    }
}

impl Tensor {
    /// Export a writable zero-copy view. See [`export_view`].
    pub fn export_view(&self) -> BufferView {
        export_view(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_fields() {
        let t = Tensor::zeros(&[2, 3], DType::F32).unwrap();
        let v = export_view(&t);
        assert_eq!(v.format(), "f");
        assert_eq!(v.item_size(), 4);
        assert_eq!(v.shape(), &[2, 3]);
        assert_eq!(v.strides(), &[12, 4]);
        assert_eq!(v.data_ptr() as *const u8, t.data_ptr());
        assert!(!v.readonly());
        assert!(v.is_c_contiguous());
        assert_eq!(v.nbytes(), 24);
    }

    #[test]
    fn test_readonly() {
        let t = Tensor::ones(&[3], DType::I64).unwrap();
        let v = export_view_readonly(&t);
        assert!(v.readonly());
        assert_eq!(v.format(), "q");
        assert_eq!(v.read::<i64>(&[2]).unwrap(), 1);
    }

    #[test]
    fn test_view_keeps_storage_alive() {
        let t = Tensor::ones(&[2, 2], DType::F64).unwrap();
        let v = t.export_view();
        assert_eq!(t.storage().ref_count(), 2);
        drop(t);
        assert_eq!(v.owner().ref_count(), 1);
        assert_eq!(v.read::<f64>(&[1, 1]).unwrap(), 1.0);
    }

    #[test]
    fn test_permuted_export() {
        let t = Tensor::zeros(&[2, 3], DType::I32).unwrap();
        let p = t.permute(&[1, 0]).unwrap();
        let v = export_view(&p);
        assert_eq!(v.shape(), &[3, 2]);
        assert_eq!(v.strides(), &[4, 12]);
        assert!(!v.is_c_contiguous());
    }

    #[test]
    fn test_read_checks() {
        let t = Tensor::zeros(&[2], DType::F32).unwrap();
        let v = export_view(&t);
        assert!(matches!(v.read::<i32>(&[0]), Err(TensorError::DTypeMismatch { .. })));
        assert!(matches!(v.read::<f32>(&[2]), Err(TensorError::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_scalar_and_empty() {
        let s = Tensor::scalar(2.5f32).unwrap();
        let v = export_view(&s);
        assert_eq!(v.ndim(), 0);
        assert!(v.strides().is_empty());
        assert_eq!(v.read::<f32>(&[]).unwrap(), 2.5);

        let e = Tensor::zeros(&[0, 4], DType::F32).unwrap();
        let v = export_view(&e);
        assert!(v.is_empty());
        assert!(!v.data_ptr().is_null());
        assert!(v.is_c_contiguous());
    }
}

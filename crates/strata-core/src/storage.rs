use std::alloc::{self, Layout};
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::dtype::Element;
use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::Result;

/// An owned, aligned heap region.
///
/// Zero-byte regions never reach the platform allocator; they hold a
/// dangling pointer that is still aligned to `align`.
struct RawBuffer {
    ptr: NonNull<u8>,
    nbytes: usize,
    align: usize,
}

// SAFETY: RawBuffer uniquely owns its allocation, like Vec<u8>. Shared access
// only hands out `&[u8]`; mutation goes through `&mut` (see Storage).
unsafe impl Send for RawBuffer {}
unsafe impl Sync for RawBuffer {}

impl RawBuffer {
    fn layout(nbytes: usize, align: usize) -> Result<Layout> {
        if !align.is_power_of_two() {
            return Err(TensorError::InvalidAlignment(align));
        }
        Layout::from_size_align(nbytes, align)
            .map_err(|_| TensorError::OutOfMemory { nbytes, align })
    }

    fn new(nbytes: usize, align: usize, limit: Option<usize>, zeroed: bool) -> Result<Self> {
        let layout = Self::layout(nbytes, align)?;

        if let Some(limit) = limit {
            if nbytes > limit {
                tracing::warn!(nbytes, limit, "allocation rejected: exceeds max_alloc_bytes");
                return Err(TensorError::OutOfMemory { nbytes, align });
            }
        }

        if nbytes == 0 {
            let dangling = ptr::without_provenance_mut::<u8>(align);
            // align is a non-zero power of two, so the pointer is non-null.
            let ptr = NonNull::new(dangling).ok_or(TensorError::InvalidAlignment(align))?;
            return Ok(Self { ptr, nbytes, align });
        }

        // SAFETY: layout has non-zero size.
        let raw = unsafe {
            if zeroed {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            tracing::warn!(nbytes, align, "platform allocator returned null");
            TensorError::OutOfMemory { nbytes, align }
        })?;
        tracing::trace!(nbytes, align, zeroed, "allocated storage");
        Ok(Self { ptr, nbytes, align })
    }

    fn write_zeros(&mut self) {
        // SAFETY: ptr is valid for nbytes writes (or nbytes is 0).
        unsafe { ptr::write_bytes(self.ptr.as_ptr(), 0, self.nbytes) };
    }

    fn write_constant(&mut self, value: &Scalar) -> Result<()> {
        let width = value.dtype().element_size();
        let align = value.dtype().alignment();
        if self.align < align {
            return Err(TensorError::InvalidAlignment(self.align));
        }
        if self.nbytes % width != 0 {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.nbytes / width * width],
                got: vec![self.nbytes],
            });
        }
        if value.is_zero_bits() {
            self.write_zeros();
            return Ok(());
        }
        match *value {
            Scalar::F16(v) => self.write_typed(v),
            Scalar::F32(v) => self.write_typed(v),
            Scalar::F64(v) => self.write_typed(v),
            Scalar::I32(v) => self.write_typed(v),
            Scalar::I64(v) => self.write_typed(v),
        }
        Ok(())
    }

    fn write_typed<T: Element>(&mut self, value: T) {
        let n = self.nbytes / std::mem::size_of::<T>();
        // SAFETY: the region is valid for nbytes, aligned for T (checked by
        // write_constant), and uniquely borrowed. MaybeUninit tolerates
        // uninitialized contents.
        let slots = unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<MaybeUninit<T>>(), n)
        };
        slots.fill(MaybeUninit::new(value));
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        if self.nbytes == 0 {
            return;
        }
        // SAFETY: allocated in RawBuffer::new with this exact layout.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.nbytes, self.align);
            alloc::dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

/// A freshly allocated, not yet initialized region.
///
/// The bytes cannot be observed until a fill turns this into a [`Storage`].
/// Dropping it releases the memory.
pub struct RawAlloc {
    buf: RawBuffer,
}

impl RawAlloc {
    pub fn nbytes(&self) -> usize {
        self.buf.nbytes
    }

    /// Set every byte to zero.
    pub fn zero_fill(mut self) -> Storage {
        self.buf.write_zeros();
        Storage::from_raw(self.buf)
    }

    /// Write `value` into every element slot, bit-exact.
    ///
    /// On error the allocation is released and nothing is returned.
    pub fn fill_constant(mut self, value: &Scalar) -> Result<Storage> {
        self.buf.write_constant(value)?;
        Ok(Storage::from_raw(self.buf))
    }
}

/// Shared, reference-counted tensor storage.
///
/// Tensors that view the same data (reshape, permute) and exported buffer
/// views all hold a handle. The region is freed when the last one drops.
/// The address never changes for the lifetime of the storage.
#[derive(Clone)]
pub struct Storage {
    buf: Arc<RawBuffer>,
}

impl Storage {
    fn from_raw(buf: RawBuffer) -> Self {
        Self { buf: Arc::new(buf) }
    }

    /// Reserve `nbytes` with the given alignment. Contents are uninitialized.
    pub fn allocate(nbytes: usize, alignment: usize) -> Result<RawAlloc> {
        Self::allocate_limited(nbytes, alignment, None)
    }

    /// Like [`Storage::allocate`], failing with `OutOfMemory` above `limit`.
    pub fn allocate_limited(
        nbytes: usize,
        alignment: usize,
        limit: Option<usize>,
    ) -> Result<RawAlloc> {
        Ok(RawAlloc {
            buf: RawBuffer::new(nbytes, alignment, limit, false)?,
        })
    }

    /// Allocate already-zeroed memory, letting the platform hand back
    /// pre-zeroed pages where it can.
    pub fn zeroed(nbytes: usize, alignment: usize, limit: Option<usize>) -> Result<Self> {
        Ok(Self::from_raw(RawBuffer::new(nbytes, alignment, limit, true)?))
    }

    /// Size in bytes.
    pub fn nbytes(&self) -> usize {
        self.buf.nbytes
    }

    pub fn alignment(&self) -> usize {
        self.buf.align
    }

    /// Base address of the region.
    pub fn as_ptr(&self) -> *const u8 {
        self.buf.ptr.as_ptr()
    }

    /// Mutable base address, for handing to foreign consumers.
    ///
    /// Writing through it while a Rust borrow of the bytes is alive is
    /// undefined behaviour; the caller owns that contract.
    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.buf.ptr.as_ptr()
    }

    /// Get a read-only reference to the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: every Storage is fully initialized by construction.
        unsafe { std::slice::from_raw_parts(self.buf.ptr.as_ptr(), self.buf.nbytes) }
    }

    /// Get a mutable reference to the raw bytes.
    ///
    /// Fails with `StorageShared` when other tensors or exported views hold
    /// this storage. Never copies: the address stays stable.
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8]> {
        let count = Arc::strong_count(&self.buf);
        let buf = Arc::get_mut(&mut self.buf).ok_or(TensorError::StorageShared(count))?;
        // SAFETY: unique access to an initialized region.
        Ok(unsafe { std::slice::from_raw_parts_mut(buf.ptr.as_ptr(), buf.nbytes) })
    }

    /// Zero every byte in place. Requires exclusive ownership.
    pub fn zero_fill(&mut self) -> Result<()> {
        self.unique_buf()?.write_zeros();
        Ok(())
    }

    /// Write `value` into every element slot in place. Requires exclusive ownership.
    pub fn fill_constant(&mut self, value: &Scalar) -> Result<()> {
        self.unique_buf()?.write_constant(value)
    }

    fn unique_buf(&mut self) -> Result<&mut RawBuffer> {
        let count = Arc::strong_count(&self.buf);
        Arc::get_mut(&mut self.buf).ok_or(TensorError::StorageShared(count))
    }

    /// Whether this storage is uniquely owned (no other handles).
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.buf) == 1
    }

    /// Number of live handles (tensors and exported views).
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.buf)
    }

    /// Whether two handles refer to the same region.
    pub fn same_region(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.buf, &other.buf)
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("ptr", &self.as_ptr())
            .field("nbytes", &self.nbytes())
            .field("align", &self.alignment())
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed() {
        let s = Storage::zeroed(40, 64, None).unwrap();
        assert_eq!(s.nbytes(), 40);
        assert_eq!(s.as_ptr() as usize % 64, 0);
        assert!(s.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_then_zero_fill() {
        let raw = Storage::allocate(100, 32).unwrap();
        assert_eq!(raw.nbytes(), 100);
        let s = raw.zero_fill();
        assert_eq!(s.as_ptr() as usize % 32, 0);
        assert!(s.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fill_constant_f32() {
        let s = Storage::allocate(16, 64)
            .unwrap()
            .fill_constant(&Scalar::F32(1.0))
            .unwrap();
        let vals: &[f32] = bytemuck::cast_slice(s.as_bytes());
        assert_eq!(vals, &[1.0, 1.0, 1.0, 1.0]);
        assert!(vals.iter().all(|v| v.to_bits() == 0x3F80_0000));
    }

    #[test]
    fn test_fill_constant_f16() {
        let s = Storage::allocate(6, 2)
            .unwrap()
            .fill_constant(&Scalar::F16(half::f16::ONE))
            .unwrap();
        let bits: &[u16] = bytemuck::cast_slice(s.as_bytes());
        assert_eq!(bits, &[0x3C00; 3]);
    }

    #[test]
    fn test_fill_constant_i64() {
        let s = Storage::allocate(24, 8)
            .unwrap()
            .fill_constant(&Scalar::I64(-7))
            .unwrap();
        let vals: &[i64] = bytemuck::cast_slice(s.as_bytes());
        assert_eq!(vals, &[-7, -7, -7]);
    }

    #[test]
    fn test_fill_constant_width_mismatch() {
        let raw = Storage::allocate(6, 8).unwrap();
        assert!(raw.fill_constant(&Scalar::I32(1)).is_err());
    }

    #[test]
    fn test_fill_constant_underaligned() {
        let raw = Storage::allocate(8, 2).unwrap();
        assert_eq!(
            raw.fill_constant(&Scalar::F64(1.0)).err(),
            Some(TensorError::InvalidAlignment(2))
        );
    }

    #[test]
    fn test_zero_bytes() {
        let s = Storage::allocate(0, 64).unwrap().zero_fill();
        assert_eq!(s.nbytes(), 0);
        assert!(s.as_bytes().is_empty());
        assert!(!s.as_ptr().is_null());
        assert_eq!(s.as_ptr() as usize % 64, 0);

        let s = Storage::zeroed(0, 16, Some(0)).unwrap();
        assert!(s.as_bytes().is_empty());

        // Dangling but aligned for any power-of-two alignment; never freed.
        let s = Storage::zeroed(0, 4096, None).unwrap();
        assert_eq!(s.as_ptr() as usize, 4096);
        drop(s);
    }

    #[test]
    fn test_bad_alignment() {
        assert_eq!(
            Storage::allocate(8, 3).err().map(|e| e.to_string()),
            Some(TensorError::InvalidAlignment(3).to_string())
        );
    }

    #[test]
    fn test_limit() {
        let err = Storage::allocate_limited(4096, 64, Some(1024)).err();
        assert_eq!(err, Some(TensorError::OutOfMemory { nbytes: 4096, align: 64 }));
        assert!(Storage::zeroed(1024, 64, Some(1024)).is_ok());
    }

    #[test]
    fn test_layout_overflow_is_oom() {
        let err = Storage::allocate(usize::MAX - 8, 64).err();
        assert!(matches!(err, Some(TensorError::OutOfMemory { .. })));
    }

    #[test]
    fn test_in_place_requires_unique() {
        let mut s = Storage::zeroed(8, 8, None).unwrap();
        s.fill_constant(&Scalar::I32(1)).unwrap();
        assert_eq!(bytemuck::cast_slice::<u8, i32>(s.as_bytes()), &[1, 1]);

        let other = s.clone();
        assert!(!s.is_unique());
        assert_eq!(s.ref_count(), 2);
        assert!(s.same_region(&other));
        assert_eq!(s.zero_fill(), Err(TensorError::StorageShared(2)));
        assert!(s.as_bytes_mut().is_err());

        drop(other);
        let before = s.as_ptr();
        s.zero_fill().unwrap();
        assert_eq!(s.as_ptr(), before);
        assert!(s.as_bytes().iter().all(|&b| b == 0));
    }
}

//! Reference-counted byte storage and the scalar element traits read out of it.
//!
//! A [`StorageBuffer`] is the unit of ownership shared between an array and every view
//! sliced from it. The bytes come from one of three places: an engine allocation, a
//! kernel-produced `Vec<T>` adopted without copying, or a foreign framework that keeps
//! ownership and hands over a release callback instead.

use std::alloc::{self, Layout};
use std::any::Any;
use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use half::f16;
use num_complex::{Complex, Complex32, Complex64};

use super::device::Device;
use super::dtype::DataType;
use super::shape;
use crate::env;
use crate::error::{ArrayError, ArrayResult};

/// Alignment of engine-allocated buffers.
pub const BUFFER_ALIGN: usize = 64;

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Rejects allocations larger than `SPECTRA_MAX_ALLOC_BYTES`, when that cap is set.
pub(crate) fn check_allocation(len: usize) -> ArrayResult<()> {
    if let Some(limit) = env::max_alloc_bytes() {
        if len > limit {
            return Err(ArrayError::value(format!(
                "allocation of {len} bytes exceeds SPECTRA_MAX_ALLOC_BYTES={limit}"
            )));
        }
    }
    Ok(())
}

/// Byte size of a contiguous `shape` of `dtype`, checked for overflow and against the cap.
///
/// Kernels call this before building an output so an oversized result fails up front.
pub(crate) fn output_bytes(shape: &[i64], dtype: DataType) -> ArrayResult<usize> {
    let len = shape::byte_size(shape, dtype.size_in_bytes())?;
    check_allocation(len)?;
    Ok(len)
}

enum Allocation {
    Allocated { layout: Layout },
    Adopted { _owner: Box<dyn Any + Send + Sync> },
    Foreign { release: Mutex<Option<ReleaseFn>> },
    Empty,
}

struct BufferInner {
    ptr: NonNull<u8>,
    len: usize,
    device: Device,
    allocation: Allocation,
}

// The pointer is either owned by this struct or kept alive by the foreign owner until the
// release callback runs; shared access never hands out references to the bytes.
unsafe impl Send for BufferInner {}
unsafe impl Sync for BufferInner {}

impl Drop for BufferInner {
    fn drop(&mut self) {
        match &mut self.allocation {
            Allocation::Allocated { layout } => unsafe {
                alloc::dealloc(self.ptr.as_ptr(), *layout);
            },
            Allocation::Foreign { release } => {
                let callback = match release.get_mut() {
                    Ok(slot) => slot.take(),
                    Err(poisoned) => poisoned.into_inner().take(),
                };
                if let Some(callback) = callback {
                    log::trace!(
                        "releasing foreign buffer of {} bytes on {}",
                        self.len,
                        self.device
                    );
                    callback();
                }
            }
            Allocation::Adopted { .. } | Allocation::Empty => {}
        }
    }
}

/// Shared handle to a block of bytes living on a [`Device`].
#[derive(Clone)]
pub struct StorageBuffer {
    inner: Arc<BufferInner>,
}

impl StorageBuffer {
    /// Allocates `len` bytes on the CPU, zero-filled unless `SPECTRA_ZERO_INIT` is off.
    ///
    /// With zero-fill disabled the contents are uninitialised and must be written through
    /// the raw pointer before anything reads them.
    pub fn allocate(len: usize) -> ArrayResult<Self> {
        Self::allocate_with(len, env::zero_init_enabled())
    }

    /// Allocates `len` zero-filled bytes on the CPU regardless of configuration.
    pub fn allocate_zeroed(len: usize) -> ArrayResult<Self> {
        Self::allocate_with(len, true)
    }

    fn allocate_with(len: usize, zeroed: bool) -> ArrayResult<Self> {
        check_allocation(len)?;
        if len == 0 {
            return Ok(Self::empty(Device::CPU));
        }
        let layout = Layout::from_size_align(len, BUFFER_ALIGN)
            .map_err(|_| ArrayError::value(format!("allocation of {len} bytes is too large")))?;
        let raw = unsafe {
            if zeroed {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            ArrayError::value(format!("host allocator refused {len} bytes"))
        })?;
        log::trace!("allocated {len} bytes (zeroed={zeroed})");
        Ok(StorageBuffer {
            inner: Arc::new(BufferInner {
                ptr,
                len,
                device: Device::CPU,
                allocation: Allocation::Allocated { layout },
            }),
        })
    }

    /// Takes ownership of a typed vector without copying its payload.
    pub fn from_vec<T: Element>(mut data: Vec<T>) -> Self {
        let len = data.len() * size_of::<T>();
        let ptr = NonNull::new(data.as_mut_ptr() as *mut u8).unwrap_or(NonNull::dangling());
        StorageBuffer {
            inner: Arc::new(BufferInner {
                ptr,
                len,
                device: Device::CPU,
                allocation: Allocation::Adopted {
                    _owner: Box::new(data),
                },
            }),
        }
    }

    /// Wraps externally owned bytes. `release` runs exactly once, when the last handle drops.
    ///
    /// # Safety
    /// `ptr` must stay valid for `len` bytes until `release` is invoked.
    pub unsafe fn from_foreign(
        ptr: *mut u8,
        len: usize,
        device: Device,
        release: impl FnOnce() + Send + 'static,
    ) -> ArrayResult<Self> {
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None if len == 0 => NonNull::dangling(),
            None => {
                release();
                return Err(ArrayError::type_error(
                    "foreign buffer has a null data pointer",
                ));
            }
        };
        Ok(StorageBuffer {
            inner: Arc::new(BufferInner {
                ptr,
                len,
                device,
                allocation: Allocation::Foreign {
                    release: Mutex::new(Some(Box::new(release))),
                },
            }),
        })
    }

    fn empty(device: Device) -> Self {
        StorageBuffer {
            inner: Arc::new(BufferInner {
                ptr: NonNull::dangling(),
                len: 0,
                device,
                allocation: Allocation::Empty,
            }),
        }
    }

    /// Total size in bytes.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Device the bytes live on.
    pub fn device(&self) -> Device {
        self.inner.device
    }

    /// Whether the bytes belong to another framework.
    pub fn is_foreign(&self) -> bool {
        matches!(self.inner.allocation, Allocation::Foreign { .. })
    }

    /// Start of the byte range.
    pub fn as_ptr(&self) -> *const u8 {
        self.inner.ptr.as_ptr()
    }

    /// Start of the byte range for writing; callers keep writes in bounds.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.ptr.as_ptr()
    }

    /// Number of live handles sharing these bytes.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether both handles share the same allocation.
    pub fn ptr_eq(a: &StorageBuffer, b: &StorageBuffer) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for StorageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBuffer")
            .field("len", &self.inner.len)
            .field("device", &self.inner.device)
            .field("foreign", &self.is_foreign())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Trait describing a scalar type that can be read from and written into a buffer.
///
/// Integer arithmetic wraps on overflow; division reports a zero divisor through `None`.
pub trait Element: Copy + Default + Send + Sync + fmt::Debug + 'static {
    /// Dtype this Rust type encodes.
    const DTYPE: DataType;

    /// Whether values of `dtype` may be viewed as `Self`. Bool arrays are readable as `u8`.
    fn accepts(dtype: DataType) -> bool {
        dtype == Self::DTYPE || (Self::DTYPE == DataType::UINT8 && dtype == DataType::BOOL)
    }

    fn zero() -> Self;
    fn one() -> Self;
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn checked_div(self, rhs: Self) -> Option<Self>;
}

/// Ordered real-valued elements with a lossy `f64` bridge used by statistics and casts.
pub trait RealElement: Element + PartialOrd {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
    /// Exact for every integer that fits `Self`.
    fn from_i128(value: i128) -> Self;
}

/// Complex elements bridged through double precision.
pub trait ComplexElement: Element {
    fn to_c64(self) -> Complex64;
    fn from_c64(value: Complex64) -> Self;
}

macro_rules! impl_int_element {
    ($($ty:ty => $dtype:expr),* $(,)?) => {$(
        impl Element for $ty {
            const DTYPE: DataType = $dtype;

            fn zero() -> Self {
                0
            }

            fn one() -> Self {
                1
            }

            fn add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }

            fn sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }

            fn mul(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }

            fn checked_div(self, rhs: Self) -> Option<Self> {
                if rhs == 0 {
                    None
                } else {
                    Some(self.wrapping_div(rhs))
                }
            }
        }

        impl RealElement for $ty {
            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn from_i128(value: i128) -> Self {
                value as $ty
            }
        }
    )*};
}

impl_int_element!(
    i8 => DataType::INT8,
    i16 => DataType::INT16,
    i32 => DataType::INT32,
    i64 => DataType::INT64,
    u8 => DataType::UINT8,
    u16 => DataType::UINT16,
    u32 => DataType::UINT32,
    u64 => DataType::UINT64,
);

macro_rules! impl_float_element {
    ($($ty:ty => $dtype:expr),* $(,)?) => {$(
        impl Element for $ty {
            const DTYPE: DataType = $dtype;

            fn zero() -> Self {
                0.0
            }

            fn one() -> Self {
                1.0
            }

            fn add(self, rhs: Self) -> Self {
                self + rhs
            }

            fn sub(self, rhs: Self) -> Self {
                self - rhs
            }

            fn mul(self, rhs: Self) -> Self {
                self * rhs
            }

            fn checked_div(self, rhs: Self) -> Option<Self> {
                Some(self / rhs)
            }
        }

        impl RealElement for $ty {
            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn from_i128(value: i128) -> Self {
                value as $ty
            }
        }
    )*};
}

impl_float_element!(f32 => DataType::FLOAT32, f64 => DataType::FLOAT64);

impl Element for f16 {
    const DTYPE: DataType = DataType::FLOAT16;

    fn zero() -> Self {
        f16::ZERO
    }

    fn one() -> Self {
        f16::ONE
    }

    fn add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn sub(self, rhs: Self) -> Self {
        self - rhs
    }

    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }

    fn checked_div(self, rhs: Self) -> Option<Self> {
        Some(self / rhs)
    }
}

impl RealElement for f16 {
    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }

    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }

    fn from_i128(value: i128) -> Self {
        f16::from_f64(value as f64)
    }
}

macro_rules! impl_complex_element {
    ($($ty:ty => ($part:ty, $dtype:expr)),* $(,)?) => {$(
        impl Element for $ty {
            const DTYPE: DataType = $dtype;

            fn zero() -> Self {
                Complex::new(0.0, 0.0)
            }

            fn one() -> Self {
                Complex::new(1.0, 0.0)
            }

            fn add(self, rhs: Self) -> Self {
                self + rhs
            }

            fn sub(self, rhs: Self) -> Self {
                self - rhs
            }

            fn mul(self, rhs: Self) -> Self {
                self * rhs
            }

            fn checked_div(self, rhs: Self) -> Option<Self> {
                Some(self / rhs)
            }
        }

        impl ComplexElement for $ty {
            fn to_c64(self) -> Complex64 {
                Complex64::new(self.re as f64, self.im as f64)
            }

            fn from_c64(value: Complex64) -> Self {
                Complex::new(value.re as $part, value.im as $part)
            }
        }
    )*};
}

impl_complex_element!(
    Complex32 => (f32, DataType::COMPLEX64),
    Complex64 => (f64, DataType::COMPLEX128),
);

//! The strided array value type shared by every engine operation.

use std::fmt;
use std::mem::size_of;
use std::ptr;

use num_complex::Complex64;
use smallvec::SmallVec;

use super::device::Device;
use super::dtype::{DataType, DataTypeCode};
use super::shape::{self, Dims, StridedOffsets};
use super::storage::{output_bytes, ComplexElement, Element, RealElement, StorageBuffer};
use crate::error::{ArrayError, ArrayResult};
use crate::ops::dispatch::{dispatch_complex, dispatch_real};

/// Shape, byte strides, and byte offsets over a shared [`StorageBuffer`].
///
/// Clones and views alias the same buffer. `owns_storage` is false for views and for
/// arrays wrapping foreign memory; everything else allocated its own bytes.
#[derive(Clone, Debug)]
pub struct NdArray {
    buffer: StorageBuffer,
    shape: Dims,
    strides: Dims,
    offsets: Dims,
    base_offset: i64,
    dtype: DataType,
    owns_storage: bool,
}

impl NdArray {
    /// Allocates a zero-filled array.
    pub fn new(shape: &[i64], dtype: DataType) -> ArrayResult<Self> {
        NdArray::zeros(shape, dtype)
    }

    /// Allocates an array whose contents follow `SPECTRA_ZERO_INIT`.
    ///
    /// # Safety
    /// With zero-fill disabled the elements are uninitialised. Every element must be written
    /// through [`NdArray::data_ptr_mut`] before any safe accessor reads the array.
    pub unsafe fn new_uninit(shape: &[i64], dtype: DataType) -> ArrayResult<Self> {
        let bytes = output_bytes(shape, dtype)?;
        let buffer = StorageBuffer::allocate(bytes)?;
        NdArray::contiguous(buffer, shape, dtype)
    }

    /// Allocates a zero-filled array.
    pub fn zeros(shape: &[i64], dtype: DataType) -> ArrayResult<Self> {
        let bytes = output_bytes(shape, dtype)?;
        let buffer = StorageBuffer::allocate_zeroed(bytes)?;
        NdArray::contiguous(buffer, shape, dtype)
    }

    /// Allocates an array of ones.
    pub fn ones(shape: &[i64], dtype: DataType) -> ArrayResult<Self> {
        NdArray::full(shape, 1.0, dtype)
    }

    /// Allocates an array with every element set to `value` converted into `dtype`.
    pub fn full(shape: &[i64], value: f64, dtype: DataType) -> ArrayResult<Self> {
        dtype.ensure_single_lane("full")?;
        output_bytes(shape, dtype)?;
        let count = shape::numel(shape) as usize;
        if dtype.is_bool() {
            return NdArray::from_bool_bytes(vec![(value != 0.0) as u8; count], shape);
        }
        if dtype.is_complex() {
            return dispatch_complex!(dtype, C => {
                NdArray::from_vec(vec![C::from_c64(Complex64::new(value, 0.0)); count], shape)
            }, else Err(ArrayError::type_error(format!("full does not support {dtype}"))));
        }
        dispatch_real!(dtype, T => {
            NdArray::from_vec(vec![T::from_f64(value); count], shape)
        }, else Err(ArrayError::type_error(format!("full does not support {dtype}"))))
    }

    /// Adopts `data` as a contiguous array of the given shape without copying.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[i64]) -> ArrayResult<Self> {
        output_bytes(shape, T::DTYPE)?;
        let expected = shape::numel(shape) as usize;
        if data.len() != expected {
            return Err(ArrayError::shape(format!(
                "data length ({}) does not match shape {shape:?}",
                data.len()
            )));
        }
        NdArray::contiguous(StorageBuffer::from_vec(data), shape, T::DTYPE)
    }

    /// Builds a bool array from bytes that are each 0 or 1.
    pub fn from_bool_bytes(data: Vec<u8>, shape: &[i64]) -> ArrayResult<Self> {
        let mut array = NdArray::from_vec(data, shape)?;
        array.dtype = DataType::BOOL;
        Ok(array)
    }

    /// Builds a bool array from host booleans.
    pub fn from_bools(data: &[bool], shape: &[i64]) -> ArrayResult<Self> {
        NdArray::from_bool_bytes(data.iter().map(|&b| b as u8).collect(), shape)
    }

    /// Rank-zero array holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        let shape: Dims = SmallVec::new();
        NdArray {
            buffer: StorageBuffer::from_vec(vec![value]),
            strides: SmallVec::new(),
            offsets: SmallVec::new(),
            shape,
            base_offset: 0,
            dtype: T::DTYPE,
            owns_storage: true,
        }
    }

    pub(crate) fn contiguous(
        buffer: StorageBuffer,
        shape: &[i64],
        dtype: DataType,
    ) -> ArrayResult<Self> {
        let strides = shape::contiguous_strides(shape, dtype.size_in_bytes())?;
        NdArray::from_parts(
            buffer,
            shape.iter().copied().collect(),
            strides,
            SmallVec::from_elem(0, shape.len()),
            0,
            dtype,
            true,
        )
    }

    /// Assembles an array from raw layout parts, checking that every element stays in bounds.
    pub(crate) fn from_parts(
        buffer: StorageBuffer,
        shape: Dims,
        strides: Dims,
        offsets: Dims,
        base_offset: i64,
        dtype: DataType,
        owns_storage: bool,
    ) -> ArrayResult<Self> {
        if shape.len() != strides.len() || shape.len() != offsets.len() {
            return Err(ArrayError::shape(format!(
                "rank mismatch: shape {:?}, strides {:?}, offsets {:?}",
                shape, strides, offsets
            )));
        }
        shape::validate_shape(&shape)?;
        let offset = offsets
            .iter()
            .try_fold(base_offset, |acc, &o| acc.checked_add(o))
            .ok_or_else(|| ArrayError::shape(format!("offsets {offsets:?} overflow")))?;
        if let Some((low, high)) = shape::byte_extent(&shape, &strides)? {
            let first = offset.checked_add(low);
            let end = offset
                .checked_add(high)
                .and_then(|end| end.checked_add(dtype.size_in_bytes() as i64));
            let in_bounds = matches!(
                (first, end),
                (Some(first), Some(end)) if first >= 0 && end <= buffer.len() as i64
            );
            if !in_bounds {
                return Err(ArrayError::shape(format!(
                    "layout shape={:?} strides={:?} offset={} addresses bytes outside a buffer of {} bytes",
                    shape,
                    strides,
                    offset,
                    buffer.len()
                )));
            }
        }
        Ok(NdArray {
            buffer,
            shape,
            strides,
            offsets,
            base_offset,
            dtype,
            owns_storage,
        })
    }

    /// Non-owning alias of this array's buffer with a different layout.
    pub(crate) fn view(&self, shape: Dims, strides: Dims, offsets: Dims, base_offset: i64) -> ArrayResult<Self> {
        NdArray::from_parts(
            self.buffer.clone(),
            shape,
            strides,
            offsets,
            base_offset,
            self.dtype,
            false,
        )
    }

    /// Extent of every axis.
    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// Per-axis byte strides.
    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    /// Per-axis byte offsets accumulated by slicing.
    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    /// Byte offset of the first element from the start of the buffer.
    pub fn offset(&self) -> i64 {
        self.base_offset + self.offsets.iter().sum::<i64>()
    }

    /// Number of elements; 1 for rank zero.
    pub fn numel(&self) -> i64 {
        shape::numel(&self.shape)
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Element type.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Device holding the buffer.
    pub fn device(&self) -> Device {
        self.buffer.device()
    }

    /// Shared storage this array reads from.
    pub fn buffer(&self) -> &StorageBuffer {
        &self.buffer
    }

    /// Whether this array allocated the storage it references.
    pub fn owns_storage(&self) -> bool {
        self.owns_storage
    }

    /// Whether this array aliases storage it did not allocate.
    pub fn is_view(&self) -> bool {
        !self.owns_storage
    }

    /// Extent of axis `dim`; negative axes count from the end.
    pub fn size(&self, dim: i64) -> ArrayResult<i64> {
        let axis = shape::normalize_axis(dim, self.ndim())?;
        Ok(self.shape[axis])
    }

    /// Whether elements are laid out densely in row-major order.
    pub fn is_contiguous(&self) -> bool {
        let Ok(expected) = shape::contiguous_strides(&self.shape, self.dtype.size_in_bytes()) else {
            return false;
        };
        self.shape
            .iter()
            .zip(self.strides.iter().zip(expected.iter()))
            .all(|(&dim, (&actual, &wanted))| dim <= 1 || actual == wanted)
    }

    /// Untyped address of the first element.
    pub fn data_ptr_raw(&self) -> *const u8 {
        self.buffer.as_ptr().wrapping_offset(self.offset() as isize)
    }

    /// Typed pointer to the first element, rejecting mismatched dtypes and non-CPU memory.
    pub fn data_ptr<T: Element>(&self) -> ArrayResult<*const T> {
        self.check_element::<T>("data_ptr")?;
        Ok(self.data_ptr_raw() as *const T)
    }

    /// Mutable variant of [`NdArray::data_ptr`]. Writes are visible through every alias.
    pub fn data_ptr_mut<T: Element>(&self) -> ArrayResult<*mut T> {
        self.check_element::<T>("data_ptr_mut")?;
        Ok(self.data_ptr_raw() as *mut T)
    }

    /// Copies the elements out in logical row-major order.
    pub fn to_vec<T: Element>(&self) -> ArrayResult<Vec<T>> {
        self.check_element::<T>("to_vec")?;
        Ok(self.gather())
    }

    /// Reads one element by multi-index; negative indices count from the end.
    pub fn get<T: Element>(&self, index: &[i64]) -> ArrayResult<T> {
        self.check_element::<T>("get")?;
        if index.len() != self.ndim() {
            return Err(ArrayError::index(format!(
                "index {index:?} has {} entries but the array has rank {}",
                index.len(),
                self.ndim()
            )));
        }
        let mut byte_offset = self.offset();
        for (axis, (&i, (&dim, &stride))) in index
            .iter()
            .zip(self.shape.iter().zip(self.strides.iter()))
            .enumerate()
        {
            let resolved = if i < 0 { i + dim } else { i };
            if resolved < 0 || resolved >= dim {
                return Err(ArrayError::index(format!(
                    "index {i} is out of bounds for axis {axis} with size {dim}"
                )));
            }
            byte_offset += resolved * stride;
        }
        Ok(unsafe { self.read_unchecked(byte_offset) })
    }

    /// Returns an array with `new_shape`; one entry may be `-1` and is inferred.
    ///
    /// Contiguous arrays are reshaped as aliasing views. Non-contiguous arrays are first
    /// materialised into a contiguous copy, so the result never aliases them.
    pub fn reshape(&self, new_shape: &[i64]) -> ArrayResult<NdArray> {
        let resolved = resolve_reshape(new_shape, self.numel())?;
        let (source, copied) = if self.is_contiguous() {
            (self.clone(), false)
        } else {
            log::debug!(
                "reshape of non-contiguous array {:?} -> {:?} materialises a copy",
                self.shape,
                resolved
            );
            (self.copy()?, true)
        };
        let strides = shape::contiguous_strides(&resolved, source.dtype.size_in_bytes())?;
        let rank = resolved.len();
        let mut reshaped = source.view(
            resolved,
            strides,
            SmallVec::from_elem(0, rank),
            source.offset(),
        )?;
        reshaped.owns_storage = copied;
        Ok(reshaped)
    }

    /// Materialises a contiguous array that owns fresh storage.
    pub fn copy(&self) -> ArrayResult<NdArray> {
        self.ensure_cpu("copy")?;
        let elem = self.dtype.size_in_bytes();
        // Every byte is overwritten below.
        let buffer = StorageBuffer::allocate(output_bytes(&self.shape, self.dtype)?)?;
        let dst = buffer.as_mut_ptr();
        for (i, src_offset) in self.element_offsets().enumerate() {
            unsafe {
                ptr::copy_nonoverlapping(
                    self.buffer.as_ptr().offset(src_offset as isize),
                    dst.add(i * elem),
                    elem,
                );
            }
        }
        NdArray::contiguous(buffer, &self.shape, self.dtype)
    }

    /// Blocking copy onto `device`. Only the host CPU is reachable from this engine.
    pub fn to(&self, device: Device) -> ArrayResult<NdArray> {
        if !self.device().is_cpu() {
            return Err(ArrayError::device(format!(
                "cannot read an array that lives on {}",
                self.device()
            )));
        }
        if !device.is_cpu() {
            return Err(ArrayError::device(format!(
                "device {device} is not reachable; only cpu is available"
            )));
        }
        log::debug!(
            "copying {} bytes from {} to {}",
            self.numel() as usize * self.dtype.size_in_bytes(),
            self.device(),
            device
        );
        self.copy()
    }

    /// [`NdArray::to`] taking a textual device descriptor such as `"cpu"`.
    pub fn to_str(&self, device: &str) -> ArrayResult<NdArray> {
        self.to(Device::parse(device)?)
    }

    /// Read-only view of this array stretched to `target` with zero strides.
    pub fn broadcast_to(&self, target: &[i64]) -> ArrayResult<NdArray> {
        let shape = shape::broadcast_shapes(&self.shape, target)?;
        if shape.as_slice() != target {
            return Err(ArrayError::shape(format!(
                "cannot broadcast shape {:?} to {target:?}",
                self.shape
            )));
        }
        let strides = shape::broadcast_strides(&self.shape, &self.strides, target);
        self.view(
            shape,
            strides,
            SmallVec::from_elem(0, target.len()),
            self.offset(),
        )
    }

    pub(crate) fn ensure_cpu(&self, op: &str) -> ArrayResult<()> {
        if !self.device().is_cpu() {
            return Err(ArrayError::device(format!(
                "{op} requires a cpu array, got one on {}",
                self.device()
            )));
        }
        Ok(())
    }

    fn check_element<T: Element>(&self, op: &str) -> ArrayResult<()> {
        if !T::accepts(self.dtype) {
            return Err(ArrayError::type_error(format!(
                "{op} requested {} elements from a {} array",
                T::DTYPE,
                self.dtype
            )));
        }
        self.ensure_cpu(op)
    }

    /// Byte offsets of every element from the buffer start, in logical order.
    pub(crate) fn element_offsets(&self) -> StridedOffsets {
        StridedOffsets::new(&self.shape, &self.strides, self.offset())
    }

    /// Reads one element at `byte_offset` from the buffer start.
    ///
    /// # Safety
    /// The offset must address an element of this array and `T` must match its dtype width.
    pub(crate) unsafe fn read_unchecked<T: Element>(&self, byte_offset: i64) -> T {
        debug_assert_eq!(size_of::<T>(), self.dtype.size_in_bytes());
        self.buffer
            .as_ptr()
            .offset(byte_offset as isize)
            .cast::<T>()
            .read_unaligned()
    }

    /// Collects every element as `T`; callers have already validated dtype and device.
    pub(crate) fn gather<T: Element>(&self) -> Vec<T> {
        self.element_offsets()
            .map(|offset| unsafe { self.read_unchecked::<T>(offset) })
            .collect()
    }

    /// Elements widened to `f64`, for any real or bool dtype.
    pub(crate) fn gather_f64(&self, op: &str) -> ArrayResult<Vec<f64>> {
        self.ensure_cpu(op)?;
        self.dtype.ensure_single_lane(op)?;
        if self.dtype.is_bool() {
            return Ok(self.gather::<u8>().into_iter().map(|b| (b != 0) as u8 as f64).collect());
        }
        dispatch_real!(self.dtype, T => {
            Ok(self.gather::<T>().into_iter().map(RealElement::to_f64).collect())
        }, else Err(ArrayError::type_error(format!("{op} does not support {} input", self.dtype))))
    }

    /// Elements converted to double-precision complex, for any numeric dtype.
    pub(crate) fn gather_c64(&self, op: &str) -> ArrayResult<Vec<Complex64>> {
        if self.dtype.code == DataTypeCode::Complex {
            self.ensure_cpu(op)?;
            self.dtype.ensure_single_lane(op)?;
            return dispatch_complex!(self.dtype, C => {
                Ok(self.gather::<C>().into_iter().map(ComplexElement::to_c64).collect())
            }, else Err(ArrayError::type_error(format!("{op} does not support {} input", self.dtype))));
        }
        if self.dtype.is_bool() {
            return Err(ArrayError::type_error(format!(
                "{op} does not support bool input"
            )));
        }
        Ok(self
            .gather_f64(op)?
            .into_iter()
            .map(|re| Complex64::new(re, 0.0))
            .collect())
    }
}

fn resolve_reshape(new_shape: &[i64], numel: i64) -> ArrayResult<Dims> {
    let mut inferred = None;
    let mut known = 1i64;
    for (axis, &dim) in new_shape.iter().enumerate() {
        match dim {
            -1 if inferred.is_none() => inferred = Some(axis),
            -1 => {
                return Err(ArrayError::shape(format!(
                    "reshape target {new_shape:?} infers more than one dimension"
                )))
            }
            d if d < 0 => {
                return Err(ArrayError::shape(format!(
                    "negative dimension {d} in reshape target {new_shape:?}"
                )))
            }
            d => {
                known = known.checked_mul(d).ok_or_else(|| {
                    ArrayError::shape(format!("reshape target {new_shape:?} is too large"))
                })?
            }
        }
    }
    let mut resolved: Dims = new_shape.iter().copied().collect();
    if let Some(axis) = inferred {
        if known == 0 || numel % known != 0 {
            return Err(ArrayError::shape(format!(
                "cannot infer a dimension reshaping {numel} elements into {new_shape:?}"
            )));
        }
        resolved[axis] = numel / known;
    } else if known != numel {
        return Err(ArrayError::shape(format!(
            "cannot reshape {numel} elements into {new_shape:?}"
        )));
    }
    Ok(resolved)
}

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ndarray(shape={:?}, dtype={}, device={})",
            self.shape.as_slice(),
            self.dtype,
            self.device()
        )
    }
}

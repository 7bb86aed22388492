//! Zero-copy exchange with other array frameworks through DLPack.
//!
//! Exported arrays hand out a heap-allocated [`DLManagedTensor`] whose `manager_ctx` pins
//! a clone of the array, so the buffer stays alive until the consumer calls the deleter.
//! Imported tensors become arrays over a foreign [`StorageBuffer`] whose release callback
//! invokes the producer's deleter exactly once.

use std::ffi::c_void;
use std::fmt;
use std::ptr::{self, NonNull};
use std::slice;

use smallvec::SmallVec;

use crate::error::{ArrayError, ArrayResult};
use crate::tensor::shape::{self, Dims};
use crate::tensor::{DataType, DataTypeCode, Device, DeviceKind, NdArray, StorageBuffer};

/// Name carried by a capsule that has not been consumed yet.
pub const CAPSULE_NAME: &str = "dltensor";
/// Name a capsule takes once a consumer has claimed its tensor.
pub const USED_CAPSULE_NAME: &str = "used_dltensor";

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DLDevice {
    pub device_type: i32,
    pub device_id: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DLDataType {
    pub code: u8,
    pub bits: u8,
    pub lanes: u16,
}

/// Borrowed tensor description; strides are in elements and may be null for compact layouts.
#[repr(C)]
#[derive(Debug)]
pub struct DLTensor {
    pub data: *mut c_void,
    pub device: DLDevice,
    pub ndim: i32,
    pub dtype: DLDataType,
    pub shape: *mut i64,
    pub strides: *mut i64,
    pub byte_offset: u64,
}

#[repr(C)]
pub struct DLManagedTensor {
    pub dl_tensor: DLTensor,
    pub manager_ctx: *mut c_void,
    pub deleter: Option<unsafe extern "C" fn(*mut DLManagedTensor)>,
}

impl fmt::Debug for DLManagedTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DLManagedTensor")
            .field("dl_tensor", &self.dl_tensor)
            .field("manager_ctx", &self.manager_ctx)
            .field("has_deleter", &self.deleter.is_some())
            .finish()
    }
}

impl From<Device> for DLDevice {
    fn from(device: Device) -> Self {
        DLDevice {
            device_type: device.kind.tag(),
            device_id: device.index,
        }
    }
}

impl TryFrom<DLDevice> for Device {
    type Error = ArrayError;

    fn try_from(device: DLDevice) -> ArrayResult<Self> {
        let kind = DeviceKind::from_tag(device.device_type).ok_or_else(|| {
            ArrayError::device(format!("unknown DLPack device type {}", device.device_type))
        })?;
        Ok(Device::new(kind, device.device_id))
    }
}

impl From<DataType> for DLDataType {
    fn from(dtype: DataType) -> Self {
        DLDataType {
            code: dtype.code.tag(),
            bits: dtype.bits,
            lanes: dtype.lanes as u16,
        }
    }
}

impl TryFrom<DLDataType> for DataType {
    type Error = ArrayError;

    fn try_from(dtype: DLDataType) -> ArrayResult<Self> {
        let code = DataTypeCode::from_tag(dtype.code).ok_or_else(|| {
            ArrayError::type_error(format!("unsupported DLPack dtype code {}", dtype.code))
        })?;
        if dtype.lanes != 1 {
            return Err(ArrayError::type_error(format!(
                "DLPack tensors with {} lanes are not supported",
                dtype.lanes
            )));
        }
        let converted = DataType::scalar(code, dtype.bits);
        if !converted.is_supported() {
            return Err(ArrayError::type_error(format!(
                "unsupported DLPack dtype {converted}"
            )));
        }
        Ok(converted)
    }
}

/// State owned by an exported tensor until its deleter runs.
struct ExportContext {
    _array: NdArray,
    shape: Box<[i64]>,
    strides: Box<[i64]>,
}

unsafe extern "C" fn release_export(managed: *mut DLManagedTensor) {
    if managed.is_null() {
        return;
    }
    let managed = Box::from_raw(managed);
    if !managed.manager_ctx.is_null() {
        drop(Box::from_raw(managed.manager_ctx as *mut ExportContext));
    }
}

unsafe fn call_deleter(managed: *mut DLManagedTensor) {
    if let Some(deleter) = (*managed).deleter {
        deleter(managed);
    }
}

/// Managed tensor pointer that may be released from another thread.
struct SendPtr(NonNull<DLManagedTensor>);

// DLPack producers must accept the deleter being called from any thread.
unsafe impl Send for SendPtr {}

impl SendPtr {
    unsafe fn delete(self) {
        call_deleter(self.0.as_ptr());
    }
}

/// Owning handle on a [`DLManagedTensor`], named like a host-language DLPack capsule.
///
/// Dropping a capsule that was never consumed calls the tensor's deleter.
pub struct DlpackCapsule {
    ptr: Option<NonNull<DLManagedTensor>>,
    name: &'static str,
}

unsafe impl Send for DlpackCapsule {}

impl DlpackCapsule {
    /// Wraps a managed tensor produced elsewhere.
    ///
    /// # Safety
    /// `managed` must be a valid, unconsumed `DLManagedTensor`; the capsule takes ownership.
    pub unsafe fn from_raw(managed: *mut DLManagedTensor) -> ArrayResult<Self> {
        let ptr = NonNull::new(managed)
            .ok_or_else(|| ArrayError::type_error("null DLManagedTensor pointer"))?;
        Ok(DlpackCapsule {
            ptr: Some(ptr),
            name: CAPSULE_NAME,
        })
    }

    /// Capsule name, `dltensor` or `used_dltensor` once consumed.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the managed tensor has been taken out of this capsule.
    pub fn is_consumed(&self) -> bool {
        self.ptr.is_none()
    }

    /// The described tensor, until the capsule is consumed.
    pub fn tensor(&self) -> Option<&DLTensor> {
        self.ptr.map(|ptr| unsafe { &(*ptr.as_ptr()).dl_tensor })
    }

    /// Claims the managed tensor and marks the capsule used; later calls return `None`.
    pub fn take(&mut self) -> Option<*mut DLManagedTensor> {
        let ptr = self.ptr.take()?;
        self.name = USED_CAPSULE_NAME;
        Some(ptr.as_ptr())
    }

    /// Hands the managed tensor to a consumer, who becomes responsible for its deleter.
    pub fn into_raw(mut self) -> *mut DLManagedTensor {
        self.take().unwrap_or(ptr::null_mut())
    }
}

impl Drop for DlpackCapsule {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            log::trace!("dropping unconsumed {} capsule", self.name);
            unsafe { call_deleter(ptr.as_ptr()) };
        }
    }
}

impl fmt::Debug for DlpackCapsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DlpackCapsule")
            .field("name", &self.name)
            .field("tensor", &self.tensor())
            .finish()
    }
}

/// Raw description of externally owned array memory.
#[derive(Debug, Clone, Copy)]
pub struct ForeignDescriptor<'a> {
    /// Base address; element `0` lives at `data + byte_offset`.
    pub data: *mut c_void,
    pub byte_offset: u64,
    pub device: Device,
    pub dtype: DataType,
    pub shape: &'a [i64],
    /// Strides in elements; `None` means compact row-major.
    pub strides: Option<&'a [i64]>,
}

/// Layout of a foreign tensor, rebased onto its lowest reachable byte.
struct ForeignLayout {
    base: *mut u8,
    len: usize,
    shape: Dims,
    strides: Dims,
    base_offset: i64,
}

fn foreign_layout(desc: &ForeignDescriptor<'_>) -> ArrayResult<ForeignLayout> {
    desc.dtype.ensure_single_lane("from_foreign")?;
    if !desc.dtype.is_supported() {
        return Err(ArrayError::type_error(format!(
            "cannot import foreign {} data",
            desc.dtype
        )));
    }
    shape::validate_shape(desc.shape)?;
    let elem = desc.dtype.size_in_bytes() as i64;
    let shape: Dims = desc.shape.iter().copied().collect();
    let strides: Dims = match desc.strides {
        Some(strides) if strides.len() != shape.len() => {
            return Err(ArrayError::shape(format!(
                "foreign strides {strides:?} do not match shape {:?}",
                desc.shape
            )))
        }
        Some(strides) => strides
            .iter()
            .map(|&s| {
                s.checked_mul(elem).ok_or_else(|| {
                    ArrayError::shape(format!("foreign stride {s} overflows in bytes"))
                })
            })
            .collect::<ArrayResult<Dims>>()?,
        None => shape::contiguous_strides(&shape, elem as usize)?,
    };

    let Some((low, high)) = shape::byte_extent(&shape, &strides)? else {
        return Ok(ForeignLayout {
            base: desc.data as *mut u8,
            len: 0,
            shape,
            strides,
            base_offset: 0,
        });
    };
    if desc.data.is_null() {
        return Err(ArrayError::type_error(
            "foreign tensor has a null data pointer",
        ));
    }
    let overflow = || ArrayError::shape(format!("foreign layout of shape {shape:?} overflows"));
    let first = i64::try_from(desc.byte_offset)
        .ok()
        .and_then(|offset| offset.checked_add(low))
        .ok_or_else(overflow)?;
    let len = (high - low).checked_add(elem).ok_or_else(overflow)?;
    Ok(ForeignLayout {
        base: (desc.data as *mut u8).wrapping_offset(first as isize),
        len: len as usize,
        shape,
        strides,
        base_offset: -low,
    })
}

impl NdArray {
    /// Wraps externally owned memory without copying it.
    ///
    /// Shape and stride metadata are copied out of `desc`. `release` runs exactly once: when
    /// the last array referencing the memory drops, or before returning if validation fails.
    ///
    /// # Safety
    /// Every element addressed by `desc` must stay valid until `release` is invoked.
    pub unsafe fn from_foreign(
        desc: ForeignDescriptor<'_>,
        release: impl FnOnce() + Send + 'static,
    ) -> ArrayResult<NdArray> {
        let layout = match foreign_layout(&desc) {
            Ok(layout) => layout,
            Err(err) => {
                release();
                return Err(err);
            }
        };
        let buffer = StorageBuffer::from_foreign(layout.base, layout.len, desc.device, release)?;
        let rank = layout.shape.len();
        NdArray::from_parts(
            buffer,
            layout.shape,
            layout.strides,
            SmallVec::from_elem(0, rank),
            layout.base_offset,
            desc.dtype,
            false,
        )
    }

    /// Consumes a DLPack managed tensor, taking over responsibility for its deleter.
    ///
    /// # Safety
    /// `managed` must be null or point to a valid, unconsumed `DLManagedTensor`.
    pub unsafe fn from_dlpack(managed: *mut DLManagedTensor) -> ArrayResult<NdArray> {
        let Some(managed) = NonNull::new(managed) else {
            return Err(ArrayError::type_error("null DLManagedTensor pointer"));
        };
        let owner = SendPtr(managed);
        let tensor = &(*managed.as_ptr()).dl_tensor;

        let parsed = (|| -> ArrayResult<(Device, DataType, usize)> {
            let device = Device::try_from(tensor.device)?;
            let dtype = DataType::try_from(tensor.dtype)?;
            let ndim = usize::try_from(tensor.ndim).map_err(|_| {
                ArrayError::shape(format!("invalid DLPack ndim {}", tensor.ndim))
            })?;
            if ndim > 0 && tensor.shape.is_null() {
                return Err(ArrayError::type_error("DLPack tensor has a null shape pointer"));
            }
            Ok((device, dtype, ndim))
        })();
        let (device, dtype, ndim) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                owner.delete();
                return Err(err);
            }
        };

        let shape = if ndim == 0 {
            &[][..]
        } else {
            slice::from_raw_parts(tensor.shape, ndim)
        };
        let strides = if ndim == 0 || tensor.strides.is_null() {
            None
        } else {
            Some(slice::from_raw_parts(tensor.strides, ndim))
        };
        log::debug!(
            "importing DLPack tensor shape={shape:?} strides={strides:?} dtype={dtype} device={device}"
        );
        let desc = ForeignDescriptor {
            data: tensor.data,
            byte_offset: tensor.byte_offset,
            device,
            dtype,
            shape,
            strides,
        };
        NdArray::from_foreign(desc, move || owner.delete())
    }

    /// Safe import from a capsule; the capsule is marked used.
    pub fn from_dlpack_capsule(mut capsule: DlpackCapsule) -> ArrayResult<NdArray> {
        let managed = capsule
            .take()
            .ok_or_else(|| ArrayError::type_error("DLPack capsule was already consumed"))?;
        unsafe { NdArray::from_dlpack(managed) }
    }

    /// Exports this array without copying. The capsule keeps the buffer alive.
    pub fn to_dlpack(&self) -> ArrayResult<DlpackCapsule> {
        let elem = self.dtype().size_in_bytes() as i64;
        let strides = self
            .strides()
            .iter()
            .map(|&stride| {
                if stride % elem != 0 {
                    return Err(ArrayError::value(format!(
                        "byte stride {stride} is not a multiple of the {elem}-byte element"
                    )));
                }
                Ok(stride / elem)
            })
            .collect::<ArrayResult<Box<[i64]>>>()?;
        let ndim = i32::try_from(self.ndim())
            .map_err(|_| ArrayError::shape(format!("rank {} exceeds DLPack limits", self.ndim())))?;

        let mut context = Box::new(ExportContext {
            _array: self.clone(),
            shape: self.shape().into(),
            strides,
        });
        let dl_tensor = DLTensor {
            data: self.buffer().as_mut_ptr() as *mut c_void,
            device: self.device().into(),
            ndim,
            dtype: self.dtype().into(),
            shape: context.shape.as_mut_ptr(),
            strides: context.strides.as_mut_ptr(),
            byte_offset: self.offset() as u64,
        };
        log::debug!(
            "exporting {self} at byte offset {} with element strides {:?}",
            self.offset(),
            context.strides
        );
        let managed = Box::new(DLManagedTensor {
            dl_tensor,
            manager_ctx: Box::into_raw(context) as *mut c_void,
            deleter: Some(release_export),
        });
        unsafe { DlpackCapsule::from_raw(Box::into_raw(managed)) }
    }
}

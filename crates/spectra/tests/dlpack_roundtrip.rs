use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use spectra::dlpack::{DLDataType, DLDevice, DLManagedTensor, DLTensor, USED_CAPSULE_NAME};
use spectra::{slice, ArrayError, DataType, Device, DlpackCapsule, ForeignDescriptor, NdArray};

#[test]
fn round_trip_keeps_the_data_pointer() -> Result<()> {
    let array = NdArray::from_vec((0..12).map(|v| v as f32).collect(), &[3, 4])?;
    let capsule = array.to_dlpack()?;
    let imported = NdArray::from_dlpack_capsule(capsule)?;
    assert_eq!(imported.data_ptr_raw(), array.data_ptr_raw());
    assert_eq!(imported.shape(), array.shape());
    assert_eq!(imported.strides(), array.strides());
    assert_eq!(imported.to_vec::<f32>()?, array.to_vec::<f32>()?);
    assert!(!imported.owns_storage());
    Ok(())
}

#[test]
fn round_trip_of_a_view_preserves_its_layout() -> Result<()> {
    let array = NdArray::from_vec((0..20).collect::<Vec<i16>>(), &[4, 5])?;
    let view = slice(&slice(&array, 0, 3, 0, -1)?, 1, 1, 5, 2)?;
    let imported = NdArray::from_dlpack_capsule(view.to_dlpack()?)?;
    assert_eq!(imported.data_ptr_raw(), view.data_ptr_raw());
    assert_eq!(imported.strides(), view.strides());
    assert_eq!(imported.to_vec::<i16>()?, view.to_vec::<i16>()?);
    Ok(())
}

#[test]
fn imported_arrays_keep_the_exporter_alive() -> Result<()> {
    let array = NdArray::from_vec(vec![1u32, 2, 3], &[3])?;
    let imported = NdArray::from_dlpack_capsule(array.to_dlpack()?)?;
    assert_eq!(array.buffer().ref_count(), 2);
    drop(array);
    assert_eq!(imported.to_vec::<u32>()?, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn consumed_capsule_cannot_be_imported_twice() -> Result<()> {
    let array = NdArray::scalar(5i64);
    let mut capsule = array.to_dlpack()?;
    let raw = capsule.take().expect("fresh capsule");
    assert_eq!(capsule.name(), USED_CAPSULE_NAME);
    assert!(matches!(
        NdArray::from_dlpack_capsule(capsule),
        Err(ArrayError::Type(_))
    ));
    let imported = unsafe { NdArray::from_dlpack(raw) }?;
    assert_eq!(imported.get::<i64>(&[])?, 5);
    Ok(())
}

#[test]
fn null_pointer_is_a_type_error() {
    let result = unsafe { NdArray::from_dlpack(std::ptr::null_mut()) };
    assert!(matches!(result, Err(ArrayError::Type(_))));
}

static FOREIGN_DELETES: AtomicUsize = AtomicUsize::new(0);

struct ForeignTensor {
    data: Vec<f64>,
    shape: Vec<i64>,
    strides: Vec<i64>,
}

unsafe extern "C" fn delete_foreign(managed: *mut DLManagedTensor) {
    FOREIGN_DELETES.fetch_add(1, Ordering::SeqCst);
    let managed = Box::from_raw(managed);
    drop(Box::from_raw(managed.manager_ctx as *mut ForeignTensor));
}

fn foreign_managed(device_type: i32, code: u8, lanes: u16) -> *mut DLManagedTensor {
    let mut owner = Box::new(ForeignTensor {
        data: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        shape: vec![2, 3],
        strides: vec![1, 2],
    });
    let dl_tensor = DLTensor {
        data: owner.data.as_mut_ptr() as *mut c_void,
        device: DLDevice {
            device_type,
            device_id: 0,
        },
        ndim: 2,
        dtype: DLDataType {
            code,
            bits: 64,
            lanes,
        },
        shape: owner.shape.as_mut_ptr(),
        strides: owner.strides.as_mut_ptr(),
        byte_offset: 0,
    };
    Box::into_raw(Box::new(DLManagedTensor {
        dl_tensor,
        manager_ctx: Box::into_raw(owner) as *mut c_void,
        deleter: Some(delete_foreign),
    }))
}

#[test]
fn foreign_tensor_lifecycle() -> Result<()> {
    let before = FOREIGN_DELETES.load(Ordering::SeqCst);
    let capsule = unsafe { DlpackCapsule::from_raw(foreign_managed(1, 2, 1)) }?;
    let array = NdArray::from_dlpack_capsule(capsule)?;
    assert_eq!(array.dtype(), DataType::FLOAT64);
    assert_eq!(array.to_vec::<f64>()?, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    let alias = array.clone();
    drop(array);
    assert_eq!(FOREIGN_DELETES.load(Ordering::SeqCst), before);
    std::thread::spawn(move || drop(alias))
        .join()
        .expect("release thread");
    assert_eq!(FOREIGN_DELETES.load(Ordering::SeqCst), before + 1);

    let rejected = unsafe { NdArray::from_dlpack(foreign_managed(1, 2, 4)) };
    assert!(matches!(rejected, Err(ArrayError::Type(_))));
    let unknown_device = unsafe { NdArray::from_dlpack(foreign_managed(42, 2, 1)) };
    assert!(matches!(unknown_device, Err(ArrayError::Device(_))));
    assert_eq!(FOREIGN_DELETES.load(Ordering::SeqCst), before + 3);

    let dropped = unsafe { DlpackCapsule::from_raw(foreign_managed(1, 2, 1)) }?;
    drop(dropped);
    assert_eq!(FOREIGN_DELETES.load(Ordering::SeqCst), before + 4);
    Ok(())
}

#[test]
fn from_foreign_wraps_raw_memory() -> Result<()> {
    let backing = Arc::new(vec![10u8, 20, 30, 40]);
    let released = Arc::new(AtomicUsize::new(0));
    let shape = [2i64, 2];
    let desc = ForeignDescriptor {
        data: backing.as_ptr() as *mut c_void,
        byte_offset: 0,
        device: Device::CPU,
        dtype: DataType::UINT8,
        shape: &shape,
        strides: None,
    };
    let guard = Arc::clone(&backing);
    let counter = Arc::clone(&released);
    let array = unsafe {
        NdArray::from_foreign(desc, move || {
            drop(guard);
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }?;
    assert_eq!(array.strides(), &[2, 1]);
    assert_eq!(array.get::<u8>(&[1, 0])?, 30);
    drop(array);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(Arc::strong_count(&backing), 1);

    let bad_shape = [-1i64];
    let failing = ForeignDescriptor {
        shape: &bad_shape,
        ..desc
    };
    let counter = Arc::clone(&released);
    let result = unsafe {
        NdArray::from_foreign(failing, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert!(matches!(result, Err(ArrayError::Shape(_))));
    assert_eq!(released.load(Ordering::SeqCst), 2);
    Ok(())
}

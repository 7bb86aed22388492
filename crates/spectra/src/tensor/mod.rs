//! Core array abstractions: element descriptors, storage, layout, and views.
//!
//! [`NdArray`] is the single concrete array type. Views produced by [`slice`] and
//! [`NdArray::index`] are `NdArray`s that share their parent's [`StorageBuffer`].

pub mod device;
pub mod dtype;
mod ndarray;
pub mod shape;
pub mod storage;
mod view;

pub use device::{Device, DeviceKind};
pub use dtype::{DataType, DataTypeCode};
pub use ndarray::NdArray;
pub use shape::Dims;
pub use storage::{ComplexElement, Element, RealElement, StorageBuffer};
pub use view::{slice, slice_spec, IndexArg, SliceSpec};

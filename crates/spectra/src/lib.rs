pub mod dlpack;
mod env;
pub mod error;
pub mod io;
pub mod ops;
pub mod tensor;

pub use dlpack::{DlpackCapsule, ForeignDescriptor};
pub use error::{ArrayError, ArrayResult};
pub use io::{read_from_bytes, read_from_file, write_to_bytes, write_to_file};
pub use ops::{
    add, arange, divide, fft, fft_shift_mag_square, greater_than, less_than, linspace,
    masked_mean, masked_mean_stddev, masked_stddev, max, mean, mean_stddev, median, multiply,
    normal, square, standardized_moment, stddev, subtract, sum, uniform, var, Operand, Scalar,
};
pub use tensor::{slice, DataType, DataTypeCode, Device, DeviceKind, IndexArg, NdArray, SliceSpec};

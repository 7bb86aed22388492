//! Host kernels over [`NdArray`](crate::tensor::NdArray).
//!
//! Kernels are generic over element type and instantiated per dtype through the `dispatch` macros.
//! All of them run on the CPU and allocate fresh contiguous outputs.

pub mod creation;
pub(crate) mod dispatch;
pub mod elementwise;
pub mod frequency;
pub mod reduce;

pub use creation::{arange, linspace, normal, uniform};
pub use elementwise::{
    add, binary, cast, compare, divide, greater_than, less_than, multiply, promote, square,
    subtract, BinaryOp, CompareOp, Operand, Scalar,
};
pub use frequency::{fft, fft_shift_mag_square};
pub use reduce::{
    masked_mean, masked_mean_stddev, masked_stddev, max, mean, mean_stddev, median,
    standardized_moment, stddev, sum, var,
};

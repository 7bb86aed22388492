//! Dtype dispatch table keyed by `(code, bits)`.
//!
//! Each macro binds a local type alias for the matched element type and evaluates the body
//! once per supported entry, so kernels are written once as generic functions and
//! instantiated for every dtype the table lists. Vector dtypes (`lanes != 1`) never match.

/// Dispatches over the real element types: signed and unsigned integers and floats.
macro_rules! dispatch_real {
    ($dtype:expr, $T:ident => $body:block, else $fallback:expr) => {{
        let dtype: $crate::tensor::DataType = $dtype;
        match (dtype.code, dtype.bits, dtype.lanes) {
            ($crate::tensor::DataTypeCode::Int, 8, 1) => {
                type $T = i8;
                $body
            }
            ($crate::tensor::DataTypeCode::Int, 16, 1) => {
                type $T = i16;
                $body
            }
            ($crate::tensor::DataTypeCode::Int, 32, 1) => {
                type $T = i32;
                $body
            }
            ($crate::tensor::DataTypeCode::Int, 64, 1) => {
                type $T = i64;
                $body
            }
            ($crate::tensor::DataTypeCode::UInt, 8, 1) => {
                type $T = u8;
                $body
            }
            ($crate::tensor::DataTypeCode::UInt, 16, 1) => {
                type $T = u16;
                $body
            }
            ($crate::tensor::DataTypeCode::UInt, 32, 1) => {
                type $T = u32;
                $body
            }
            ($crate::tensor::DataTypeCode::UInt, 64, 1) => {
                type $T = u64;
                $body
            }
            ($crate::tensor::DataTypeCode::Float, 16, 1) => {
                type $T = ::half::f16;
                $body
            }
            ($crate::tensor::DataTypeCode::Float, 32, 1) => {
                type $T = f32;
                $body
            }
            ($crate::tensor::DataTypeCode::Float, 64, 1) => {
                type $T = f64;
                $body
            }
            _ => $fallback,
        }
    }};
}

/// Dispatches over the complex element types.
macro_rules! dispatch_complex {
    ($dtype:expr, $C:ident => $body:block, else $fallback:expr) => {{
        let dtype: $crate::tensor::DataType = $dtype;
        match (dtype.code, dtype.bits, dtype.lanes) {
            ($crate::tensor::DataTypeCode::Complex, 64, 1) => {
                type $C = ::num_complex::Complex32;
                $body
            }
            ($crate::tensor::DataTypeCode::Complex, 128, 1) => {
                type $C = ::num_complex::Complex64;
                $body
            }
            _ => $fallback,
        }
    }};
}

/// Dispatches over every element type that supports arithmetic: reals then complex.
macro_rules! dispatch_numeric {
    ($dtype:expr, $T:ident => $body:block, else $fallback:expr) => {{
        let dtype: $crate::tensor::DataType = $dtype;
        $crate::ops::dispatch::dispatch_real!(dtype, $T => $body, else {
            $crate::ops::dispatch::dispatch_complex!(dtype, $T => $body, else $fallback)
        })
    }};
}

pub(crate) use dispatch_complex;
pub(crate) use dispatch_numeric;
pub(crate) use dispatch_real;

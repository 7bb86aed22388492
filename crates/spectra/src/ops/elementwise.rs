//! Broadcasting elementwise arithmetic and comparisons.
//!
//! Binary operations first broadcast both operands to a common shape, promote them to a
//! shared dtype, and then run one generic kernel instantiated through the dispatch table.

use num_complex::Complex64;

use crate::error::{ArrayError, ArrayResult};
use crate::ops::dispatch::{dispatch_complex, dispatch_numeric, dispatch_real};
use crate::tensor::shape::{self, Dims};
use crate::tensor::storage::output_bytes;
use crate::tensor::{ComplexElement, DataType, DataTypeCode, Element, NdArray, RealElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "multiply",
            BinaryOp::Divide => "divide",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    Greater,
}

impl CompareOp {
    fn name(self) -> &'static str {
        match self {
            CompareOp::Less => "less_than",
            CompareOp::Greater => "greater_than",
        }
    }
}

/// Host scalar accepted as the right-hand side of a binary operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    I32(i32),
    I64(i64),
    U8(u8),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

macro_rules! impl_scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl From<$ty> for Scalar {
            fn from(value: $ty) -> Self {
                Scalar::$variant(value)
            }
        }

        impl From<$ty> for Operand<'_> {
            fn from(value: $ty) -> Self {
                Operand::Scalar(Scalar::$variant(value))
            }
        }
    )*};
}

impl_scalar_from!(
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl Scalar {
    fn integer(self) -> Option<i128> {
        match self {
            Scalar::I32(v) => Some(v as i128),
            Scalar::I64(v) => Some(v as i128),
            Scalar::U8(v) => Some(v as i128),
            Scalar::U32(v) => Some(v as i128),
            Scalar::U64(v) => Some(v as i128),
            Scalar::F32(_) | Scalar::F64(_) => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Scalar::F32(v) => v as f64,
            Scalar::F64(v) => v,
            other => other.integer().map(|v| v as f64).unwrap_or_default(),
        }
    }

    /// Converts into a rank-zero array of `dtype`, refusing conversions that lose the value.
    pub fn to_array(self, dtype: DataType) -> ArrayResult<NdArray> {
        dtype.ensure_single_lane("scalar conversion")?;
        let mismatch = || {
            ArrayError::type_error(format!(
                "scalar {self:?} is not representable as {dtype}"
            ))
        };
        match dtype.code {
            DataTypeCode::Bool => Err(mismatch()),
            DataTypeCode::Complex => dispatch_complex!(dtype, C => {
                let converted = C::from_c64(Complex64::new(self.as_f64(), 0.0));
                if let Some(exact) = self.integer() {
                    if converted.to_c64().re as i128 != exact {
                        return Err(mismatch());
                    }
                }
                Ok(NdArray::scalar(converted))
            }, else Err(mismatch())),
            DataTypeCode::Float => {
                let value = self.as_f64();
                dispatch_real!(dtype, T => {
                    let converted = T::from_f64(value);
                    if value.is_finite() && !converted.to_f64().is_finite() {
                        return Err(mismatch());
                    }
                    if let Some(exact) = self.integer() {
                        if converted.to_f64() as i128 != exact {
                            return Err(mismatch());
                        }
                    }
                    Ok(NdArray::scalar(converted))
                }, else Err(mismatch()))
            }
            DataTypeCode::Int | DataTypeCode::UInt => {
                let value = match self.integer() {
                    Some(value) => value,
                    None => {
                        let value = self.as_f64();
                        if !value.is_finite() || value.fract() != 0.0 {
                            return Err(mismatch());
                        }
                        value as i128
                    }
                };
                let (low, high) = integer_range(dtype);
                if value < low || value > high {
                    return Err(mismatch());
                }
                dispatch_real!(dtype, T => {
                    Ok(NdArray::scalar(T::from_i128(value)))
                }, else Err(mismatch()))
            }
        }
    }
}

fn integer_range(dtype: DataType) -> (i128, i128) {
    let bits = dtype.bits as u32;
    if dtype.code == DataTypeCode::Int {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

/// Right-hand side of a binary operation: another array or a host scalar.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    Array(&'a NdArray),
    Scalar(Scalar),
}

impl<'a> From<&'a NdArray> for Operand<'a> {
    fn from(array: &'a NdArray) -> Self {
        Operand::Array(array)
    }
}

impl From<Scalar> for Operand<'_> {
    fn from(scalar: Scalar) -> Self {
        Operand::Scalar(scalar)
    }
}

/// Common dtype two operands are converted to before an arithmetic kernel runs.
///
/// Bool counts as `uint8`. Complex outranks float, which outranks integers; within a
/// category the wider type wins. Mixing signed and unsigned integers yields a signed type
/// wide enough for both, capped at `int64`.
pub fn promote(lhs: DataType, rhs: DataType) -> ArrayResult<DataType> {
    lhs.ensure_single_lane("promote")?;
    rhs.ensure_single_lane("promote")?;
    if lhs == rhs {
        return Ok(lhs);
    }
    let as_numeric = |dtype: DataType| {
        if dtype.is_bool() {
            DataType::UINT8
        } else {
            dtype
        }
    };
    let (lhs, rhs) = (as_numeric(lhs), as_numeric(rhs));
    if lhs == rhs {
        return Ok(lhs);
    }
    use DataTypeCode::*;
    let promoted = match (lhs.code, rhs.code) {
        (Complex, _) | (_, Complex) => {
            let (complex, other) = if lhs.code == Complex { (lhs, rhs) } else { (rhs, lhs) };
            let other_part = if other.code == Complex { other.bits / 2 } else { other.bits };
            let part = (complex.bits / 2).max(other_part).min(64);
            DataType::scalar(Complex, part * 2)
        }
        (Float, _) | (_, Float) => DataType::scalar(Float, lhs.bits.max(rhs.bits).min(64)),
        (Int, Int) | (UInt, UInt) => DataType::scalar(lhs.code, lhs.bits.max(rhs.bits)),
        (Int, UInt) | (UInt, Int) => {
            let (signed, unsigned) = if lhs.code == Int { (lhs, rhs) } else { (rhs, lhs) };
            if signed.bits > unsigned.bits {
                signed
            } else {
                DataType::scalar(Int, (unsigned.bits * 2).min(64))
            }
        }
        _ => {
            return Err(ArrayError::type_error(format!(
                "no common dtype for {lhs} and {rhs}"
            )))
        }
    };
    Ok(promoted)
}

/// Converts `array` into `target`, materialising a contiguous copy unless it already matches.
pub fn cast(array: &NdArray, target: DataType) -> ArrayResult<NdArray> {
    if array.dtype() == target {
        return Ok(array.clone());
    }
    target.ensure_single_lane("cast")?;
    log::trace!("casting {} -> {target}", array.dtype());
    if target.is_complex() {
        let values = array.gather_c64("cast")?;
        return dispatch_complex!(target, C => {
            NdArray::from_vec(
                values
                    .into_iter()
                    .map(C::from_c64)
                    .collect(),
                array.shape(),
            )
        }, else Err(ArrayError::type_error(format!("cannot cast to {target}"))));
    }
    if array.dtype().is_complex() {
        return Err(ArrayError::type_error(format!(
            "cannot cast {} to {target} without discarding the imaginary part",
            array.dtype()
        )));
    }
    if target.is_bool() {
        let values = array.gather_f64("cast")?;
        return NdArray::from_bool_bytes(
            values.into_iter().map(|v| (v != 0.0) as u8).collect(),
            array.shape(),
        );
    }
    if array.dtype().is_integer() && target.is_integer() {
        let values = gather_i128(array)?;
        return dispatch_real!(target, T => {
            NdArray::from_vec(values.into_iter().map(T::from_i128).collect(), array.shape())
        }, else Err(ArrayError::type_error(format!("cannot cast to {target}"))));
    }
    let values = array.gather_f64("cast")?;
    dispatch_real!(target, T => {
        NdArray::from_vec(values.into_iter().map(T::from_f64).collect(), array.shape())
    }, else Err(ArrayError::type_error(format!("cannot cast to {target}"))))
}

fn gather_i128(array: &NdArray) -> ArrayResult<Vec<i128>> {
    array.ensure_cpu("cast")?;
    macro_rules! widen {
        ($($code:ident $bits:literal => $ty:ty),*) => {
            match (array.dtype().code, array.dtype().bits) {
                $((DataTypeCode::$code, $bits) => {
                    Ok(array.gather::<$ty>().into_iter().map(|v| v as i128).collect())
                })*
                _ => Err(ArrayError::type_error(format!(
                    "{} is not an integer dtype",
                    array.dtype()
                ))),
            }
        };
    }
    widen!(
        Int 8 => i8, Int 16 => i16, Int 32 => i32, Int 64 => i64,
        UInt 8 => u8, UInt 16 => u16, UInt 32 => u32, UInt 64 => u64
    )
}

fn check_devices(op: &str, lhs: &NdArray, rhs: &NdArray) -> ArrayResult<()> {
    lhs.ensure_cpu(op)?;
    rhs.ensure_cpu(op)
}

/// Broadcasts both operands and converts them to a shared dtype.
fn prepare(
    op: &str,
    lhs: &NdArray,
    rhs: Operand<'_>,
) -> ArrayResult<(NdArray, NdArray, Dims, DataType)> {
    let rhs = match rhs {
        Operand::Array(array) => array.clone(),
        Operand::Scalar(scalar) => scalar.to_array(lhs.dtype())?,
    };
    check_devices(op, lhs, &rhs)?;
    let out_shape = shape::broadcast_shapes(lhs.shape(), rhs.shape())?;
    let dtype = promote(lhs.dtype(), rhs.dtype())?;
    output_bytes(&out_shape, dtype)?;
    let lhs = cast(lhs, dtype)?.broadcast_to(&out_shape)?;
    let rhs = cast(&rhs, dtype)?.broadcast_to(&out_shape)?;
    Ok((lhs, rhs, out_shape, dtype))
}

fn arithmetic_kernel<T: Element>(
    lhs: &NdArray,
    rhs: &NdArray,
    out_shape: &[i64],
    op: BinaryOp,
) -> ArrayResult<NdArray> {
    let mut out = Vec::with_capacity(shape::numel(out_shape) as usize);
    for (lo, ro) in lhs.element_offsets().zip(rhs.element_offsets()) {
        let (a, b): (T, T) = unsafe { (lhs.read_unchecked(lo), rhs.read_unchecked(ro)) };
        let value = match op {
            BinaryOp::Add => a.add(b),
            BinaryOp::Subtract => a.sub(b),
            BinaryOp::Multiply => a.mul(b),
            BinaryOp::Divide => a
                .checked_div(b)
                .ok_or_else(|| ArrayError::value("integer division by zero"))?,
        };
        out.push(value);
    }
    NdArray::from_vec(out, out_shape)
}

fn compare_kernel<T: RealElement>(
    lhs: &NdArray,
    rhs: &NdArray,
    out_shape: &[i64],
    op: CompareOp,
) -> ArrayResult<NdArray> {
    let out = lhs
        .element_offsets()
        .zip(rhs.element_offsets())
        .map(|(lo, ro)| {
            let (a, b): (T, T) = unsafe { (lhs.read_unchecked(lo), rhs.read_unchecked(ro)) };
            let hit = match op {
                CompareOp::Less => a < b,
                CompareOp::Greater => a > b,
            };
            hit as u8
        })
        .collect();
    NdArray::from_bool_bytes(out, out_shape)
}

/// Applies `op` elementwise with broadcasting; the result takes the promoted dtype.
pub fn binary<'a>(lhs: &NdArray, rhs: impl Into<Operand<'a>>, op: BinaryOp) -> ArrayResult<NdArray> {
    let rhs = rhs.into();
    if let Operand::Array(other) = rhs {
        if lhs.dtype().is_bool() && other.dtype().is_bool() {
            return Err(ArrayError::type_error(format!(
                "{} is not defined for two bool arrays",
                op.name()
            )));
        }
    }
    let (lhs, rhs, out_shape, dtype) = prepare(op.name(), lhs, rhs)?;
    dispatch_numeric!(dtype, T => {
        arithmetic_kernel::<T>(&lhs, &rhs, &out_shape, op)
    }, else Err(ArrayError::type_error(format!("{} does not support {dtype}", op.name()))))
}

/// Compares elementwise with broadcasting, producing a bool array.
pub fn compare<'a>(lhs: &NdArray, rhs: impl Into<Operand<'a>>, op: CompareOp) -> ArrayResult<NdArray> {
    let (lhs, rhs, out_shape, dtype) = prepare(op.name(), lhs, rhs.into())?;
    if dtype.is_complex() {
        return Err(ArrayError::type_error(format!(
            "{} is not defined for complex values",
            op.name()
        )));
    }
    let dtype = if dtype.is_bool() { DataType::UINT8 } else { dtype };
    dispatch_real!(dtype, T => {
        compare_kernel::<T>(&lhs, &rhs, &out_shape, op)
    }, else Err(ArrayError::type_error(format!("{} does not support {dtype}", op.name()))))
}

/// Elementwise sum; integer results wrap.
pub fn add<'a>(lhs: &NdArray, rhs: impl Into<Operand<'a>>) -> ArrayResult<NdArray> {
    binary(lhs, rhs, BinaryOp::Add)
}

/// Elementwise difference; integer results wrap.
pub fn subtract<'a>(lhs: &NdArray, rhs: impl Into<Operand<'a>>) -> ArrayResult<NdArray> {
    binary(lhs, rhs, BinaryOp::Subtract)
}

/// Elementwise product; integer results wrap.
pub fn multiply<'a>(lhs: &NdArray, rhs: impl Into<Operand<'a>>) -> ArrayResult<NdArray> {
    binary(lhs, rhs, BinaryOp::Multiply)
}

/// Float division follows IEEE semantics; an integer zero divisor is a `ValueError`.
pub fn divide<'a>(lhs: &NdArray, rhs: impl Into<Operand<'a>>) -> ArrayResult<NdArray> {
    binary(lhs, rhs, BinaryOp::Divide)
}

/// Elementwise `lhs < rhs` as a bool array.
pub fn less_than<'a>(lhs: &NdArray, rhs: impl Into<Operand<'a>>) -> ArrayResult<NdArray> {
    compare(lhs, rhs, CompareOp::Less)
}

/// Elementwise `lhs > rhs` as a bool array.
pub fn greater_than<'a>(lhs: &NdArray, rhs: impl Into<Operand<'a>>) -> ArrayResult<NdArray> {
    compare(lhs, rhs, CompareOp::Greater)
}

/// Elementwise `x * x` in the input dtype.
pub fn square(array: &NdArray) -> ArrayResult<NdArray> {
    array.ensure_cpu("square")?;
    let dtype = array.dtype();
    dispatch_numeric!(dtype, T => {
        let out: Vec<T> = array.gather::<T>().into_iter().map(|x| x.mul(x)).collect();
        NdArray::from_vec(out, array.shape())
    }, else Err(ArrayError::type_error(format!("square does not support {dtype}"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_table() {
        let cases = [
            (DataType::INT32, DataType::INT64, DataType::INT64),
            (DataType::UINT8, DataType::INT8, DataType::INT16),
            (DataType::UINT64, DataType::INT32, DataType::INT64),
            (DataType::INT32, DataType::UINT16, DataType::INT32),
            (DataType::FLOAT32, DataType::INT8, DataType::FLOAT32),
            (DataType::FLOAT32, DataType::INT64, DataType::FLOAT64),
            (DataType::FLOAT16, DataType::FLOAT64, DataType::FLOAT64),
            (DataType::COMPLEX64, DataType::FLOAT64, DataType::COMPLEX128),
            (DataType::COMPLEX64, DataType::INT16, DataType::COMPLEX64),
            (DataType::BOOL, DataType::FLOAT32, DataType::FLOAT32),
            (DataType::BOOL, DataType::UINT8, DataType::UINT8),
        ];
        for (lhs, rhs, expected) in cases {
            assert_eq!(promote(lhs, rhs).unwrap(), expected, "{lhs} + {rhs}");
            assert_eq!(promote(rhs, lhs).unwrap(), expected, "{rhs} + {lhs}");
        }
    }

    #[test]
    fn scalar_must_fit_the_array_dtype() {
        assert!(Scalar::from(3i32).to_array(DataType::UINT8).is_ok());
        assert!(matches!(
            Scalar::from(300i32).to_array(DataType::UINT8),
            Err(ArrayError::Type(_))
        ));
        assert!(matches!(
            Scalar::from(1.5f32).to_array(DataType::INT32),
            Err(ArrayError::Type(_))
        ));
        assert!(matches!(
            Scalar::from(1u8).to_array(DataType::BOOL),
            Err(ArrayError::Type(_))
        ));
        let exact = Scalar::from(i64::MAX).to_array(DataType::INT64).unwrap();
        assert_eq!(exact.get::<i64>(&[]).unwrap(), i64::MAX);
    }

    #[test]
    fn integer_scalars_must_be_exact_in_float_arrays() {
        let floats = NdArray::from_vec(vec![0.0f32], &[1]).unwrap();
        assert!(matches!(add(&floats, 16_777_217i64), Err(ArrayError::Type(_))));
        assert_eq!(add(&floats, 16_777_216i64).unwrap().to_vec::<f32>().unwrap(), vec![16_777_216.0]);
        assert!(matches!(
            Scalar::from(u64::MAX).to_array(DataType::FLOAT64),
            Err(ArrayError::Type(_))
        ));
        assert!(matches!(
            Scalar::from(2049i32).to_array(DataType::FLOAT16),
            Err(ArrayError::Type(_))
        ));
        let complex = cast(&floats, DataType::COMPLEX64).unwrap();
        assert!(matches!(add(&complex, 16_777_217i64), Err(ArrayError::Type(_))));
        let rounded = add(&floats, 0.1f64).unwrap().to_vec::<f32>().unwrap();
        assert_eq!(rounded, vec![0.1f32]);
    }

    #[test]
    fn mixed_dtypes_are_promoted() {
        let ints = NdArray::from_vec(vec![1i32, 2, 3], &[3]).unwrap();
        let floats = NdArray::from_vec(vec![0.5f64, 0.5, 0.5], &[3]).unwrap();
        let out = add(&ints, &floats).unwrap();
        assert_eq!(out.dtype(), DataType::FLOAT64);
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn integer_arithmetic_wraps_and_rejects_zero_divisors() {
        let small = NdArray::from_vec(vec![250u8, 10], &[2]).unwrap();
        assert_eq!(add(&small, 10u8).unwrap().to_vec::<u8>().unwrap(), vec![4, 20]);
        assert!(matches!(divide(&small, 0u8), Err(ArrayError::Value(_))));
    }

    #[test]
    fn comparisons_produce_bool() {
        let values = NdArray::from_vec(vec![1.0f32, 5.0, 3.0], &[3]).unwrap();
        let mask = greater_than(&values, 2.0f32).unwrap();
        assert_eq!(mask.dtype(), DataType::BOOL);
        assert_eq!(mask.to_vec::<u8>().unwrap(), vec![0, 1, 1]);
        let complex = cast(&values, DataType::COMPLEX64).unwrap();
        assert!(matches!(less_than(&complex, &complex), Err(ArrayError::Type(_))));
    }

    #[test]
    fn bool_pairs_reject_arithmetic() {
        let flags = NdArray::from_bools(&[true, false], &[2]).unwrap();
        assert!(matches!(add(&flags, &flags), Err(ArrayError::Type(_))));
        assert_eq!(
            less_than(&flags, &flags).unwrap().to_vec::<u8>().unwrap(),
            vec![0, 0]
        );
    }

    #[test]
    fn square_keeps_dtype() {
        let values = NdArray::from_vec(vec![-2i16, 3], &[2]).unwrap();
        let squared = square(&values).unwrap();
        assert_eq!(squared.dtype(), DataType::INT16);
        assert_eq!(squared.to_vec::<i16>().unwrap(), vec![4, 9]);
    }
}

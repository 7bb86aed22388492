//! Axis reductions and descriptive statistics.
//!
//! Every reduction removes the reduced axes from the output shape. An empty axis list
//! reduces over the whole array and yields a rank-zero result. Statistics are accumulated
//! in `f64` and stored as `float64` for `float64` input and `float32` otherwise.

use std::cmp::Ordering;

use crate::error::{ArrayError, ArrayResult};
use crate::ops::dispatch::dispatch_real;
use crate::tensor::shape::{self, Dims, StridedOffsets};
use crate::tensor::{DataType, Element, NdArray, RealElement};

type Loader = fn(&NdArray, i64) -> f64;

fn load<T: RealElement>(array: &NdArray, offset: i64) -> f64 {
    unsafe { array.read_unchecked::<T>(offset) }.to_f64()
}

fn loader(array: &NdArray, op: &str, allow_bool: bool) -> ArrayResult<Loader> {
    let dtype = array.dtype();
    if dtype.is_bool() {
        if allow_bool {
            return Ok(load::<u8> as Loader);
        }
        return Err(ArrayError::type_error(format!("{op} does not support bool input")));
    }
    dispatch_real!(dtype, T => {
        Ok(load::<T> as Loader)
    }, else Err(ArrayError::type_error(format!("{op} does not support {dtype} input"))))
}

/// Offsets splitting an array into reduction groups.
///
/// Group `j` consists of the elements at `outer[j] + inner[k]` for every `k`; groups are
/// ordered like the row-major output.
struct Reduction {
    out_shape: Dims,
    outer: Vec<i64>,
    inner: Vec<i64>,
}

impl Reduction {
    fn plan(array: &NdArray, axes: &[i64], op: &str) -> ArrayResult<Self> {
        array.ensure_cpu(op)?;
        array.dtype().ensure_single_lane(op)?;
        let axes = shape::normalize_axes(axes, array.ndim())?;

        let mut kept_shape = Dims::new();
        let mut kept_strides = Dims::new();
        let mut reduced_shape = Dims::new();
        let mut reduced_strides = Dims::new();
        for (axis, (&dim, &stride)) in array.shape().iter().zip(array.strides()).enumerate() {
            if axes.contains(&axis) {
                reduced_shape.push(dim);
                reduced_strides.push(stride);
            } else {
                kept_shape.push(dim);
                kept_strides.push(stride);
            }
        }
        Ok(Reduction {
            outer: StridedOffsets::new(&kept_shape, &kept_strides, array.offset()).collect(),
            inner: StridedOffsets::new(&reduced_shape, &reduced_strides, 0).collect(),
            out_shape: kept_shape,
        })
    }

    fn require_nonempty(&self, op: &str) -> ArrayResult<()> {
        if self.inner.is_empty() {
            return Err(ArrayError::value(format!(
                "{op} over an axis of size zero has no identity"
            )));
        }
        Ok(())
    }
}

/// Applies `f` to the `f64` values of each reduction group.
fn map_groups<R>(
    array: &NdArray,
    axes: &[i64],
    op: &str,
    mut f: impl FnMut(&mut [f64]) -> R,
) -> ArrayResult<(Dims, Vec<R>)> {
    let plan = Reduction::plan(array, axes, op)?;
    let load = loader(array, op, false)?;
    plan.require_nonempty(op)?;
    let mut scratch = Vec::with_capacity(plan.inner.len());
    let mut out = Vec::with_capacity(plan.outer.len());
    for &base in &plan.outer {
        scratch.clear();
        scratch.extend(plan.inner.iter().map(|&offset| load(array, base + offset)));
        out.push(f(&mut scratch));
    }
    Ok((plan.out_shape, out))
}

/// Like [`map_groups`] but only passes the values whose mask entry is non-zero.
fn map_masked_groups<R>(
    array: &NdArray,
    mask: &NdArray,
    axes: &[i64],
    op: &str,
    mut f: impl FnMut(&mut [f64]) -> R,
) -> ArrayResult<(Dims, Vec<R>)> {
    if array.shape() != mask.shape() {
        return Err(ArrayError::shape(format!(
            "{op}: mask shape {:?} does not match array shape {:?}",
            mask.shape(),
            array.shape()
        )));
    }
    let plan = Reduction::plan(array, axes, op)?;
    let mask_plan = Reduction::plan(mask, axes, op)?;
    let load = loader(array, op, false)?;
    let load_mask = loader(mask, op, true)?;
    plan.require_nonempty(op)?;

    let mut scratch = Vec::with_capacity(plan.inner.len());
    let mut out = Vec::with_capacity(plan.outer.len());
    for (&base, &mask_base) in plan.outer.iter().zip(&mask_plan.outer) {
        scratch.clear();
        for (&offset, &mask_offset) in plan.inner.iter().zip(&mask_plan.inner) {
            if load_mask(mask, mask_base + mask_offset) != 0.0 {
                scratch.push(load(array, base + offset));
            }
        }
        out.push(f(&mut scratch));
    }
    Ok((plan.out_shape, out))
}

/// Output dtype of the statistical reductions for a given input dtype.
pub fn statistic_dtype(input: DataType) -> DataType {
    if input == DataType::FLOAT64 {
        DataType::FLOAT64
    } else {
        DataType::FLOAT32
    }
}

fn finish(values: Vec<f64>, out_shape: &[i64], input: DataType) -> ArrayResult<NdArray> {
    if statistic_dtype(input) == DataType::FLOAT64 {
        NdArray::from_vec(values, out_shape)
    } else {
        NdArray::from_vec(values.into_iter().map(|v| v as f32).collect(), out_shape)
    }
}

fn finish_pair(
    values: Vec<(f64, f64)>,
    out_shape: &[i64],
    input: DataType,
) -> ArrayResult<(NdArray, NdArray)> {
    let (first, second): (Vec<f64>, Vec<f64>) = values.into_iter().unzip();
    Ok((finish(first, out_shape, input)?, finish(second, out_shape, input)?))
}

fn mean_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance, dividing by N.
fn var_of(values: &[f64]) -> f64 {
    let mean = mean_of(values);
    mean_of_by(values, |x| (x - mean) * (x - mean))
}

fn mean_of_by(values: &[f64], f: impl Fn(f64) -> f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().map(|&x| f(x)).sum::<f64>() / values.len() as f64
}

fn median_of(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Sum over `axes` in the input dtype. Bool input counts the set entries as `int64`.
///
/// An empty reduced axis sums to zero.
pub fn sum(array: &NdArray, axes: &[i64]) -> ArrayResult<NdArray> {
    let plan = Reduction::plan(array, axes, "sum")?;
    let dtype = array.dtype();
    if dtype.is_bool() {
        let counts: Vec<i64> = plan
            .outer
            .iter()
            .map(|&base| {
                plan.inner
                    .iter()
                    .filter(|&&offset| unsafe { array.read_unchecked::<u8>(base + offset) } != 0)
                    .count() as i64
            })
            .collect();
        return NdArray::from_vec(counts, &plan.out_shape);
    }
    dispatch_real!(dtype, T => {
        let out: Vec<T> = plan
            .outer
            .iter()
            .map(|&base| {
                plan.inner.iter().fold(T::zero(), |acc, &offset| {
                    acc.add(unsafe { array.read_unchecked::<T>(base + offset) })
                })
            })
            .collect();
        NdArray::from_vec(out, &plan.out_shape)
    }, else Err(ArrayError::type_error(format!("sum does not support {dtype} input"))))
}

fn max_of<T: RealElement>(mut values: impl Iterator<Item = T>) -> Option<T> {
    let mut best = values.next()?;
    for value in values {
        if best.partial_cmp(&best).is_none() {
            break;
        }
        if value.partial_cmp(&value).is_none() || value.partial_cmp(&best) == Some(Ordering::Greater) {
            best = value;
        }
    }
    Some(best)
}

/// Maximum over `axes` in the input dtype; NaN propagates.
pub fn max(array: &NdArray, axes: &[i64]) -> ArrayResult<NdArray> {
    let plan = Reduction::plan(array, axes, "max")?;
    plan.require_nonempty("max")?;
    let dtype = array.dtype();
    dispatch_real!(dtype, T => {
        let out: Vec<T> = plan
            .outer
            .iter()
            .map(|&base| {
                max_of(plan.inner.iter().map(|&offset| unsafe {
                    array.read_unchecked::<T>(base + offset)
                }))
                .unwrap_or_default()
            })
            .collect();
        NdArray::from_vec(out, &plan.out_shape)
    }, else Err(ArrayError::type_error(format!("max does not support {dtype} input"))))
}

/// Arithmetic mean over `axes`.
pub fn mean(array: &NdArray, axes: &[i64]) -> ArrayResult<NdArray> {
    let (out_shape, values) = map_groups(array, axes, "mean", |group| mean_of(group))?;
    finish(values, &out_shape, array.dtype())
}

/// Median over `axes`; even-sized groups average the two middle values.
pub fn median(array: &NdArray, axes: &[i64]) -> ArrayResult<NdArray> {
    let (out_shape, values) = map_groups(array, axes, "median", median_of)?;
    finish(values, &out_shape, array.dtype())
}

/// Population variance over `axes`.
pub fn var(array: &NdArray, axes: &[i64]) -> ArrayResult<NdArray> {
    let (out_shape, values) = map_groups(array, axes, "var", |group| var_of(group))?;
    finish(values, &out_shape, array.dtype())
}

/// Population standard deviation over `axes`.
pub fn stddev(array: &NdArray, axes: &[i64]) -> ArrayResult<NdArray> {
    let (out_shape, values) = map_groups(array, axes, "stddev", |group| var_of(group).sqrt())?;
    finish(values, &out_shape, array.dtype())
}

/// Mean and population standard deviation in a single pass over the groups.
pub fn mean_stddev(array: &NdArray, axes: &[i64]) -> ArrayResult<(NdArray, NdArray)> {
    let (out_shape, values) = map_groups(array, axes, "mean_stddev", |group| {
        (mean_of(group), var_of(group).sqrt())
    })?;
    finish_pair(values, &out_shape, array.dtype())
}

/// Mean of the entries whose mask value is non-zero; fully masked groups yield NaN.
pub fn masked_mean(array: &NdArray, mask: &NdArray, axes: &[i64]) -> ArrayResult<NdArray> {
    let (out_shape, values) =
        map_masked_groups(array, mask, axes, "masked_mean", |group| mean_of(group))?;
    finish(values, &out_shape, array.dtype())
}

/// Population standard deviation of the unmasked entries; fully masked groups yield NaN.
pub fn masked_stddev(array: &NdArray, mask: &NdArray, axes: &[i64]) -> ArrayResult<NdArray> {
    let (out_shape, values) =
        map_masked_groups(array, mask, axes, "masked_stddev", |group| var_of(group).sqrt())?;
    finish(values, &out_shape, array.dtype())
}

/// [`masked_mean`] and [`masked_stddev`] in a single pass over the groups.
pub fn masked_mean_stddev(
    array: &NdArray,
    mask: &NdArray,
    axes: &[i64],
) -> ArrayResult<(NdArray, NdArray)> {
    let (out_shape, values) = map_masked_groups(array, mask, axes, "masked_mean_stddev", |group| {
        (mean_of(group), var_of(group).sqrt())
    })?;
    finish_pair(values, &out_shape, array.dtype())
}

/// `E[((x - mean) / stddev)^degree]` over `axes`. Degree 3 is skewness, 4 is kurtosis.
pub fn standardized_moment(array: &NdArray, degree: i32, axes: &[i64]) -> ArrayResult<NdArray> {
    if degree < 1 {
        return Err(ArrayError::value(format!(
            "standardized moment degree must be at least 1, got {degree}"
        )));
    }
    let (out_shape, values) = map_groups(array, axes, "standardized_moment", |group| {
        let mean = mean_of(group);
        let std = var_of(group).sqrt();
        mean_of_by(group, |x| ((x - mean) / std).powi(degree))
    })?;
    finish(values, &out_shape, array.dtype())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> NdArray {
        NdArray::from_vec((1..=6).map(|v| v as f32).collect(), &[2, 3]).unwrap()
    }

    #[test]
    fn sum_keeps_dtype_and_drops_axes() {
        let rows = sum(&grid(), &[1]).unwrap();
        assert_eq!(rows.shape(), &[2]);
        assert_eq!(rows.dtype(), DataType::FLOAT32);
        assert_eq!(rows.to_vec::<f32>().unwrap(), vec![6.0, 15.0]);
        let total = sum(&grid(), &[]).unwrap();
        assert_eq!(total.ndim(), 0);
        assert_eq!(total.get::<f32>(&[]).unwrap(), 21.0);
    }

    #[test]
    fn sum_of_empty_axis_is_zero_but_mean_is_not_defined() {
        let empty = NdArray::zeros(&[3, 0], DataType::INT32).unwrap();
        assert_eq!(sum(&empty, &[1]).unwrap().to_vec::<i32>().unwrap(), vec![0, 0, 0]);
        assert!(matches!(mean(&empty, &[1]), Err(ArrayError::Value(_))));
    }

    #[test]
    fn sum_counts_bools() {
        let flags = NdArray::from_bools(&[true, false, true], &[3]).unwrap();
        let count = sum(&flags, &[0]).unwrap();
        assert_eq!(count.dtype(), DataType::INT64);
        assert_eq!(count.get::<i64>(&[]).unwrap(), 2);
    }

    #[test]
    fn axis_validation() {
        assert!(matches!(sum(&grid(), &[2]), Err(ArrayError::Index(_))));
        assert!(matches!(sum(&grid(), &[1, -1]), Err(ArrayError::Value(_))));
    }

    #[test]
    fn statistics_on_a_strided_view() {
        let columns = crate::tensor::slice(&grid(), 1, 0, 3, 2).unwrap();
        let means = mean(&columns, &[0]).unwrap();
        assert_eq!(means.to_vec::<f32>().unwrap(), vec![2.5, 4.5]);
        let spread = stddev(&columns, &[0]).unwrap();
        assert_eq!(spread.to_vec::<f32>().unwrap(), vec![1.5, 1.5]);
    }

    #[test]
    fn median_averages_even_groups() {
        let values = NdArray::from_vec(vec![4.0f64, 1.0, 3.0, 2.0], &[4]).unwrap();
        let mid = median(&values, &[]).unwrap();
        assert_eq!(mid.dtype(), DataType::FLOAT64);
        assert_eq!(mid.get::<f64>(&[]).unwrap(), 2.5);
    }

    #[test]
    fn max_propagates_nan() {
        let values = NdArray::from_vec(vec![1.0f32, f32::NAN, 3.0], &[3]).unwrap();
        assert!(max(&values, &[]).unwrap().get::<f32>(&[]).unwrap().is_nan());
        let ints = NdArray::from_vec(vec![-5i8, 7, 2], &[3]).unwrap();
        assert_eq!(max(&ints, &[0]).unwrap().get::<i8>(&[]).unwrap(), 7);
    }

    #[test]
    fn fully_masked_group_is_nan() {
        let mask = NdArray::from_bools(&[true, true, false, false, false, false], &[2, 3]).unwrap();
        let means = masked_mean(&grid(), &mask, &[1]).unwrap();
        let values = means.to_vec::<f32>().unwrap();
        assert_eq!(values[0], 1.5);
        assert!(values[1].is_nan());

        let spread = masked_stddev(&grid(), &mask, &[1]).unwrap().to_vec::<f32>().unwrap();
        assert_eq!(spread[0], 0.5);
        assert!(spread[1].is_nan());

        let (means, spread) = masked_mean_stddev(&grid(), &mask, &[1]).unwrap();
        let (means, spread) = (means.to_vec::<f32>().unwrap(), spread.to_vec::<f32>().unwrap());
        assert_eq!((means[0], spread[0]), (1.5, 0.5));
        assert!(means[1].is_nan() && spread[1].is_nan());
    }

    #[test]
    fn complex_input_is_rejected() {
        let values = NdArray::zeros(&[2], DataType::COMPLEX64).unwrap();
        assert!(matches!(mean(&values, &[]), Err(ArrayError::Type(_))));
        assert!(matches!(sum(&values, &[]), Err(ArrayError::Type(_))));
    }

    #[test]
    fn moment_degree_must_be_positive() {
        assert!(matches!(
            standardized_moment(&grid(), 0, &[]),
            Err(ArrayError::Value(_))
        ));
        let first = standardized_moment(&grid(), 1, &[]).unwrap();
        assert!(first.get::<f32>(&[]).unwrap().abs() < 1e-6);
        let second = standardized_moment(&grid(), 2, &[]).unwrap();
        assert!((second.get::<f32>(&[]).unwrap() - 1.0).abs() < 1e-6);
    }
}

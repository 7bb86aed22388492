//! Array generators: ranges and random fills.

use rand::Rng;

use crate::error::{ArrayError, ArrayResult};
use crate::tensor::storage::output_bytes;
use crate::tensor::{DataType, NdArray};

const MAX_SAMPLES: f64 = (isize::MAX / 4) as f64;

/// `float32` samples `start, start + step, ...` strictly below `end` (above for negative steps).
pub fn arange(start: f32, end: f32, step: f32) -> ArrayResult<NdArray> {
    if step == 0.0 {
        return Err(ArrayError::value("arange step cannot be zero"));
    }
    if !(start.is_finite() && end.is_finite() && step.is_finite()) {
        return Err(ArrayError::value(format!(
            "arange bounds must be finite, got start={start} end={end} step={step}"
        )));
    }
    let samples = ((end as f64 - start as f64) / step as f64).ceil().max(0.0);
    if samples > MAX_SAMPLES {
        return Err(ArrayError::value(format!(
            "arange({start}, {end}, {step}) would produce {samples} samples"
        )));
    }
    let count = samples as usize;
    output_bytes(&[count as i64], DataType::FLOAT32)?;
    let values: Vec<f32> = (0..count)
        .map(|i| (start as f64 + i as f64 * step as f64) as f32)
        .collect();
    NdArray::from_vec(values, &[count as i64])
}

/// `count` evenly spaced `float32` samples from `start` to `end`, both included.
pub fn linspace(start: f32, end: f32, count: usize) -> ArrayResult<NdArray> {
    if count == 0 {
        return Err(ArrayError::value("linspace needs at least one sample"));
    }
    let samples = i64::try_from(count)
        .map_err(|_| ArrayError::value(format!("linspace cannot produce {count} samples")))?;
    output_bytes(&[samples], DataType::FLOAT32)?;
    if count == 1 {
        return NdArray::from_vec(vec![start], &[1]);
    }
    let delta = (end as f64 - start as f64) / (count - 1) as f64;
    let mut values: Vec<f32> = (0..count)
        .map(|i| (start as f64 + i as f64 * delta) as f32)
        .collect();
    values[count - 1] = end;
    NdArray::from_vec(values, &[samples])
}

/// `float32` samples drawn uniformly from `[low, high)`.
pub fn uniform(shape: &[i64], low: f32, high: f32, rng: &mut impl Rng) -> ArrayResult<NdArray> {
    let len = output_bytes(shape, DataType::FLOAT32)? / 4;
    if !(low.is_finite() && high.is_finite()) || low > high {
        return Err(ArrayError::value(format!(
            "uniform needs finite bounds with low <= high, got [{low}, {high})"
        )));
    }
    let values: Vec<f32> = (0..len)
        .map(|_| low + (high - low) * rng.gen::<f32>())
        .collect();
    NdArray::from_vec(values, shape)
}

/// `float32` samples from a normal distribution, generated in Box-Muller pairs.
pub fn normal(shape: &[i64], mean: f32, std: f32, rng: &mut impl Rng) -> ArrayResult<NdArray> {
    let len = output_bytes(shape, DataType::FLOAT32)? / 4;
    if !(std >= 0.0 && std.is_finite() && mean.is_finite()) {
        return Err(ArrayError::value(format!(
            "normal needs a finite mean and a non-negative std, got mean={mean} std={std}"
        )));
    }
    let mut values = Vec::with_capacity(len);
    while values.len() < len {
        let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
        let u2: f32 = rng.gen::<f32>();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f32::consts::PI * u2;
        values.push(mean + r * theta.cos() * std);
        if values.len() < len {
            values.push(mean + r * theta.sin() * std);
        }
    }
    NdArray::from_vec(values, shape)
}

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spectra::{
    masked_mean, masked_mean_stddev, masked_stddev, max, mean, mean_stddev, median,
    standardized_moment, stddev, sum, var, ArrayError, DataType, NdArray,
};

fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn sum_over_one_axis_and_over_everything() -> Result<()> {
    let ones = NdArray::ones(&[2, 3], DataType::FLOAT32)?;
    let rows = sum(&ones, &[1])?;
    assert_eq!(rows.shape(), &[2]);
    assert_eq!(rows.to_vec::<f32>()?, vec![3.0, 3.0]);
    let total = sum(&ones, &[])?;
    assert_eq!(total.shape(), &[] as &[i64]);
    assert_eq!(total.get::<f32>(&[])?, 6.0);
    Ok(())
}

#[test]
fn masked_mean_skips_unselected_entries() -> Result<()> {
    let values = NdArray::from_vec(vec![1.0f32, 2.0, 3.0, 100.0], &[4])?;
    let mask = NdArray::from_bools(&[true, true, true, false], &[4])?;
    let result = masked_mean(&values, &mask, &[])?;
    assert_eq!(result.get::<f32>(&[])?, 2.0);

    let numeric_mask = NdArray::from_vec(vec![1u8, 1, 1, 0], &[4])?;
    assert_eq!(masked_mean(&values, &numeric_mask, &[0])?.get::<f32>(&[])?, 2.0);
    Ok(())
}

#[test]
fn masked_statistics_validate_the_mask_shape() -> Result<()> {
    let values = NdArray::zeros(&[2, 3], DataType::FLOAT64)?;
    let mask = NdArray::ones(&[3], DataType::BOOL)?;
    assert!(matches!(masked_stddev(&values, &mask, &[]), Err(ArrayError::Shape(_))));
    Ok(())
}

#[test]
fn masked_mean_stddev_matches_the_separate_calls() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(3);
    let data: Vec<f64> = (0..24).map(|_| rng.gen_range(-5.0..5.0)).collect();
    let flags: Vec<bool> = (0..24).map(|i| i % 3 != 0).collect();
    let values = NdArray::from_vec(data, &[4, 6])?;
    let mask = NdArray::from_bools(&flags, &[4, 6])?;

    let (means, spreads) = masked_mean_stddev(&values, &mask, &[1])?;
    assert_eq!(means.dtype(), DataType::FLOAT64);
    assert_eq!(means.to_vec::<f64>()?, masked_mean(&values, &mask, &[1])?.to_vec::<f64>()?);
    assert_eq!(spreads.to_vec::<f64>()?, masked_stddev(&values, &mask, &[1])?.to_vec::<f64>()?);
    Ok(())
}

#[test]
fn population_statistics() -> Result<()> {
    let values = NdArray::from_vec(vec![2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], &[8])?;
    assert_close(mean(&values, &[])?.get::<f64>(&[])?, 5.0, 1e-12);
    assert_close(var(&values, &[])?.get::<f64>(&[])?, 4.0, 1e-12);
    assert_close(stddev(&values, &[])?.get::<f64>(&[])?, 2.0, 1e-12);
    assert_close(median(&values, &[])?.get::<f64>(&[])?, 4.5, 1e-12);
    let (m, s) = mean_stddev(&values, &[0])?;
    assert_close(m.get::<f64>(&[])?, 5.0, 1e-12);
    assert_close(s.get::<f64>(&[])?, 2.0, 1e-12);
    Ok(())
}

#[test]
fn integer_statistics_are_float32() -> Result<()> {
    let values = NdArray::from_vec(vec![1i32, 2, 3, 4], &[2, 2])?;
    let means = mean(&values, &[0])?;
    assert_eq!(means.dtype(), DataType::FLOAT32);
    assert_eq!(means.to_vec::<f32>()?, vec![2.0, 3.0]);
    let peak = max(&values, &[1])?;
    assert_eq!(peak.dtype(), DataType::INT32);
    assert_eq!(peak.to_vec::<i32>()?, vec![2, 4]);
    Ok(())
}

#[test]
fn multiple_axes_reduce_together() -> Result<()> {
    let values = NdArray::from_vec((0..24).collect::<Vec<i64>>(), &[2, 3, 4])?;
    let outer = sum(&values, &[0, 2])?;
    assert_eq!(outer.shape(), &[3]);
    assert_eq!(outer.to_vec::<i64>()?, vec![60, 92, 124]);
    let negative = sum(&values, &[-1, -3])?;
    assert_eq!(negative.to_vec::<i64>()?, outer.to_vec::<i64>()?);
    Ok(())
}

#[test]
fn standardized_moments_of_a_symmetric_sample() -> Result<()> {
    let values = NdArray::from_vec(vec![-2.0f64, -1.0, 0.0, 1.0, 2.0], &[5])?;
    assert_close(standardized_moment(&values, 3, &[])?.get::<f64>(&[])?, 0.0, 1e-12);
    assert_close(standardized_moment(&values, 4, &[])?.get::<f64>(&[])?, 1.7, 1e-12);
    assert!(matches!(
        standardized_moment(&values, -1, &[]),
        Err(ArrayError::Value(_))
    ));
    Ok(())
}

#[test]
fn empty_axis_rules() -> Result<()> {
    let empty = NdArray::zeros(&[0, 2], DataType::FLOAT32)?;
    assert_eq!(sum(&empty, &[0])?.to_vec::<f32>()?, vec![0.0, 0.0]);
    assert!(matches!(max(&empty, &[0]), Err(ArrayError::Value(_))));
    assert!(matches!(median(&empty, &[0]), Err(ArrayError::Value(_))));
    Ok(())
}

use anyhow::Result;
use spectra::{
    add, divide, greater_than, less_than, multiply, slice, square, subtract, ArrayError,
    DataType, NdArray, Scalar,
};

#[test]
fn column_plus_row_broadcasts_to_a_grid() -> Result<()> {
    let column = NdArray::ones(&[3, 1], DataType::FLOAT32)?;
    let row = NdArray::ones(&[1, 4], DataType::FLOAT32)?;
    let grid = add(&column, &row)?;
    assert_eq!(grid.shape(), &[3, 4]);
    assert_eq!(grid.to_vec::<f32>()?, vec![2.0; 12]);
    Ok(())
}

#[test]
fn incompatible_trailing_axes_are_a_shape_error() -> Result<()> {
    let lhs = NdArray::zeros(&[3, 4], DataType::FLOAT32)?;
    let rhs = NdArray::zeros(&[5], DataType::FLOAT32)?;
    assert!(matches!(add(&lhs, &rhs), Err(ArrayError::Shape(_))));
    Ok(())
}

#[test]
fn missing_leading_axes_stretch() -> Result<()> {
    let matrix = NdArray::from_vec(vec![1i32, 2, 3, 4, 5, 6], &[2, 3])?;
    let row = NdArray::from_vec(vec![10i32, 20, 30], &[3])?;
    let sums = add(&matrix, &row)?;
    assert_eq!(sums.to_vec::<i32>()?, vec![11, 22, 33, 14, 25, 36]);
    let products = multiply(&row, &matrix)?;
    assert_eq!(products.to_vec::<i32>()?, vec![10, 40, 90, 40, 100, 180]);
    Ok(())
}

#[test]
fn strided_operands_are_read_through_their_layout() -> Result<()> {
    let values = NdArray::from_vec((0..8).map(|v| v as f64).collect(), &[8])?;
    let evens = slice(&values, 0, 0, 8, 2)?;
    let odds = slice(&values, 0, 1, 8, 2)?;
    let diff = subtract(&odds, &evens)?;
    assert_eq!(diff.to_vec::<f64>()?, vec![1.0; 4]);
    Ok(())
}

#[test]
fn scalars_adopt_the_array_dtype() -> Result<()> {
    let bytes = NdArray::from_vec(vec![2u8, 4, 6], &[3])?;
    let halved = divide(&bytes, 2i32)?;
    assert_eq!(halved.dtype(), DataType::UINT8);
    assert_eq!(halved.to_vec::<u8>()?, vec![1, 2, 3]);
    assert!(matches!(add(&bytes, 0.5f64), Err(ArrayError::Type(_))));
    assert!(matches!(add(&bytes, Scalar::I64(-1)), Err(ArrayError::Type(_))));

    let floats = NdArray::from_vec(vec![1.0f32, 2.0], &[2])?;
    let scaled = multiply(&floats, 0.5f64)?;
    assert_eq!(scaled.dtype(), DataType::FLOAT32);
    assert_eq!(scaled.to_vec::<f32>()?, vec![0.5, 1.0]);
    Ok(())
}

#[test]
fn comparisons_broadcast_and_return_bool() -> Result<()> {
    let values = NdArray::from_vec(vec![1i64, 5, 3, 7], &[2, 2])?;
    let threshold = NdArray::from_vec(vec![2i64, 6], &[2])?;
    let below = less_than(&values, &threshold)?;
    assert_eq!(below.dtype(), DataType::BOOL);
    assert_eq!(below.to_vec::<u8>()?, vec![1, 1, 0, 0]);
    let above = greater_than(&values, 4i64)?;
    assert_eq!(above.to_vec::<u8>()?, vec![0, 1, 0, 1]);
    Ok(())
}

#[test]
fn float_division_by_zero_follows_ieee() -> Result<()> {
    let values = NdArray::from_vec(vec![1.0f32, -1.0, 0.0], &[3])?;
    let out = divide(&values, 0.0f32)?.to_vec::<f32>()?;
    assert_eq!(out[0], f32::INFINITY);
    assert_eq!(out[1], f32::NEG_INFINITY);
    assert!(out[2].is_nan());
    Ok(())
}

#[test]
fn square_and_promotion_across_kinds() -> Result<()> {
    let ints = NdArray::from_vec(vec![1i8, -2, 3], &[3])?;
    let halves = NdArray::from_vec(vec![0.5f32; 3], &[3])?;
    let mixed = add(&square(&ints)?, &halves)?;
    assert_eq!(mixed.dtype(), DataType::FLOAT32);
    assert_eq!(mixed.to_vec::<f32>()?, vec![1.5, 4.5, 9.5]);
    Ok(())
}

use std::f64::consts::PI;

use anyhow::Result;
use num_complex::{Complex32, Complex64};
use spectra::{fft, fft_shift_mag_square, slice, ArrayError, DataType, NdArray};

fn tone(n: usize, bin: usize) -> Vec<f64> {
    (0..n)
        .map(|t| (2.0 * PI * bin as f64 * t as f64 / n as f64).cos())
        .collect()
}

#[test]
fn pure_tone_lands_in_its_bins() -> Result<()> {
    for n in [16usize, 12] {
        let signal = NdArray::from_vec(tone(n, 3), &[n as i64])?;
        let spectrum = fft(&signal)?;
        assert_eq!(spectrum.dtype(), DataType::COMPLEX128);
        let bins = spectrum.to_vec::<Complex64>()?;
        for (k, z) in bins.iter().enumerate() {
            let expected = if k == 3 || k == n - 3 { n as f64 / 2.0 } else { 0.0 };
            assert!((z.re - expected).abs() < 1e-9, "n={n} bin {k}: {z}");
            assert!(z.im.abs() < 1e-9, "n={n} bin {k}: {z}");
        }
    }
    Ok(())
}

#[test]
fn transform_runs_along_the_last_axis_of_every_row() -> Result<()> {
    let mut data = vec![0.0f32; 15];
    data[0] = 1.0;
    data[5] = 2.0;
    data[11] = 1.0;
    let signal = NdArray::from_vec(data, &[3, 5])?;
    let spectrum = fft(&signal)?;
    assert_eq!(spectrum.shape(), &[3, 5]);
    assert_eq!(spectrum.dtype(), DataType::COMPLEX64);
    let bins = spectrum.to_vec::<Complex32>()?;
    for k in 0..5 {
        assert!((bins[k] - Complex32::new(1.0, 0.0)).norm() < 1e-5);
        assert!((bins[5 + k] - Complex32::new(2.0, 0.0)).norm() < 1e-5);
        let angle = -2.0 * std::f32::consts::PI * k as f32 / 5.0;
        assert!((bins[10 + k] - Complex32::from_polar(1.0, angle)).norm() < 1e-5);
    }
    Ok(())
}

#[test]
fn strided_input_is_transformed_by_value() -> Result<()> {
    let data: Vec<f64> = tone(16, 2).into_iter().flat_map(|v| [v, 99.0]).collect();
    let interleaved = NdArray::from_vec(data, &[32])?;
    let samples = slice(&interleaved, 0, 0, 32, 2)?;
    let direct = NdArray::from_vec(tone(16, 2), &[16])?;
    assert_eq!(
        fft(&samples)?.to_vec::<Complex64>()?,
        fft(&direct)?.to_vec::<Complex64>()?
    );
    Ok(())
}

#[test]
fn shifted_power_spectrum_is_real_and_centred() -> Result<()> {
    let n = 8usize;
    let signal = NdArray::from_vec(tone(n, 1), &[n as i64])?;
    let power = fft_shift_mag_square(&signal)?;
    assert_eq!(power.dtype(), DataType::FLOAT64);
    let values = power.to_vec::<f64>()?;
    // Bins 1 and n-1 move to n/2 + 1 and n/2 - 1.
    for (i, p) in values.iter().enumerate() {
        let expected = if i == 3 || i == 5 { 16.0 } else { 0.0 };
        assert!((p - expected).abs() < 1e-9, "bin {i}: {p}");
    }
    Ok(())
}

#[test]
fn invalid_inputs() -> Result<()> {
    assert!(matches!(fft(&NdArray::scalar(1.0f64)), Err(ArrayError::Index(_))));
    let flags = NdArray::ones(&[4], DataType::BOOL)?;
    assert!(matches!(fft_shift_mag_square(&flags), Err(ArrayError::Type(_))));
    Ok(())
}

//! Discrete Fourier transforms along the last axis.
//!
//! Power-of-two lengths use an iterative radix-2 Cooley-Tukey transform. Other lengths go
//! through Bluestein's chirp-z algorithm, which re-expresses the DFT as a convolution of
//! power-of-two length. All arithmetic is carried out in double precision.

use std::f64::consts::PI;

use num_complex::{Complex32, Complex64};
use num_traits::Zero;

use crate::error::{ArrayError, ArrayResult};
use crate::tensor::{DataType, NdArray};

/// Output dtype of [`fft`] for a given input dtype.
pub fn spectrum_dtype(input: DataType) -> DataType {
    if input == DataType::FLOAT64 || input == DataType::COMPLEX128 {
        DataType::COMPLEX128
    } else {
        DataType::COMPLEX64
    }
}

fn bit_reverse_permute(buf: &mut [Complex64]) {
    let n = buf.len();
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buf.swap(i, j);
        }
    }
}

/// In-place radix-2 transform; `buf.len()` must be a power of two.
fn radix2(buf: &mut [Complex64], inverse: bool) {
    let n = buf.len();
    if n <= 1 {
        return;
    }
    bit_reverse_permute(buf);
    let sign = if inverse { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let step = Complex64::from_polar(1.0, sign * 2.0 * PI / len as f64);
        for chunk in buf.chunks_exact_mut(len) {
            let (lo, hi) = chunk.split_at_mut(len / 2);
            let mut twiddle = Complex64::new(1.0, 0.0);
            for (a, b) in lo.iter_mut().zip(hi.iter_mut()) {
                let t = *b * twiddle;
                *b = *a - t;
                *a += t;
                twiddle *= step;
            }
        }
        len <<= 1;
    }
    if inverse {
        let scale = 1.0 / n as f64;
        for value in buf.iter_mut() {
            *value *= scale;
        }
    }
}

/// Arbitrary-length DFT via Bluestein's algorithm.
fn bluestein(buf: &mut [Complex64]) {
    let n = buf.len();
    let m = (2 * n - 1).next_power_of_two();
    // exp(-i*pi*k^2/n), with k^2 reduced mod 2n to keep the angle small.
    let chirp: Vec<Complex64> = (0..n)
        .map(|k| {
            let k2 = (k as u128 * k as u128 % (2 * n as u128)) as f64;
            Complex64::from_polar(1.0, -PI * k2 / n as f64)
        })
        .collect();

    let mut a = vec![Complex64::zero(); m];
    for ((slot, &x), &w) in a.iter_mut().zip(buf.iter()).zip(&chirp) {
        *slot = x * w;
    }
    let mut b = vec![Complex64::zero(); m];
    b[0] = chirp[0].conj();
    for k in 1..n {
        b[k] = chirp[k].conj();
        b[m - k] = chirp[k].conj();
    }

    radix2(&mut a, false);
    radix2(&mut b, false);
    for (x, &y) in a.iter_mut().zip(&b) {
        *x *= y;
    }
    radix2(&mut a, true);

    for ((out, &conv), &w) in buf.iter_mut().zip(&a).zip(&chirp) {
        *out = conv * w;
    }
}

fn transform(buf: &mut [Complex64]) {
    if buf.len().is_power_of_two() {
        radix2(buf, false);
    } else if !buf.is_empty() {
        bluestein(buf);
    }
}

/// Row-major spectrum of every last-axis lane, in double precision.
fn spectrum(array: &NdArray, op: &str) -> ArrayResult<Vec<Complex64>> {
    if array.ndim() == 0 {
        return Err(ArrayError::index(format!(
            "{op} needs at least one axis to transform"
        )));
    }
    let mut values = array.gather_c64(op)?;
    let n = array.shape()[array.ndim() - 1] as usize;
    if n > 0 {
        for lane in values.chunks_exact_mut(n) {
            transform(lane);
        }
    }
    Ok(values)
}

/// Discrete Fourier transform along the last axis.
///
/// The output is `complex128` for `float64` and `complex128` input, `complex64` otherwise.
pub fn fft(array: &NdArray) -> ArrayResult<NdArray> {
    let values = spectrum(array, "fft")?;
    if spectrum_dtype(array.dtype()) == DataType::COMPLEX128 {
        NdArray::from_vec(values, array.shape())
    } else {
        let narrowed: Vec<Complex32> = values
            .into_iter()
            .map(|z| Complex32::new(z.re as f32, z.im as f32))
            .collect();
        NdArray::from_vec(narrowed, array.shape())
    }
}

/// Power spectrum with the zero frequency moved to the centre of the last axis.
///
/// Bin `i` of the transform lands at `(i + n/2) mod n` and is replaced by `|X[i]|^2`.
pub fn fft_shift_mag_square(array: &NdArray) -> ArrayResult<NdArray> {
    let values = spectrum(array, "fft_shift_mag_square")?;
    let n = array.shape()[array.ndim() - 1] as usize;
    let mut power = vec![0.0f64; values.len()];
    if n > 0 {
        for (lane, out) in values.chunks_exact(n).zip(power.chunks_exact_mut(n)) {
            for (i, z) in lane.iter().enumerate() {
                out[(i + n / 2) % n] = z.norm_sqr();
            }
        }
    }
    if spectrum_dtype(array.dtype()) == DataType::COMPLEX128 {
        NdArray::from_vec(power, array.shape())
    } else {
        NdArray::from_vec(power.into_iter().map(|p| p as f32).collect(), array.shape())
    }
}

//! Shape, stride, and axis bookkeeping shared by views and kernels.

use smallvec::SmallVec;

use crate::error::{ArrayError, ArrayResult};

/// Inline storage for per-axis metadata; most arrays have rank four or less.
pub type Dims = SmallVec<[i64; 4]>;

/// Total element count implied by `shape` (1 for rank zero).
///
/// Callers pass shapes that already went through [`validate_shape`], which rules out overflow.
pub fn numel(shape: &[i64]) -> i64 {
    shape.iter().product()
}

/// Row-major byte strides for `shape` with elements of `elem_size` bytes.
pub fn contiguous_strides(shape: &[i64], elem_size: usize) -> ArrayResult<Dims> {
    let mut strides: Dims = SmallVec::from_elem(0, shape.len());
    let mut acc = i64::try_from(elem_size)
        .map_err(|_| ArrayError::shape(format!("element size {elem_size} is too large")))?;
    for (i, dim) in shape.iter().enumerate().rev() {
        strides[i] = acc;
        acc = acc.checked_mul((*dim).max(1)).ok_or_else(|| {
            ArrayError::shape(format!(
                "strides of shape {shape:?} overflow with {elem_size}-byte elements"
            ))
        })?;
    }
    Ok(strides)
}

/// Rejects negative dimensions and shapes whose extent does not fit in an `i64`.
pub fn validate_shape(shape: &[i64]) -> ArrayResult<()> {
    if let Some(dim) = shape.iter().find(|d| **d < 0) {
        return Err(ArrayError::shape(format!(
            "negative dimension {dim} in shape {shape:?}"
        )));
    }
    shape
        .iter()
        .try_fold(1i64, |acc, &dim| acc.checked_mul(dim.max(1)))
        .ok_or_else(|| ArrayError::shape(format!("shape {shape:?} is too large")))?;
    Ok(())
}

/// Bytes needed to store `shape` contiguously with `elem_size`-byte elements.
pub fn byte_size(shape: &[i64], elem_size: usize) -> ArrayResult<usize> {
    validate_shape(shape)?;
    numel(shape)
        .checked_mul(elem_size as i64)
        .and_then(|bytes| usize::try_from(bytes).ok())
        .filter(|&bytes| bytes <= isize::MAX as usize)
        .ok_or_else(|| {
            ArrayError::shape(format!(
                "shape {shape:?} with {elem_size}-byte elements exceeds the address space"
            ))
        })
}

/// Broadcasts two shapes from the trailing axis; absent axes count as size 1.
pub fn broadcast_shapes(lhs: &[i64], rhs: &[i64]) -> ArrayResult<Dims> {
    let ndim = lhs.len().max(rhs.len());
    let mut result: Dims = SmallVec::from_elem(0, ndim);
    for i in 0..ndim {
        let d1 = if i < ndim - lhs.len() {
            1
        } else {
            lhs[i - (ndim - lhs.len())]
        };
        let d2 = if i < ndim - rhs.len() {
            1
        } else {
            rhs[i - (ndim - rhs.len())]
        };
        result[i] = if d1 == d2 {
            d1
        } else if d1 == 1 {
            d2
        } else if d2 == 1 {
            d1
        } else {
            return Err(ArrayError::shape(format!(
                "shapes {lhs:?} and {rhs:?} cannot be broadcast together (axis {i}: {d1} vs {d2})"
            )));
        };
    }
    Ok(result)
}

/// Strides that read an array of `shape` as if it had `target` shape.
///
/// Stretched and prepended axes get a stride of zero. `target` must be a valid broadcast
/// of `shape`.
pub fn broadcast_strides(shape: &[i64], strides: &[i64], target: &[i64]) -> Dims {
    let offset = target.len() - shape.len();
    let mut result: Dims = SmallVec::from_elem(0, target.len());
    for i in 0..shape.len() {
        if shape[i] == target[offset + i] {
            result[offset + i] = strides[i];
        }
    }
    result
}

/// Resolves a possibly negative axis against `ndim`.
pub fn normalize_axis(axis: i64, ndim: usize) -> ArrayResult<usize> {
    let rank = ndim as i64;
    let resolved = if axis < 0 { axis + rank } else { axis };
    if resolved < 0 || resolved >= rank {
        return Err(ArrayError::index(format!(
            "axis {axis} is out of range for an array of rank {ndim}"
        )));
    }
    Ok(resolved as usize)
}

/// Resolves a reduction axis list; an empty list selects every axis.
pub fn normalize_axes(axes: &[i64], ndim: usize) -> ArrayResult<Vec<usize>> {
    if axes.is_empty() {
        return Ok((0..ndim).collect());
    }
    let mut resolved = Vec::with_capacity(axes.len());
    for &axis in axes {
        let axis = normalize_axis(axis, ndim)?;
        if resolved.contains(&axis) {
            return Err(ArrayError::value(format!(
                "axis {axis} appears more than once in {axes:?}"
            )));
        }
        resolved.push(axis);
    }
    resolved.sort_unstable();
    Ok(resolved)
}

/// Lowest and highest byte offset touched by a strided layout, relative to its origin.
///
/// Returns `None` when the layout addresses no elements.
pub fn byte_extent(shape: &[i64], strides: &[i64]) -> ArrayResult<Option<(i64, i64)>> {
    if shape.iter().any(|&d| d == 0) {
        return Ok(None);
    }
    let overflow = || {
        ArrayError::shape(format!(
            "layout shape={shape:?} strides={strides:?} spans more than an i64 of bytes"
        ))
    };
    let mut low = 0i64;
    let mut high = 0i64;
    for (&dim, &stride) in shape.iter().zip(strides.iter()) {
        let span = stride.checked_mul(dim - 1).ok_or_else(overflow)?;
        if span >= 0 {
            high = high.checked_add(span).ok_or_else(overflow)?;
        } else {
            low = low.checked_add(span).ok_or_else(overflow)?;
        }
    }
    Ok(Some((low, high)))
}

/// Byte offsets of every element of a strided layout, in row-major logical order.
pub struct StridedOffsets {
    shape: Dims,
    strides: Dims,
    current: Dims,
    offset: i64,
    remaining: usize,
}

impl StridedOffsets {
    /// Walks `shape` in row-major order starting from byte `base`.
    pub fn new(shape: &[i64], strides: &[i64], base: i64) -> Self {
        let total = numel(shape).max(0) as usize;
        StridedOffsets {
            shape: shape.iter().copied().collect(),
            strides: strides.iter().copied().collect(),
            current: SmallVec::from_elem(0, shape.len()),
            offset: base,
            remaining: total,
        }
    }
}

impl Iterator for StridedOffsets {
    type Item = i64;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let result = self.offset;
        self.remaining -= 1;
        if self.remaining > 0 {
            // Odometer increment, rightmost axis first.
            for i in (0..self.shape.len()).rev() {
                self.current[i] += 1;
                self.offset += self.strides[i];
                if self.current[i] < self.shape[i] {
                    break;
                }
                self.offset -= self.strides[i] * self.current[i];
                self.current[i] = 0;
            }
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedOffsets {}

//! Slicing views that alias an existing buffer with adjusted shape, stride, and offset.

use super::ndarray::NdArray;
use super::shape;
use crate::error::{ArrayError, ArrayResult};

/// Host-language style slice bounds; omitted fields take the usual defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceSpec {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl SliceSpec {
    /// Python-style slice; `None` bounds take the step-dependent default.
    pub fn new(start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Self {
        SliceSpec { start, stop, step }
    }

    /// `start..stop` with unit step.
    pub fn range(start: i64, stop: i64) -> Self {
        SliceSpec::new(Some(start), Some(stop), None)
    }

    /// Every element of the axis.
    pub fn full() -> Self {
        SliceSpec::default()
    }

    /// Replaces the step.
    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Resolves to concrete `(start, stop, step, length)` for an axis of `len` elements.
    ///
    /// Negative bounds count from the end; everything is clamped to the axis.
    pub fn indices(&self, len: i64) -> ArrayResult<(i64, i64, i64, i64)> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(ArrayError::value("slice step cannot be zero"));
        }
        let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
        let clamp = |value: i64| {
            let value = if value < 0 { value + len } else { value };
            value.clamp(lower, upper)
        };
        let start = self.start.map(clamp).unwrap_or(if step > 0 { lower } else { upper });
        let stop = self.stop.map(clamp).unwrap_or(if step > 0 { upper } else { lower });
        Ok((start, stop, step, slice_length(start, stop, step)))
    }
}

fn slice_length(start: i64, stop: i64, step: i64) -> i64 {
    if step > 0 && start < stop {
        (stop - start + step - 1) / step
    } else if step < 0 && start > stop {
        (start - stop - step - 1) / -step
    } else {
        0
    }
}

/// Index argument accepted by [`NdArray::index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexArg {
    /// Slices dimension 0.
    Slice(SliceSpec),
    /// Slices dimensions 0, 1, ... in order; trailing dimensions are left untouched.
    Tuple(Vec<IndexArg>),
    /// Integer indexing, which views do not support.
    Scalar(i64),
}

impl From<SliceSpec> for IndexArg {
    fn from(spec: SliceSpec) -> Self {
        IndexArg::Slice(spec)
    }
}

impl From<Vec<SliceSpec>> for IndexArg {
    fn from(specs: Vec<SliceSpec>) -> Self {
        IndexArg::Tuple(specs.into_iter().map(IndexArg::Slice).collect())
    }
}

/// Slices axis `dim` to `start..stop` by `step`, returning a view of `array`.
///
/// Bounds follow host-language slice rules: negative values count from the end and are
/// clamped to the axis, and a `start` past `stop` yields an empty axis rather than an error.
pub fn slice(array: &NdArray, dim: i64, start: i64, stop: i64, step: i64) -> ArrayResult<NdArray> {
    slice_spec(array, dim, &SliceSpec::new(Some(start), Some(stop), Some(step)))
}

/// [`slice`] taking a [`SliceSpec`] with optional bounds.
pub fn slice_spec(array: &NdArray, dim: i64, spec: &SliceSpec) -> ArrayResult<NdArray> {
    let axis = shape::normalize_axis(dim, array.ndim())?;
    let (start, _stop, step, length) = spec.indices(array.shape()[axis])?;

    let mut shape: shape::Dims = array.shape().iter().copied().collect();
    let mut strides: shape::Dims = array.strides().iter().copied().collect();
    let mut offsets: shape::Dims = array.offsets().iter().copied().collect();
    let base_offset = array.offset() - offsets.iter().sum::<i64>();

    if length > 0 {
        offsets[axis] += start * strides[axis];
    }
    shape[axis] = length;
    strides[axis] *= step;
    array.view(shape, strides, offsets, base_offset)
}

impl NdArray {
    /// Applies a slice or tuple of slices, folding left to right over dimensions.
    pub fn index(&self, index: impl Into<IndexArg>) -> ArrayResult<NdArray> {
        match index.into() {
            IndexArg::Slice(spec) => {
                if self.ndim() == 0 {
                    return Err(ArrayError::index("cannot slice a rank-zero array"));
                }
                slice_spec(self, 0, &spec)
            }
            IndexArg::Tuple(items) => {
                if items.len() > self.ndim() {
                    return Err(ArrayError::index(format!(
                        "too many indices ({}) for an array of rank {}",
                        items.len(),
                        self.ndim()
                    )));
                }
                let mut sliced = self.clone();
                for (dim, item) in items.iter().enumerate() {
                    let spec = match item {
                        IndexArg::Slice(spec) => spec,
                        other => {
                            return Err(ArrayError::type_error(format!(
                                "unsupported index kind {other:?} inside a tuple index"
                            )))
                        }
                    };
                    sliced = slice_spec(&sliced, dim as i64, spec)?;
                }
                if items.is_empty() {
                    sliced = self.view_of_self()?;
                }
                Ok(sliced)
            }
            other => Err(ArrayError::type_error(format!(
                "unsupported index kind {other:?}; expected a slice or a tuple of slices"
            ))),
        }
    }

    fn view_of_self(&self) -> ArrayResult<NdArray> {
        let base_offset = self.offset() - self.offsets().iter().sum::<i64>();
        self.view(
            self.shape().iter().copied().collect(),
            self.strides().iter().copied().collect(),
            self.offsets().iter().copied().collect(),
            base_offset,
        )
    }
}

//! 逐模拟的原始预测记录.

use std::path::Path;

use ndarray::{Array2, ArrayView2};
use ndarray_npy::WriteNpyError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 每个模拟的逐切片预测, 按模拟序排列.
///
/// 仅在 `keep_trace` 打开时保留, 用于离线比较不同的聚合方式.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PredictionTrace {
    slices: usize,
    rows: Vec<f32>,
}

impl PredictionTrace {
    /// 每行 `slices` 个预测的空记录.
    #[inline]
    pub fn new(slices: usize) -> Self {
        Self {
            slices,
            rows: Vec::new(),
        }
    }

    /// 从形状为 `(模拟数, 切片数)` 的数组构建.
    pub fn from_array(array: ArrayView2<'_, f32>) -> Self {
        Self {
            slices: array.ncols(),
            rows: array.iter().copied().collect(),
        }
    }

    /// 每行的切片个数.
    #[inline]
    pub fn slices(&self) -> usize {
        self.slices
    }

    /// 已记录的模拟个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len().checked_div(self.slices).unwrap_or(0)
    }

    /// 是否没有任何记录.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 追加一行. 长度必须等于 [`Self::slices`], 由调用方保证.
    pub(crate) fn push(&mut self, prediction: &[f32]) {
        debug_assert_eq!(prediction.len(), self.slices);
        self.rows.extend_from_slice(prediction);
    }

    /// 第 `i` 个模拟的预测. 越界时 panic.
    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.rows[i * self.slices..(i + 1) * self.slices]
    }

    /// 形状为 `(模拟数, 切片数)` 的数组.
    pub fn to_array(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.len(), self.slices), |(i, j)| {
            self.rows[i * self.slices + j]
        })
    }

    /// 以 `.npy` 格式保存.
    pub fn write_npy<P: AsRef<Path>>(&self, path: P) -> Result<(), WriteNpyError> {
        ndarray_npy::write_npy(path, &self.to_array())
    }
}

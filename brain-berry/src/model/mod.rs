//! 回归网络与权重获取.
//!
//! 网络被视为纯函数 `批次 -> 逐切片预测`. 本 crate 对其内部结构不做任何假设,
//! 只依赖输入/输出形状约定.

use std::error::Error;

use ndarray::ArrayView4;
use thiserror::Error;

mod weights;

pub use weights::{
    FetchError, LoadError, ModelLoader, ModelSpec, WeightError, WeightFetcher, WeightStore,
};

/// 网络预测的运行时错误.
#[derive(Debug, Error)]
pub enum PredictionError {
    /// 预测个数与批次行数不符.
    #[error("model returned {actual} predictions for a batch of {expected}")]
    LengthMismatch {
        /// 期望个数 (批次行数).
        expected: usize,

        /// 实际个数.
        actual: usize,
    },

    /// 第 `0` 个切片的预测为 NaN 或 inf.
    #[error("model returned a non-finite prediction for slice {0}")]
    NonFinite(usize),

    /// 没有任何预测可供聚合.
    #[error("no predictions to aggregate")]
    Empty,

    /// 网络后端自身的错误.
    #[error(transparent)]
    Backend(Box<dyn Error + Send + Sync>),
}

/// 2D 切片回归网络.
///
/// 给定形如 `(n, X, Y, 3)` 的批次, 按输入顺序返回 `n` 个标量预测.
/// 实现必须是无状态的 (或内部同步的), 以便在多个模拟间共享.
pub trait SliceRegressor: Send + Sync {
    /// 对整个批次做一次预测.
    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<f32>, PredictionError>;
}

impl<R: SliceRegressor + ?Sized> SliceRegressor for &R {
    #[inline]
    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<f32>, PredictionError> {
        (**self).predict(batch)
    }
}

//! 运行时错误.

use thiserror::Error;

use crate::augment::AugmentError;
use crate::data::{DegenerateKind, SliceAxis};
use crate::model::{PredictionError, WeightError};
use crate::preprocess::PreprocessError;
use crate::Idx2d;

/// 脑龄估计的运行时错误.
///
/// 每个变体对应流水线中的一个阶段, 以便调用方判断失败位置.
/// 流水线内部没有任何局部恢复.
#[derive(Debug, Error)]
pub enum EstimateError {
    /// 体数据在切片轴上的长度不足以覆盖切片范围.
    #[error("volume extent {actual} along axis {axis} is too small, slice range needs {required}")]
    InputShape {
        /// 切片轴.
        axis: SliceAxis,

        /// 切片范围所需的最小长度.
        required: usize,

        /// 实际长度.
        actual: usize,
    },

    /// 切片形状与网络输入形状不符.
    #[error("slice shape {actual:?} does not match model input shape {expected:?}")]
    SliceShape {
        /// 网络期望的切片形状.
        expected: Idx2d,

        /// 实际切片形状.
        actual: Idx2d,
    },

    /// 无法归一化的体数据.
    #[error("cannot normalize volume: {0}")]
    DegenerateInput(DegenerateKind),

    /// 模型权重下载或加载失败.
    #[error("model `{model_id}` is unavailable")]
    ModelUnavailable {
        /// 模型标识.
        model_id: String,

        /// 底层错误.
        #[source]
        source: WeightError,
    },

    /// 外部预处理失败.
    #[error("preprocessing failed")]
    Preprocessing(#[from] PreprocessError),

    /// 生成第 `simulation` 个扰动体数据失败.
    #[error("augmentation failed at simulation {simulation}")]
    Augmentation {
        /// 模拟序号 (0 为原始体数据).
        simulation: usize,

        /// 底层错误.
        #[source]
        source: AugmentError,
    },

    /// 第 `simulation` 个模拟的网络预测失败.
    #[error("prediction failed at simulation {simulation}")]
    Prediction {
        /// 模拟序号 (0 为原始体数据).
        simulation: usize,

        /// 底层错误.
        #[source]
        source: PredictionError,
    },

    /// 调用方取消了本次估计.
    #[error("estimation cancelled after {completed} simulations")]
    Cancelled {
        /// 取消前已经完成的模拟个数.
        completed: usize,
    },
}

/// 脑龄估计结果.
pub type EstimateResult<T> = Result<T, EstimateError>;

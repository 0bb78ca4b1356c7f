#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 基于预训练的 2D 切片回归网络, 从 3D T1 加权 MR 体数据估计 "脑龄".
//!
//! 该 crate 目前仅提供 `safe` 接口. 网络本体、预处理 (偏置场校正, 去颅骨,
//! 模板配准) 和权重下载均视为外部能力, 以 trait 的形式注入.
//!
//! # 注意
//!
//! 1. 体数据统一以 `(X, Y, Z)` 组织, 默认沿第三轴 (Z) 取切片.
//! 2. 参考配置下网络输入为 `(181, 217, 3)`, 即裁剪后 MNI152 模板的水平切片.
//! 3. 任何阶段失败都会直接终止本次估计并返回 [`EstimateError`], 不做局部恢复.
//!
//! # 开发计划
//!
//! ### 体数据加载与 min-max 归一化 ✅
//!
//! 支持 nifti 与 npy 两种格式. 常数体数据无法归一化, 会返回错误.
//!
//! 实现位于 `brain-berry/src/data`.
//!
//! ### 切片批次构建 ✅
//!
//! 固定闭区间 `46..=125` 内的切片逐一复制为 3 通道伪彩色图像,
//! 按切片序组成 `(n, X, Y, 3)` 的批次.
//!
//! 实现位于 `brain-berry/src/data/slice.rs`.
//!
//! ### 随机仿射扰动集成 ✅
//!
//! 第 0 个模拟永远是原始体数据, 其余由 [`augment::Augmenter`] 惰性生成.
//! 内置 [`augment::RandomAffine`], 三线性插值重采样.
//!
//! 实现位于 `brain-berry/src/augment`.
//!
//! ### 在线均值聚合 ✅
//!
//! 跨模拟取在线均值, 跨切片取中位数. 递推式的除数是 `i + 1` 而不是 `i`,
//! 这与已发表结果的计算方式保持一致, 不做 "修正".
//!
//! 实现位于 `brain-berry/src/aggregate`.
//!
//! ### 权重缓存 ✅
//!
//! 缺失时下载到 `*.part` 临时文件, 完成后原子重命名. 同一路径的并发下载互斥.
//!
//! 实现位于 `brain-berry/src/model/weights.rs`.
//!
//! ### 多线程 ✅
//!
//! 开启 `rayon` feature 后, 扰动重采样和各模拟的预测可以并行,
//! 预测结果仍按模拟序折叠.
//!
//! ### 预处理 ⌛️
//!
//! 目前仅内置分位数截断 ([`preprocess::IntensityTruncation`]).
//! 去颅骨、N4 偏置场校正和模板配准需由调用方注入.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 按 `verbose` 决定进度信息的日志级别. 日志从不影响控制流.
macro_rules! progress {
    ($verbose: expr, $($arg: tt)+) => {
        if $verbose {
            log::info!($($arg)+);
        } else {
            log::debug!($($arg)+);
        }
    };
}

/// 3D MR 体数据与切片批次.
pub mod data;

pub mod aggregate;
pub mod augment;
pub mod cancel;
pub mod config;
pub mod consts;
pub mod error;
pub mod estimator;
pub mod model;
pub mod preprocess;
pub mod prelude;

pub use data::{
    ImgWriteVis, PseudoColorSlice, SliceAxis, SliceBatch, SliceBatchBuilder, SliceRange, Volume,
    VolumeError,
};

pub use cancel::CancelToken;
pub use config::{EstimateOptions, EstimatorConfig};
pub use error::EstimateError;
pub use estimator::{BrainAgeEstimator, BrainAgeResult};

//! 估计器配置与单次估计的选项.

use std::env;
use std::path::PathBuf;

use crate::consts::{DEFAULT_SD_AFFINE, TEMPLATE_SLICE_SHAPE, WEIGHTS_DIR_ENV};
use crate::model::ModelSpec;
use crate::preprocess::PreprocessSpec;
use crate::{Idx2d, SliceAxis, SliceBatchBuilder, SliceRange};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 获取 `$HOME/.brain-berry/weights`. 无法确定主目录时返回 `None`.
pub fn home_weights_dir() -> Option<PathBuf> {
    let mut p = dirs::home_dir()?;
    p.extend([".brain-berry", "weights"]);
    Some(p)
}

/// 获取权重缓存目录.
///
/// 1. 若环境变量 `$BRAIN_BERRY_WEIGHTS_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/.brain-berry/weights`;
/// 3. 连主目录都无法确定时, 返回当前目录下的 `.brain-berry/weights`.
pub fn weights_dir_from_env_or_home() -> PathBuf {
    match env::var(WEIGHTS_DIR_ENV) {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => home_weights_dir().unwrap_or_else(|| [".brain-berry", "weights"].iter().collect()),
    }
}

/// 估计器的静态配置, 在构建估计器时确定.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EstimatorConfig {
    /// 权重缓存目录.
    pub weights_dir: PathBuf,

    /// 预训练模型.
    pub model: ModelSpec,

    /// 切片轴.
    pub slice_axis: SliceAxis,

    /// 切片范围.
    pub slice_range: SliceRange,

    /// 网络期望的切片形状. `None` 表示不检查.
    pub expected_slice_shape: Option<Idx2d>,

    /// 预处理参数.
    pub preprocess: PreprocessSpec,

    /// 是否并行预测各模拟. 仅在开启 `rayon` feature 时生效.
    pub parallel_simulations: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            weights_dir: weights_dir_from_env_or_home(),
            model: ModelSpec::default(),
            slice_axis: SliceAxis::Z,
            slice_range: SliceRange::reference(),
            expected_slice_shape: Some(TEMPLATE_SLICE_SHAPE),
            preprocess: PreprocessSpec::default(),
            parallel_simulations: false,
        }
    }
}

impl EstimatorConfig {
    /// 以 `weights_dir` 为权重缓存目录的参考配置.
    pub fn with_weights_dir<P: Into<PathBuf>>(mut self, weights_dir: P) -> Self {
        self.weights_dir = weights_dir.into();
        self
    }

    /// 修改切片轴与范围.
    #[inline]
    pub fn with_slices(mut self, axis: SliceAxis, range: SliceRange) -> Self {
        self.slice_axis = axis;
        self.slice_range = range;
        self
    }

    /// 修改期望的切片形状.
    #[inline]
    pub fn with_expected_slice_shape(mut self, shape: Option<Idx2d>) -> Self {
        self.expected_slice_shape = shape;
        self
    }

    /// 并行预测各模拟.
    #[inline]
    pub fn with_parallel_simulations(mut self, parallel: bool) -> Self {
        self.parallel_simulations = parallel;
        self
    }

    /// 按配置创建切片批次构建器.
    #[inline]
    pub fn slice_builder(&self) -> SliceBatchBuilder {
        SliceBatchBuilder::new(self.slice_axis, self.slice_range)
            .with_expected_slice_shape(self.expected_slice_shape)
    }
}

/// 单次估计的选项.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EstimateOptions {
    /// 是否执行预处理.
    pub do_preprocessing: bool,

    /// 额外的随机扰动模拟个数. 0 表示只使用原始体数据.
    pub number_of_simulations: usize,

    /// 随机仿射扰动的标准差.
    pub sd_affine: f64,

    /// 是否以 info 级别报告进度.
    pub verbose: bool,

    /// 是否在结果中保留每个模拟的原始预测.
    pub keep_trace: bool,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        Self {
            do_preprocessing: true,
            number_of_simulations: 0,
            sd_affine: DEFAULT_SD_AFFINE,
            verbose: true,
            keep_trace: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EstimateOptions, EstimatorConfig};
    use crate::SliceBatchBuilder;

    #[test]
    fn test_defaults() {
        let opts = EstimateOptions::default();
        assert!(opts.do_preprocessing);
        assert_eq!(opts.number_of_simulations, 0);
        assert_eq!(opts.sd_affine, 0.01);
        assert!(opts.verbose);
        assert!(!opts.keep_trace);

        let config = EstimatorConfig::default().with_weights_dir("/tmp/w");
        assert_eq!(config.slice_builder(), SliceBatchBuilder::reference());
        assert_eq!(config.model.id, "brainAgeDeepBrainNet");
        assert!(!config.parallel_simulations);
        assert_eq!(config.weights_dir.to_str(), Some("/tmp/w"));
    }
}

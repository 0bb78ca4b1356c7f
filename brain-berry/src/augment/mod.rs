//! 扰动集成: 原始体数据加上若干随机仿射扰动副本.
//!
//! 网络本身不输出不确定度, 因此用小幅位姿/形状扰动下预测的稳定性来近似.

use std::borrow::Cow;
use std::error::Error;

use thiserror::Error;

use crate::consts::DEFAULT_SD_AFFINE;
use crate::error::{EstimateError, EstimateResult};
use crate::Volume;

mod affine;

pub use affine::{AffineTransform, RandomAffine};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 随机变换的类型.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransformType {
    /// 仅平移.
    Translation,

    /// 一般仿射 (线性部分与平移均被扰动).
    #[default]
    Affine,
}

/// 重采样插值方式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Interpolator {
    /// 三线性插值.
    #[default]
    Linear,

    /// 最近邻插值.
    NearestNeighbor,
}

/// 单次扰动的参数.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PerturbSpec {
    /// 变换类型.
    pub transform: TransformType,

    /// 随机变换参数的标准差.
    pub sd_affine: f64,

    /// 插值方式.
    pub interpolator: Interpolator,
}

impl Default for PerturbSpec {
    #[inline]
    fn default() -> Self {
        Self::affine(DEFAULT_SD_AFFINE)
    }
}

impl PerturbSpec {
    /// 标准差为 `sd_affine`、线性插值的仿射扰动.
    #[inline]
    pub fn affine(sd_affine: f64) -> Self {
        Self {
            transform: TransformType::Affine,
            sd_affine,
            interpolator: Interpolator::Linear,
        }
    }
}

/// 生成扰动体数据错误.
#[derive(Debug, Error)]
pub enum AugmentError {
    /// 标准差为负或非有限值.
    #[error("invalid standard deviation {0}")]
    InvalidDeviation(f64),

    /// 外部实现的其他错误.
    #[error(transparent)]
    Backend(Box<dyn Error + Send + Sync>),
}

/// 随机扰动生成器.
///
/// 每次调用都应返回一个独立的随机变换副本, 网格形状与输入相同.
pub trait Augmenter {
    /// 按 `spec` 随机变换 `volume`.
    fn perturb(&mut self, volume: &Volume, spec: &PerturbSpec) -> Result<Volume, AugmentError>;
}

/// 集成中的一个成员.
#[derive(Debug, Clone)]
pub struct Simulation<'a> {
    index: usize,
    volume: Cow<'a, Volume>,
}

impl<'a> Simulation<'a> {
    /// 从原始体数据创建第 0 个模拟.
    #[inline]
    pub fn original(volume: &'a Volume) -> Self {
        Self {
            index: 0,
            volume: Cow::Borrowed(volume),
        }
    }

    /// 模拟序号. 0 为原始体数据.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// 是否是未扰动的原始体数据.
    #[inline]
    pub fn is_original(&self) -> bool {
        self.index == 0
    }

    /// 体数据.
    #[inline]
    pub fn volume(&self) -> &Volume {
        &self.volume
    }
}

/// 惰性的扰动集成. 共产生 `number_of_simulations + 1` 个模拟:
/// 第 0 个是原样的输入, 其余在迭代到时才由 [`Augmenter`] 生成.
pub struct PerturbationEnsemble<'a> {
    volume: &'a Volume,
    augmenter: &'a mut dyn Augmenter,
    spec: PerturbSpec,
    next: usize,
    total: usize,
}

impl<'a> PerturbationEnsemble<'a> {
    /// 创建集成.
    pub fn new(
        volume: &'a Volume,
        augmenter: &'a mut dyn Augmenter,
        number_of_simulations: usize,
        spec: PerturbSpec,
    ) -> Self {
        Self {
            volume,
            augmenter,
            spec,
            next: 0,
            total: number_of_simulations + 1,
        }
    }

    /// 模拟总数.
    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }
}

impl<'a> Iterator for PerturbationEnsemble<'a> {
    type Item = EstimateResult<Simulation<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;

        if index == 0 {
            return Some(Ok(Simulation::original(self.volume)));
        }
        let sim = self
            .augmenter
            .perturb(self.volume, &self.spec)
            .map(|v| Simulation {
                index,
                volume: Cow::Owned(v),
            })
            .map_err(|source| EstimateError::Augmentation {
                simulation: index,
                source,
            });
        Some(sim)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.total - self.next;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for PerturbationEnsemble<'_> {}

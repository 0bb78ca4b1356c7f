//! 预处理: 强度截断, 去颅骨, N4 偏置场校正, 模板配准.
//!
//! 这些步骤大多依赖外部医学影像工具链, 因此以 [`Preprocessor`] trait 注入.
//! 本 crate 仅内置 [`IntensityTruncation`].

use std::error::Error;
use std::path::PathBuf;

use ndarray::Zip;
use thiserror::Error;

use crate::consts::preprocess::*;
use crate::{Idx3d, Volume};

mod truncate;

pub use truncate::IntensityTruncation;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 预处理参数. 默认值即参考流程.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PreprocessSpec {
    /// 强度截断的上下分位数 `(low, high)`.
    pub truncate_intensity: (f64, f64),

    /// 去颅骨方式.
    pub brain_extraction: String,

    /// 偏置场校正方式.
    pub bias_correction: String,

    /// 模板配准的变换类型.
    pub template_transform: String,

    /// 配准模板.
    pub template: String,

    /// 中间结果的输出目录. `None` 表示不保存.
    pub output_dir: Option<PathBuf>,
}

impl Default for PreprocessSpec {
    fn default() -> Self {
        Self {
            truncate_intensity: (TRUNCATE_LOW, TRUNCATE_HIGH),
            brain_extraction: BRAIN_EXTRACTION.to_owned(),
            bias_correction: BIAS_CORRECTION.to_owned(),
            template_transform: TEMPLATE_TRANSFORM.to_owned(),
            template: TEMPLATE.to_owned(),
            output_dir: None,
        }
    }
}

/// 预处理错误.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// 要求预处理, 但没有配置 [`Preprocessor`].
    #[error("preprocessing requested but no preprocessor is configured")]
    NotConfigured,

    /// 脑掩膜与图像形状不一致.
    #[error("brain mask shape {mask:?} does not match image shape {image:?}")]
    MaskShape {
        /// 图像形状.
        image: Idx3d,

        /// 掩膜形状.
        mask: Idx3d,
    },

    /// 分位数不满足 `0 <= low <= high <= 1`.
    #[error("invalid truncation quantiles ({0}, {1})")]
    InvalidQuantiles(f64, f64),

    /// 外部工具链的错误.
    #[error(transparent)]
    Backend(Box<dyn Error + Send + Sync>),
}

/// 预处理结果.
#[derive(Clone, Debug, PartialEq)]
pub struct Preprocessed {
    /// 预处理后的图像, 位于模板空间.
    pub image: Volume,

    /// 脑掩膜, 非零处为脑组织. `None` 表示不做掩膜.
    pub brain_mask: Option<Volume>,
}

impl Preprocessed {
    /// 图像与掩膜逐体素相乘.
    pub fn masked(self) -> Result<Volume, PreprocessError> {
        let Some(mask) = self.brain_mask else {
            return Ok(self.image);
        };
        if mask.shape() != self.image.shape() {
            return Err(PreprocessError::MaskShape {
                image: self.image.shape(),
                mask: mask.shape(),
            });
        }

        let mut data = self.image.data().to_owned();
        Zip::from(&mut data)
            .and(&mask.data())
            .for_each(|v, &m| *v *= m);
        Ok(self.image.with_data(data))
    }
}

/// 外部预处理流水线.
pub trait Preprocessor {
    /// 按 `spec` 预处理 `image`.
    fn preprocess(
        &self,
        image: &Volume,
        spec: &PreprocessSpec,
    ) -> Result<Preprocessed, PreprocessError>;
}

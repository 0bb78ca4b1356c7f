//! 通用常量.

use crate::{Idx2d, Idx3d};

/// 参考配置下的切片选取范围.
pub mod slices {
    /// 第一个被选取的切片 (含).
    pub const FIRST_SLICE: usize = 46;

    /// 最后一个被选取的切片 (含).
    pub const LAST_SLICE: usize = 125;

    /// 被选取的切片个数.
    pub const NUM_SLICES: usize = LAST_SLICE - FIRST_SLICE + 1;
}

/// 参考预处理流程的参数.
pub mod preprocess {
    /// 强度截断的下分位数.
    pub const TRUNCATE_LOW: f64 = 0.01;

    /// 强度截断的上分位数.
    pub const TRUNCATE_HIGH: f64 = 0.99;

    /// 去颅骨方式.
    pub const BRAIN_EXTRACTION: &str = "t1";

    /// 偏置场校正方式.
    pub const BIAS_CORRECTION: &str = "n4";

    /// 模板配准的变换类型 (仅仿射).
    pub const TEMPLATE_TRANSFORM: &str = "antsRegistrationSyNQuickRepro[a]";

    /// 配准模板.
    pub const TEMPLATE: &str = "croppedMni152";
}

/// 网络输入的通道数. MR 切片是单通道的, 因此需要复制三份.
pub const CHANNELS: usize = 3;

/// 裁剪后 MNI152 模板的体素网格形状 `(X, Y, Z)`.
pub const TEMPLATE_SHAPE: Idx3d = (181, 217, 181);

/// 网络期望的单张切片形状 `(X, Y)`.
pub const TEMPLATE_SLICE_SHAPE: Idx2d = (TEMPLATE_SHAPE.0, TEMPLATE_SHAPE.1);

/// 随机仿射扰动的默认标准差.
pub const DEFAULT_SD_AFFINE: f64 = 0.01;

/// 预训练模型在权重仓库中的标识.
pub const DEFAULT_MODEL_ID: &str = "brainAgeDeepBrainNet";

/// 预训练权重的本地文件名.
pub const DEFAULT_WEIGHTS_FILE: &str = "brainAgeDeepBrainNet.h5";

/// 指定权重缓存目录的环境变量.
pub const WEIGHTS_DIR_ENV: &str = "BRAIN_BERRY_WEIGHTS_DIR";

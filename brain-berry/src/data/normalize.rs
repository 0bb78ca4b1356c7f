//! 体数据强度的 min-max 归一化.

use std::fmt;

use itertools::{Itertools, MinMaxResult};

use super::Volume;
use crate::error::{EstimateError, EstimateResult};

/// 无法归一化的原因.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DegenerateKind {
    /// 体数据不含任何体素.
    Empty,

    /// 存在 NaN 或 inf 体素.
    NonFinite,

    /// 所有体素值相同 (`max == min`). 参数为该值.
    Constant(f32),
}

impl fmt::Display for DegenerateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "volume is empty"),
            Self::NonFinite => write!(f, "volume contains non-finite voxels"),
            Self::Constant(v) => write!(f, "volume is constant ({v})"),
        }
    }
}

impl Volume {
    /// 获取体素值的最小值和最大值.
    ///
    /// 存在非有限值, 体数据为空或为常数时返回 `Err`.
    pub fn intensity_range(&self) -> Result<(f32, f32), DegenerateKind> {
        if self.data.iter().any(|v| !v.is_finite()) {
            return Err(DegenerateKind::NonFinite);
        }
        match self.data.iter().copied().minmax() {
            MinMaxResult::NoElements => Err(DegenerateKind::Empty),
            MinMaxResult::OneElement(v) => Err(DegenerateKind::Constant(v)),
            MinMaxResult::MinMax(lo, hi) if lo == hi => Err(DegenerateKind::Constant(lo)),
            MinMaxResult::MinMax(lo, hi) => Ok((lo, hi)),
        }
    }

    /// 计算 `(v - min) / (max - min)`, 将全部体素映射到 `[0, 1]`.
    ///
    /// 输出的最小值精确为 0, 最大值精确为 1. 无法归一化时返回
    /// [`EstimateError::DegenerateInput`].
    ///
    /// 在 `f64` 下计算, 因此即使 `max - min` 超出 `f32` 的表示范围也不会溢出.
    pub fn normalized(&self) -> EstimateResult<Volume> {
        let (lo, hi) = self
            .intensity_range()
            .map_err(EstimateError::DegenerateInput)?;
        let lo = f64::from(lo);
        let range = f64::from(hi) - lo;
        Ok(self.map(|v| ((f64::from(v) - lo) / range) as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::DegenerateKind;
    use crate::{EstimateError, Volume};
    use ndarray::Array3;

    fn min_max(v: &Volume) -> (f32, f32) {
        v.intensity_range().unwrap()
    }

    #[test]
    fn test_normalized_exact_bounds() {
        let v = Volume::new(Array3::from_shape_fn((7, 5, 3), |(x, y, z)| {
            ((x * 37 + y * 11 + z * 5) % 23) as f32 * 13.7 - 40.25
        }));
        let n = v.normalized().unwrap();
        assert_eq!(min_max(&n), (0.0, 1.0));
        assert!(n.data().iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_normalized_keeps_order_and_spacing() {
        let data = Array3::from_shape_vec((1, 1, 3), vec![10.0, 20.0, 15.0]).unwrap();
        let v = Volume::with_spacing(data, [1.0, 1.2, 2.5]);
        let n = v.normalized().unwrap();
        assert_eq!(n.data().as_slice().unwrap(), &[0.0, 1.0, 0.5]);
        assert_eq!(n.spacing(), [1.0, 1.2, 2.5]);
    }

    #[test]
    fn test_normalized_huge_range() {
        let mut data = Array3::zeros((2, 2, 2));
        data[(0, 0, 0)] = -3.0e38;
        data[(1, 1, 1)] = 3.0e38;
        let n = Volume::new(data).normalized().unwrap();

        assert!(n.data().iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(min_max(&n), (0.0, 1.0));
        assert_eq!(n[(0, 0, 0)], 0.0);
        assert_eq!(n[(1, 1, 1)], 1.0);
        assert_eq!(n[(0, 1, 0)], 0.5);
    }

    #[test]
    fn test_normalized_degenerate() {
        let flat = Volume::new(Array3::from_elem((4, 4, 4), 7.5));
        assert!(matches!(
            flat.normalized(),
            Err(EstimateError::DegenerateInput(DegenerateKind::Constant(v))) if v == 7.5
        ));

        let single = Volume::new(Array3::from_elem((1, 1, 1), 2.0));
        assert!(matches!(
            single.normalized(),
            Err(EstimateError::DegenerateInput(DegenerateKind::Constant(_)))
        ));

        let empty = Volume::new(Array3::zeros((0, 3, 3)));
        assert!(matches!(
            empty.normalized(),
            Err(EstimateError::DegenerateInput(DegenerateKind::Empty))
        ));

        let mut data = Array3::from_elem((2, 2, 2), 1.0);
        data[(1, 1, 1)] = f32::NAN;
        assert!(matches!(
            Volume::new(data).normalized(),
            Err(EstimateError::DegenerateInput(DegenerateKind::NonFinite))
        ));
    }
}

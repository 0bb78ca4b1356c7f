//! 切片选取与 3 通道伪彩色批次构建.

use std::fmt;
use std::ops::RangeInclusive;

use ndarray::{Array4, ArrayView2, ArrayView3, ArrayView4, Axis};

use super::Volume;
use crate::consts::slices::{FIRST_SLICE, LAST_SLICE};
use crate::consts::{CHANNELS, TEMPLATE_SLICE_SHAPE};
use crate::error::{EstimateError, EstimateResult};
use crate::Idx2d;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 切片所沿的解剖轴. 即体数据 `(X, Y, Z)` 中的某一维.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SliceAxis {
    /// 第一维.
    X,

    /// 第二维.
    Y,

    /// 第三维. 参考配置下的水平切片方向.
    #[default]
    Z,
}

impl SliceAxis {
    /// 对应的 ndarray 维度下标.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

impl fmt::Display for SliceAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => write!(f, "x"),
            Self::Y => write!(f, "y"),
            Self::Z => write!(f, "z"),
        }
    }
}

/// 非空的切片下标闭区间.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SliceRange {
    first: usize,
    last: usize,
}

impl Default for SliceRange {
    #[inline]
    fn default() -> Self {
        Self::reference()
    }
}

impl SliceRange {
    /// 构建闭区间 `first..=last`. 若 `first > last` 则返回 `None`.
    pub fn new(first: usize, last: usize) -> Option<SliceRange> {
        (first <= last).then_some(Self { first, last })
    }

    /// 参考配置: 覆盖大脑中部的 `46..=125`, 共 80 张切片.
    #[inline]
    pub const fn reference() -> SliceRange {
        Self {
            first: FIRST_SLICE,
            last: LAST_SLICE,
        }
    }

    /// 第一个切片下标.
    #[inline]
    pub fn first(&self) -> usize {
        self.first
    }

    /// 最后一个切片下标 (含).
    #[inline]
    pub fn last(&self) -> usize {
        self.last
    }

    /// 切片个数.
    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    /// 覆盖该区间所需的最小轴长.
    #[inline]
    pub fn required_extent(&self) -> usize {
        self.last + 1
    }

    /// 按升序迭代所有切片下标.
    #[inline]
    pub fn iter(&self) -> RangeInclusive<usize> {
        self.first..=self.last
    }
}

/// 不可变、借用的 `(X, Y, 3)` 伪彩色切片. 三个通道来自同一张灰度切片.
pub struct PseudoColorSlice<'a> {
    /// 借用于 [`SliceBatch`] 的一行.
    data: ArrayView3<'a, f32>,
}

impl<'a> PseudoColorSlice<'a> {
    #[inline]
    pub(crate) fn new(data: ArrayView3<'a, f32>) -> Self {
        debug_assert_eq!(data.len_of(Axis(2)), CHANNELS);
        Self { data }
    }

    /// 单通道形状 `(高, 宽)`.
    #[inline]
    pub fn shape(&self) -> Idx2d {
        let (h, w, _) = self.data.dim();
        (h, w)
    }

    /// 获取第 `c` 个通道. `c >= 3` 时 panic.
    #[inline]
    pub fn channel(&self, c: usize) -> ArrayView2<'a, f32> {
        self.data.clone().index_axis_move(Axis(2), c)
    }

    /// 三个通道是否逐像素相同.
    pub fn is_gray(&self) -> bool {
        let first = self.channel(0);
        (1..CHANNELS).all(|c| self.channel(c) == first)
    }

    /// 获得底层数据的 shallow copy.
    #[inline]
    pub fn view(&self) -> ArrayView3<'a, f32> {
        self.data.clone()
    }
}

/// 一次提交给网络的 `(n, X, Y, 3)` 切片批次.
///
/// 第 `j` 行对应 `indices()[j]` 处的切片, 顺序与切片下标升序一致,
/// 以便将逐切片预测对应回解剖位置.
#[derive(Debug, Clone)]
pub struct SliceBatch {
    data: Array4<f32>,
    indices: Vec<usize>,
}

impl SliceBatch {
    /// 批次中的切片个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// 批次是否为空. 由 [`SliceBatchBuilder`] 构建的批次永不为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// 每一行对应的切片下标.
    #[inline]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// 单张切片形状.
    #[inline]
    pub fn slice_shape(&self) -> Idx2d {
        let (_, h, w, _) = self.data.dim();
        (h, w)
    }

    /// 获得整个批次的 shallow copy, 形状为 `(n, X, Y, 3)`.
    #[inline]
    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// 获取第 `j` 行的伪彩色切片. 越界时 panic.
    #[inline]
    pub fn pseudo_color(&self, j: usize) -> PseudoColorSlice<'_> {
        PseudoColorSlice::new(self.data.index_axis(Axis(0), j))
    }

    /// 按批次顺序迭代伪彩色切片.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = PseudoColorSlice<'_>> {
        self.data.axis_iter(Axis(0)).map(PseudoColorSlice::new)
    }

    /// 取出底层数据.
    #[inline]
    pub fn into_inner(self) -> Array4<f32> {
        self.data
    }
}

/// 切片批次构建器: 沿固定轴选取固定范围内的切片.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SliceBatchBuilder {
    axis: SliceAxis,
    range: SliceRange,
    expected_slice_shape: Option<Idx2d>,
}

impl Default for SliceBatchBuilder {
    #[inline]
    fn default() -> Self {
        Self::reference()
    }
}

impl SliceBatchBuilder {
    /// 沿 `axis` 选取 `range` 内的切片, 不约束切片形状.
    #[inline]
    pub fn new(axis: SliceAxis, range: SliceRange) -> Self {
        Self {
            axis,
            range,
            expected_slice_shape: None,
        }
    }

    /// 参考配置: Z 轴, `46..=125`, 切片形状必须为 `(181, 217)`.
    #[inline]
    pub fn reference() -> Self {
        Self::new(SliceAxis::Z, SliceRange::reference())
            .with_expected_slice_shape(Some(TEMPLATE_SLICE_SHAPE))
    }

    /// 要求切片形状等于网络输入形状. `None` 表示不检查.
    #[inline]
    pub fn with_expected_slice_shape(mut self, shape: Option<Idx2d>) -> Self {
        self.expected_slice_shape = shape;
        self
    }

    /// 切片轴.
    #[inline]
    pub fn axis(&self) -> SliceAxis {
        self.axis
    }

    /// 切片范围.
    #[inline]
    pub fn range(&self) -> SliceRange {
        self.range
    }

    /// 批次行数.
    #[inline]
    pub fn batch_len(&self) -> usize {
        self.range.len()
    }

    /// 检查 `volume` 能否构建批次. 成功时返回单张切片形状.
    ///
    /// 切片范围超出体数据时返回 [`EstimateError::InputShape`];
    /// 切片形状与期望不符时返回 [`EstimateError::SliceShape`].
    pub fn check(&self, volume: &Volume) -> EstimateResult<Idx2d> {
        let actual = volume.extent(self.axis);
        if self.range.required_extent() > actual {
            return Err(EstimateError::InputShape {
                axis: self.axis,
                required: self.range.required_extent(),
                actual,
            });
        }

        let (x, y, z) = volume.shape();
        let shape = match self.axis {
            SliceAxis::X => (y, z),
            SliceAxis::Y => (x, z),
            SliceAxis::Z => (x, y),
        };
        match self.expected_slice_shape {
            Some(expected) if expected != shape => Err(EstimateError::SliceShape {
                expected,
                actual: shape,
            }),
            _ => Ok(shape),
        }
    }

    /// 构建切片批次.
    ///
    /// 对范围内每个下标 (升序), 取出该处二维切片, 复制到 3 个通道,
    /// 放在批次的对应行.
    pub fn build(&self, volume: &Volume) -> EstimateResult<SliceBatch> {
        let (h, w) = self.check(volume)?;
        let mut data = Array4::<f32>::zeros((self.range.len(), h, w, CHANNELS));
        let first = self.range.first();

        fill_rows(&mut data, volume, self.axis, first);

        Ok(SliceBatch {
            data,
            indices: self.range.iter().collect(),
        })
    }
}

/// 将第 `first + j` 层切片复制到 `data` 第 `j` 行的 3 个通道.
#[cfg(not(feature = "rayon"))]
fn fill_rows(data: &mut Array4<f32>, volume: &Volume, axis: SliceAxis, first: usize) {
    for (j, mut row) in data.axis_iter_mut(Axis(0)).enumerate() {
        let src = volume.slice_at(axis, first + j);
        for mut ch in row.axis_iter_mut(Axis(2)) {
            ch.assign(&src);
        }
    }
}

/// 借助 `rayon`, 并行地将第 `first + j` 层切片复制到 `data` 第 `j` 行的 3 个通道.
#[cfg(feature = "rayon")]
fn fill_rows(data: &mut Array4<f32>, volume: &Volume, axis: SliceAxis, first: usize) {
    use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(j, mut row)| {
            let src = volume.slice_at(axis, first + j);
            for mut ch in row.axis_iter_mut(Axis(2)) {
                ch.assign(&src);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::{SliceAxis, SliceBatchBuilder, SliceRange};
    use crate::{EstimateError, Volume};
    use ndarray::Array3;

    fn volume(shape: (usize, usize, usize)) -> Volume {
        Volume::new(Array3::from_shape_fn(shape, |(x, y, z)| {
            (x + 7 * y + 31 * z) as f32
        }))
    }

    #[test]
    fn test_slice_range() {
        assert!(SliceRange::new(5, 4).is_none());
        let r = SliceRange::new(3, 3).unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r.required_extent(), 4);

        let r = SliceRange::reference();
        assert_eq!((r.first(), r.last()), (46, 125));
        assert_eq!(r.len(), 80);
        assert_eq!(r.iter().count(), 80);
    }

    #[test]
    fn test_build_replicates_channels() {
        let v = volume((6, 5, 12));
        let range = SliceRange::new(2, 9).unwrap();
        let batch = SliceBatchBuilder::new(SliceAxis::Z, range)
            .build(&v)
            .unwrap();

        assert_eq!(batch.len(), range.len());
        assert_eq!(batch.view().dim(), (8, 6, 5, 3));
        assert_eq!(batch.indices(), &[2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(batch.slice_shape(), (6, 5));

        for (j, sli) in batch.iter().enumerate() {
            assert!(sli.is_gray());
            let src = v.slice_at(SliceAxis::Z, batch.indices()[j]);
            for c in 0..3 {
                assert_eq!(sli.channel(c), src);
            }
        }
    }

    #[test]
    fn test_build_other_axis() {
        let v = volume((10, 4, 3));
        let batch = SliceBatchBuilder::new(SliceAxis::X, SliceRange::new(1, 4).unwrap())
            .build(&v)
            .unwrap();
        assert_eq!(batch.view().dim(), (4, 4, 3, 3));
        assert_eq!(batch.pseudo_color(0).channel(2), v.slice_at(SliceAxis::X, 1));
        assert_eq!(batch.pseudo_color(3).channel(1), v.slice_at(SliceAxis::X, 4));
    }

    #[test]
    fn test_range_exceeds_volume() {
        let v = volume((4, 4, 125));
        let err = SliceBatchBuilder::new(SliceAxis::Z, SliceRange::reference())
            .build(&v)
            .unwrap_err();
        assert!(matches!(
            err,
            EstimateError::InputShape {
                axis: SliceAxis::Z,
                required: 126,
                actual: 125,
            }
        ));
    }

    #[test]
    fn test_expected_slice_shape() {
        let builder = SliceBatchBuilder::reference();
        let v = volume((180, 217, 130));
        assert!(matches!(
            builder.check(&v),
            Err(EstimateError::SliceShape {
                expected: (181, 217),
                actual: (180, 217),
            })
        ));

        let v = volume((181, 217, 126));
        assert_eq!(builder.check(&v).unwrap(), (181, 217));
    }
}

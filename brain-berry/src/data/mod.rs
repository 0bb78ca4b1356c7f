use std::ops::Index;
use std::path::Path;

use ndarray::{Array3, ArrayView2, ArrayView3, Axis, Ix3, Ix4};
use ndarray_npy::ReadNpyError;
use nifti::{IntoNdArray, NiftiError, NiftiObject, ReaderOptions};
use thiserror::Error;

use crate::Idx3d;

mod normalize;
mod save;
pub mod slice;

pub use normalize::DegenerateKind;
pub use save::ImgWriteVis;
pub use slice::{PseudoColorSlice, SliceAxis, SliceBatch, SliceBatchBuilder, SliceRange};

/// 打开体数据文件的错误.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// 读取 nifti 文件错误.
    #[error(transparent)]
    Nifti(#[from] NiftiError),

    /// 读取 npy 文件错误.
    #[error(transparent)]
    Npy(#[from] ReadNpyError),

    /// 数据不是三维的. 参数为实际维数.
    #[error("expected a 3-D volume, found {0} dimensions")]
    NotThreeDimensional(usize),
}

/// 3D MR 体数据, 包括 `(X, Y, Z)` 体素网格和体素分辨率 (毫米).
///
/// 该结构对外是只读的. 所有变换 (归一化, 掩膜, 重采样) 都返回新的实例.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<f32>,
    spacing: [f32; 3],
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl From<Array3<f32>> for Volume {
    #[inline]
    fn from(data: Array3<f32>) -> Self {
        Self::new(data)
    }
}

impl Volume {
    /// 以各向同性 1 毫米分辨率包装体素数据.
    #[inline]
    pub fn new(data: Array3<f32>) -> Self {
        Self::with_spacing(data, [1.0; 3])
    }

    /// 以给定体素分辨率 `[x, y, z]` 包装体素数据.
    #[inline]
    pub fn with_spacing(data: Array3<f32>, spacing: [f32; 3]) -> Self {
        Self { data, spacing }
    }

    /// 打开 nii 文件格式的 3D MR 扫描. `path` 为 nii 文件的本地路径.
    ///
    /// 形如 `(X, Y, Z, 1)` 的四维数据会被压缩为三维. 其他维数返回
    /// [`VolumeError::NotThreeDimensional`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let [_, sx, sy, sz, ..] = obj.header().pixdim;

        // nifti 数据本身即为 [X, Y, Z] 顺序, 此处不做转置.
        let data = obj.into_volume().into_ndarray::<f32>()?;
        let data = match data.ndim() {
            3 => data.into_dimensionality::<Ix3>(),
            4 if data.len_of(Axis(3)) == 1 => data
                .into_dimensionality::<Ix4>()
                .map(|d| d.index_axis_move(Axis(3), 0)),
            n => return Err(VolumeError::NotThreeDimensional(n)),
        };
        let data = data.map_err(|_| VolumeError::NotThreeDimensional(4))?;

        let spacing = [sx, sy, sz].map(|s| if s > 0.0 { s } else { 1.0 });
        Ok(Self::with_spacing(data, spacing))
    }

    /// 打开 npy 文件格式的三维数组. 体素分辨率视为 1 毫米.
    pub fn open_npy<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let data: Array3<f32> = ndarray_npy::read_npy(path)?;
        Ok(Self::new(data))
    }

    /// 获取数据形状大小 `(X, Y, Z)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取数据体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 获取 `axis` 方向的体素个数.
    #[inline]
    pub fn extent(&self, axis: SliceAxis) -> usize {
        self.data.len_of(Axis(axis.index()))
    }

    /// 获取单个体素分辨率 `[x, y, z]`, 以毫米为单位.
    #[inline]
    pub fn spacing(&self) -> [f32; 3] {
        self.spacing
    }

    /// 检查索引是否合法.
    #[inline]
    pub fn check(&self, (x0, y0, z0): &Idx3d) -> bool {
        let (x, y, z) = self.shape();
        *x0 < x && *y0 < y && *z0 < z
    }

    /// 获取沿 `axis` 方向第 `index` 层的二维切片视图.
    ///
    /// 当 `index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, axis: SliceAxis, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(axis.index()), index)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 取出底层数据.
    #[inline]
    pub fn into_inner(self) -> Array3<f32> {
        self.data
    }

    /// 对每个体素施加 `f`, 得到同分辨率的新体数据.
    pub fn map<F: FnMut(f32) -> f32>(&self, mut f: F) -> Self {
        Self::with_spacing(self.data.mapv(|v| f(v)), self.spacing)
    }

    /// 获取所有体素的平均值. 空体数据返回 `None`.
    pub fn mean(&self) -> Option<f64> {
        if self.data.is_empty() {
            return None;
        }
        let sum: f64 = self.data.iter().map(|&v| v as f64).sum();
        Some(sum / self.size() as f64)
    }

    /// 以相同的网格替换数据, 保留分辨率.
    #[inline]
    pub(crate) fn with_data(&self, data: Array3<f32>) -> Self {
        debug_assert_eq!(data.dim(), self.shape());
        Self::with_spacing(data, self.spacing)
    }
}

//! 随机仿射扰动与三线性重采样.

use ndarray::{Array3, ArrayView3, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

use super::{AugmentError, Augmenter, Interpolator, PerturbSpec, TransformType};
use crate::{Idx3d, Volume};

type Mat3 = [[f64; 3]; 3];
type Vec3 = [f64; 3];

const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// 围绕中心 `c` 的仿射变换 `y = A (x - c) + c + t`. 坐标均为物理坐标 (毫米).
///
/// 重采样时, 输出网格上的点 `x` 从输入体数据的 `y` 处取值.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AffineTransform {
    matrix: Mat3,
    translation: Vec3,
    center: Vec3,
}

impl AffineTransform {
    /// 以 `center` 为中心的恒等变换.
    #[inline]
    pub fn identity(center: Vec3) -> Self {
        Self::new(IDENTITY, [0.0; 3], center)
    }

    /// 直接指定线性部分、平移和中心.
    #[inline]
    pub fn new(matrix: Mat3, translation: Vec3, center: Vec3) -> Self {
        Self {
            matrix,
            translation,
            center,
        }
    }

    /// 体数据网格的物理中心.
    pub fn center_of(volume: &Volume) -> Vec3 {
        let (x, y, z) = volume.shape();
        let spacing = volume.spacing();
        let mut c = [0.0; 3];
        for (i, n) in [x, y, z].into_iter().enumerate() {
            c[i] = n.saturating_sub(1) as f64 * spacing[i] as f64 / 2.0;
        }
        c
    }

    /// 线性部分.
    #[inline]
    pub fn matrix(&self) -> &Mat3 {
        &self.matrix
    }

    /// 平移部分.
    #[inline]
    pub fn translation(&self) -> &Vec3 {
        &self.translation
    }

    /// 变换一个物理坐标.
    #[inline]
    pub fn apply(&self, p: Vec3) -> Vec3 {
        let d = [
            p[0] - self.center[0],
            p[1] - self.center[1],
            p[2] - self.center[2],
        ];
        let mut out = [0.0; 3];
        for (r, row) in self.matrix.iter().enumerate() {
            out[r] = row[0] * d[0] + row[1] * d[1] + row[2] * d[2]
                + self.center[r]
                + self.translation[r];
        }
        out
    }

    /// 在原网格上重采样 `volume`. 落在视野外的点取 0.
    pub fn resample(&self, volume: &Volume, interpolator: Interpolator) -> Volume {
        let spacing = volume.spacing().map(f64::from);
        let src = volume.data();
        let mut out = Array3::<f32>::zeros(volume.shape());

        let sample = |(i, j, k): Idx3d| -> f32 {
            let p = [
                i as f64 * spacing[0],
                j as f64 * spacing[1],
                k as f64 * spacing[2],
            ];
            let y = self.apply(p);
            let idx = [y[0] / spacing[0], y[1] / spacing[1], y[2] / spacing[2]];
            match interpolator {
                Interpolator::Linear => trilinear(&src, idx),
                Interpolator::NearestNeighbor => nearest(&src, idx),
            }
        };

        fill(&mut out, sample);
        volume.with_data(out)
    }
}

/// 按体素下标逐一填充 `out`.
#[cfg(not(feature = "rayon"))]
fn fill<F: Fn(Idx3d) -> f32>(out: &mut Array3<f32>, sample: F) {
    Zip::indexed(out).for_each(|pos, v| *v = sample(pos));
}

/// 借助 `rayon`, 并行地按体素下标填充 `out`.
#[cfg(feature = "rayon")]
fn fill<F: Fn(Idx3d) -> f32 + Sync>(out: &mut Array3<f32>, sample: F) {
    Zip::indexed(out).par_for_each(|pos, v| *v = sample(pos));
}

/// 连续下标 `c` 是否位于长度为 `n` 的轴内.
#[inline]
fn inside(c: f64, n: usize) -> bool {
    n > 0 && c >= 0.0 && c <= (n - 1) as f64
}

/// 三线性插值. 视野外取 0.
fn trilinear(src: &ArrayView3<f32>, p: Vec3) -> f32 {
    let (nx, ny, nz) = src.dim();
    let dims = [nx, ny, nz];
    if !(0..3).all(|a| inside(p[a], dims[a])) {
        return 0.0;
    }

    let mut lo = [0usize; 3];
    let mut hi = [0usize; 3];
    let mut frac = [0.0f64; 3];
    for a in 0..3 {
        lo[a] = (p[a].floor() as usize).min(dims[a] - 1);
        hi[a] = (lo[a] + 1).min(dims[a] - 1);
        frac[a] = p[a] - lo[a] as f64;
    }

    let mut acc = 0.0f64;
    for corner in 0..8u8 {
        let mut weight = 1.0;
        let mut idx = [0usize; 3];
        for a in 0..3 {
            if corner >> a & 1 == 1 {
                weight *= frac[a];
                idx[a] = hi[a];
            } else {
                weight *= 1.0 - frac[a];
                idx[a] = lo[a];
            }
        }
        if weight != 0.0 {
            acc += weight * src[(idx[0], idx[1], idx[2])] as f64;
        }
    }
    acc as f32
}

/// 最近邻插值. 视野外取 0.
fn nearest(src: &ArrayView3<f32>, p: Vec3) -> f32 {
    let (nx, ny, nz) = src.dim();
    let dims = [nx, ny, nz];
    let mut idx = [0usize; 3];
    for a in 0..3 {
        let r = p[a].round();
        if !inside(r, dims[a]) {
            return 0.0;
        }
        idx[a] = r as usize;
    }
    src[(idx[0], idx[1], idx[2])]
}

/// 内置的随机仿射扰动生成器.
///
/// 线性部分为 `I + E`, 平移为 `e`, `E` 与 `e` 的每个元素独立服从
/// `N(0, sd_affine)`. 变换围绕体数据的物理中心进行.
#[derive(Debug, Clone)]
pub struct RandomAffine {
    rng: StdRng,
}

impl Default for RandomAffine {
    #[inline]
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl RandomAffine {
    /// 以固定种子创建, 结果可复现.
    #[inline]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 以系统熵创建.
    #[inline]
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// 为 `volume` 抽取一个随机变换.
    pub fn draw(
        &mut self,
        volume: &Volume,
        spec: &PerturbSpec,
    ) -> Result<AffineTransform, AugmentError> {
        let sd = spec.sd_affine;
        if !sd.is_finite() || sd < 0.0 {
            return Err(AugmentError::InvalidDeviation(sd));
        }
        let normal = Normal::new(0.0, sd).map_err(|_| AugmentError::InvalidDeviation(sd))?;

        let mut matrix = IDENTITY;
        if spec.transform == TransformType::Affine {
            for v in matrix.iter_mut().flatten() {
                *v += self.rng.sample(normal);
            }
        }
        let translation = [(); 3].map(|_| self.rng.sample(normal));
        Ok(AffineTransform::new(
            matrix,
            translation,
            AffineTransform::center_of(volume),
        ))
    }
}

impl Augmenter for RandomAffine {
    fn perturb(&mut self, volume: &Volume, spec: &PerturbSpec) -> Result<Volume, AugmentError> {
        let transform = self.draw(volume, spec)?;
        log::trace!("random affine {:?}", transform.matrix());
        Ok(transform.resample(volume, spec.interpolator))
    }
}

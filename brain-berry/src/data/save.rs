//! 图像的持久化存储.

use super::PseudoColorSlice;
use image::ImageResult;
use std::path::Path;

/// 表明一个可以通过 **可视化友好** 模式持久化存储的图像对象.
///
/// 归一化后的体素值位于 `[0, 1]`, 保存时线性映射到 `[0, 255]`.
/// 超出该范围的值会被截断.
pub trait ImgWriteVis {
    /// 按照一定的可视化规则将图片保存到 `path` 路径.
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

/// 将 `[0, 1]` 内的强度映射为 8-bit 值. 非有限值视为 0.
#[inline]
pub(crate) fn to_u8(v: f32) -> u8 {
    if !v.is_finite() {
        return u8::MIN;
    }
    // 255, not 256.
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// 三个通道分别写入 RGB, 因此得到的是一张灰度外观的彩色图.
impl ImgWriteVis for PseudoColorSlice<'_> {
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        let (height, width) = self.shape();
        let mut buf = image::RgbImage::new(width as u32, height as u32);
        let view = self.view();
        for ((h, w), pix) in buf
            .enumerate_pixels_mut()
            .map(|(w, h, p)| ((h as usize, w as usize), p))
        {
            *pix = image::Rgb([0, 1, 2].map(|c| to_u8(view[(h, w, c)])));
        }
        buf.save(path)
    }
}

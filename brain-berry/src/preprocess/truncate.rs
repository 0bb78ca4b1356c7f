//! 内置预处理: 分位数强度截断.

use log::{debug, warn};

use super::{PreprocessError, PreprocessSpec, Preprocessed, Preprocessor};
use crate::Volume;

/// 适用于已经去颅骨并配准到模板空间的输入.
///
/// 将强度截断到给定的分位数区间, 并以原图的非零体素作为脑掩膜.
/// 无法执行的步骤 (去颅骨, 偏置场校正, 配准) 仅以 `warn!` 报告后跳过.
#[derive(Copy, Clone, Debug, Default)]
pub struct IntensityTruncation;

/// 线性插值的分位数. `sorted` 必须升序且非空.
fn quantile(sorted: &[f32], q: f64) -> f32 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = pos - lo as f64;
    let (a, b) = (f64::from(sorted[lo]), f64::from(sorted[hi]));
    (a + (b - a) * frac) as f32
}

impl IntensityTruncation {
    /// 将 `image` 截断到分位数区间 `[low, high]`.
    pub fn truncate(image: &Volume, low: f64, high: f64) -> Result<Volume, PreprocessError> {
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
            return Err(PreprocessError::InvalidQuantiles(low, high));
        }
        if image.size() == 0 {
            return Ok(image.clone());
        }

        let mut sorted: Vec<f32> = image.data().iter().copied().collect();
        sorted.sort_unstable_by(f32::total_cmp);
        let (lo, hi) = (quantile(&sorted, low), quantile(&sorted, high));
        debug!("truncating intensities to [{lo}, {hi}]");

        Ok(image.map(|v| v.clamp(lo, hi)))
    }
}

impl Preprocessor for IntensityTruncation {
    fn preprocess(
        &self,
        image: &Volume,
        spec: &PreprocessSpec,
    ) -> Result<Preprocessed, PreprocessError> {
        for (step, method) in [
            ("brain extraction", &spec.brain_extraction),
            ("bias correction", &spec.bias_correction),
            ("template registration", &spec.template_transform),
        ] {
            if !method.is_empty() {
                warn!("{step} `{method}` is not available, assuming it was already applied");
            }
        }
        if let Some(dir) = &spec.output_dir {
            warn!("intermediate output is not written (requested {})", dir.display());
        }

        let (low, high) = spec.truncate_intensity;
        let truncated = Self::truncate(image, low, high)?;
        let mask = image.map(|v| if v != 0.0 { 1.0 } else { 0.0 });
        Ok(Preprocessed {
            image: truncated,
            brain_mask: Some(mask),
        })
    }
}

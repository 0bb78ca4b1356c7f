//! 脑龄估计流水线.
//!
//! ```text
//! RAW -> PREPROCESSED -> NORMALIZED -> {BATCHED -> PREDICTED}* -> AGGREGATED -> RESULT
//! ```
//!
//! 每一步失败都直接返回, 不做局部恢复.

use std::borrow::Cow;

use crate::aggregate::{Aggregated, PredictionAggregator, PredictionTrace};
use crate::augment::{Augmenter, PerturbSpec, PerturbationEnsemble, RandomAffine};
use crate::cancel::CancelToken;
use crate::config::{EstimateOptions, EstimatorConfig};
use crate::error::{EstimateError, EstimateResult};
use crate::model::{ModelLoader, SliceRegressor, WeightFetcher, WeightStore};
use crate::preprocess::{PreprocessError, Preprocessor};
use crate::{SliceBatchBuilder, Volume};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 一次估计的结果.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BrainAgeResult {
    /// 逐切片估计的中位数 (岁).
    pub predicted_age: f64,

    /// 逐切片估计, 与 `slice_indices` 一一对应.
    pub brain_age_per_slice: Vec<f64>,

    /// 每个估计对应的切片下标.
    pub slice_indices: Vec<usize>,

    /// 参与聚合的模拟个数, 含原始体数据.
    pub simulations: usize,

    /// 每个模拟的原始预测. 仅在 `keep_trace` 时存在.
    pub trace: Option<PredictionTrace>,
}

/// 脑龄估计器.
///
/// 网络在构建时加载一次, 之后每次 [`Self::estimate`] 都复用它.
/// 估计器本身不是线程安全的 (扰动生成器带有随机状态),
/// 需要并发估计时请为每个线程构建一个估计器.
pub struct BrainAgeEstimator<R> {
    config: EstimatorConfig,
    builder: SliceBatchBuilder,
    model: R,
    preprocessor: Option<Box<dyn Preprocessor>>,
    augmenter: Box<dyn Augmenter>,
}

impl<R: SliceRegressor> BrainAgeEstimator<R> {
    /// 使用已经加载好的网络.
    ///
    /// 默认没有预处理器, 扰动生成器为以系统熵初始化的 [`RandomAffine`].
    pub fn with_model(config: EstimatorConfig, model: R) -> Self {
        Self {
            builder: config.slice_builder(),
            config,
            model,
            preprocessor: None,
            augmenter: Box::<RandomAffine>::default(),
        }
    }

    /// 从权重缓存获取网络, 缺失时先下载.
    ///
    /// 下载或加载失败时返回 [`EstimateError::ModelUnavailable`].
    pub fn acquire<F, L>(config: EstimatorConfig, fetcher: &F, loader: &L) -> EstimateResult<Self>
    where
        F: WeightFetcher + ?Sized,
        L: ModelLoader<Model = R> + ?Sized,
    {
        let store = WeightStore::new(&config.weights_dir);
        let model = store
            .load(&config.model, fetcher, loader)
            .map_err(|source| EstimateError::ModelUnavailable {
                model_id: config.model.id.clone(),
                source,
            })?;
        log::info!("model `{}` loaded from {}", config.model.id, store.dir().display());
        Ok(Self::with_model(config, model))
    }

    /// 设置预处理器.
    pub fn preprocessor<P: Preprocessor + 'static>(mut self, preprocessor: P) -> Self {
        self.preprocessor = Some(Box::new(preprocessor));
        self
    }

    /// 替换扰动生成器.
    pub fn augmenter<A: Augmenter + 'static>(mut self, augmenter: A) -> Self {
        self.augmenter = Box::new(augmenter);
        self
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// 网络.
    #[inline]
    pub fn model(&self) -> &R {
        &self.model
    }

    /// 估计 `image` 的脑龄.
    #[inline]
    pub fn estimate(
        &mut self,
        image: &Volume,
        options: &EstimateOptions,
    ) -> EstimateResult<BrainAgeResult> {
        self.estimate_with_cancel(image, options, &CancelToken::new())
    }

    /// 估计 `image` 的脑龄. 每个模拟开始之前检查一次 `cancel`.
    pub fn estimate_with_cancel(
        &mut self,
        image: &Volume,
        options: &EstimateOptions,
        cancel: &CancelToken,
    ) -> EstimateResult<BrainAgeResult> {
        let verbose = options.verbose;

        let image = if options.do_preprocessing {
            let preprocessor = self
                .preprocessor
                .as_deref()
                .ok_or(PreprocessError::NotConfigured)?;
            progress!(verbose, "preprocessing volume {:?}", image.shape());
            let preprocessed = preprocessor.preprocess(image, &self.config.preprocess)?;
            Cow::Owned(preprocessed.masked()?)
        } else {
            Cow::Borrowed(image)
        };

        // 先检查形状, 以免对注定失败的输入做归一化和扰动.
        self.builder.check(&image)?;
        let normalized = image.normalized()?;
        progress!(verbose, "normalized volume {:?}", normalized.shape());

        let ensemble = PerturbationEnsemble::new(
            &normalized,
            &mut *self.augmenter,
            options.number_of_simulations,
            PerturbSpec::affine(options.sd_affine),
        );
        let aggregator = PredictionAggregator::new(self.builder, &self.model)
            .verbose(verbose)
            .keep_trace(options.keep_trace);
        let Aggregated { estimate, trace } = run_ensemble(
            &aggregator,
            ensemble,
            cancel,
            self.config.parallel_simulations,
        )?;

        let simulations = estimate.simulations();
        let predicted_age = estimate
            .median()
            .map_err(|source| EstimateError::Prediction {
                simulation: simulations.saturating_sub(1),
                source,
            })?;
        progress!(
            verbose,
            "predicted brain age {predicted_age:.2} over {simulations} simulations"
        );

        Ok(BrainAgeResult {
            predicted_age,
            brain_age_per_slice: estimate.into_values(),
            slice_indices: self.builder.range().iter().collect(),
            simulations,
            trace,
        })
    }
}

/// 串行地跑完整个集成.
#[cfg(not(feature = "rayon"))]
fn run_ensemble<R: SliceRegressor + ?Sized>(
    aggregator: &PredictionAggregator<'_, R>,
    ensemble: PerturbationEnsemble<'_>,
    cancel: &CancelToken,
    parallel: bool,
) -> EstimateResult<Aggregated> {
    if parallel {
        log::debug!("`rayon` feature is off, predicting simulations serially");
    }
    aggregator.aggregate(ensemble, cancel)
}

/// 跑完整个集成, `parallel` 时借助 `rayon` 并行预测.
#[cfg(feature = "rayon")]
fn run_ensemble<R: SliceRegressor + ?Sized>(
    aggregator: &PredictionAggregator<'_, R>,
    ensemble: PerturbationEnsemble<'_>,
    cancel: &CancelToken,
    parallel: bool,
) -> EstimateResult<Aggregated> {
    if parallel {
        aggregator.aggregate_par(ensemble, cancel)
    } else {
        aggregator.aggregate(ensemble, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::BrainAgeEstimator;
    use crate::aggregate::{median, RunningEstimate};
    use crate::augment::tests::ShiftAugmenter;
    use crate::model::{FetchError, LoadError, ModelLoader, PredictionError, SliceRegressor};
    use crate::model::{WeightError, WeightFetcher};
    use crate::preprocess::{IntensityTruncation, PreprocessError};
    use crate::{
        CancelToken, EstimateError, EstimateOptions, EstimatorConfig, SliceAxis, SliceRange,
        Volume,
    };
    use ndarray::{Array3, ArrayView4, Axis};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 预测 `20 + 60 * 切片首个体素`, 并记录调用次数.
    #[derive(Default)]
    struct AgeModel {
        calls: AtomicUsize,
    }

    impl SliceRegressor for AgeModel {
        fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<f32>, PredictionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(batch
                .axis_iter(Axis(0))
                .map(|row| 20.0 + 60.0 * row[(0, 0, 0)])
                .collect())
        }
    }

    impl AgeModel {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn options() -> EstimateOptions {
        EstimateOptions {
            do_preprocessing: false,
            verbose: false,
            ..Default::default()
        }
    }

    /// Z 轴 `1..=3`, 不检查切片形状.
    fn small_config() -> EstimatorConfig {
        EstimatorConfig::default()
            .with_slices(SliceAxis::Z, SliceRange::new(1, 3).unwrap())
            .with_expected_slice_shape(None)
    }

    /// 第 z 层的值为 z.
    fn small_volume() -> Volume {
        Volume::new(Array3::from_shape_fn((4, 3, 5), |(_, _, z)| z as f32))
    }

    #[test]
    fn test_reference_end_to_end() {
        let image = Volume::new(Array3::from_shape_fn((181, 217, 181), |(_, _, z)| z as f32));
        let mut est = BrainAgeEstimator::with_model(EstimatorConfig::default(), AgeModel::default());
        let out = est.estimate(&image, &options()).unwrap();

        assert_eq!(out.brain_age_per_slice.len(), 80);
        assert_eq!(out.slice_indices, (46..=125).collect::<Vec<_>>());
        assert_eq!(out.simulations, 1);
        assert_eq!(est.model().calls(), 1);
        assert!(out.trace.is_none());

        // 归一化后第 z 层为 z / 180.
        let first = 20.0 + 60.0 * (46.0f32 / 180.0);
        assert!((out.brain_age_per_slice[0] - f64::from(first)).abs() < 1e-4);
        assert_eq!(
            out.predicted_age,
            median(&out.brain_age_per_slice).unwrap()
        );
        let expected = 20.0 + 60.0 * (85.5 / 180.0);
        assert!((out.predicted_age - expected).abs() < 1e-4);
    }

    #[test]
    fn test_idempotent_without_simulations() {
        let image = small_volume();
        let mut est = BrainAgeEstimator::with_model(small_config(), AgeModel::default());
        let a = est.estimate(&image, &options()).unwrap();
        let b = est.estimate(&image, &options()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.slice_indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_short_volume_fails_before_model() {
        let image = Volume::new(Array3::zeros((181, 217, 100)));
        let mut est = BrainAgeEstimator::with_model(EstimatorConfig::default(), AgeModel::default());
        let err = est.estimate(&image, &options()).unwrap_err();
        assert!(matches!(
            err,
            EstimateError::InputShape {
                axis: SliceAxis::Z,
                required: 126,
                actual: 100
            }
        ));
        assert_eq!(est.model().calls(), 0);
    }

    #[test]
    fn test_wrong_slice_shape() {
        let image = Volume::new(Array3::from_shape_fn((10, 10, 130), |(_, _, z)| z as f32));
        let mut est = BrainAgeEstimator::with_model(EstimatorConfig::default(), AgeModel::default());
        assert!(matches!(
            est.estimate(&image, &options()),
            Err(EstimateError::SliceShape {
                expected: (181, 217),
                actual: (10, 10)
            })
        ));
    }

    #[test]
    fn test_constant_volume_is_degenerate() {
        let image = Volume::new(Array3::from_elem((4, 3, 5), 2.0));
        let mut est = BrainAgeEstimator::with_model(small_config(), AgeModel::default());
        assert!(matches!(
            est.estimate(&image, &options()),
            Err(EstimateError::DegenerateInput(_))
        ));
        assert_eq!(est.model().calls(), 0);
    }

    #[test]
    fn test_simulations_follow_recurrence() {
        let image = small_volume();
        let mut est = BrainAgeEstimator::with_model(small_config(), AgeModel::default())
            .augmenter(ShiftAugmenter {
                calls: 0,
                step: 0.25,
            });
        let opts = EstimateOptions {
            number_of_simulations: 2,
            keep_trace: true,
            ..options()
        };
        let out = est.estimate(&image, &opts).unwrap();
        assert_eq!(out.simulations, 3);
        assert_eq!(est.model().calls(), 3);

        // 归一化后第 z 层为 z / 4, 第 k 个模拟再整体加 k / 4.
        let mut expected = RunningEstimate::new();
        for k in 0..3 {
            let p: Vec<f32> = (1..=3)
                .map(|z| 20.0 + 60.0 * (z as f32 / 4.0 + k as f32 * 0.25))
                .collect();
            expected.push(&p).unwrap();
        }
        assert_eq!(out.brain_age_per_slice, expected.values());
        assert_eq!(out.predicted_age, expected.median().unwrap());

        let trace = out.trace.unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.slices(), 3);
    }

    #[test]
    fn test_preprocessing() {
        // 其他测试可能已经装好了 logger.
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Warn)
            .init();

        let mut image = small_volume().into_inner();
        image.slice_mut(ndarray::s![0, .., ..]).fill(0.0);
        let image = Volume::new(image);
        let opts = EstimateOptions {
            do_preprocessing: true,
            ..options()
        };

        let mut est = BrainAgeEstimator::with_model(small_config(), AgeModel::default());
        assert!(matches!(
            est.estimate(&image, &opts),
            Err(EstimateError::Preprocessing(PreprocessError::NotConfigured))
        ));
        assert_eq!(est.model().calls(), 0);

        let mut est = est.preprocessor(IntensityTruncation);
        let out = est.estimate(&image, &opts).unwrap();
        assert_eq!(out.brain_age_per_slice.len(), 3);
        assert!(out.predicted_age.is_finite());
    }

    #[test]
    fn test_cancelled_before_first_simulation() {
        let image = small_volume();
        let mut est = BrainAgeEstimator::with_model(small_config(), AgeModel::default());
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            est.estimate_with_cancel(&image, &options(), &token),
            Err(EstimateError::Cancelled { completed: 0 })
        ));
        assert_eq!(est.model().calls(), 0);
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_parallel_simulations_match_serial() {
        let image = small_volume();
        let opts = EstimateOptions {
            number_of_simulations: 3,
            ..options()
        };
        let run = |parallel: bool| {
            let config = small_config().with_parallel_simulations(parallel);
            BrainAgeEstimator::with_model(config, AgeModel::default())
                .augmenter(ShiftAugmenter { calls: 0, step: 0.1 })
                .estimate(&image, &opts)
                .unwrap()
        };
        assert_eq!(run(true), run(false));
    }

    struct TouchFetcher;

    impl WeightFetcher for TouchFetcher {
        fn fetch(&self, _: &str, destination: &Path) -> Result<(), FetchError> {
            fs::write(destination, b"weights")?;
            Ok(())
        }
    }

    struct OfflineFetcher;

    impl WeightFetcher for OfflineFetcher {
        fn fetch(&self, _: &str, _: &Path) -> Result<(), FetchError> {
            Err(FetchError::Network("offline".into()))
        }
    }

    struct AgeModelLoader;

    impl ModelLoader for AgeModelLoader {
        type Model = AgeModel;

        fn load(&self, path: &Path) -> Result<AgeModel, LoadError> {
            fs::metadata(path)?;
            Ok(AgeModel::default())
        }
    }

    #[test]
    fn test_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config().with_weights_dir(dir.path());

        let err = BrainAgeEstimator::acquire(config.clone(), &OfflineFetcher, &AgeModelLoader)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EstimateError::ModelUnavailable {
                ref model_id,
                source: WeightError::Fetch { .. }
            } if model_id == "brainAgeDeepBrainNet"
        ));

        let mut est =
            BrainAgeEstimator::acquire(config, &TouchFetcher, &AgeModelLoader).unwrap();
        assert!(dir.path().join("brainAgeDeepBrainNet.h5").is_file());
        assert!(est.estimate(&small_volume(), &options()).is_ok());
    }
}
